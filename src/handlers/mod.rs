mod auth;
mod debug;
pub mod entities;
pub mod files;
mod health;

pub use auth::{login, me, register};
pub use debug::{runtime_info, telemetry_snapshot};
pub use entities::{
    RelationRoute, create_record, delete_record, enrolled_courses, get_record,
    latest_submission, list_records, list_related, update_record,
};
pub use files::{file_url, upload_file};
pub use health::{health_check, readiness_check};
