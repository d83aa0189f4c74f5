mod api;
mod entity;

pub use api::*;
pub use entity::{EntityKind, Relation};
