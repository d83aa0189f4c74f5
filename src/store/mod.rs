//! Persistence and object-storage collaborators.

mod filter;
mod object_store;
mod repository;

pub use filter::{FieldName, Filter, FilterOp};
pub use object_store::{InMemoryObjectStore, ObjectInfo, ObjectStore};
pub use repository::{InMemoryRepository, Record, Repository};
