//! Raw LMS entity mirror and sync cursor persistence.

pub mod adapters;
mod cursor_repository;
mod entity_repository;
mod model;

pub use adapters::{default_entity_tables, EntityTableDescriptor};
pub use cursor_repository::SyncCursorRepository;
pub use entity_repository::LmsEntityRepository;
pub use model::{EntityRowDB, SyncCursorDB};
