//! SQLite persistence for the LMS bridge: OAuth tokens, mirrored remote
//! entities and sync cursors.

pub mod db;
pub mod errors;
pub mod lms;
pub mod schema;
pub mod tokens;

#[cfg(test)]
mod test_support;

pub use db::{create_pool, get_connection, init, run_migrations, spawn_writer, DbPool, WriteHandle};
pub use errors::StorageError;
pub use lms::{LmsEntityRepository, SyncCursorRepository};
pub use tokens::TokenRepository;
