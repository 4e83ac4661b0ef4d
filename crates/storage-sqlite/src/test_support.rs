//! Fresh migrated database per test.

use std::sync::Arc;
use tempfile::TempDir;

use crate::db::{create_pool, init, run_migrations, spawn_writer, DbPool, WriteHandle};

pub(crate) fn setup_db() -> (Arc<DbPool>, WriteHandle, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("lmsbridge-test.db");
    let db_path = init(&db_path.to_string_lossy()).expect("init db");
    run_migrations(&db_path).expect("migrate db");
    let pool = create_pool(&db_path).expect("create pool");
    let writer = spawn_writer((*pool).clone());
    (pool, writer, dir)
}
