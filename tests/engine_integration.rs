//! Integration tests driving the engine through the `tidemark` facade.

use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;
use tidemark::migrate::{InMemoryLock, MemoryDatabase};
use tidemark::prelude::*;

fn write_migration(dir: &Path, name: &str, up: &str, down: &str) {
    let path = dir.join(name);
    fs::create_dir_all(&path).unwrap();
    fs::write(path.join("up.sql"), up).unwrap();
    fs::write(path.join("down.sql"), down).unwrap();
}

fn engine(dir: &Path, db: &MemoryDatabase) -> MigrationEngine<MemoryDatabase, InMemoryLock> {
    let config = MigrationConfig::new().migrations_dir(dir);
    MigrationEngine::new(config, db.clone(), InMemoryLock::new(DEFAULT_LOCK_NAME))
}

#[tokio::test]
async fn test_prelude_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    write_migration(dir.path(), "0001_create_users", "CREATE TABLE users (id INT);", "DROP TABLE users;");
    write_migration(dir.path(), "0002_create_posts", "CREATE TABLE posts (id INT);", "DROP TABLE posts;");

    let db = MemoryDatabase::new();
    let mut engine = engine(dir.path(), &db);

    let plan = engine.plan(Direction::Up, Target::Latest).await.unwrap();
    assert_eq!(plan.len(), 2);

    let report = engine.up(Target::Latest).await.unwrap().into_result().unwrap();
    assert_eq!(report.applied_count(), 2);
    assert_eq!(db.applied_ids().len(), 2);

    let report = engine.down(Target::Steps(1)).await.unwrap().into_result().unwrap();
    assert_eq!(report.applied_count(), 1);
    assert_eq!(db.applied_ids(), vec![MigrationId::new(1).unwrap()]);
}

#[tokio::test]
async fn test_errors_carry_exit_codes() {
    let dir = tempfile::tempdir().unwrap();
    write_migration(dir.path(), "0001_create_users", "CREATE TABLE users (id INT);", "DROP TABLE users;");

    let db = MemoryDatabase::new();
    db.set_unavailable(true);
    let mut engine = engine(dir.path(), &db);

    let err: MigrationError = engine.up(Target::Latest).await.unwrap_err();
    assert_eq!(err.exit_code(), 3);
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_sqlite_backend_is_reexported() {
    use tidemark::sqlite::{SqliteConfig, SqliteDatabase};

    let dir = tempfile::tempdir().unwrap();
    write_migration(dir.path(), "0001_create_users", "CREATE TABLE users (id INTEGER PRIMARY KEY);", "DROP TABLE users;");

    let db = SqliteDatabase::open(SqliteConfig::memory()).await.unwrap();
    let lock = db.advisory_lock(DEFAULT_LOCK_NAME);
    let mut engine = MigrationEngine::new(MigrationConfig::new().migrations_dir(dir.path()), db, lock);

    engine.up(Target::Latest).await.unwrap().into_result().unwrap();
    let status = engine.status().await.unwrap();
    assert!(status.is_up_to_date());
    assert_eq!(status.applied.len(), 1);
}
