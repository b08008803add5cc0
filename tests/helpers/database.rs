use drover::adapters::sqlite::create_migrated_test_pool;
use sqlx::SqlitePool;

/// Create an in-memory `SQLite` database with all migrations applied.
#[allow(dead_code)]
pub async fn setup_test_db() -> SqlitePool {
    create_migrated_test_pool()
        .await
        .expect("failed to create test database")
}

/// Teardown test database
#[allow(dead_code)]
pub async fn teardown_test_db(pool: SqlitePool) {
    pool.close().await;
}
