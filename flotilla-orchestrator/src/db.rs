use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Every entity kind lives in one table; the body holds the serialized entity
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            kind VARCHAR(64) NOT NULL,
            id UUID NOT NULL,
            version BIGINT NOT NULL,
            status VARCHAR(64),
            parent_id UUID,
            body JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (kind, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes backing status and parent queries
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_status ON entities(kind, status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_parent ON entities(kind, parent_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entities_created_at ON entities(kind, created_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
