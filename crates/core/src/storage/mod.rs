pub mod analysis;
pub mod contention;
pub mod lock;
pub mod metadata;
pub mod prices;
pub mod runs;

use anyhow::Context;

/// Creates the tables and the analytical view if they do not exist. Safe to re-run.
pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}
