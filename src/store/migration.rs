//! Schema management for the load target.
//!
//! Migrations live in `migrations/` and are embedded at compile time. The
//! loader applies them before the first partition opens its connection.

use sqlx::{PgPool, migrate::Migrator};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Run database migrations.
///
/// This is idempotent - migrations that have already been applied will be skipped.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    log::info!("checking database migration state");

    MIGRATOR.run(pool).await?;

    log::info!("database migrations up to date");
    Ok(())
}

/// Drop the whole `public` schema and recreate it from the migrations.
///
/// **WARNING**: This removes every object in `public`, including tables the
/// loader does not own, along with all previously imported data.
pub async fn reset_database(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    log::info!("resetting database schema");

    // Dropping the schema also removes the migration bookkeeping table, so the
    // migrator starts from the first version again.
    sqlx::query("DROP SCHEMA IF EXISTS public CASCADE")
        .execute(pool)
        .await?;

    sqlx::query("CREATE SCHEMA public").execute(pool).await?;

    sqlx::query("GRANT ALL ON SCHEMA public TO public")
        .execute(pool)
        .await?;

    log::info!("schema dropped, running migrations");

    MIGRATOR.run(pool).await?;

    log::info!("database schema recreated via migrations");
    Ok(())
}
