use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::Error;

/// Forward-only, numbered migrations, run at process start exactly as
/// `auth/src/lib.rs::pgpool_init` does for its pool.
pub static MIGRATIONS: Migrator = sqlx::migrate!("./migrations");

pub async fn pgpool_init(database_url: &str) -> Result<PgPool, Error> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
        .map_err(Error::from)?;

    MIGRATIONS.run(&pool).await.map_err(|err| {
        tracing::error!(error = ?err, "failed to run migrations");
        Error::new(
            crate::error::ErrorKind::InternalPlatformError,
            "failed to run database migrations",
        )
    })?;

    Ok(pool)
}
