//! Postgres implementation of the waypoint metadata store.

mod imaging;

pub use imaging::PgImagingRepository;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

const MAX_CONNECTIONS: u32 = 20;
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Open the connection pool used by the repository and the API.
pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .connect(database_url)
        .await
}
