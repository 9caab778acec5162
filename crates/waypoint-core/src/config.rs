//! Configuration module
//!
//! All runtime configuration is read from the environment. The R2_* names
//! match what the storage provider hands out; any S3-compatible target works
//! as long as the endpoint is reachable.

use std::env;

const DEFAULT_SERVER_PORT: u16 = 8080;
const DEFAULT_JOB_QUEUE_CAPACITY: usize = 1000;
const DEFAULT_UPLOAD_CONCURRENCY: usize = 10;
const DEFAULT_MAX_JOB_ATTEMPTS: u32 = 3;
const DEFAULT_JOB_TIMEOUT_SECS: u64 = 300;

/// Blob store (Cloudflare R2 / S3-compatible) configuration.
#[derive(Clone, Debug)]
pub struct BlobConfig {
    pub account_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    /// Public base URL for serving objects (custom domain). When unset,
    /// public URLs fall back to the account endpoint.
    pub public_url: Option<String>,
}

impl BlobConfig {
    /// S3 endpoint for the R2 account.
    pub fn endpoint(&self) -> String {
        format!("https://{}.r2.cloudflarestorage.com", self.account_id)
    }
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub blob: BlobConfig,
    /// Worker tasks processing jobs in parallel. Defaults to available CPUs.
    pub worker_count: usize,
    /// Capacity of the in-memory job channel.
    pub job_queue_capacity: usize,
    /// Concurrent derivative uploads per job.
    pub upload_concurrency: usize,
    pub max_job_attempts: u32,
    pub job_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let blob = BlobConfig {
            account_id: require_env("R2_ACCOUNT_ID")?,
            access_key_id: require_env("R2_ACCESS_KEY_ID")?,
            secret_access_key: require_env("R2_SECRET_ACCESS_KEY")?,
            bucket_name: require_env("R2_BUCKET_NAME")?,
            public_url: env::var("R2_PUBLIC_URL")
                .ok()
                .filter(|v| !v.is_empty())
                .map(|v| v.trim_end_matches('/').to_string()),
        };

        Ok(Config {
            server_port: parse_env("SERVER_PORT", DEFAULT_SERVER_PORT)?,
            database_url: require_env("DATABASE_URL")?,
            blob,
            worker_count: parse_env("WORKER_COUNT", default_worker_count())?,
            job_queue_capacity: parse_env("JOB_QUEUE_CAPACITY", DEFAULT_JOB_QUEUE_CAPACITY)?,
            upload_concurrency: parse_env("UPLOAD_CONCURRENCY", DEFAULT_UPLOAD_CONCURRENCY)?,
            max_job_attempts: parse_env("MAX_JOB_ATTEMPTS", DEFAULT_MAX_JOB_ATTEMPTS)?,
            job_timeout_secs: parse_env("JOB_TIMEOUT_SECS", DEFAULT_JOB_TIMEOUT_SECS)?,
        })
    }
}

pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn require_env(name: &str) -> Result<String, anyhow::Error> {
    env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow::anyhow!("missing required environment variable: {}", name))
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, anyhow::Error>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.is_empty() => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid value for {}: {}", name, e)),
        _ => Ok(default),
    }
}
