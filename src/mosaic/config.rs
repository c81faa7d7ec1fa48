//! CLI configuration for the three binaries, via `clap`'s `env` feature so
//! every flag doubles as an environment variable.

use std::time::Duration;

use clap::Parser;
use tracing::error;

use crate::mosaic::error::AppError;

/// Attempts performed before a service gives up dialing a backing store.
pub const CONNECT_ATTEMPTS: u32 = 5;
pub const CONNECT_BACKOFF: Duration = Duration::from_secs(1);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug, Clone)]
#[command(name = "broker", about = "HTTP front door for mosaic requests")]
pub struct BrokerConfig {
    #[arg(short = 'p', long = "port", env = "MOSAIC_PORT", default_value_t = 80)]
    pub port: u16,

    /// Base URL of the downloader service, dialed over HTTP to trigger
    /// ingestion rather than talking to Redis/NATS directly from the broker.
    #[arg(
        long = "downloader-url",
        env = "MOSAIC_DOWNLOADER_URL",
        default_value = "http://127.0.0.1:8081"
    )]
    pub downloader_url: String,

    #[arg(
        long = "mosaic-svc-url",
        env = "MOSAIC_SVC_URL",
        default_value = "http://127.0.0.1:8082"
    )]
    pub mosaic_svc_url: String,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "downloader", about = "Ingests candidate tiles into the repository")]
pub struct DownloaderConfig {
    #[arg(short = 'p', long = "port", env = "MOSAIC_PORT", default_value_t = 80)]
    pub port: u16,

    #[arg(long = "redis", env = "MOSAIC_REDIS_URL")]
    pub redis_url: Option<String>,

    #[arg(long = "nats", env = "MOSAIC_NATS_URL")]
    pub nats_url: Option<String>,

    #[arg(long = "embed-nats", env = "MOSAIC_EMBED_NATS", default_value_t = false)]
    pub embed_nats: bool,

    #[arg(long = "file-storage", env = "MOSAIC_FILE_STORAGE")]
    pub file_storage: Option<String>,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "mosaic-svc", about = "Composes mosaics from ingested tiles")]
pub struct MosaicServiceConfig {
    #[arg(short = 'p', long = "port", env = "MOSAIC_PORT", default_value_t = 80)]
    pub port: u16,

    #[arg(long = "redis", env = "MOSAIC_REDIS_URL")]
    pub redis_url: Option<String>,
}

/// Retries `connect` up to `CONNECT_ATTEMPTS` times with a fixed backoff,
/// bounding each attempt to `CONNECT_TIMEOUT`. Used by every binary's
/// `main` to dial its backing store(s) before serving traffic; a
/// `StorageUnavailable` after the final attempt is logged and the caller
/// is expected to abort the process.
pub async fn connect_with_retry<T, F, Fut>(what: &str, mut connect: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AppError>>,
{
    let mut last_err = None;
    for attempt in 1..=CONNECT_ATTEMPTS {
        match tokio::time::timeout(CONNECT_TIMEOUT, connect()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => {
                error!(attempt, %what, error = %err, "connection attempt failed");
                last_err = Some(err);
            }
            Err(_) => {
                error!(attempt, %what, "connection attempt timed out");
            }
        }
        if attempt < CONNECT_ATTEMPTS {
            tokio::time::sleep(CONNECT_BACKOFF).await;
        }
    }
    Err(last_err.unwrap_or(AppError::Vtr(crate::mosaic::vtr::VtrError::StorageUnavailable)))
}
