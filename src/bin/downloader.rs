use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

use mosaic::mosaic::config::{connect_with_retry, DownloaderConfig};
use mosaic::mosaic::error::AppError;
use mosaic::mosaic::http::{DownloadRequest, DownloadResponse};
use mosaic::mosaic::owner::OwnerPrefix;
use mosaic::mosaic::tip::{self, Bus, InMemoryBus, NatsBus, SourceRequest};
use mosaic::mosaic::vtr::{FileTileRepository, RedisTileRepository, TileRepository};

/// Default random-image source the downloader ingests from when no other
/// source is configured. `pic.sum`-style random image endpoints are the
/// canonical "give me an unpredictable photo" source this pipeline expects.
const DEFAULT_SOURCE_URL: &str = "https://picsum.photos/400";

#[derive(Clone)]
struct AppState {
    repo: Arc<dyn TileRepository>,
    bus: Arc<dyn Bus>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();
    let config = DownloaderConfig::parse();

    let repo: Arc<dyn TileRepository> = if let Some(dir) = &config.file_storage {
        info!(dir, "downloader: using file-backed tile repository");
        Arc::new(FileTileRepository::new(dir.clone()))
    } else {
        let redis_url = config
            .redis_url
            .clone()
            .expect("-redis <url> is required unless -file-storage is set");
        let repo: RedisTileRepository = connect_with_retry("redis", || {
            let redis_url = redis_url.clone();
            async move {
                let repo = RedisTileRepository::new(&redis_url).map_err(AppError::from)?;
                repo.ping().await.map_err(AppError::from)?;
                Ok(repo)
            }
        })
        .await
        .unwrap_or_else(|err| {
            tracing::error!(error = %err, "could not reach redis, aborting");
            std::process::exit(1);
        });
        Arc::new(repo) as Arc<dyn TileRepository>
    };

    let bus: Arc<dyn Bus> = if config.embed_nats {
        info!("downloader: embedding an in-process bus instead of an external NATS server");
        Arc::new(InMemoryBus::new())
    } else {
        let nats_url = config
            .nats_url
            .clone()
            .expect("-nats <url> is required unless -embed-nats is set");
        let bus = connect_with_retry("nats", || {
            let nats_url = nats_url.clone();
            async move {
                NatsBus::connect(&nats_url)
                    .await
                    .map_err(AppError::from)
            }
        })
        .await
        .unwrap_or_else(|err| {
            tracing::error!(error = %err, "could not reach nats, aborting");
            std::process::exit(1);
        });
        Arc::new(bus) as Arc<dyn Bus>
    };

    let state = AppState { repo, bus };

    let app = Router::new()
        .route("/pic.sum/random/download", post(download))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .expect("failed to bind listener");
    info!(port = config.port, "downloader listening");
    axum::serve(listener, app).await.expect("server error");
}

async fn download(
    State(state): State<AppState>,
    Json(request): Json<DownloadRequest>,
) -> Result<Json<DownloadResponse>, AppError> {
    let prefix = OwnerPrefix::new(&request.ip);
    // The index's `PREFIX` clause is bound once to the shared `img:` root,
    // not to this owner's own prefix: a single index covers every owner,
    // per-owner scoping happens at query time via the `prefix` TAG field.
    state
        .repo
        .create_index("average_color_index", OwnerPrefix::GLOBAL_ROOT)
        .await
        .map_err(AppError::from)?;

    let outcome = tip::download_n(
        &request.ip,
        prefix.as_str(),
        request.n as usize,
        SourceRequest::new(DEFAULT_SOURCE_URL),
        state.repo.clone(),
        state.bus.clone(),
        CancellationToken::new(),
    )
    .await
    .map_err(AppError::from)?;

    Ok(Json(DownloadResponse {
        error: false,
        attempted: outcome.attempted,
        published: outcome.published,
        inserted: outcome.inserted,
        errors: outcome.errors,
    }))
}
