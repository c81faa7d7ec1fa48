use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::Parser;
use image::ImageFormat;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

use mosaic::mosaic::config::{connect_with_retry, MosaicServiceConfig};
use mosaic::mosaic::error::AppError;
use mosaic::mosaic::http::{MosaicRequest, MosaicResponse};
use mosaic::mosaic::mce::{self, TileSource, VtrTileSource};
use mosaic::mosaic::owner::OwnerPrefix;
use mosaic::mosaic::vtr::{RedisTileRepository, TileRepository};

#[derive(Clone)]
struct AppState {
    repo: Arc<dyn TileRepository>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();
    let config = MosaicServiceConfig::parse();

    let redis_url = config
        .redis_url
        .clone()
        .expect("-redis <url> is required");
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

    let state = AppState {
        repo: Arc::new(repo),
    };

    let app = Router::new().route("/create", post(create)).with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .expect("failed to bind listener");
    info!(port = config.port, "mosaic-svc listening");
    axum::serve(listener, app).await.expect("server error");
}

async fn create(
    State(state): State<AppState>,
    Json(request): Json<MosaicRequest>,
) -> Result<Json<MosaicResponse>, AppError> {
    let bytes = STANDARD
        .decode(&request.original)
        .map_err(|_| AppError::InvalidRequest("original is not valid base64".into()))?;
    let original = image::load_from_memory(&bytes)
        .map_err(|_| AppError::InvalidRequest("original is not a decodable image".into()))?
        .to_rgb8();

    if request.tile_width == 0 {
        return Err(AppError::InvalidRequest("tile_width must be nonzero".into()));
    }

    let prefix = OwnerPrefix::new(&request.ip);
    let tiles: Arc<dyn TileSource> = Arc::new(VtrTileSource::new(state.repo.clone(), prefix.as_str()));

    let mosaic = mce::mosaic(tiles, &original, request.tile_width, CancellationToken::new())
        .await
        .map_err(AppError::from)?;

    let mut png_bytes = Vec::new();
    mosaic
        .write_to(&mut std::io::Cursor::new(&mut png_bytes), ImageFormat::Png)
        .map_err(|_| AppError::Internal("failed to encode mosaic as png".into()))?;

    Ok(Json(MosaicResponse {
        error: false,
        mosaic: STANDARD.encode(&png_bytes),
    }))
}
