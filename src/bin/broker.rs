use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::Parser;
use num_integer::Integer;
use tracing::{info, warn, Level};

use mosaic::mosaic::config::BrokerConfig;
use mosaic::mosaic::error::AppError;
use mosaic::mosaic::http::{DownloadRequest, DownloadResponse, MosaicRequest, MosaicResponse};

#[derive(Clone)]
struct AppState {
    http: reqwest::Client,
    downloader_url: String,
    mosaic_svc_url: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();
    let config = BrokerConfig::parse();

    let state = AppState {
        http: reqwest::Client::new(),
        downloader_url: config.downloader_url.clone(),
        mosaic_svc_url: config.mosaic_svc_url.clone(),
    };

    let app = Router::new().route("/mosaic", post(create_mosaic)).with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .expect("failed to bind listener");
    info!(port = config.port, "broker listening");
    axum::serve(listener, app).await.expect("server error");
}

/// Number of `tile_width`-sized cells needed to cover a `w x h` image,
/// rounding each dimension up so a partial trailing cell still counts.
fn required_tile_count(width: u32, height: u32, tile_width: u32) -> u32 {
    let (hq, hr) = width.div_rem(&tile_width);
    let cols = if hr == 0 { hq } else { hq + 1 };
    let (vq, vr) = height.div_rem(&tile_width);
    let rows = if vr == 0 { vq } else { vq + 1 };
    cols * rows
}

async fn create_mosaic(
    State(state): State<AppState>,
    Json(request): Json<MosaicRequest>,
) -> Result<Json<MosaicResponse>, AppError> {
    let bytes = STANDARD
        .decode(&request.original)
        .map_err(|_| AppError::InvalidRequest("original is not valid base64".into()))?;
    let dims = image::load_from_memory(&bytes)
        .map_err(|_| AppError::InvalidRequest("original is not a decodable image".into()))?;

    if request.tile_width == 0 {
        return Err(AppError::InvalidRequest("tile_width must be nonzero".into()));
    }

    let required = required_tile_count(dims.width(), dims.height(), request.tile_width);

    // Best-effort top-up: a failed ingestion call is logged but never
    // fails the mosaic request, since composition can still proceed with
    // whatever tiles the repository already has.
    let download_url = format!("{}/pic.sum/random/download", state.downloader_url);
    match state
        .http
        .post(&download_url)
        .json(&DownloadRequest {
            ip: request.ip.clone(),
            n: required,
        })
        .send()
        .await
    {
        Ok(response) => {
            if let Err(err) = response.error_for_status_ref() {
                warn!(error = %err, "downloader returned an error response");
            } else if let Ok(body) = response.json::<DownloadResponse>().await {
                info!(
                    ip = %request.ip,
                    attempted = body.attempted,
                    inserted = body.inserted,
                    "tile ingestion top-up completed"
                );
            }
        }
        Err(err) => warn!(error = %err, "could not reach downloader"),
    }

    let create_url = format!("{}/create", state.mosaic_svc_url);
    let response = state
        .http
        .post(&create_url)
        .json(&request)
        .send()
        .await
        .map_err(|_| AppError::Internal("mosaic service unavailable".into()))?;

    let body: MosaicResponse = response
        .json()
        .await
        .map_err(|_| AppError::Internal("mosaic service returned an invalid response".into()))?;

    Ok(Json(body))
}
