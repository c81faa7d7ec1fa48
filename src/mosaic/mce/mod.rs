pub mod error;

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use futures::future::select_all;
use image::{imageops, RgbImage};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::error;

pub use error::MceError;

use crate::mosaic::color::ColorVector;
use crate::mosaic::kernels::average_pool_resize;
use crate::mosaic::vtr::{TileRepository, VtrError};

/// Consecutive `TileSource` failures a column worker tolerates for one cell
/// before giving up on it and leaving it blank rather than spinning forever.
pub const MAX_CELL_RETRIES: usize = 8;

#[async_trait]
pub trait TileSource: Send + Sync {
    async fn image(&self, target: ColorVector) -> Result<RgbImage, VtrError>;
}

/// Adapts a `TileRepository` into a `TileSource` by always asking for the
/// single closest match under a fixed owner prefix.
pub struct VtrTileSource {
    repo: Arc<dyn TileRepository>,
    prefix: String,
}

impl VtrTileSource {
    pub fn new(repo: Arc<dyn TileRepository>, prefix: impl Into<String>) -> Self {
        VtrTileSource {
            repo,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl TileSource for VtrTileSource {
    async fn image(&self, target: ColorVector) -> Result<RgbImage, VtrError> {
        let mut matches = self.repo.nearest(&self.prefix, target, 1).await?;
        matches.pop().ok_or(VtrError::NoResult)
    }
}

/// Always returns the same configured image regardless of the requested
/// color. Used to make mosaic composition deterministic in tests.
pub struct FixedTileSource {
    image: RgbImage,
}

impl FixedTileSource {
    pub fn new(image: RgbImage) -> Self {
        FixedTileSource { image }
    }
}

#[async_trait]
impl TileSource for FixedTileSource {
    async fn image(&self, _target: ColorVector) -> Result<RgbImage, VtrError> {
        Ok(self.image.clone())
    }
}

#[derive(Clone, Copy, Debug)]
struct Quadrant {
    index: usize,
    origin_x: u32,
    origin_y: u32,
    width: u32,
    height: u32,
}

fn quadrants(width: u32, height: u32) -> [Quadrant; 4] {
    let mid_x = width / 2;
    let mid_y = height / 2;
    [
        Quadrant {
            index: 0,
            origin_x: 0,
            origin_y: 0,
            width: mid_x,
            height: mid_y,
        },
        Quadrant {
            index: 1,
            origin_x: mid_x,
            origin_y: 0,
            width: width - mid_x,
            height: mid_y,
        },
        Quadrant {
            index: 2,
            origin_x: 0,
            origin_y: mid_y,
            width: mid_x,
            height: height - mid_y,
        },
        Quadrant {
            index: 3,
            origin_x: mid_x,
            origin_y: mid_y,
            width: width - mid_x,
            height: height - mid_y,
        },
    ]
}

async fn render_column(
    tiles: Arc<dyn TileSource>,
    original: Arc<RgbImage>,
    buffer: Arc<StdMutex<RgbImage>>,
    sector: Quadrant,
    column_x: u32,
    tile_edge: u32,
    cancel: CancellationToken,
) {
    let mut y = 0;
    while y < sector.height {
        if cancel.is_cancelled() {
            return;
        }

        let rect_w = tile_edge.min(sector.width - column_x);
        let rect_h = tile_edge.min(sector.height - y);
        let source_x = sector.origin_x + column_x;
        let source_y = sector.origin_y + y;

        let target = ColorVector::of_region(&*original, (source_x, source_y, rect_w, rect_h));

        let mut retries = 0usize;
        loop {
            match tiles.image(target).await {
                Ok(tile) => {
                    let resized = average_pool_resize(&tile, rect_w, rect_h);
                    let mut guard = buffer.lock().unwrap();
                    imageops::replace(&mut *guard, &resized, column_x as i64, y as i64);
                    break;
                }
                Err(err) => {
                    retries += 1;
                    if retries >= MAX_CELL_RETRIES {
                        error!(
                            error = %err,
                            x = source_x,
                            y = source_y,
                            "giving up on cell after max retries, leaving it blank"
                        );
                        break;
                    }
                }
            }
        }

        y += tile_edge;
    }
}

async fn render_sector(
    tiles: Arc<dyn TileSource>,
    original: Arc<RgbImage>,
    sector: Quadrant,
    tile_edge: u32,
    cancel: CancellationToken,
) -> (Quadrant, RgbImage) {
    let buffer = Arc::new(StdMutex::new(RgbImage::new(sector.width, sector.height)));

    let mut columns = Vec::new();
    let mut x = 0;
    while x < sector.width {
        if cancel.is_cancelled() {
            break;
        }
        columns.push(tokio::spawn(render_column(
            tiles.clone(),
            original.clone(),
            buffer.clone(),
            sector,
            x,
            tile_edge,
            cancel.clone(),
        )));
        x += tile_edge;
    }

    for column in columns {
        let _ = column.await;
    }

    let image = Arc::try_unwrap(buffer)
        .map(|m| m.into_inner().unwrap())
        .unwrap_or_else(|shared| shared.lock().unwrap().clone());
    (sector, image)
}

/// Renders `original` into a mosaic of `tile_edge`-sized cells, each filled
/// with the best match `tiles` can supply for that cell's average color.
///
/// Takes `tiles` as an `Arc` rather than a bare reference: quadrant sector
/// workers and their column workers run on genuinely spawned tasks
/// (`tokio::spawn`), which requires `'static` ownership of everything they
/// capture.
pub async fn mosaic(
    tiles: Arc<dyn TileSource>,
    original: &RgbImage,
    tile_edge: u32,
    cancel: CancellationToken,
) -> Result<RgbImage, MceError> {
    let width = original.width();
    let height = original.height();
    let mut output = RgbImage::new(width, height);

    if width == 0 || height == 0 {
        return Ok(output);
    }

    let original = Arc::new(original.clone());
    let sectors = quadrants(width, height);

    let mut receivers = Vec::new();
    for sector in sectors {
        let (tx, rx) = oneshot::channel();
        let tiles = tiles.clone();
        let original = original.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = render_sector(tiles, original, sector, tile_edge, cancel).await;
            let _ = tx.send(result);
        });
        receivers.push(Box::pin(rx));
    }

    let mut pending = receivers;
    while !pending.is_empty() {
        let (resolved, _index, rest) = select_all(pending).await;
        pending = rest;
        match resolved {
            Ok((sector, image)) => {
                imageops::replace(
                    &mut output,
                    &image,
                    sector.origin_x as i64,
                    sector.origin_y as i64,
                );
            }
            Err(_) => return Err(MceError::RenderFailed),
        }
    }

    Ok(output)
}

/// Wraps `mosaic` for callers that may or may not have a tile source on
/// hand (e.g. an owner prefix with zero ingested tiles yet), without forcing
/// every internal call site to re-check for `None`.
pub async fn mosaic_checked(
    tiles: Option<Arc<dyn TileSource>>,
    original: &RgbImage,
    tile_edge: u32,
    cancel: CancellationToken,
) -> Result<RgbImage, MceError> {
    match tiles {
        Some(tiles) => mosaic(tiles, original, tile_edge, cancel).await,
        None => Err(MceError::InvalidTilesRepository),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(w: u32, h: u32, color: [u8; 3]) -> RgbImage {
        RgbImage::from_fn(w, h, |_, _| Rgb(color))
    }

    #[tokio::test]
    async fn output_preserves_original_bounds() {
        let original = solid(10, 6, [5, 5, 5]);
        let tile = Arc::new(FixedTileSource::new(solid(2, 2, [9, 9, 9])));
        let result = mosaic(tile, &original, 2, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.width(), 10);
        assert_eq!(result.height(), 6);
    }

    #[tokio::test]
    async fn fixed_tile_source_produces_uniform_output() {
        let original = solid(8, 8, [1, 2, 3]);
        let tile = Arc::new(FixedTileSource::new(solid(4, 4, [42, 42, 42])));
        let result = mosaic(tile, &original, 4, CancellationToken::new())
            .await
            .unwrap();
        for pixel in result.pixels() {
            assert_eq!(*pixel, Rgb([42, 42, 42]));
        }
    }

    #[tokio::test]
    async fn odd_dimensions_do_not_panic() {
        let original = solid(7, 5, [0, 0, 0]);
        let tile = Arc::new(FixedTileSource::new(solid(3, 3, [7, 7, 7])));
        let result = mosaic(tile, &original, 3, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.width(), 7);
        assert_eq!(result.height(), 5);
    }

    #[tokio::test]
    async fn tile_edge_larger_than_image_yields_single_cell() {
        let original = solid(4, 4, [0, 0, 0]);
        let tile = Arc::new(FixedTileSource::new(solid(16, 16, [3, 3, 3])));
        let result = mosaic(tile, &original, 16, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.width(), 4);
        assert_eq!(result.height(), 4);
        assert_eq!(*result.get_pixel(0, 0), Rgb([3, 3, 3]));
    }

    #[tokio::test]
    async fn missing_tiles_without_source_is_an_error() {
        let original = solid(4, 4, [0, 0, 0]);
        let err = mosaic_checked(None, &original, 2, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MceError::InvalidTilesRepository));
    }

    #[tokio::test]
    async fn zero_sized_image_produces_zero_sized_output() {
        let original = RgbImage::new(0, 0);
        let tile = Arc::new(FixedTileSource::new(solid(1, 1, [1, 1, 1])));
        let result = mosaic(tile, &original, 4, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.width(), 0);
        assert_eq!(result.height(), 0);
    }
}
