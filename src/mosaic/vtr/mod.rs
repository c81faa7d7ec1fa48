//! Vector Tile Repository: a color-indexed store of tile images.

pub mod error;
pub mod file_repo;
pub mod in_memory;
pub mod redis_repo;
pub mod reply;

use ::image::RgbImage;
use async_trait::async_trait;

use crate::mosaic::color::ColorVector;

pub use error::VtrError;
pub use file_repo::FileTileRepository;
pub use in_memory::InMemoryTileRepository;
pub use redis_repo::RedisTileRepository;

/// A tile record as stored by the repository: the tile's base64 JPEG bytes
/// plus its pre-computed color vector. Both fields are always present
/// together — `insert` is atomic per record, so no partial record can ever
/// be observed by a reader.
#[derive(Clone, Debug)]
pub struct TileRecord {
    pub img: String,
    pub average_color: ColorVector,
}

#[async_trait]
pub trait TileRepository: Send + Sync {
    /// Idempotent: an "already exists" signal from the store is not an
    /// error.
    async fn create_index(&self, name: &str, prefix: &str) -> Result<(), VtrError>;

    /// Computes the color vector, JPEG-encodes and base64s `image`,
    /// atomically increments `<owner_id>:counter`, and writes the tile
    /// record at `<prefix>:<id>`. Returns the assigned id.
    async fn insert(&self, owner_id: &str, prefix: &str, image: &RgbImage) -> Result<u64, VtrError>;

    /// KNN over `average_color`, scoped by `prefix`, sorted ascending by
    /// L2 distance. Returns fewer than `k` if fewer records exist; fails
    /// with `NoResult` if none exist.
    async fn nearest(
        &self,
        prefix: &str,
        target: ColorVector,
        k: usize,
    ) -> Result<Vec<RgbImage>, VtrError>;
}
