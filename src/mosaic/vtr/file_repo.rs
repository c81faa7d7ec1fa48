use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};

use crate::mosaic::color::ColorVector;
use crate::mosaic::owner::counter_key;
use crate::mosaic::vtr::error::VtrError;
use crate::mosaic::vtr::TileRepository;

#[derive(Serialize, Deserialize, Default)]
struct PrefixIndex {
    /// id -> average color, in insertion order.
    entries: Vec<(u64, [f64; 3])>,
}

/// A `TileRepository` backed by a local directory: one JPEG file per tile
/// plus a JSON sidecar index (`index.json`) per owner prefix. Selected by
/// the downloader's `-file-storage` flag so the demo path works without a
/// live Redis instance.
pub struct FileTileRepository {
    base_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTileRepository {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        FileTileRepository {
            base_dir: base_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn sanitize(prefix: &str) -> String {
        prefix.replace([':', '/', '\\'], "_")
    }

    fn prefix_dir(&self, prefix: &str) -> PathBuf {
        self.base_dir.join(Self::sanitize(prefix))
    }

    fn index_path(&self, prefix: &str) -> PathBuf {
        self.prefix_dir(prefix).join("index.json")
    }

    fn counter_path(&self, owner_id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.counter", Self::sanitize(&counter_key(owner_id))))
    }

    fn load_index(&self, prefix: &str) -> PrefixIndex {
        std::fs::read(self.index_path(prefix))
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }

    fn tile_path(&self, prefix: &str, id: u64) -> PathBuf {
        self.prefix_dir(prefix).join(format!("{id}.jpg"))
    }
}

#[async_trait]
impl TileRepository for FileTileRepository {
    async fn create_index(&self, _name: &str, prefix: &str) -> Result<(), VtrError> {
        std::fs::create_dir_all(self.prefix_dir(prefix)).map_err(|_| VtrError::StorageUnavailable)
    }

    async fn insert(&self, owner_id: &str, prefix: &str, image: &RgbImage) -> Result<u64, VtrError> {
        let _guard = self.write_lock.lock().unwrap();

        std::fs::create_dir_all(self.prefix_dir(prefix))
            .map_err(|_| VtrError::StorageUnavailable)?;

        let counter_path = self.counter_path(owner_id);
        let current: u64 = std::fs::read_to_string(&counter_path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);
        let id = current + 1;

        let average_color = ColorVector::of_region(image, (0, 0, image.width(), image.height()));
        let mut jpeg_bytes = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut jpeg_bytes), ImageFormat::Jpeg)
            .map_err(|_| VtrError::EncodeFailed)?;

        std::fs::write(self.tile_path(prefix, id), &jpeg_bytes)
            .map_err(|_| VtrError::StorageUnavailable)?;

        let mut index = self.load_index(prefix);
        index.entries.push((id, average_color.as_array()));
        let serialized = serde_json::to_vec(&index).map_err(|_| VtrError::StorageUnavailable)?;
        std::fs::write(self.index_path(prefix), serialized)
            .map_err(|_| VtrError::StorageUnavailable)?;

        std::fs::write(&counter_path, id.to_string()).map_err(|_| VtrError::StorageUnavailable)?;

        Ok(id)
    }

    async fn nearest(
        &self,
        prefix: &str,
        target: ColorVector,
        k: usize,
    ) -> Result<Vec<RgbImage>, VtrError> {
        let index = self.load_index(prefix);
        if index.entries.is_empty() {
            return Err(VtrError::NoResult);
        }

        let mut scored: Vec<(f64, u64)> = index
            .entries
            .iter()
            .map(|(id, color)| {
                let c = ColorVector::new(color[0], color[1], color[2]);
                (target.squared_distance(&c), *id)
            })
            .collect();
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(k)
            .map(|(_, id)| {
                let bytes = std::fs::read(self.tile_path(prefix, id))
                    .map_err(|_| VtrError::StorageUnavailable)?;
                image::load_from_memory(&bytes)
                    .map(|img| img.to_rgb8())
                    .map_err(|_| VtrError::DecodeFailed)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[tokio::test]
    async fn insert_then_nearest_round_trips() {
        let dir = std::env::temp_dir().join(format!("mosaic-file-repo-test-{}", std::process::id()));
        let repo = FileTileRepository::new(&dir);
        let img = RgbImage::from_fn(4, 4, |_, _| Rgb([1, 2, 3]));
        let id = repo.insert("owner", "img:owner", &img).await.unwrap();
        assert_eq!(id, 1);

        let found = repo
            .nearest("img:owner", ColorVector::new(1.0, 2.0, 3.0), 1)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }
}
