use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use image::RgbImage;
use kiddo::{float::kdtree::KdTree, SquaredEuclidean};

use crate::mosaic::color::ColorVector;
use crate::mosaic::owner::counter_key;
use crate::mosaic::vtr::error::VtrError;
use crate::mosaic::vtr::TileRepository;

type Tree = KdTree<f64, u64, 3, 32, u32>;

#[derive(Default)]
struct PrefixStore {
    tree: Option<Tree>,
    images: Vec<RgbImage>,
}

/// A KD-tree-backed, in-process `TileRepository`, indexing tiles by their
/// `average_color`. Used by tests and wherever a live store isn't available.
#[derive(Default)]
pub struct InMemoryTileRepository {
    prefixes: Mutex<HashMap<String, PrefixStore>>,
    counters: Mutex<HashMap<String, u64>>,
}

impl InMemoryTileRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TileRepository for InMemoryTileRepository {
    async fn create_index(&self, _name: &str, prefix: &str) -> Result<(), VtrError> {
        let mut prefixes = self.prefixes.lock().unwrap();
        prefixes.entry(prefix.to_string()).or_default();
        Ok(())
    }

    async fn insert(&self, owner_id: &str, prefix: &str, image: &RgbImage) -> Result<u64, VtrError> {
        let average_color = ColorVector::of_region(image, (0, 0, image.width(), image.height()));

        let id = {
            let mut counters = self.counters.lock().unwrap();
            let counter = counters.entry(counter_key(owner_id)).or_insert(0);
            *counter += 1;
            *counter
        };

        let mut prefixes = self.prefixes.lock().unwrap();
        let store = prefixes.entry(prefix.to_string()).or_default();
        let tree = store.tree.get_or_insert_with(Tree::new);
        tree.add(&average_color.as_array(), id);
        store.images.push(image.clone());

        Ok(id)
    }

    async fn nearest(
        &self,
        prefix: &str,
        target: ColorVector,
        k: usize,
    ) -> Result<Vec<RgbImage>, VtrError> {
        let prefixes = self.prefixes.lock().unwrap();
        let store = prefixes.get(prefix).ok_or(VtrError::NoResult)?;
        let tree = store.tree.as_ref().ok_or(VtrError::NoResult)?;

        let neighbours = tree.nearest_n::<SquaredEuclidean>(&target.as_array(), k);
        if neighbours.is_empty() {
            return Err(VtrError::NoResult);
        }

        Ok(neighbours
            .into_iter()
            .filter_map(|n| store.images.get((n.item - 1) as usize).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(color: [u8; 3]) -> RgbImage {
        RgbImage::from_fn(4, 4, |_, _| Rgb(color))
    }

    #[tokio::test]
    async fn parallel_inserts_produce_distinct_ids() {
        let repo = InMemoryTileRepository::new();
        let mut handles = Vec::new();
        let repo = std::sync::Arc::new(repo);
        for i in 0..10u8 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.insert("owner-a", "img:owner-a", &solid([i, i, i]))
                    .await
                    .unwrap()
            }));
        }
        let mut ids: Vec<u64> = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap());
        }
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 10);
    }

    #[tokio::test]
    async fn nearest_returns_closest_first() {
        let repo = InMemoryTileRepository::new();
        repo.insert("a", "img:a", &solid([10, 10, 10])).await.unwrap();
        repo.insert("a", "img:a", &solid([200, 10, 10])).await.unwrap();
        repo.insert("a", "img:a", &solid([10, 200, 10])).await.unwrap();

        let results = repo
            .nearest("img:a", ColorVector::new(12.0, 12.0, 12.0), 1)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(*results[0].get_pixel(0, 0), Rgb([10, 10, 10]));
    }

    #[tokio::test]
    async fn k_greater_than_record_count_returns_all_records() {
        let repo = InMemoryTileRepository::new();
        repo.insert("a", "img:a", &solid([1, 1, 1])).await.unwrap();
        repo.insert("a", "img:a", &solid([2, 2, 2])).await.unwrap();

        let results = repo
            .nearest("img:a", ColorVector::new(0.0, 0.0, 0.0), 100)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn nearest_on_empty_prefix_is_no_result() {
        let repo = InMemoryTileRepository::new();
        repo.create_index("idx", "img:empty").await.unwrap();
        let err = repo
            .nearest("img:empty", ColorVector::new(0.0, 0.0, 0.0), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, VtrError::NoResult));
    }
}
