use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use deadpool_redis::{Config, Pool, Runtime};
use image::{ImageFormat, RgbImage};
use tracing::{debug, warn};

use crate::mosaic::color::ColorVector;
use crate::mosaic::owner::{counter_key, tile_key};
use crate::mosaic::vtr::error::VtrError;
use crate::mosaic::vtr::reply::{self, Value};
use crate::mosaic::vtr::TileRepository;

/// Production `TileRepository`, backed by Redis (with the RediSearch
/// module providing the `average_color_index` HNSW index). Connections are
/// pooled with `deadpool-redis` so concurrent TIP workers don't serialize
/// on a single connection.
pub struct RedisTileRepository {
    pool: Arc<Pool>,
}

impl RedisTileRepository {
    pub fn new(redis_url: &str) -> Result<Self, VtrError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|_| VtrError::StorageUnavailable)?;
        Ok(RedisTileRepository {
            pool: Arc::new(pool),
        })
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, VtrError> {
        self.pool.get().await.map_err(|_| VtrError::StorageUnavailable)
    }

    /// Round-trips a `PING` so the startup connectivity check in each
    /// binary's `main` actually observes a live server rather than just a
    /// successfully-constructed (but still lazy) connection pool.
    pub async fn ping(&self) -> Result<(), VtrError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|_| VtrError::StorageUnavailable)
    }
}

/// Escapes characters RediSearch's query parser treats as special inside a
/// TAG filter (`{...}`) so an owner prefix like `img:10.0.0.1` matches
/// literally instead of being parsed as syntax.
fn escape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(
            c,
            ':' | '.' | '-' | '@' | '{' | '}' | '(' | ')' | '[' | ']' | ' ' | ','
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Translate a raw RESP reply into the store-agnostic abstract value.
fn from_redis_value(value: &redis::Value) -> Value {
    match value {
        redis::Value::Nil => Value::Nil,
        redis::Value::Int(i) => Value::Int(*i),
        redis::Value::BulkString(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => Value::String(s.to_string()),
            Err(_) => Value::Bytes(bytes.clone()),
        },
        redis::Value::SimpleString(s) => Value::String(s.clone()),
        redis::Value::Okay => Value::String("OK".to_string()),
        redis::Value::Array(items) | redis::Value::Set(items) => {
            Value::List(items.iter().map(from_redis_value).collect())
        }
        redis::Value::Map(pairs) => Value::Map(
            pairs
                .iter()
                .map(|(k, v)| (from_redis_value(k), from_redis_value(v)))
                .collect(),
        ),
        redis::Value::Double(d) => Value::String(d.to_string()),
        redis::Value::Boolean(b) => Value::Int(i64::from(*b)),
        redis::Value::BigNumber(n) => Value::String(n.to_string()),
        redis::Value::VerbatimString { text, .. } => Value::String(text.clone()),
        redis::Value::Push { data, .. } => {
            Value::List(data.iter().map(from_redis_value).collect())
        }
        redis::Value::ServerError(e) => Value::String(e.to_string()),
    }
}

#[async_trait]
impl TileRepository for RedisTileRepository {
    /// `prefix` here is the index-wide `PREFIX` clause (e.g. `img:`), not an
    /// owner's own prefix: the index is shared by every owner, per the data
    /// model's "one index per deployment" rule, and a query-time `prefix`
    /// TAG field (set on every tile record by `insert`) is what scopes a
    /// `nearest` call to one caller's tiles.
    async fn create_index(&self, name: &str, prefix: &str) -> Result<(), VtrError> {
        let mut conn = self.conn().await?;
        let result: Result<(), redis::RedisError> = redis::cmd("FT.CREATE")
            .arg(name)
            .arg("ON")
            .arg("HASH")
            .arg("PREFIX")
            .arg(1)
            .arg(prefix)
            .arg("SCHEMA")
            .arg("prefix")
            .arg("TAG")
            .arg("average_color")
            .arg("VECTOR")
            .arg("HNSW")
            .arg(6)
            .arg("TYPE")
            .arg("FLOAT64")
            .arg("DIM")
            .arg(3)
            .arg("DISTANCE_METRIC")
            .arg("L2")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().to_lowercase().contains("already exists") => {
                debug!(index = name, "index already exists, treating as success");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "FT.CREATE failed");
                Err(VtrError::StorageUnavailable)
            }
        }
    }

    async fn insert(&self, owner_id: &str, prefix: &str, image: &RgbImage) -> Result<u64, VtrError> {
        let average_color = ColorVector::of_region(image, (0, 0, image.width(), image.height()));

        let mut jpeg_bytes: Vec<u8> = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut jpeg_bytes), ImageFormat::Jpeg)
            .map_err(|_| VtrError::EncodeFailed)?;
        let b64 = STANDARD.encode(&jpeg_bytes);

        let mut conn = self.conn().await?;
        let id: u64 = redis::cmd("INCR")
            .arg(counter_key(owner_id))
            .query_async(&mut conn)
            .await
            .map_err(|_| VtrError::StorageUnavailable)?;

        let key = tile_key(prefix, id);
        redis::pipe()
            .atomic()
            .cmd("HSET")
            .arg(&key)
            .arg("img")
            .arg(&b64)
            .arg("average_color")
            .arg(average_color.to_le_bytes().to_vec())
            .arg("prefix")
            .arg(prefix)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|_| VtrError::StorageUnavailable)?;

        Ok(id)
    }

    async fn nearest(
        &self,
        prefix: &str,
        target: ColorVector,
        k: usize,
    ) -> Result<Vec<RgbImage>, VtrError> {
        let mut conn = self.conn().await?;
        let query = format!(
            "(@prefix:{{{}}}) => [KNN {k} @average_color $vec AS score]",
            escape_tag_value(prefix)
        );
        let reply: redis::Value = redis::cmd("FT.SEARCH")
            .arg("average_color_index")
            .arg(&query)
            .arg("PARAMS")
            .arg(2)
            .arg("vec")
            .arg(target.to_le_bytes().to_vec())
            .arg("SORTBY")
            .arg("score")
            .arg("DIALECT")
            .arg(2)
            .arg("RETURN")
            .arg(2)
            .arg("img")
            .arg("average_color")
            .query_async(&mut conn)
            .await
            .map_err(|_| VtrError::StorageUnavailable)?;

        let abstract_reply = from_redis_value(&reply);
        let images_b64 = reply::extract_tile_images(&abstract_reply)?;

        images_b64
            .into_iter()
            .map(|b64| {
                let bytes = STANDARD.decode(&b64).map_err(|_| VtrError::DecodeFailed)?;
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

    #[test]
    fn escape_tag_value_guards_owner_prefix_special_chars() {
        assert_eq!(escape_tag_value("img:10.0.0.1"), "img\\:10\\.0\\.0\\.1");
        assert_eq!(escape_tag_value("plain"), "plain");
    }

    #[test]
    fn from_redis_value_maps_nested_map_and_array() {
        let value = redis::Value::Map(vec![(
            redis::Value::SimpleString("results".to_string()),
            redis::Value::Array(vec![redis::Value::BulkString(b"aaa".to_vec())]),
        )]);
        let abstract_value = from_redis_value(&value);
        let Value::Map(pairs) = abstract_value else {
            panic!("expected a map");
        };
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, Value::String("results".to_string()));
        assert_eq!(
            pairs[0].1,
            Value::List(vec![Value::String("aaa".to_string())])
        );
    }

    #[test]
    fn from_redis_value_maps_nil() {
        assert_eq!(from_redis_value(&redis::Value::Nil), Value::Nil);
    }
}
