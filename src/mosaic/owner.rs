//! Owner-scoped key helpers. `img:<owner-id>` scopes all of one requester's
//! tiles; the owner-id is treated opaquely (typically the remote host
//! address of the originating request).

use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OwnerPrefix(String);

impl OwnerPrefix {
    /// The key-prefix root shared by every owner's tiles. Used as the
    /// index-wide `PREFIX` clause when creating `average_color_index`, since
    /// the index is one-per-deployment rather than one-per-owner.
    pub const GLOBAL_ROOT: &'static str = "img:";

    pub fn new(owner_id: &str) -> Self {
        OwnerPrefix(format!("img:{owner_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The per-owner monotonic counter key.
pub fn counter_key(owner_id: &str) -> String {
    format!("{owner_id}:counter")
}

/// The per-tile key for a given post-increment counter value, scoped under
/// `prefix` (e.g. `img:<owner-id>`).
pub fn tile_key(prefix: &str, id: u64) -> String {
    format!("{prefix}:{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_combines_img_tag_with_owner_id() {
        let p = OwnerPrefix::new("10.0.0.1");
        assert_eq!(p.as_str(), "img:10.0.0.1");
        assert_eq!(tile_key(p.as_str(), 7), "img:10.0.0.1:7");
    }

    #[test]
    fn counter_key_is_scoped_to_the_raw_owner_id_not_the_prefix() {
        assert_eq!(counter_key("10.0.0.1"), "10.0.0.1:counter");
    }
}
