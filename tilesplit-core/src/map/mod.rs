//! ID→tile maps.
//!
//! Three of these maps (nodes, ways, relations) carry the whole element→tile
//! assignment for a planet-scale input, so the value side is a single packed
//! 64-bit slot per key (see [`TileValue`]) with an overflow arena for
//! elements spanning more tiles than the inline bitmap can express.
//!
//! Two backends share the value encoding: an open-addressed hash table for
//! unknown id ranges and a direct-indexed array keyed by the id itself when
//! the maximum id is known up front.

mod array;
mod hash;
mod overflow;
mod slot;

pub use array::ArrayTileMap;
pub use hash::HashTileMap;
pub use overflow::OverflowStore;

use std::collections::BTreeSet;

use thiserror::Error;

use crate::tile::TileCoord;
use crate::value::{Neighbours, TileValue};

/// Errors raised by the map backends.
#[derive(Debug, Error)]
pub enum MapError {
    /// The open-addressed backend reached its growth ceiling.
    #[error("tile map with {capacity} slots cannot grow further")]
    CapacityExhausted {
        /// Capacity at the time growth failed.
        capacity: u64,
    },
    /// The 24-bit overflow index range is used up.
    #[error("overflow store is saturated at {entries} entries")]
    OverflowSaturated {
        /// Entries allocated when the store refused to grow.
        entries: usize,
    },
    /// A key does not fit the backend's supported range.
    #[error("key {key} exceeds the supported maximum id {max_key}")]
    KeyOutOfRange {
        /// Offending key.
        key: u64,
        /// Largest key the backend accepts.
        max_key: u64,
    },
}

/// An element-id→tile-set map.
///
/// All operations run on a single logical owner; implementations are not
/// required to be thread-safe.
pub trait TileMap {
    /// Insert a fresh entry for `key` with its base tile and neighbour
    /// flags. The behaviour is unspecified when `key` is already present.
    fn put(&mut self, key: u64, coord: TileCoord, neighbours: Neighbours) -> Result<(), MapError>;

    /// The packed value for `key`, or `None` when absent.
    fn get(&self, key: u64) -> Option<TileValue>;

    /// Union the given tile values, including their neighbour expansions,
    /// into the entry for `key`. Updating an absent key is a no-op.
    fn update(&mut self, key: u64, tiles: &BTreeSet<TileValue>) -> Result<(), MapError>;

    /// [`TileMap::update`] for already-encoded tile ids carrying no
    /// neighbour flags.
    fn update_coords(&mut self, key: u64, tiles: &[TileCoord]) -> Result<(), MapError> {
        let values = tiles.iter().copied().map(TileValue::from_coord).collect();
        self.update(key, &values)
    }

    /// Every tile `key` belongs to (base, neighbours and accumulated
    /// extras), or `None` when absent.
    fn all_tiles(&self, key: u64) -> Option<Vec<TileCoord>>;

    /// All occupied keys, in unspecified order.
    fn keys(&self) -> Box<dyn Iterator<Item = u64> + '_>;

    /// Fraction of occupied slots. Advisory.
    fn load(&self) -> f64;

    /// Ratio of probe misses to hits; zero for direct-indexed backends.
    /// Advisory.
    fn miss_hit_ratio(&self) -> f64;

    /// Number of slots the map currently provides.
    fn capacity(&self) -> u64;
}
