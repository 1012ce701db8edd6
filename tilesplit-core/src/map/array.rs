//! Direct-indexed ID→tile map.
//!
//! Uses the element id itself as the index, which beats hashing when ids are
//! dense and the maximum id is known. Planet-scale node ids need more slots
//! than a single allocation comfortably provides, so the value array is
//! split into fixed-size slabs.

use std::collections::BTreeSet;

use crate::map::{slot, MapError, OverflowStore, TileMap};
use crate::tile::TileCoord;
use crate::value::{Neighbours, TileValue};

const SHARD_LEN: u64 = 1 << 30;

pub struct ArrayTileMap {
    shards: Vec<Vec<u64>>,
    max_key: u64,
    occupied: u64,
    overflow: OverflowStore,
}

impl ArrayTileMap {
    /// Create a map accepting keys in `0..=max_key`.
    pub fn new(max_key: u64) -> Self {
        let mut shards = Vec::new();
        let mut remaining = max_key + 1;
        while remaining > 0 {
            let len = remaining.min(SHARD_LEN);
            shards.push(vec![0u64; len as usize]);
            remaining -= len;
        }
        Self {
            shards,
            max_key,
            occupied: 0,
            overflow: OverflowStore::new(),
        }
    }

    fn slot(&self, key: u64) -> u64 {
        self.shards[(key / SHARD_LEN) as usize][(key % SHARD_LEN) as usize]
    }

    fn slot_mut(&mut self, key: u64) -> &mut u64 {
        &mut self.shards[(key / SHARD_LEN) as usize][(key % SHARD_LEN) as usize]
    }
}

impl TileMap for ArrayTileMap {
    fn put(&mut self, key: u64, coord: TileCoord, neighbours: Neighbours) -> Result<(), MapError> {
        if key > self.max_key {
            return Err(MapError::KeyOutOfRange {
                key,
                max_key: self.max_key,
            });
        }
        if self.slot(key) == 0 {
            self.occupied += 1;
        }
        *self.slot_mut(key) = TileValue::new(coord, neighbours).raw();
        Ok(())
    }

    fn get(&self, key: u64) -> Option<TileValue> {
        if key > self.max_key {
            return None;
        }
        let raw = self.slot(key);
        (raw != 0).then(|| TileValue::from_raw(raw))
    }

    fn update(&mut self, key: u64, tiles: &BTreeSet<TileValue>) -> Result<(), MapError> {
        let Some(value) = self.get(key) else {
            return Ok(());
        };
        let updated = slot::merge(value, tiles, &mut self.overflow)?;
        *self.slot_mut(key) = updated.raw();
        Ok(())
    }

    fn all_tiles(&self, key: u64) -> Option<Vec<TileCoord>> {
        self.get(key).map(|value| slot::expand(value, &self.overflow))
    }

    fn keys(&self) -> Box<dyn Iterator<Item = u64> + '_> {
        Box::new((0..=self.max_key).filter(|&key| self.slot(key) != 0))
    }

    fn load(&self) -> f64 {
        self.occupied as f64 / (self.max_key + 1) as f64
    }

    fn miss_hit_ratio(&self) -> f64 {
        0.0
    }

    fn capacity(&self) -> u64 {
        self.max_key + 1
    }
}
