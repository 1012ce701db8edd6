//! Open-addressed ID→tile map.
//!
//! Keys and values live in two parallel arrays; a slot is empty exactly when
//! its value word is zero. The top bit of a key word marks buckets where a
//! collision chain has started, so lookups of never-chained keys stop after
//! a single probe. The table doubles when the fill factor is exceeded.

use std::cell::Cell;
use std::collections::BTreeSet;

use log::info;

use crate::map::{slot, MapError, OverflowStore, TileMap};
use crate::tile::TileCoord;
use crate::value::{Neighbours, TileValue};

const CHAIN_MARKER: u64 = 1 << 63;
const KEY_MASK: u64 = !CHAIN_MARKER;

const MIN_CAPACITY: u64 = 16;
const DEFAULT_FILL_FACTOR: f64 = 0.75;
/// Doubling past this point fails instead of allocating.
const MAX_CAPACITY: u64 = 1 << 36;

pub struct HashTileMap {
    keys: Vec<u64>,
    values: Vec<u64>,
    size: u64,
    threshold: u64,
    fill_factor: f64,
    hits: Cell<u64>,
    misses: Cell<u64>,
    overflow: OverflowStore,
}

impl HashTileMap {
    /// Create a map with at least `capacity` slots (rounded up to a power of
    /// two) and the default fill factor.
    pub fn new(capacity: u64) -> Self {
        Self::with_fill_factor(capacity, DEFAULT_FILL_FACTOR)
    }

    pub fn with_fill_factor(capacity: u64, fill_factor: f64) -> Self {
        let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();
        Self {
            keys: vec![0; capacity as usize],
            values: vec![0; capacity as usize],
            size: 0,
            threshold: (capacity as f64 * fill_factor) as u64,
            fill_factor,
            hits: Cell::new(0),
            misses: Cell::new(0),
            overflow: OverflowStore::new(),
        }
    }

    fn mask(&self) -> usize {
        self.values.len() - 1
    }

    fn hash(key: u64) -> u64 {
        1_664_525u64
            .wrapping_mul(key)
            .wrapping_add(1_013_904_223)
            & KEY_MASK
    }

    /// Find the bucket holding `key`, if any.
    fn bucket_of(&self, key: u64) -> Option<usize> {
        let mut bucket = Self::hash(key) as usize & self.mask();
        let mut first = true;
        loop {
            if self.values[bucket] != 0 {
                if self.keys[bucket] & KEY_MASK == key {
                    self.hits.set(self.hits.get() + 1);
                    return Some(bucket);
                }
            } else {
                return None;
            }
            if first && self.keys[bucket] & CHAIN_MARKER == 0 {
                // No chain ever started here, so the key cannot be stored
                // further along.
                return None;
            }
            first = false;
            self.misses.set(self.misses.get() + 1);
            bucket = (bucket + 1) & self.mask();
        }
    }

    fn insert(&mut self, key: u64, value: u64) -> Result<(), MapError> {
        if self.size >= self.threshold {
            self.grow()?;
        }
        let mut bucket = Self::hash(key) as usize & self.mask();
        let mut first = true;
        loop {
            if self.values[bucket] == 0 {
                self.keys[bucket] = key;
                self.values[bucket] = value;
                self.size += 1;
                return Ok(());
            }
            if first {
                self.keys[bucket] |= CHAIN_MARKER;
                first = false;
            }
            bucket = (bucket + 1) & self.mask();
        }
    }

    fn grow(&mut self) -> Result<(), MapError> {
        let capacity = self.values.len() as u64;
        let new_capacity = capacity * 2;
        if new_capacity > MAX_CAPACITY {
            return Err(MapError::CapacityExhausted { capacity });
        }
        info!(
            "growing tile map from {capacity} to {new_capacity} slots ({} occupied)",
            self.size
        );
        let old_keys = std::mem::replace(&mut self.keys, vec![0; new_capacity as usize]);
        let old_values = std::mem::replace(&mut self.values, vec![0; new_capacity as usize]);
        self.threshold = (new_capacity as f64 * self.fill_factor) as u64;
        self.size = 0;
        for (key, value) in old_keys.into_iter().zip(old_values) {
            if value != 0 {
                self.insert(key & KEY_MASK, value)?;
            }
        }
        Ok(())
    }
}

impl TileMap for HashTileMap {
    fn put(&mut self, key: u64, coord: TileCoord, neighbours: Neighbours) -> Result<(), MapError> {
        if key & CHAIN_MARKER != 0 {
            return Err(MapError::KeyOutOfRange {
                key,
                max_key: KEY_MASK,
            });
        }
        self.insert(key, TileValue::new(coord, neighbours).raw())
    }

    fn get(&self, key: u64) -> Option<TileValue> {
        self.bucket_of(key)
            .map(|bucket| TileValue::from_raw(self.values[bucket]))
    }

    fn update(&mut self, key: u64, tiles: &BTreeSet<TileValue>) -> Result<(), MapError> {
        let Some(bucket) = self.bucket_of(key) else {
            return Ok(());
        };
        let value = TileValue::from_raw(self.values[bucket]);
        let updated = slot::merge(value, tiles, &mut self.overflow)?;
        self.values[bucket] = updated.raw();
        Ok(())
    }

    fn all_tiles(&self, key: u64) -> Option<Vec<TileCoord>> {
        self.bucket_of(key)
            .map(|bucket| slot::expand(TileValue::from_raw(self.values[bucket]), &self.overflow))
    }

    fn keys(&self) -> Box<dyn Iterator<Item = u64> + '_> {
        Box::new(
            self.values
                .iter()
                .zip(&self.keys)
                .filter(|(value, _)| **value != 0)
                .map(|(_, key)| key & KEY_MASK),
        )
    }

    fn load(&self) -> f64 {
        self.size as f64 / self.values.len() as f64
    }

    fn miss_hit_ratio(&self) -> f64 {
        let hits = self.hits.get();
        if hits == 0 {
            return 0.0;
        }
        self.misses.get() as f64 / hits as f64
    }

    fn capacity(&self) -> u64 {
        self.values.len() as u64
    }
}
