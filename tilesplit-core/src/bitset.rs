//! The sparse set of tiles scheduled for emission.

use roaring::RoaringBitmap;

use crate::tile::TileCoord;

/// A very sparse set of packed 32-bit tile ids.
///
/// Iteration is in ascending packed order over the full id range.
#[derive(Debug, Clone, Default)]
pub struct TileBitSet {
    bits: RoaringBitmap,
}

impl TileBitSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, tile: TileCoord) {
        self.bits.insert(tile.raw());
    }

    pub fn clear(&mut self, tile: TileCoord) {
        self.bits.remove(tile.raw());
    }

    #[must_use]
    pub fn contains(&self, tile: TileCoord) -> bool {
        self.bits.contains(tile.raw())
    }

    #[must_use]
    pub fn cardinality(&self) -> u64 {
        self.bits.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// The smallest member at or after `from`, in packed order.
    #[must_use]
    pub fn next_set_bit(&self, from: TileCoord) -> Option<TileCoord> {
        let skipped = match from.raw().checked_sub(1) {
            Some(prev) => self.bits.rank(prev),
            None => 0,
        };
        u32::try_from(skipped)
            .ok()
            .and_then(|n| self.bits.select(n))
            .map(TileCoord::from_raw)
    }

    pub fn iter(&self) -> impl Iterator<Item = TileCoord> + '_ {
        self.bits.iter().map(TileCoord::from_raw)
    }
}
