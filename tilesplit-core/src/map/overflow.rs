//! Append-only arena of expanded tile sets.
//!
//! Slots whose tile set no longer fits the inline bitmap reference an entry
//! here by index. An entry always holds the complete, deduplicated tile set
//! for its element, so reads need no further expansion. Indexes are never
//! reused; the range is bounded by the 24-bit payload of a packed value.

use crate::map::MapError;
use crate::tile::TileCoord;

const MAX_ENTRIES: usize = 1 << 24;

#[derive(Debug, Default)]
pub struct OverflowStore {
    sets: Vec<Vec<TileCoord>>,
}

impl OverflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries allocated so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Store a new tile set and return its index.
    pub fn push(&mut self, mut tiles: Vec<TileCoord>) -> Result<u32, MapError> {
        if self.sets.len() >= MAX_ENTRIES {
            return Err(MapError::OverflowSaturated {
                entries: self.sets.len(),
            });
        }
        tiles.sort_unstable();
        tiles.dedup();
        let index = self.sets.len() as u32;
        self.sets.push(tiles);
        Ok(index)
    }

    /// The tile set stored at `index`.
    ///
    /// Indexes come from [`OverflowStore::push`] on the same store; anything
    /// else is a logic error.
    #[must_use]
    pub fn get(&self, index: u32) -> &[TileCoord] {
        &self.sets[index as usize]
    }

    /// Union `tiles` into the entry at `index`.
    pub fn merge<I>(&mut self, index: u32, tiles: I)
    where
        I: IntoIterator<Item = TileCoord>,
    {
        let set = &mut self.sets[index as usize];
        set.extend(tiles);
        set.sort_unstable();
        set.dedup();
    }
}
