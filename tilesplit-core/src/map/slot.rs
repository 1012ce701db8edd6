//! Value merge logic shared by the map backends.

use std::collections::BTreeSet;

use crate::map::{MapError, OverflowStore};
use crate::tile::TileCoord;
use crate::value::TileValue;

/// Expand `value` into the full tile set it represents.
pub(super) fn expand(value: TileValue, store: &OverflowStore) -> Vec<TileCoord> {
    if value.is_extended() {
        return store.get(value.overflow_index()).to_vec();
    }
    let mut tiles = BTreeSet::new();
    value.base_tiles(&mut tiles);
    value.inline_tiles(&mut tiles);
    tiles.into_iter().collect()
}

/// Fold `tiles` into `value`, returning the updated value.
///
/// Each incoming value contributes its base tile plus flagged neighbours.
/// Additions within the 5×5 inline window set bitmap bits; anything further
/// out moves the whole set, current contents included, to the overflow
/// store. A value that is already extended stays extended and its entry only
/// grows.
pub(super) fn merge(
    value: TileValue,
    tiles: &BTreeSet<TileValue>,
    store: &mut OverflowStore,
) -> Result<TileValue, MapError> {
    let mut incoming: BTreeSet<TileCoord> = BTreeSet::new();
    for tile in tiles {
        tile.base_tiles(&mut incoming);
    }

    if value.is_extended() {
        store.merge(value.overflow_index(), incoming);
        return Ok(value);
    }

    let base_x = i64::from(value.x());
    let base_y = i64::from(value.y());
    let mut updated = value;
    for coord in &incoming {
        let dx = i64::from(coord.x()) - base_x;
        let dy = i64::from(coord.y()) - base_y;
        if dx == 0 && dy == 0 {
            continue;
        }
        match TileValue::inline_bit(dx, dy) {
            Some(bit) => updated = updated.set_inline_bit(bit),
            None => {
                let mut full = incoming.clone();
                full.extend(expand(value, store));
                let index = store.push(full.into_iter().collect())?;
                return Ok(value.with_overflow_index(index));
            }
        }
    }
    Ok(updated)
}
