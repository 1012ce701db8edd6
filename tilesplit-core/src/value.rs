//! Packed tile-set values.
//!
//! Every occupied map slot holds one 64-bit value describing the set of
//! tiles an element belongs to:
//!
//! ```text
//!     6                 4                   3    22
//!     3                 8                   2    98      2       0
//!     XXXX XXXX XXXX XXXX YYYY YYYY YYYY YYYY 1ENN uuuu nnnn .. nnnn
//!
//!     X - base tile x        1 - always set; distinguishes occupied slots
//!     Y - base tile y        E - tile set lives in the overflow store
//!     N - east/south neighbour flags
//!     u - reserved           n - inline bitmap, or overflow index when E
//! ```
//!
//! The inline bitmap covers a 5×5 window centred on the base tile, scanned
//! row-major with the centre skipped:
//!
//! ```text
//!     -2    0  1  2  3  4
//!     -1    5  6  7  8  9
//!      0   10 11  T 12 13
//!      1   14 15 16 17 18
//!      2   19 20 21 22 23
//! ```
//!
//! A value of zero is never a valid encoding; it marks an empty slot.

use std::collections::BTreeSet;

use crate::tile::{TileCoord, MAX_TILE_NUMBER};

const TILE_X_SHIFT: u32 = 48;
const TILE_Y_SHIFT: u32 = 32;
const ONE_BIT: u64 = 1 << 31;
const EXTENDED_BIT: u64 = 1 << 30;
const NEIGHBOUR_SHIFT: u32 = 28;
const NEIGHBOUR_MASK: u64 = 0b11 << NEIGHBOUR_SHIFT;
const PAYLOAD_MASK: u64 = 0x00FF_FFFF;
const INLINE_BITS: u32 = 24;

/// East/south neighbour flags for a tile near an enlarged tile edge.
///
/// Only four combinations occur: none, east, south, and south+east.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct Neighbours(u8);

impl Neighbours {
    pub const NONE: Self = Self(0);
    pub const EAST: Self = Self(1);
    pub const SOUTH: Self = Self(2);
    pub const SOUTH_EAST: Self = Self(3);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 3)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn east(self) -> bool {
        self.0 & 1 != 0
    }

    pub const fn south(self) -> bool {
        self.0 & 2 != 0
    }

    #[must_use]
    pub const fn with_east(self) -> Self {
        Self(self.0 | 1)
    }

    #[must_use]
    pub const fn with_south(self) -> Self {
        Self(self.0 | 2)
    }
}

/// A packed tile-set value.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TileValue(u64);

impl TileValue {
    /// Encode a base tile with its neighbour flags.
    pub fn new(coord: TileCoord, neighbours: Neighbours) -> Self {
        Self(
            u64::from(coord.x()) << TILE_X_SHIFT
                | u64::from(coord.y()) << TILE_Y_SHIFT
                | u64::from(neighbours.bits()) << NEIGHBOUR_SHIFT
                | ONE_BIT,
        )
    }

    /// Encode a bare tile with no neighbours.
    pub fn from_coord(coord: TileCoord) -> Self {
        Self::new(coord, Neighbours::NONE)
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub fn x(self) -> u32 {
        ((self.0 >> TILE_X_SHIFT) & u64::from(MAX_TILE_NUMBER)) as u32
    }

    pub fn y(self) -> u32 {
        ((self.0 >> TILE_Y_SHIFT) & u64::from(MAX_TILE_NUMBER)) as u32
    }

    pub fn coord(self) -> TileCoord {
        TileCoord::new(self.x(), self.y())
    }

    pub fn neighbours(self) -> Neighbours {
        Neighbours::from_bits(((self.0 & NEIGHBOUR_MASK) >> NEIGHBOUR_SHIFT) as u8)
    }

    /// Whether the tile set lives in the overflow store.
    pub const fn is_extended(self) -> bool {
        self.0 & EXTENDED_BIT != 0
    }

    /// Index into the overflow store. Only meaningful when extended.
    pub const fn overflow_index(self) -> u32 {
        (self.0 & PAYLOAD_MASK) as u32
    }

    /// Switch the value to extended mode, replacing the inline payload with
    /// the given overflow index.
    #[must_use]
    pub fn with_overflow_index(self, index: u32) -> Self {
        debug_assert!(u64::from(index) <= PAYLOAD_MASK);
        Self((self.0 & !PAYLOAD_MASK) | EXTENDED_BIT | u64::from(index))
    }

    /// The inline bit position for a tile at `(dx, dy)` relative to the
    /// base, or `None` when the offset leaves the 5×5 window. The centre is
    /// the base tile itself and has no bit.
    pub(crate) fn inline_bit(dx: i64, dy: i64) -> Option<u32> {
        if dx == 0 && dy == 0 {
            return None;
        }
        if !(-2..=2).contains(&dx) || !(-2..=2).contains(&dy) {
            return None;
        }
        let ordinal = (dy + 2) * 5 + (dx + 2);
        let bit = if ordinal > 12 { ordinal - 1 } else { ordinal };
        Some(bit as u32)
    }

    #[must_use]
    pub(crate) fn set_inline_bit(self, bit: u32) -> Self {
        debug_assert!(bit < INLINE_BITS);
        Self(self.0 | 1 << bit)
    }

    /// Insert the base tile and any flagged neighbours into `out`.
    pub fn base_tiles(self, out: &mut BTreeSet<TileCoord>) {
        let coord = self.coord();
        let neighbours = self.neighbours();
        out.insert(coord);
        if neighbours.east() {
            out.insert(coord.east());
        }
        if neighbours.south() {
            out.insert(coord.south());
        }
        if neighbours.east() && neighbours.south() {
            out.insert(coord.south_east());
        }
    }

    /// Insert every tile flagged in the inline bitmap into `out`.
    pub fn inline_tiles(self, out: &mut BTreeSet<TileCoord>) {
        let base_x = i64::from(self.x());
        let base_y = i64::from(self.y());
        for bit in 0..INLINE_BITS {
            if self.0 >> bit & 1 == 0 {
                continue;
            }
            let ordinal = i64::from(if bit >= 12 { bit + 1 } else { bit });
            let dx = ordinal % 5 - 2;
            let dy = ordinal / 5 - 2;
            out.insert(TileCoord::new((base_x + dx) as u32, (base_y + dy) as u32));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TileCoord::new(1245, 99), Neighbours::NONE)]
    #[case(TileCoord::new(0, 0), Neighbours::SOUTH_EAST)]
    #[case(TileCoord::new(MAX_TILE_NUMBER - 1, 7), Neighbours::EAST)]
    fn encodes_base_fields(#[case] coord: TileCoord, #[case] neighbours: Neighbours) {
        let value = TileValue::new(coord, neighbours);
        assert_eq!(value.coord(), coord);
        assert_eq!(value.neighbours(), neighbours);
        assert!(!value.is_extended());
        assert_ne!(value.raw(), 0, "occupied values are never zero");
    }

    #[rstest]
    fn base_tiles_follow_neighbour_flags() {
        let mut out = BTreeSet::new();
        TileValue::new(TileCoord::new(5, 5), Neighbours::SOUTH_EAST).base_tiles(&mut out);
        let expected: BTreeSet<_> = [
            TileCoord::new(5, 5),
            TileCoord::new(6, 5),
            TileCoord::new(5, 6),
            TileCoord::new(6, 6),
        ]
        .into_iter()
        .collect();
        assert_eq!(out, expected);
    }

    #[rstest]
    // Corners of the window.
    #[case(-2, -2, Some(0))]
    #[case(2, -2, Some(4))]
    #[case(-2, 2, Some(19))]
    #[case(2, 2, Some(23))]
    // Cells adjacent to the skipped centre.
    #[case(-2, 0, Some(10))]
    #[case(-1, 0, Some(11))]
    #[case(1, 0, Some(12))]
    #[case(0, 1, Some(16))]
    // The centre and out-of-window offsets have no bit.
    #[case(0, 0, None)]
    #[case(3, 0, None)]
    #[case(0, -3, None)]
    fn inline_bit_mapping(#[case] dx: i64, #[case] dy: i64, #[case] expected: Option<u32>) {
        assert_eq!(TileValue::inline_bit(dx, dy), expected);
    }

    #[rstest]
    fn inline_bits_round_trip() {
        let base = TileCoord::new(100, 200);
        let mut value = TileValue::from_coord(base);
        for (dx, dy) in [(-2i64, -2i64), (1, 0), (0, 2), (2, 2)] {
            let bit = TileValue::inline_bit(dx, dy).expect("offset fits the window");
            value = value.set_inline_bit(bit);
        }

        let mut out = BTreeSet::new();
        value.inline_tiles(&mut out);
        let expected: BTreeSet<_> = [
            TileCoord::new(98, 198),
            TileCoord::new(101, 200),
            TileCoord::new(100, 202),
            TileCoord::new(102, 202),
        ]
        .into_iter()
        .collect();
        assert_eq!(out, expected);
    }

    #[rstest]
    fn overflow_index_replaces_payload() {
        let value = TileValue::from_coord(TileCoord::new(9, 9)).set_inline_bit(3);
        let extended = value.with_overflow_index(0xABCDE);
        assert!(extended.is_extended());
        assert_eq!(extended.overflow_index(), 0xABCDE);
        assert_eq!(extended.coord(), value.coord(), "base tile survives the switch");
    }
}
