//! Core data structures for assigning OpenStreetMap elements to tiles.
//!
//! Responsibilities:
//! - Pack tile coordinates and per-element tile sets into compact integers.
//! - Map element ids to tile sets at planet scale (hash and direct-indexed
//!   backends sharing one value encoding, with an overflow arena for large
//!   sets).
//! - Track the sparse set of tiles scheduled for emission.
//! - Provide slippy-map tile arithmetic and interior hole filling.
//!
//! Boundaries:
//! - No I/O; decoding and encoding of OSM data live in the sibling crates.
//! - Single logical owner per map; the maps are not thread-safe.

#![forbid(unsafe_code)]

pub mod bitset;
pub mod fill;
pub mod grid;
pub mod map;
pub mod tile;
pub mod value;

pub use bitset::TileBitSet;
pub use fill::{fill_holes, MIN_HOLE_FILL_TILES};
pub use grid::TileGrid;
pub use map::{ArrayTileMap, HashTileMap, MapError, OverflowStore, TileMap};
pub use tile::{TileCoord, MAX_TILE_NUMBER, MAX_ZOOM};
pub use value::{Neighbours, TileValue};
