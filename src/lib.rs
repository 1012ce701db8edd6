//! Facade crate for the tilesplit tile splitter.
//!
//! Re-exports the core data structures so downstream users do not need to
//! depend on the member crates individually. The command-line pipeline lives
//! in `tilesplit-cli`.

#![forbid(unsafe_code)]

pub use tilesplit_core::{
    fill_holes, ArrayTileMap, HashTileMap, MapError, Neighbours, TileBitSet, TileCoord, TileGrid,
    TileMap, TileValue, MAX_TILE_NUMBER, MAX_ZOOM, MIN_HOLE_FILL_TILES,
};
