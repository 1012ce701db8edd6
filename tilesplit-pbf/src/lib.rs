//! OSM PBF encoding for per-tile output.
//!
//! Responsibilities:
//! - Own the element model handed from the decoder to the per-tile writers.
//! - Encode the OSM PBF wire format (blob framing, primitive blocks, dense
//!   nodes, string tables) for one tile's element stream.
//!
//! Boundaries:
//! - Decoding stays with the `osmpbf` crate; this crate only writes.
//! - No tile arithmetic; callers decide which elements reach which writer.

#![forbid(unsafe_code)]

pub mod model;
mod proto;
pub mod writer;

pub use model::{Bounds, Member, MemberKind, Metadata, Node, Relation, Way};
pub use writer::{PbfError, TileWriter};
