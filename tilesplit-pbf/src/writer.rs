//! Streaming per-tile PBF writer.
//!
//! One writer owns one tile's output. Construction emits the `OSMHeader`
//! blob carrying the tile's bound box; elements are then buffered and
//! flushed as zlib-compressed `OSMData` blobs. Within a tile every element
//! is written exactly once, in the order it was handed in, so the output
//! mirrors the input's nodes→ways→relations order.

use std::collections::HashMap;
use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use prost::Message;
use thiserror::Error;

use crate::model::{Bounds, MemberKind, Metadata, Node, Relation, Way};
use crate::proto;

const WRITING_PROGRAM: &str = "tilesplit";

/// Coordinate resolution in nanodegrees.
const GRANULARITY: i32 = 100;
/// Timestamp resolution in milliseconds.
const DATE_GRANULARITY: i32 = 1000;

/// Elements buffered before a block is flushed.
const BLOCK_CAPACITY: usize = 8_000;

/// Errors raised while encoding tile output.
#[derive(Debug, Error)]
pub enum PbfError {
    /// Writing to the underlying sink failed.
    #[error("failed to write PBF output")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Encoder for a single tile's element stream.
pub struct TileWriter<W: Write> {
    out: W,
    write_metadata: bool,
    nodes: Vec<Node>,
    ways: Vec<Way>,
    relations: Vec<Relation>,
}

impl<W: Write> TileWriter<W> {
    /// Start a tile stream by writing the header blob with `bounds`.
    pub fn new(out: W, bounds: &Bounds, write_metadata: bool) -> Result<Self, PbfError> {
        let mut writer = Self {
            out,
            write_metadata,
            nodes: Vec::new(),
            ways: Vec::new(),
            relations: Vec::new(),
        };
        writer.write_header(bounds)?;
        Ok(writer)
    }

    pub fn node(&mut self, node: &Node) -> Result<(), PbfError> {
        self.nodes.push(node.clone());
        self.maybe_flush()
    }

    pub fn way(&mut self, way: &Way) -> Result<(), PbfError> {
        self.ways.push(way.clone());
        self.maybe_flush()
    }

    pub fn relation(&mut self, relation: &Relation) -> Result<(), PbfError> {
        self.relations.push(relation.clone());
        self.maybe_flush()
    }

    /// Flush any buffered elements and return the underlying sink.
    pub fn finish(mut self) -> Result<W, PbfError> {
        if self.buffered() > 0 {
            self.flush_block()?;
        }
        self.out.flush()?;
        Ok(self.out)
    }

    fn buffered(&self) -> usize {
        self.nodes.len() + self.ways.len() + self.relations.len()
    }

    fn maybe_flush(&mut self) -> Result<(), PbfError> {
        if self.buffered() >= BLOCK_CAPACITY {
            self.flush_block()?;
        }
        Ok(())
    }

    fn write_header(&mut self, bounds: &Bounds) -> Result<(), PbfError> {
        let header = proto::HeaderBlock {
            bbox: Some(proto::HeaderBBox {
                left: nanodegrees(bounds.left),
                right: nanodegrees(bounds.right),
                top: nanodegrees(bounds.top),
                bottom: nanodegrees(bounds.bottom),
            }),
            required_features: vec!["OsmSchema-V0.6".to_owned(), "DenseNodes".to_owned()],
            optional_features: Vec::new(),
            writingprogram: Some(WRITING_PROGRAM.to_owned()),
        };
        self.write_blob("OSMHeader", header.encode_to_vec())
    }

    fn flush_block(&mut self) -> Result<(), PbfError> {
        let nodes = std::mem::take(&mut self.nodes);
        let ways = std::mem::take(&mut self.ways);
        let relations = std::mem::take(&mut self.relations);

        let mut strings = StringTableBuilder::new();
        let mut groups = Vec::new();
        if !nodes.is_empty() {
            groups.push(proto::PrimitiveGroup {
                dense: Some(self.encode_dense(&nodes, &mut strings)),
                ways: Vec::new(),
                relations: Vec::new(),
            });
        }
        if !ways.is_empty() {
            groups.push(proto::PrimitiveGroup {
                dense: None,
                ways: ways.iter().map(|way| self.encode_way(way, &mut strings)).collect(),
                relations: Vec::new(),
            });
        }
        if !relations.is_empty() {
            groups.push(proto::PrimitiveGroup {
                dense: None,
                ways: Vec::new(),
                relations: relations
                    .iter()
                    .map(|relation| self.encode_relation(relation, &mut strings))
                    .collect(),
            });
        }

        let block = proto::PrimitiveBlock {
            stringtable: Some(strings.build()),
            primitivegroup: groups,
            granularity: Some(GRANULARITY),
            date_granularity: Some(DATE_GRANULARITY),
            lat_offset: Some(0),
            lon_offset: Some(0),
        };
        self.write_blob("OSMData", block.encode_to_vec())
    }

    fn encode_dense(&self, nodes: &[Node], strings: &mut StringTableBuilder) -> proto::DenseNodes {
        let mut dense = proto::DenseNodes {
            id: Vec::with_capacity(nodes.len()),
            denseinfo: None,
            lat: Vec::with_capacity(nodes.len()),
            lon: Vec::with_capacity(nodes.len()),
            keys_vals: Vec::new(),
        };

        let tagged = nodes.iter().any(|node| !node.tags.is_empty());
        let mut prev_id = 0i64;
        let mut prev_lat = 0i64;
        let mut prev_lon = 0i64;
        for node in nodes {
            let lat = coordinate_steps(node.lat);
            let lon = coordinate_steps(node.lon);
            dense.id.push(node.id - prev_id);
            dense.lat.push(lat - prev_lat);
            dense.lon.push(lon - prev_lon);
            prev_id = node.id;
            prev_lat = lat;
            prev_lon = lon;

            if tagged {
                for (key, value) in &node.tags {
                    dense.keys_vals.push(strings.intern(key) as i32);
                    dense.keys_vals.push(strings.intern(value) as i32);
                }
                dense.keys_vals.push(0);
            }
        }

        if self.write_metadata {
            let mut info = proto::DenseInfo {
                version: Vec::with_capacity(nodes.len()),
                timestamp: Vec::with_capacity(nodes.len()),
                changeset: vec![0; nodes.len()],
                uid: vec![0; nodes.len()],
                user_sid: vec![0; nodes.len()],
            };
            let mut prev_timestamp = 0i64;
            for node in nodes {
                let timestamp = timestamp_steps(&node.meta);
                info.version.push(node.meta.version.unwrap_or(0));
                info.timestamp.push(timestamp - prev_timestamp);
                prev_timestamp = timestamp;
            }
            dense.denseinfo = Some(info);
        }

        dense
    }

    fn encode_way(&self, way: &Way, strings: &mut StringTableBuilder) -> proto::Way {
        let mut refs = Vec::with_capacity(way.refs.len());
        let mut prev = 0i64;
        for &node_id in &way.refs {
            refs.push(node_id - prev);
            prev = node_id;
        }
        let (keys, vals) = strings.intern_tags(&way.tags);
        proto::Way {
            id: way.id,
            keys,
            vals,
            info: self.encode_info(&way.meta),
            refs,
        }
    }

    fn encode_relation(
        &self,
        relation: &Relation,
        strings: &mut StringTableBuilder,
    ) -> proto::Relation {
        let mut memids = Vec::with_capacity(relation.members.len());
        let mut roles_sid = Vec::with_capacity(relation.members.len());
        let mut types = Vec::with_capacity(relation.members.len());
        let mut prev = 0i64;
        for member in &relation.members {
            memids.push(member.id - prev);
            prev = member.id;
            roles_sid.push(strings.intern(&member.role) as i32);
            types.push(match member.kind {
                MemberKind::Node => proto::MemberType::Node,
                MemberKind::Way => proto::MemberType::Way,
                MemberKind::Relation => proto::MemberType::Relation,
            } as i32);
        }
        let (keys, vals) = strings.intern_tags(&relation.tags);
        proto::Relation {
            id: relation.id,
            keys,
            vals,
            info: self.encode_info(&relation.meta),
            roles_sid,
            memids,
            types,
        }
    }

    fn encode_info(&self, meta: &Metadata) -> Option<proto::Info> {
        if !self.write_metadata {
            return None;
        }
        Some(proto::Info {
            version: meta.version,
            timestamp: meta.timestamp_ms.map(|ms| ms / i64::from(DATE_GRANULARITY)),
            changeset: None,
            uid: None,
            user_sid: None,
        })
    }

    fn write_blob(&mut self, blob_type: &str, payload: Vec<u8>) -> Result<(), PbfError> {
        let raw_size = payload.len() as i32;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload)?;
        let compressed = encoder.finish()?;

        let blob = proto::Blob {
            raw: None,
            raw_size: Some(raw_size),
            zlib_data: Some(compressed),
        };
        let blob_bytes = blob.encode_to_vec();
        let header = proto::BlobHeader {
            r#type: blob_type.to_owned(),
            indexdata: None,
            datasize: blob_bytes.len() as i32,
        };
        let header_bytes = header.encode_to_vec();

        self.out.write_all(&(header_bytes.len() as u32).to_be_bytes())?;
        self.out.write_all(&header_bytes)?;
        self.out.write_all(&blob_bytes)?;
        Ok(())
    }
}

fn nanodegrees(degrees: f64) -> i64 {
    (degrees * 1e9).round() as i64
}

/// Degrees to coordinate steps at the block granularity.
fn coordinate_steps(degrees: f64) -> i64 {
    (degrees * 1e9 / f64::from(GRANULARITY)).round() as i64
}

fn timestamp_steps(meta: &Metadata) -> i64 {
    meta.timestamp_ms.unwrap_or(0) / i64::from(DATE_GRANULARITY)
}

/// Per-block string table; index 0 stays the empty string.
struct StringTableBuilder {
    indexes: HashMap<String, u32>,
    strings: Vec<Vec<u8>>,
}

impl StringTableBuilder {
    fn new() -> Self {
        Self {
            indexes: HashMap::new(),
            strings: vec![Vec::new()],
        }
    }

    fn intern(&mut self, value: &str) -> u32 {
        if value.is_empty() {
            return 0;
        }
        if let Some(&index) = self.indexes.get(value) {
            return index;
        }
        let index = self.strings.len() as u32;
        self.strings.push(value.as_bytes().to_vec());
        self.indexes.insert(value.to_owned(), index);
        index
    }

    fn intern_tags(&mut self, tags: &[(String, String)]) -> (Vec<u32>, Vec<u32>) {
        let mut keys = Vec::with_capacity(tags.len());
        let mut vals = Vec::with_capacity(tags.len());
        for (key, value) in tags {
            keys.push(self.intern(key));
            vals.push(self.intern(value));
        }
        (keys, vals)
    }

    fn build(self) -> proto::StringTable {
        proto::StringTable { s: self.strings }
    }
}
