//! The write pass and its sinks.
//!
//! For every zoom level with scheduled tiles, the input is streamed again
//! and each element is fanned out to the encoders of the tiles its id maps
//! to. The number of simultaneously open encoders is bounded; the stream is
//! re-read until the tile cursor drains. Tiles land either as individual
//! PBF files or as rows of one MBTiles database.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use log::info;
use osmpbf::{Element, ElementReader};
use rusqlite::{params, Connection};
use thiserror::Error;
use tilesplit_core::{TileBitSet, TileCoord, TileGrid};
use tilesplit_pbf::{Bounds, PbfError, TileWriter};

use crate::input::{self, OsmElement};
use crate::splitter::{ElementKind, PassError, Splitter};

const MBTILES_VERSION: &str = "0.2.0";
const OSM_ATTRIBUTION: &str = "OpenStreetMap Contributors ODbL 1.0";
const TILE_MIME_TYPE: &str = "application/vnd.openstreetmap.data+pbf";
const PBF_EXT: &str = ".pbf";

/// Errors raised while writing tiles.
#[derive(Debug, Error)]
pub enum OutputError {
    /// A tile file's directory could not be created.
    #[error("failed to create directory {path:?}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A tile file could not be created.
    #[error("failed to create tile file {path:?}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Encoding a tile failed.
    #[error(transparent)]
    Encode(#[from] PbfError),
    /// The MBTiles database could not be opened.
    #[error("failed to open MBTiles database at {path:?}")]
    OpenDatabase {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    /// A statement against the MBTiles database failed.
    #[error("failed to {operation} in the MBTiles database")]
    Database {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    /// Re-reading the input failed.
    #[error(transparent)]
    Read(#[from] PassError),
}

/// Parameters of the write pass.
#[derive(Debug, Clone)]
pub struct WriteOptions<'a> {
    /// Tile filename pattern or MBTiles path.
    pub output: &'a str,
    pub write_metadata: bool,
    pub mbtiles: bool,
    /// Upper bound on simultaneously open encoders.
    pub max_files: usize,
}

impl Splitter {
    /// Third pass: stream the input per zoom level and fan elements out to
    /// their tiles.
    pub fn write(&self, path: &Path, options: &WriteOptions<'_>) -> Result<(), OutputError> {
        let mut sink = if options.mbtiles {
            Some(MbtilesSink::create(Path::new(options.output))?)
        } else {
            None
        };

        let base_zoom = self.grid.zoom();
        let mut plan: Vec<(u8, &TileBitSet)> = self
            .coalesced
            .iter()
            .map(|(zoom, tiles)| (*zoom, tiles))
            .collect();
        plan.push((base_zoom, &self.modified));
        plan.sort_by_key(|(zoom, _)| *zoom);

        let min_zoom = plan
            .iter()
            .filter(|(_, tiles)| !tiles.is_empty())
            .map(|(zoom, _)| *zoom)
            .min()
            .unwrap_or(base_zoom);

        for (zoom, tiles) in plan {
            if tiles.is_empty() {
                continue;
            }
            info!("processing {} tiles for zoom {zoom}", tiles.cardinality());
            self.write_zoom(path, zoom, tiles, options, sink.as_mut())?;
        }

        if let Some(sink) = sink {
            sink.finish(&self.mbtiles_metadata(min_zoom, base_zoom, options.output))?;
        }
        Ok(())
    }

    fn write_zoom(
        &self,
        path: &Path,
        zoom: u8,
        tiles: &TileBitSet,
        options: &WriteOptions<'_>,
        mut sink: Option<&mut MbtilesSink>,
    ) -> Result<(), OutputError> {
        let grid = TileGrid::new(zoom);
        let mut cursor = Some(TileCoord::from_raw(0));

        // One batch per iteration, bounded by the open-encoder quota; every
        // tile is opened exactly once across all batches.
        while let Some(start) = cursor.take() {
            let mut writers: HashMap<u32, TileTarget> = HashMap::new();
            let mut next = Some(start);
            while let Some(probe) = next {
                let Some(tile) = tiles.next_set_bit(probe) else {
                    break;
                };
                let target = self.open_target(&grid, tile, zoom, options)?;
                writers.insert(tile.raw(), target);
                next = tile
                    .raw()
                    .checked_add(1)
                    .map(TileCoord::from_raw);
                if writers.len() >= options.max_files {
                    cursor = next;
                    break;
                }
            }
            if writers.is_empty() {
                break;
            }

            self.stream_batch(path, zoom, tiles, &mut writers)?;

            for (raw, target) in writers {
                let blob = target.finish()?;
                if let (Some(sink), Some(bytes)) = (sink.as_deref_mut(), blob) {
                    let tile = TileCoord::from_raw(raw);
                    let tms_row = (1u32 << zoom) - 1 - tile.y();
                    sink.add_tile(zoom, tile.x(), tms_row, &bytes)?;
                }
            }
        }
        Ok(())
    }

    fn open_target(
        &self,
        grid: &TileGrid,
        tile: TileCoord,
        zoom: u8,
        options: &WriteOptions<'_>,
    ) -> Result<TileTarget, OutputError> {
        let rect = grid.bounds(tile, self.border);
        let bounds = Bounds {
            left: rect.min().x,
            right: rect.max().x,
            top: rect.max().y,
            bottom: rect.min().y,
        };
        if options.mbtiles {
            let writer = TileWriter::new(Vec::new(), &bounds, options.write_metadata)?;
            return Ok(TileTarget::Memory(writer));
        }

        let path = tile_path(options.output, zoom, tile);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| OutputError::CreateDirectory {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        let file = File::create(&path).map_err(|source| OutputError::CreateFile {
            path: path.clone(),
            source,
        })?;
        let writer = TileWriter::new(BufWriter::new(file), &bounds, options.write_metadata)?;
        Ok(TileTarget::File(writer))
    }

    fn stream_batch(
        &self,
        path: &Path,
        zoom: u8,
        tiles: &TileBitSet,
        writers: &mut HashMap<u32, TileTarget>,
    ) -> Result<(), OutputError> {
        let reader = ElementReader::from_path(path).map_err(|source| PassError::Open {
            source,
            path: path.to_path_buf(),
        })?;

        let mut failure: Option<OutputError> = None;
        reader
            .for_each(|element| {
                if failure.is_some() {
                    return;
                }
                let (kind, id) = match &element {
                    Element::Node(node) => (ElementKind::Node, node.id()),
                    Element::DenseNode(node) => (ElementKind::Node, node.id()),
                    Element::Way(way) => (ElementKind::Way, way.id()),
                    Element::Relation(relation) => (ElementKind::Relation, relation.id()),
                };
                let targets = self.batch_targets(kind, id, zoom, tiles, writers);
                if targets.is_empty() {
                    return;
                }
                let owned = input::convert(element);
                for raw in targets {
                    let Some(writer) = writers.get_mut(&raw) else {
                        continue;
                    };
                    let written = match &owned {
                        OsmElement::Node(node) => writer.node(node),
                        OsmElement::Way(way) => writer.way(way),
                        OsmElement::Relation(relation) => writer.relation(relation),
                    };
                    if let Err(err) = written {
                        failure = Some(err.into());
                        return;
                    }
                }
            })
            .map_err(|source| PassError::Decode {
                source,
                path: path.to_path_buf(),
            })?;
        failure.map_or(Ok(()), Err)
    }

    /// The open encoders of this batch that should receive the element.
    fn batch_targets(
        &self,
        kind: ElementKind,
        id: i64,
        zoom: u8,
        tiles: &TileBitSet,
        writers: &HashMap<u32, TileTarget>,
    ) -> Vec<u32> {
        let Some(found) = self.tiles_for(kind, id) else {
            return Vec::new();
        };
        let base_zoom = self.grid.zoom();
        let mut mapped = BTreeSet::new();
        for tile in found {
            let (coord, tile_zoom) = match self.zoom_map.get(&tile.raw()) {
                Some(&new_zoom) => (tile.parent(base_zoom - new_zoom), new_zoom),
                None => (tile, base_zoom),
            };
            if tile_zoom == zoom && tiles.contains(coord) && writers.contains_key(&coord.raw()) {
                mapped.insert(coord.raw());
            }
        }
        mapped.into_iter().collect()
    }

    fn mbtiles_metadata(
        &self,
        min_zoom: u8,
        max_zoom: u8,
        output: &str,
    ) -> Vec<(&'static str, String)> {
        let name = Path::new(output)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| output.to_owned());
        let bounds = match self.bounds() {
            Some(rect) => format!(
                "{},{},{},{}",
                rect.min().x,
                rect.min().y,
                rect.max().x,
                rect.max().y
            ),
            None => "-180,-85,180,85".to_owned(),
        };
        vec![
            ("name", name),
            ("type", "baselayer".to_owned()),
            ("version", MBTILES_VERSION.to_owned()),
            ("format", TILE_MIME_TYPE.to_owned()),
            ("minzoom", min_zoom.to_string()),
            ("maxzoom", max_zoom.to_string()),
            ("bounds", bounds),
            ("latest_date", (self.latest_ms() / 1000).to_string()),
            ("attribution", OSM_ATTRIBUTION.to_owned()),
        ]
    }
}

/// One open tile encoder, backed by a file or an in-memory blob.
enum TileTarget {
    File(TileWriter<BufWriter<File>>),
    Memory(TileWriter<Vec<u8>>),
}

impl TileTarget {
    fn node(&mut self, node: &tilesplit_pbf::Node) -> Result<(), PbfError> {
        match self {
            Self::File(writer) => writer.node(node),
            Self::Memory(writer) => writer.node(node),
        }
    }

    fn way(&mut self, way: &tilesplit_pbf::Way) -> Result<(), PbfError> {
        match self {
            Self::File(writer) => writer.way(way),
            Self::Memory(writer) => writer.way(way),
        }
    }

    fn relation(&mut self, relation: &tilesplit_pbf::Relation) -> Result<(), PbfError> {
        match self {
            Self::File(writer) => writer.relation(relation),
            Self::Memory(writer) => writer.relation(relation),
        }
    }

    /// Close the encoder; memory-backed targets return their blob.
    fn finish(self) -> Result<Option<Vec<u8>>, PbfError> {
        match self {
            Self::File(writer) => {
                writer.finish()?;
                Ok(None)
            }
            Self::Memory(writer) => Ok(Some(writer.finish()?)),
        }
    }
}

/// Resolve a tile's output path from the base pattern.
fn tile_path(base: &str, zoom: u8, tile: TileCoord) -> PathBuf {
    if base.contains("%x") && base.contains("%y") {
        let mut path = base
            .replace("%x", &tile.x().to_string())
            .replace("%y", &tile.y().to_string())
            .replace("%z", &zoom.to_string());
        if !path.ends_with(PBF_EXT) {
            path.push_str(".osm.pbf");
        }
        return PathBuf::from(path);
    }
    PathBuf::from(format!("{base}{zoom}/{}_{}.osm.pbf", tile.x(), tile.y()))
}

/// MBTiles database accumulating tile rows inside one transaction.
struct MbtilesSink {
    connection: Connection,
}

impl MbtilesSink {
    fn create(path: &Path) -> Result<Self, OutputError> {
        // Failed runs leave partial output behind; a rerun starts clean.
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
        let connection = Connection::open(path).map_err(|source| OutputError::OpenDatabase {
            path: path.to_path_buf(),
            source,
        })?;
        connection
            .execute_batch(
                "PRAGMA synchronous = OFF;
                 CREATE TABLE IF NOT EXISTS metadata (name TEXT, value TEXT);
                 CREATE TABLE IF NOT EXISTS tiles (
                     zoom_level INTEGER,
                     tile_column INTEGER,
                     tile_row INTEGER,
                     tile_data BLOB
                 );
                 CREATE UNIQUE INDEX IF NOT EXISTS tile_index
                     ON tiles (zoom_level, tile_column, tile_row);
                 BEGIN;",
            )
            .map_err(|source| OutputError::Database {
                operation: "create the schema",
                source,
            })?;
        Ok(Self { connection })
    }

    fn add_tile(&self, zoom: u8, column: u32, tms_row: u32, blob: &[u8]) -> Result<(), OutputError> {
        self.connection
            .execute(
                "INSERT OR REPLACE INTO tiles (zoom_level, tile_column, tile_row, tile_data)
                 VALUES (?1, ?2, ?3, ?4)",
                params![zoom, column, tms_row, blob],
            )
            .map(|_| ())
            .map_err(|source| OutputError::Database {
                operation: "insert a tile",
                source,
            })
    }

    fn finish(self, metadata: &[(&'static str, String)]) -> Result<(), OutputError> {
        for (name, value) in metadata {
            self.connection
                .execute(
                    "INSERT INTO metadata (name, value) VALUES (?1, ?2)",
                    params![name, value],
                )
                .map(|_| ())
                .map_err(|source| OutputError::Database {
                    operation: "write metadata",
                    source,
                })?;
        }
        self.connection
            .execute_batch("COMMIT;")
            .map_err(|source| OutputError::Database {
                operation: "commit the transaction",
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn placeholder_patterns_substitute_coordinates() {
        let path = tile_path("tiles/%z/%x-%y.osm.pbf", 13, TileCoord::new(4290, 2868));
        assert_eq!(path, PathBuf::from("tiles/13/4290-2868.osm.pbf"));
    }

    #[rstest]
    fn placeholder_patterns_get_an_extension_when_missing() {
        let path = tile_path("tiles/%x_%y", 13, TileCoord::new(1, 2));
        assert_eq!(path, PathBuf::from("tiles/1_2.osm.pbf"));
    }

    #[rstest]
    fn legacy_pbf_extension_is_kept() {
        let path = tile_path("tiles/%x_%y.pbf", 13, TileCoord::new(1, 2));
        assert_eq!(path, PathBuf::from("tiles/1_2.pbf"));
    }

    #[rstest]
    fn plain_bases_use_the_zoom_directory_layout() {
        let path = tile_path("out/", 13, TileCoord::new(4290, 2868));
        assert_eq!(path, PathBuf::from("out/13/4290_2868.osm.pbf"));
    }
}
