//! Command-line surface.

use std::path::PathBuf;

use clap::Parser;

/// Split a large OSM extract into referentially complete per-tile subsets.
#[derive(Debug, Parser)]
#[command(
    name = "tilesplit",
    about = "Split an OSM PBF extract into per-tile subsets",
    version
)]
pub struct Cli {
    /// A file in OSM PBF format.
    #[arg(short, long, value_name = "path")]
    pub input: PathBuf,

    /// MBTiles file name, or the base name of the written tiles; the name
    /// may contain %x, %y and %z placeholders.
    #[arg(short, long, value_name = "path")]
    pub output: String,

    /// Zoom level to cut tiles at.
    #[arg(short, long, default_value_t = 13, value_parser = clap::value_parser!(u8).range(0..=16))]
    pub zoom: u8,

    /// Enlarge tiles by this share of the tile size ([0-1]) to get a border
    /// around each tile.
    #[arg(short, long, default_value_t = 0.0)]
    pub border: f64,

    /// Only keep tiles that intersect or lie within the polygon in this
    /// file.
    #[arg(short, long, value_name = "path")]
    pub polygon: Option<PathBuf>,

    /// File holding the timestamp tiles are compared against for
    /// incremental runs; rewritten with the latest change after the split.
    #[arg(short, long, value_name = "path")]
    pub date: Option<PathBuf>,

    /// Store version and timestamp metadata in the tiles; aborts when the
    /// input carries none.
    #[arg(short, long)]
    pub metadata: bool,

    /// Store complete data for all relations.
    #[arg(short, long)]
    pub complete: bool,

    /// Store complete data for multipolygon relations.
    #[arg(short = 'C', long = "complete-areas")]
    pub complete_areas: bool,

    /// Write one MBTiles database instead of individual tile files.
    #[arg(short = 'M', long)]
    pub mbtiles: bool,

    /// Maximum number of tiles open at the same time.
    #[arg(short = 'f', long = "maxfiles", value_name = "count")]
    pub max_files: Option<usize>,

    /// Initial node, way and relation map sizes as n,w,r.
    #[arg(short, long, value_name = "n,w,r", value_parser = parse_triple)]
    pub size: Option<MapSizes>,

    /// Maximum node, way and relation ids as n,w,r; selects the
    /// direct-indexed maps.
    #[arg(long = "max-ids", value_name = "n,w,r", value_parser = parse_triple)]
    pub max_ids: Option<MapSizes>,

    /// Merge sparse tiles into lower zoom levels until a tile holds at
    /// least this many nodes.
    #[arg(short = 'O', long, value_name = "nodes")]
    pub optimize: Option<u32>,

    /// Verbose output while processing.
    #[arg(short, long)]
    pub verbose: bool,

    /// Report timing information.
    #[arg(short, long)]
    pub timing: bool,
}

/// Per-map sizing triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapSizes {
    pub nodes: u64,
    pub ways: u64,
    pub relations: u64,
}

impl MapSizes {
    /// Sized for a regional extract; a planet run wants `--size`.
    pub const DEFAULT: Self = Self {
        nodes: 60_000_000,
        ways: 10_000_000,
        relations: 2_500_000,
    };
}

fn parse_triple(value: &str) -> Result<MapSizes, String> {
    let parts: Vec<&str> = value.split(',').collect();
    let [nodes, ways, relations] = parts.as_slice() else {
        return Err("expected three comma-separated numbers, e.g. 60000000,10000000,2500000".into());
    };
    let parse = |part: &str| -> Result<u64, String> {
        part.trim()
            .parse()
            .map_err(|_| format!("invalid number {part:?}"))
    };
    Ok(MapSizes {
        nodes: parse(nodes)?,
        ways: parse(ways)?,
        relations: parse(relations)?,
    })
}
