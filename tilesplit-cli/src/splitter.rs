//! Element→tile assignment.
//!
//! The first pass consumes the input in its canonical order (nodes, then
//! ways, then relations) and builds the three id→tile maps plus the set of
//! modified tiles. Relations referencing relations that appear later in the
//! stream are parked on a worklist and retried until the worklist stops
//! shrinking. An optional second pass propagates relation tile sets down to
//! the nodes of member ways, which the first pass cannot do without holding
//! every way's node list in memory.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use geo::{Coord, Rect};
use log::{info, warn};
use osmpbf::{Element, ElementReader};
use thiserror::Error;
use tilesplit_core::{
    fill_holes, ArrayTileMap, HashTileMap, MapError, Neighbours, TileBitSet, TileCoord, TileGrid,
    TileMap, TileValue, MIN_HOLE_FILL_TILES,
};
use tilesplit_pbf::{MemberKind, Metadata, Relation};

use crate::cli::MapSizes;
use crate::input::{self, InputError};

const PROGRESS_INTERVAL: u64 = 10_000_000;

/// Errors raised while reading the input and building the maps.
#[derive(Debug, Error)]
pub enum PassError {
    /// The input file could not be opened.
    #[error("failed to open OSM PBF file at {path:?}")]
    Open {
        #[source]
        source: osmpbf::Error,
        path: PathBuf,
    },
    /// The decoder reported a malformed block.
    #[error("failed to decode OSM PBF data at {path:?}")]
    Decode {
        #[source]
        source: osmpbf::Error,
        path: PathBuf,
    },
    /// An element failed adaptation (for example missing metadata).
    #[error(transparent)]
    Input(#[from] InputError),
    /// A map backend gave up.
    #[error(transparent)]
    Map(#[from] MapError),
}

/// Construction parameters for a [`Splitter`].
#[derive(Debug, Clone)]
pub struct SplitterOptions {
    pub zoom: u8,
    /// Tile enlargement as a share of the tile size, in `[0, 1]`.
    pub border: f64,
    /// Elements strictly newer than this mark their tiles modified; `None`
    /// marks everything.
    pub cutoff_ms: Option<i64>,
    pub complete_relations: bool,
    pub complete_areas: bool,
    /// Fail on elements without version/timestamp metadata.
    pub check_metadata: bool,
    pub map_sizes: MapSizes,
    /// When set, keys are bounded and the direct-indexed backend is used.
    pub max_ids: Option<MapSizes>,
}

/// The element-to-tile assignment engine.
pub struct Splitter {
    pub(crate) grid: TileGrid,
    pub(crate) border: f64,
    cutoff_ms: Option<i64>,
    latest_ms: i64,
    complete_relations: bool,
    complete_areas: bool,
    check_metadata: bool,

    pub(crate) nmap: Box<dyn TileMap>,
    pub(crate) wmap: Box<dyn TileMap>,
    pub(crate) rmap: Box<dyn TileMap>,

    /// Tiles scheduled for emission at the base zoom.
    pub(crate) modified: TileBitSet,
    /// Re-homed tile sets per lower zoom, filled by the optimisation pass.
    pub(crate) coalesced: BTreeMap<u8, TileBitSet>,
    /// New zoom per coalesced tile, keyed by the packed base-zoom tile id.
    pub(crate) zoom_map: HashMap<u32, u8>,

    /// Way ids whose nodes must learn their relations' tiles in pass two.
    relation_member_ways: HashSet<u64>,
    /// Relations with unresolved relation members, retried after the pass.
    deferred: Vec<Relation>,
    deferred_ids: HashSet<i64>,

    /// Union of all observed node coordinates.
    bounds: Option<Rect<f64>>,

    node_count: u64,
    way_count: u64,
    relation_count: u64,
}

impl Splitter {
    pub fn new(options: SplitterOptions) -> Self {
        let (nmap, wmap, rmap) = match options.max_ids {
            Some(ids) => (
                Box::new(ArrayTileMap::new(ids.nodes)) as Box<dyn TileMap>,
                Box::new(ArrayTileMap::new(ids.ways)) as Box<dyn TileMap>,
                Box::new(ArrayTileMap::new(ids.relations)) as Box<dyn TileMap>,
            ),
            None => (
                Box::new(HashTileMap::new(options.map_sizes.nodes)) as Box<dyn TileMap>,
                Box::new(HashTileMap::new(options.map_sizes.ways)) as Box<dyn TileMap>,
                Box::new(HashTileMap::new(options.map_sizes.relations)) as Box<dyn TileMap>,
            ),
        };
        Self {
            grid: TileGrid::new(options.zoom),
            border: options.border,
            cutoff_ms: options.cutoff_ms,
            latest_ms: 0,
            complete_relations: options.complete_relations,
            complete_areas: options.complete_areas,
            check_metadata: options.check_metadata,
            nmap,
            wmap,
            rmap,
            modified: TileBitSet::new(),
            coalesced: BTreeMap::new(),
            zoom_map: HashMap::new(),
            relation_member_ways: HashSet::new(),
            deferred: Vec::new(),
            deferred_ids: HashSet::new(),
            bounds: None,
            node_count: 0,
            way_count: 0,
            relation_count: 0,
        }
    }

    /// Milliseconds of the newest element timestamp seen so far.
    #[must_use]
    pub fn latest_ms(&self) -> i64 {
        self.latest_ms
    }

    /// Number of tiles currently scheduled at the base zoom.
    #[must_use]
    pub fn modified_tiles(&self) -> u64 {
        self.modified.cardinality()
    }

    /// Union of all observed node coordinates, if any.
    #[must_use]
    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.bounds
    }

    pub fn log_diagnostics(&self) {
        info!(
            "map load: nodes {:.3}, ways {:.3}, relations {:.3}",
            self.nmap.load(),
            self.wmap.load(),
            self.rmap.load()
        );
        info!(
            "miss/hit ratio: nodes {:.3}, ways {:.3}, relations {:.3}",
            self.nmap.miss_hit_ratio(),
            self.wmap.miss_hit_ratio(),
            self.rmap.miss_hit_ratio()
        );
    }

    /// First pass: build the three maps and the modified-tile set.
    pub fn assign(&mut self, path: &Path) -> Result<(), PassError> {
        info!("initial pass over {path:?} started");
        let reader = ElementReader::from_path(path).map_err(|source| PassError::Open {
            source,
            path: path.to_path_buf(),
        })?;

        let mut failure: Option<PassError> = None;
        reader
            .for_each(|element| {
                if failure.is_some() {
                    return;
                }
                if let Err(err) = self.handle(element) {
                    failure = Some(err);
                }
            })
            .map_err(|source| PassError::Decode {
                source,
                path: path.to_path_buf(),
            })?;
        if let Some(err) = failure {
            return Err(err);
        }

        info!(
            "read {} nodes, {} ways, {} relations",
            self.node_count, self.way_count, self.relation_count
        );
        self.resolve_deferred()
    }

    /// Second pass: propagate relation tile sets to the nodes of member
    /// ways. A no-op unless a complete mode registered member ways.
    pub fn complete_member_ways(&mut self, path: &Path) -> Result<(), PassError> {
        if self.relation_member_ways.is_empty() {
            return Ok(());
        }
        info!(
            "second pass for {} relation member ways",
            self.relation_member_ways.len()
        );
        let reader = ElementReader::from_path(path).map_err(|source| PassError::Open {
            source,
            path: path.to_path_buf(),
        })?;

        let mut failure: Option<PassError> = None;
        reader
            .for_each(|element| {
                if failure.is_some() {
                    return;
                }
                let Element::Way(way) = element else { return };
                let Ok(key) = u64::try_from(way.id()) else {
                    return;
                };
                if !self.relation_member_ways.contains(&key) {
                    return;
                }
                let Some(tiles) = self.wmap.all_tiles(key) else {
                    return;
                };
                for node_id in way.refs() {
                    let Ok(node_key) = u64::try_from(node_id) else {
                        continue;
                    };
                    if let Err(err) = self.nmap.update_coords(node_key, &tiles) {
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

    fn handle(&mut self, element: Element<'_>) -> Result<(), PassError> {
        match element {
            Element::Node(node) => {
                let meta = input::info_meta(&node.info());
                self.add_node(node.id(), node.lon(), node.lat(), &meta)
            }
            Element::DenseNode(node) => {
                let meta = input::dense_meta(&node);
                self.add_node(node.id(), node.lon(), node.lat(), &meta)
            }
            Element::Way(way) => {
                let meta = input::info_meta(&way.info());
                let refs: Vec<i64> = way.refs().collect();
                self.add_way(way.id(), &refs, &meta)
            }
            Element::Relation(relation) => {
                let relation = input::relation_model(&relation);
                self.relation_count += 1;
                self.progress("relations", self.relation_count);
                self.check_meta("relation", relation.id, &relation.meta)?;
                self.add_relation(&relation)
            }
        }
    }

    fn add_node(&mut self, id: i64, lon: f64, lat: f64, meta: &Metadata) -> Result<(), PassError> {
        self.node_count += 1;
        self.progress("nodes", self.node_count);
        self.check_meta("node", id, meta)?;
        let Some(key) = input::element_key("node", id) else {
            return Ok(());
        };

        let (coord, neighbours) = self.grid.locate(lon, lat, self.border);
        if self.is_modified(meta) {
            self.mark_modified(TileValue::new(coord, neighbours));
        }
        self.observe_timestamp(meta);
        self.include_coordinate(lon, lat);

        self.nmap.put(key, coord, neighbours)?;
        Ok(())
    }

    fn add_way(&mut self, id: i64, refs: &[i64], meta: &Metadata) -> Result<(), PassError> {
        self.way_count += 1;
        self.progress("ways", self.way_count);
        self.check_meta("way", id, meta)?;
        let Some(key) = input::element_key("way", id) else {
            return Ok(());
        };
        self.observe_timestamp(meta);

        // Resolve every way node; one miss drops the whole way.
        let mut tiles = Vec::with_capacity(refs.len());
        for &node_id in refs {
            let resolved = u64::try_from(node_id)
                .ok()
                .and_then(|node_key| self.nmap.get(node_key));
            match resolved {
                Some(value) => tiles.push(value),
                None => {
                    info!("way {id} references missing node {node_id}");
                    return Ok(());
                }
            }
        }
        let Some(first) = tiles.first().copied() else {
            info!("way {id} has no nodes");
            return Ok(());
        };

        let mut tile_set: BTreeSet<TileValue> = tiles.iter().copied().collect();
        if self.is_modified(meta) {
            for value in &tile_set {
                self.mark_modified(*value);
            }
        }
        if tile_set.len() >= MIN_HOLE_FILL_TILES {
            let modified_set = &mut self.modified;
            fill_holes(&mut tile_set, |coord| modified_set.set(coord));
        }

        // The first way node's tile anchors the way.
        self.wmap.put(key, first.coord(), Neighbours::NONE)?;
        self.wmap.update(key, &tile_set)?;

        for &node_id in refs {
            let Ok(node_key) = u64::try_from(node_id) else {
                continue;
            };
            self.nmap.update(node_key, &tile_set)?;
        }
        Ok(())
    }

    fn add_relation(&mut self, relation: &Relation) -> Result<(), PassError> {
        let Some(key) = input::element_key("relation", relation.id) else {
            return Ok(());
        };
        self.observe_timestamp(&relation.meta);
        let modified = self.is_modified(&relation.meta);

        let mut tile_set: BTreeSet<TileValue> = BTreeSet::new();
        let mut missing = MissingMembers::default();
        let mut defer = false;
        for member in &relation.members {
            let Ok(member_key) = u64::try_from(member.id) else {
                continue;
            };
            match member.kind {
                MemberKind::Node => match self.nmap.get(member_key) {
                    Some(value) => {
                        if modified {
                            self.mark_modified(value);
                        }
                        tile_set.insert(value);
                    }
                    None => missing.node(relation.id),
                },
                MemberKind::Way => match self.wmap.all_tiles(member_key) {
                    Some(tiles) => {
                        if modified {
                            for tile in &tiles {
                                self.modified.set(*tile);
                            }
                        }
                        tile_set.extend(tiles.into_iter().map(TileValue::from_coord));
                    }
                    None => missing.way(relation.id),
                },
                MemberKind::Relation => match self.rmap.all_tiles(member_key) {
                    Some(tiles) => {
                        if modified {
                            for tile in &tiles {
                                self.modified.set(*tile);
                            }
                        }
                        tile_set.extend(tiles.into_iter().map(TileValue::from_coord));
                    }
                    None => {
                        missing.relation(relation.id);
                        defer = true;
                    }
                },
            }
        }

        if defer {
            self.defer(relation);
        }
        let Some(first) = tile_set.iter().next().copied() else {
            if !defer {
                warn!("ignoring relation {} with no members in any tile", relation.id);
            }
            return Ok(());
        };

        if tile_set.len() >= MIN_HOLE_FILL_TILES {
            let modified_set = &mut self.modified;
            fill_holes(&mut tile_set, |coord| modified_set.set(coord));
        }

        // Retried relations already own a slot; only fold the new tiles in.
        if self.rmap.get(key).is_none() {
            self.rmap.put(key, first.coord(), Neighbours::NONE)?;
        }
        self.rmap.update(key, &tile_set)?;

        if self.complete_relations
            || (self.complete_areas && relation.has_tag("type", "multipolygon"))
        {
            for member in &relation.members {
                let Ok(member_key) = u64::try_from(member.id) else {
                    continue;
                };
                match member.kind {
                    MemberKind::Node => self.nmap.update(member_key, &tile_set)?,
                    MemberKind::Way => {
                        self.wmap.update(member_key, &tile_set)?;
                        self.relation_member_ways.insert(member_key);
                    }
                    MemberKind::Relation => self.rmap.update(member_key, &tile_set)?,
                }
            }
        }
        Ok(())
    }

    fn defer(&mut self, relation: &Relation) {
        if self.deferred_ids.insert(relation.id) {
            self.deferred.push(relation.clone());
        }
    }

    /// Retry deferred relations until the worklist stops shrinking; a cycle
    /// or a genuinely missing target leaves a fixed point.
    fn resolve_deferred(&mut self) -> Result<(), PassError> {
        if self.deferred.is_empty() {
            return Ok(());
        }
        info!(
            "retrying {} relations with forward references",
            self.deferred.len()
        );
        loop {
            let pending = std::mem::take(&mut self.deferred);
            self.deferred_ids.clear();
            let before = pending.len();
            for relation in &pending {
                self.add_relation(relation)?;
            }
            let after = self.deferred.len();
            if after == 0 {
                return Ok(());
            }
            if after >= before {
                for relation in &self.deferred {
                    warn!(
                        "relation {} still has unresolved relation members",
                        relation.id
                    );
                }
                return Ok(());
            }
        }
    }

    /// Look up the tile set of an element for the write pass.
    pub(crate) fn tiles_for(&self, kind: ElementKind, id: i64) -> Option<Vec<TileCoord>> {
        let key = u64::try_from(id).ok()?;
        match kind {
            ElementKind::Node => self.nmap.all_tiles(key),
            ElementKind::Way => self.wmap.all_tiles(key),
            ElementKind::Relation => self.rmap.all_tiles(key),
        }
    }

    fn check_meta(&self, kind: &'static str, id: i64, meta: &Metadata) -> Result<(), PassError> {
        if self.check_metadata {
            input::require_metadata(kind, id, meta)?;
        }
        Ok(())
    }

    fn is_modified(&self, meta: &Metadata) -> bool {
        match self.cutoff_ms {
            None => true,
            Some(cutoff) => meta.timestamp_ms.unwrap_or(0) > cutoff,
        }
    }

    fn mark_modified(&mut self, value: TileValue) {
        let mut tiles = BTreeSet::new();
        value.base_tiles(&mut tiles);
        for tile in tiles {
            self.modified.set(tile);
        }
    }

    fn observe_timestamp(&mut self, meta: &Metadata) {
        if let Some(timestamp) = meta.timestamp_ms {
            self.latest_ms = self.latest_ms.max(timestamp);
        }
    }

    fn include_coordinate(&mut self, lon: f64, lat: f64) {
        if !lon.is_finite() || !lat.is_finite() {
            return;
        }
        let coord = Coord { x: lon, y: lat };
        self.bounds = Some(match self.bounds {
            Some(bounds) => Rect::new(
                Coord {
                    x: bounds.min().x.min(coord.x),
                    y: bounds.min().y.min(coord.y),
                },
                Coord {
                    x: bounds.max().x.max(coord.x),
                    y: bounds.max().y.max(coord.y),
                },
            ),
            None => Rect::new(coord, coord),
        });
    }

    fn progress(&self, what: &str, count: u64) {
        if count % PROGRESS_INTERVAL == 0 {
            info!("{count} {what} processed");
        }
    }
}

/// Per-relation one-shot warnings about missing members.
#[derive(Default)]
struct MissingMembers {
    node_logged: bool,
    way_logged: bool,
    relation_logged: bool,
}

impl MissingMembers {
    fn node(&mut self, relation: i64) {
        if !self.node_logged {
            info!("incomplete relation {relation} (missing a node)");
            self.node_logged = true;
        }
    }

    fn way(&mut self, relation: i64) {
        if !self.way_logged {
            info!("incomplete relation {relation} (missing a way)");
            self.way_logged = true;
        }
    }

    fn relation(&mut self, relation: i64) {
        if !self.relation_logged {
            info!("incomplete relation {relation} (missing a relation)");
            self.relation_logged = true;
        }
    }
}

/// Element kinds for map lookups in the write pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ElementKind {
    Node,
    Way,
    Relation,
}
