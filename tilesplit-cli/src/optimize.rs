//! Coverage optimisation.
//!
//! High zoom levels leave rural tiles nearly empty. This pass counts the
//! nodes per tile and re-homes sparse tiles to a lower zoom level, merging
//! sibling groups until a merged tile holds enough content or the zoom-out
//! budget is spent. Nodes sitting in several tiles (border strips, way
//! membership) count once per tile, which under-estimates merging headroom
//! rather than over-estimating it.

use std::collections::HashMap;

use log::info;

use tilesplit_core::TileCoord;

use crate::splitter::Splitter;

/// Zoom-out steps tried per sparse tile.
const MAX_ZOOM_OUT_STEPS: u8 = 4;

impl Splitter {
    /// Re-home tiles holding fewer than `node_limit` nodes to lower zooms.
    pub fn optimize(&mut self, node_limit: u32) {
        info!("optimizing sparse tiles (node limit {node_limit})");

        let mut counts: HashMap<u32, u32> = HashMap::new();
        let mut node_keys = 0u64;
        for key in self.nmap.keys() {
            node_keys += 1;
            if let Some(tiles) = self.nmap.all_tiles(key) {
                for tile in tiles {
                    *counts.entry(tile.raw()).or_insert(0) += 1;
                }
            }
        }

        let mut sorted: Vec<u32> = counts.keys().copied().collect();
        sorted.sort_unstable();
        for tile in sorted {
            if self.zoom_map.contains_key(&tile) || counts[&tile] >= node_limit {
                continue;
            }
            self.coalesce(tile, node_limit, &counts);
        }

        // Rewrite the modified set: coalesced tiles leave the base zoom and
        // their parents join the per-zoom sets.
        for (&tile, &new_zoom) in &self.zoom_map {
            let coord = TileCoord::from_raw(tile);
            self.modified.clear(coord);
            let parent = coord.parent(self.grid.zoom() - new_zoom);
            self.coalesced.entry(new_zoom).or_default().set(parent);
        }

        info!(
            "{} occupied tiles over {} node keys, {} re-homed to lower zooms",
            counts.len(),
            node_keys,
            self.zoom_map.len()
        );
    }

    /// Search outward from `tile` for the smallest sibling group worth
    /// merging, and commit it to the zoom map.
    fn coalesce(&mut self, tile: u32, node_limit: u32, counts: &HashMap<u32, u32>) {
        // Zoom 0 is the floor, so a shallow base zoom shortens the search.
        let max_steps = MAX_ZOOM_OUT_STEPS.min(self.grid.zoom());
        let mut candidate: Option<(Vec<u32>, u8)> = None;
        for step in 1..=max_steps {
            let new_zoom = self.grid.zoom() - step;
            let group = sibling_group(tile, step);
            let total: u32 = group
                .iter()
                .map(|sibling| counts.get(sibling).copied().unwrap_or(0))
                .sum();
            if total < 4 * node_limit {
                if total > node_limit || step == max_steps {
                    commit(&mut self.zoom_map, &group, counts, new_zoom);
                    break;
                }
                // Not enough content yet; remember the group and keep
                // zooming out.
                candidate = Some((group, new_zoom));
            } else {
                if let Some((group, zoom)) = candidate.take() {
                    commit(&mut self.zoom_map, &group, counts, zoom);
                }
                break;
            }
        }
    }
}

fn commit(zoom_map: &mut HashMap<u32, u8>, group: &[u32], counts: &HashMap<u32, u32>, zoom: u8) {
    for &tile in group {
        if counts.contains_key(&tile) {
            zoom_map.insert(tile, zoom);
        }
    }
}

/// All base-zoom tiles merging into one tile `step` levels further out.
fn sibling_group(tile: u32, step: u8) -> Vec<u32> {
    let coord = TileCoord::from_raw(tile);
    let x0 = (coord.x() >> step) << step;
    let y0 = (coord.y() >> step) << step;
    let side = 1u32 << step;
    let mut group = Vec::with_capacity((side * side) as usize);
    for dx in 0..side {
        for dy in 0..side {
            group.push(TileCoord::new(x0 + dx, y0 + dy).raw());
        }
    }
    group
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tilesplit_core::Neighbours;

    use crate::cli::MapSizes;
    use crate::splitter::SplitterOptions;

    fn splitter(zoom: u8) -> Splitter {
        Splitter::new(SplitterOptions {
            zoom,
            border: 0.0,
            cutoff_ms: None,
            complete_relations: false,
            complete_areas: false,
            check_metadata: false,
            map_sizes: MapSizes {
                nodes: 1 << 16,
                ways: 1 << 10,
                relations: 1 << 10,
            },
            max_ids: None,
        })
    }

    /// Drop `count` nodes into one tile, ids starting at `first_id`.
    fn populate(splitter: &mut Splitter, tile: TileCoord, first_id: u64, count: u64) {
        for id in first_id..first_id + count {
            splitter
                .nmap
                .put(id, tile, Neighbours::NONE)
                .expect("node fits the map");
        }
        splitter.modified.set(tile);
    }

    #[rstest]
    fn sibling_groups_cover_the_merged_tile() {
        let group = sibling_group(TileCoord::new(13, 7).raw(), 1);
        let mut coords: Vec<TileCoord> = group.into_iter().map(TileCoord::from_raw).collect();
        coords.sort_unstable();
        assert_eq!(
            coords,
            vec![
                TileCoord::new(12, 6),
                TileCoord::new(12, 7),
                TileCoord::new(13, 6),
                TileCoord::new(13, 7),
            ]
        );
        assert_eq!(sibling_group(TileCoord::new(13, 7).raw(), 2).len(), 16);
    }

    #[rstest]
    fn dense_tiles_stay_at_the_base_zoom() {
        let mut splitter = splitter(13);
        let tile = TileCoord::new(4290, 2868);
        populate(&mut splitter, tile, 0, 3000);

        splitter.optimize(2000);

        assert!(splitter.zoom_map.is_empty());
        assert!(splitter.modified.contains(tile));
        assert!(splitter.coalesced.is_empty());
    }

    #[rstest]
    fn sparse_siblings_merge_until_the_limit_is_met() {
        let mut splitter = splitter(13);
        // Four siblings of one zoom-12 tile, each holding 800 nodes: one
        // zoom-out step reaches 3200 > 2000 within the 4×2000 budget.
        let mut id = 0;
        for (x, y) in [(100, 200), (101, 200), (100, 201), (101, 201)] {
            populate(&mut splitter, TileCoord::new(x, y), id, 800);
            id += 800;
        }

        splitter.optimize(2000);

        for (x, y) in [(100, 200), (101, 200), (100, 201), (101, 201)] {
            let tile = TileCoord::new(x, y);
            assert_eq!(splitter.zoom_map.get(&tile.raw()), Some(&12));
            assert!(!splitter.modified.contains(tile), "coalesced tiles leave the base set");
        }
        let parent_set = splitter.coalesced.get(&12).expect("zoom 12 set exists");
        assert!(parent_set.contains(TileCoord::new(50, 100)));
        assert_eq!(parent_set.cardinality(), 1);
    }

    #[rstest]
    fn an_isolated_sparse_tile_exhausts_the_zoom_budget() {
        let mut splitter = splitter(13);
        let tile = TileCoord::new(4000, 3000);
        populate(&mut splitter, tile, 0, 10);

        splitter.optimize(2000);

        // All four attempts stay under the limit, so the last one wins.
        assert_eq!(splitter.zoom_map.get(&tile.raw()), Some(&9));
        let parent_set = splitter.coalesced.get(&9).expect("zoom 9 set exists");
        assert!(parent_set.contains(tile.parent(4)));
    }

    #[rstest]
    fn a_shallow_base_zoom_still_commits_the_last_step() {
        let mut splitter = splitter(2);
        let tile = TileCoord::new(2, 1);
        populate(&mut splitter, tile, 0, 10);

        splitter.optimize(2000);

        // Only two zoom-out steps exist below zoom 2; the sparse tile must
        // still be committed on the last of them.
        assert_eq!(splitter.zoom_map.get(&tile.raw()), Some(&0));
        assert!(!splitter.modified.contains(tile));
        let parent_set = splitter.coalesced.get(&0).expect("zoom 0 set exists");
        assert!(parent_set.contains(TileCoord::new(0, 0)));
    }

    #[rstest]
    fn an_oversized_group_falls_back_to_the_previous_step() {
        let mut splitter = splitter(13);
        // The sparse tile's zoom-12 group stays tiny (total 10 < limit), but
        // the zoom-11 group holds a dense cousin pushing it past 4×limit, so
        // the zoom-12 candidate is committed.
        populate(&mut splitter, TileCoord::new(400, 400), 0, 10);
        populate(&mut splitter, TileCoord::new(402, 402), 100_000, 9000);

        splitter.optimize(2000);

        assert_eq!(
            splitter.zoom_map.get(&TileCoord::new(400, 400).raw()),
            Some(&12)
        );
        assert!(
            !splitter.zoom_map.contains_key(&TileCoord::new(402, 402).raw()),
            "the dense cousin keeps its zoom"
        );
    }
}
