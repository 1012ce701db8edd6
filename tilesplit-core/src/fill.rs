//! Interior hole detection for sprawling tile sets.
//!
//! A closed way or large multipolygon touches a ring of tiles whose interior
//! tiles contain no geometry of their own, yet must carry the element for
//! the output to be referentially complete. The flood fill below finds those
//! interior tiles.

use std::collections::BTreeSet;

use crate::tile::TileCoord;
use crate::value::TileValue;

/// Smallest tile-set size that can enclose a hole under 4-connectivity.
pub const MIN_HOLE_FILL_TILES: usize = 8;

/// Add the interior holes of `tiles` to the set.
///
/// The flood fill runs on a local grid spanning the set's bounding box
/// (neighbour flags included) enlarged by two tiles on every side, starts in
/// the guaranteed-empty outer region and never steps onto the outermost
/// ring. Cells the flood cannot reach are interior holes; each one is
/// inserted into `tiles` as a bare tile value and reported through
/// `on_hole`.
pub fn fill_holes(tiles: &mut BTreeSet<TileValue>, mut on_hole: impl FnMut(TileCoord)) {
    let mut marked: BTreeSet<TileCoord> = BTreeSet::new();
    for value in tiles.iter() {
        value.base_tiles(&mut marked);
    }
    if marked.is_empty() {
        return;
    }

    let mut min_x = i64::MAX;
    let mut min_y = i64::MAX;
    let mut max_x = i64::MIN;
    let mut max_y = i64::MIN;
    for coord in &marked {
        min_x = min_x.min(i64::from(coord.x()));
        min_y = min_y.min(i64::from(coord.y()));
        max_x = max_x.max(i64::from(coord.x()));
        max_y = max_y.max(i64::from(coord.y()));
    }

    // Two spare rings keep the exterior connected around the content.
    min_x -= 2;
    min_y -= 2;
    max_x += 2;
    max_y += 2;
    let size_x = (max_x - min_x + 1) as usize;
    let size_y = (max_y - min_y + 1) as usize;

    let mut grid = vec![false; size_x * size_y];
    for coord in &marked {
        let x = (i64::from(coord.x()) - min_x) as usize;
        let y = (i64::from(coord.y()) - min_y) as usize;
        grid[x + y * size_x] = true;
    }

    // Flood the exterior from (1, 1), staying strictly inside the frame.
    let mut stack = vec![1 + size_x];
    while let Some(cell) = stack.pop() {
        if grid[cell] {
            continue;
        }
        grid[cell] = true;
        let x = cell % size_x;
        let y = cell / size_x;
        if x > 1 {
            stack.push(cell - 1);
        }
        if x < size_x - 2 {
            stack.push(cell + 1);
        }
        if y > 1 {
            stack.push(cell - size_x);
        }
        if y < size_y - 2 {
            stack.push(cell + size_x);
        }
    }

    // Anything the flood could not reach is an interior hole.
    for y in 1..size_y - 1 {
        for x in 1..size_x - 1 {
            if grid[x + y * size_x] {
                continue;
            }
            let coord = TileCoord::new((x as i64 + min_x) as u32, (y as i64 + min_y) as u32);
            tiles.insert(TileValue::from_coord(coord));
            on_hole(coord);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Neighbours;
    use rstest::rstest;

    fn ring(origin_x: u32, origin_y: u32, side: u32) -> BTreeSet<TileValue> {
        let mut tiles = BTreeSet::new();
        for i in 0..side {
            tiles.insert(TileValue::from_coord(TileCoord::new(origin_x + i, origin_y)));
            tiles.insert(TileValue::from_coord(TileCoord::new(
                origin_x + i,
                origin_y + side - 1,
            )));
            tiles.insert(TileValue::from_coord(TileCoord::new(origin_x, origin_y + i)));
            tiles.insert(TileValue::from_coord(TileCoord::new(
                origin_x + side - 1,
                origin_y + i,
            )));
        }
        tiles
    }

    #[rstest]
    fn fills_the_interior_of_a_ring() {
        let mut tiles = ring(10, 10, 3);
        let mut holes = Vec::new();
        fill_holes(&mut tiles, |coord| holes.push(coord));

        assert_eq!(holes, vec![TileCoord::new(11, 11)]);
        assert!(tiles.contains(&TileValue::from_coord(TileCoord::new(11, 11))));
        assert_eq!(tiles.len(), 9, "ring plus the one interior tile");
    }

    #[rstest]
    fn fills_every_interior_cell_of_a_larger_ring() {
        let mut tiles = ring(100, 200, 5);
        let mut holes = Vec::new();
        fill_holes(&mut tiles, |coord| holes.push(coord));

        assert_eq!(holes.len(), 9, "3×3 interior");
        for hole in &holes {
            assert!((101..=103).contains(&hole.x()));
            assert!((201..=203).contains(&hole.y()));
        }
    }

    #[rstest]
    fn is_invariant_under_translation() {
        let mut near = ring(5, 5, 4);
        let mut far = ring(30_005, 40_005, 4);
        let mut near_holes = Vec::new();
        let mut far_holes = Vec::new();
        fill_holes(&mut near, |coord| near_holes.push(coord));
        fill_holes(&mut far, |coord| far_holes.push(coord));

        let shifted: Vec<TileCoord> = near_holes
            .iter()
            .map(|c| TileCoord::new(c.x() + 30_000, c.y() + 40_000))
            .collect();
        assert_eq!(shifted, far_holes);
    }

    #[rstest]
    fn leaves_solid_and_open_shapes_alone() {
        // A straight line has no interior.
        let mut line: BTreeSet<TileValue> = (0..10)
            .map(|i| TileValue::from_coord(TileCoord::new(50 + i, 60)))
            .collect();
        fill_holes(&mut line, |coord| panic!("unexpected hole at {coord:?}"));
        assert_eq!(line.len(), 10);

        // A C-shape is open to the outside.
        let mut open = ring(20, 20, 3);
        open.remove(&TileValue::from_coord(TileCoord::new(21, 20)));
        let before = open.len();
        fill_holes(&mut open, |coord| panic!("unexpected hole at {coord:?}"));
        assert_eq!(open.len(), before);
    }

    #[rstest]
    fn neighbour_flags_count_as_covered_tiles() {
        // Part of the eastern wall exists only as a neighbour flag.
        let mut tiles = BTreeSet::new();
        for i in 0..3u32 {
            tiles.insert(TileValue::from_coord(TileCoord::new(10, 10 + i)));
        }
        tiles.insert(TileValue::from_coord(TileCoord::new(11, 10)));
        tiles.insert(TileValue::from_coord(TileCoord::new(11, 12)));
        tiles.insert(TileValue::new(TileCoord::new(12, 10), Neighbours::SOUTH));
        tiles.insert(TileValue::from_coord(TileCoord::new(12, 12)));

        let mut holes = Vec::new();
        fill_holes(&mut tiles, |coord| holes.push(coord));
        assert_eq!(holes, vec![TileCoord::new(11, 11)]);
    }
}
