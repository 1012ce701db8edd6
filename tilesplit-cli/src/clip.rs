//! Polygon clipping of the modified-tile set.
//!
//! The polygon file is a multi-ring text format: a header line (ignored),
//! then rings. Each ring starts with a name line, `!`-prefixed for
//! subtractive rings, carries one `lon lat` pair per line and ends with
//! `END`; a final `END` closes the file.

use std::path::{Path, PathBuf};

use geo::{Contains, Coord, LineString, Point, Polygon};
use log::info;
use thiserror::Error;

use crate::splitter::Splitter;

/// Errors raised while reading a polygon file.
#[derive(Debug, Error)]
pub enum PolygonError {
    /// The file could not be read.
    #[error("failed to read polygon file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A ring body line is not a `lon lat` pair.
    #[error("invalid coordinate pair on line {line} of {path:?}")]
    InvalidCoordinate { path: PathBuf, line: usize },
    /// The file ended inside a ring.
    #[error("polygon file {path:?} ends inside a ring")]
    UnterminatedRing { path: PathBuf },
}

/// A clip region of additive and subtractive rings.
#[derive(Debug)]
pub struct ClipRegion {
    inside: Vec<Polygon<f64>>,
    outside: Vec<Polygon<f64>>,
}

impl ClipRegion {
    pub fn from_file(path: &Path) -> Result<Self, PolygonError> {
        let text = std::fs::read_to_string(path).map_err(|source| PolygonError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    fn parse(text: &str, path: &Path) -> Result<Self, PolygonError> {
        let mut lines = text.lines().enumerate();
        let _ = lines.next(); // name line

        let mut inside = Vec::new();
        let mut outside = Vec::new();
        while let Some((_, header)) = lines.next() {
            let header = header.trim();
            if header == "END" {
                break;
            }
            let subtractive = header.starts_with('!');

            let mut ring: Vec<Coord<f64>> = Vec::new();
            let mut terminated = false;
            for (index, line) in lines.by_ref() {
                let line = line.trim();
                if line == "END" {
                    terminated = true;
                    break;
                }
                let mut parts = line.split_whitespace();
                let coordinate = match (parts.next(), parts.next()) {
                    (Some(lon), Some(lat)) => lon
                        .parse::<f64>()
                        .and_then(|lon| lat.parse::<f64>().map(|lat| Coord { x: lon, y: lat })),
                    _ => {
                        return Err(PolygonError::InvalidCoordinate {
                            path: path.to_path_buf(),
                            line: index + 1,
                        })
                    }
                };
                match coordinate {
                    Ok(coord) => ring.push(coord),
                    Err(_) => {
                        return Err(PolygonError::InvalidCoordinate {
                            path: path.to_path_buf(),
                            line: index + 1,
                        })
                    }
                }
            }
            if !terminated {
                return Err(PolygonError::UnterminatedRing {
                    path: path.to_path_buf(),
                });
            }

            let polygon = Polygon::new(LineString::from(ring), Vec::new());
            if subtractive {
                outside.push(polygon);
            } else {
                inside.push(polygon);
            }
        }
        Ok(Self { inside, outside })
    }

    /// Whether a tile with the given corner points survives the clip: some
    /// corner inside an additive ring, and no corner inside a subtractive
    /// ring.
    #[must_use]
    pub fn keeps(&self, corners: &[Coord<f64>; 4]) -> bool {
        let covered = self
            .inside
            .iter()
            .any(|polygon| corners.iter().any(|c| polygon.contains(&Point::from(*c))));
        if !covered {
            return false;
        }
        !self
            .outside
            .iter()
            .any(|polygon| corners.iter().any(|c| polygon.contains(&Point::from(*c))))
    }
}

impl Splitter {
    /// Drop modified tiles that fall outside the clip region.
    pub fn clip(&mut self, region: &ClipRegion) {
        let grid = self.grid;
        let mut dropped = Vec::new();
        for tile in self.modified.iter() {
            let west = grid.x_to_lon(tile.x());
            let east = grid.x_to_lon(tile.x() + 1);
            let north = grid.y_to_lat(tile.y());
            let south = grid.y_to_lat(tile.y() + 1);
            let corners = [
                Coord { x: west, y: north },
                Coord { x: east, y: north },
                Coord { x: west, y: south },
                Coord { x: east, y: south },
            ];
            if !region.keeps(&corners) {
                dropped.push(tile);
            }
        }
        for tile in dropped {
            self.modified.clear(tile);
        }
        info!(
            "{} modified tiles remain inside the clip polygon",
            self.modified.cardinality()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const SQUARE_WITH_HOLE: &str = "test area
outer
    0.0 0.0
    10.0 0.0
    10.0 10.0
    0.0 10.0
    0.0 0.0
END
!hole
    4.0 4.0
    6.0 4.0
    6.0 6.0
    4.0 6.0
    4.0 4.0
END
END
";

    fn corners_around(x: f64, y: f64) -> [Coord<f64>; 4] {
        [
            Coord { x, y },
            Coord { x: x + 0.1, y },
            Coord { x, y: y + 0.1 },
            Coord { x: x + 0.1, y: y + 0.1 },
        ]
    }

    #[rstest]
    fn parses_additive_and_subtractive_rings() {
        let region =
            ClipRegion::parse(SQUARE_WITH_HOLE, Path::new("square.poly")).expect("file parses");
        assert!(region.keeps(&corners_around(1.0, 1.0)));
        assert!(!region.keeps(&corners_around(20.0, 20.0)), "outside the outer ring");
        assert!(!region.keeps(&corners_around(5.0, 5.0)), "inside the hole");
    }

    #[rstest]
    fn a_single_inside_corner_is_enough() {
        let region =
            ClipRegion::parse(SQUARE_WITH_HOLE, Path::new("square.poly")).expect("file parses");
        let straddling = [
            Coord { x: -1.0, y: -1.0 },
            Coord { x: 1.0, y: -1.0 },
            Coord { x: -1.0, y: 1.0 },
            Coord { x: 1.0, y: 1.0 },
        ];
        assert!(region.keeps(&straddling));
    }

    #[rstest]
    fn rejects_malformed_coordinates() {
        let bad = "name\nring\n  1.0 not-a-number\nEND\nEND\n";
        let err = ClipRegion::parse(bad, Path::new("bad.poly")).expect_err("parse fails");
        assert!(matches!(err, PolygonError::InvalidCoordinate { line: 3, .. }));
    }

    #[rstest]
    fn rejects_unterminated_rings() {
        let bad = "name\nring\n  1.0 2.0\n";
        let err = ClipRegion::parse(bad, Path::new("bad.poly")).expect_err("parse fails");
        assert!(matches!(err, PolygonError::UnterminatedRing { .. }));
    }
}
