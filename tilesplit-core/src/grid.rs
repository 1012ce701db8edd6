//! Slippy-map tile geometry.
//!
//! Coordinates are WGS84 with `x = longitude`, `y = latitude`. The world is
//! a `2^zoom` by `2^zoom` grid with the origin at the top-left and y growing
//! south.

use std::f64::consts::PI;

use geo::{Coord, Rect};

use crate::tile::{TileCoord, MAX_ZOOM};
use crate::value::Neighbours;

/// Tile arithmetic at a fixed zoom level.
#[derive(Debug, Clone, Copy)]
pub struct TileGrid {
    zoom: u8,
}

impl TileGrid {
    pub fn new(zoom: u8) -> Self {
        debug_assert!(zoom <= MAX_ZOOM);
        Self { zoom }
    }

    #[must_use]
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    fn side(&self) -> u32 {
        1 << self.zoom
    }

    /// Tile column for a longitude, clamped to the grid.
    pub fn lon_to_x(&self, lon: f64) -> u32 {
        let x = ((lon + 180.0) / 360.0 * f64::from(self.side())).floor();
        (x.max(0.0) as u32).min(self.side() - 1)
    }

    /// Tile row for a latitude, clamped to the grid.
    pub fn lat_to_y(&self, lat: f64) -> u32 {
        let rad = lat.to_radians();
        let y = ((1.0 - (rad.tan() + 1.0 / rad.cos()).ln() / PI) / 2.0 * f64::from(self.side()))
            .floor();
        (y.max(0.0) as u32).min(self.side() - 1)
    }

    /// Longitude of the western edge of column `x`.
    pub fn x_to_lon(&self, x: u32) -> f64 {
        f64::from(x) / f64::from(self.side()) * 360.0 - 180.0
    }

    /// Latitude of the northern edge of row `y`.
    pub fn y_to_lat(&self, y: u32) -> f64 {
        let n = PI - 2.0 * PI * f64::from(y) / f64::from(self.side());
        180.0 / PI * (0.5 * (n.exp() - (-n).exp())).atan()
    }

    /// The lat/lon box of a tile, expanded by `border` of the tile's width
    /// and height on each side and clipped to the valid coordinate range.
    pub fn bounds(&self, tile: TileCoord, border: f64) -> Rect<f64> {
        let left = self.x_to_lon(tile.x());
        let right = self.x_to_lon(tile.x() + 1);
        let top = self.y_to_lat(tile.y());
        let bottom = self.y_to_lat(tile.y() + 1);

        let dx = border * (right - left);
        let dy = border * (bottom - top);

        Rect::new(
            Coord {
                x: (left - dx).max(-180.0),
                y: (bottom + dy).max(-90.0),
            },
            Coord {
                x: (right + dx).min(180.0),
                y: (top - dy).min(90.0),
            },
        )
    }

    fn delta_x(&self, lon: f64, border: f64) -> f64 {
        let x = self.lon_to_x(lon);
        border * (self.x_to_lon(x + 1) - self.x_to_lon(x))
    }

    fn delta_y(&self, lat: f64, border: f64) -> f64 {
        let y = self.lat_to_y(lat);
        border * (self.y_to_lat(y + 1) - self.y_to_lat(y))
    }

    /// The tile for a point, plus neighbour flags when the enlargement
    /// border pushes the point across the eastern or southern tile edge.
    ///
    /// A point falling into the western or northern border strip of its tile
    /// is re-homed to the neighbouring tile with the matching flag set, so a
    /// flagged value always covers both tiles the bordered point occupies.
    pub fn locate(&self, lon: f64, lat: f64, border: f64) -> (TileCoord, Neighbours) {
        let mut x = self.lon_to_x(lon);
        let mut y = self.lat_to_y(lat);
        let mut neighbours = Neighbours::NONE;

        let dx = self.delta_x(lon, border);
        if self.lon_to_x(lon + dx) > x {
            neighbours = neighbours.with_east();
        } else if self.lon_to_x(lon - dx) < x {
            x -= 1;
            neighbours = neighbours.with_east();
        }

        let dy = self.delta_y(lat, border);
        if self.lat_to_y(lat + dy) > y {
            neighbours = neighbours.with_south();
        } else if self.lat_to_y(lat - dy) < y {
            y -= 1;
            neighbours = neighbours.with_south();
        }

        (TileCoord::new(x, y), neighbours)
    }
}
