//! Tile coordinates and Web Mercator tile math.
//!
//! Coordinates follow the slippy-map convention: `x` grows eastward, `y` grows
//! southward, and a tile at zoom `z` has exactly one parent at `z-1` and four
//! children at `z+1`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Web Mercator valid latitude range.
pub const MIN_LAT: f64 = -85.05112878;
pub const MAX_LAT: f64 = 85.05112878;

/// Valid longitude range.
pub const MIN_LON: f64 = -180.0;
pub const MAX_LON: f64 = 180.0;

/// Highest zoom for which tile indices fit comfortably in `u32`.
pub const MAX_SUPPORTED_ZOOM: u8 = 30;

/// A single tile address in the pyramid.
///
/// Invariant: `x, y < 2^zoom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(zoom: u8, x: u32, y: u32) -> Self {
        debug_assert!(zoom <= MAX_SUPPORTED_ZOOM);
        debug_assert!(x < (1u32 << zoom) && y < (1u32 << zoom));
        Self { zoom, x, y }
    }

    /// The containing tile at `zoom - 1`, or `None` at the pyramid root.
    pub fn parent(&self) -> Option<TileCoord> {
        if self.zoom == 0 {
            return None;
        }
        Some(TileCoord {
            zoom: self.zoom - 1,
            x: self.x / 2,
            y: self.y / 2,
        })
    }

    /// The four covered tiles at `zoom + 1`, in row-major order.
    pub fn children(&self) -> [TileCoord; 4] {
        let (z, x, y) = (self.zoom + 1, self.x * 2, self.y * 2);
        [
            TileCoord::new(z, x, y),
            TileCoord::new(z, x + 1, y),
            TileCoord::new(z, x, y + 1),
            TileCoord::new(z, x + 1, y + 1),
        ]
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

impl FromStr for TileCoord {
    type Err = anyhow::Error;

    /// Parse the `z/x/y` form used by tile-list files.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('/');
        let (z, x, y) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(z), Some(x), Some(y), None) => (z, x, y),
            _ => anyhow::bail!("expected z/x/y, got {:?}", s),
        };
        let zoom: u8 = z.parse()?;
        let x: u32 = x.parse()?;
        let y: u32 = y.parse()?;
        if zoom > MAX_SUPPORTED_ZOOM {
            anyhow::bail!("zoom {} exceeds supported maximum {}", zoom, MAX_SUPPORTED_ZOOM);
        }
        let n = 1u32 << zoom;
        if x >= n || y >= n {
            anyhow::bail!("tile {}/{}/{} out of range for zoom {}", zoom, x, y, zoom);
        }
        Ok(TileCoord { zoom, x, y })
    }
}

/// Geographic bounding box in WGS84 degrees.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl Default for BoundingBox {
    /// Full world within the Web-Mercator-valid latitude range.
    fn default() -> Self {
        Self {
            min_lon: MIN_LON,
            min_lat: MIN_LAT,
            max_lon: MAX_LON,
            max_lat: MAX_LAT,
        }
    }
}

impl BoundingBox {
    pub fn from_array(b: [f64; 4]) -> Self {
        Self {
            min_lon: b[0],
            min_lat: b[1],
            max_lon: b[2],
            max_lat: b[3],
        }
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }

    /// Check that the box is well-formed and within valid ranges.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.min_lon >= self.max_lon {
            anyhow::bail!("min_lon must be less than max_lon");
        }
        if self.min_lat >= self.max_lat {
            anyhow::bail!("min_lat must be less than max_lat");
        }
        if self.min_lon < MIN_LON || self.max_lon > MAX_LON {
            anyhow::bail!("longitude out of range [-180, 180]");
        }
        Ok(())
    }

    /// The range of tile indices this box covers at the given zoom.
    ///
    /// Latitudes are clamped to the Web Mercator range before projection, and
    /// boundary tiles are included on both edges.
    pub fn tile_range(&self, zoom: u8) -> TileRange {
        let n = 1u32 << zoom;
        let x_min = lon_to_x(self.min_lon, zoom);
        let x_max = lon_to_x(self.max_lon, zoom);
        // y grows southward: the northern edge gives the smaller index
        let y_min = lat_to_y(self.max_lat, zoom);
        let y_max = lat_to_y(self.min_lat, zoom);
        TileRange {
            zoom,
            x_min,
            x_max: x_max.min(n - 1),
            y_min,
            y_max: y_max.min(n - 1),
        }
    }
}

/// Tile column for a longitude at a zoom, clamped to the valid index range.
fn lon_to_x(lon: f64, zoom: u8) -> u32 {
    let n = f64::from(1u32 << zoom);
    let x = ((lon + 180.0) / 360.0 * n).floor();
    (x.max(0.0) as u32).min((1u32 << zoom) - 1)
}

/// Tile row for a latitude at a zoom, clamped to the valid index range.
fn lat_to_y(lat: f64, zoom: u8) -> u32 {
    let n = f64::from(1u32 << zoom);
    let lat_rad = lat.clamp(MIN_LAT, MAX_LAT).to_radians();
    let y = ((1.0 - lat_rad.tan().asinh() / std::f64::consts::PI) / 2.0 * n).floor();
    (y.max(0.0) as u32).min((1u32 << zoom) - 1)
}

/// Inclusive rectangle of tile indices at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub zoom: u8,
    pub x_min: u32,
    pub x_max: u32,
    pub y_min: u32,
    pub y_max: u32,
}

impl TileRange {
    /// Number of tiles in the range.
    pub fn count(&self) -> u64 {
        let w = u64::from(self.x_max - self.x_min) + 1;
        let h = u64::from(self.y_max - self.y_min) + 1;
        w * h
    }

    /// Whether the coordinate lies inside this range.
    pub fn contains(&self, coord: &TileCoord) -> bool {
        coord.zoom == self.zoom
            && (self.x_min..=self.x_max).contains(&coord.x)
            && (self.y_min..=self.y_max).contains(&coord.y)
    }

    /// Iterate the range in row-major order (north to south, west to east).
    pub fn iter(&self) -> TileRangeIter {
        TileRangeIter {
            range: *self,
            next_x: self.x_min,
            next_y: self.y_min,
            done: false,
        }
    }
}

impl IntoIterator for TileRange {
    type Item = TileCoord;
    type IntoIter = TileRangeIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Row-major iterator over a [`TileRange`].
#[derive(Debug, Clone)]
pub struct TileRangeIter {
    range: TileRange,
    next_x: u32,
    next_y: u32,
    done: bool,
}

impl Iterator for TileRangeIter {
    type Item = TileCoord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let coord = TileCoord::new(self.range.zoom, self.next_x, self.next_y);
        if self.next_x < self.range.x_max {
            self.next_x += 1;
        } else if self.next_y < self.range.y_max {
            self.next_x = self.range.x_min;
            self.next_y += 1;
        } else {
            self.done = true;
        }
        Some(coord)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            return (0, Some(0));
        }
        let full_rows = u64::from(self.range.y_max - self.next_y)
            * (u64::from(self.range.x_max - self.range.x_min) + 1);
        let this_row = u64::from(self.range.x_max - self.next_x) + 1;
        let remaining = (full_rows + this_row) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TileRangeIter {}
