//! TMS tile addressing
//!
//! Tiles are identified by `(x, y, zoom)` with `y` growing southwards. Each
//! tile packs into a 64-bit id: zoom in the low byte, `y` in the next 24 bits
//! and `x` in the 24 bits above that.

use std::f64::consts::PI;
use std::fmt;

use geo::{Coord, Rect};

use crate::{Error, Result};

/// Coarsest supported zoom level
pub const MIN_ZOOM: u8 = 0;
/// Finest supported zoom level
pub const MAX_ZOOM: u8 = 21;
/// Zoom used when none is requested
pub const DEFAULT_ZOOM: u8 = 16;
/// Web Mercator latitude limit in degrees
pub const LATITUDE_LIMIT: f64 = 85.0511287798066;
/// Longitude limit in degrees
pub const LONGITUDE_LIMIT: f64 = 180.0;

const INDEX_MASK: u64 = 0xFF_FFFF;
const ZOOM_MASK: u64 = 0xFF;

/// A single TMS tile. Equality and hashing go through the packed id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tile {
    id: u64,
}

impl Tile {
    /// Create a tile, validating the zoom and the index range for that zoom.
    pub fn new(x: u32, y: u32, zoom: u8) -> Result<Self> {
        check_zoom(zoom)?;
        let max_index = tile_count(zoom) - 1;
        if x > max_index || y > max_index {
            return Err(Error::InvalidArgument(format!(
                "tile index ({x}, {y}) exceeds {max_index} at zoom {zoom}"
            )));
        }
        Ok(Self::from_parts(x, y, zoom))
    }

    /// Rebuild a tile from its packed id.
    pub fn from_id(id: u64) -> Result<Self> {
        let zoom = (id & ZOOM_MASK) as u8;
        let y = ((id >> 8) & INDEX_MASK) as u32;
        let x = ((id >> 32) & INDEX_MASK) as u32;
        let tile = Self::new(x, y, zoom)?;
        if tile.id != id {
            return Err(Error::InvalidArgument(format!("malformed tile id {id:#x}")));
        }
        Ok(tile)
    }

    /// The tile containing the given coordinate at `zoom`.
    pub fn from_coordinate(latitude: f64, longitude: f64, zoom: u8) -> Result<Self> {
        check_zoom(zoom)?;
        Ok(Self::from_parts(
            longitude_to_tile_x(longitude, zoom),
            latitude_to_tile_y(latitude, zoom),
            zoom,
        ))
    }

    #[inline]
    fn from_parts(x: u32, y: u32, zoom: u8) -> Self {
        let id = ((x as u64 & INDEX_MASK) << 32)
            | ((y as u64 & INDEX_MASK) << 8)
            | (zoom as u64 & ZOOM_MASK);
        Self { id }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn x(&self) -> u32 {
        ((self.id >> 32) & INDEX_MASK) as u32
    }

    #[inline]
    pub fn y(&self) -> u32 {
        ((self.id >> 8) & INDEX_MASK) as u32
    }

    #[inline]
    pub fn zoom(&self) -> u8 {
        (self.id & ZOOM_MASK) as u8
    }

    /// Geographic bounds of the tile, `x` = longitude and `y` = latitude.
    pub fn bounds(&self) -> Rect<f64> {
        let (x, y, zoom) = (self.x(), self.y(), self.zoom());
        let north_west = tile_corner(x, y, zoom);
        let south_east = tile_corner(x + 1, y + 1, zoom);
        Rect::new(north_west, south_east)
    }

    /// The four tiles one zoom finer covering this tile, or an empty list at
    /// the finest zoom.
    pub fn sub_tiles(&self) -> Vec<Tile> {
        if self.zoom() >= MAX_ZOOM {
            return Vec::new();
        }
        let (x, y, zoom) = (self.x() * 2, self.y() * 2, self.zoom() + 1);
        vec![
            Self::from_parts(x, y, zoom),
            Self::from_parts(x + 1, y, zoom),
            Self::from_parts(x, y + 1, zoom),
            Self::from_parts(x + 1, y + 1, zoom),
        ]
    }

    /// The tile one zoom coarser containing this tile.
    pub fn super_tile(&self) -> Option<Tile> {
        if self.zoom() == MIN_ZOOM {
            return None;
        }
        Some(Self::from_parts(self.x() / 2, self.y() / 2, self.zoom() - 1))
    }

    /// The tile at `zoom` containing this tile, `None` when `zoom` is finer.
    pub fn ancestor(&self, zoom: u8) -> Option<Tile> {
        let shift = self.zoom().checked_sub(zoom)?;
        Some(Self::from_parts(self.x() >> shift, self.y() >> shift, zoom))
    }
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tile({}/{}/{})", self.zoom(), self.x(), self.y())
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom(), self.x(), self.y())
    }
}

fn check_zoom(zoom: u8) -> Result<()> {
    if zoom > MAX_ZOOM {
        return Err(Error::ZoomOutOfRange {
            zoom,
            min: MIN_ZOOM,
            max: MAX_ZOOM,
        });
    }
    Ok(())
}

#[inline(always)]
fn tile_count(zoom: u8) -> u32 {
    1u32 << zoom
}

fn tile_corner(x: u32, y: u32, zoom: u8) -> Coord<f64> {
    let n = tile_count(zoom) as f64;
    let latitude = (PI - 2.0 * PI * y as f64 / n).sinh().atan().to_degrees();
    let longitude = x as f64 / n * 360.0 - 180.0;
    Coord {
        x: longitude,
        y: latitude,
    }
}

/// Tile column for a longitude; +180 maps into the last column.
pub(crate) fn longitude_to_tile_x(longitude: f64, zoom: u8) -> u32 {
    let longitude = longitude.clamp(-LONGITUDE_LIMIT, LONGITUDE_LIMIT);
    let n = tile_count(zoom);
    let x = ((longitude + 180.0) / 360.0 * n as f64) as u32;
    x.min(n - 1)
}

/// Tile row for a latitude; rows grow southwards.
pub(crate) fn latitude_to_tile_y(latitude: f64, zoom: u8) -> u32 {
    let latitude = latitude.clamp(-LATITUDE_LIMIT, LATITUDE_LIMIT).to_radians();
    let n = tile_count(zoom);
    let y = (1.0 - (latitude.tan() + 1.0 / latitude.cos()).ln() / PI) / 2.0 * n as f64;
    (y.max(0.0) as u32).min(n - 1)
}

/// A tiling scheme, handing out tiles for areas.
pub trait TileSource: Send + Sync {
    fn min_zoom(&self) -> u8;

    fn max_zoom(&self) -> u8;

    /// Every tile at `zoom` intersecting `area`, x-major. `padded` grows the
    /// range by one tile on each side, clamped to the valid index range.
    fn get_for_zoom(&self, area: &Rect<f64>, zoom: u8, padded: bool) -> Result<Vec<Tile>>;
}

/// The standard TMS scheme over zooms `MIN_ZOOM..=MAX_ZOOM`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TmsTileSource;

impl TileSource for TmsTileSource {
    fn min_zoom(&self) -> u8 {
        MIN_ZOOM
    }

    fn max_zoom(&self) -> u8 {
        MAX_ZOOM
    }

    fn get_for_zoom(&self, area: &Rect<f64>, zoom: u8, padded: bool) -> Result<Vec<Tile>> {
        check_zoom(zoom)?;

        let (min, max) = (area.min(), area.max());
        let mut x_min = longitude_to_tile_x(min.x, zoom);
        let mut x_max = longitude_to_tile_x(max.x, zoom);
        // y is flipped, north is the smaller row
        let mut y_min = latitude_to_tile_y(max.y, zoom);
        let mut y_max = latitude_to_tile_y(min.y, zoom);

        if padded {
            let last = tile_count(zoom) - 1;
            x_min = x_min.saturating_sub(1);
            y_min = y_min.saturating_sub(1);
            x_max = (x_max + 1).min(last);
            y_max = (y_max + 1).min(last);
        }

        let mut tiles =
            Vec::with_capacity(((x_max - x_min + 1) * (y_max - y_min + 1)) as usize);
        for x in x_min..=x_max {
            for y in y_min..=y_max {
                tiles.push(Tile::from_parts(x, y, zoom));
            }
        }
        Ok(tiles)
    }
}
