//! Tile set metadata
//!
//! Written once, after every zoom level compiled, so a store that carries
//! metadata is known to be complete.

use geo::{Coord, Rect};
use prost::Message;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::tile::{MAX_ZOOM, MIN_ZOOM};
use crate::{Error, Result};

/// The compiled area and the zoom levels present in a tile set.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TiledSourceMeta {
    pub area: Rect<f64>,
    /// Zoom levels, finest first
    pub zoom_levels: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct BinaryMeta {
    #[prost(double, tag = "1")]
    min_latitude: f64,
    #[prost(double, tag = "2")]
    min_longitude: f64,
    #[prost(double, tag = "3")]
    max_latitude: f64,
    #[prost(double, tag = "4")]
    max_longitude: f64,
    #[prost(uint32, repeated, tag = "5")]
    zoom_levels: Vec<u32>,
}

impl TiledSourceMeta {
    pub fn new(area: Rect<f64>, zoom_levels: Vec<u8>) -> Self {
        Self { area, zoom_levels }
    }

    pub fn has_zoom(&self, zoom: u8) -> bool {
        self.zoom_levels.contains(&zoom)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        BinaryMeta {
            min_latitude: self.area.min().y,
            min_longitude: self.area.min().x,
            max_latitude: self.area.max().y,
            max_longitude: self.area.max().x,
            zoom_levels: self.zoom_levels.iter().map(|&z| u32::from(z)).collect(),
        }
        .encode_to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let binary = BinaryMeta::decode(bytes)?;
        let zoom_levels = binary
            .zoom_levels
            .iter()
            .map(|&z| {
                u8::try_from(z)
                    .ok()
                    .filter(|z| (MIN_ZOOM..=MAX_ZOOM).contains(z))
                    .ok_or_else(|| Error::InvalidArgument(format!("stored zoom level {z} is out of range")))
            })
            .collect::<Result<Vec<u8>>>()?;
        Ok(Self {
            area: Rect::new(
                Coord {
                    x: binary.min_longitude,
                    y: binary.min_latitude,
                },
                Coord {
                    x: binary.max_longitude,
                    y: binary.max_latitude,
                },
            ),
            zoom_levels,
        })
    }
}
