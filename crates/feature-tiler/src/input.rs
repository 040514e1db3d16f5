//! JSON feature input
//!
//! Coordinates are `[longitude, latitude]` pairs. Integer ids are turned into
//! feature ids together with the feature kind, so a place and a segment may
//! share the same number.

use std::path::{Path, PathBuf};

use feature_tiler_lib::{
    Area, AreaCategory, Feature, FeatureKind, Place, PlaceCategory, Segment, SegmentCategory,
    feature_id,
};
use geo::{Coord, LineString, Polygon};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid feature file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid {kind:?} {id}: {source}")]
    Feature {
        kind: FeatureKind,
        id: i64,
        #[source]
        source: feature_tiler_lib::Error,
    },
}

type Position = [f64; 2];

fn coords(positions: &[Position]) -> Vec<Coord<f64>> {
    positions.iter().map(|&[x, y]| Coord { x, y }).collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceInput {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub position: Position,
    #[serde(default)]
    pub category: PlaceCategory,
    /// Raw icon bytes
    #[serde(default)]
    pub icon: Vec<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentInput {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub coordinates: Vec<Position>,
    #[serde(default)]
    pub category: SegmentCategory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AreaInput {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub outer: Vec<Position>,
    #[serde(default)]
    pub holes: Vec<Vec<Position>>,
    #[serde(default)]
    pub category: AreaCategory,
    /// Defaults to the polygon's own area
    pub original_area: Option<f64>,
}

/// Contents of a feature file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InputFeatures {
    pub places: Vec<PlaceInput>,
    pub segments: Vec<SegmentInput>,
    pub areas: Vec<AreaInput>,
}

impl InputFeatures {
    pub fn parse(text: &str) -> Result<Self, InputError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn into_features(self) -> Result<Vec<Feature>, InputError> {
        let mut features = Vec::with_capacity(self.places.len() + self.segments.len() + self.areas.len());

        for p in self.places {
            let [x, y] = p.position;
            features.push(
                Place::new(feature_id(FeatureKind::Place, p.id), p.name, Coord { x, y }, p.category)
                    .with_icon(p.icon)
                    .into(),
            );
        }

        for s in self.segments {
            let segment = Segment::new(
                feature_id(FeatureKind::Segment, s.id),
                s.name,
                LineString::new(coords(&s.coordinates)),
                s.category,
            )
            .map_err(|source| InputError::Feature {
                kind: FeatureKind::Segment,
                id: s.id,
                source,
            })?;
            features.push(segment.into());
        }

        for a in self.areas {
            let id = feature_id(FeatureKind::Area, a.id);
            let polygon = Polygon::new(
                LineString::new(coords(&a.outer)),
                a.holes.iter().map(|h| LineString::new(coords(h))).collect(),
            );
            let area = match a.original_area {
                Some(original) => Area::new(id, a.name, polygon, a.category, original),
                None => Area::measured(id, a.name, polygon, a.category),
            }
            .map_err(|source| InputError::Feature {
                kind: FeatureKind::Area,
                id: a.id,
                source,
            })?;
            features.push(area.into());
        }

        Ok(features)
    }
}

/// Read and convert a feature file.
pub fn load_features(path: &Path) -> Result<Vec<Feature>, InputError> {
    let text = std::fs::read_to_string(path).map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let features = InputFeatures::parse(&text)?.into_features()?;
    tracing::info!("Loaded {} features from {}", features.len(), path.display());
    Ok(features)
}
