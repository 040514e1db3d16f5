//! Geographic features: places, segments and areas
//!
//! Coordinates are `geo::Coord` with `x` = longitude and `y` = latitude in
//! degrees. Features are immutable once built; clipping, simplification and
//! combination always produce new features.

use geo::{Area as _, BooleanOps, Coord, Intersects, LineString, MultiPolygon, Polygon, Rect};
use uuid::Uuid;

use crate::geometry::{bounding_rect, clip_line, clip_polygon, contains_point};
use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Endpoints closer than this (in degrees, per axis) are treated as shared.
pub(crate) const COINCIDENT_EPSILON: f64 = 1e-9;

macro_rules! root_category {
    ($(#[$meta:meta])* $name:ident { $($variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
        #[repr(i32)]
        pub enum $name {
            #[default]
            $($variant),+
        }

        impl $name {
            /// Every category in wire-code order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Integer code used on the wire.
            #[inline]
            pub fn code(self) -> i32 {
                self as i32
            }

            /// Category for a wire code; unknown codes map to `Invalid`.
            pub fn from_code(code: i32) -> Self {
                usize::try_from(code)
                    .ok()
                    .and_then(|i| Self::ALL.get(i))
                    .copied()
                    .unwrap_or_default()
            }
        }
    };
}

root_category! {
    /// Root category of a line segment
    SegmentCategory {
        Invalid,
        UnknownStreet,
        Freeway,
        FreewayLink,
        MajorHighway,
        MajorHighwayLink,
        MinorHighway,
        MinorHighwayLink,
        PrimaryStreet,
        PrimaryStreetLink,
        SecondaryStreet,
        SecondaryStreetLink,
        ResidentialStreet,
        UnclassifiedStreet,
        PedestrianSharedStreet,
        ServiceStreet,
    }
}

root_category! {
    /// Root category of an area
    AreaCategory {
        Invalid,
        Park,
        Water,
        Forest,
        Farmland,
        Grassland,
        ResidentialZone,
        CommercialZone,
        RetailZone,
        IndustrialZone,
        MilitaryZone,
        Building,
        Tile,
    }
}

root_category! {
    /// Root category of a place
    PlaceCategory {
        Invalid,
        FoodAndDrink,
        Entertainment,
        Nature,
        Shopping,
        Transport,
        Accommodation,
        Services,
        Parking,
        Petrol,
        Emergency,
        City,
        Borough,
        Suburb,
        Quarter,
        Neighbourhood,
        Town,
        Village,
        Hamlet,
    }
}

impl SegmentCategory {
    /// True for ramps and slip roads joining two classified roads.
    pub fn is_link(self) -> bool {
        matches!(
            self,
            SegmentCategory::FreewayLink
                | SegmentCategory::MajorHighwayLink
                | SegmentCategory::MinorHighwayLink
                | SegmentCategory::PrimaryStreetLink
                | SegmentCategory::SecondaryStreetLink
        )
    }
}

/// Feature variant discriminator. The values match the wire tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FeatureKind {
    Segment = 4,
    Area = 5,
    Place = 6,
}

/// Derive a stable 128-bit id from a source-specific integer id.
///
/// The kind byte keeps equal integer ids of different kinds (e.g. an OSM node
/// and way sharing a number) from colliding.
pub fn feature_id(kind: FeatureKind, id: i64) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&id.to_le_bytes());
    bytes[8] = kind as u8;
    Uuid::from_bytes(bytes)
}

#[inline]
pub(crate) fn coincident(a: Coord<f64>, b: Coord<f64>) -> bool {
    (a.x - b.x).abs() <= COINCIDENT_EPSILON && (a.y - b.y).abs() <= COINCIDENT_EPSILON
}

/// Id shared by every member, or a fresh one when members differ.
fn merged_id<'a>(mut ids: impl Iterator<Item = &'a Uuid>) -> Uuid {
    match ids.next() {
        Some(first) if ids.all(|id| id == first) => *first,
        _ => Uuid::new_v4(),
    }
}

/// A point feature
#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    pub id: Uuid,
    pub name: String,
    pub coordinate: Coord<f64>,
    pub category: PlaceCategory,
    /// Encoded icon image, empty when the place has none
    pub icon: Vec<u8>,
}

impl Place {
    pub fn new(id: Uuid, name: impl Into<String>, coordinate: Coord<f64>, category: PlaceCategory) -> Self {
        Self {
            id,
            name: name.into(),
            coordinate,
            category,
            icon: Vec::new(),
        }
    }

    pub fn with_icon(mut self, icon: Vec<u8>) -> Self {
        self.icon = icon;
        self
    }
}

/// An open polyline feature
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub id: Uuid,
    pub name: String,
    pub line: LineString<f64>,
    pub category: SegmentCategory,
}

impl Segment {
    /// Create a segment, rejecting an empty coordinate list.
    pub fn new(
        id: Uuid,
        name: impl Into<String>,
        line: LineString<f64>,
        category: SegmentCategory,
    ) -> Result<Self> {
        if line.0.is_empty() {
            return Err(Error::InvalidGeometry(
                "segment requires at least one coordinate".to_string(),
            ));
        }
        Ok(Self {
            id,
            name: name.into(),
            line,
            category,
        })
    }

    /// Attribute check only; says nothing about whether the geometry chains.
    pub fn could_combine(&self, other: &Segment) -> bool {
        self.category == other.category && self.name == other.name
    }

    /// True if an endpoint of one coincides with an endpoint of the other.
    pub fn touches(&self, other: &Segment) -> bool {
        let ends = |s: &Segment| [s.line.0.first().copied(), s.line.0.last().copied()];
        ends(self)
            .into_iter()
            .flatten()
            .any(|a| ends(other).into_iter().flatten().any(|b| coincident(a, b)))
    }

    /// Chain segments sharing endpoints into as few line strips as possible.
    ///
    /// Merged segments take the first segment's name and category. When
    /// nothing chains the inputs are returned as they are.
    pub fn combine(segments: &[Segment]) -> Vec<Segment> {
        if segments.len() < 2 {
            return segments.to_vec();
        }

        let chains = chain_lines(segments.iter().map(|s| s.line.0.clone()).collect());
        if chains.len() == segments.len() {
            return segments.to_vec();
        }

        let first = &segments[0];
        let id = merged_id(segments.iter().map(|s| &s.id));
        chains
            .into_iter()
            .map(|coords| Segment {
                id,
                name: first.name.clone(),
                line: LineString::new(coords),
                category: first.category,
            })
            .collect()
    }
}

/// Greedily join coordinate runs end to end, reversing runs where needed.
fn chain_lines(lines: Vec<Vec<Coord<f64>>>) -> Vec<Vec<Coord<f64>>> {
    let mut remaining: Vec<Option<Vec<Coord<f64>>>> = lines.into_iter().map(Some).collect();
    let mut chains = Vec::new();

    for start in 0..remaining.len() {
        let Some(mut chain) = remaining[start].take() else {
            continue;
        };

        loop {
            let mut extended = false;
            for slot in remaining.iter_mut() {
                let Some(other) = slot.as_ref() else { continue };
                let (Some(&head), Some(&tail)) = (chain.first(), chain.last()) else {
                    break;
                };
                let (Some(&other_head), Some(&other_tail)) = (other.first(), other.last()) else {
                    *slot = None;
                    continue;
                };

                if coincident(tail, other_head) {
                    chain.extend_from_slice(&other[1..]);
                } else if coincident(tail, other_tail) {
                    chain.extend(other.iter().rev().skip(1));
                } else if coincident(head, other_tail) {
                    let mut joined = other[..other.len() - 1].to_vec();
                    joined.append(&mut chain);
                    chain = joined;
                } else if coincident(head, other_head) {
                    let mut joined: Vec<_> = other.iter().rev().copied().collect();
                    joined.pop();
                    joined.append(&mut chain);
                    chain = joined;
                } else {
                    continue;
                }
                *slot = None;
                extended = true;
            }
            if !extended {
                break;
            }
        }

        chains.push(chain);
    }

    chains
}

/// A polygon feature with optional holes
#[derive(Debug, Clone, PartialEq)]
pub struct Area {
    pub id: Uuid,
    pub name: String,
    pub polygon: Polygon<f64>,
    pub category: AreaCategory,
    /// Area of the feature before any clipping or simplification, used to
    /// rank areas at coarse zooms
    pub original_area: f64,
}

impl Area {
    /// Create an area, rejecting an empty outer ring.
    pub fn new(
        id: Uuid,
        name: impl Into<String>,
        polygon: Polygon<f64>,
        category: AreaCategory,
        original_area: f64,
    ) -> Result<Self> {
        if polygon.exterior().0.is_empty() {
            return Err(Error::InvalidGeometry(
                "area requires an outer ring".to_string(),
            ));
        }
        Ok(Self {
            id,
            name: name.into(),
            polygon,
            category,
            original_area,
        })
    }

    /// Create an area whose original area is its current planar area.
    pub fn measured(
        id: Uuid,
        name: impl Into<String>,
        polygon: Polygon<f64>,
        category: AreaCategory,
    ) -> Result<Self> {
        let original_area = polygon.unsigned_area();
        Self::new(id, name, polygon, category, original_area)
    }

    /// Attribute check only; says nothing about whether the polygons touch.
    pub fn could_combine(&self, other: &Area) -> bool {
        self.category == other.category && self.name == other.name
    }

    pub fn bounds(&self) -> Option<Rect<f64>> {
        bounding_rect(&self.polygon.exterior().0)
    }

    /// Union overlapping or touching areas.
    ///
    /// Each output's original area is the sum of its inputs' original areas,
    /// each weighted by the share of the output it makes up. When the union
    /// merges nothing the inputs are returned as they are.
    pub fn combine(areas: &[Area]) -> Vec<Area> {
        if areas.len() < 2 {
            return areas.to_vec();
        }

        let merged = areas[1..].iter().fold(
            MultiPolygon::new(vec![areas[0].polygon.clone()]),
            |acc, area| acc.union(&MultiPolygon::new(vec![area.polygon.clone()])),
        );
        let polygons = merged.0;
        if polygons.is_empty() || polygons.len() >= areas.len() {
            return areas.to_vec();
        }

        let sizes: Vec<f64> = polygons.iter().map(|p| p.unsigned_area()).collect();
        let mut original = vec![0.0; polygons.len()];
        for area in areas {
            let index = polygons
                .iter()
                .position(|p| p.intersects(&area.polygon))
                .unwrap_or(0);
            let factor = if sizes[index] > 0.0 {
                area.polygon.unsigned_area() / sizes[index]
            } else {
                1.0
            };
            original[index] += area.original_area * factor;
        }

        let first = &areas[0];
        let id = merged_id(areas.iter().map(|a| &a.id));
        polygons
            .into_iter()
            .zip(original)
            .map(|(polygon, original_area)| Area {
                id,
                name: first.name.clone(),
                polygon,
                category: first.category,
                original_area,
            })
            .collect()
    }
}

/// A feature of any kind
#[derive(Debug, Clone, PartialEq)]
pub enum Feature {
    Place(Place),
    Segment(Segment),
    Area(Area),
}

impl Feature {
    #[inline]
    pub fn id(&self) -> Uuid {
        match self {
            Feature::Place(p) => p.id,
            Feature::Segment(s) => s.id,
            Feature::Area(a) => a.id,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        match self {
            Feature::Place(p) => &p.name,
            Feature::Segment(s) => &s.name,
            Feature::Area(a) => &a.name,
        }
    }

    #[inline]
    pub fn kind(&self) -> FeatureKind {
        match self {
            Feature::Place(_) => FeatureKind::Place,
            Feature::Segment(_) => FeatureKind::Segment,
            Feature::Area(_) => FeatureKind::Area,
        }
    }

    /// Bounding box of the feature geometry.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        match self {
            Feature::Place(p) => Some(Rect::new(p.coordinate, p.coordinate)),
            Feature::Segment(s) => bounding_rect(&s.line.0),
            Feature::Area(a) => a.bounds(),
        }
    }

    /// Every coordinate of the feature; area holes included.
    pub fn coordinates(&self) -> Box<dyn Iterator<Item = Coord<f64>> + '_> {
        match self {
            Feature::Place(p) => Box::new(std::iter::once(p.coordinate)),
            Feature::Segment(s) => Box::new(s.line.0.iter().copied()),
            Feature::Area(a) => Box::new(
                a.polygon
                    .exterior()
                    .0
                    .iter()
                    .chain(a.polygon.interiors().iter().flat_map(|h| h.0.iter()))
                    .copied(),
            ),
        }
    }

    /// Clip the feature to a box. Segments may split into several pieces
    /// sharing the original id; anything fully outside disappears.
    pub fn clip_to(&self, bounds: &Rect<f64>) -> Vec<Feature> {
        match self {
            Feature::Place(p) => {
                if contains_point(bounds, p.coordinate) {
                    vec![self.clone()]
                } else {
                    Vec::new()
                }
            }
            Feature::Segment(s) => clip_line(bounds, &s.line)
                .into_iter()
                .map(|line| {
                    Feature::Segment(Segment {
                        line,
                        ..s.clone()
                    })
                })
                .collect(),
            Feature::Area(a) => clip_polygon(bounds, &a.polygon)
                .map(|polygon| Feature::Area(Area { polygon, ..a.clone() }))
                .into_iter()
                .collect(),
        }
    }
}

impl From<Place> for Feature {
    fn from(place: Place) -> Self {
        Feature::Place(place)
    }
}

impl From<Segment> for Feature {
    fn from(segment: Segment) -> Self {
        Feature::Segment(segment)
    }
}

impl From<Area> for Feature {
    fn from(area: Area) -> Self {
        Feature::Area(area)
    }
}

/// Clip every feature to the box.
pub(crate) fn clip_all(features: &[Feature], bounds: &Rect<f64>) -> Vec<Feature> {
    features.iter().flat_map(|f| f.clip_to(bounds)).collect()
}
