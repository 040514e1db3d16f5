//! Ramer-Douglas-Peucker simplification
//!
//! Distances are planar, in degrees. A tolerance of zero (or less) leaves the
//! input untouched; larger tolerances never produce more points.

use std::collections::HashMap;

use geo::{Coord, LineString, Polygon, Rect};

use crate::feature::{Area, Feature, Segment};
use crate::geometry::{distance_to_edge, segment_distance};
use crate::tile::Tile;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Vertices this close to a tile edge are never dropped.
const EDGE_PRESERVATION_THRESHOLD: f64 = 1e-5;

/// Smallest result a simplification may produce for a given geometry shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinimumCount {
    /// Bare coordinate list (1)
    Coordinates,
    /// Open line strip (2, or 5 for closed strips with more than 3 points)
    LineStrip,
    /// Closed polygon ring including the closing point (4)
    Polygon,
}

impl MinimumCount {
    fn for_coordinates(self, coords: &[Coord<f64>]) -> usize {
        let minimum = match self {
            MinimumCount::Coordinates => 1,
            MinimumCount::LineStrip => {
                let closed = coords.len() > 3 && coords.first() == coords.last();
                if closed { 5 } else { 2 }
            }
            MinimumCount::Polygon => 4,
        };
        minimum.min(coords.len())
    }
}

/// Simplify a coordinate sequence, always keeping both endpoints.
pub fn simplify(coords: &[Coord<f64>], tolerance: f64) -> Vec<Coord<f64>> {
    simplify_with(coords, tolerance, None, MinimumCount::Coordinates)
}

/// Simplify with per-coordinate keep flags and a minimum result size.
///
/// Points dropped by the distance test are restored, most recently dropped
/// first, until the minimum is met. A final pass removes interior points
/// that coincide with their predecessor.
pub fn simplify_with(
    coords: &[Coord<f64>],
    tolerance: f64,
    keep: Option<&[bool]>,
    minimum: MinimumCount,
) -> Vec<Coord<f64>> {
    let count = coords.len();
    if tolerance <= 0.0 || count < 3 {
        return coords.to_vec();
    }

    let mut discard = vec![false; count];
    let mut order = Vec::new();

    // explicit stack, left halves first
    let mut ranges = vec![(0usize, count - 1)];
    while let Some((start, end)) = ranges.pop() {
        if end <= start + 1 {
            continue;
        }
        let (a, b) = (coords[start], coords[end]);
        let (mut max_distance, mut max_index) = (0.0, start);
        for (i, c) in coords.iter().enumerate().take(end).skip(start + 1) {
            let d = segment_distance(*c, a, b);
            if d > max_distance {
                max_distance = d;
                max_index = i;
            }
        }

        if max_distance > tolerance {
            ranges.push((max_index, end));
            ranges.push((start, max_index));
        } else {
            for i in start + 1..end {
                discard[i] = true;
                order.push(i);
            }
        }
    }

    if let Some(keep) = keep {
        for (flag, &kept) in discard.iter_mut().zip(keep) {
            if kept {
                *flag = false;
            }
        }
    }

    let minimum = minimum.for_coordinates(coords);
    let mut kept = discard.iter().filter(|d| !**d).count();
    for &i in order.iter().rev() {
        if kept >= minimum {
            break;
        }
        if discard[i] {
            discard[i] = false;
            kept += 1;
        }
    }

    let mut result: Vec<Coord<f64>> = coords
        .iter()
        .zip(&discard)
        .filter(|(_, d)| !**d)
        .map(|(c, _)| *c)
        .collect();

    if result.len() > 2 && result.len() > minimum {
        let mut removable = result.len() - minimum;
        let mut deduped = Vec::with_capacity(result.len());
        deduped.push(result[0]);
        for i in 1..result.len() - 1 {
            let (prev, c) = (result[i - 1], result[i]);
            if removable > 0 && (c.x - prev.x).hypot(c.y - prev.y) < f64::EPSILON {
                removable -= 1;
                continue;
            }
            deduped.push(c);
        }
        deduped.push(result[result.len() - 1]);
        result = deduped;
    }

    result
}

/// Strategy for reducing feature geometry within a tile.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FeatureSimplifier {
    /// Keep every vertex
    #[default]
    PassThrough,
    /// Fixed tolerance in degrees
    Fixed(f64),
    /// Tolerance as a fraction of the tile width
    TileFraction(f64),
}

impl FeatureSimplifier {
    /// Tolerance in degrees used inside `tile`.
    pub fn tolerance_for(&self, tile: &Tile) -> f64 {
        match *self {
            FeatureSimplifier::PassThrough => 0.0,
            FeatureSimplifier::Fixed(tolerance) => tolerance,
            FeatureSimplifier::TileFraction(fraction) => tile.bounds().width() * fraction,
        }
    }

    /// Simplify every feature of one tile.
    ///
    /// Vertices shared with another feature in the list are kept so that
    /// junctions survive; area vertices on the tile boundary are kept so that
    /// neighbouring tiles still line up.
    pub fn simplify(&self, features: &[Feature], tile: &Tile) -> Vec<Feature> {
        let tolerance = self.tolerance_for(tile);
        if tolerance <= 0.0 {
            return features.to_vec();
        }

        let owners = shared_coordinates(features);
        let bounds = tile.bounds();
        features
            .iter()
            .enumerate()
            .map(|(index, feature)| {
                let connected = |c: &Coord<f64>| {
                    matches!(owners.get(&coordinate_key(*c)), Some(Owner::Shared))
                        || matches!(owners.get(&coordinate_key(*c)), Some(Owner::Single(o)) if *o != index)
                };
                match feature {
                    Feature::Place(_) => feature.clone(),
                    Feature::Segment(s) => {
                        let keep: Vec<bool> = s.line.0.iter().map(connected).collect();
                        let coords = simplify_with(&s.line.0, tolerance, Some(&keep), MinimumCount::LineStrip);
                        Feature::Segment(Segment {
                            line: LineString::new(coords),
                            ..s.clone()
                        })
                    }
                    Feature::Area(a) => {
                        let ring = |r: &LineString<f64>| {
                            let keep: Vec<bool> = r
                                .0
                                .iter()
                                .map(|c| connected(c) || on_edge(&bounds, *c))
                                .collect();
                            LineString::new(simplify_with(&r.0, tolerance, Some(&keep), MinimumCount::Polygon))
                        };
                        let polygon = Polygon::new(
                            ring(a.polygon.exterior()),
                            a.polygon.interiors().iter().map(ring).collect(),
                        );
                        Feature::Area(Area { polygon, ..a.clone() })
                    }
                }
            })
            .collect()
    }
}

#[inline]
fn on_edge(bounds: &Rect<f64>, c: Coord<f64>) -> bool {
    distance_to_edge(bounds, c) <= EDGE_PRESERVATION_THRESHOLD
}

enum Owner {
    Single(usize),
    Shared,
}

#[inline]
fn coordinate_key(c: Coord<f64>) -> (u64, u64) {
    (c.x.to_bits(), c.y.to_bits())
}

/// Which feature owns each coordinate, or whether several features share it.
fn shared_coordinates(features: &[Feature]) -> HashMap<(u64, u64), Owner> {
    let mut owners = HashMap::new();
    for (index, feature) in features.iter().enumerate() {
        for c in feature.coordinates() {
            owners
                .entry(coordinate_key(c))
                .and_modify(|owner| {
                    if matches!(owner, Owner::Single(o) if *o != index) {
                        *owner = Owner::Shared;
                    }
                })
                .or_insert(Owner::Single(index));
        }
    }
    owners
}
