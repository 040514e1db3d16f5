//! Feature retention filters
//!
//! A [`FeatureFilter`] is a predicate tree over features. A
//! [`CompoundFilter`] routes each feature kind to its own predicate, and two
//! compound filters OR together component by component, which is how zoom
//! levels cascade their retention rules.

use std::collections::HashSet;
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};
use std::sync::Arc;

use crate::feature::{AreaCategory, Feature, PlaceCategory, SegmentCategory};

/// Predicate deciding whether a feature is retained
#[derive(Clone)]
pub enum FeatureFilter {
    KeepAll,
    KeepNone,
    /// Places whose category is in the set
    PlaceCategories(HashSet<PlaceCategory>),
    /// Segments whose category is in the set
    SegmentCategories(HashSet<SegmentCategory>),
    /// Areas whose category is in the set
    AreaCategories(HashSet<AreaCategory>),
    /// Areas whose original area is at least the given size
    MinOriginalArea(f64),
    Or(Box<FeatureFilter>, Box<FeatureFilter>),
    And(Box<FeatureFilter>, Box<FeatureFilter>),
    Not(Box<FeatureFilter>),
    /// Caller supplied predicate
    Custom(Arc<dyn Fn(&Feature) -> bool + Send + Sync>),
}

impl FeatureFilter {
    pub fn place_categories(categories: impl IntoIterator<Item = PlaceCategory>) -> Self {
        FeatureFilter::PlaceCategories(categories.into_iter().collect())
    }

    pub fn segment_categories(categories: impl IntoIterator<Item = SegmentCategory>) -> Self {
        FeatureFilter::SegmentCategories(categories.into_iter().collect())
    }

    pub fn area_categories(categories: impl IntoIterator<Item = AreaCategory>) -> Self {
        FeatureFilter::AreaCategories(categories.into_iter().collect())
    }

    pub fn custom(predicate: impl Fn(&Feature) -> bool + Send + Sync + 'static) -> Self {
        FeatureFilter::Custom(Arc::new(predicate))
    }

    pub fn matches(&self, feature: &Feature) -> bool {
        match self {
            FeatureFilter::KeepAll => true,
            FeatureFilter::KeepNone => false,
            FeatureFilter::PlaceCategories(set) => {
                matches!(feature, Feature::Place(p) if set.contains(&p.category))
            }
            FeatureFilter::SegmentCategories(set) => {
                matches!(feature, Feature::Segment(s) if set.contains(&s.category))
            }
            FeatureFilter::AreaCategories(set) => {
                matches!(feature, Feature::Area(a) if set.contains(&a.category))
            }
            FeatureFilter::MinOriginalArea(minimum) => {
                matches!(feature, Feature::Area(a) if a.original_area >= *minimum)
            }
            FeatureFilter::Or(a, b) => a.matches(feature) || b.matches(feature),
            FeatureFilter::And(a, b) => a.matches(feature) && b.matches(feature),
            FeatureFilter::Not(inner) => !inner.matches(feature),
            FeatureFilter::Custom(predicate) => predicate(feature),
        }
    }

    /// Retained features, in input order.
    pub fn filter(&self, features: &[Feature]) -> Vec<Feature> {
        features.iter().filter(|f| self.matches(f)).cloned().collect()
    }
}

impl fmt::Debug for FeatureFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureFilter::KeepAll => write!(f, "KeepAll"),
            FeatureFilter::KeepNone => write!(f, "KeepNone"),
            FeatureFilter::PlaceCategories(set) => f.debug_tuple("PlaceCategories").field(set).finish(),
            FeatureFilter::SegmentCategories(set) => f.debug_tuple("SegmentCategories").field(set).finish(),
            FeatureFilter::AreaCategories(set) => f.debug_tuple("AreaCategories").field(set).finish(),
            FeatureFilter::MinOriginalArea(min) => f.debug_tuple("MinOriginalArea").field(min).finish(),
            FeatureFilter::Or(a, b) => f.debug_tuple("Or").field(a).field(b).finish(),
            FeatureFilter::And(a, b) => f.debug_tuple("And").field(a).field(b).finish(),
            FeatureFilter::Not(inner) => f.debug_tuple("Not").field(inner).finish(),
            FeatureFilter::Custom(_) => write!(f, "Custom"),
        }
    }
}

impl BitOr for FeatureFilter {
    type Output = FeatureFilter;

    fn bitor(self, rhs: FeatureFilter) -> FeatureFilter {
        match (self, rhs) {
            (FeatureFilter::KeepAll, _) | (_, FeatureFilter::KeepAll) => FeatureFilter::KeepAll,
            (FeatureFilter::KeepNone, other) | (other, FeatureFilter::KeepNone) => other,
            (a, b) => FeatureFilter::Or(Box::new(a), Box::new(b)),
        }
    }
}

impl BitAnd for FeatureFilter {
    type Output = FeatureFilter;

    fn bitand(self, rhs: FeatureFilter) -> FeatureFilter {
        match (self, rhs) {
            (FeatureFilter::KeepNone, _) | (_, FeatureFilter::KeepNone) => FeatureFilter::KeepNone,
            (FeatureFilter::KeepAll, other) | (other, FeatureFilter::KeepAll) => other,
            (a, b) => FeatureFilter::And(Box::new(a), Box::new(b)),
        }
    }
}

impl Not for FeatureFilter {
    type Output = FeatureFilter;

    fn not(self) -> FeatureFilter {
        match self {
            FeatureFilter::KeepAll => FeatureFilter::KeepNone,
            FeatureFilter::KeepNone => FeatureFilter::KeepAll,
            FeatureFilter::Not(inner) => *inner,
            other => FeatureFilter::Not(Box::new(other)),
        }
    }
}

/// Per-kind filter: places, segments and areas each get their own predicate.
#[derive(Debug, Clone)]
pub struct CompoundFilter {
    pub place: FeatureFilter,
    pub segment: FeatureFilter,
    pub area: FeatureFilter,
}

impl CompoundFilter {
    pub fn new(place: FeatureFilter, segment: FeatureFilter, area: FeatureFilter) -> Self {
        Self {
            place,
            segment,
            area,
        }
    }

    pub fn keep_all() -> Self {
        Self::new(FeatureFilter::KeepAll, FeatureFilter::KeepAll, FeatureFilter::KeepAll)
    }

    pub fn keep_none() -> Self {
        Self::new(FeatureFilter::KeepNone, FeatureFilter::KeepNone, FeatureFilter::KeepNone)
    }

    pub fn matches(&self, feature: &Feature) -> bool {
        match feature {
            Feature::Place(_) => self.place.matches(feature),
            Feature::Segment(_) => self.segment.matches(feature),
            Feature::Area(_) => self.area.matches(feature),
        }
    }

    /// Retained features, in input order.
    pub fn filter(&self, features: &[Feature]) -> Vec<Feature> {
        features.iter().filter(|f| self.matches(f)).cloned().collect()
    }
}

impl Default for CompoundFilter {
    fn default() -> Self {
        Self::keep_all()
    }
}

impl BitOr for CompoundFilter {
    type Output = CompoundFilter;

    fn bitor(self, rhs: CompoundFilter) -> CompoundFilter {
        CompoundFilter {
            place: self.place | rhs.place,
            segment: self.segment | rhs.segment,
            area: self.area | rhs.area,
        }
    }
}
