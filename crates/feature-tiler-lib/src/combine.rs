//! Feature combination
//!
//! Compatible segments and areas inside one tile are grouped with a
//! union-find over a pairwise "can combine" relation, then each group is
//! merged geometrically. Places never combine.

use std::collections::HashMap;
use std::sync::Arc;

use rayon::prelude::*;

use crate::feature::{Area, Feature, Segment};
use crate::geometry::intersects_rect;

/// Decides which pairs of features may be merged.
pub trait CombineStrategy: Send + Sync {
    fn segments_combine(&self, a: &Segment, b: &Segment) -> bool;

    fn areas_combine(&self, a: &Area, b: &Area) -> bool;
}

impl<S: CombineStrategy + ?Sized> CombineStrategy for Arc<S> {
    fn segments_combine(&self, a: &Segment, b: &Segment) -> bool {
        (**self).segments_combine(a, b)
    }

    fn areas_combine(&self, a: &Area, b: &Area) -> bool {
        (**self).areas_combine(a, b)
    }
}

/// Same category and name, plus a shared endpoint (segments) or overlapping
/// bounds (areas).
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCombineStrategy;

impl CombineStrategy for DefaultCombineStrategy {
    fn segments_combine(&self, a: &Segment, b: &Segment) -> bool {
        a.could_combine(b) && a.touches(b)
    }

    fn areas_combine(&self, a: &Area, b: &Area) -> bool {
        if !a.could_combine(b) {
            return false;
        }
        match (a.bounds(), b.bounds()) {
            (Some(x), Some(y)) => intersects_rect(&x, &y),
            _ => false,
        }
    }
}

/// Disjoint sets with path halving and union by size.
struct DisjointSet {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSet {
    fn new(count: usize) -> Self {
        Self {
            parent: (0..count).collect(),
            size: vec![1; count],
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (mut a, mut b) = (self.find(a), self.find(b));
        if a == b {
            return;
        }
        if self.size[a] < self.size[b] {
            std::mem::swap(&mut a, &mut b);
        }
        self.parent[b] = a;
        self.size[a] += self.size[b];
    }
}

/// Group `0..count` by the transitive closure of `related`. Groups are
/// ordered by their smallest member and members ascend.
fn group_by<F>(count: usize, related: F) -> Vec<Vec<usize>>
where
    F: Fn(usize, usize) -> bool + Sync,
{
    let related = &related;
    let pairs: Vec<(usize, usize)> = (0..count)
        .into_par_iter()
        .flat_map_iter(move |i| (i + 1..count).filter(move |&j| related(i, j)).map(move |j| (i, j)))
        .collect();

    let mut sets = DisjointSet::new(count);
    for (a, b) in pairs {
        sets.union(a, b);
    }

    let mut position: HashMap<usize, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for i in 0..count {
        let root = sets.find(i);
        let slot = *position.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(i);
    }
    groups
}

/// Merges compatible features into fewer, larger ones.
#[derive(Debug, Clone, Default)]
pub struct FeatureCombiner<S = DefaultCombineStrategy> {
    strategy: S,
}

impl FeatureCombiner {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: CombineStrategy> FeatureCombiner<S> {
    pub fn with_strategy(strategy: S) -> Self {
        Self { strategy }
    }

    /// Indices of `features` that end up in the same group. Places are
    /// always singletons.
    pub fn groups(&self, features: &[Feature]) -> Vec<Vec<usize>> {
        let (places, segments, areas) = partition(features);

        let mut groups: Vec<Vec<usize>> = places.iter().map(|(i, _)| vec![*i]).collect();
        groups.extend(
            group_by(segments.len(), |a, b| {
                self.strategy.segments_combine(segments[a].1, segments[b].1)
            })
            .into_iter()
            .map(|g| g.into_iter().map(|k| segments[k].0).collect()),
        );
        groups.extend(
            group_by(areas.len(), |a, b| self.strategy.areas_combine(areas[a].1, areas[b].1))
                .into_iter()
                .map(|g| g.into_iter().map(|k| areas[k].0).collect()),
        );
        groups
    }

    /// Combine features. The result is never longer than the input; places
    /// come first, then segments, then areas.
    pub fn combine(&self, features: &[Feature]) -> Vec<Feature> {
        #[cfg(feature = "profiling")]
        profiling::scope!("FeatureCombiner::combine");

        let (places, segments, areas) = partition(features);
        let mut combined: Vec<Feature> = places.into_iter().map(|(_, p)| p.clone()).collect();

        for group in group_by(segments.len(), |a, b| {
            self.strategy.segments_combine(segments[a].1, segments[b].1)
        }) {
            if let [single] = group[..] {
                combined.push(Feature::Segment(segments[single].1.clone()));
                continue;
            }
            let members: Vec<Segment> = group.iter().map(|&k| segments[k].1.clone()).collect();
            combined.extend(Segment::combine(&members).into_iter().map(Feature::Segment));
        }

        for group in group_by(areas.len(), |a, b| self.strategy.areas_combine(areas[a].1, areas[b].1)) {
            if let [single] = group[..] {
                combined.push(Feature::Area(areas[single].1.clone()));
                continue;
            }
            let members: Vec<Area> = group.iter().map(|&k| areas[k].1.clone()).collect();
            combined.extend(Area::combine(&members).into_iter().map(Feature::Area));
        }

        combined
    }
}

type Indexed<'a, T> = Vec<(usize, &'a T)>;

fn partition(features: &[Feature]) -> (Indexed<'_, Feature>, Indexed<'_, Segment>, Indexed<'_, Area>) {
    let mut places = Vec::new();
    let mut segments = Vec::new();
    let mut areas = Vec::new();
    for (i, feature) in features.iter().enumerate() {
        match feature {
            Feature::Place(_) => places.push((i, feature)),
            Feature::Segment(s) => segments.push((i, s)),
            Feature::Area(a) => areas.push((i, a)),
        }
    }
    (places, segments, areas)
}
