//! Zoom level configuration file
//!
//! ```toml
//! [compile]
//! worker_count = 4
//!
//! [[levels]]
//! zoom = 14
//!
//! [[levels]]
//! zoom = 10
//! simplifier = { tile_fraction = 0.002 }
//! filter.places = { place_categories = ["City", "Town"] }
//! filter.segments = { segment_categories = ["Freeway", "MajorHighway"] }
//! filter.areas = { any_of = [{ area_categories = ["Water"] }, { min_original_area = 0.01 }] }
//! ```

use std::path::{Path, PathBuf};

use feature_tiler_lib::{
    AreaCategory, CompileConfig, CompoundFilter, FeatureFilter, FeatureSimplifier, PlaceCategory,
    SegmentCategory, ZoomLevelTask,
};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid level file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Level file defines no zoom levels")]
    NoLevels,
}

/// A retention rule, composable with `any_of`, `all_of` and `not`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterConfig {
    #[default]
    KeepAll,
    KeepNone,
    PlaceCategories(Vec<PlaceCategory>),
    SegmentCategories(Vec<SegmentCategory>),
    AreaCategories(Vec<AreaCategory>),
    MinOriginalArea(f64),
    AnyOf(Vec<FilterConfig>),
    AllOf(Vec<FilterConfig>),
    Not(Box<FilterConfig>),
}

impl FilterConfig {
    pub fn to_filter(&self) -> FeatureFilter {
        match self {
            FilterConfig::KeepAll => FeatureFilter::KeepAll,
            FilterConfig::KeepNone => FeatureFilter::KeepNone,
            FilterConfig::PlaceCategories(c) => FeatureFilter::place_categories(c.iter().copied()),
            FilterConfig::SegmentCategories(c) => FeatureFilter::segment_categories(c.iter().copied()),
            FilterConfig::AreaCategories(c) => FeatureFilter::area_categories(c.iter().copied()),
            FilterConfig::MinOriginalArea(min) => FeatureFilter::MinOriginalArea(*min),
            FilterConfig::AnyOf(all) => all
                .iter()
                .map(FilterConfig::to_filter)
                .fold(FeatureFilter::KeepNone, |acc, f| acc | f),
            FilterConfig::AllOf(all) => all
                .iter()
                .map(FilterConfig::to_filter)
                .fold(FeatureFilter::KeepAll, |acc, f| acc & f),
            FilterConfig::Not(inner) => !inner.to_filter(),
        }
    }
}

/// One rule per feature kind; omitted kinds keep everything.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LevelFilterConfig {
    pub places: FilterConfig,
    pub segments: FilterConfig,
    pub areas: FilterConfig,
}

impl LevelFilterConfig {
    pub fn to_filter(&self) -> CompoundFilter {
        CompoundFilter::new(
            self.places.to_filter(),
            self.segments.to_filter(),
            self.areas.to_filter(),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LevelConfig {
    pub zoom: u8,
    #[serde(default)]
    pub filter: LevelFilterConfig,
    #[serde(default)]
    pub simplifier: FeatureSimplifier,
}

impl LevelConfig {
    pub fn to_task(&self) -> ZoomLevelTask {
        ZoomLevelTask::new(self.zoom, self.filter.to_filter(), self.simplifier)
    }
}

/// Contents of a level file
#[derive(Debug, Clone, Deserialize)]
pub struct TilerConfig {
    #[serde(default)]
    pub compile: CompileConfig,
    pub levels: Vec<LevelConfig>,
}

impl TilerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: TilerConfig = toml::from_str(text)?;
        if config.levels.is_empty() {
            return Err(ConfigError::NoLevels);
        }
        Ok(config)
    }

    pub fn tasks(&self) -> Vec<ZoomLevelTask> {
        self.levels.iter().map(LevelConfig::to_task).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feature_tiler_lib::{Feature, FeatureKind, Place, Segment, feature_id};
    use geo::{Coord, LineString};

    const SAMPLE: &str = r#"
        [compile]
        worker_count = 3

        [[levels]]
        zoom = 14

        [[levels]]
        zoom = 10
        simplifier = { tile_fraction = 0.002 }
        filter.places = { place_categories = ["City", "Town"] }
        filter.segments = { not = { segment_categories = ["ServiceStreet"] } }
        filter.areas = { any_of = [{ area_categories = ["Water"] }, { min_original_area = 0.5 }] }
    "#;

    fn town(category: PlaceCategory) -> Feature {
        Place::new(feature_id(FeatureKind::Place, 1), "", Coord { x: 0.0, y: 0.0 }, category).into()
    }

    fn street(category: SegmentCategory) -> Feature {
        Segment::new(
            feature_id(FeatureKind::Segment, 1),
            "",
            LineString::from(vec![(0.0, 0.0), (1.0, 1.0)]),
            category,
        )
        .unwrap()
        .into()
    }

    #[test]
    fn test_parse_levels() {
        let config = TilerConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.compile.worker_count, 3);
        assert!(!config.compile.padded);
        assert_eq!(config.levels.len(), 2);
        assert_eq!(config.levels[0].simplifier, FeatureSimplifier::PassThrough);
        assert_eq!(config.levels[1].simplifier, FeatureSimplifier::TileFraction(0.002));

        let tasks = config.tasks();
        assert_eq!(tasks[1].zoom(), 10);
        let coarse = tasks[1].filter();
        assert!(coarse.matches(&town(PlaceCategory::Town)));
        assert!(!coarse.matches(&town(PlaceCategory::Hamlet)));
        assert!(coarse.matches(&street(SegmentCategory::Freeway)));
        assert!(!coarse.matches(&street(SegmentCategory::ServiceStreet)));

        // unspecified filters keep everything
        assert!(tasks[0].filter().matches(&town(PlaceCategory::Hamlet)));
    }

    #[test]
    fn test_all_of() {
        let filter = FilterConfig::AllOf(vec![
            FilterConfig::SegmentCategories(vec![SegmentCategory::Freeway, SegmentCategory::ServiceStreet]),
            FilterConfig::Not(Box::new(FilterConfig::SegmentCategories(vec![SegmentCategory::ServiceStreet]))),
        ])
        .to_filter();
        assert!(filter.matches(&street(SegmentCategory::Freeway)));
        assert!(!filter.matches(&street(SegmentCategory::ServiceStreet)));
    }

    #[test]
    fn test_rejects_empty_and_invalid_files() {
        assert!(matches!(TilerConfig::parse("levels = []"), Err(ConfigError::NoLevels)));
        assert!(matches!(
            TilerConfig::parse("[[levels]]\nzoom = \"high\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            TilerConfig::load(Path::new("/nonexistent/levels.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
