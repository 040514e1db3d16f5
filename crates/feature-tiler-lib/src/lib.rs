//! # Feature Tiler Library
//!
//! Compiles geographic vector features (places, line segments and areas)
//! into a multi-resolution tiled representation suitable for rendering and
//! querying.
//!
//! ## Architecture
//!
//! - **Geometry**: clipping of lines and polygons against lat/lon boxes
//! - **Simplification**: Ramer-Douglas-Peucker with keep flags and tile edge preservation
//! - **Features**: `Place`, `Segment` and `Area` variants with typed categories
//! - **Filters**: composable retention predicates (or/and/not)
//! - **Combiner**: union-find grouping of compatible segments and areas
//! - **Tiles**: TMS addressing with packed 64-bit ids
//! - **Codec**: compact protobuf wire format with side tables for names and icons
//! - **Storage**: key/blob stores and the tiled feature store built on them
//! - **Compilation**: concurrent per-zoom compile and clean passes plus the
//!   cascading multi-level orchestrator
//!
//! ## Example
//!
//! ```
//! use feature_tiler_lib::{
//!     CompoundFilter, FeatureSimplifier, MemoryFeatureSource, TiledFeatureSource,
//!     TiledFeatureTask, TiledStore, ZoomLevelTask,
//! };
//! use geo::{Coord, Rect};
//!
//! let area = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 10.0, y: 10.0 });
//! let master = MemoryFeatureSource::new(Vec::new());
//! let store = TiledStore::in_memory();
//! let levels = vec![
//!     ZoomLevelTask::new(6, CompoundFilter::keep_all(), FeatureSimplifier::PassThrough),
//!     ZoomLevelTask::new(4, CompoundFilter::keep_none(), FeatureSimplifier::PassThrough),
//! ];
//! let task = TiledFeatureTask::new(&master, &store, &store, area, levels).unwrap();
//! task.start(2).unwrap();
//! assert_eq!(store.meta().unwrap().unwrap().zoom_levels, vec![6, 4]);
//! ```

mod codec;
mod combine;
mod compile;
mod feature;
mod filter;
mod geometry;
mod meta;
mod side_data;
mod simplify;
mod store;
mod tile;

pub use codec::{
    BinaryArea, BinaryCoordinate, BinaryFeature, BinaryPlace, BinarySegment, FeatureReader,
    FeatureWriter, binary_feature, decode_features, encode_features,
};
pub use combine::{CombineStrategy, DefaultCombineStrategy, FeatureCombiner};
pub use compile::{CancellationToken, CompileConfig, Stage, TiledFeatureTask, ZoomLevelTask};
pub use feature::{
    Area, AreaCategory, Feature, FeatureKind, Place, PlaceCategory, Segment, SegmentCategory,
    feature_id,
};
pub use filter::{CompoundFilter, FeatureFilter};
pub use geometry::{clip_line, clip_polygon, contains_point, contains_rect, intersects_rect};
pub use meta::TiledSourceMeta;
pub use side_data::{IMAGE_TABLE, STRING_TABLE, SideData, Table, TableValue};
pub use simplify::{FeatureSimplifier, MinimumCount, simplify, simplify_with};
pub use store::{
    BlobStore, DirectoryBlobStore, FeatureProvider, FeatureSource, MemoryBlobStore,
    MemoryFeatureSource, TiledFeatureSource, TiledFeatureTarget, TiledStore,
};
pub use tile::{
    DEFAULT_ZOOM, LATITUDE_LIMIT, LONGITUDE_LIMIT, MAX_ZOOM, MIN_ZOOM, Tile, TileSource,
    TmsTileSource,
};

/// Error types for feature compilation
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Zoom {zoom} outside supported range [{min}, {max}]")]
    ZoomOutOfRange { zoom: u8, min: u8, max: u8 },

    #[error("Feature source failed to open an independent handle: {0}")]
    SourceOpen(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Encode error: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Side data table '{0}' registered twice")]
    DuplicateTable(String),

    #[error("Side data table '{0}' not found")]
    MissingTable(String),

    #[error("Compilation cancelled")]
    Cancelled,

    #[error("Worker thread panicked")]
    WorkerPanicked,

    #[error("Zoom level {zoom} failed during {stage}: {source}")]
    Level {
        zoom: u8,
        stage: Stage,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True when this error, or the error a failed level wraps, is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Level { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify key types are accessible
        let _ = CompileConfig::default();
        let _ = TmsTileSource;
        let _ = SideData::new();
        let _ = CompoundFilter::keep_all();
    }

    #[test]
    fn test_level_error_reports_zoom_and_stage() {
        let err = Error::Level {
            zoom: 8,
            stage: Stage::Clean,
            source: Box::new(Error::Cancelled),
        };
        assert_eq!(
            err.to_string(),
            "Zoom level 8 failed during clean: Compilation cancelled"
        );
        assert!(err.is_cancelled());
    }
}
