//! Feature sources, tiled targets and the blob stores behind them
//!
//! Compilation reads from a [`FeatureSource`] (the master data set, queried
//! by box) and writes to a [`TiledFeatureTarget`]. Coarser levels read back
//! finer ones through the [`TiledFeatureSource`] view of the same store.
//!
//! [`TiledStore`] implements both tiled traits on top of any [`BlobStore`].
//! Tiles live under `tiles/{zoom}/{id}`; side tables and metadata have keys
//! of their own.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use geo::Rect;
use tracing::debug;

use crate::codec::{decode_features, decode_side_data_into, encode_features, encode_side_data};
use crate::feature::Feature;
use crate::geometry::intersects_rect;
use crate::meta::TiledSourceMeta;
use crate::side_data::SideData;
use crate::tile::{Tile, TileSource, TmsTileSource};
use crate::{Error, Result};

const TILE_PREFIX: &str = "tiles/";
const SIDE_DATA_KEY: &str = "side_data";
const META_KEY: &str = "meta";

/// A queryable set of features, typically the full-resolution master data.
///
/// Each compile worker gets its own handle through [`FeatureSource::open`].
pub trait FeatureSource: Send {
    /// Every feature whose bounds intersect `bounds`.
    fn get(&self, bounds: &Rect<f64>) -> Result<Vec<Feature>>;

    /// An independent handle over the same data.
    fn open(&self) -> Result<Box<dyn FeatureSource>>;
}

/// Read access to compiled tiles.
pub trait TiledFeatureSource: Send + Sync {
    fn tile_source(&self) -> &dyn TileSource;

    /// Features stored for `tile`; empty when nothing was written.
    fn get(&self, tile: &Tile) -> Result<Vec<Feature>>;

    /// Metadata, present once a full compilation finished.
    fn meta(&self) -> Result<Option<TiledSourceMeta>>;

    fn open(&self) -> Result<Box<dyn TiledFeatureSource>>;
}

/// Write access to compiled tiles. Concurrent writes to distinct tiles
/// must be safe.
pub trait TiledFeatureTarget: Send + Sync {
    fn tile_source(&self) -> &dyn TileSource;

    /// Replace the contents of `tile`. An empty slice clears it.
    fn write(&self, tile: &Tile, features: &[Feature]) -> Result<()>;

    /// Persist anything still buffered.
    fn flush(&self) -> Result<()>;

    fn set_meta(&self, meta: TiledSourceMeta) -> Result<()>;

    /// Forget the metadata, marking the tile set as incomplete.
    fn clear_meta(&self) -> Result<()>;
}

/// Capability discovery for data sets that may or may not support tiling.
pub trait FeatureProvider {
    fn is_feature_source(&self) -> bool {
        false
    }

    fn is_tiled_source(&self) -> bool {
        false
    }

    fn is_tiled_target(&self) -> bool {
        false
    }

    fn as_feature_source(&self) -> Result<&dyn FeatureSource> {
        Err(Error::Unsupported("not a feature source".to_string()))
    }

    fn as_tiled_source(&self) -> Result<&dyn TiledFeatureSource> {
        Err(Error::Unsupported("not a tiled feature source".to_string()))
    }

    fn as_tiled_target(&self) -> Result<&dyn TiledFeatureTarget> {
        Err(Error::Unsupported("not a tiled feature target".to_string()))
    }
}

/// Flat key to bytes storage. Clones share the same backing data.
pub trait BlobStore: Send + Sync + Clone + 'static {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    fn clear(&self) -> Result<()>;

    /// Keys starting with `prefix`, sorted.
    fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Blob store held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.get(key).map(|b| b.value().clone()))
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.blobs.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.blobs.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.blobs.clear();
        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .blobs
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }
}

/// Blob store keeping one file per key below a root directory. Key
/// segments separated by `/` become subdirectories.
#[derive(Debug, Clone)]
pub struct DirectoryBlobStore {
    root: Arc<PathBuf>,
}

impl DirectoryBlobStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root: Arc::new(root) })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty() && relative.components().all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(Error::InvalidArgument(format!("invalid blob key '{key}'")));
        }
        Ok(self.root.join(relative))
    }

    fn collect_keys(&self, dir: &Path, keys: &mut Vec<String>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.collect_keys(&path, keys)?;
            } else if let Ok(relative) = path.strip_prefix(self.root.as_path()) {
                let key: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                keys.push(key.join("/"));
            }
        }
        Ok(())
    }
}

impl BlobStore for DirectoryBlobStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path(key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self) -> Result<()> {
        fs::remove_dir_all(self.root.as_path())?;
        fs::create_dir_all(self.root.as_path())?;
        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        self.collect_keys(&self.root, &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort_unstable();
        Ok(keys)
    }
}

/// Tiled features persisted in a [`BlobStore`], one encoded blob per tile.
///
/// Names and icons go to a shared [`SideData`] registry that is saved on
/// [`TiledFeatureTarget::flush`] and loaded again by [`TiledStore::new`].
#[derive(Debug, Clone)]
pub struct TiledStore<B: BlobStore> {
    blobs: B,
    side_data: SideData,
    tile_source: TmsTileSource,
}

impl TiledStore<MemoryBlobStore> {
    pub fn in_memory() -> Self {
        Self {
            blobs: MemoryBlobStore::new(),
            side_data: SideData::new(),
            tile_source: TmsTileSource,
        }
    }
}

impl<B: BlobStore> TiledStore<B> {
    /// Wrap a blob store, loading any side tables saved in it.
    pub fn new(blobs: B) -> Result<Self> {
        let side_data = SideData::new();
        if let Some(bytes) = blobs.read(SIDE_DATA_KEY)? {
            decode_side_data_into(&side_data, &bytes)?;
        }
        Ok(Self {
            blobs,
            side_data,
            tile_source: TmsTileSource,
        })
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    pub fn side_data(&self) -> &SideData {
        &self.side_data
    }

    fn tile_key(tile: &Tile) -> String {
        format!("{TILE_PREFIX}{:02}/{:016x}", tile.zoom(), tile.id())
    }

    /// Tiles holding data at `zoom`, in id order.
    pub fn tiles(&self, zoom: u8) -> Result<Vec<Tile>> {
        let prefix = format!("{TILE_PREFIX}{zoom:02}/");
        self.blobs
            .keys(&prefix)?
            .iter()
            .map(|key| {
                let hex = &key[prefix.len()..];
                let id = u64::from_str_radix(hex, 16)
                    .map_err(|_| Error::InvalidArgument(format!("malformed tile key '{key}'")))?;
                Tile::from_id(id)
            })
            .collect()
    }

    /// Drop every tile, side table entry and the metadata.
    pub fn clear(&self) -> Result<()> {
        self.blobs.clear()?;
        self.side_data.clear();
        Ok(())
    }
}

impl<B: BlobStore> TiledFeatureSource for TiledStore<B> {
    fn tile_source(&self) -> &dyn TileSource {
        &self.tile_source
    }

    fn get(&self, tile: &Tile) -> Result<Vec<Feature>> {
        match self.blobs.read(&Self::tile_key(tile))? {
            Some(bytes) => decode_features(&bytes, Some(&self.side_data)),
            None => Ok(Vec::new()),
        }
    }

    fn meta(&self) -> Result<Option<TiledSourceMeta>> {
        self.blobs
            .read(META_KEY)?
            .map(|bytes| TiledSourceMeta::from_bytes(&bytes))
            .transpose()
    }

    fn open(&self) -> Result<Box<dyn TiledFeatureSource>> {
        Ok(Box::new(self.clone()))
    }
}

impl<B: BlobStore> TiledFeatureTarget for TiledStore<B> {
    fn tile_source(&self) -> &dyn TileSource {
        &self.tile_source
    }

    fn write(&self, tile: &Tile, features: &[Feature]) -> Result<()> {
        let key = Self::tile_key(tile);
        if features.is_empty() {
            return self.blobs.remove(&key);
        }
        let bytes = encode_features(features, Some(&self.side_data))?;
        debug!("Writing {} features ({} bytes) to tile {tile}", features.len(), bytes.len());
        self.blobs.write(&key, &bytes)
    }

    fn flush(&self) -> Result<()> {
        self.blobs.write(SIDE_DATA_KEY, &encode_side_data(&self.side_data))
    }

    fn set_meta(&self, meta: TiledSourceMeta) -> Result<()> {
        self.blobs.write(META_KEY, &meta.to_bytes())
    }

    fn clear_meta(&self) -> Result<()> {
        self.blobs.remove(META_KEY)
    }
}

impl<B: BlobStore> FeatureProvider for TiledStore<B> {
    fn is_tiled_source(&self) -> bool {
        true
    }

    fn is_tiled_target(&self) -> bool {
        true
    }

    fn as_tiled_source(&self) -> Result<&dyn TiledFeatureSource> {
        Ok(self)
    }

    fn as_tiled_target(&self) -> Result<&dyn TiledFeatureTarget> {
        Ok(self)
    }
}

/// Master features held in memory, matched against query boxes by their
/// bounds.
#[derive(Debug, Clone, Default)]
pub struct MemoryFeatureSource {
    features: Arc<Vec<Feature>>,
}

impl MemoryFeatureSource {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            features: Arc::new(features),
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Bounding box of every feature, `None` when empty.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.features
            .iter()
            .filter_map(Feature::bounds)
            .reduce(|a, b| {
                Rect::new(
                    geo::Coord {
                        x: a.min().x.min(b.min().x),
                        y: a.min().y.min(b.min().y),
                    },
                    geo::Coord {
                        x: a.max().x.max(b.max().x),
                        y: a.max().y.max(b.max().y),
                    },
                )
            })
    }
}

impl FeatureSource for MemoryFeatureSource {
    fn get(&self, bounds: &Rect<f64>) -> Result<Vec<Feature>> {
        Ok(self
            .features
            .iter()
            .filter(|f| f.bounds().is_some_and(|b| intersects_rect(&b, bounds)))
            .cloned()
            .collect())
    }

    fn open(&self) -> Result<Box<dyn FeatureSource>> {
        Ok(Box::new(self.clone()))
    }
}

impl FeatureProvider for MemoryFeatureSource {
    fn is_feature_source(&self) -> bool {
        true
    }

    fn as_feature_source(&self) -> Result<&dyn FeatureSource> {
        Ok(self)
    }
}
