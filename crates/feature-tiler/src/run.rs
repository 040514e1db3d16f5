use std::fmt;
use std::time::{Duration, Instant};

use anyhow::Context;
use feature_tiler_lib::{
    BlobStore, DirectoryBlobStore, MemoryFeatureSource, TiledFeatureTask, TiledStore,
};
use geo::Rect;
use tracing::info;

use crate::config::TilerConfig;
use crate::input::load_features;
use crate::settings::Settings;

/// What a compilation produced
#[derive(Debug, Clone, PartialEq)]
pub struct CompileSummary {
    pub area: Rect<f64>,
    /// `(zoom, tiles holding data)`, finest first
    pub tiles_per_zoom: Vec<(u8, usize)>,
    pub elapsed: Duration,
}

impl fmt::Display for CompileSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Compiled {} zoom levels in {:.2?}:", self.tiles_per_zoom.len(), self.elapsed)?;
        for (zoom, tiles) in &self.tiles_per_zoom {
            write!(f, " z{zoom}={tiles}")?;
        }
        Ok(())
    }
}

/// Load the inputs named by `settings` and compile them into the output
/// directory.
pub fn run(settings: &Settings) -> anyhow::Result<CompileSummary> {
    profiling::scope!("run");

    let config = TilerConfig::load(&settings.levels)?;
    let features = load_features(&settings.input)?;
    let master = MemoryFeatureSource::new(features);

    let area = match settings.area {
        Some(area) => area,
        None => master
            .bounds()
            .context("The input holds no features; pass --area to compile an empty area")?,
    };

    let mut compile = config.compile.clone();
    if let Some(workers) = settings.worker_override() {
        compile.worker_count = workers;
    }
    compile.padded |= settings.padded;

    let blobs = DirectoryBlobStore::open(&settings.output)
        .with_context(|| format!("Failed to open output directory {}", settings.output.display()))?;
    if settings.clear {
        info!("Clearing {}", settings.output.display());
        blobs.clear()?;
    }
    let store = TiledStore::new(blobs)?;

    let start = Instant::now();
    let task = TiledFeatureTask::new(&master, &store, &store, area, config.tasks())?.with_config(compile);
    let zooms: Vec<u8> = task.levels().iter().map(|l| l.zoom()).collect();
    task.run().context("Compilation failed")?;

    let tiles_per_zoom = zooms
        .into_iter()
        .map(|zoom| Ok((zoom, store.tiles(zoom)?.len())))
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(CompileSummary {
        area,
        tiles_per_zoom,
        elapsed: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use feature_tiler_lib::{Feature, TiledFeatureSource};
    use std::path::Path;

    const FEATURES: &str = r#"{
        "places": [
            { "id": 1, "name": "Capital", "position": [5.0, 5.0], "category": "City" },
            { "id": 2, "name": "Farm", "position": [6.0, 4.0], "category": "Hamlet" }
        ],
        "segments": [
            { "id": 3, "name": "Motorway", "coordinates": [[1, 1], [9, 9]], "category": "Freeway" },
            { "id": 4, "name": "Lane", "coordinates": [[2, 8], [3, 7]], "category": "ServiceStreet" }
        ]
    }"#;

    const LEVELS: &str = r#"
        [[levels]]
        zoom = 7

        [[levels]]
        zoom = 6
        filter.places = { place_categories = ["City"] }
        filter.segments = { segment_categories = ["Freeway"] }

        [[levels]]
        zoom = 4
        filter.places = "keep_none"
        filter.segments = "keep_none"
    "#;

    fn settings(dir: &Path, extra: &[&str]) -> Settings {
        std::fs::write(dir.join("features.json"), FEATURES).unwrap();
        std::fs::write(dir.join("levels.toml"), LEVELS).unwrap();
        let input = dir.join("features.json");
        let levels = dir.join("levels.toml");
        let output = dir.join("tiles");
        let mut args = vec![
            "feature-tiler",
            "--input",
            input.to_str().unwrap(),
            "--levels",
            levels.to_str().unwrap(),
            "--output",
            output.to_str().unwrap(),
            "--workers",
            "2",
        ];
        args.extend_from_slice(extra);
        Settings::try_parse_from(args).unwrap()
    }

    fn names(store: &TiledStore<DirectoryBlobStore>, zoom: u8) -> Vec<String> {
        let mut names: Vec<String> = store
            .tiles(zoom)
            .unwrap()
            .iter()
            .flat_map(|t| store.get(t).unwrap())
            .map(|f: Feature| f.name().to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    #[test]
    fn test_run_compiles_every_level() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path(), &[]);
        let summary = run(&settings).unwrap();
        assert_eq!(
            summary.tiles_per_zoom.iter().map(|(z, _)| *z).collect::<Vec<_>>(),
            vec![7, 6, 4]
        );
        assert!(summary.tiles_per_zoom[..2].iter().all(|(_, n)| *n > 0));
        assert_eq!(summary.tiles_per_zoom[2], (4, 0));
        assert!(summary.to_string().starts_with("Compiled 3 zoom levels"));

        let store = TiledStore::new(DirectoryBlobStore::open(&settings.output).unwrap()).unwrap();
        assert_eq!(store.meta().unwrap().unwrap().zoom_levels, vec![7, 6, 4]);
        assert_eq!(names(&store, 7), vec!["Capital", "Farm", "Lane", "Motorway"]);
        assert_eq!(names(&store, 6), vec!["Capital", "Motorway"]);
        // zoom 4 keeps nothing of what the finer levels hold
        assert!(names(&store, 4).is_empty());
    }

    #[test]
    fn test_clear_removes_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path(), &["--clear"]);
        let stale = DirectoryBlobStore::open(&settings.output).unwrap();
        stale.write("tiles/12/stale", b"old").unwrap();

        run(&settings).unwrap();
        assert_eq!(stale.read("tiles/12/stale").unwrap(), None);
    }

    #[test]
    fn test_area_limits_output() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path(), &["--area", "0,0,4,4"]);
        let summary = run(&settings).unwrap();
        assert_eq!(summary.area.max().x, 4.0);

        let store = TiledStore::new(DirectoryBlobStore::open(&settings.output).unwrap()).unwrap();
        // only the motorway reaches into the area
        assert_eq!(names(&store, 7), vec!["Motorway"]);
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path(), &[]);
        settings.input = dir.path().join("missing.json");
        assert!(run(&settings).is_err());
    }
}
