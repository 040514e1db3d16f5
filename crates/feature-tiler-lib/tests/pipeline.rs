//! End-to-end compilation over several zoom levels.

use feature_tiler_lib::{
    AreaCategory, BlobStore, CancellationToken, CompoundFilter, DirectoryBlobStore, Feature,
    FeatureFilter, FeatureKind, FeatureSimplifier, MemoryBlobStore, MemoryFeatureSource, Place,
    PlaceCategory, Segment, SegmentCategory, TiledFeatureSource, TiledFeatureTask, TiledStore,
    ZoomLevelTask, feature_id,
};
use geo::{Coord, LineString, Polygon, Rect};
use rand::{Rng, SeedableRng, rngs::StdRng};

fn area() -> Rect<f64> {
    Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 10.0, y: 10.0 })
}

fn diagonal() -> Feature {
    Segment::new(
        feature_id(FeatureKind::Segment, 1),
        "Diagonal Avenue",
        LineString::from(vec![(1.0, 1.0), (9.0, 9.0)]),
        SegmentCategory::Freeway,
    )
    .unwrap()
    .into()
}

fn level(zoom: u8, filter: CompoundFilter) -> ZoomLevelTask {
    ZoomLevelTask::new(zoom, filter, FeatureSimplifier::PassThrough)
}

fn stored<B: BlobStore>(store: &TiledStore<B>, zoom: u8) -> Vec<Feature> {
    store
        .tiles(zoom)
        .unwrap()
        .iter()
        .flat_map(|tile| store.get(tile).unwrap())
        .collect()
}

fn close(a: Coord<f64>, b: Coord<f64>) -> bool {
    (a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9
}

fn assert_whole_diagonal(features: &[Feature]) {
    assert_eq!(features.len(), 1, "expected one merged segment, got {features:?}");
    let Feature::Segment(segment) = &features[0] else {
        panic!("expected a segment");
    };
    assert_eq!(segment.id, diagonal().id());
    assert_eq!(segment.name, "Diagonal Avenue");
    let coords = &segment.line.0;
    assert!(close(coords[0], Coord { x: 1.0, y: 1.0 }), "starts at {:?}", coords[0]);
    assert!(close(coords[coords.len() - 1], Coord { x: 9.0, y: 9.0 }));
}

#[test]
fn test_coarse_level_pulls_features_through_fine_levels() {
    let master = MemoryFeatureSource::new(vec![diagonal()]);
    let store = TiledStore::in_memory();
    let task = TiledFeatureTask::new(
        &master,
        &store,
        &store,
        area(),
        vec![
            level(6, CompoundFilter::keep_none()),
            level(4, CompoundFilter::keep_all()),
        ],
    )
    .unwrap();
    task.start(4).unwrap();

    // zoom 6 carried the segment for zoom 4, then was cleaned to its own filter
    assert!(store.tiles(6).unwrap().is_empty());
    assert_whole_diagonal(&stored(&store, 4));

    let meta = store.meta().unwrap().unwrap();
    assert_eq!(meta.zoom_levels, vec![6, 4]);
    assert_eq!(meta.area, area());
}

#[test]
fn test_fine_level_features_stay_out_of_coarse_levels() {
    let master = MemoryFeatureSource::new(vec![diagonal()]);
    let store = TiledStore::in_memory();
    TiledFeatureTask::new(
        &master,
        &store,
        &store,
        area(),
        vec![
            level(6, CompoundFilter::keep_all()),
            level(4, CompoundFilter::keep_none()),
        ],
    )
    .unwrap()
    .start(4)
    .unwrap();

    assert!(store.tiles(4).unwrap().is_empty());

    // zoom 6 is exactly what compiling it alone produces
    let fine = stored(&store, 6);
    assert!(fine.len() > 1);
    assert!(fine.iter().all(|f| f.id() == diagonal().id()));
    let reference = TiledStore::in_memory();
    level(6, CompoundFilter::keep_all())
        .compile_from_master(&master, &reference, &area(), None, 1, &CancellationToken::new())
        .unwrap();
    assert_eq!(store.tiles(6).unwrap(), reference.tiles(6).unwrap());
    for tile in store.tiles(6).unwrap() {
        assert_eq!(store.get(&tile).unwrap(), reference.get(&tile).unwrap());
    }
}

#[test]
fn test_intermediate_level_is_stripped() {
    let master = MemoryFeatureSource::new(vec![diagonal()]);
    let store = TiledStore::in_memory();
    TiledFeatureTask::new(
        &master,
        &store,
        &store,
        area(),
        vec![
            level(4, CompoundFilter::keep_all()),
            level(6, CompoundFilter::keep_none()),
            level(5, CompoundFilter::keep_none()),
        ],
    )
    .unwrap()
    .start(2)
    .unwrap();

    assert!(store.tiles(6).unwrap().is_empty());
    assert!(store.tiles(5).unwrap().is_empty());
    assert_whole_diagonal(&stored(&store, 4));
    assert_eq!(store.meta().unwrap().unwrap().zoom_levels, vec![6, 5, 4]);
}

#[test]
fn test_category_filters_per_level() {
    let minor = Segment::new(
        feature_id(FeatureKind::Segment, 2),
        "Back Lane",
        LineString::from(vec![(2.0, 8.0), (3.0, 7.0)]),
        SegmentCategory::ServiceStreet,
    )
    .unwrap();
    let lake = feature_tiler_lib::Area::measured(
        feature_id(FeatureKind::Area, 3),
        "Lake",
        Polygon::new(
            LineString::from(vec![(4.0, 4.0), (6.0, 4.0), (6.0, 6.0), (4.0, 6.0)]),
            vec![],
        ),
        AreaCategory::Water,
    )
    .unwrap();
    let master = MemoryFeatureSource::new(vec![diagonal(), minor.into(), lake.into()]);
    let store = TiledStore::in_memory();

    let overview = CompoundFilter::new(
        FeatureFilter::KeepNone,
        FeatureFilter::segment_categories([SegmentCategory::Freeway]),
        FeatureFilter::MinOriginalArea(1.0),
    );
    TiledFeatureTask::new(
        &master,
        &store,
        &store,
        area(),
        vec![level(7, CompoundFilter::keep_all()), level(5, overview)],
    )
    .unwrap()
    .start(3)
    .unwrap();

    let fine = stored(&store, 7);
    assert!(fine.iter().any(|f| f.name() == "Back Lane"));
    assert!(fine.iter().any(|f| f.name() == "Lake"));
    assert!(fine.iter().any(|f| f.name() == "Diagonal Avenue"));

    let coarse = stored(&store, 5);
    assert!(!coarse.iter().any(|f| f.name() == "Back Lane"));
    assert!(coarse.iter().any(|f| f.name() == "Lake"));
    assert!(coarse.iter().any(|f| f.name() == "Diagonal Avenue"));
}

#[test]
fn test_cancelled_run_writes_no_metadata() {
    let master = MemoryFeatureSource::new(vec![diagonal()]);
    let store = TiledStore::in_memory();
    let task = TiledFeatureTask::new(
        &master,
        &store,
        &store,
        area(),
        vec![level(6, CompoundFilter::keep_all()), level(4, CompoundFilter::keep_all())],
    )
    .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = task.start_with_cancel(2, &cancel).unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(store.meta().unwrap(), None);
}

#[test]
fn test_output_independent_of_worker_count() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut features: Vec<Feature> = Vec::new();
    for i in 0..200 {
        let (x, y) = (rng.gen_range(0.0..10.0), rng.gen_range(0.0..10.0));
        features.push(
            Place::new(
                feature_id(FeatureKind::Place, i),
                format!("Place {i}"),
                Coord { x, y },
                PlaceCategory::Village,
            )
            .into(),
        );
    }
    for i in 0..50 {
        let points: Vec<(f64, f64)> = (0..5)
            .map(|_| (rng.gen_range(0.0..10.0), rng.gen_range(0.0..10.0)))
            .collect();
        features.push(
            Segment::new(
                feature_id(FeatureKind::Segment, i),
                format!("Street {i}"),
                LineString::from(points),
                SegmentCategory::ResidentialStreet,
            )
            .unwrap()
            .into(),
        );
    }
    let master = MemoryFeatureSource::new(features);

    let compile = |workers: usize| {
        let store = TiledStore::in_memory();
        TiledFeatureTask::new(
            &master,
            &store,
            &store,
            area(),
            vec![level(7, CompoundFilter::keep_all()), level(6, CompoundFilter::keep_all())],
        )
        .unwrap()
        .start(workers)
        .unwrap();
        store
    };

    let single = compile(1);
    let parallel = compile(8);
    for zoom in [7, 6] {
        let tiles = single.tiles(zoom).unwrap();
        assert_eq!(tiles, parallel.tiles(zoom).unwrap());
        for tile in tiles {
            assert_eq!(single.get(&tile).unwrap(), parallel.get(&tile).unwrap());
        }
    }
}

#[test]
fn test_directory_store_persists_tiles_and_names() {
    let dir = tempfile::tempdir().unwrap();
    let master = MemoryFeatureSource::new(vec![
        diagonal(),
        Place::new(
            feature_id(FeatureKind::Place, 10),
            "Harbour",
            Coord { x: 2.5, y: 7.5 },
            PlaceCategory::Transport,
        )
        .with_icon(vec![1, 2, 3])
        .into(),
    ]);

    {
        let store = TiledStore::new(DirectoryBlobStore::open(dir.path()).unwrap()).unwrap();
        TiledFeatureTask::new(
            &master,
            &store,
            &store,
            area(),
            vec![level(6, CompoundFilter::keep_all()), level(5, CompoundFilter::keep_all())],
        )
        .unwrap()
        .start(2)
        .unwrap();
    }

    let reopened = TiledStore::new(DirectoryBlobStore::open(dir.path()).unwrap()).unwrap();
    assert_eq!(reopened.meta().unwrap().unwrap().zoom_levels, vec![6, 5]);
    let coarse = stored(&reopened, 5);
    let harbour = coarse
        .iter()
        .find_map(|f| match f {
            Feature::Place(p) if p.name == "Harbour" => Some(p),
            _ => None,
        })
        .expect("harbour survives reopening");
    assert_eq!(harbour.icon, vec![1, 2, 3]);
    assert!(coarse.iter().any(|f| f.name() == "Diagonal Avenue"));
}

#[test]
fn test_memory_blobs_hold_tiles_side_data_and_meta() {
    let blobs = MemoryBlobStore::new();
    let store = TiledStore::new(blobs.clone()).unwrap();
    let master = MemoryFeatureSource::new(vec![diagonal()]);
    TiledFeatureTask::new(&master, &store, &store, area(), vec![level(5, CompoundFilter::keep_all())])
        .unwrap()
        .start(1)
        .unwrap();

    assert!(blobs.read("meta").unwrap().is_some());
    assert!(blobs.read("side_data").unwrap().is_some());
    assert!(!blobs.keys("tiles/05/").unwrap().is_empty());
}
