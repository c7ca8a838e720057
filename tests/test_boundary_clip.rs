use cloudless::core::clip::BoundaryClipper;
use cloudless::io::store::{MemoryStore, RasterStore};
use cloudless::types::{BoundingBox, Crs, GeoTransform, MosaicError, Raster};
use ndarray::Array3;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 20 x 30 mosaic in UTM 51N at 10 m around 121.0E 17.0N
fn mosaic() -> Raster {
    let crs = Crs::Utm { zone: 51, north: true };
    let (x, y) = crs.project_lon_lat(121.0, 17.0).expect("Failed to project");
    let data = Array3::from_shape_fn((4, 20, 30), |(b, r, c)| (b * 1000 + r * 30 + c) as f32);
    Raster::new(data, GeoTransform::north_up(x.round(), y.round(), 10.0, 10.0), crs)
}

fn write_boundary(dir: &Path, bbox: &BoundingBox) -> PathBuf {
    let path = dir.join("boundary.geojson");
    let geojson = format!(
        r#"{{"type": "FeatureCollection", "features": [{{"type": "Feature", "properties": {{"name": "Municipality"}},
        "geometry": {{"type": "MultiPolygon", "coordinates": [[[[{w}, {s}], [{e}, {s}], [{e}, {n}], [{w}, {n}], [{w}, {s}]]]]}}}}]}}"#,
        w = bbox.min_lon,
        s = bbox.min_lat,
        e = bbox.max_lon,
        n = bbox.max_lat
    );
    std::fs::write(&path, geojson).expect("Failed to write boundary");
    path
}

#[test]
fn test_enclosing_boundary_reproduces_mosaic_and_removes_source() {
    init_logging();
    let scratch = TempDir::new().expect("Failed to create temp dir");
    let store = MemoryStore::new();
    let input = PathBuf::from("final_rasters/2021.tif");
    let output = PathBuf::from("clipped_rasters/2021.tif");
    let original = mosaic();
    store.insert(&input, original.clone()).expect("insert");

    let boundary = write_boundary(scratch.path(), &BoundingBox::new(120.9, 16.9, 121.1, 17.1));
    let summary = BoundaryClipper::new(&store)
        .clip(&input, &boundary, &output)
        .expect("Clip failed");

    assert!(summary.source_removed);
    assert!(!store.exists(&input), "unclipped mosaic should be deleted");

    let clipped = store.read(&output).expect("Clipped raster missing");
    assert_eq!(clipped.shape(), original.shape());
    assert_eq!(clipped.transform, original.transform);
    assert_eq!(clipped.data, original.data);
    assert_eq!(summary.valid_pixels, 600);
}

#[test]
fn test_partial_boundary_blanks_outside_pixels() {
    init_logging();
    let scratch = TempDir::new().expect("Failed to create temp dir");
    let store = MemoryStore::new();
    let input = PathBuf::from("final_rasters/2021.tif");
    let output = PathBuf::from("clipped_rasters/2021.tif");
    let original = mosaic();
    store.insert(&input, original.clone()).expect("insert");

    // Western half of the mosaic, trimmed a little in latitude
    let boundary = write_boundary(scratch.path(), &BoundingBox::new(120.9, 16.9, 121.0 + 0.15 / 111.32, 17.1));
    let summary = BoundaryClipper::new(&store)
        .clip(&input, &boundary, &output)
        .expect("Clip failed");

    let clipped = store.read(&output).expect("Clipped raster missing");
    let (rows, cols) = clipped.shape();
    println!("Clipped to {} x {} px, {} valid", cols, rows, summary.valid_pixels);
    assert!(cols < 30);
    assert_eq!(clipped.transform.top_left_x, original.transform.top_left_x);
    assert!(summary.valid_pixels > 0 && summary.valid_pixels < 600);
    // Kept pixels are unchanged
    assert_eq!(clipped.data[[2, 0, 0]], original.data[[2, 0, 0]]);
}

#[test]
fn test_disjoint_boundary_errors_and_keeps_source() {
    init_logging();
    let scratch = TempDir::new().expect("Failed to create temp dir");
    let store = MemoryStore::new();
    let input = PathBuf::from("final_rasters/2021.tif");
    let output = PathBuf::from("clipped_rasters/2021.tif");
    store.insert(&input, mosaic()).expect("insert");

    let boundary = write_boundary(scratch.path(), &BoundingBox::new(121.5, 17.5, 121.6, 17.6));
    let result = BoundaryClipper::new(&store).clip(&input, &boundary, &output);

    assert!(matches!(result, Err(MosaicError::EmptyClip(_))), "got {:?}", result.map(|s| s.output_path));
    assert!(store.exists(&input), "source must survive a failed clip");
    assert!(!store.exists(&output));
}

#[test]
fn test_missing_boundary_keeps_source() {
    init_logging();
    let scratch = TempDir::new().expect("Failed to create temp dir");
    let store = MemoryStore::new();
    let input = PathBuf::from("final_rasters/2021.tif");
    store.insert(&input, mosaic()).expect("insert");

    let result = BoundaryClipper::new(&store).clip(
        &input,
        &scratch.path().join("missing.geojson"),
        Path::new("clipped_rasters/2021.tif"),
    );
    assert!(matches!(result, Err(MosaicError::MissingInput(_))));
    assert!(store.exists(&input));
}

#[test]
fn test_malformed_boundary_keeps_source() {
    init_logging();
    let scratch = TempDir::new().expect("Failed to create temp dir");
    let store = MemoryStore::new();
    let input = PathBuf::from("final_rasters/2021.tif");
    store.insert(&input, mosaic()).expect("insert");

    let boundary = scratch.path().join("broken.geojson");
    std::fs::write(&boundary, "{ not json").expect("write");
    let result = BoundaryClipper::new(&store).clip(&input, &boundary, Path::new("clipped_rasters/2021.tif"));
    assert!(matches!(result, Err(MosaicError::GeoJson(_))));
    assert!(store.exists(&input));
}
