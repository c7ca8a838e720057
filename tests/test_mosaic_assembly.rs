use cloudless::core::mosaic::MosaicAssembler;
use cloudless::io::store::{Compression, MemoryStore, RasterStore};
use cloudless::types::{Crs, GeoTransform, MosaicError, Raster};
use ndarray::Array3;
use std::path::{Path, PathBuf};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn tile(x: f64, y: f64, band_values: [f32; 4], rows: usize, cols: usize) -> Raster {
    let data = Array3::from_shape_fn((4, rows, cols), |(b, _, _)| band_values[b]);
    Raster::new(
        data,
        GeoTransform::north_up(x, y, 10.0, 10.0),
        Crs::Utm { zone: 51, north: true },
    )
}

#[test]
fn test_three_tiles_merge_into_one_raster() {
    init_logging();
    let store = MemoryStore::new();
    let tiles_dir = Path::new("tiles");

    // Listed out of order on purpose
    store
        .insert(tiles_dir.join("2021_tile_2.tif"), tile(300000.0, 1799950.0, [3.0; 4], 5, 10))
        .expect("insert");
    store
        .insert(tiles_dir.join("2021_tile_0.tif"), tile(300000.0, 1800000.0, [1.0; 4], 5, 5))
        .expect("insert");
    store
        .insert(tiles_dir.join("2021_tile_1.tif"), tile(300050.0, 1800000.0, [2.0; 4], 5, 5))
        .expect("insert");

    let vrt_path = PathBuf::from("temp/2021.vrt");
    let output = PathBuf::from("final_rasters/2021.tif");
    let summary = MosaicAssembler::new(&store)
        .expect("Failed to create assembler")
        .with_year(2021)
        .assemble(tiles_dir, &vrt_path, &output)
        .expect("Failed to assemble mosaic");

    println!("Mosaic: {} x {} px from {} tiles", summary.width, summary.height, summary.tiles.len());
    assert_eq!(summary.tiles.len(), 3);
    assert_eq!(summary.tiles[0], tiles_dir.join("2021_tile_0.tif"));
    assert_eq!((summary.width, summary.height), (10, 10));
    assert_eq!(summary.valid_pixels, 100);

    let mosaic = store.read(&output).expect("Mosaic not written");
    assert_eq!(mosaic.band_count(), 4);
    assert_eq!(mosaic.crs, Crs::Utm { zone: 51, north: true });
    assert_eq!(mosaic.transform.top_left_x, 300000.0);
    assert_eq!(mosaic.transform.top_left_y, 1800000.0);
    assert_eq!(mosaic.data[[0, 0, 0]], 1.0);
    assert_eq!(mosaic.data[[3, 0, 9]], 2.0);
    assert_eq!(mosaic.data[[1, 9, 4]], 3.0);

    let options = store.options_of(&output).expect("Mosaic options missing");
    assert_eq!(options.compression, Compression::Lzw);
    assert!(options.big_tiff);

    // The virtual index references every tile for every band
    let vrt = store.index_of(&vrt_path).expect("VRT index not written to the store");
    assert_eq!((vrt.raster_x_size, vrt.raster_y_size), (10, 10));
    assert_eq!(vrt.srs, "EPSG:32651");
    assert_eq!(vrt.bands.len(), 4);
    assert!(vrt.bands.iter().all(|b| b.sources.len() == 3));
    assert_eq!(vrt.transform_terms().expect("bad transform")[0], 300000.0);
}

#[test]
fn test_overlapping_tiles_keep_valid_pixels() {
    init_logging();
    let store = MemoryStore::new();

    let mut second = tile(300020.0, 1800000.0, [9.0; 4], 2, 4);
    // Second tile has a hole where the first one has data
    for b in 0..4 {
        second.data[[b, 0, 0]] = f32::NAN;
    }
    store.insert("tiles/2021_tile_0.tif", tile(300000.0, 1800000.0, [5.0; 4], 2, 4)).expect("insert");
    store.insert("tiles/2021_tile_1.tif", second).expect("insert");

    let output = PathBuf::from("final_rasters/2021.tif");
    MosaicAssembler::new(&store)
        .expect("Failed to create assembler")
        .assemble(Path::new("tiles"), Path::new("temp/index.vrt"), &output)
        .expect("Failed to assemble mosaic");

    let mosaic = store.read(&output).expect("Mosaic not written");
    assert_eq!(mosaic.shape(), (2, 6));
    assert_eq!(mosaic.data[[0, 0, 2]], 5.0, "no-data in a later tile keeps earlier pixels");
    assert_eq!(mosaic.data[[0, 0, 3]], 9.0);
    assert_eq!(mosaic.data[[0, 1, 2]], 9.0);
}

#[test]
fn test_empty_tile_directory_is_fatal() {
    init_logging();
    let store = MemoryStore::new();
    store.insert("tiles/2020_tile_0.tif", tile(0.0, 0.0, [1.0; 4], 1, 1)).expect("insert");

    let result = MosaicAssembler::new(&store)
        .expect("Failed to create assembler")
        .with_year(2021)
        .assemble(Path::new("tiles"), Path::new("temp/index.vrt"), Path::new("out.tif"));

    match result {
        Err(MosaicError::MissingInput(message)) => assert!(message.contains("tiles")),
        other => panic!("expected missing input, got {:?}", other.map(|s| s.output_path)),
    }
    assert!(!store.exists(Path::new("out.tif")));
    assert!(!store.exists(Path::new("temp/index.vrt")));
}

#[test]
fn test_sharded_tile_is_merged() {
    init_logging();
    let store = MemoryStore::new();
    // Oversized exports arrive split into offset-suffixed shards
    store
        .insert("tiles/2021_tile_3-0000000000-0000000000.tif", tile(300000.0, 1800000.0, [3.0; 4], 2, 2))
        .expect("insert");
    store
        .insert("tiles/2021_tile_4.tif", tile(300020.0, 1800000.0, [4.0; 4], 2, 2))
        .expect("insert");

    let output = PathBuf::from("final_rasters/2021.tif");
    let summary = MosaicAssembler::new(&store)
        .expect("Failed to create assembler")
        .with_year(2021)
        .assemble(Path::new("tiles"), Path::new("temp/2021.vrt"), &output)
        .expect("Failed to assemble mosaic");

    assert_eq!(summary.tiles.len(), 2);
    let mosaic = store.read(&output).expect("Mosaic not written");
    assert_eq!(mosaic.shape(), (2, 4));
    assert_eq!(mosaic.data[[0, 0, 0]], 3.0);
    assert_eq!(mosaic.data[[0, 1, 3]], 4.0);
}
