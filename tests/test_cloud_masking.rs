use chrono::{TimeZone, Utc};
use cloudless::core::cloud_mask::{pair_scenes, CloudMaskBuilder, CloudMaskParams};
use cloudless::core::composite::Compositor;
use cloudless::types::{BoundingBox, CloudProbability, Crs, GeoTransform, PixelGrid, Raster, Scene, SpectralBand};
use ndarray::{Array2, Array3};

const SIZE: usize = 40;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 40 x 40 scene at 20 m with bright land everywhere
fn base_scene(id: &str, azimuth: Option<f64>) -> (Scene, Array2<f32>) {
    let reflectance = Array3::from_shape_fn((4, SIZE, SIZE), |(b, _, _)| [300.0, 400.0, 500.0, 3000.0][b]);
    let scene = Scene {
        id: id.to_string(),
        acquired: Utc.with_ymd_and_hms(2021, 7, 14, 2, 20, 0).unwrap(),
        footprint: BoundingBox::new(120.9, 16.9, 121.1, 17.1),
        solar_azimuth_deg: azimuth,
        cloudy_pixel_percentage: 30.0,
        reflectance: Raster::new(
            reflectance,
            GeoTransform::north_up(300000.0, 1900000.0, 20.0, 20.0),
            Crs::Utm { zone: 51, north: true },
        ),
        scene_class: Array2::from_elem((SIZE, SIZE), 4),
    };
    (scene, Array2::zeros((SIZE, SIZE)))
}

#[test]
fn test_shadow_detected_opposite_the_sun() {
    init_logging();
    let (mut scene, mut probability) = base_scene("S2A_20210714", Some(135.0));

    // Cloud block in the middle
    for r in 5..15 {
        for c in 20..30 {
            probability[[r, c]] = 90.0;
        }
    }
    let nir = SpectralBand::Nir.index();
    // Dark land north-west of the cloud, dark water next to it, dark land south-east
    for r in 0..5 {
        for c in 10..20 {
            scene.reflectance.data[[nir, r, c]] = 500.0;
            if c >= 15 {
                scene.scene_class[[r, c]] = 6;
            }
        }
    }
    for r in 30..35 {
        for c in 30..35 {
            scene.reflectance.data[[nir, r, c]] = 500.0;
        }
    }

    let builder = CloudMaskBuilder::new(CloudMaskParams::default());
    let layer = CloudProbability {
        id: scene.id.clone(),
        probability,
    };
    let mask = builder.build(&scene, &layer).expect("Failed to build mask");

    assert_eq!(mask.shadow_azimuth_deg, -45.0);
    assert_eq!(mask.clouds.iter().filter(|&&c| c).count(), 100);

    // Sun in the south-east, so shadows fall north-west
    assert!(mask.shadows[[2, 12]], "dark land under the projection is shadow");
    assert!(mask.cloud_projection[[2, 17]], "water pixel is under the projection");
    assert!(!mask.shadows[[2, 17]], "water is never shadow");
    assert!(!mask.shadows[[32, 32]], "dark land on the sunny side is not shadow");

    // Buffered mask covers clouds and shadows, leaves distant pixels alone
    assert!(mask.mask[[10, 25]]);
    assert!(mask.mask[[2, 12]]);
    assert!(!mask.mask[[39, 0]]);
    println!("Masked {:.1}% of the scene", mask.masked_percentage());
}

#[test]
fn test_scattered_cloud_pixels_are_removed() {
    init_logging();
    let (scene, mut probability) = base_scene("speckle", Some(120.0));
    probability[[10, 10]] = 99.0;
    probability[[30, 5]] = 99.0;

    let builder = CloudMaskBuilder::new(CloudMaskParams::default());
    let layer = CloudProbability {
        id: scene.id.clone(),
        probability,
    };
    let mask = builder.build(&scene, &layer).expect("Failed to build mask");
    assert!(mask.raw[[10, 10]]);
    assert!(mask.mask.iter().all(|&m| !m), "isolated detections are noise");
}

#[test]
fn test_compositor_skips_unusable_scenes() {
    init_logging();
    let (cloudy, mut cloudy_prob) = base_scene("cloudy", Some(100.0));
    cloudy_prob.fill(100.0);
    let (mut clear, clear_prob) = base_scene("clear", Some(100.0));
    clear.reflectance.data.fill(1234.0);
    let (no_sun, no_sun_prob) = base_scene("no_sun", None);
    let (orphan, _) = base_scene("orphan", Some(100.0));

    let probabilities = vec![
        CloudProbability { id: "cloudy".to_string(), probability: cloudy_prob },
        CloudProbability { id: "clear".to_string(), probability: clear_prob },
        CloudProbability { id: "no_sun".to_string(), probability: no_sun_prob },
    ];
    let pairs = pair_scenes(vec![cloudy, clear, no_sun, orphan], probabilities);
    assert_eq!(pairs.len(), 3);

    let compositor = Compositor::new(CloudMaskBuilder::new(CloudMaskParams::default()));
    let (composite, masked, stats) = compositor.composite(pairs).expect("Failed to composite");

    assert_eq!(stats.scenes_used, 2);
    assert_eq!(stats.scenes_skipped, 1);
    assert_eq!(masked.iter().find(|m| m.id == "cloudy").map(|m| m.masked_percentage), Some(100.0));
    // The fully clouded scene contributes nothing
    assert!(composite.data.iter().all(|&v| v == 1234.0));
}

/// Clear 20 x 20 scene at 20 m whose grid starts at `x0`
fn clear_scene(id: &str, x0: f64, value: f32) -> (Scene, CloudProbability) {
    let (mut scene, probability) = base_scene(id, Some(100.0));
    scene.reflectance = Raster::new(
        Array3::from_elem((4, 20, 20), value),
        GeoTransform::north_up(x0, 1900000.0, 20.0, 20.0),
        Crs::Utm { zone: 51, north: true },
    );
    scene.scene_class = Array2::from_elem((20, 20), 4);
    let layer = CloudProbability {
        id: id.to_string(),
        probability: probability.slice(ndarray::s![..20, ..20]).to_owned(),
    };
    (scene, layer)
}

#[test]
fn test_adjacent_scenes_share_the_composite_grid() {
    init_logging();
    let pairs = vec![
        clear_scene("S2A_west", 300000.0, 100.0),
        clear_scene("S2B_east", 300400.0, 200.0),
    ];
    let grid = PixelGrid {
        transform: GeoTransform::north_up(300000.0, 1900000.0, 20.0, 20.0),
        rows: 20,
        cols: 40,
        crs: Crs::Utm { zone: 51, north: true },
    };

    let compositor = Compositor::new(CloudMaskBuilder::new(CloudMaskParams::default())).with_grid(grid);
    let (composite, _, stats) = compositor.composite(pairs).expect("Failed to composite off-grid scenes");

    assert_eq!(stats.scenes_used, 2);
    assert_eq!(composite.shape(), (20, 40));
    assert_eq!(composite.transform, grid.transform);
    for b in 0..4 {
        assert!(composite.band(b).slice(ndarray::s![.., ..20]).iter().all(|&v| v == 100.0));
        assert!(composite.band(b).slice(ndarray::s![.., 20..]).iter().all(|&v| v == 200.0));
    }
}

#[test]
fn test_scenes_default_to_the_first_scene_grid() {
    init_logging();
    let pairs = vec![
        clear_scene("S2A_west", 300000.0, 100.0),
        clear_scene("S2B_overlap", 300200.0, 300.0),
    ];

    let compositor = Compositor::new(CloudMaskBuilder::new(CloudMaskParams::default()));
    let (composite, _, stats) = compositor.composite(pairs).expect("Failed to composite off-grid scenes");

    assert_eq!(stats.scenes_used, 2);
    assert_eq!(composite.shape(), (20, 20));
    // Western half seen once, eastern half seen by both scenes
    assert_eq!(composite.data[[0, 0, 9]], 100.0);
    assert_eq!(composite.data[[0, 0, 10]], 200.0);
}
