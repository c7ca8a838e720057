use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::morphology;
use crate::types::{CloudProbability, Mask, MosaicError, MosaicResult, Scene, SpectralBand};

/// Cloud and cloud-shadow detection parameters (s2cloudless approach)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudMaskParams {
    /// Cloud probability (%) above which a pixel is cloud
    pub cloud_probability_threshold: f32,
    /// NIR reflectance fraction below which a non-water pixel is dark
    pub nir_dark_threshold: f32,
    /// Integer scale of surface reflectance values
    pub reflectance_scale: f32,
    /// SCL class identifying water
    pub water_class: u8,
    /// Maximum shadow search distance, in units of `projection_scale_m`
    pub cloud_projection_distance: f64,
    /// Ground size (m) of one projection distance unit
    pub projection_scale_m: f64,
    /// Shadow azimuth = reference − mean solar azimuth (degrees).
    ///
    /// 90° assumes raster columns run east in a projected CRS; re-derive for
    /// other axis conventions.
    pub shadow_azimuth_reference_deg: f64,
    /// Buffer distance (m) added around cloud/shadow objects
    pub buffer_m: f64,
    /// Working resolution (m) of the erosion/dilation radii
    pub mask_scale_m: f64,
    /// Erosion radius in `mask_scale_m` pixels
    pub erosion_radius: f64,
}

impl Default for CloudMaskParams {
    fn default() -> Self {
        Self {
            cloud_probability_threshold: 50.0,
            nir_dark_threshold: 0.15,
            reflectance_scale: 1e4,
            water_class: 6,
            cloud_projection_distance: 10.0,
            projection_scale_m: 100.0,
            shadow_azimuth_reference_deg: 90.0,
            buffer_m: 50.0,
            mask_scale_m: 20.0,
            erosion_radius: 2.0,
        }
    }
}

impl CloudMaskParams {
    /// Dilation radius in `mask_scale_m` pixels
    pub fn dilation_radius(&self) -> f64 {
        self.buffer_m * 2.0 / self.mask_scale_m
    }
}

/// Cloud/shadow mask with its component bands
#[derive(Debug, Clone)]
pub struct CloudShadowMask {
    pub scene_id: String,
    /// Probability above threshold
    pub clouds: Mask,
    /// Dark NIR, non-water pixels
    pub dark_pixels: Mask,
    /// Pixels reached by the directional cloud projection
    pub cloud_projection: Mask,
    /// dark_pixels AND cloud_projection
    pub shadows: Mask,
    /// clouds OR shadows before cleanup
    pub raw: Mask,
    /// Cleaned final mask (true = cloud or shadow)
    pub mask: Mask,
    /// Azimuth used for the shadow projection (degrees)
    pub shadow_azimuth_deg: f64,
}

impl CloudShadowMask {
    /// Share of masked pixels, 0-100
    pub fn masked_percentage(&self) -> f64 {
        let total = self.mask.len().max(1);
        100.0 * self.mask.iter().filter(|&&v| v).count() as f64 / total as f64
    }
}

/// Builds one cloud/shadow mask per scene
#[derive(Debug, Clone)]
pub struct CloudMaskBuilder {
    params: CloudMaskParams,
}

impl CloudMaskBuilder {
    pub fn new(params: CloudMaskParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &CloudMaskParams {
        &self.params
    }

    /// Cloud band: probability strictly above the threshold
    pub fn cloud_band(&self, probability: &Array2<f32>) -> Mask {
        let threshold = self.params.cloud_probability_threshold;
        probability.mapv(|p| p > threshold)
    }

    /// Dark-pixel band: NIR below the dark threshold and not water
    pub fn dark_pixel_band(&self, nir: ArrayView2<'_, f32>, scene_class: &Array2<u8>) -> Mask {
        let dark_limit = self.params.nir_dark_threshold * self.params.reflectance_scale;
        let water = self.params.water_class;
        let mut dark = Array2::from_elem(nir.dim(), false);
        Zip::from(&mut dark)
            .and(&nir)
            .and(scene_class)
            .for_each(|d, &n, &scl| *d = n < dark_limit && scl != water);
        dark
    }

    /// Direction (degrees, counter-clockwise from east) towards the sun
    pub fn shadow_azimuth(&self, mean_solar_azimuth_deg: f64) -> f64 {
        self.params.shadow_azimuth_reference_deg - mean_solar_azimuth_deg
    }

    /// Directional distance transform of the cloud band.
    ///
    /// A pixel is potentially shadowed when a cloud pixel lies within
    /// `max_distance_px` of it along `azimuth_deg` (cloud pixels included).
    pub fn project_cloud_shadow(&self, clouds: &Mask, azimuth_deg: f64, max_distance_px: f64) -> Mask {
        let (height, width) = clouds.dim();
        let mut projected = Array2::from_elem((height, width), false);

        let theta = azimuth_deg.to_radians();
        // Rows grow southwards on a north-up grid
        let step_col = theta.cos();
        let step_row = -theta.sin();

        // Half-pixel sampling keeps diagonal paths gap free
        let samples = (max_distance_px.max(0.0) * 2.0).floor() as usize;

        for ((i, j), &is_cloud) in clouds.indexed_iter() {
            if !is_cloud {
                continue;
            }
            for k in 0..=samples {
                let d = k as f64 * 0.5;
                let r = (i as f64 - d * step_row).round();
                let c = (j as f64 - d * step_col).round();
                if r < 0.0 || c < 0.0 || r >= height as f64 || c >= width as f64 {
                    break;
                }
                projected[[r as usize, c as usize]] = true;
            }
        }

        projected
    }

    /// Derive the cloud/shadow mask of one scene from its probability layer.
    ///
    /// Errors mean the scene cannot be masked (missing solar azimuth, grid
    /// mismatch); callers treat them as data-quality skips.
    pub fn build(&self, scene: &Scene, probability: &CloudProbability) -> MosaicResult<CloudShadowMask> {
        let solar_azimuth = scene.solar_azimuth_deg.ok_or_else(|| {
            MosaicError::InvalidFormat(format!("Scene {} has no MEAN_SOLAR_AZIMUTH_ANGLE", scene.id))
        })?;

        let shape = scene.reflectance.shape();
        if probability.probability.dim() != shape || scene.scene_class.dim() != shape {
            return Err(MosaicError::InvalidFormat(format!(
                "Scene {} grid {:?} does not match probability {:?} / SCL {:?}",
                scene.id,
                shape,
                probability.probability.dim(),
                scene.scene_class.dim()
            )));
        }

        let pixel_size_m = scene.reflectance.pixel_size_m();
        if !(pixel_size_m > 0.0) {
            return Err(MosaicError::InvalidFormat(format!(
                "Scene {} has invalid pixel size {}",
                scene.id, pixel_size_m
            )));
        }

        log::debug!("Masking scene {} ({}x{} px @ {:.1} m)", scene.id, shape.0, shape.1, pixel_size_m);

        // Step 1: clouds from probability
        let clouds = self.cloud_band(&probability.probability);

        // Step 2: dark, non-water pixels
        let nir = scene.reflectance.band(SpectralBand::Nir.index());
        let dark_pixels = self.dark_pixel_band(nir, &scene.scene_class);

        // Step 3-4: project clouds away from the sun
        let shadow_azimuth_deg = self.shadow_azimuth(solar_azimuth);
        let max_distance_px =
            self.params.cloud_projection_distance * self.params.projection_scale_m / pixel_size_m;
        let cloud_projection = self.project_cloud_shadow(&clouds, shadow_azimuth_deg, max_distance_px);

        // Step 5: shadows are dark pixels under the projection
        let shadows = &dark_pixels & &cloud_projection;

        // Step 6: combined raw mask
        let raw = &clouds | &shadows;

        // Step 7: drop speckle, then buffer objects
        let to_pixels = self.params.mask_scale_m / pixel_size_m;
        let mask = morphology::open_then_buffer(
            &raw,
            self.params.erosion_radius * to_pixels,
            self.params.dilation_radius() * to_pixels,
        );

        Ok(CloudShadowMask {
            scene_id: scene.id.clone(),
            clouds,
            dark_pixels,
            cloud_projection,
            shadows,
            raw,
            mask,
            shadow_azimuth_deg,
        })
    }
}

/// Join scenes with their probability layers on identifier equality.
///
/// Unpaired scenes are dropped with a warning; order of `scenes` is kept.
pub fn pair_scenes(
    scenes: Vec<Scene>,
    probabilities: Vec<CloudProbability>,
) -> Vec<(Scene, CloudProbability)> {
    let mut by_id: HashMap<String, CloudProbability> = HashMap::new();
    for layer in probabilities {
        // First match wins, like a save-first join
        by_id.entry(layer.id.clone()).or_insert(layer);
    }

    let total = scenes.len();
    let paired: Vec<(Scene, CloudProbability)> = scenes
        .into_iter()
        .filter_map(|scene| match by_id.remove(&scene.id) {
            Some(layer) => Some((scene, layer)),
            None => {
                log::warn!("⚠️  Scene {} has no cloud probability layer, excluding", scene.id);
                None
            }
        })
        .collect();

    log::info!("Paired {} of {} scenes with cloud probability layers", paired.len(), total);
    paired
}
