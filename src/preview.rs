//! Interactive Leaflet preview of a composite run

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::grid::Tile;
use crate::types::{BoundingBox, MosaicResult, SpectralBand};

/// Display stretch for an RGB rendering of the composite
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisParams {
    pub bands: [SpectralBand; 3],
    pub min: f64,
    pub max: f64,
    pub gamma: f64,
}

impl Default for VisParams {
    fn default() -> Self {
        Self {
            bands: [SpectralBand::Red, SpectralBand::Green, SpectralBand::Blue],
            min: 0.0,
            max: 2500.0,
            gamma: 1.1,
        }
    }
}

impl VisParams {
    pub fn query_string(&self) -> String {
        let bands: Vec<String> = self.bands.iter().map(|b| b.to_string()).collect();
        format!("bands={}&min={}&max={}&gamma={}", bands.join(","), self.min, self.max, self.gamma)
    }
}

/// XYZ raster overlay
#[derive(Debug, Clone, Serialize)]
pub struct TileLayer {
    pub name: String,
    pub url_template: String,
    pub attribution: String,
    pub show: bool,
    pub opacity: f64,
    pub min_zoom: u8,
}

impl TileLayer {
    /// Composite overlay rendered with the given stretch
    pub fn composite(url_template: &str, vis: &VisParams) -> Self {
        let separator = if url_template.contains('?') { '&' } else { '?' };
        Self {
            name: "S2 cloud-free mosaic".to_string(),
            url_template: format!("{}{}{}", url_template, separator, vis.query_string()),
            attribution: "Contains modified Copernicus Sentinel data".to_string(),
            show: true,
            opacity: 1.0,
            min_zoom: 9,
        }
    }
}

/// Rectangle drawn on the map, grouped into a toggleable layer by `group`
#[derive(Debug, Clone, Serialize)]
pub struct Outline {
    pub group: String,
    pub label: String,
    pub color: String,
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Outline {
    pub fn new(group: &str, label: String, color: &str, bbox: &BoundingBox) -> Self {
        Self {
            group: group.to_string(),
            label,
            color: color.to_string(),
            west: bbox.min_lon,
            south: bbox.min_lat,
            east: bbox.max_lon,
            north: bbox.max_lat,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewMap {
    pub title: String,
    /// (lat, lon)
    pub center: (f64, f64),
    pub zoom: u8,
    pub tile_layers: Vec<TileLayer>,
    pub outlines: Vec<Outline>,
}

/// Return `map` with one more overlay
pub fn with_tile_layer(mut map: PreviewMap, layer: TileLayer) -> PreviewMap {
    map.tile_layers.push(layer);
    map
}

const TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>__TITLE__</title>
<link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css">
<script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
<style>html, body, #map { height: 100%; margin: 0; }</style>
</head>
<body>
<div id="map"></div>
<script>
const config = __CONFIG__;
const map = L.map("map").setView(config.center, config.zoom);
const base = L.tileLayer("https://tile.openstreetmap.org/{z}/{x}/{y}.png", {
  attribution: "&copy; OpenStreetMap contributors"
}).addTo(map);
const overlays = {};
for (const layer of config.tile_layers) {
  const tiles = L.tileLayer(layer.url_template, {
    attribution: layer.attribution, opacity: layer.opacity, minZoom: layer.min_zoom
  });
  if (layer.show) tiles.addTo(map);
  overlays[layer.name] = tiles;
}
for (const o of config.outlines) {
  if (!overlays[o.group]) overlays[o.group] = L.layerGroup().addTo(map);
  L.rectangle([[o.south, o.west], [o.north, o.east]], { color: o.color, weight: 1, fill: false })
    .bindTooltip(o.label)
    .addTo(overlays[o.group]);
}
L.control.layers({ "OpenStreetMap": base }, overlays).addTo(map);
</script>
</body>
</html>
"#;

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

impl PreviewMap {
    pub fn new(title: &str, center: (f64, f64), zoom: u8) -> Self {
        Self {
            title: title.to_string(),
            center,
            zoom,
            tile_layers: Vec::new(),
            outlines: Vec::new(),
        }
    }

    /// Map centred on the AOI centroid at zoom 12, with the AOI outlined
    pub fn for_aoi(title: &str, aoi: &BoundingBox) -> Self {
        let mut map = Self::new(title, aoi.centroid(), 12);
        map.outlines.push(Outline::new("AOI", "Area of interest".to_string(), "#ff7800", aoi));
        map
    }

    /// Outline each tile, coloured by whether it was exported
    pub fn add_tiles(&mut self, tiles: &[Tile], skipped: &[usize]) {
        for tile in tiles {
            let (group, color) = if skipped.contains(&tile.index) {
                ("Skipped tiles", "#888888")
            } else {
                ("Exported tiles", "#1f78b4")
            };
            self.outlines
                .push(Outline::new(group, format!("Tile {}", tile.index), color, &tile.geometry));
        }
    }

    pub fn render_html(&self) -> MosaicResult<String> {
        // `</` cannot close the script element once escaped
        let config = serde_json::to_string(self)?.replace("</", "<\\/");
        Ok(TEMPLATE
            .replace("__TITLE__", &escape_html(&self.title))
            .replace("__CONFIG__", &config))
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> MosaicResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.render_html()?)?;
        log::info!("🗺️  Preview saved: {}", path.display());
        Ok(())
    }
}
