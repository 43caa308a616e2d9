// src/scene/mod.rs
pub mod build;

use serde::{Deserialize, Serialize};

use crate::raster::GridCell;

pub use build::{
    build_globe_scene, build_grid_scene, build_hexagon_scene, build_surface_scene,
};

/// What the renderer is asked to draw. `Empty` is returned instead of an
/// error when there is nothing to draw; the caller decides whether to show it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Scene {
    Empty { reason: String },
    Ready(SceneConfig),
}

impl Scene {
    pub fn empty(reason: impl Into<String>) -> Self {
        Scene::Empty {
            reason: reason.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Scene::Empty { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub geometry: Geometry,
    pub camera: Camera,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    #[default]
    Orthographic,
    NaturalEarth,
    Mercator,
}

/// How `location` strings identify a country.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationMode {
    #[default]
    Iso3,
    CountryNames,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColorValue {
    Number(f64),
    Category(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<ColorValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Geometry {
    /// Extruded hexagon bins over raw points; binning is left to the renderer.
    Hexagon {
        points: Vec<[f64; 2]>,
        radius: f64,
        elevation_scale: f64,
        elevation_range: [f64; 2],
        extruded: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tooltip: Option<String>,
    },
    /// Weighted cells aggregated into square columns.
    Grid {
        cells: Vec<GridCell>,
        cell_size: f64,
        elevation_scale: f64,
        extruded: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tooltip: Option<String>,
    },
    ScatterGeo {
        markers: Vec<Marker>,
        projection: Projection,
        location_mode: LocationMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color_field: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size_field: Option<String>,
    },
    Choropleth {
        locations: Vec<String>,
        values: Vec<f64>,
        labels: Vec<Option<String>>,
        value_field: String,
        colorscale: String,
        projection: Projection,
        location_mode: LocationMode,
    },
    Surface {
        z: Vec<Vec<f64>>,
        x: Vec<f64>,
        y: Vec<f64>,
        colorscale: String,
        axis_titles: [String; 3],
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Camera {
    /// Pitched map camera.
    MapView {
        latitude: f64,
        longitude: f64,
        zoom: f64,
        pitch: f64,
        #[serde(default)]
        bearing: f64,
    },
    /// Orthographic globe rotated to face `(rotation_lon, rotation_lat)`.
    Globe { rotation_lon: f64, rotation_lat: f64 },
    /// 3D orbit camera placed at `eye`.
    Orbit { eye: [f64; 3] },
}

impl Default for Camera {
    fn default() -> Self {
        Camera::Orbit {
            eye: [1.25, 1.25, 1.25],
        }
    }
}

/// How a position is read from a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum PositionBinding {
    /// Country code or name column, resolved by the renderer.
    Location { column: String },
    LonLat { lon: String, lat: String },
}

/// Which table columns drive position, color, size and hover label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldBindings {
    pub position: PositionBinding,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}
