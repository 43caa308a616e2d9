// src/scene/build.rs
//
// Pure mapping from loaded data to a Scene. No I/O happens here.

use arrow::{
    array::{Array, ArrayRef, Float64Array, StringArray},
    compute,
    datatypes::DataType,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    Camera, ColorValue, FieldBindings, Geometry, LocationMode, Marker, PositionBinding,
    Projection, Scene, SceneConfig,
};
use crate::error::{PageResult, UnclassifiedSnafu};
use crate::raster::{GridCell, RasterGrid};
use crate::table::{Dataset, YearSlice};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HexagonStyle {
    pub radius: f64,
    pub elevation_scale: f64,
    pub elevation_range: [f64; 2],
    #[serde(default)]
    pub tooltip: Option<String>,
}

impl Default for HexagonStyle {
    fn default() -> Self {
        Self {
            radius: 100.0,
            elevation_scale: 4.0,
            elevation_range: [0.0, 1000.0],
            tooltip: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridStyle {
    pub cell_size: f64,
    pub elevation_scale: f64,
    #[serde(default)]
    pub tooltip: Option<String>,
}

impl Default for GridStyle {
    fn default() -> Self {
        Self {
            cell_size: 2000.0,
            elevation_scale: 1.0,
            tooltip: None,
        }
    }
}

/// Map-view camera settings; the centre defaults to the data's mean position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapViewStyle {
    #[serde(default)]
    pub center: Option<[f64; 2]>,
    pub zoom: f64,
    pub pitch: f64,
    #[serde(default)]
    pub bearing: f64,
}

impl Default for MapViewStyle {
    fn default() -> Self {
        Self {
            center: None,
            zoom: 10.0,
            pitch: 50.0,
            bearing: 0.0,
        }
    }
}

impl MapViewStyle {
    fn camera(&self, positions: impl Iterator<Item = [f64; 2]>) -> Camera {
        let [longitude, latitude] = self.center.unwrap_or_else(|| mean_position(positions));
        Camera::MapView {
            latitude,
            longitude,
            zoom: self.zoom,
            pitch: self.pitch,
            bearing: self.bearing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobeDisplay {
    #[default]
    Scatter,
    Choropleth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobeStyle {
    #[serde(default)]
    pub display: GlobeDisplay,
    #[serde(default)]
    pub projection: Projection,
    #[serde(default)]
    pub location_mode: LocationMode,
    #[serde(default = "default_colorscale")]
    pub colorscale: String,
    /// `[lon, lat]` the globe faces initially
    #[serde(default)]
    pub rotation: [f64; 2],
}

impl Default for GlobeStyle {
    fn default() -> Self {
        Self {
            display: GlobeDisplay::default(),
            projection: Projection::default(),
            location_mode: LocationMode::default(),
            colorscale: default_colorscale(),
            rotation: [0.0, 0.0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceStyle {
    #[serde(default = "default_colorscale")]
    pub colorscale: String,
    #[serde(default = "default_axis_titles")]
    pub axis_titles: [String; 3],
    #[serde(default)]
    pub eye: Option<[f64; 3]>,
}

impl Default for SurfaceStyle {
    fn default() -> Self {
        Self {
            colorscale: default_colorscale(),
            axis_titles: default_axis_titles(),
            eye: None,
        }
    }
}

fn default_colorscale() -> String {
    "Viridis".to_string()
}

fn default_axis_titles() -> [String; 3] {
    ["x".to_string(), "y".to_string(), "z".to_string()]
}

fn mean_position(positions: impl Iterator<Item = [f64; 2]>) -> [f64; 2] {
    let (mut lon, mut lat, mut n) = (0.0, 0.0, 0usize);
    for [x, y] in positions {
        lon += x;
        lat += y;
        n += 1;
    }
    if n == 0 {
        [0.0, 0.0]
    } else {
        [lon / n as f64, lat / n as f64]
    }
}

pub fn build_hexagon_scene(
    points: &[[f64; 2]],
    style: &HexagonStyle,
    view: &MapViewStyle,
    title: Option<&str>,
) -> Scene {
    if points.is_empty() {
        return Scene::empty("no points to bin");
    }
    Scene::Ready(SceneConfig {
        title: title.map(str::to_string),
        camera: view.camera(points.iter().copied()),
        geometry: Geometry::Hexagon {
            points: points.to_vec(),
            radius: style.radius,
            elevation_scale: style.elevation_scale,
            elevation_range: style.elevation_range,
            extruded: true,
            tooltip: style.tooltip.clone(),
        },
    })
}

pub fn build_grid_scene(
    cells: Vec<GridCell>,
    style: &GridStyle,
    view: &MapViewStyle,
    title: Option<&str>,
) -> Scene {
    if cells.is_empty() {
        return Scene::empty("no grid cells");
    }
    let camera = view.camera(cells.iter().map(|c| [c.lon, c.lat]));
    Scene::Ready(SceneConfig {
        title: title.map(str::to_string),
        camera,
        geometry: Geometry::Grid {
            cells,
            cell_size: style.cell_size,
            elevation_scale: style.elevation_scale,
            extruded: true,
            tooltip: style.tooltip.clone(),
        },
    })
}

pub fn build_surface_scene(grid: &RasterGrid, style: &SurfaceStyle, title: Option<&str>) -> Scene {
    if grid.value_range().is_none() {
        return Scene::empty("raster has no finite samples");
    }
    let camera = match style.eye {
        Some(eye) => Camera::Orbit { eye },
        None => Camera::default(),
    };
    Scene::Ready(SceneConfig {
        title: title.map(str::to_string),
        camera,
        geometry: Geometry::Surface {
            z: grid.to_rows(),
            x: grid.x().to_vec(),
            y: grid.y().to_vec(),
            colorscale: style.colorscale.clone(),
            axis_titles: style.axis_titles.clone(),
        },
    })
}

fn strings(ds: &Dataset, name: &str) -> PageResult<Vec<Option<String>>> {
    let col = ds.column(name)?;
    let cast = as_type(col, &DataType::Utf8, name)?;
    let arr = cast
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| cast_failure(name, "text"))?;
    Ok(arr.iter().map(|o| o.map(str::to_string)).collect())
}

fn numbers(ds: &Dataset, name: &str) -> PageResult<Vec<Option<f64>>> {
    let col = ds.column(name)?;
    let cast = as_type(col, &DataType::Float64, name)?;
    let arr = cast
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| cast_failure(name, "numbers"))?;
    Ok(arr.iter().map(|o| o.filter(|v| v.is_finite())).collect())
}

fn colors(ds: &Dataset, name: &str) -> PageResult<Vec<Option<ColorValue>>> {
    let numeric = ds.column(name)?.data_type().is_numeric();
    if numeric {
        Ok(numbers(ds, name)?
            .into_iter()
            .map(|v| v.map(ColorValue::Number))
            .collect())
    } else {
        Ok(strings(ds, name)?
            .into_iter()
            .map(|v| v.map(ColorValue::Category))
            .collect())
    }
}

fn as_type(col: &ArrayRef, to: &DataType, name: &str) -> PageResult<ArrayRef> {
    if col.data_type() == to {
        return Ok(col.clone());
    }
    compute::cast(col, to).map_err(|e| {
        UnclassifiedSnafu {
            message: format!("reading `{}`: {}", name, e),
        }
        .build()
    })
}

fn cast_failure(name: &str, what: &str) -> crate::error::PageError {
    UnclassifiedSnafu {
        message: format!("`{}` could not be read as {}", name, what),
    }
    .build()
}

fn optional<T>(
    ds: &Dataset,
    name: Option<&String>,
    read: impl Fn(&Dataset, &str) -> PageResult<Vec<Option<T>>>,
) -> PageResult<Vec<Option<T>>> {
    match name {
        Some(n) => read(ds, n),
        None => Ok((0..ds.num_rows()).map(|_| None).collect()),
    }
}

/// Globe scene for one year slice. Rows without a position are skipped.
/// Choropleths colour by the `color` binding, or the slice's value column.
pub fn build_globe_scene(
    slice: &YearSlice,
    bindings: &FieldBindings,
    style: &GlobeStyle,
    title: Option<&str>,
) -> PageResult<Scene> {
    if slice.is_empty() {
        return Ok(Scene::empty(format!("no rows for {}", slice.year)));
    }
    let ds = slice.as_dataset("slice");

    let camera = Camera::Globe {
        rotation_lon: style.rotation[0],
        rotation_lat: style.rotation[1],
    };
    let labels = optional(&ds, bindings.label.as_ref(), strings)?;

    let geometry = match style.display {
        GlobeDisplay::Scatter => {
            let positions: Vec<(Option<String>, Option<[f64; 2]>)> = match &bindings.position {
                PositionBinding::Location { column } => strings(&ds, column)?
                    .into_iter()
                    .map(|loc| (loc, None))
                    .collect(),
                PositionBinding::LonLat { lon, lat } => numbers(&ds, lon)?
                    .into_iter()
                    .zip(numbers(&ds, lat)?)
                    .map(|(x, y)| (None, x.zip(y).map(|(x, y)| [x, y])))
                    .collect(),
            };
            let color = optional(&ds, bindings.color.as_ref(), colors)?;
            let size = optional(&ds, bindings.size.as_ref(), numbers)?;

            let markers: Vec<Marker> = positions
                .into_iter()
                .enumerate()
                .filter(|(_, (loc, pos))| loc.is_some() || pos.is_some())
                .map(|(i, (location, position))| Marker {
                    location,
                    position,
                    color: color[i].clone(),
                    size: size[i],
                    label: labels[i].clone(),
                })
                .collect();
            if markers.is_empty() {
                return Ok(Scene::empty("no rows with a position"));
            }
            Geometry::ScatterGeo {
                markers,
                projection: style.projection,
                location_mode: style.location_mode,
                color_field: bindings.color.clone(),
                size_field: bindings.size.clone(),
            }
        }
        GlobeDisplay::Choropleth => {
            let PositionBinding::Location { column } = &bindings.position else {
                return UnclassifiedSnafu {
                    message: "choropleth needs a location binding",
                }
                .fail();
            };
            let value_field = bindings
                .color
                .clone()
                .unwrap_or_else(|| slice.value_column.clone());
            let locs = strings(&ds, column)?;
            let vals = numbers(&ds, &value_field)?;

            let mut locations = Vec::new();
            let mut values = Vec::new();
            let mut kept_labels = Vec::new();
            for (i, (loc, val)) in locs.into_iter().zip(vals).enumerate() {
                if let (Some(loc), Some(val)) = (loc, val) {
                    locations.push(loc);
                    values.push(val);
                    kept_labels.push(labels[i].clone());
                }
            }
            if locations.is_empty() {
                return Ok(Scene::empty("no rows with a location and value"));
            }
            Geometry::Choropleth {
                locations,
                values,
                labels: kept_labels,
                value_field,
                colorscale: style.colorscale.clone(),
                projection: style.projection,
                location_mode: style.location_mode,
            }
        }
    };
    debug!(year = slice.year, display = ?style.display, "built globe scene");

    Ok(Scene::Ready(SceneConfig {
        title: title.map(str::to_string),
        geometry,
        camera,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PageError;
    use crate::table::{parse_csv, ColumnSpec, YearFilter};

    const GAPMINDER: &str = "country,continent,year,pop,iso_alpha\n\
Taiwan,Asia,2007,23174294,TWN\n\
Japan,Asia,2007,127467972,JPN\n\
Chad,Africa,2007,,TCD\n\
Chile,Americas,2002,15497046,CHL\n";

    fn filter() -> YearFilter {
        let ds = parse_csv(
            "gapminder.csv",
            GAPMINDER.as_bytes(),
            0,
            &[ColumnSpec::year("year"), ColumnSpec::number("pop")],
        )
        .unwrap();
        YearFilter::new(ds, "year", "pop").unwrap()
    }

    fn bindings() -> FieldBindings {
        FieldBindings {
            position: PositionBinding::Location {
                column: "iso_alpha".into(),
            },
            color: Some("continent".into()),
            size: Some("pop".into()),
            label: Some("country".into()),
        }
    }

    #[test]
    fn scatter_globe_for_a_year() {
        let slice = filter().slice(2007).unwrap();
        let scene = build_globe_scene(&slice, &bindings(), &GlobeStyle::default(), Some("t")).unwrap();
        let Scene::Ready(cfg) = scene else {
            panic!("expected a scene");
        };
        let Geometry::ScatterGeo {
            markers,
            projection,
            ..
        } = cfg.geometry
        else {
            panic!("expected scatter geometry");
        };
        assert_eq!(projection, Projection::Orthographic);
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].location.as_deref(), Some("TWN"));
        assert_eq!(markers[0].color, Some(ColorValue::Category("Asia".into())));
        assert_eq!(markers[1].size, Some(127467972.0));
        assert_eq!(markers[1].label.as_deref(), Some("Japan"));
    }

    #[test]
    fn choropleth_defaults_to_value_column() {
        let slice = filter().slice(2007).unwrap();
        let mut b = bindings();
        b.color = None;
        let style = GlobeStyle {
            display: GlobeDisplay::Choropleth,
            ..GlobeStyle::default()
        };
        let Scene::Ready(cfg) = build_globe_scene(&slice, &b, &style, None).unwrap() else {
            panic!("expected a scene");
        };
        match cfg.geometry {
            Geometry::Choropleth {
                locations,
                values,
                value_field,
                ..
            } => {
                assert_eq!(locations, vec!["TWN", "JPN"]);
                assert_eq!(values, vec![23174294.0, 127467972.0]);
                assert_eq!(value_field, "pop");
            }
            other => panic!("unexpected geometry {:?}", other),
        }
    }

    #[test]
    fn empty_slice_is_an_empty_scene() {
        let slice = filter().slice(1800).unwrap();
        let scene = build_globe_scene(&slice, &bindings(), &GlobeStyle::default(), None).unwrap();
        assert!(scene.is_empty());
    }

    #[test]
    fn unknown_binding_is_reported() {
        let slice = filter().slice(2007).unwrap();
        let mut b = bindings();
        b.size = Some("gdpPercap".into());
        let err = build_globe_scene(&slice, &b, &GlobeStyle::default(), None).unwrap_err();
        assert_eq!(
            err,
            PageError::UnknownColumn {
                column: "gdpPercap".into()
            }
        );
    }

    #[test]
    fn hexagon_camera_centres_on_points() {
        let scene = build_hexagon_scene(
            &[[121.0, 25.0], [122.0, 26.0]],
            &HexagonStyle::default(),
            &MapViewStyle::default(),
            None,
        );
        let Scene::Ready(cfg) = scene else {
            panic!("expected a scene");
        };
        assert_eq!(
            cfg.camera,
            Camera::MapView {
                latitude: 25.5,
                longitude: 121.5,
                zoom: 10.0,
                pitch: 50.0,
                bearing: 0.0
            }
        );
        assert!(build_hexagon_scene(&[], &HexagonStyle::default(), &MapViewStyle::default(), None)
            .is_empty());
    }

    #[test]
    fn surface_scene_serialises_rows() {
        let grid = RasterGrid::with_index_coords(vec![1.0, 2.0, 3.0, 4.0], 2, 2).unwrap();
        let scene = build_surface_scene(&grid, &SurfaceStyle::default(), Some("bruno"));
        let json = serde_json::to_value(&scene).unwrap();
        assert_eq!(json["status"], "ready");
        assert_eq!(json["geometry"]["kind"], "surface");
        assert_eq!(json["geometry"]["z"][1][0], 3.0);
        assert_eq!(json["camera"]["type"], "orbit");

        let nan = RasterGrid::with_index_coords(vec![f64::NAN; 4], 2, 2).unwrap();
        assert!(build_surface_scene(&nan, &SurfaceStyle::default(), None).is_empty());
    }
}
