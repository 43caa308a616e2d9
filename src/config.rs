// src/config.rs

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::info;

use crate::cache::CachePolicy;
use crate::fetch::SourceRef;
use crate::loader::RasterSource;
use crate::scene::build::{GlobeStyle, GridStyle, HexagonStyle, MapViewStyle, SurfaceStyle};
use crate::scene::{FieldBindings, LocationMode, PositionBinding, Projection};
use crate::table::ColumnSpec;

pub const CONFIG_ENV: &str = "GEODASH_CONFIG";

const GAPMINDER_URL: &str =
    "https://raw.githubusercontent.com/plotly/datasets/master/gapminderDataFiveYear.csv";
const MT_BRUNO_URL: &str =
    "https://raw.githubusercontent.com/plotly/datasets/master/api_docs/mt_bruno_elevation.csv";

fn default_timeout_secs() -> u64 {
    30
}

fn default_year_column() -> String {
    "year".to_string()
}

/// Whole dashboard: global settings plus pages in navigation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Cache lifetime; unset keeps loads for the life of the process.
    #[serde(default)]
    pub cache_ttl_secs: Option<i64>,
    /// Base directory for relative file locations.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    pub pages: Vec<PageSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSpec {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub icon: Option<String>,
    pub panels: Vec<PanelSpec>,
}

/// One block of a page. Panels render in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelSpec {
    #[serde(default)]
    pub title: Option<String>,
    /// Environment variables that must be non-empty before the panel
    /// renders, e.g. a basemap token for the host's map renderer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires_env: Vec<String>,
    #[serde(flatten)]
    pub kind: PanelKind,
}

/// Static content shown by `content` panels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Heading { text: String },
    Text { text: String },
    Video { url: String },
    Image { url: String },
}

/// Whether years are rows (`long`) or one column per year (`wide`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableLayout {
    #[default]
    Long,
    Wide,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PanelKind {
    Content {
        blocks: Vec<ContentBlock>,
    },
    /// Seeded random points around `center`, drawn as hexagon bins.
    HexDensity {
        center: [f64; 2],
        points: usize,
        spread: f64,
        #[serde(default)]
        seed: u64,
        #[serde(default)]
        style: HexagonStyle,
        #[serde(default)]
        view: MapViewStyle,
    },
    /// Gaussian bump laid over `base ± extent` degrees, drawn as grid columns.
    SyntheticDem {
        size: usize,
        amplitude: f64,
        base: [f64; 2],
        extent: f64,
        #[serde(default)]
        style: GridStyle,
        #[serde(default)]
        view: MapViewStyle,
    },
    /// Year-driven country statistics on a globe.
    Globe {
        source: SourceRef,
        #[serde(default)]
        columns: Vec<ColumnSpec>,
        #[serde(default)]
        layout: TableLayout,
        #[serde(default = "default_year_column")]
        year_column: String,
        value_column: String,
        bindings: FieldBindings,
        #[serde(default)]
        style: GlobeStyle,
    },
    Surface {
        source: RasterSource,
        #[serde(default)]
        max_side: Option<usize>,
        #[serde(default)]
        style: SurfaceStyle,
    },
}

impl PanelKind {
    pub fn is_year_driven(&self) -> bool {
        matches!(self, PanelKind::Globe { .. })
    }
}

impl DashboardConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let cfg: DashboardConfig = serde_yaml::from_str(text).context("parsing dashboard config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg = Self::from_yaml_str(&text)
            .with_context(|| format!("loading config {}", path.display()))?;
        info!(path = %path.display(), pages = cfg.pages.len(), "loaded config");
        Ok(cfg)
    }

    /// Explicit path, then `GEODASH_CONFIG`, then the builtin dashboard.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_yaml_file(path);
        }
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::from_yaml_file(Path::new(&path)),
            _ => Ok(Self::builtin()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.pages.is_empty() {
            bail!("config has no pages");
        }
        if self.fetch_timeout_secs == 0 {
            bail!("fetch_timeout_secs must be at least 1");
        }
        self.cache_policy()?;
        let mut seen = HashSet::new();
        for page in &self.pages {
            if !seen.insert(page.id.as_str()) {
                bail!("duplicate page id `{}`", page.id);
            }
            for panel in &page.panels {
                if let PanelKind::HexDensity { spread, .. } = &panel.kind {
                    if !spread.is_finite() || *spread < 0.0 {
                        bail!("page `{}`: spread must be a non-negative number", page.id);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn cache_policy(&self) -> Result<CachePolicy> {
        match self.cache_ttl_secs {
            Some(secs) => CachePolicy::ttl_secs(secs).context("invalid cache_ttl_secs"),
            None => Ok(CachePolicy::forever()),
        }
    }

    pub fn page(&self, id: &str) -> Option<&PageSpec> {
        self.pages.iter().find(|p| p.id == id)
    }

    /// The three-page sample dashboard: a landing page, a pitched-map page
    /// with a point density and a synthetic DEM, and a globe/surface page.
    pub fn builtin() -> Self {
        let taipei = [121.5170, 25.0478];
        DashboardConfig {
            fetch_timeout_secs: default_timeout_secs(),
            cache_ttl_secs: None,
            data_dir: None,
            pages: vec![
                PageSpec {
                    id: "home".into(),
                    title: "Project home".into(),
                    icon: Some("🏠".into()),
                    panels: vec![PanelSpec {
                        title: None,
                        requires_env: Vec::new(),
                        kind: PanelKind::Content {
                            blocks: vec![
                                ContentBlock::Heading {
                                    text: "Welcome to the 3D GIS dashboard".into(),
                                },
                                ContentBlock::Text {
                                    text: "Interactive 3D maps built from sample and synthetic data."
                                        .into(),
                                },
                                ContentBlock::Video {
                                    url: "https://i.imgur.com/1GoAB0C.mp4".into(),
                                },
                                ContentBlock::Image {
                                    url: "https://i.imgur.com/uf1T4ND.png".into(),
                                },
                            ],
                        },
                    }],
                },
                PageSpec {
                    id: "map-3d".into(),
                    title: "3D map layers".into(),
                    icon: Some("🌏".into()),
                    panels: vec![
                        PanelSpec {
                            title: Some("Point density (hexagon bins)".into()),
                            requires_env: Vec::new(),
                            kind: PanelKind::HexDensity {
                                center: taipei,
                                points: 1000,
                                spread: 1.0 / 50.0,
                                seed: 0,
                                style: HexagonStyle {
                                    tooltip: Some("{elevationValue} points in this cell".into()),
                                    ..HexagonStyle::default()
                                },
                                view: MapViewStyle {
                                    center: Some(taipei),
                                    zoom: 12.0,
                                    ..MapViewStyle::default()
                                },
                            },
                        },
                        PanelSpec {
                            title: Some("Synthetic DEM (grid columns)".into()),
                            requires_env: Vec::new(),
                            kind: PanelKind::SyntheticDem {
                                size: 50,
                                amplitude: 1000.0,
                                base: [121.5, 25.0],
                                extent: 0.1,
                                style: GridStyle {
                                    tooltip: Some("elevation: {elevationValue} m".into()),
                                    ..GridStyle::default()
                                },
                                view: MapViewStyle {
                                    center: Some([121.5, 25.0]),
                                    ..MapViewStyle::default()
                                },
                            },
                        },
                    ],
                },
                PageSpec {
                    id: "globe-3d".into(),
                    title: "3D globe and surface".into(),
                    icon: Some("ℹ️".into()),
                    panels: vec![
                        PanelSpec {
                            title: Some("Population by country".into()),
                            requires_env: Vec::new(),
                            kind: PanelKind::Globe {
                                source: SourceRef::new(GAPMINDER_URL),
                                columns: vec![
                                    ColumnSpec::text("country"),
                                    ColumnSpec::text("continent"),
                                    ColumnSpec::year("year"),
                                    ColumnSpec::number("pop"),
                                ],
                                layout: TableLayout::Long,
                                year_column: "year".into(),
                                value_column: "pop".into(),
                                bindings: FieldBindings {
                                    position: PositionBinding::Location {
                                        column: "country".into(),
                                    },
                                    color: Some("continent".into()),
                                    size: Some("pop".into()),
                                    label: Some("country".into()),
                                },
                                style: GlobeStyle {
                                    projection: Projection::Orthographic,
                                    location_mode: LocationMode::CountryNames,
                                    ..GlobeStyle::default()
                                },
                            },
                        },
                        PanelSpec {
                            title: Some("Mt. Bruno elevation".into()),
                            requires_env: Vec::new(),
                            kind: PanelKind::Surface {
                                source: RasterSource::CsvGrid {
                                    location: MT_BRUNO_URL.into(),
                                },
                                max_side: None,
                                style: SurfaceStyle {
                                    axis_titles: [
                                        "longitude (x)".into(),
                                        "latitude (y)".into(),
                                        "elevation (z)".into(),
                                    ],
                                    ..SurfaceStyle::default()
                                },
                            },
                        },
                    ],
                },
            ],
        }
    }
}
