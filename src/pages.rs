// src/pages.rs

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    any::Any,
    collections::BTreeSet,
    panic::{self, AssertUnwindSafe},
    path::Path,
    sync::Arc,
};
use tracing::{error, info, instrument, warn};

use crate::cache::{MemoKey, MemoStore};
use crate::config::{ContentBlock, DashboardConfig, PageSpec, PanelKind, PanelSpec, TableLayout};
use crate::error::{
    EmptySelectionSnafu, MissingSecretSnafu, PageError, PageResult, UnknownPageSnafu,
};
use crate::fetch::SourceRef;
use crate::loader::{DataLoader, RasterSource};
use crate::scene::{
    build_globe_scene, build_grid_scene, build_hexagon_scene, build_surface_scene, Scene,
};
use crate::synthetic::scatter_points;
use crate::table::{melt_years, ColumnSpec, SemanticType, YearFilter};

/// What the UI shell asks for on every interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub page: String,
    #[serde(default)]
    pub year: Option<i64>,
}

impl Selection {
    pub fn page(page: impl Into<String>) -> Self {
        Self {
            page: page.into(),
            year: None,
        }
    }

    pub fn with_year(mut self, year: i64) -> Self {
        self.year = Some(year);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavEntry {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Result of rendering one panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PanelOutcome {
    Content { blocks: Vec<ContentBlock> },
    Rendered { scene: Scene },
    /// Nothing to draw for this selection; later panels still render.
    Warning { message: String },
    /// The page stops here.
    Failed { message: String },
}

impl PanelOutcome {
    fn from_error(err: &PageError) -> Self {
        if err.is_warning() {
            PanelOutcome::Warning {
                message: err.to_string(),
            }
        } else {
            PanelOutcome::Failed {
                message: err.to_string(),
            }
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PanelOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelView {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub outcome: PanelOutcome,
}

/// Everything the shell needs to draw one page for one selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageView {
    pub page: String,
    pub title: String,
    /// Union of the Year Indexes of the page's year-driven panels, newest first.
    pub years: Vec<i64>,
    pub year: Option<i64>,
    pub panels: Vec<PanelView>,
    /// Set when a panel failed and the remaining panels were not rendered.
    pub halted: bool,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "page panicked".to_string()
    }
}

/// Declared columns for a long table: the year and value columns are always typed.
fn long_columns(columns: &[ColumnSpec], year_column: &str, value_column: &str) -> Vec<ColumnSpec> {
    let mut out = columns.to_vec();
    if !out.iter().any(|c| c.name == year_column) {
        out.push(ColumnSpec::year(year_column));
    }
    if !out.iter().any(|c| c.name == value_column) {
        out.push(ColumnSpec::number(value_column));
    }
    out
}

/// Config plus data loader; `render` is the only entry point the shell needs.
#[derive(Debug)]
pub struct Dashboard {
    config: DashboardConfig,
    loader: DataLoader,
    filters: MemoStore<YearFilter>,
}

impl Dashboard {
    pub fn new(config: DashboardConfig) -> Result<Self> {
        let loader = DataLoader::new(config.fetch_timeout(), config.cache_policy()?)?;
        Ok(Self::with_loader(config, loader))
    }

    /// Year indexes share the loader's cache policy.
    pub fn with_loader(config: DashboardConfig, loader: DataLoader) -> Self {
        let filters = MemoStore::new(loader.tables().policy());
        Self {
            config,
            loader,
            filters,
        }
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn loader(&self) -> &DataLoader {
        &self.loader
    }

    /// Drop every memoized load and year index.
    pub fn clear_cache(&self) {
        self.loader.clear();
        self.filters.clear();
    }

    pub fn navigation(&self) -> Vec<NavEntry> {
        self.config
            .pages
            .iter()
            .map(|p| NavEntry {
                id: p.id.clone(),
                title: p.title.clone(),
                icon: p.icon.clone(),
            })
            .collect()
    }

    fn page(&self, id: &str) -> PageResult<&PageSpec> {
        match self.config.page(id) {
            Some(page) => Ok(page),
            None => UnknownPageSnafu { page: id }.fail(),
        }
    }

    /// Year choices for `page`, newest first. Empty for pages without
    /// year-driven panels.
    pub fn years(&self, page: &str) -> PageResult<Vec<i64>> {
        let spec = self.page(page)?;
        let mut years = BTreeSet::new();
        for panel in spec.panels.iter().filter(|p| p.kind.is_year_driven()) {
            years.extend(self.year_filter(&panel.kind)?.index().iter().copied());
        }
        Ok(years.into_iter().rev().collect())
    }

    /// Render every panel of the selected page. Only an unknown page is an
    /// error; everything else is reported inside the returned view.
    #[instrument(level = "info", skip(self), fields(page = %selection.page, year = ?selection.year))]
    pub fn render(&self, selection: &Selection) -> PageResult<PageView> {
        let spec = self.page(&selection.page)?;

        // failed loads are not memoized, so each panel's attempt is kept for its render
        let prepared: Vec<Option<PageResult<Arc<YearFilter>>>> = spec
            .panels
            .iter()
            .map(|p| p.kind.is_year_driven().then(|| self.year_filter(&p.kind)))
            .collect();
        let mut years = BTreeSet::new();
        for filter in prepared.iter().flatten().flatten() {
            years.extend(filter.index().iter().copied());
        }
        let years: Vec<i64> = years.into_iter().rev().collect();
        let year = selection.year.or_else(|| years.first().copied());

        let mut panels = Vec::with_capacity(spec.panels.len());
        let mut halted = false;
        for (panel, filter) in spec.panels.iter().zip(prepared) {
            let outcome = self.render_guarded(panel, year, filter);
            let failed = outcome.is_failed();
            panels.push(PanelView {
                title: panel.title.clone(),
                outcome,
            });
            if failed {
                halted = true;
                break;
            }
        }
        info!(panels = panels.len(), halted, "rendered page");

        Ok(PageView {
            page: spec.id.clone(),
            title: spec.title.clone(),
            years,
            year,
            panels,
            halted,
        })
    }

    fn render_guarded(
        &self,
        panel: &PanelSpec,
        year: Option<i64>,
        filter: Option<PageResult<Arc<YearFilter>>>,
    ) -> PanelOutcome {
        match panic::catch_unwind(AssertUnwindSafe(|| self.render_panel(panel, year, filter))) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                if err.is_warning() {
                    warn!(error = %err, "panel skipped");
                } else {
                    error!(error = %err, "panel failed");
                }
                PanelOutcome::from_error(&err)
            }
            Err(payload) => {
                let message = panic_message(payload);
                error!(%message, "panel panicked");
                PanelOutcome::Failed { message }
            }
        }
    }

    /// `filter` is the year index already loaded for this panel, if any.
    fn render_panel(
        &self,
        panel: &PanelSpec,
        year: Option<i64>,
        filter: Option<PageResult<Arc<YearFilter>>>,
    ) -> PageResult<PanelOutcome> {
        if let Some(name) = panel
            .requires_env
            .iter()
            .find(|name| std::env::var_os(name).map_or(true, |v| v.is_empty()))
        {
            return MissingSecretSnafu { name: name.as_str() }.fail();
        }
        let title = panel.title.as_deref();
        let scene = match &panel.kind {
            PanelKind::Content { blocks } => {
                return Ok(PanelOutcome::Content {
                    blocks: blocks.clone(),
                })
            }
            PanelKind::HexDensity {
                center,
                points,
                spread,
                seed,
                style,
                view,
            } => {
                let pts = scatter_points(*center, *points, *spread, *seed)?;
                build_hexagon_scene(&pts, style, view, title)
            }
            PanelKind::SyntheticDem {
                size,
                amplitude,
                base,
                extent,
                style,
                view,
            } => {
                let grid = self.loader.load_raster(&RasterSource::Gaussian {
                    size: *size,
                    amplitude: *amplitude,
                })?;
                build_grid_scene(grid.to_cells(*base, Some(*extent)), style, view, title)
            }
            PanelKind::Globe {
                value_column,
                bindings,
                style,
                ..
            } => {
                let filter = match filter {
                    Some(filter) => filter?,
                    None => self.year_filter(&panel.kind)?,
                };
                let year = year.unwrap_or_else(|| filter.latest());
                let slice = filter.slice(year)?;
                if slice.is_empty() {
                    return EmptySelectionSnafu {
                        year,
                        column: value_column.as_str(),
                    }
                    .fail();
                }
                build_globe_scene(&slice, bindings, style, title)?
            }
            PanelKind::Surface {
                source,
                max_side,
                style,
            } => {
                let grid = self.loader.load_raster(&self.resolve_raster(source))?;
                match max_side {
                    Some(side) => build_surface_scene(&grid.resample(*side)?, style, title),
                    None => build_surface_scene(&grid, style, title),
                }
            }
        };

        Ok(match scene {
            Scene::Empty { reason } => PanelOutcome::Warning { message: reason },
            scene => PanelOutcome::Rendered { scene },
        })
    }

    /// Load, reshape if wide, and index a globe panel's table. Memoized.
    fn year_filter(&self, kind: &PanelKind) -> PageResult<Arc<YearFilter>> {
        let PanelKind::Globe {
            source,
            columns,
            layout,
            year_column,
            value_column,
            ..
        } = kind
        else {
            return Err(PageError::Unclassified {
                message: "panel has no year index".into(),
            });
        };
        let source = self.resolve_source(source);
        let key = MemoKey::new(
            "year_filter",
            &(&source, columns, layout, year_column, value_column),
        );
        self.filters.get_or_load(&key, || {
            let dataset = match layout {
                TableLayout::Long => {
                    let declared = long_columns(columns, year_column, value_column);
                    self.loader.load_table(&source, &declared)?.as_ref().clone()
                }
                TableLayout::Wide => {
                    // year headers only exist before the reshape, so only id columns are declared
                    let declared: Vec<ColumnSpec> = columns
                        .iter()
                        .filter(|c| c.kind != SemanticType::Year)
                        .cloned()
                        .collect();
                    let wide = self.loader.load_table(&source, &declared)?;
                    melt_years(&wide, year_column, value_column)
                        .map_err(|e| PageError::data_unavailable(source.id(), &e))?
                }
            };
            YearFilter::new(dataset, year_column, value_column)
        })
    }

    fn resolve_location(&self, location: &str) -> String {
        match &self.config.data_dir {
            Some(dir) if !location.contains("://") && Path::new(location).is_relative() => {
                dir.join(location).to_string_lossy().into_owned()
            }
            _ => location.to_string(),
        }
    }

    fn resolve_source(&self, source: &SourceRef) -> SourceRef {
        SourceRef {
            location: self.resolve_location(&source.location),
            ..source.clone()
        }
    }

    fn resolve_raster(&self, source: &RasterSource) -> RasterSource {
        match source {
            RasterSource::Geotiff { location } => RasterSource::Geotiff {
                location: self.resolve_location(location),
            },
            RasterSource::CsvGrid { location } => RasterSource::CsvGrid {
                location: self.resolve_location(location),
            },
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::build::{GlobeStyle, HexagonStyle, MapViewStyle, SurfaceStyle};
    use crate::scene::{FieldBindings, Geometry, PositionBinding};
    use std::fs;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use tempfile::{tempdir, TempDir};

    fn globe_panel(location: &str, layout: TableLayout, value: &str) -> PanelSpec {
        PanelSpec {
            title: Some("globe".into()),
            requires_env: Vec::new(),
            kind: PanelKind::Globe {
                source: SourceRef::new(location),
                columns: vec![],
                layout,
                year_column: "year".into(),
                value_column: value.into(),
                bindings: FieldBindings {
                    position: PositionBinding::Location {
                        column: "iso".into(),
                    },
                    color: None,
                    size: Some(value.into()),
                    label: None,
                },
                style: GlobeStyle::default(),
            },
        }
    }

    fn dashboard(dir: &TempDir, panels: Vec<PanelSpec>) -> Dashboard {
        let config = DashboardConfig {
            fetch_timeout_secs: 2,
            cache_ttl_secs: None,
            data_dir: Some(dir.path().to_path_buf()),
            pages: vec![PageSpec {
                id: "p".into(),
                title: "Page".into(),
                icon: None,
                panels,
            }],
        };
        Dashboard::new(config).unwrap()
    }

    fn stats_dir() -> TempDir {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("stats.csv"),
            "iso,year,value\nTWN,2020,5\nJPN,2020,\nTWN,2019,3\nKOR,n/a,9\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn navigation_follows_config_order() {
        let dash = Dashboard::new(DashboardConfig::builtin()).unwrap();
        let ids: Vec<String> = dash.navigation().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["home", "map-3d", "globe-3d"]);
    }

    #[test]
    fn defaults_to_latest_year() {
        let dir = stats_dir();
        let dash = dashboard(&dir, vec![globe_panel("stats.csv", TableLayout::Long, "value")]);
        assert_eq!(dash.years("p").unwrap(), vec![2020, 2019]);

        let view = dash.render(&Selection::page("p")).unwrap();
        assert_eq!(view.year, Some(2020));
        assert!(!view.halted);
        match &view.panels[0].outcome {
            PanelOutcome::Rendered {
                scene: Scene::Ready(cfg),
            } => match &cfg.geometry {
                Geometry::ScatterGeo { markers, .. } => {
                    assert_eq!(markers.len(), 1);
                    assert_eq!(markers[0].location.as_deref(), Some("TWN"));
                }
                other => panic!("unexpected geometry {:?}", other),
            },
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn absent_year_is_a_warning() {
        let dir = stats_dir();
        let dash = dashboard(&dir, vec![globe_panel("stats.csv", TableLayout::Long, "value")]);
        let view = dash.render(&Selection::page("p").with_year(1800)).unwrap();
        assert_eq!(view.year, Some(1800));
        assert_eq!(view.years, vec![2020, 2019]);
        assert!(!view.halted);
        match &view.panels[0].outcome {
            PanelOutcome::Warning { message } => assert!(message.contains("1800")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn missing_source_halts_the_page() {
        let dir = tempdir().unwrap();
        let panels = vec![
            globe_panel("missing.csv", TableLayout::Long, "value"),
            PanelSpec {
                title: None,
                requires_env: Vec::new(),
                kind: PanelKind::Content { blocks: vec![] },
            },
        ];
        let dash = dashboard(&dir, panels);
        assert!(matches!(
            dash.years("p"),
            Err(PageError::DataUnavailable { .. })
        ));

        let view = dash.render(&Selection::page("p")).unwrap();
        assert!(view.halted);
        assert!(view.years.is_empty());
        assert_eq!(view.panels.len(), 1);
        match &view.panels[0].outcome {
            PanelOutcome::Failed { message } => assert!(message.contains("missing.csv")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    /// Answers every request with a 404 and counts connections.
    fn not_found_server() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(
                    b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                );
            }
        });
        (base, hits)
    }

    #[test]
    fn failing_source_is_fetched_once_per_render() {
        let dir = tempdir().unwrap();
        let (base, hits) = not_found_server();
        let location = format!("{}/stats.csv", base);
        let dash = dashboard(&dir, vec![globe_panel(&location, TableLayout::Long, "value")]);

        let view = dash.render(&Selection::page("p")).unwrap();
        assert!(view.halted);
        assert!(matches!(view.panels[0].outcome, PanelOutcome::Failed { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // not memoized: the next interaction tries again
        dash.render(&Selection::page("p")).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_panel_fails_and_halts() {
        let dir = tempdir().unwrap();
        let panels = vec![
            PanelSpec {
                title: Some("too many points".into()),
                requires_env: Vec::new(),
                kind: PanelKind::HexDensity {
                    center: [121.5, 25.0],
                    // the point buffer cannot be allocated
                    points: usize::MAX,
                    spread: 0.02,
                    seed: 0,
                    style: HexagonStyle::default(),
                    view: MapViewStyle::default(),
                },
            },
            PanelSpec {
                title: None,
                requires_env: Vec::new(),
                kind: PanelKind::Content { blocks: vec![] },
            },
        ];
        let dash = dashboard(&dir, panels);
        let view = dash.render(&Selection::page("p")).unwrap();
        assert!(view.halted);
        assert_eq!(view.panels.len(), 1);
        match &view.panels[0].outcome {
            PanelOutcome::Failed { message } => assert!(!message.is_empty()),
            other => panic!("unexpected outcome {:?}", other),
        }

        // the dashboard stays usable
        let again = dash.render(&Selection::page("p")).unwrap();
        assert!(again.halted);
    }

    #[test]
    fn missing_secret_fails_the_panel() {
        let dir = tempdir().unwrap();
        let panels = vec![
            PanelSpec {
                title: None,
                requires_env: vec!["GEODASH_TEST_UNSET_BASEMAP_TOKEN".into()],
                kind: PanelKind::Content { blocks: vec![] },
            },
            PanelSpec {
                title: None,
                requires_env: Vec::new(),
                kind: PanelKind::Content { blocks: vec![] },
            },
        ];
        let view = dashboard(&dir, panels)
            .render(&Selection::page("p"))
            .unwrap();
        assert!(view.halted);
        assert_eq!(view.panels.len(), 1);
        match &view.panels[0].outcome {
            PanelOutcome::Failed { message } => {
                assert!(message.contains("GEODASH_TEST_UNSET_BASEMAP_TOKEN"))
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn missing_raster_fails_before_decoding() {
        let dir = tempdir().unwrap();
        let dash = dashboard(
            &dir,
            vec![PanelSpec {
                title: None,
                requires_env: Vec::new(),
                kind: PanelKind::Surface {
                    source: RasterSource::Geotiff {
                        location: "dem/absent.tif".into(),
                    },
                    max_side: Some(100),
                    style: SurfaceStyle::default(),
                },
            }],
        );
        let view = dash.render(&Selection::page("p")).unwrap();
        match &view.panels[0].outcome {
            PanelOutcome::Failed { message } => assert!(message.contains("data unavailable")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn wide_table_is_melted_before_indexing() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("wide.csv"),
            "iso,2019 [YR2019],2020 [YR2020]\nTWN,1.5,..\nJPN,2.5,3.5\n",
        )
        .unwrap();
        let dash = dashboard(&dir, vec![globe_panel("wide.csv", TableLayout::Wide, "share")]);
        assert_eq!(dash.years("p").unwrap(), vec![2020, 2019]);

        let view = dash.render(&Selection::page("p").with_year(2019)).unwrap();
        match &view.panels[0].outcome {
            PanelOutcome::Rendered {
                scene: Scene::Ready(cfg),
            } => match &cfg.geometry {
                Geometry::ScatterGeo { markers, .. } => assert_eq!(markers.len(), 2),
                other => panic!("unexpected geometry {:?}", other),
            },
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn unknown_binding_fails_the_panel() {
        let dir = stats_dir();
        let mut panel = globe_panel("stats.csv", TableLayout::Long, "value");
        if let PanelKind::Globe { bindings, .. } = &mut panel.kind {
            bindings.label = Some("country".into());
        }
        let view = dashboard(&dir, vec![panel])
            .render(&Selection::page("p"))
            .unwrap();
        match &view.panels[0].outcome {
            PanelOutcome::Failed { message } => assert!(message.contains("country")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn unknown_page_is_an_error() {
        let dash = Dashboard::new(DashboardConfig::builtin()).unwrap();
        assert!(matches!(
            dash.render(&Selection::page("nope")),
            Err(PageError::UnknownPage { .. })
        ));
    }

    #[test]
    fn builtin_offline_pages_render() {
        let dash = Dashboard::new(DashboardConfig::builtin()).unwrap();

        let home = dash.render(&Selection::page("home")).unwrap();
        assert!(home.years.is_empty());
        assert_eq!(home.year, None);
        assert!(matches!(
            &home.panels[0].outcome,
            PanelOutcome::Content { blocks } if blocks.len() == 4
        ));

        let maps = dash.render(&Selection::page("map-3d")).unwrap();
        assert_eq!(maps.panels.len(), 2);
        for panel in &maps.panels {
            assert!(matches!(panel.outcome, PanelOutcome::Rendered { .. }));
        }
        if let PanelOutcome::Rendered {
            scene: Scene::Ready(cfg),
        } = &maps.panels[1].outcome
        {
            match &cfg.geometry {
                Geometry::Grid { cells, .. } => assert_eq!(cells.len(), 2500),
                other => panic!("unexpected geometry {:?}", other),
            }
        }
    }

    #[test]
    fn render_is_repeatable() {
        let dir = stats_dir();
        let dash = dashboard(&dir, vec![globe_panel("stats.csv", TableLayout::Long, "value")]);
        let a = dash.render(&Selection::page("p").with_year(2019)).unwrap();
        let b = dash.render(&Selection::page("p").with_year(2019)).unwrap();
        assert_eq!(a, b);
        assert_eq!(dash.loader().tables().len(), 1);
    }

    #[test]
    #[ignore]
    fn builtin_globe_page_over_network() {
        let dash = Dashboard::new(DashboardConfig::builtin()).unwrap();
        let view = dash.render(&Selection::page("globe-3d")).unwrap();
        assert_eq!(view.year, Some(2007));
        assert!(!view.halted);
    }
}
