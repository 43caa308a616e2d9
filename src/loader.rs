// src/loader.rs

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{info, instrument};

use crate::cache::{CachePolicy, MemoKey, MemoStore};
use crate::error::{PageError, PageResult};
use crate::fetch::{Fetcher, SourceRef, TableFormat};
use crate::raster::{parse_geotiff, parse_grid_csv, RasterGrid};
use crate::synthetic::gaussian_dem;
use crate::table::{parse_csv, parse_parquet, ColumnSpec, Dataset};

/// Where a raster comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RasterSource {
    /// Single-band GeoTIFF, file path or URL.
    Geotiff { location: String },
    /// Matrix CSV with column labels and optional row labels.
    CsvGrid { location: String },
    /// Generated Gaussian bump.
    Gaussian { size: usize, amplitude: f64 },
}

impl RasterSource {
    pub fn id(&self) -> String {
        match self {
            RasterSource::Geotiff { location } | RasterSource::CsvGrid { location } => {
                location.clone()
            }
            RasterSource::Gaussian { size, amplitude } => {
                format!("gaussian:{}x{}:{}", size, size, amplitude)
            }
        }
    }
}

/// Keep a `PageError` raised below the loader as-is; anything else means
/// the source could not be read.
fn classify(source_id: &str, err: anyhow::Error) -> PageError {
    match err.downcast_ref::<PageError>() {
        Some(page_err) => page_err.clone(),
        None => PageError::data_unavailable(source_id, &err),
    }
}

/// Reads sources and memoizes the results by call arguments.
///
/// Owned by the host and handed to pages explicitly; dropping it drops the cache.
#[derive(Debug)]
pub struct DataLoader {
    fetcher: Fetcher,
    tables: MemoStore<Dataset>,
    rasters: MemoStore<RasterGrid>,
}

impl DataLoader {
    pub fn new(timeout: Duration, policy: CachePolicy) -> Result<Self> {
        Ok(Self {
            fetcher: Fetcher::new(timeout)?,
            tables: MemoStore::new(policy),
            rasters: MemoStore::new(policy),
        })
    }

    pub fn tables(&self) -> &MemoStore<Dataset> {
        &self.tables
    }

    pub fn rasters(&self) -> &MemoStore<RasterGrid> {
        &self.rasters
    }

    /// Forget everything loaded so far.
    pub fn clear(&self) {
        self.tables.clear();
        self.rasters.clear();
    }

    /// Load a table. Fails with `DataUnavailable` when the source is missing,
    /// unreachable, timed out or malformed; never returns partial data.
    #[instrument(level = "info", skip(self, declared), fields(source = %source.id()))]
    pub fn load_table(&self, source: &SourceRef, declared: &[ColumnSpec]) -> PageResult<Arc<Dataset>> {
        let key = MemoKey::new("load_table", &(source, declared));
        self.tables.get_or_load(&key, || {
            let id = source.id();
            let bytes = self
                .fetcher
                .read_source(source)
                .map_err(|e| classify(&id, e))?;
            let parsed = match source.format() {
                TableFormat::Csv => parse_csv(&id, &bytes, source.skip_rows, declared),
                TableFormat::Parquet => parse_parquet(&id, bytes, declared),
            };
            let dataset = parsed.map_err(|e| classify(&id, e))?;
            info!(rows = dataset.num_rows(), "table ready");
            Ok(dataset)
        })
    }

    /// Load a raster. The source is read in full before any sample is
    /// touched, so a missing file surfaces as `DataUnavailable`.
    #[instrument(level = "info", skip(self), fields(source = %source.id()))]
    pub fn load_raster(&self, source: &RasterSource) -> PageResult<Arc<RasterGrid>> {
        let key = MemoKey::new("load_raster", source);
        self.rasters.get_or_load(&key, || {
            let id = source.id();
            let grid = match source {
                RasterSource::Geotiff { location } => {
                    let bytes = self
                        .fetcher
                        .read_location(location)
                        .map_err(|e| classify(&id, e))?;
                    parse_geotiff(&id, &bytes).map_err(|e| classify(&id, e))?
                }
                RasterSource::CsvGrid { location } => {
                    let bytes = self
                        .fetcher
                        .read_location(location)
                        .map_err(|e| classify(&id, e))?;
                    parse_grid_csv(&id, &bytes).map_err(|e| classify(&id, e))?
                }
                RasterSource::Gaussian { size, amplitude } => gaussian_dem(*size, *amplitude)?,
            };
            info!(shape = ?grid.shape(), "raster ready");
            Ok(grid)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn loader() -> DataLoader {
        DataLoader::new(Duration::from_secs(2), CachePolicy::forever()).unwrap()
    }

    #[test]
    fn repeated_loads_are_equal_and_cached() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gap.csv");
        fs::write(&path, "country,year,pop\nA,2020,5\nB,2020,\nC,2019,3\n").unwrap();
        let source = SourceRef::new(path.to_string_lossy());
        let declared = [ColumnSpec::year("year"), ColumnSpec::number("pop")];

        let l = loader();
        let a = l.load_table(&source, &declared).unwrap();
        let b = l.load_table(&source, &declared).unwrap();
        assert_eq!(*a, *b);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(l.tables().len(), 1);

        // different declared types are a different call
        l.load_table(&source, &[ColumnSpec::year("year")]).unwrap();
        assert_eq!(l.tables().len(), 2);
    }

    #[test]
    fn missing_table_is_data_unavailable() {
        let err = loader()
            .load_table(&SourceRef::new("/no/such/gapminder.csv"), &[])
            .unwrap_err();
        assert!(matches!(err, PageError::DataUnavailable { .. }));
    }

    #[test]
    fn silent_remote_source_times_out() {
        // accepted by the backlog but never answered
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let l = DataLoader::new(Duration::from_secs(1), CachePolicy::forever()).unwrap();

        let started = std::time::Instant::now();
        let err = l
            .load_table(&SourceRef::new(format!("http://{}/stats.csv", addr)), &[])
            .unwrap_err();
        assert!(matches!(err, PageError::DataUnavailable { .. }), "{:?}", err);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(l.tables().is_empty());
        drop(listener);
    }

    #[test]
    fn malformed_table_is_data_unavailable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "country,pop\nA,5\n").unwrap();
        let err = loader()
            .load_table(
                &SourceRef::new(path.to_string_lossy()),
                &[ColumnSpec::year("year")],
            )
            .unwrap_err();
        match err {
            PageError::DataUnavailable { reason, .. } => {
                assert!(reason.contains("missing declared column"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_raster_is_data_unavailable() {
        let l = loader();
        let err = l
            .load_raster(&RasterSource::Geotiff {
                location: "C:\\Users\\someone\\dem\\taiwan_20m.tif".into(),
            })
            .unwrap_err();
        assert!(matches!(err, PageError::DataUnavailable { .. }));
        assert!(l.rasters().is_empty());
    }

    #[test]
    fn ragged_grid_keeps_shape_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ragged.csv");
        fs::write(&path, ",0,1\n0,1,2\n1,3\n").unwrap();
        let err = loader()
            .load_raster(&RasterSource::CsvGrid {
                location: path.to_string_lossy().into_owned(),
            })
            .unwrap_err();
        assert!(matches!(err, PageError::ShapeMismatch { .. }));
    }

    #[test]
    fn gaussian_raster_is_memoized() {
        let l = loader();
        let src = RasterSource::Gaussian {
            size: 10,
            amplitude: 5.0,
        };
        let a = l.load_raster(&src).unwrap();
        let b = l.load_raster(&src).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        l.clear();
        assert!(l.rasters().is_empty());
    }
}
