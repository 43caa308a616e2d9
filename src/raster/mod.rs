// src/raster/mod.rs
pub mod geotiff;
pub mod grid_csv;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use snafu::ensure;
use tracing::debug;

use crate::error::{PageResult, ShapeMismatchSnafu};

pub use geotiff::{parse_geotiff, GeoTransform};
pub use grid_csv::parse_grid_csv;

/// Scalar samples on a regular grid plus one coordinate vector per axis.
///
/// Values are row-major: `values[r * cols + c]` sits at `(x[c], y[r])`.
/// Missing samples are NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterGrid {
    values: Vec<f64>,
    rows: usize,
    cols: usize,
    x: Vec<f64>,
    y: Vec<f64>,
}

/// One flattened grid sample in map space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub lon: f64,
    pub lat: f64,
    pub weight: f64,
}

impl RasterGrid {
    /// Checked constructor: `x.len() == cols`, `y.len() == rows`, `values.len() == rows * cols`.
    pub fn new(
        values: Vec<f64>,
        rows: usize,
        cols: usize,
        x: Vec<f64>,
        y: Vec<f64>,
    ) -> PageResult<Self> {
        ensure!(
            x.len() == cols && y.len() == rows && values.len() == rows * cols,
            ShapeMismatchSnafu {
                rows,
                cols,
                values_len: values.len(),
                x_len: x.len(),
                y_len: y.len(),
            }
        );
        Ok(Self {
            values,
            rows,
            cols,
            x,
            y,
        })
    }

    /// Grid with index coordinates (`0..cols`, `0..rows`).
    pub fn with_index_coords(values: Vec<f64>, rows: usize, cols: usize) -> PageResult<Self> {
        let x = (0..cols).map(|c| c as f64).collect();
        let y = (0..rows).map(|r| r as f64).collect();
        Self::new(values, rows, cols, x, y)
    }

    /// `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.rows && col < self.cols {
            Some(self.values[row * self.cols + col])
        } else {
            None
        }
    }

    /// Rows as nested vectors, NaN kept, for surface scenes.
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.values
            .chunks(self.cols.max(1))
            .take(self.rows)
            .map(|r| r.to_vec())
            .collect()
    }

    /// `(min, max)` over finite samples.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// Block-average so that neither side exceeds `max_side`. NaNs are
    /// ignored in the average; an all-NaN block stays NaN.
    pub fn resample(&self, max_side: usize) -> PageResult<RasterGrid> {
        let max_side = max_side.max(1);
        let longest = self.rows.max(self.cols);
        if longest <= max_side {
            return Ok(self.clone());
        }
        let factor = longest.div_ceil(max_side);
        let out_rows = self.rows.div_ceil(factor);
        let out_cols = self.cols.div_ceil(factor);

        let values: Vec<f64> = (0..out_rows)
            .into_par_iter()
            .flat_map_iter(|br| {
                let r0 = br * factor;
                let r1 = (r0 + factor).min(self.rows);
                (0..out_cols).map(move |bc| {
                    let c0 = bc * factor;
                    let c1 = (c0 + factor).min(self.cols);
                    let mut sum = 0.0;
                    let mut n = 0usize;
                    for r in r0..r1 {
                        for v in &self.values[r * self.cols + c0..r * self.cols + c1] {
                            if v.is_finite() {
                                sum += v;
                                n += 1;
                            }
                        }
                    }
                    if n == 0 {
                        f64::NAN
                    } else {
                        sum / n as f64
                    }
                })
            })
            .collect();

        let x = block_means(&self.x, factor);
        let y = block_means(&self.y, factor);
        debug!(
            from = ?self.shape(),
            to = ?(out_rows, out_cols),
            factor,
            "resampled raster"
        );
        RasterGrid::new(values, out_rows, out_cols, x, y)
    }

    /// Flatten to finite `(lon, lat, weight)` cells, mapping `x`/`y` linearly
    /// onto `base ± extent` (degrees). Use `extent = None` when the coordinates
    /// are already lon/lat.
    pub fn to_cells(&self, base: [f64; 2], extent: Option<f64>) -> Vec<GridCell> {
        let project = |v: f64, axis: &[f64], origin: f64| -> f64 {
            match extent {
                None => v,
                Some(ext) => {
                    let (lo, hi) = axis
                        .iter()
                        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &a| {
                            (lo.min(a), hi.max(a))
                        });
                    let span = hi - lo;
                    if span <= 0.0 {
                        origin
                    } else {
                        origin + ((v - lo) / span * 2.0 - 1.0) * ext
                    }
                }
            }
        };

        let mut cells = Vec::with_capacity(self.values.len());
        for r in 0..self.rows {
            for c in 0..self.cols {
                let w = self.values[r * self.cols + c];
                if !w.is_finite() {
                    continue;
                }
                cells.push(GridCell {
                    lon: project(self.x[c], &self.x, base[0]),
                    lat: project(self.y[r], &self.y, base[1]),
                    weight: w,
                });
            }
        }
        cells
    }
}

fn block_means(axis: &[f64], factor: usize) -> Vec<f64> {
    axis.chunks(factor)
        .map(|chunk| chunk.iter().sum::<f64>() / chunk.len() as f64)
        .collect()
}
