// src/synthetic.rs

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;
use snafu::ensure;
use tracing::debug;

use crate::error::{PageResult, UnclassifiedSnafu};
use crate::raster::RasterGrid;

/// `n` evenly spaced samples over `[lo, hi]`.
pub fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![lo],
        _ => {
            let step = (hi - lo) / (n - 1) as f64;
            (0..n).map(|i| lo + step * i as f64).collect()
        }
    }
}

/// `count` lon/lat points normally distributed around `center` with
/// standard deviation `spread` degrees. Same seed, same points.
pub fn scatter_points(
    center: [f64; 2],
    count: usize,
    spread: f64,
    seed: u64,
) -> PageResult<Vec<[f64; 2]>> {
    // Normal::new accepts a negative std-dev
    ensure!(
        spread.is_finite() && spread >= 0.0,
        UnclassifiedSnafu {
            message: format!("spread must be a finite non-negative number, got {}", spread),
        }
    );
    let normal = Normal::new(0.0, spread).map_err(|e| {
        UnclassifiedSnafu {
            message: format!("invalid spread {}: {}", spread, e),
        }
        .build()
    })?;
    let mut rng = StdRng::seed_from_u64(seed);
    let points: Vec<[f64; 2]> = (0..count)
        .map(|_| {
            let lat = center[1] + rng.sample(normal);
            let lon = center[0] + rng.sample(normal);
            [lon, lat]
        })
        .collect();
    debug!(count, seed, "generated scatter points");
    Ok(points)
}

/// A `size × size` Gaussian bump on `linspace(-1, 1)`:
/// `z = exp(-2 (x² + y²)) · amplitude`.
pub fn gaussian_dem(size: usize, amplitude: f64) -> PageResult<RasterGrid> {
    let axis = linspace(-1.0, 1.0, size);
    let mut values = Vec::with_capacity(size * size);
    for &y in &axis {
        for &x in &axis {
            values.push((-(x * x + y * y) * 2.0).exp() * amplitude);
        }
    }
    RasterGrid::new(values, size, size, axis.clone(), axis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PageError;

    #[test]
    fn linspace_endpoints() {
        assert_eq!(linspace(-1.0, 1.0, 3), vec![-1.0, 0.0, 1.0]);
        assert_eq!(linspace(0.0, 1.0, 1), vec![0.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn points_are_reproducible_and_centred() {
        let a = scatter_points([121.517, 25.0478], 1000, 0.02, 7).unwrap();
        let b = scatter_points([121.517, 25.0478], 1000, 0.02, 7).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 1000);

        let mean_lon = a.iter().map(|p| p[0]).sum::<f64>() / a.len() as f64;
        let mean_lat = a.iter().map(|p| p[1]).sum::<f64>() / a.len() as f64;
        assert!((mean_lon - 121.517).abs() < 0.01);
        assert!((mean_lat - 25.0478).abs() < 0.01);
    }

    #[test]
    fn negative_spread_is_rejected() {
        for spread in [-1.0, -0.0001, f64::NAN, f64::INFINITY] {
            let err = scatter_points([0.0, 0.0], 10, spread, 1).unwrap_err();
            assert!(matches!(err, PageError::Unclassified { .. }), "{}", spread);
        }
        // zero spread collapses onto the centre
        let pts = scatter_points([1.0, 2.0], 3, 0.0, 1).unwrap();
        assert!(pts.iter().all(|p| *p == [1.0, 2.0]));
    }

    #[test]
    fn gaussian_peaks_in_the_middle() {
        let dem = gaussian_dem(51, 1000.0).unwrap();
        assert_eq!(dem.shape(), (51, 51));
        let (lo, hi) = dem.value_range().unwrap();
        assert!((hi - 1000.0).abs() < 1e-9);
        assert!((lo - 1000.0 * (-4.0f64).exp()).abs() < 1e-9);
        assert_eq!(dem.get(25, 25), Some(1000.0));
    }
}
