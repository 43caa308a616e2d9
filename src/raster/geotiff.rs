use anyhow::{bail, Context, Result};
use std::io::Cursor;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tracing::{debug, warn};

use super::RasterGrid;
use crate::error::ShapeMismatchSnafu;

/// Affine pixel → map transform taken from GeoTIFF tags (north-up only).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    /// Map X of the upper-left corner of the upper-left pixel
    pub origin_x: f64,
    /// Map Y of the upper-left corner of the upper-left pixel
    pub origin_y: f64,
    pub pixel_width: f64,
    /// Positive; rows grow southwards
    pub pixel_height: f64,
}

impl GeoTransform {
    /// From `ModelTiepoint` (`[i, j, k, x, y, z]`) and `ModelPixelScale` (`[sx, sy, sz]`).
    pub fn from_tags(tiepoint: &[f64], scale: &[f64]) -> Option<Self> {
        if tiepoint.len() < 6 || scale.len() < 2 || scale[0] == 0.0 || scale[1] == 0.0 {
            return None;
        }
        let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
        Some(Self {
            origin_x: x - i * scale[0],
            origin_y: y + j * scale[1],
            pixel_width: scale[0],
            pixel_height: scale[1],
        })
    }

    /// Pixel-centre X of each column.
    pub fn x_coords(&self, cols: usize) -> Vec<f64> {
        (0..cols)
            .map(|c| self.origin_x + (c as f64 + 0.5) * self.pixel_width)
            .collect()
    }

    /// Pixel-centre Y of each row.
    pub fn y_coords(&self, rows: usize) -> Vec<f64> {
        (0..rows)
            .map(|r| self.origin_y - (r as f64 + 0.5) * self.pixel_height)
            .collect()
    }
}

fn samples_to_f64(data: DecodingResult) -> Result<Vec<f64>> {
    Ok(match data {
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F64(v) => v,
        #[allow(unreachable_patterns)]
        _ => bail!("unsupported TIFF sample type"),
    })
}

/// Keep band 1 of pixel-interleaved samples. A count that is not a whole
/// multiple of `rows * cols` is a shape mismatch.
fn first_band(source_id: &str, samples: Vec<f64>, rows: usize, cols: usize) -> Result<Vec<f64>> {
    let pixels = rows * cols;
    if pixels == 0 || samples.len() % pixels != 0 {
        return Err(ShapeMismatchSnafu {
            rows,
            cols,
            values_len: samples.len(),
            x_len: cols,
            y_len: rows,
        }
        .build()
        .into());
    }
    let bands = samples.len() / pixels;
    if bands > 1 {
        warn!(source = source_id, bands, "multi-band TIFF, using band 1");
        return Ok(samples.into_iter().step_by(bands).collect());
    }
    Ok(samples)
}

/// Decode the first band of a GeoTIFF held in memory.
///
/// Coordinates come from the tiepoint/pixel-scale tags when present, pixel
/// indices otherwise. Samples equal to the `GDAL_NODATA` value become NaN.
pub fn parse_geotiff(source_id: &str, bytes: &[u8]) -> Result<RasterGrid> {
    let mut decoder = Decoder::new(Cursor::new(bytes))
        .with_context(|| format!("opening TIFF {}", source_id))?;
    let (width, height) = decoder
        .dimensions()
        .with_context(|| format!("reading dimensions of {}", source_id))?;
    let (cols, rows) = (width as usize, height as usize);

    let transform = match (
        decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok(),
        decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).ok(),
    ) {
        (Some(tie), Some(scale)) => GeoTransform::from_tags(&tie, &scale),
        _ => None,
    };
    let nodata = decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f64>().ok());

    let image = decoder
        .read_image()
        .with_context(|| format!("decoding samples of {}", source_id))?;
    let samples = samples_to_f64(image)?;

    let mut samples = first_band(source_id, samples, rows, cols)?;
    if let Some(nd) = nodata {
        for v in samples.iter_mut().filter(|v| **v == nd) {
            *v = f64::NAN;
        }
    }

    let (x, y) = match transform {
        Some(t) => (t.x_coords(cols), t.y_coords(rows)),
        None => {
            debug!(source = source_id, "no geotransform tags, using pixel indices");
            (
                (0..cols).map(|c| c as f64).collect(),
                (0..rows).map(|r| r as f64).collect(),
            )
        }
    };
    debug!(source = source_id, rows, cols, georeferenced = transform.is_some(), "decoded tiff");

    RasterGrid::new(samples, rows, cols, x, y).map_err(Into::into)
}
