//! Target geometry for resize and crop jobs.
//!
//! All arithmetic is integer and truncating: `resizeToWidthPx { w }` on a
//! `W x H` image yields `w x (H * w / W)`, percentages yield
//! `floor(dim * p / 100)` and crops are centered.

use pixq_models::TransformParams;

use crate::error::{MediaError, MediaResult};

/// Largest edge a transform may produce.
pub const MAX_DIMENSION: u32 = 16_384;

/// What to do with the pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Geometry {
    Resize { width: u32, height: u32 },
    Crop { x: u32, y: u32, width: u32, height: u32 },
}

impl Geometry {
    /// Dimensions of the result.
    pub fn output_size(&self) -> (u32, u32) {
        match *self {
            Geometry::Resize { width, height } | Geometry::Crop { width, height, .. } => {
                (width, height)
            }
        }
    }
}

/// Compute the geometry of `params` applied to a `width x height` image.
pub fn plan(width: u32, height: u32, params: &TransformParams) -> MediaResult<Geometry> {
    if width == 0 || height == 0 {
        return Err(MediaError::decode(format!(
            "source has empty dimensions {}x{}",
            width, height
        )));
    }

    let geometry = match *params {
        TransformParams::ResizeToWidthPx { width: target } => Geometry::Resize {
            width: target,
            height: scale(height, target, width)?,
        },
        TransformParams::ResizeToHeightPx { height: target } => Geometry::Resize {
            width: scale(width, target, height)?,
            height: target,
        },
        TransformParams::ResizeByPercentage { percentage } => Geometry::Resize {
            width: percent_of(width, percentage)?,
            height: percent_of(height, percentage)?,
        },
        TransformParams::CropByPercentage { percentage } => {
            if percentage > 100.0 {
                return Err(MediaError::invalid_parameter(format!(
                    "crop percentage {} exceeds 100",
                    percentage
                )));
            }
            let crop_width = percent_of(width, percentage)?;
            let crop_height = percent_of(height, percentage)?;
            Geometry::Crop {
                x: (width - crop_width) / 2,
                y: (height - crop_height) / 2,
                width: crop_width,
                height: crop_height,
            }
        }
    };

    let (out_w, out_h) = geometry.output_size();
    if out_w == 0 || out_h == 0 {
        return Err(MediaError::invalid_parameter(format!(
            "{} on {}x{} yields {}x{}",
            params.job_type(),
            width,
            height,
            out_w,
            out_h
        )));
    }
    if out_w > MAX_DIMENSION || out_h > MAX_DIMENSION {
        return Err(MediaError::invalid_parameter(format!(
            "{} on {}x{} yields {}x{}, above the {}px limit",
            params.job_type(),
            width,
            height,
            out_w,
            out_h,
            MAX_DIMENSION
        )));
    }

    Ok(geometry)
}

/// `value * numerator / denominator`, truncated.
fn scale(value: u32, numerator: u32, denominator: u32) -> MediaResult<u32> {
    let scaled = u64::from(value) * u64::from(numerator) / u64::from(denominator);
    u32::try_from(scaled)
        .map_err(|_| MediaError::invalid_parameter(format!("computed dimension {} overflows", scaled)))
}

fn percent_of(value: u32, percentage: f64) -> MediaResult<u32> {
    if !percentage.is_finite() || percentage <= 0.0 {
        return Err(MediaError::invalid_parameter(format!(
            "percentage must be positive, got {}",
            percentage
        )));
    }
    let scaled = (f64::from(value) * percentage / 100.0).floor();
    if scaled > f64::from(u32::MAX) {
        return Err(MediaError::invalid_parameter(format!(
            "computed dimension {} overflows",
            scaled
        )));
    }
    Ok(scaled as u32)
}
