//! Intensity transforms: per-volume normalization, reciprocal, z-scoring.

use super::{f_order_array, f_order_values, require_volume_or_series, volume_len};
use crate::error::{Error, Result};
use crate::nifti::NiftiImage;
use log::{debug, warn};
use ndarray::Array2;
use rayon::prelude::*;

/// Divide every volume by its own mean intensity.
///
/// The mean is taken over the whole volume (background included) at each
/// timepoint, which removes global signal drift between acquisitions. A 3-D
/// image is treated as a single timepoint.
///
/// # Errors
///
/// `ZeroDivision` if a volume's mean is zero or not finite;
/// `InvalidDimensions` for images that are not 3-D or 4-D.
#[must_use = "this function returns a Result and does not modify the original"]
pub fn normalize_by_volume_mean(image: &NiftiImage) -> Result<NiftiImage> {
    require_volume_or_series(image, "volume normalization")?;

    let vox = volume_len(image);
    let mut values = f_order_values(image.data());

    let means: Vec<f64> = values
        .par_chunks(vox)
        .map(|volume| volume.iter().map(|&v| f64::from(v)).sum::<f64>() / vox as f64)
        .collect();

    if let Some((t, mean)) = means
        .iter()
        .enumerate()
        .find(|(_, m)| **m == 0.0 || !m.is_finite())
    {
        return Err(Error::ZeroDivision(format!(
            "volume {t} has mean intensity {mean}"
        )));
    }
    debug!("normalizing {} volumes of {} voxels", means.len(), vox);

    values
        .par_chunks_mut(vox)
        .zip(means.par_iter())
        .for_each(|(volume, &mean)| {
            for v in volume.iter_mut() {
                *v = (f64::from(*v) / mean) as f32;
            }
        });

    image.with_data(f_order_array(image.shape(), values)?)
}

/// What to do with zero voxels when inverting a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZeroPolicy {
    /// Write `0` for `1/0` and report how many voxels that affected.
    #[default]
    Zero,
    /// Fail with `ZeroDivision`.
    Reject,
}

impl std::str::FromStr for ZeroPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "zero" => Ok(Self::Zero),
            "reject" => Ok(Self::Reject),
            _ => Err(Error::Configuration(format!(
                "unknown zero policy '{s}' (expected zero or reject)"
            ))),
        }
    }
}

/// Output of [`reciprocal`].
#[derive(Debug, Clone)]
pub struct Reciprocal {
    /// `1 / value` map.
    pub image: NiftiImage,
    /// Voxels inside the brain that were exactly zero.
    pub zero_voxels: usize,
    /// Voxels zeroed because they fall outside the brain mask.
    pub background_voxels: usize,
}

/// Voxel-wise `1 / value`.
///
/// When `brain_mask` is given, voxels where it is zero are written as `0`
/// without being inverted. Remaining zero voxels are handled by `policy`.
///
/// # Errors
///
/// `ShapeMismatch` if the mask grid differs from the map; `ZeroDivision`
/// under [`ZeroPolicy::Reject`] when a zero voxel remains.
pub fn reciprocal(
    image: &NiftiImage,
    policy: ZeroPolicy,
    brain_mask: Option<&NiftiImage>,
) -> Result<Reciprocal> {
    require_volume_or_series(image, "reciprocal")?;

    let vox = volume_len(image);
    let brain: Option<Vec<bool>> = match brain_mask {
        Some(mask) => {
            image.check_geometry(mask, "brain mask vs map")?;
            let values = f_order_values(mask.data());
            Some(values[..vox].iter().map(|&v| v != 0.0 && !v.is_nan()).collect())
        }
        None => None,
    };

    let mut values = f_order_values(image.data());
    let mut zero_voxels = 0usize;
    let mut background_voxels = 0usize;

    for (i, v) in values.iter_mut().enumerate() {
        if let Some(brain) = &brain {
            if !brain[i % vox] {
                *v = 0.0;
                background_voxels += 1;
                continue;
            }
        }
        if *v == 0.0 {
            zero_voxels += 1;
            continue;
        }
        *v = (1.0 / f64::from(*v)) as f32;
    }

    if zero_voxels > 0 {
        match policy {
            ZeroPolicy::Reject => {
                return Err(Error::ZeroDivision(format!(
                    "{zero_voxels} zero-valued voxels cannot be inverted"
                )))
            }
            ZeroPolicy::Zero => {
                warn!("{zero_voxels} zero-valued voxels set to 0 in the reciprocal map");
            }
        }
    }

    Ok(Reciprocal {
        image: image.with_data(f_order_array(image.shape(), values)?)?,
        zero_voxels,
        background_voxels,
    })
}

/// Z-score each column of a `samples x voxels` matrix along the samples.
///
/// Columns whose standard deviation is below `f32::EPSILON` are centered
/// only. With a single sample every value would become zero, so nothing is
/// changed and `false` is returned.
pub fn zscore_samples(signals: &mut Array2<f32>) -> bool {
    let n_samples = signals.nrows();
    if n_samples <= 1 {
        warn!("standardization of a single sample would zero every value; skipping");
        return false;
    }

    for mut column in signals.columns_mut() {
        let n = n_samples as f64;
        let mean = column.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
        let var = column
            .iter()
            .map(|&v| (f64::from(v) - mean).powi(2))
            .sum::<f64>()
            / n;
        let std = var.sqrt();
        let std = if std < f64::from(f32::EPSILON) { 1.0 } else { std };
        column.mapv_inplace(|v| ((f64::from(v) - mean) / std) as f32);
    }
    true
}
