//! Mask-based extraction of voxel signals and their projection back to images.

use super::intensity::zscore_samples;
use super::smoothing::smooth_fwhm;
use super::{f_order_array, f_order_values, volume_len};
use crate::error::{Error, Result};
use crate::nifti::NiftiImage;
use log::debug;
use ndarray::{Array2, ArrayView2};

fn is_inside(v: f32) -> bool {
    v != 0.0 && !v.is_nan()
}

/// Mask image as a plain 3-D volume, dropping a singleton time axis.
fn squeeze_mask(mask: &NiftiImage) -> Result<NiftiImage> {
    match mask.ndim() {
        3 => Ok(mask.clone()),
        4 if mask.n_timepoints() == 1 => {
            let values = f_order_values(mask.data());
            mask.with_data(f_order_array(&mask.spatial_shape(), values)?)
        }
        _ => Err(Error::InvalidDimensions(format!(
            "mask must be 3-D, got shape {:?}",
            mask.shape()
        ))),
    }
}

/// Extracts in-mask voxels as a `samples x voxels` matrix and back.
///
/// Non-zero voxels are inside the mask. Signals can optionally be smoothed
/// before extraction and z-scored across samples afterwards.
#[derive(Debug, Clone)]
pub struct Masker {
    reference: NiftiImage,
    inside: Vec<usize>,
    smoothing_fwhm: Option<f64>,
    standardize: bool,
}

impl Masker {
    /// Fit a masker to `mask`.
    ///
    /// # Errors
    ///
    /// `EmptyMask` when no voxel is non-zero; `InvalidDimensions` unless the
    /// mask is 3-D (or 4-D with one timepoint).
    pub fn new(mask: &NiftiImage) -> Result<Self> {
        let reference = squeeze_mask(mask)?;
        let inside: Vec<usize> = f_order_values(reference.data())
            .iter()
            .enumerate()
            .filter(|(_, v)| is_inside(**v))
            .map(|(i, _)| i)
            .collect();
        if inside.is_empty() {
            return Err(Error::EmptyMask(format!(
                "mask of shape {:?} has no non-zero voxels",
                reference.shape()
            )));
        }
        debug!("mask selects {} of {} voxels", inside.len(), volume_len(&reference));
        Ok(Self {
            reference,
            inside,
            smoothing_fwhm: None,
            standardize: false,
        })
    }

    /// Smooth images with this FWHM (mm) before extraction.
    pub fn with_smoothing(mut self, fwhm: Option<f64>) -> Self {
        self.smoothing_fwhm = fwhm;
        self
    }

    /// Z-score extracted signals across samples.
    pub fn with_standardize(mut self, standardize: bool) -> Self {
        self.standardize = standardize;
        self
    }

    /// Number of voxels inside the mask.
    pub fn n_voxels(&self) -> usize {
        self.inside.len()
    }

    /// Flat (F-order) indices of in-mask voxels.
    pub fn voxel_indices(&self) -> &[usize] {
        &self.inside
    }

    /// The mask as a 3-D image; its grid is what inputs must match.
    pub fn mask_image(&self) -> &NiftiImage {
        &self.reference
    }

    /// Extract in-mask values, one row per timepoint (one row for 3-D).
    pub fn transform(&self, image: &NiftiImage) -> Result<Array2<f32>> {
        self.reference.check_geometry(image, "image vs mask")?;
        let image = smooth_fwhm(image, self.smoothing_fwhm)?;

        let vox = volume_len(&self.reference);
        let values = f_order_values(image.data());
        let n_samples = values.len() / vox;

        let mut flat = Vec::with_capacity(n_samples * self.inside.len());
        for volume in values.chunks(vox) {
            flat.extend(self.inside.iter().map(|&i| volume[i]));
        }
        let mut signals = Array2::from_shape_vec((n_samples, self.inside.len()), flat)
            .map_err(|e| Error::InvalidDimensions(format!("cannot shape signals: {e}")))?;

        if self.standardize {
            zscore_samples(&mut signals);
        }
        Ok(signals)
    }

    /// Scatter signals back onto the mask grid, zero outside.
    ///
    /// One row gives a 3-D image, several rows a 4-D series.
    pub fn inverse_transform(&self, signals: ArrayView2<'_, f32>) -> Result<NiftiImage> {
        let (n_samples, n_voxels) = signals.dim();
        if n_voxels != self.inside.len() {
            return Err(Error::ShapeMismatch(format!(
                "signals have {} voxels, mask has {}",
                n_voxels,
                self.inside.len()
            )));
        }
        if n_samples == 0 {
            return Err(Error::InvalidDimensions("no samples to project".to_string()));
        }

        let vox = volume_len(&self.reference);
        let mut values = vec![0.0f32; vox * n_samples];
        for (volume, row) in values.chunks_mut(vox).zip(signals.rows()) {
            for (&i, &v) in self.inside.iter().zip(row.iter()) {
                volume[i] = v;
            }
        }

        let [x, y, z] = self.reference.spatial_shape();
        let shape: Vec<usize> = if n_samples == 1 {
            vec![x, y, z]
        } else {
            vec![x, y, z, n_samples]
        };
        self.reference.with_data(f_order_array(&shape, values)?)
    }
}

/// Voxels that are non-zero in every mask, as a 0/1 float32 image.
///
/// # Errors
///
/// `MissingInput` for an empty list, `ShapeMismatch` when grids differ.
pub fn intersect_masks(masks: &[NiftiImage]) -> Result<NiftiImage> {
    let first = masks
        .first()
        .ok_or_else(|| Error::MissingInput("no masks to intersect".to_string()))?;
    let first = squeeze_mask(first)?;

    let mut keep: Vec<bool> = f_order_values(first.data())
        .into_iter()
        .map(is_inside)
        .collect();
    for (i, mask) in masks.iter().enumerate().skip(1) {
        let mask = squeeze_mask(mask)?;
        first.check_geometry(&mask, &format!("mask {i} vs mask 0"))?;
        for (k, v) in keep.iter_mut().zip(f_order_values(mask.data())) {
            *k = *k && is_inside(v);
        }
    }

    let values = keep.into_iter().map(|k| if k { 1.0 } else { 0.0 }).collect();
    first.with_data(f_order_array(&first.spatial_shape(), values)?)
}
