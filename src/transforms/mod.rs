//! Voxel-wise transforms on NIfTI images.
//!
//! All transforms return new images built with [`NiftiImage::with_data`], so
//! the input geometry is carried through unchanged. Work happens on voxel
//! values in on-disk (F) order, where each volume of a 4-D image is one
//! contiguous chunk.

pub mod intensity;
pub mod masking;
pub mod smoothing;
pub mod temporal;

pub use intensity::{normalize_by_volume_mean, reciprocal, zscore_samples, Reciprocal, ZeroPolicy};
pub use masking::{intersect_masks, Masker};
pub use smoothing::smooth_fwhm;
pub use temporal::{concat_images, mean_image};

use crate::error::{Error, Result};
use crate::nifti::NiftiImage;
use ndarray::{ArrayD, IxDyn, ShapeBuilder};

/// Voxel values in on-disk (F) order.
pub(crate) fn f_order_values(data: &ArrayD<f32>) -> Vec<f32> {
    match data.t().to_slice() {
        Some(slice) => slice.to_vec(),
        None => data.t().iter().copied().collect(),
    }
}

/// Shape F-ordered values back into an array.
pub(crate) fn f_order_array(shape: &[usize], values: Vec<f32>) -> Result<ArrayD<f32>> {
    ArrayD::from_shape_vec(IxDyn(shape).f(), values)
        .map_err(|e| Error::InvalidDimensions(format!("cannot shape {shape:?} output: {e}")))
}

/// Number of voxels in one volume.
pub(crate) fn volume_len(image: &NiftiImage) -> usize {
    image.spatial_shape().iter().product()
}

/// Reject anything that is not a 3-D volume or a 4-D series.
pub(crate) fn require_volume_or_series(image: &NiftiImage, what: &str) -> Result<()> {
    match image.ndim() {
        3 | 4 => Ok(()),
        n => Err(Error::InvalidDimensions(format!(
            "{what} needs a 3-D or 4-D image, got {n}-D shape {:?}",
            image.shape()
        ))),
    }
}
