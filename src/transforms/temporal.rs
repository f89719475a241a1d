//! Operations along the time axis.

use super::{f_order_array, f_order_values, require_volume_or_series, volume_len};
use crate::error::{Error, Result};
use crate::nifti::NiftiImage;
use log::debug;
use rayon::prelude::*;

/// Join images along the time axis, in the order given.
///
/// A 3-D image counts as one timepoint. Every image must share the first
/// image's spatial grid; the result carries the first image's header.
///
/// # Arguments
///
/// * `images` - Volumes or series to join, at least one
///
/// # Example
///
/// ```ignore
/// let all_runs = concat_images(&[run1, run2])?;
/// assert_eq!(all_runs.n_timepoints(), run1.n_timepoints() + run2.n_timepoints());
/// ```
#[must_use = "this function returns a Result and does not modify the original"]
pub fn concat_images(images: &[NiftiImage]) -> Result<NiftiImage> {
    let first = images
        .first()
        .ok_or_else(|| Error::MissingInput("no images to concatenate".to_string()))?;

    for (i, image) in images.iter().enumerate() {
        require_volume_or_series(image, "concatenation")?;
        first.check_geometry(image, &format!("image {i} vs image 0"))?;
    }

    let vox = volume_len(first);
    let n_t: usize = images.iter().map(NiftiImage::n_timepoints).sum();
    let mut values = Vec::with_capacity(vox * n_t);
    for image in images {
        values.extend(f_order_values(image.data()));
    }
    debug!("concatenated {} images into {} timepoints", images.len(), n_t);

    let [x, y, z] = first.spatial_shape();
    first.with_data(f_order_array(&[x, y, z, n_t], values)?)
}

/// Voxel-wise mean over time.
///
/// Sums are accumulated in `f64` volume by volume, so the result does not
/// depend on thread scheduling. A 3-D image is returned unchanged (as
/// float32).
#[must_use = "this function returns a Result and does not modify the original"]
pub fn mean_image(image: &NiftiImage) -> Result<NiftiImage> {
    require_volume_or_series(image, "temporal mean")?;
    if image.ndim() == 3 {
        return image.with_data(image.data().clone());
    }

    let vox = volume_len(image);
    let n_t = image.n_timepoints();
    let values = f_order_values(image.data());

    let mut sums = vec![0f64; vox];
    for volume in values.chunks(vox) {
        sums.par_iter_mut()
            .zip(volume.par_iter())
            .for_each(|(acc, &v)| *acc += f64::from(v));
    }
    let mean: Vec<f32> = sums
        .into_par_iter()
        .map(|s| (s / n_t as f64) as f32)
        .collect();

    image.with_data(f_order_array(&image.spatial_shape(), mean)?)
}
