//! Isotropic Gaussian smoothing specified by FWHM in millimetres.

use super::{f_order_array, f_order_values, require_volume_or_series};
use crate::error::{Error, Result};
use crate::nifti::NiftiImage;
use log::debug;
use ndarray::{ArrayD, Axis};

/// `FWHM = sigma * sqrt(8 ln 2)`.
fn fwhm_to_sigma(fwhm: f64) -> f64 {
    fwhm / (8.0 * std::f64::consts::LN_2).sqrt()
}

/// Normalized Gaussian weights truncated at four standard deviations.
fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (4.0 * sigma + 0.5) as isize;
    let weights: Vec<f64> = (-radius..=radius)
        .map(|x| (-0.5 * (x as f64 / sigma).powi(2)).exp())
        .collect();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

/// Mirror an out-of-range index back into `0..n` (`d c b a | a b c d | d c b a`).
fn reflect(i: isize, n: isize) -> usize {
    let period = 2 * n;
    let j = i.rem_euclid(period);
    (if j >= n { period - 1 - j } else { j }) as usize
}

fn convolve_axis(data: &mut ArrayD<f32>, axis: usize, kernel: &[f64]) {
    let radius = (kernel.len() / 2) as isize;
    let n = data.shape()[axis] as isize;
    let mut line = Vec::with_capacity(n as usize);

    for mut lane in data.lanes_mut(Axis(axis)) {
        line.clear();
        line.extend(lane.iter().map(|&v| f64::from(v)));
        for (i, out) in lane.iter_mut().enumerate() {
            let acc: f64 = kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * line[reflect(i as isize + k as isize - radius, n)])
                .sum();
            *out = acc as f32;
        }
    }
}

/// Smooth each volume with a Gaussian of the given FWHM (mm).
///
/// Sigma is converted to voxels per axis from the affine's voxel size. Edges
/// are handled by reflection and non-finite voxels are zeroed first. `None`
/// or a zero FWHM returns the image unchanged.
///
/// # Example
///
/// ```ignore
/// let smoothed = smooth_fwhm(&img, Some(6.0))?;
/// ```
#[must_use = "this function returns a Result and does not modify the original"]
pub fn smooth_fwhm(image: &NiftiImage, fwhm: Option<f64>) -> Result<NiftiImage> {
    let fwhm = match fwhm {
        None => return Ok(image.clone()),
        Some(f) if f == 0.0 => return Ok(image.clone()),
        Some(f) if !f.is_finite() || f < 0.0 => {
            return Err(Error::Configuration(format!(
                "smoothing FWHM must be a non-negative number, got {f}"
            )))
        }
        Some(f) => f,
    };
    require_volume_or_series(image, "smoothing")?;

    let values: Vec<f32> = f_order_values(image.data())
        .into_iter()
        .map(|v| if v.is_finite() { v } else { 0.0 })
        .collect();
    let mut data = f_order_array(image.shape(), values)?;

    let voxel_size = image.header().voxel_size();
    for (axis, size) in voxel_size.iter().enumerate() {
        if *size <= 0.0 || data.shape()[axis] == 0 {
            continue;
        }
        let sigma = fwhm_to_sigma(fwhm) / size;
        let kernel = gaussian_kernel(sigma);
        debug!(
            "smoothing axis {} with sigma {:.3} voxels ({} taps)",
            axis,
            sigma,
            kernel.len()
        );
        if kernel.len() > 1 {
            convolve_axis(&mut data, axis, &kernel);
        }
    }

    image.with_data(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{IxDyn, ShapeBuilder};

    fn image(shape: &[usize], values: Vec<f32>, voxel: f32) -> NiftiImage {
        let data = ArrayD::from_shape_vec(IxDyn(shape).f(), values).unwrap();
        let affine = [
            [voxel, 0.0, 0.0, 0.0],
            [0.0, voxel, 0.0, 0.0],
            [0.0, 0.0, voxel, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        NiftiImage::from_array(data, affine)
    }

    fn impulse(n: usize) -> NiftiImage {
        let mut values = vec![0.0; n * n * n];
        let c = n / 2;
        values[c + n * c + n * n * c] = 1.0;
        image(&[n, n, n], values, 2.0)
    }

    #[test]
    fn test_reflect_indices() {
        assert_eq!(reflect(-1, 4), 0);
        assert_eq!(reflect(-2, 4), 1);
        assert_eq!(reflect(4, 4), 3);
        assert_eq!(reflect(5, 4), 2);
        assert_eq!(reflect(2, 4), 2);
        assert_eq!(reflect(3, 1), 0);
    }

    #[test]
    fn test_kernel_normalized_and_symmetric() {
        let kernel = gaussian_kernel(1.5);
        assert_eq!(kernel.len(), 2 * 6 + 1);
        assert!((kernel.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        for i in 0..kernel.len() / 2 {
            assert!((kernel[i] - kernel[kernel.len() - 1 - i]).abs() < 1e-15);
        }
    }

    #[test]
    fn test_none_and_zero_are_identity() {
        let img = impulse(5);
        for fwhm in [None, Some(0.0)] {
            let out = smooth_fwhm(&img, fwhm).unwrap();
            assert_eq!(out.data(), img.data());
        }
    }

    #[test]
    fn test_negative_fwhm_rejected() {
        let img = impulse(5);
        assert!(matches!(
            smooth_fwhm(&img, Some(-1.0)),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_constant_stays_constant() {
        let img = image(&[4, 5, 3], vec![2.5; 60], 1.0);
        let out = smooth_fwhm(&img, Some(4.0)).unwrap();
        assert!(out.data().iter().all(|v| (v - 2.5).abs() < 1e-5));
    }

    #[test]
    fn test_impulse_spreads_and_keeps_mass() {
        let img = impulse(21);
        let out = smooth_fwhm(&img, Some(4.0)).unwrap();

        let total: f64 = out.data().iter().map(|&v| f64::from(v)).sum();
        assert!((total - 1.0).abs() < 1e-5);

        let center = out.data()[IxDyn(&[10, 10, 10])];
        assert!(center < 1.0);
        assert!(center > out.data()[IxDyn(&[11, 10, 10])]);
        assert!((out.data()[IxDyn(&[9, 10, 10])] - out.data()[IxDyn(&[11, 10, 10])]).abs() < 1e-7);
        assert!((out.data()[IxDyn(&[10, 9, 10])] - out.data()[IxDyn(&[10, 10, 11])]).abs() < 1e-7);
    }

    #[test]
    fn test_non_finite_zeroed() {
        let mut values = vec![1.0; 27];
        values[13] = f32::NAN;
        let img = image(&[3, 3, 3], values, 1.0);
        let out = smooth_fwhm(&img, Some(1.0)).unwrap();
        assert!(out.data().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_series_smoothed_per_volume() {
        let mut values = vec![0.0; 5 * 5 * 5 * 2];
        values[62] = 1.0;
        let img = image(&[5, 5, 5, 2], values, 2.0);
        let out = smooth_fwhm(&img, Some(3.0)).unwrap();
        assert_eq!(out.shape(), &[5, 5, 5, 2]);
        let second: f32 = out.volume(1).unwrap().iter().sum();
        assert_eq!(second, 0.0);
    }
}
