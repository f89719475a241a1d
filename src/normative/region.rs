//! Named region masks and per-region summaries of a normative map.

use crate::error::{Error, Result};
use crate::nifti::{self, NiftiImage};
use crate::transforms::masking::Masker;
use log::{debug, info, warn};
use ndarray::Array2;
use std::collections::HashSet;
use std::path::Path;

/// Region name encoded in a mask file name: the text between `_mask-` and
/// the next `.`.
///
/// `sub-01_space-MNI_mask-HIP-rh.nii.gz` is region `HIP-rh`.
pub fn region_name(path: &Path) -> Result<String> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Configuration(format!("{} has no file name", path.display())))?;

    let name = file_name
        .split_once("_mask-")
        .map(|(_, rest)| rest.split('.').next().unwrap_or(rest))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            Error::Configuration(format!(
                "cannot read a region name from {file_name} (expected '_mask-<name>.')"
            ))
        })?;
    Ok(name.to_string())
}

/// A binary mask for one named region.
#[derive(Debug, Clone)]
pub struct RegionMask {
    name: String,
    image: NiftiImage,
}

impl RegionMask {
    pub fn new(name: impl Into<String>, image: NiftiImage) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::Configuration("region name is empty".to_string()));
        }
        Ok(Self { name, image })
    }

    /// Load a mask file, naming the region after the file.
    pub fn load(path: &Path) -> Result<Self> {
        let name = region_name(path)?;
        debug!("loading region {} from {}", name, path.display());
        Self::new(name, nifti::load(path)?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &NiftiImage {
        &self.image
    }
}

/// Region masks sharing one grid, with unique names, in a fixed order.
#[derive(Debug, Clone, Default)]
pub struct RegionSet {
    masks: Vec<RegionMask>,
}

impl RegionSet {
    /// Validate names and geometry. The first mask's grid is the reference.
    pub fn new(masks: Vec<RegionMask>) -> Result<Self> {
        let mut seen = HashSet::new();
        for mask in &masks {
            if !seen.insert(mask.name()) {
                return Err(Error::Configuration(format!(
                    "duplicate region name '{}'",
                    mask.name()
                )));
            }
        }
        if let Some(first) = masks.first() {
            for mask in &masks[1..] {
                first.image.check_geometry(
                    &mask.image,
                    &format!("region {} vs region {}", mask.name(), first.name()),
                )?;
            }
        }
        Ok(Self { masks })
    }

    /// Load every mask file, keeping the order given.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let masks = paths
            .iter()
            .map(|p| RegionMask::load(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::new(masks)
    }

    /// Grid every region map is built on (the first mask), if any.
    pub fn reference(&self) -> Option<&NiftiImage> {
        self.masks.first().map(RegionMask::image)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegionMask> {
        self.masks.iter()
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }
}

/// Masking parameters applied before a region mean is taken.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskingOptions {
    /// Gaussian FWHM in mm; `None` disables smoothing.
    pub smoothing_fwhm: Option<f64>,
    /// Z-score across samples (skipped for a single map).
    pub standardize: bool,
}

impl Default for MaskingOptions {
    fn default() -> Self {
        Self {
            smoothing_fwhm: None,
            standardize: true,
        }
    }
}

/// Mean of one region and the map filled with it.
#[derive(Debug, Clone)]
pub struct RegionStat {
    pub name: String,
    pub mean: f64,
    /// Region voxels filled with `mean`, zero elsewhere.
    pub filled: NiftiImage,
    voxels: Vec<usize>,
}

impl RegionStat {
    /// Number of voxels in the region.
    pub fn n_voxels(&self) -> usize {
        self.voxels.len()
    }
}

/// Per-region results in region order.
#[derive(Debug, Clone, Default)]
pub struct RegionSummary {
    stats: Vec<RegionStat>,
}

impl RegionSummary {
    pub fn iter(&self) -> impl Iterator<Item = &RegionStat> {
        self.stats.iter()
    }

    pub fn get(&self, name: &str) -> Option<&RegionStat> {
        self.stats.iter().find(|s| s.name == name)
    }

    /// `(region, mean)` pairs in region order.
    pub fn means(&self) -> Vec<(&str, f64)> {
        self.stats.iter().map(|s| (s.name.as_str(), s.mean)).collect()
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}

/// Mean of `map` inside every region, and the region filled with that mean.
///
/// # Errors
///
/// `ShapeMismatch` if a mask is not on the map's grid, `EmptyMask` for a
/// region with no voxels.
pub fn summarize_regions(
    map: &NiftiImage,
    regions: &RegionSet,
    options: &MaskingOptions,
) -> Result<RegionSummary> {
    let mut stats = Vec::with_capacity(regions.len());
    for region in regions.iter() {
        let masker = Masker::new(region.image())
            .map_err(|e| match e {
                Error::EmptyMask(msg) => Error::EmptyMask(format!("region {}: {msg}", region.name())),
                other => other,
            })?
            .with_smoothing(options.smoothing_fwhm)
            .with_standardize(options.standardize);

        let signals = masker.transform(map)?;
        let mean = signals.iter().map(|&v| f64::from(v)).sum::<f64>() / signals.len() as f64;
        info!("{}: {:.6} over {} voxels", region.name(), mean, masker.n_voxels());

        let filled = masker.inverse_transform(Array2::from_elem(signals.dim(), mean as f32).view())?;
        stats.push(RegionStat {
            name: region.name().to_string(),
            mean,
            filled,
            voxels: masker.voxel_indices().to_vec(),
        });
    }
    Ok(RegionSummary { stats })
}

/// Sum of all region fills.
#[derive(Debug, Clone)]
pub struct RegionMap {
    pub image: NiftiImage,
    /// Voxels covered by more than one region (their means add up).
    pub overlapping_voxels: usize,
}

/// Add the region fills voxel-wise on the `reference` grid.
///
/// Regions are not required to be disjoint; voxels where they overlap are
/// counted and reported.
pub fn compose_region_map(summary: &RegionSummary, reference: &NiftiImage) -> Result<RegionMap> {
    let [x, y, z] = reference.spatial_shape();
    let vox = x * y * z;
    let mut sum = vec![0f32; vox];
    let mut coverage = vec![0u16; vox];

    for stat in summary.iter() {
        reference.check_geometry(&stat.filled, &format!("region {} vs reference", stat.name))?;
        let fill = stat.mean as f32;
        for &i in &stat.voxels {
            sum[i] += fill;
            coverage[i] = coverage[i].saturating_add(1);
        }
    }

    let overlapping_voxels = coverage.iter().filter(|&&c| c > 1).count();
    if overlapping_voxels > 0 {
        warn!("{overlapping_voxels} voxels are covered by more than one region; their means were summed");
    }

    let data = crate::transforms::f_order_array(&[x, y, z], sum)?;
    Ok(RegionMap {
        image: reference.with_data(data)?,
        overlapping_voxels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::f_order_values;
    use ndarray::{ArrayD, IxDyn, ShapeBuilder};
    use std::path::PathBuf;

    const IDENTITY: [[f32; 4]; 4] = [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ];

    fn image(values: Vec<f32>) -> NiftiImage {
        let data = ArrayD::from_shape_vec(IxDyn(&[2, 2, 1]).f(), values).unwrap();
        NiftiImage::from_array(data, IDENTITY)
    }

    fn region(name: &str, values: Vec<f32>) -> RegionMask {
        RegionMask::new(name, image(values)).unwrap()
    }

    #[test]
    fn test_region_name_from_file() {
        let path = PathBuf::from("/masks/sub-01_space-MNI_mask-HIP-rh.nii.gz");
        assert_eq!(region_name(&path).unwrap(), "HIP-rh");
        assert_eq!(region_name(Path::new("a_mask-THA.nii")).unwrap(), "THA");
        assert!(region_name(Path::new("brainmask.nii.gz")).is_err());
        assert!(region_name(Path::new("x_mask-.nii.gz")).is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let masks = vec![
            region("CAU", vec![1.0, 0.0, 0.0, 0.0]),
            region("CAU", vec![0.0, 1.0, 0.0, 0.0]),
        ];
        assert!(matches!(RegionSet::new(masks), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_region_mean_and_fill() {
        let map = image(vec![2.0, 4.0, 6.0, 100.0]);
        let regions = RegionSet::new(vec![region("PUT", vec![1.0, 1.0, 1.0, 0.0])]).unwrap();

        let summary = summarize_regions(&map, &regions, &MaskingOptions::default()).unwrap();
        let stat = summary.get("PUT").unwrap();
        assert_eq!(stat.mean, 4.0);
        assert_eq!(stat.n_voxels(), 3);
        assert_eq!(f_order_values(stat.filled.data()), vec![4.0, 4.0, 4.0, 0.0]);
    }

    #[test]
    fn test_composite_sums_disjoint_regions() {
        let map = image(vec![1.0, 3.0, 10.0, 20.0]);
        let regions = RegionSet::new(vec![
            region("A", vec![1.0, 1.0, 0.0, 0.0]),
            region("B", vec![0.0, 0.0, 1.0, 1.0]),
        ])
        .unwrap();

        let summary = summarize_regions(&map, &regions, &MaskingOptions::default()).unwrap();
        assert_eq!(summary.means(), vec![("A", 2.0), ("B", 15.0)]);

        let composite = compose_region_map(&summary, regions.reference().unwrap()).unwrap();
        assert_eq!(composite.overlapping_voxels, 0);

        let mut expected = vec![0.0f32; 4];
        for stat in summary.iter() {
            for (e, v) in expected.iter_mut().zip(f_order_values(stat.filled.data())) {
                *e += v;
            }
        }
        assert_eq!(f_order_values(composite.image.data()), expected);
        assert_eq!(expected, vec![2.0, 2.0, 15.0, 15.0]);
    }

    #[test]
    fn test_composite_counts_overlap() {
        let map = image(vec![1.0, 1.0, 1.0, 1.0]);
        let regions = RegionSet::new(vec![
            region("A", vec![1.0, 1.0, 0.0, 0.0]),
            region("B", vec![0.0, 1.0, 1.0, 0.0]),
        ])
        .unwrap();
        let summary = summarize_regions(&map, &regions, &MaskingOptions::default()).unwrap();
        let composite = compose_region_map(&summary, regions.reference().unwrap()).unwrap();
        assert_eq!(composite.overlapping_voxels, 1);
        assert_eq!(f_order_values(composite.image.data()), vec![1.0, 2.0, 1.0, 0.0]);
    }

    #[test]
    fn test_empty_region_named_in_error() {
        let map = image(vec![1.0; 4]);
        let regions = RegionSet::new(vec![region("NAC", vec![0.0; 4])]).unwrap();
        let err = summarize_regions(&map, &regions, &MaskingOptions::default()).unwrap_err();
        assert!(matches!(err, Error::EmptyMask(ref m) if m.contains("NAC")));
    }

    #[test]
    fn test_misaligned_regions_rejected() {
        let other = NiftiImage::from_array(
            ArrayD::from_shape_vec(IxDyn(&[1, 2, 2]).f(), vec![1.0; 4]).unwrap(),
            IDENTITY,
        );
        let masks = vec![
            region("A", vec![1.0, 0.0, 0.0, 0.0]),
            RegionMask::new("B", other).unwrap(),
        ];
        assert!(matches!(RegionSet::new(masks), Err(Error::ShapeMismatch(_))));
    }
}
