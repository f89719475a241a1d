//! Normative T2* and R2* maps and their per-region summaries.
//!
//! Volume-normalized functional runs are concatenated and averaged into a
//! normative T2* map, which is inverted into an R2* map and summarized
//! inside each anatomical region.

pub mod region;

pub use region::{
    compose_region_map, region_name, summarize_regions, MaskingOptions, RegionMap, RegionMask,
    RegionSet, RegionStat, RegionSummary,
};

use crate::error::Result;
use crate::nifti::NiftiImage;
use crate::transforms::{concat_images, mean_image, reciprocal, Reciprocal, ZeroPolicy};
use log::info;

/// Options for [`compute`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NormativeOptions {
    pub masking: MaskingOptions,
    pub zero_policy: ZeroPolicy,
}

/// Everything derived from one subject's runs.
#[derive(Debug, Clone)]
pub struct NormativeMaps {
    /// Temporal mean of the volume-normalized runs.
    pub t2star: NiftiImage,
    /// `1 / t2star`, background zeroed when a brain mask was given.
    pub r2star: NiftiImage,
    /// In-brain voxels of `t2star` that were zero.
    pub zero_voxels: usize,
    /// Voxels outside the brain mask, zeroed in `r2star`.
    pub background_voxels: usize,
    pub regions: RegionSummary,
    pub region_map: RegionMap,
}

/// Normative T2* map: temporal mean over all timepoints of all runs.
///
/// Runs are expected to be volume-normalized already
/// (see [`crate::transforms::normalize_by_volume_mean`]).
pub fn t2star_map(normalized: &[NiftiImage]) -> Result<NiftiImage> {
    let all = concat_images(normalized)?;
    info!("averaging {} timepoints", all.n_timepoints());
    mean_image(&all)
}

/// Compute every map and summary from volume-normalized runs.
///
/// The composite region map is built on the first region mask's grid, or on
/// the T2* grid when there are no regions.
pub fn compute(
    normalized: &[NiftiImage],
    brain_mask: Option<&NiftiImage>,
    regions: &RegionSet,
    options: &NormativeOptions,
) -> Result<NormativeMaps> {
    info!("computing normative T2* map");
    let t2star = t2star_map(normalized)?;

    info!("inverting to normative R2* map");
    let Reciprocal {
        image: r2star,
        zero_voxels,
        background_voxels,
    } = reciprocal(&t2star, options.zero_policy, brain_mask)?;

    info!("summarizing {} regions", regions.len());
    let summary = summarize_regions(&t2star, regions, &options.masking)?;
    let reference = regions.reference().unwrap_or(&t2star);
    let region_map = compose_region_map(&summary, reference)?;

    Ok(NormativeMaps {
        t2star,
        r2star,
        zero_voxels,
        background_voxels,
        regions: summary,
        region_map,
    })
}
