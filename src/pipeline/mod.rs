//! The `norm-t2star` batch run: discover, load, compute, write.

pub mod config;
pub mod discover;
pub mod output;

pub use config::PipelineConfig;
pub use discover::{discover, Inputs};
pub use output::{write_outputs, write_region_table, OutputPaths};

use crate::error::{Error, Result};
use crate::nifti::{self, NiftiImage};
use crate::normative::{self, RegionSet};
use crate::transforms::{intersect_masks, normalize_by_volume_mean};
use log::{debug, info};
use std::path::PathBuf;

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub outputs: OutputPaths,
    /// `(region, mean normalized T2*)` in region order.
    pub regions: Vec<(String, f64)>,
    pub n_runs: usize,
    pub n_timepoints: usize,
    /// Zero voxels in the T2* map that were inverted as zero.
    pub zero_voxels: usize,
    /// Voxels outside the brain mask, zeroed in the R2* map.
    pub background_voxels: usize,
    /// Voxels covered by more than one region.
    pub overlapping_voxels: usize,
}

/// Check every input grid against the first run from headers alone, so a
/// misaligned file fails the run before any voxel data is read.
fn check_alignment(inputs: &Inputs) -> Result<()> {
    let Some(first) = inputs.functional.first() else {
        return Err(Error::MissingInput("no functional runs".to_string()));
    };
    let reference = nifti::load_header(first)?;

    let others = inputs
        .functional
        .iter()
        .chain(&inputs.brain_masks)
        .chain(&inputs.region_masks)
        .skip(1);
    for path in others {
        let header = nifti::load_header(path)?;
        if !reference.same_geometry(&header) {
            return Err(Error::ShapeMismatch(format!(
                "{} has grid {:?}, {} has {:?}",
                path.display(),
                header.spatial_shape(),
                first.display(),
                reference.spatial_shape()
            )));
        }
    }
    Ok(())
}

fn load_normalized(paths: &[PathBuf]) -> Result<Vec<NiftiImage>> {
    paths
        .iter()
        .map(|path| {
            debug!("loading {}", path.display());
            let run = nifti::load(path)?;
            normalize_by_volume_mean(&run).map_err(|e| e.at(path))
        })
        .collect()
}

fn load_brain_mask(paths: &[PathBuf]) -> Result<Option<NiftiImage>> {
    if paths.is_empty() {
        return Ok(None);
    }
    let masks = paths
        .iter()
        .map(|p| nifti::load(p))
        .collect::<Result<Vec<_>>>()?;
    intersect_masks(&masks).map(Some)
}

/// Run the whole pipeline for one subject.
///
/// Nothing is written unless every step succeeds.
pub fn run(config: &PipelineConfig) -> Result<PipelineReport> {
    config.validate()?;

    info!("sub-{} task-{}: locating inputs", config.subject, config.task);
    let inputs = discover(config)?;
    info!(
        "found {} runs, {} brain masks, {} region masks",
        inputs.functional.len(),
        inputs.brain_masks.len(),
        inputs.region_masks.len()
    );
    check_alignment(&inputs)?;

    info!("loading brain masks");
    let brain_mask = load_brain_mask(&inputs.brain_masks)?;

    info!("creating volume-normalized images");
    let normalized = load_normalized(&inputs.functional)?;
    let n_timepoints = normalized.iter().map(NiftiImage::n_timepoints).sum();

    let regions = RegionSet::load(&inputs.region_masks)?;
    let maps = normative::compute(
        &normalized,
        brain_mask.as_ref(),
        &regions,
        &config.normative_options(),
    )?;
    drop(normalized);

    let outputs = OutputPaths::for_config(config);
    write_outputs(&maps, &outputs)?;

    Ok(PipelineReport {
        regions: maps
            .regions
            .means()
            .into_iter()
            .map(|(name, mean)| (name.to_string(), mean))
            .collect(),
        n_runs: inputs.functional.len(),
        n_timepoints,
        zero_voxels: maps.zero_voxels,
        background_voxels: maps.background_voxels,
        overlapping_voxels: maps.region_map.overlapping_voxels,
        outputs,
    })
}
