//! norm-t2star - normative T2*/R2* maps for one subject

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;

use normstar::pipeline::{self, config, PipelineConfig};
use normstar::transforms::ZeroPolicy;

/// Compute normative T2* and R2* maps and per-region means from fMRIPrep runs
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about = None,
    arg_required_else_help = true,
    after_help = "Example: norm-t2star --sub SSP002"
)]
struct Args {
    /// Subject label (with or without the sub- prefix)
    #[arg(long = "sub", value_name = "ID")]
    subject: String,

    /// BIDS dataset root
    #[arg(long, default_value = config::DEFAULT_BIDS_ROOT)]
    bids_root: PathBuf,

    /// Task label
    #[arg(long, default_value = config::DEFAULT_TASK)]
    task: String,

    /// Template space of the preprocessed runs
    #[arg(long, default_value = config::DEFAULT_SPACE)]
    space: String,

    /// Atlas the region masks were cut from
    #[arg(long, default_value = config::DEFAULT_ATLAS)]
    atlas: String,

    /// fMRIPrep derivatives directory name
    #[arg(long, default_value = config::DEFAULT_FMRIPREP_DIR)]
    fmriprep_dir: String,

    /// Output directory [default: <bids-root>/derivatives/nilearn/normT2star/task-<task>]
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Gaussian smoothing FWHM in mm before region means (0 or unset: none)
    #[arg(long)]
    fwhm: Option<f64>,

    /// Z-score region signals across samples (true or false)
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    standardize: bool,

    /// How zero voxels of the T2* map are inverted: zero or reject
    #[arg(long, value_name = "POLICY", default_value = "zero")]
    zero_policy: ZeroPolicy,

    /// Do not zero the R2* map outside the brain masks
    #[arg(long)]
    no_brain_mask: bool,
}

impl Args {
    fn into_config(self) -> PipelineConfig {
        let mut config = PipelineConfig::new(self.subject)
            .with_bids_root(self.bids_root)
            .with_task(self.task)
            .with_space(self.space)
            .with_atlas(self.atlas)
            .with_fmriprep_dir(self.fmriprep_dir)
            .with_smoothing(self.fwhm)
            .with_standardize(self.standardize)
            .with_zero_policy(self.zero_policy)
            .with_brain_mask(!self.no_brain_mask);
        if let Some(dir) = self.out_dir {
            config = config.with_out_dir(dir);
        }
        config
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config();
    let subject = config.subject.clone();

    let report = pipeline::run(&config)
        .with_context(|| format!("normative T2* run failed for sub-{subject}"))?;

    for (region, mean) in &report.regions {
        info!("  {region}: {mean:.6}");
    }
    if report.zero_voxels > 0 {
        warn!("{} voxels of the T2* map were zero", report.zero_voxels);
    }
    if report.background_voxels > 0 {
        info!("{} voxels outside the brain mask", report.background_voxels);
    }
    if report.overlapping_voxels > 0 {
        warn!("{} voxels belong to more than one region", report.overlapping_voxels);
    }
    info!(
        "sub-{}: {} runs, {} timepoints, {} regions -> {}",
        subject,
        report.n_runs,
        report.n_timepoints,
        report.regions.len(),
        report.outputs.dir.display()
    );
    Ok(())
}
