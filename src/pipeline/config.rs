//! Run configuration and the BIDS paths derived from it.

use crate::error::{Error, Result};
use crate::normative::{MaskingOptions, NormativeOptions};
use crate::transforms::ZeroPolicy;
use std::path::PathBuf;

/// Study dataset root used when none is given.
pub const DEFAULT_BIDS_ROOT: &str = "/bgfs/bchandrasekaran/krs228/data/SSP/data_bids/";
pub const DEFAULT_TASK: &str = "alice";
pub const DEFAULT_SPACE: &str = "MNI152NLin2009cAsym";
pub const DEFAULT_ATLAS: &str = "tian-S3";
pub const DEFAULT_FMRIPREP_DIR: &str = "fmriprep-23.2.1";

/// Everything one `norm-t2star` run needs.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Participant label without the `sub-` prefix.
    pub subject: String,
    pub task: String,
    pub space: String,
    pub atlas: String,
    pub bids_root: PathBuf,
    /// Directory name of the fMRIPrep derivatives.
    pub fmriprep_dir: String,
    /// Where outputs go; derived from `bids_root` and `task` when unset.
    pub out_dir: Option<PathBuf>,
    pub smoothing_fwhm: Option<f64>,
    pub standardize: bool,
    pub zero_policy: ZeroPolicy,
    /// Zero the R2* map outside the intersection of the run brain masks.
    pub use_brain_mask: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            subject: String::new(),
            task: DEFAULT_TASK.to_string(),
            space: DEFAULT_SPACE.to_string(),
            atlas: DEFAULT_ATLAS.to_string(),
            bids_root: PathBuf::from(DEFAULT_BIDS_ROOT),
            fmriprep_dir: DEFAULT_FMRIPREP_DIR.to_string(),
            out_dir: None,
            smoothing_fwhm: None,
            standardize: true,
            zero_policy: ZeroPolicy::default(),
            use_brain_mask: true,
        }
    }
}

impl PipelineConfig {
    /// Study defaults for one subject; a leading `sub-` is dropped.
    pub fn new(subject: impl Into<String>) -> Self {
        let subject = subject.into();
        let subject = subject
            .strip_prefix("sub-")
            .map(str::to_string)
            .unwrap_or(subject);
        Self {
            subject,
            ..Self::default()
        }
    }

    pub fn with_bids_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.bids_root = root.into();
        self
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = task.into();
        self
    }

    pub fn with_space(mut self, space: impl Into<String>) -> Self {
        self.space = space.into();
        self
    }

    pub fn with_atlas(mut self, atlas: impl Into<String>) -> Self {
        self.atlas = atlas.into();
        self
    }

    pub fn with_fmriprep_dir(mut self, dir: impl Into<String>) -> Self {
        self.fmriprep_dir = dir.into();
        self
    }

    pub fn with_out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.out_dir = Some(dir.into());
        self
    }

    pub fn with_smoothing(mut self, fwhm: Option<f64>) -> Self {
        self.smoothing_fwhm = fwhm;
        self
    }

    pub fn with_standardize(mut self, standardize: bool) -> Self {
        self.standardize = standardize;
        self
    }

    pub fn with_zero_policy(mut self, policy: ZeroPolicy) -> Self {
        self.zero_policy = policy;
        self
    }

    pub fn with_brain_mask(mut self, use_brain_mask: bool) -> Self {
        self.use_brain_mask = use_brain_mask;
        self
    }

    /// Check labels before any file is touched.
    ///
    /// Labels end up in file names, so they must be non-empty and free of
    /// path separators.
    pub fn validate(&self) -> Result<()> {
        for (what, value) in [
            ("subject", &self.subject),
            ("task", &self.task),
            ("space", &self.space),
            ("atlas", &self.atlas),
            ("fmriprep directory", &self.fmriprep_dir),
        ] {
            if value.is_empty() {
                return Err(Error::Configuration(format!("{what} must not be empty")));
            }
            if value.contains(['/', '\\']) || value == ".." {
                return Err(Error::Configuration(format!(
                    "{what} '{value}' must not contain path separators"
                )));
            }
        }
        if let Some(fwhm) = self.smoothing_fwhm {
            if !fwhm.is_finite() || fwhm < 0.0 {
                return Err(Error::Configuration(format!(
                    "smoothing FWHM must be a non-negative number, got {fwhm}"
                )));
            }
        }
        Ok(())
    }

    /// `<bids_root>/derivatives/<fmriprep_dir>/sub-<id>/func`
    pub fn func_dir(&self) -> PathBuf {
        self.bids_root
            .join("derivatives")
            .join(&self.fmriprep_dir)
            .join(format!("sub-{}", self.subject))
            .join("func")
    }

    /// `<bids_root>/derivatives/nilearn/masks/sub-<id>/space-<space>/masks-<atlas>`
    pub fn region_mask_dir(&self) -> PathBuf {
        self.bids_root
            .join("derivatives")
            .join("nilearn")
            .join("masks")
            .join(format!("sub-{}", self.subject))
            .join(format!("space-{}", self.space))
            .join(format!("masks-{}", self.atlas))
    }

    /// Output directory, `<bids_root>/derivatives/nilearn/normT2star/task-<task>`
    /// unless overridden.
    pub fn output_dir(&self) -> PathBuf {
        match &self.out_dir {
            Some(dir) => dir.clone(),
            None => self
                .bids_root
                .join("derivatives")
                .join("nilearn")
                .join("normT2star")
                .join(format!("task-{}", self.task)),
        }
    }

    pub fn normative_options(&self) -> NormativeOptions {
        NormativeOptions {
            masking: MaskingOptions {
                smoothing_fwhm: self.smoothing_fwhm,
                standardize: self.standardize,
            },
            zero_policy: self.zero_policy,
        }
    }
}
