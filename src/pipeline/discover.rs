//! Locating a subject's input files in a BIDS derivatives tree.

use super::config::PipelineConfig;
use crate::error::{Error, Result};
use log::debug;
use std::path::{Path, PathBuf};

/// Input files for one run, each list sorted by file name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inputs {
    /// Preprocessed BOLD series.
    pub functional: Vec<PathBuf>,
    /// Whole-brain masks of the same runs.
    pub brain_masks: Vec<PathBuf>,
    /// Anatomical region masks.
    pub region_masks: Vec<PathBuf>,
}

/// Files in `dir` matching the glob `pattern`, sorted by name.
///
/// A missing directory means the subject has no inputs there.
fn list_matching(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::MissingInput(format!(
            "directory {} does not exist",
            dir.display()
        )));
    }

    let full = format!("{}/{pattern}", glob::Pattern::escape(&dir.to_string_lossy()));
    let paths = glob::glob(&full)
        .map_err(|e| Error::Configuration(format!("bad file pattern {full:?}: {e}")))?;

    let mut files = Vec::new();
    for entry in paths {
        let path = entry.map_err(|e| {
            let at = e.path().to_path_buf();
            Error::from(e.into_error()).at(at)
        })?;
        if path.is_file() {
            debug!("found {}", path.display());
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Find functional runs, brain masks and region masks for `config`.
///
/// Runs match `*task-<task>*space-<space>*bold.nii.gz` and brain masks
/// `*task-<task>*space-<space>*mask.nii.gz` in the fMRIPrep `func`
/// directory; region masks are every `*.gz` in the atlas mask directory.
///
/// # Errors
///
/// `MissingInput` when a search directory does not exist, when there is no
/// functional run or no region mask, or when brain masks are required and
/// none is found. Unreadable entries surface as `Io` errors naming the path.
pub fn discover(config: &PipelineConfig) -> Result<Inputs> {
    let func_dir = config.func_dir();
    let task = glob::Pattern::escape(&format!("task-{}", config.task));
    let space = glob::Pattern::escape(&format!("space-{}", config.space));
    debug!("searching {}", func_dir.display());

    let functional = list_matching(&func_dir, &format!("*{task}*{space}*bold.nii.gz"))?;
    if functional.is_empty() {
        return Err(Error::MissingInput(format!(
            "no {task} {space} BOLD runs in {}",
            func_dir.display()
        )));
    }

    let brain_masks = if config.use_brain_mask {
        let masks = list_matching(&func_dir, &format!("*{task}*{space}*mask.nii.gz"))?;
        if masks.is_empty() {
            return Err(Error::MissingInput(format!(
                "no {task} {space} brain masks in {}",
                func_dir.display()
            )));
        }
        masks
    } else {
        Vec::new()
    };

    let mask_dir = config.region_mask_dir();
    debug!("searching {}", mask_dir.display());
    let region_masks = list_matching(&mask_dir, "*.gz")?;
    if region_masks.is_empty() {
        return Err(Error::MissingInput(format!(
            "no region masks in {}",
            mask_dir.display()
        )));
    }

    Ok(Inputs {
        functional,
        brain_masks,
        region_masks,
    })
}
