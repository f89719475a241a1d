//! Writing the pipeline's artifacts.
//!
//! Everything is written into a staging directory inside the output
//! directory first and only moved into place once all artifacts exist, so a
//! failed run leaves nothing behind.

use super::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::nifti::{self, NiftiImage};
use crate::normative::{NormativeMaps, RegionSummary};
use log::{debug, info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Final locations of the four artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub dir: PathBuf,
    /// `sub-<id>_task-<task>_bold_normT2star.nii.gz`
    pub t2star: PathBuf,
    /// `sub-<id>_task-<task>_bold_normR2star.nii.gz`
    pub r2star: PathBuf,
    /// `sub-<id>_task-<task>_atlas-<atlas>_bold_normT2star.nii.gz`
    pub region_map: PathBuf,
    /// `<id>_mean_normT2star.csv`
    pub region_table: PathBuf,
}

impl OutputPaths {
    pub fn for_config(config: &PipelineConfig) -> Self {
        let dir = config.output_dir();
        let stem = format!("sub-{}_task-{}", config.subject, config.task);
        Self {
            t2star: dir.join(format!("{stem}_bold_normT2star.nii.gz")),
            r2star: dir.join(format!("{stem}_bold_normR2star.nii.gz")),
            region_map: dir.join(format!("{stem}_atlas-{}_bold_normT2star.nii.gz", config.atlas)),
            region_table: dir.join(format!("{}_mean_normT2star.csv", config.subject)),
            dir,
        }
    }

    fn files(&self) -> [&Path; 4] {
        [&self.t2star, &self.r2star, &self.region_map, &self.region_table]
    }
}

#[derive(Debug, Serialize)]
struct RegionRow<'a> {
    region: &'a str,
    #[serde(rename = "normT2star")]
    norm_t2star: f64,
}

/// Write the `region,normT2star` table.
pub fn write_region_table(path: &Path, summary: &RegionSummary) -> Result<()> {
    let write = || -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        if summary.is_empty() {
            writer.write_record(["region", "normT2star"])?;
        }
        for (region, mean) in summary.means() {
            writer.serialize(RegionRow {
                region,
                norm_t2star: mean,
            })?;
        }
        writer.flush()?;
        Ok(())
    };
    write().map_err(|e| e.at(path))
}

fn staged(staging: &Path, target: &Path) -> PathBuf {
    staging.join(target.file_name().unwrap_or(target.as_os_str()))
}

fn write_staged(maps: &NormativeMaps, paths: &OutputPaths, staging: &Path) -> Result<()> {
    let images: [(&NiftiImage, &Path); 3] = [
        (&maps.t2star, &paths.t2star),
        (&maps.r2star, &paths.r2star),
        (&maps.region_map.image, &paths.region_map),
    ];
    for (image, target) in images {
        let path = staged(staging, target);
        debug!("writing {}", path.display());
        nifti::save(image, &path)?;
    }
    write_region_table(&staged(staging, &paths.region_table), &maps.regions)
}

/// Move staged files into place; on failure, take back the ones already moved.
fn publish(paths: &OutputPaths, staging: &Path) -> Result<()> {
    let mut moved: Vec<&Path> = Vec::new();
    for target in paths.files() {
        if let Err(e) = fs::rename(staged(staging, target), target) {
            for done in moved {
                if let Err(cleanup) = fs::remove_file(done) {
                    warn!("could not remove {}: {}", done.display(), cleanup);
                }
            }
            return Err(Error::from(e).at(target));
        }
        moved.push(target);
    }
    Ok(())
}

/// Write every artifact of `maps` to `paths`, all or nothing.
pub fn write_outputs(maps: &NormativeMaps, paths: &OutputPaths) -> Result<()> {
    fs::create_dir_all(&paths.dir).map_err(|e| Error::from(e).at(&paths.dir))?;

    let staging = paths
        .dir
        .join(format!(".normstar-staging-{}", std::process::id()));
    fs::create_dir(&staging).map_err(|e| Error::from(e).at(&staging))?;

    let result = write_staged(maps, paths, &staging).and_then(|()| publish(paths, &staging));

    if let Err(e) = fs::remove_dir_all(&staging) {
        warn!("could not remove staging directory {}: {}", staging.display(), e);
    }
    if result.is_ok() {
        info!("outputs written to {}", paths.dir.display());
    }
    result
}
