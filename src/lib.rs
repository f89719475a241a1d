//! Normative T2*/R2* mapping for BIDS fMRI derivatives.
//!
//! The crate has three layers:
//!
//! - [`nifti`]: reading and writing `.nii` / `.nii.gz` volumes.
//! - [`transforms`] and [`normative`]: the voxel arithmetic (per-volume
//!   normalization, temporal mean, reciprocal, region masking).
//! - [`pipeline`]: file discovery, the batch run for one subject, and
//!   all-or-nothing persistence of the outputs.
//!
//! [`heuristic`] is independent of the rest: it maps scanner series onto
//! BIDS paths for DICOM conversion.
//!
//! # Example
//! ```ignore
//! use normstar::pipeline::{self, PipelineConfig};
//!
//! let config = PipelineConfig::new("SSP002").with_bids_root("/data/SSP/data_bids");
//! let report = pipeline::run(&config)?;
//! println!("{} regions", report.regions.len());
//! ```

pub mod error;
pub mod heuristic;
pub mod nifti;
pub mod normative;
pub mod pipeline;
pub mod transforms;

pub use error::{Error, Result};
pub use nifti::{DataType, NiftiHeader, NiftiImage};
