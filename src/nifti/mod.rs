//! `NIfTI` file format support.
//!
//! Reading and writing of `.nii` and `.nii.gz` volumes (NIfTI-1 and
//! NIfTI-2). Voxel data is decoded to `f32` on load.

pub(crate) mod header;
pub(crate) mod image;
pub mod io;

pub use header::{DataType, NiftiHeader, NiftiVersion, SpatialUnits, TemporalUnits};
pub use image::NiftiImage;
pub use io::{load, load_header, save};
