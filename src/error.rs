//! Error types for normstar.

use std::path::{Path, PathBuf};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the NIfTI codec, the transforms and the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error attributed to a specific file.
    #[error("{}: {source}", path.display())]
    File {
        /// Offending file.
        path: PathBuf,
        /// What went wrong with it.
        #[source]
        source: Box<Error>,
    },

    /// No input matched, or an operation received an empty list.
    #[error("missing input: {0}")]
    MissingInput(String),

    /// Geometry disagreement between series, or between a map and a mask.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Header magic was not `n+1`/`ni1`/`n+2`/`ni2`.
    #[error("invalid NIfTI magic bytes {0:?}")]
    InvalidMagic([u8; 4]),

    /// Datatype code outside the supported set.
    #[error("unsupported data type code {0}")]
    UnsupportedDataType(i16),

    /// Header or array dimensions are inconsistent.
    #[error("invalid dimensions: {0}")]
    InvalidDimensions(String),

    /// File content is not a usable NIfTI volume or table.
    #[error("invalid file format: {0}")]
    InvalidFileFormat(String),

    /// gzip decoding failed.
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// Division by a zero (or non-finite) quantity.
    #[error("zero division: {0}")]
    ZeroDivision(String),

    /// A mask selects no voxels.
    #[error("empty mask: {0}")]
    EmptyMask(String),

    /// Invalid option or template.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// CSV/TSV read or write failure.
    #[error("table error: {0}")]
    Table(#[from] csv::Error),
}

impl Error {
    /// Attach the path of the file being processed.
    pub fn at(self, path: impl AsRef<Path>) -> Self {
        match self {
            already @ Self::File { .. } => already,
            other => Self::File {
                path: path.as_ref().to_path_buf(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, looking through `File` wrappers.
    pub fn root(&self) -> &Self {
        match self {
            Self::File { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_wraps_once() {
        let err = Error::ShapeMismatch("4x4x4 vs 5x5x5".into())
            .at("a.nii.gz")
            .at("b.nii.gz");
        let msg = err.to_string();
        assert!(msg.starts_with("a.nii.gz: shape mismatch"));
        assert!(matches!(err.root(), Error::ShapeMismatch(_)));
    }
}
