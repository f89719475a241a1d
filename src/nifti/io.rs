//! NIfTI file reading and writing.
//!
//! - `.nii` is memory mapped and decoded straight from the mapping.
//! - `.nii.gz` is decompressed in one pass with libdeflate, sized from the
//!   gzip trailer, falling back to a streaming decoder when the trailer is
//!   unreliable (multi-member files, payloads over 4 GiB).
//! - Writing `.nii.gz` uses libdeflate for small payloads and gzp's parallel
//!   compressor above [`PARALLEL_THRESHOLD`].
//!
//! Every error returned from the public functions names the file.

use super::header::NiftiHeader;
use super::image::NiftiImage;
use crate::error::{Error, Result};
use flate2::bufread::{GzDecoder, MultiGzDecoder};
use gzp::deflate::Gzip;
use gzp::par::compress::ParCompressBuilder;
use gzp::ZWriter;
use libdeflater::{CompressionLvl, Compressor, DecompressionError, Decompressor};
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const GZIP_BUFFER_SIZE: usize = 256 * 1024;

/// Payloads at least this large are compressed with gzp worker threads.
pub const PARALLEL_THRESHOLD: usize = 1024 * 1024;

/// Load a NIfTI image (`.nii` or `.nii.gz`, chosen by extension).
///
/// # Example
/// ```ignore
/// let bold = normstar::nifti::load("sub-01_task-alice_bold.nii.gz")?;
/// println!("{} volumes", bold.n_timepoints());
/// ```
#[must_use = "this function returns a loaded image that should be used"]
pub fn load<P: AsRef<Path>>(path: P) -> Result<NiftiImage> {
    let path = path.as_ref();
    let loaded = if is_gzipped(path) {
        load_gzipped(path)
    } else {
        load_uncompressed(path)
    };
    loaded.map_err(|e| e.at(path))
}

/// Read only the header.
pub fn load_header<P: AsRef<Path>>(path: P) -> Result<NiftiHeader> {
    let path = path.as_ref();
    read_header(path).map_err(|e| e.at(path))
}

/// Save an image; gzip is used when the path ends in `.gz`.
pub fn save<P: AsRef<Path>>(image: &NiftiImage, path: P) -> Result<()> {
    let path = path.as_ref();
    let saved = image.header().validate().and_then(|()| {
        if is_gzipped(path) {
            save_gzipped(image, path)
        } else {
            save_uncompressed(image, path)
        }
    });
    saved.map_err(|e| e.at(path))
}

fn is_gzipped(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "gz")
}

#[cfg(target_os = "linux")]
fn read_file_with_readahead(path: &Path) -> Result<Vec<u8>> {
    use std::os::unix::io::AsRawFd;

    let file = File::open(path)?;
    let len = file.metadata()?.len() as usize;

    // SAFETY: posix_fadvise only reads the descriptor, which stays open for
    // the duration of the call.
    unsafe {
        libc::posix_fadvise(
            file.as_raw_fd(),
            0,
            len as libc::off_t,
            libc::POSIX_FADV_SEQUENTIAL,
        );
    }

    let mut buffer = Vec::with_capacity(len);
    BufReader::with_capacity(GZIP_BUFFER_SIZE, file).read_to_end(&mut buffer)?;
    Ok(buffer)
}

#[cfg(not(target_os = "linux"))]
fn read_file_with_readahead(path: &Path) -> Result<Vec<u8>> {
    Ok(std::fs::read(path)?)
}

/// ISIZE from the gzip trailer: the uncompressed size modulo 2^32 of the
/// last member only.
fn estimate_gzip_uncompressed_size(compressed: &[u8]) -> usize {
    if compressed.len() >= 4 {
        let t = &compressed[compressed.len() - 4..];
        u32::from_le_bytes([t[0], t[1], t[2], t[3]]) as usize
    } else {
        compressed.len() * 4
    }
}

fn decompress_gzip_streaming(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = MultiGzDecoder::new(BufReader::with_capacity(
        GZIP_BUFFER_SIZE,
        std::io::Cursor::new(compressed),
    ));
    let mut output = Vec::with_capacity(estimate_gzip_uncompressed_size(compressed));
    decoder
        .read_to_end(&mut output)
        .map_err(|e| Error::Decompression(format!("gzip stream decode failed: {e}")))?;
    Ok(output)
}

/// Single-shot libdeflate decode; the flag reports whether the streaming
/// fallback produced the result.
fn decompress_gzip(compressed: &[u8]) -> Result<(Vec<u8>, bool)> {
    let size = estimate_gzip_uncompressed_size(compressed).max(NiftiHeader::SIZE);
    let mut output = vec![0u8; size];

    match Decompressor::new().gzip_decompress(compressed, &mut output) {
        Ok(written) => {
            output.truncate(written);
            Ok((output, false))
        }
        Err(DecompressionError::InsufficientSpace) => {
            Ok((decompress_gzip_streaming(compressed)?, true))
        }
        Err(e) => Err(Error::Decompression(e.to_string())),
    }
}

fn decode_buffer(bytes: &[u8]) -> Result<NiftiImage> {
    if bytes.len() < NiftiHeader::SIZE {
        return Err(Error::InvalidFileFormat(format!(
            "{} bytes is too small for a NIfTI header (need at least {})",
            bytes.len(),
            NiftiHeader::SIZE
        )));
    }
    let header = NiftiHeader::from_bytes(bytes)?;
    let offset = header.vox_offset as usize;
    if bytes.len() < offset {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "file truncated before voxel data",
        )));
    }
    // Extensions between the header and vox_offset are skipped.
    NiftiImage::decode(header, &bytes[offset..])
}

fn load_gzipped(path: &Path) -> Result<NiftiImage> {
    let compressed = read_file_with_readahead(path)?;
    let (output, used_streaming) = decompress_gzip(&compressed)?;

    let header = NiftiHeader::from_bytes(&output)?;
    let expected = header.vox_offset as usize + header.data_size();
    if output.len() >= expected {
        return decode_buffer(&output);
    }
    if used_streaming {
        return Err(Error::Decompression(format!(
            "decompressed size {} is smaller than expected {}",
            output.len(),
            expected
        )));
    }

    // The trailer only described the last member; decode every member.
    decode_buffer(&decompress_gzip_streaming(&compressed)?)
}

#[allow(unsafe_code)]
fn load_uncompressed(path: &Path) -> Result<NiftiImage> {
    let file = File::open(path)?;
    // SAFETY: the mapping is read-only and dropped before returning; the
    // decoded image owns its data.
    let mmap = unsafe { Mmap::map(&file)? };
    decode_buffer(&mmap)
}

#[allow(unsafe_code)]
fn read_header(path: &Path) -> Result<NiftiHeader> {
    let file = File::open(path)?;
    if is_gzipped(path) {
        let mut decoder = GzDecoder::new(BufReader::new(file));
        let mut buf = vec![0u8; NiftiHeader::SIZE];
        decoder.read_exact(&mut buf)?;
        let sizeof_hdr = [buf[0], buf[1], buf[2], buf[3]];
        let v2 = NiftiHeader::SIZE_V2 as i32;
        if i32::from_le_bytes(sizeof_hdr) == v2 || i32::from_be_bytes(sizeof_hdr) == v2 {
            buf.resize(NiftiHeader::SIZE_V2, 0);
            decoder.read_exact(&mut buf[NiftiHeader::SIZE..])?;
        }
        NiftiHeader::from_bytes(&buf)
    } else {
        // SAFETY: read-only mapping of a file we just opened.
        let mmap = unsafe { Mmap::map(&file)? };
        NiftiHeader::from_bytes(&mmap)
    }
}

/// Header, padding to `vox_offset`, then encoded voxels.
fn serialize(image: &NiftiImage) -> Result<Vec<u8>> {
    let header = image.header();
    let header_bytes = header.to_bytes();
    let padding = (header.vox_offset as usize).saturating_sub(header_bytes.len());
    let data = image.data_to_bytes()?;

    let mut out = Vec::with_capacity(header_bytes.len() + padding + data.len());
    out.extend_from_slice(&header_bytes);
    // Zero padding doubles as the "no extensions" flag.
    out.resize(out.len() + padding, 0u8);
    out.extend_from_slice(&data);
    Ok(out)
}

fn save_uncompressed(image: &NiftiImage, path: &Path) -> Result<()> {
    let bytes = serialize(image)?;
    let mut writer = BufWriter::with_capacity(1024 * 1024, File::create(path)?);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

fn save_gzipped(image: &NiftiImage, path: &Path) -> Result<()> {
    let uncompressed = serialize(image)?;

    if uncompressed.len() >= PARALLEL_THRESHOLD {
        let writer = BufWriter::with_capacity(1024 * 1024, File::create(path)?);
        let mut parz = ParCompressBuilder::<Gzip>::new().from_writer(writer);
        parz.write_all(&uncompressed).map_err(|e| {
            Error::Io(std::io::Error::other(format!(
                "parallel compression failed: {e}"
            )))
        })?;
        parz.finish().map_err(|e| {
            Error::Io(std::io::Error::other(format!(
                "parallel compression finish failed: {e}"
            )))
        })?;
    } else {
        let mut compressor = Compressor::new(CompressionLvl::fastest());
        let mut compressed = vec![0u8; compressor.gzip_compress_bound(uncompressed.len())];
        let written = compressor
            .gzip_compress(&uncompressed, &mut compressed)
            .map_err(|e| Error::Io(std::io::Error::other(format!("compression failed: {e:?}"))))?;
        compressed.truncate(written);

        let mut file = File::create(path)?;
        file.write_all(&compressed)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nifti::DataType;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use ndarray::{ArrayD, IxDyn, ShapeBuilder};
    use tempfile::tempdir;

    const AFFINE: [[f32; 4]; 4] = [
        [2.0, 0.0, 0.0, -10.0],
        [0.0, 2.0, 0.0, -12.0],
        [0.0, 0.0, 2.0, -8.0],
        [0.0, 0.0, 0.0, 1.0],
    ];

    fn ramp_image(shape: &[usize]) -> NiftiImage {
        let n: usize = shape.iter().product();
        let data =
            ArrayD::from_shape_vec(IxDyn(shape).f(), (0..n).map(|i| i as f32 * 0.25).collect())
                .unwrap();
        NiftiImage::from_array(data, AFFINE)
    }

    #[test]
    fn test_roundtrip_uncompressed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("map.nii");
        let img = ramp_image(&[6, 5, 4]);

        save(&img, &path).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded.shape(), &[6, 5, 4]);
        assert_eq!(loaded.affine(), AFFINE);
        assert_eq!(loaded.data(), img.data());
    }

    #[test]
    fn test_roundtrip_gzipped_4d() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bold.nii.gz");
        let img = ramp_image(&[5, 4, 3, 7]);

        save(&img, &path).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded.shape(), &[5, 4, 3, 7]);
        assert_eq!(loaded.n_timepoints(), 7);
        assert_eq!(loaded.data(), img.data());
        assert_eq!(load_header(&path).unwrap().shape(), vec![5, 4, 3, 7]);
    }

    #[test]
    fn test_large_gzipped_uses_parallel_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("large.nii.gz");
        // 64^3 floats is 1 MiB of voxel data, above the parallel threshold.
        let img = ramp_image(&[64, 64, 64]);

        save(&img, &path).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.data(), img.data());
    }

    #[test]
    fn test_multimember_gzip_fallback() {
        let dir = tempdir().unwrap();
        let plain = dir.path().join("plain.nii");
        let path = dir.path().join("multi.nii.gz");
        let img = ramp_image(&[10, 10, 10]);
        save(&img, &plain).unwrap();

        let bytes = std::fs::read(&plain).unwrap();
        let split = bytes.len() / 2;
        let mut multi = Vec::new();
        for part in [&bytes[..split], &bytes[split..]] {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
            encoder.write_all(part).unwrap();
            multi.extend(encoder.finish().unwrap());
        }
        std::fs::write(&path, multi).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.data(), img.data());
    }

    #[test]
    fn test_uint8_mask_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mask.nii.gz");
        let data = ArrayD::from_shape_vec(
            IxDyn(&[2, 2, 2]).f(),
            vec![0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0],
        )
        .unwrap();
        let mask = NiftiImage::from_array(data.clone(), AFFINE)
            .with_dtype(DataType::UInt8)
            .unwrap();

        save(&mask, &path).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.dtype(), DataType::UInt8);
        assert_eq!(loaded.data(), &data);
    }

    #[test]
    fn test_missing_file_names_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent_bold.nii.gz");
        let err = load(&path).unwrap_err();
        assert!(err.to_string().contains("absent_bold.nii.gz"));
        assert!(matches!(err.root(), Error::Io(_)));
    }

    #[test]
    fn test_truncated_file_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cut.nii");
        save(&ramp_image(&[8, 8, 8]), &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        assert!(load(&path).is_err());
    }
}
