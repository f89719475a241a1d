//! In-memory NIfTI image.
//!
//! Voxel data is held as an F-ordered `ArrayD<f32>` (x fastest, matching the
//! on-disk layout) with `scl_slope`/`scl_inter` already applied. The header
//! keeps the on-disk element type so a loaded image can be written back in
//! its original encoding.

use super::header::{DataType, NiftiHeader};
use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use half::{bf16, f16};
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, ShapeBuilder};
use rayon::prelude::*;

/// A NIfTI volume or time series.
#[derive(Debug, Clone)]
pub struct NiftiImage {
    header: NiftiHeader,
    data: ArrayD<f32>,
}

impl NiftiImage {
    /// Build a float32 image from data and a voxel-to-world affine.
    ///
    /// Arrays with more than seven axes keep only the first seven in the
    /// header; use [`Self::from_parts`] to get that checked.
    pub fn from_array(data: ArrayD<f32>, affine: [[f32; 4]; 4]) -> Self {
        let mut header = NiftiHeader::default();
        header.ndim = data.ndim().clamp(1, 7) as u8;
        header.dim = [1; 7];
        for (d, &s) in header.dim.iter_mut().zip(data.shape()) {
            *d = s as i64;
        }
        header.set_affine(affine);
        Self { header, data }
    }

    /// Pair a header with data, checking that their shapes agree.
    pub fn from_parts(header: NiftiHeader, data: ArrayD<f32>) -> Result<Self> {
        if header.shape() != data.shape() {
            return Err(Error::ShapeMismatch(format!(
                "header shape {:?} does not match data shape {:?}",
                header.shape(),
                data.shape()
            )));
        }
        Ok(Self { header, data })
    }

    /// Decode raw voxel bytes described by `header`.
    pub(crate) fn decode(header: NiftiHeader, bytes: &[u8]) -> Result<Self> {
        let expected = header.data_size();
        if bytes.len() < expected {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("file truncated: {} data bytes, need {}", bytes.len(), expected),
            )));
        }
        let bytes = &bytes[..expected];

        let mut values = if header.is_little_endian() {
            decode_elements::<LittleEndian>(bytes, header.datatype)
        } else {
            decode_elements::<BigEndian>(bytes, header.datatype)
        };

        if let Some((slope, inter)) = scaling(&header) {
            values
                .par_iter_mut()
                .for_each(|v| *v = (f64::from(*v) * slope + inter) as f32);
        }

        let shape = header.shape();
        let data = ArrayD::from_shape_vec(IxDyn(&shape).f(), values)
            .map_err(|e| Error::InvalidDimensions(format!("cannot shape voxel data: {e}")))?;
        Ok(Self { header, data })
    }

    /// Header (on-disk metadata).
    pub fn header(&self) -> &NiftiHeader {
        &self.header
    }

    /// Voxel values.
    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    /// Full shape.
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Number of axes.
    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    /// Element type used when saving.
    pub fn dtype(&self) -> DataType {
        self.header.datatype
    }

    /// Voxel spacing from pixdim.
    pub fn spacing(&self) -> Vec<f32> {
        self.header.spacing()
    }

    /// Voxel-to-world affine.
    pub fn affine(&self) -> [[f32; 4]; 4] {
        self.header.affine()
    }

    /// Replace the affine.
    pub fn set_affine(&mut self, affine: [[f32; 4]; 4]) {
        self.header.set_affine(affine);
    }

    /// Shape of one volume.
    pub fn spatial_shape(&self) -> [usize; 3] {
        self.header.spatial_shape()
    }

    /// Number of volumes (1 for 3-D images).
    pub fn n_timepoints(&self) -> usize {
        self.header.n_timepoints()
    }

    /// Volume `t` of a 4-D image, or the whole image when it is 3-D.
    pub fn volume(&self, t: usize) -> Result<ArrayViewD<'_, f32>> {
        match self.ndim() {
            3 if t == 0 => Ok(self.data.view()),
            4 if t < self.shape()[3] => Ok(self.data.index_axis(Axis(3), t)),
            _ => Err(Error::InvalidDimensions(format!(
                "no volume {} in image of shape {:?}",
                t,
                self.shape()
            ))),
        }
    }

    /// New image with this image's metadata and `data` substituted.
    ///
    /// The spatial shape must be unchanged; the time axis may differ (or
    /// vanish). The result is stored as unscaled float32.
    pub fn with_data(&self, data: ArrayD<f32>) -> Result<Self> {
        let mut header = self.header.clone();
        header.set_shape(data.shape())?;
        if header.spatial_shape() != self.spatial_shape() {
            return Err(Error::ShapeMismatch(format!(
                "replacement data {:?} does not match spatial shape {:?}",
                data.shape(),
                self.spatial_shape()
            )));
        }
        header.datatype = DataType::Float32;
        header.scl_slope = 1.0;
        header.scl_inter = 0.0;
        Ok(Self { header, data })
    }

    /// Same image, saved as `dtype` (integer types are rounded on write).
    pub fn with_dtype(&self, dtype: DataType) -> Result<Self> {
        let mut header = self.header.clone();
        header.datatype = dtype;
        header.scl_slope = 1.0;
        header.scl_inter = 0.0;
        header.validate()?;
        Ok(Self {
            header,
            data: self.data.clone(),
        })
    }

    /// Fail with `ShapeMismatch` unless `other` has the same spatial grid.
    pub fn check_geometry(&self, other: &Self, what: &str) -> Result<()> {
        if self.header.same_geometry(&other.header) {
            return Ok(());
        }
        Err(Error::ShapeMismatch(format!(
            "{}: shape {:?} / affine {:?} vs shape {:?} / affine {:?}",
            what,
            self.spatial_shape(),
            self.header.affine(),
            other.spatial_shape(),
            other.header.affine()
        )))
    }

    /// Encode voxel data (little endian, F order) in the header's datatype.
    pub fn data_to_bytes(&self) -> Result<Vec<u8>> {
        let owned;
        let values: &[f32] = match self.data.t().to_slice() {
            Some(slice) => slice,
            None => {
                owned = self.data.t().iter().copied().collect::<Vec<_>>();
                &owned
            }
        };

        let unscale = scaling(&self.header);
        let dtype = self.header.datatype;
        let size = dtype.byte_size();
        let mut out = vec![0u8; values.len() * size];

        out.par_chunks_exact_mut(size)
            .zip(values.par_iter())
            .for_each(|(dst, &v)| {
                let raw = match unscale {
                    Some((slope, inter)) => (f64::from(v) - inter) / slope,
                    None => f64::from(v),
                };
                encode_element(dst, dtype, raw);
            });

        Ok(out)
    }
}

/// `(slope, inter)` when the header asks for scaling.
fn scaling(header: &NiftiHeader) -> Option<(f64, f64)> {
    let slope = header.scl_slope;
    let inter = header.scl_inter;
    if slope == 0.0 || !slope.is_finite() {
        return None;
    }
    if slope == 1.0 && inter == 0.0 {
        return None;
    }
    Some((slope, if inter.is_finite() { inter } else { 0.0 }))
}

fn decode_elements<E: ByteOrder>(bytes: &[u8], dtype: DataType) -> Vec<f32> {
    let size = dtype.byte_size();
    bytes
        .par_chunks_exact(size)
        .map(|b| match dtype {
            DataType::UInt8 => f32::from(b[0]),
            DataType::Int8 => f32::from(b[0] as i8),
            DataType::Int16 => f32::from(E::read_i16(b)),
            DataType::UInt16 => f32::from(E::read_u16(b)),
            DataType::Int32 => E::read_i32(b) as f32,
            DataType::UInt32 => E::read_u32(b) as f32,
            DataType::Int64 => E::read_i64(b) as f32,
            DataType::UInt64 => E::read_u64(b) as f32,
            DataType::Float16 => f16::from_bits(E::read_u16(b)).to_f32(),
            DataType::BFloat16 => bf16::from_bits(E::read_u16(b)).to_f32(),
            DataType::Float32 => E::read_f32(b),
            DataType::Float64 => E::read_f64(b) as f32,
        })
        .collect()
}

// Float-to-int `as` casts saturate, and NaN becomes 0.
fn encode_element(dst: &mut [u8], dtype: DataType, raw: f64) {
    type L = LittleEndian;
    match dtype {
        DataType::UInt8 => dst[0] = raw.round() as u8,
        DataType::Int8 => dst[0] = (raw.round() as i8) as u8,
        DataType::Int16 => L::write_i16(dst, raw.round() as i16),
        DataType::UInt16 => L::write_u16(dst, raw.round() as u16),
        DataType::Int32 => L::write_i32(dst, raw.round() as i32),
        DataType::UInt32 => L::write_u32(dst, raw.round() as u32),
        DataType::Int64 => L::write_i64(dst, raw.round() as i64),
        DataType::UInt64 => L::write_u64(dst, raw.round() as u64),
        DataType::Float16 => L::write_u16(dst, f16::from_f64(raw).to_bits()),
        DataType::BFloat16 => L::write_u16(dst, bf16::from_f64(raw).to_bits()),
        DataType::Float32 => L::write_f32(dst, raw as f32),
        DataType::Float64 => L::write_f64(dst, raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    const IDENTITY: [[f32; 4]; 4] = [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ];

    fn ramp(shape: &[usize]) -> ArrayD<f32> {
        let n: usize = shape.iter().product();
        Array::from_shape_vec(IxDyn(shape).f(), (0..n).map(|i| i as f32).collect()).unwrap()
    }

    #[test]
    fn test_from_array_sets_header() {
        let img = NiftiImage::from_array(ramp(&[4, 5, 6, 3]), IDENTITY);
        assert_eq!(img.header().shape(), vec![4, 5, 6, 3]);
        assert_eq!(img.spatial_shape(), [4, 5, 6]);
        assert_eq!(img.n_timepoints(), 3);
        assert_eq!(img.dtype(), DataType::Float32);
    }

    #[test]
    fn test_from_parts_rejects_shape_disagreement() {
        let img = NiftiImage::from_array(ramp(&[2, 2, 2]), IDENTITY);
        let result = NiftiImage::from_parts(img.header().clone(), ramp(&[2, 2, 3]));
        assert!(matches!(result, Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_with_data_keeps_affine_and_drops_time() {
        let mut affine = IDENTITY;
        affine[0][3] = -90.0;
        let bold = NiftiImage::from_array(ramp(&[3, 3, 3, 10]), affine);

        let mean = bold.with_data(ArrayD::zeros(IxDyn(&[3, 3, 3]).f())).unwrap();
        assert_eq!(mean.ndim(), 3);
        assert_eq!(mean.n_timepoints(), 1);
        assert_eq!(mean.affine(), affine);

        let wrong = bold.with_data(ArrayD::zeros(IxDyn(&[3, 3, 4])));
        assert!(matches!(wrong, Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_volume_access() {
        let bold = NiftiImage::from_array(ramp(&[2, 2, 2, 3]), IDENTITY);
        let second = bold.volume(1).unwrap();
        assert_eq!(second.shape(), &[2, 2, 2]);
        assert_eq!(second[[0, 0, 0]], 8.0);
        assert!(bold.volume(3).is_err());
    }

    #[test]
    fn test_int16_scaled_roundtrip_through_bytes() {
        let values = ArrayD::from_shape_vec(IxDyn(&[2, 2, 1]).f(), vec![0.0, 0.5, 1.0, 1.5])
            .unwrap();
        let mut header = NiftiImage::from_array(values, IDENTITY).header().clone();
        header.datatype = DataType::Int16;
        header.scl_slope = 0.5;
        header.scl_inter = 0.0;

        let source = NiftiImage::from_parts(
            header.clone(),
            ArrayD::from_shape_vec(IxDyn(&[2, 2, 1]).f(), vec![0.0, 0.5, 1.0, 1.5]).unwrap(),
        )
        .unwrap();
        let bytes = source.data_to_bytes().unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(LittleEndian::read_i16(&bytes[6..8]), 3);

        let decoded = NiftiImage::decode(header, &bytes).unwrap();
        assert_eq!(
            decoded.data().as_slice_memory_order().unwrap(),
            &[0.0, 0.5, 1.0, 1.5]
        );
    }

    #[test]
    fn test_c_order_data_written_in_f_order() {
        let c_order = Array::from_shape_vec(IxDyn(&[2, 3, 1]), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0])
            .unwrap();
        let img = NiftiImage::from_array(c_order, IDENTITY);
        let bytes = img.data_to_bytes().unwrap();
        let first_column: Vec<f32> = bytes
            .chunks_exact(4)
            .take(2)
            .map(LittleEndian::read_f32)
            .collect();
        // x varies fastest on disk: (0,0,0) then (1,0,0).
        assert_eq!(first_column, vec![0.0, 3.0]);
    }

    #[test]
    fn test_truncated_data_rejected() {
        let img = NiftiImage::from_array(ramp(&[2, 2, 2]), IDENTITY);
        let bytes = img.data_to_bytes().unwrap();
        let result = NiftiImage::decode(img.header().clone(), &bytes[..16]);
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
