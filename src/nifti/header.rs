//! `NIfTI` header parsing and representation.
//!
//! NIfTI-1 (348 bytes) and NIfTI-2 (540 bytes) share the same logical fields
//! and differ only in offsets and field widths, so both are described by a
//! [`Layout`] table and read/written by the same code. Version and byte order
//! are detected from `sizeof_hdr`; headers are always written little endian.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::marker::PhantomData;

/// NIfTI format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NiftiVersion {
    /// 348-byte header, 16-bit dimensions, 32-bit floats.
    #[default]
    Nifti1,
    /// 540-byte header, 64-bit dimensions, 64-bit floats.
    Nifti2,
}

impl NiftiVersion {
    /// Header size in bytes.
    pub const fn header_size(self) -> usize {
        match self {
            Self::Nifti1 => 348,
            Self::Nifti2 => 540,
        }
    }

    /// Offset of voxel data when there are no extensions (header + 4-byte
    /// extension flag).
    pub const fn default_vox_offset(self) -> i64 {
        match self {
            Self::Nifti1 => 352,
            Self::Nifti2 => 544,
        }
    }

    const fn layout(self) -> &'static Layout {
        match self {
            Self::Nifti1 => &LAYOUT_V1,
            Self::Nifti2 => &LAYOUT_V2,
        }
    }
}

/// Byte offsets of the header fields for one version.
///
/// `quatern`, `qoffset` and `srow` point at the first of several consecutive
/// values.
struct Layout {
    magic: &'static [&'static [u8]],
    datatype: usize,
    bitpix: usize,
    dim: usize,
    intent_code: usize,
    pixdim: usize,
    vox_offset: usize,
    scl_slope: usize,
    scl_inter: usize,
    xyzt_units: usize,
    descrip: usize,
    aux_file: usize,
    qform_code: usize,
    sform_code: usize,
    quatern: usize,
    qoffset: usize,
    srow: usize,
    magic_at: usize,
}

const LAYOUT_V1: Layout = Layout {
    magic: &[b"n+1\0", b"ni1\0"],
    datatype: 70,
    bitpix: 72,
    dim: 40,
    intent_code: 68,
    pixdim: 76,
    vox_offset: 108,
    scl_slope: 112,
    scl_inter: 116,
    xyzt_units: 123,
    descrip: 148,
    aux_file: 228,
    qform_code: 252,
    sform_code: 254,
    quatern: 256,
    qoffset: 268,
    srow: 280,
    magic_at: 344,
};

const LAYOUT_V2: Layout = Layout {
    magic: &[b"n+2\0\r\n\x1a\n", b"ni2\0\r\n\x1a\n"],
    datatype: 12,
    bitpix: 14,
    dim: 16,
    intent_code: 504,
    pixdim: 104,
    vox_offset: 168,
    scl_slope: 176,
    scl_inter: 184,
    xyzt_units: 500,
    descrip: 240,
    aux_file: 320,
    qform_code: 344,
    sform_code: 348,
    quatern: 352,
    qoffset: 376,
    srow: 400,
    magic_at: 4,
};

const DESCRIP_LEN: usize = 80;
const AUX_FILE_LEN: usize = 24;

/// `NIfTI` data type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum DataType {
    /// Unsigned 8-bit integer
    UInt8 = 2,
    /// Signed 16-bit integer
    Int16 = 4,
    /// Signed 32-bit integer
    Int32 = 8,
    /// 32-bit floating point
    Float32 = 16,
    /// 64-bit floating point
    Float64 = 64,
    /// Signed 8-bit integer
    Int8 = 256,
    /// Unsigned 16-bit integer
    UInt16 = 512,
    /// Unsigned 32-bit integer
    UInt32 = 768,
    /// Signed 64-bit integer
    Int64 = 1024,
    /// Unsigned 64-bit integer
    UInt64 = 1280,
    /// IEEE 754 half precision
    Float16 = 16384,
    /// bfloat16
    BFloat16 = 16385,
}

impl DataType {
    /// Parse from a `NIfTI` datatype code.
    pub fn from_code(code: i16) -> Result<Self> {
        Ok(match code {
            2 => Self::UInt8,
            4 => Self::Int16,
            8 => Self::Int32,
            16 => Self::Float32,
            64 => Self::Float64,
            256 => Self::Int8,
            512 => Self::UInt16,
            768 => Self::UInt32,
            1024 => Self::Int64,
            1280 => Self::UInt64,
            16384 => Self::Float16,
            16385 => Self::BFloat16,
            _ => return Err(Error::UnsupportedDataType(code)),
        })
    }

    /// Size of one element in bytes.
    pub const fn byte_size(self) -> usize {
        match self {
            Self::UInt8 | Self::Int8 => 1,
            Self::Int16 | Self::UInt16 | Self::Float16 | Self::BFloat16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    /// Rust type name, used in messages.
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::UInt8 => "u8",
            Self::Int8 => "i8",
            Self::Int16 => "i16",
            Self::UInt16 => "u16",
            Self::Int32 => "i32",
            Self::UInt32 => "u32",
            Self::Int64 => "i64",
            Self::UInt64 => "u64",
            Self::Float16 => "f16",
            Self::BFloat16 => "bf16",
            Self::Float32 => "f32",
            Self::Float64 => "f64",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Spatial units for voxel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpatialUnits {
    #[default]
    /// Unspecified.
    Unknown,
    /// Meters.
    Meter,
    /// Millimeters.
    Millimeter,
    /// Micrometers.
    Micrometer,
}

impl SpatialUnits {
    fn from_code(code: u8) -> Self {
        match code & 0x07 {
            1 => Self::Meter,
            2 => Self::Millimeter,
            3 => Self::Micrometer,
            _ => Self::Unknown,
        }
    }

    fn to_code(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Meter => 1,
            Self::Millimeter => 2,
            Self::Micrometer => 3,
        }
    }
}

/// Temporal units for the fourth dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemporalUnits {
    #[default]
    /// Unspecified.
    Unknown,
    /// Seconds.
    Second,
    /// Milliseconds.
    Millisecond,
    /// Microseconds.
    Microsecond,
}

impl TemporalUnits {
    fn from_code(code: u8) -> Self {
        match code & 0x38 {
            0x08 => Self::Second,
            0x10 => Self::Millisecond,
            0x18 => Self::Microsecond,
            _ => Self::Unknown,
        }
    }

    fn to_code(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Second => 0x08,
            Self::Millisecond => 0x10,
            Self::Microsecond => 0x18,
        }
    }
}

/// Header of a NIfTI-1 or NIfTI-2 file.
///
/// Stored at NIfTI-2 width (64-bit dimensions, f64 values) regardless of the
/// version it was read from.
#[derive(Debug, Clone)]
pub struct NiftiHeader {
    /// Format version, also used when writing.
    pub version: NiftiVersion,
    /// Number of dimensions (1-7).
    pub ndim: u8,
    /// Size along each dimension.
    pub dim: [i64; 7],
    /// On-disk element type.
    pub datatype: DataType,
    /// qfac at index 0, voxel sizes at 1..=ndim.
    pub pixdim: [f64; 8],
    /// Byte offset of the voxel data.
    pub vox_offset: i64,
    /// Data scaling slope (0 means no scaling).
    pub scl_slope: f64,
    /// Data scaling intercept.
    pub scl_inter: f64,
    /// Spatial units.
    pub spatial_units: SpatialUnits,
    /// Temporal units.
    pub temporal_units: TemporalUnits,
    /// Intent code.
    pub intent_code: i32,
    /// Free-text description (at most 79 bytes are written).
    pub descrip: String,
    /// Auxiliary file name (at most 23 bytes are written).
    pub aux_file: String,
    /// qform transform code.
    pub qform_code: i32,
    /// sform transform code.
    pub sform_code: i32,
    /// Quaternion b, c, d.
    pub quatern: [f64; 3],
    /// qform translation.
    pub qoffset: [f64; 3],
    /// sform rows.
    pub srow_x: [f64; 4],
    /// sform rows.
    pub srow_y: [f64; 4],
    /// sform rows.
    pub srow_z: [f64; 4],
    pub(crate) little_endian: bool,
}

impl Default for NiftiHeader {
    fn default() -> Self {
        Self {
            version: NiftiVersion::Nifti1,
            ndim: 3,
            dim: [1, 1, 1, 1, 1, 1, 1],
            datatype: DataType::Float32,
            pixdim: [1.0; 8],
            vox_offset: 352,
            scl_slope: 1.0,
            scl_inter: 0.0,
            spatial_units: SpatialUnits::Millimeter,
            temporal_units: TemporalUnits::Unknown,
            intent_code: 0,
            descrip: String::new(),
            aux_file: String::new(),
            qform_code: 0,
            sform_code: 1,
            quatern: [0.0; 3],
            qoffset: [0.0; 3],
            srow_x: [1.0, 0.0, 0.0, 0.0],
            srow_y: [0.0, 1.0, 0.0, 0.0],
            srow_z: [0.0, 0.0, 1.0, 0.0],
            little_endian: true,
        }
    }
}

/// Typed reads at fixed offsets, at NIfTI-1 or NIfTI-2 width.
struct Fields<'a, E> {
    bytes: &'a [u8],
    wide: bool,
    order: PhantomData<E>,
}

impl<'a, E: ByteOrder> Fields<'a, E> {
    fn new(bytes: &'a [u8], version: NiftiVersion) -> Self {
        Self {
            bytes,
            wide: version == NiftiVersion::Nifti2,
            order: PhantomData,
        }
    }

    fn i16(&self, at: usize) -> i16 {
        E::read_i16(&self.bytes[at..at + 2])
    }

    /// `dim` entries: i16 in NIfTI-1, i64 in NIfTI-2.
    fn dim(&self, at: usize) -> i64 {
        if self.wide {
            E::read_i64(&self.bytes[at..at + 8])
        } else {
            i64::from(self.i16(at))
        }
    }

    fn dim_width(&self) -> usize {
        if self.wide {
            8
        } else {
            2
        }
    }

    /// Codes (intent, qform, sform): i16 in NIfTI-1, i32 in NIfTI-2.
    fn code(&self, at: usize) -> i32 {
        if self.wide {
            E::read_i32(&self.bytes[at..at + 4])
        } else {
            i32::from(self.i16(at))
        }
    }

    fn float(&self, at: usize) -> f64 {
        if self.wide {
            E::read_f64(&self.bytes[at..at + 8])
        } else {
            f64::from(E::read_f32(&self.bytes[at..at + 4]))
        }
    }

    fn floats<const N: usize>(&self, at: usize) -> [f64; N] {
        let width = if self.wide { 8 } else { 4 };
        std::array::from_fn(|i| self.float(at + i * width))
    }

    fn text(&self, at: usize, len: usize) -> String {
        String::from_utf8_lossy(&self.bytes[at..at + len])
            .trim_end_matches('\0')
            .to_string()
    }
}

/// Little-endian writes mirroring [`Fields`].
struct FieldsMut {
    buf: Vec<u8>,
    wide: bool,
}

impl FieldsMut {
    fn new(version: NiftiVersion) -> Self {
        Self {
            buf: vec![0u8; version.header_size()],
            wide: version == NiftiVersion::Nifti2,
        }
    }

    fn i16(&mut self, at: usize, v: i16) {
        LittleEndian::write_i16(&mut self.buf[at..at + 2], v);
    }

    fn dim(&mut self, at: usize, v: i64) {
        if self.wide {
            LittleEndian::write_i64(&mut self.buf[at..at + 8], v);
        } else {
            self.i16(at, v.clamp(0, i64::from(i16::MAX)) as i16);
        }
    }

    fn code(&mut self, at: usize, v: i32) {
        if self.wide {
            LittleEndian::write_i32(&mut self.buf[at..at + 4], v);
        } else {
            self.i16(at, v as i16);
        }
    }

    fn float(&mut self, at: usize, v: f64) {
        if self.wide {
            LittleEndian::write_f64(&mut self.buf[at..at + 8], v);
        } else {
            LittleEndian::write_f32(&mut self.buf[at..at + 4], v as f32);
        }
    }

    fn floats(&mut self, at: usize, values: &[f64]) {
        let width = if self.wide { 8 } else { 4 };
        for (i, &v) in values.iter().enumerate() {
            self.float(at + i * width, v);
        }
    }

    fn text(&mut self, at: usize, len: usize, s: &str) {
        let bytes = s.as_bytes();
        let n = bytes.len().min(len - 1);
        self.buf[at..at + n].copy_from_slice(&bytes[..n]);
    }
}

impl NiftiHeader {
    /// Size of a NIfTI-1 header.
    pub const SIZE: usize = 348;

    /// Size of a NIfTI-2 header.
    pub const SIZE_V2: usize = 540;

    /// Header size for this header's version.
    pub fn header_size(&self) -> usize {
        self.version.header_size()
    }

    /// Parse a header, detecting version and byte order.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "header too short to detect version",
            )));
        }

        let le = LittleEndian::read_i32(&bytes[0..4]);
        let be = BigEndian::read_i32(&bytes[0..4]);
        let (version, little_endian) = match (le, be) {
            (348, _) => (NiftiVersion::Nifti1, true),
            (_, 348) => (NiftiVersion::Nifti1, false),
            (540, _) => (NiftiVersion::Nifti2, true),
            (_, 540) => (NiftiVersion::Nifti2, false),
            _ => {
                return Err(Error::InvalidMagic([
                    bytes[0], bytes[1], bytes[2], bytes[3],
                ]))
            }
        };

        if bytes.len() < version.header_size() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "header too short: got {} bytes, need {} for {:?}",
                    bytes.len(),
                    version.header_size(),
                    version
                ),
            )));
        }

        if little_endian {
            Self::parse::<LittleEndian>(bytes, version)
        } else {
            Self::parse::<BigEndian>(bytes, version)
        }
    }

    fn parse<E: ByteOrder>(bytes: &[u8], version: NiftiVersion) -> Result<Self> {
        let layout = version.layout();
        let f = Fields::<E>::new(bytes, version);

        let magic_len = layout.magic[0].len();
        let magic = &bytes[layout.magic_at..layout.magic_at + magic_len];
        if !layout.magic.iter().any(|m| *m == magic) {
            return Err(Error::InvalidMagic([
                magic[0], magic[1], magic[2], magic[3],
            ]));
        }

        let ndim_raw = f.dim(layout.dim);
        if !(1..=7).contains(&ndim_raw) {
            return Err(Error::InvalidDimensions(format!(
                "ndim must be 1..=7, got {}",
                ndim_raw
            )));
        }

        let mut dim = [0i64; 7];
        for (i, d) in dim.iter_mut().enumerate() {
            *d = f.dim(layout.dim + (i + 1) * f.dim_width());
            if *d < 0 {
                return Err(Error::InvalidDimensions(format!(
                    "dimension {} has negative value: {}",
                    i, d
                )));
            }
        }

        let datatype = DataType::from_code(f.i16(layout.datatype))?;
        let bitpix = f.i16(layout.bitpix);
        let expected_bitpix = (datatype.byte_size() * 8) as i16;
        if bitpix != expected_bitpix {
            return Err(Error::InvalidDimensions(format!(
                "bitpix {} does not match datatype {} (expected {})",
                bitpix, datatype, expected_bitpix
            )));
        }

        let vox_offset = if f.wide {
            E::read_i64(&bytes[layout.vox_offset..layout.vox_offset + 8])
        } else {
            let raw = f.float(layout.vox_offset);
            if !raw.is_finite() || raw.fract() != 0.0 {
                return Err(Error::InvalidDimensions(format!(
                    "vox_offset must be a finite integer, got {}",
                    raw
                )));
            }
            raw as i64
        };

        let xyzt_units = if f.wide {
            E::read_i32(&bytes[layout.xyzt_units..layout.xyzt_units + 4]) as u8
        } else {
            bytes[layout.xyzt_units]
        };

        let [sx0, sx1, sx2, sx3, sy0, sy1, sy2, sy3, sz0, sz1, sz2, sz3] =
            f.floats::<12>(layout.srow);

        let header = Self {
            version,
            ndim: ndim_raw as u8,
            dim,
            datatype,
            pixdim: f.floats::<8>(layout.pixdim),
            vox_offset,
            scl_slope: f.float(layout.scl_slope),
            scl_inter: f.float(layout.scl_inter),
            spatial_units: SpatialUnits::from_code(xyzt_units),
            temporal_units: TemporalUnits::from_code(xyzt_units),
            intent_code: f.code(layout.intent_code),
            descrip: f.text(layout.descrip, DESCRIP_LEN),
            aux_file: f.text(layout.aux_file, AUX_FILE_LEN),
            qform_code: f.code(layout.qform_code),
            sform_code: f.code(layout.sform_code),
            quatern: f.floats::<3>(layout.quatern),
            qoffset: f.floats::<3>(layout.qoffset),
            srow_x: [sx0, sx1, sx2, sx3],
            srow_y: [sy0, sy1, sy2, sy3],
            srow_z: [sz0, sz1, sz2, sz3],
            little_endian: E::read_u16(&[1, 0]) == 1,
        };

        header.validate()?;
        Ok(header)
    }

    /// Serialize (little endian) in this header's version.
    pub fn to_bytes(&self) -> Vec<u8> {
        let layout = self.version.layout();
        let mut w = FieldsMut::new(self.version);

        LittleEndian::write_i32(&mut w.buf[0..4], self.header_size() as i32);
        let magic = layout.magic[0];
        w.buf[layout.magic_at..layout.magic_at + magic.len()].copy_from_slice(magic);

        let dim_width = if w.wide { 8 } else { 2 };
        w.dim(layout.dim, i64::from(self.ndim));
        for (i, &d) in self.dim.iter().enumerate() {
            w.dim(layout.dim + (i + 1) * dim_width, d);
        }

        w.i16(layout.datatype, self.datatype as i16);
        w.i16(layout.bitpix, (self.datatype.byte_size() * 8) as i16);
        w.floats(layout.pixdim, &self.pixdim);

        if w.wide {
            LittleEndian::write_i64(
                &mut w.buf[layout.vox_offset..layout.vox_offset + 8],
                self.vox_offset,
            );
        } else {
            w.float(layout.vox_offset, self.vox_offset as f64);
        }

        w.float(layout.scl_slope, self.scl_slope);
        w.float(layout.scl_inter, self.scl_inter);

        let units = self.spatial_units.to_code() | self.temporal_units.to_code();
        if w.wide {
            LittleEndian::write_i32(
                &mut w.buf[layout.xyzt_units..layout.xyzt_units + 4],
                i32::from(units),
            );
        } else {
            w.buf[layout.xyzt_units] = units;
        }

        w.code(layout.intent_code, self.intent_code);
        w.text(layout.descrip, DESCRIP_LEN, &self.descrip);
        w.text(layout.aux_file, AUX_FILE_LEN, &self.aux_file);
        w.code(layout.qform_code, self.qform_code);
        w.code(layout.sform_code, self.sform_code);
        w.floats(layout.quatern, &self.quatern);
        w.floats(layout.qoffset, &self.qoffset);

        let srow: Vec<f64> = self
            .srow_x
            .iter()
            .chain(&self.srow_y)
            .chain(&self.srow_z)
            .copied()
            .collect();
        w.floats(layout.srow, &srow);

        w.buf
    }

    /// 4x4 voxel-to-world matrix (sform, then qform, then pixdim scaling).
    pub fn affine_f64(&self) -> [[f64; 4]; 4] {
        if self.sform_code > 0 {
            [self.srow_x, self.srow_y, self.srow_z, [0.0, 0.0, 0.0, 1.0]]
        } else if self.qform_code > 0 {
            self.qform_affine()
        } else {
            [
                [self.pixdim[1], 0.0, 0.0, 0.0],
                [0.0, self.pixdim[2], 0.0, 0.0],
                [0.0, 0.0, self.pixdim[3], 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ]
        }
    }

    /// Affine at f32 precision.
    pub fn affine(&self) -> [[f32; 4]; 4] {
        self.affine_f64().map(|row| row.map(|v| v as f32))
    }

    /// Store `affine` as the sform and derive voxel sizes from its columns.
    pub fn set_affine_f64(&mut self, affine: [[f64; 4]; 4]) {
        self.srow_x = affine[0];
        self.srow_y = affine[1];
        self.srow_z = affine[2];
        self.sform_code = 1;

        for (axis, size) in column_norms(&affine).into_iter().enumerate() {
            self.pixdim[axis + 1] = size;
        }
    }

    /// f32 variant of [`Self::set_affine_f64`].
    pub fn set_affine(&mut self, affine: [[f32; 4]; 4]) {
        self.set_affine_f64(affine.map(|row| row.map(f64::from)));
    }

    #[allow(clippy::many_single_char_names)]
    fn qform_affine(&self) -> [[f64; 4]; 4] {
        let [b, c, d] = self.quatern;
        let a = (1.0 - b * b - c * c - d * d).max(0.0).sqrt();

        let qfac = if self.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let [i, j, k] = [self.pixdim[1].abs(), self.pixdim[2], self.pixdim[3] * qfac];

        [
            [
                (a * a + b * b - c * c - d * d) * i,
                2.0 * (b * c - a * d) * j,
                2.0 * (b * d + a * c) * k,
                self.qoffset[0],
            ],
            [
                2.0 * (b * c + a * d) * i,
                (a * a - b * b + c * c - d * d) * j,
                2.0 * (c * d - a * b) * k,
                self.qoffset[1],
            ],
            [
                2.0 * (b * d - a * c) * i,
                2.0 * (c * d + a * b) * j,
                (a * a - b * b - c * c + d * d) * k,
                self.qoffset[2],
            ],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }

    /// Voxel size along the three spatial axes, from the affine columns.
    ///
    /// This is what smoothing uses, so it stays correct for oblique
    /// acquisitions where pixdim and the sform disagree.
    pub fn voxel_size(&self) -> [f64; 3] {
        column_norms(&self.affine_f64())
    }

    /// Image shape (`ndim` entries).
    pub fn shape(&self) -> Vec<usize> {
        self.dim[..self.ndim as usize]
            .iter()
            .map(|&d| d as usize)
            .collect()
    }

    /// Replace dimensions with `shape` (at most 7 entries).
    pub fn set_shape(&mut self, shape: &[usize]) -> Result<()> {
        if shape.is_empty() || shape.len() > 7 {
            return Err(Error::InvalidDimensions(format!(
                "ndim must be 1..=7, got {}",
                shape.len()
            )));
        }
        self.ndim = shape.len() as u8;
        self.dim = [1; 7];
        for (d, &s) in self.dim.iter_mut().zip(shape) {
            *d = s as i64;
        }
        Ok(())
    }

    /// First three dimensions, padding missing ones with 1.
    pub fn spatial_shape(&self) -> [usize; 3] {
        let n = self.ndim as usize;
        std::array::from_fn(|i| if i < n { self.dim[i] as usize } else { 1 })
    }

    /// Length of the time axis (1 for 3-D images).
    pub fn n_timepoints(&self) -> usize {
        if self.ndim >= 4 {
            self.dim[3] as usize
        } else {
            1
        }
    }

    /// Voxel spacing, `ndim` entries.
    pub fn spacing(&self) -> Vec<f32> {
        let end = (self.ndim as usize + 1).min(self.pixdim.len());
        self.pixdim[1..end].iter().map(|&p| p as f32).collect()
    }

    /// Total number of elements.
    pub fn num_voxels(&self) -> usize {
        self.dim[..self.ndim as usize]
            .iter()
            .map(|&d| d as usize)
            .product()
    }

    /// Total data size in bytes.
    pub fn data_size(&self) -> usize {
        self.num_voxels() * self.datatype.byte_size()
    }

    /// True when the file was little endian.
    pub fn is_little_endian(&self) -> bool {
        self.little_endian
    }

    /// Any dimension beyond what NIfTI-1 can store.
    pub fn requires_nifti2(&self) -> bool {
        self.dim.iter().any(|&d| d > i64::from(i16::MAX))
    }

    /// Same spatial shape and affine, within a small tolerance.
    pub fn same_geometry(&self, other: &Self) -> bool {
        if self.spatial_shape() != other.spatial_shape() {
            return false;
        }
        let a = self.affine_f64();
        let b = other.affine_f64();
        a.iter().flatten().zip(b.iter().flatten()).all(|(&x, &y)| {
            (x - y).abs() <= AFFINE_TOLERANCE * x.abs().max(1.0)
        })
    }

    /// Check basic NIfTI invariants.
    pub fn validate(&self) -> Result<()> {
        if self.ndim == 0 || self.ndim > 7 {
            return Err(Error::InvalidDimensions(format!(
                "ndim must be 1..=7, got {}",
                self.ndim
            )));
        }

        for i in 0..self.ndim as usize {
            if self.dim[i] == 0 {
                return Err(Error::InvalidDimensions(format!("dimension {} is zero", i)));
            }
            // Spatial spacing must be usable; time/extra axes may be zero.
            let spacing = self.pixdim[i + 1];
            if i < 3 && (!spacing.is_finite() || spacing <= 0.0) {
                return Err(Error::InvalidDimensions(format!(
                    "pixdim[{}] must be finite and > 0, got {}",
                    i + 1,
                    spacing
                )));
            }
        }

        let min_offset = self.version.header_size() as i64;
        if self.vox_offset < min_offset {
            return Err(Error::InvalidDimensions(format!(
                "vox_offset {} before header end ({})",
                self.vox_offset, min_offset
            )));
        }

        self.dim[..self.ndim as usize]
            .iter()
            .try_fold(self.datatype.byte_size(), |acc, &d| {
                acc.checked_mul(d as usize)
            })
            .ok_or_else(|| Error::InvalidDimensions("data size overflow".into()))?;

        Ok(())
    }
}

const AFFINE_TOLERANCE: f64 = 1e-4;

fn column_norms(affine: &[[f64; 4]; 4]) -> [f64; 3] {
    std::array::from_fn(|col| {
        (0..3)
            .map(|row| affine[row][col] * affine[row][col])
            .sum::<f64>()
            .sqrt()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bold_header() -> NiftiHeader {
        let mut header = NiftiHeader::default();
        header.set_shape(&[97, 115, 97, 240]).unwrap();
        header.pixdim = [1.0, 2.0, 2.0, 2.0, 1.5, 0.0, 0.0, 0.0];
        header.temporal_units = TemporalUnits::Second;
        header.set_affine_f64([
            [2.0, 0.0, 0.0, -96.0],
            [0.0, 2.0, 0.0, -132.0],
            [0.0, 0.0, 2.0, -78.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        header.descrip = "fmriprep bold".to_string();
        header
    }

    #[test]
    fn test_units_codes() {
        assert_eq!(TemporalUnits::from_code(0x0A), TemporalUnits::Second);
        assert_eq!(TemporalUnits::from_code(0x12), TemporalUnits::Millisecond);
        assert_eq!(SpatialUnits::from_code(0x0A), SpatialUnits::Millimeter);
        assert_eq!(
            SpatialUnits::Millimeter.to_code() | TemporalUnits::Second.to_code(),
            0x0A
        );
    }

    #[test]
    fn test_nifti1_roundtrip_keeps_geometry() {
        let header = bold_header();
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), 348);
        assert_eq!(&bytes[344..348], b"n+1\0");

        let parsed = NiftiHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.version, NiftiVersion::Nifti1);
        assert_eq!(parsed.shape(), vec![97, 115, 97, 240]);
        assert_eq!(parsed.n_timepoints(), 240);
        assert_eq!(parsed.spatial_shape(), [97, 115, 97]);
        assert_eq!(parsed.temporal_units, TemporalUnits::Second);
        assert_eq!(parsed.descrip, "fmriprep bold");
        assert_eq!(parsed.affine_f64(), header.affine_f64());
        assert!(parsed.same_geometry(&header));
    }

    #[test]
    fn test_nifti2_roundtrip() {
        let mut header = NiftiHeader::default();
        header.version = NiftiVersion::Nifti2;
        header.set_shape(&[100_000, 100_000, 100]).unwrap();
        header.vox_offset = 544;
        assert!(header.requires_nifti2());

        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), 540);

        let parsed = NiftiHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.version, NiftiVersion::Nifti2);
        assert_eq!(parsed.dim[0], 100_000);
        assert_eq!(parsed.dim[2], 100);
    }

    #[test]
    fn test_big_endian_nifti1() {
        let mut bytes = vec![0u8; 348];
        BigEndian::write_i32(&mut bytes[0..4], 348);
        bytes[344..348].copy_from_slice(b"n+1\0");
        BigEndian::write_i16(&mut bytes[40..42], 3);
        for i in 0..3 {
            BigEndian::write_i16(&mut bytes[42 + 2 * i..44 + 2 * i], 4);
            BigEndian::write_f32(&mut bytes[80 + 4 * i..84 + 4 * i], 3.0);
        }
        BigEndian::write_i16(&mut bytes[70..72], 4);
        BigEndian::write_i16(&mut bytes[72..74], 16);
        BigEndian::write_f32(&mut bytes[108..112], 352.0);

        let header = NiftiHeader::from_bytes(&bytes).unwrap();
        assert!(!header.is_little_endian());
        assert_eq!(header.datatype, DataType::Int16);
        assert_eq!(header.shape(), vec![4, 4, 4]);
        assert_eq!(header.voxel_size(), [3.0, 3.0, 3.0]);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = bold_header().to_bytes();
        bytes[344..348].copy_from_slice(b"BAD!");
        assert!(matches!(
            NiftiHeader::from_bytes(&bytes),
            Err(Error::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_bitpix_mismatch_rejected() {
        let mut bytes = bold_header().to_bytes();
        LittleEndian::write_i16(&mut bytes[72..74], 8);
        assert!(matches!(
            NiftiHeader::from_bytes(&bytes),
            Err(Error::InvalidDimensions(_))
        ));
    }

    #[test]
    fn test_zero_time_spacing_is_valid() {
        let mut header = bold_header();
        header.pixdim[4] = 0.0;
        assert!(header.validate().is_ok());

        header.pixdim[2] = 0.0;
        assert!(header.validate().is_err());
    }

    #[test]
    fn test_qform_fallback() {
        let mut header = NiftiHeader::default();
        header.sform_code = 0;
        header.qform_code = 1;
        header.pixdim = [1.0, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 0.0];
        header.qoffset = [10.0, 20.0, 30.0];

        let affine = header.affine_f64();
        assert_eq!(affine[0], [2.0, 0.0, 0.0, 10.0]);
        assert_eq!(affine[1], [0.0, 3.0, 0.0, 20.0]);
        assert_eq!(affine[2], [0.0, 0.0, 4.0, 30.0]);
    }

    #[test]
    fn test_geometry_differs_on_shift() {
        let a = bold_header();
        let mut b = bold_header();
        b.srow_x[3] += 2.0;
        assert!(!a.same_geometry(&b));

        let mut c = bold_header();
        c.set_shape(&[97, 115, 96, 240]).unwrap();
        assert!(!a.same_geometry(&c));
    }
}
