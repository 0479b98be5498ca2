//! The in-memory model of a MODFLOW array: values, shape, and the storage metadata
//! needed to write it back the way it was read.
//!
//! Storage metadata lives on each [`Layer`]: a layered (rank 3) array has one control
//! record per layer in the file and each layer may use a different storage mode.
//! The logical value of every cell is always `raw * multiplier`; a CONSTANT layer holds
//! no raw values at all, just the scalar.
use std::fmt::{Debug, Display};
use std::io::{Read, Write};
use std::ops::Mul;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ndarray::{Array2, Array3, Axis};
use tracing::debug;

use crate::binary::{self, BinaryHeader, Precision};
use crate::codec_error::{AError, AResult};
use crate::format_specs::{ArrayFormat, FortValue, NumericFormat};
use crate::fort_error::{FError, FResult};
use crate::{parsing, ser};

/// A value type that can be stored in a [`NumArray`]. Implemented for `i32` and `f64`.
pub trait ArrayValue: Copy + PartialEq + Debug + Default + Mul<Output = Self> + Send + Sync + 'static {
    /// Name of the type in messages
    const DTYPE: &'static str;

    /// The multiplicative identity, the default multiplier
    fn one() -> Self;

    /// Convert a value parsed from a numeric field; `text` is the source for error messages.
    fn from_fort(value: FortValue, text: &str) -> FResult<Self>;

    fn to_fort(self) -> FortValue;

    /// The `CNSTNT` column of a fixed-format control record
    fn header_field() -> NumericFormat;

    /// The field used to write arrays that carry no format of their own
    fn default_field(real_format: NumericFormat, int_width: u32) -> NumericFormat;

    fn parse_free(tok: &str) -> FResult<Self>;

    fn write_free(self) -> String;

    /// Write the value in the 10 column `CNSTNT` field
    fn write_header_field(self) -> FResult<String>;

    fn binary_size(precision: Precision) -> usize;

    fn read_binary<R: Read>(rdr: &mut R, precision: Precision) -> std::io::Result<Self>;

    fn write_binary<W: Write>(self, wtr: &mut W, precision: Precision) -> std::io::Result<()>;

    fn as_f64(self) -> f64;

    /// `self * rhs`, or `None` if the product is out of range for the type
    fn checked_product(self, rhs: Self) -> Option<Self>;
}

impl ArrayValue for i32 {
    const DTYPE: &'static str = "int32";

    fn one() -> Self {
        1
    }

    fn from_fort(value: FortValue, text: &str) -> FResult<Self> {
        match value {
            FortValue::Integer(i) => i32::try_from(i)
                .map_err(|e| FError::parsing(text, "int32", e)),
            FortValue::Real(r) => Err(FError::parsing(text, "int32", format!("{r} is not an integer"))),
        }
    }

    fn to_fort(self) -> FortValue {
        FortValue::Integer(self as i64)
    }

    fn header_field() -> NumericFormat {
        NumericFormat::Integer { width: 10 }
    }

    fn default_field(_real_format: NumericFormat, int_width: u32) -> NumericFormat {
        NumericFormat::Integer { width: int_width }
    }

    fn parse_free(tok: &str) -> FResult<Self> {
        let v = parsing::parse_any_integer(tok)?;
        Self::from_fort(FortValue::Integer(v), tok)
    }

    fn write_free(self) -> String {
        ser::serialize_integer_free(self as i64)
    }

    fn write_header_field(self) -> FResult<String> {
        ser::serialize_integer(10, self as i64)
    }

    fn binary_size(_precision: Precision) -> usize {
        4
    }

    fn read_binary<R: Read>(rdr: &mut R, _precision: Precision) -> std::io::Result<Self> {
        binary::read_i32(rdr)
    }

    fn write_binary<W: Write>(self, wtr: &mut W, _precision: Precision) -> std::io::Result<()> {
        binary::write_i32(wtr, self)
    }

    fn as_f64(self) -> f64 {
        self as f64
    }

    fn checked_product(self, rhs: Self) -> Option<Self> {
        self.checked_mul(rhs)
    }
}

impl ArrayValue for f64 {
    const DTYPE: &'static str = "float64";

    fn one() -> Self {
        1.0
    }

    fn from_fort(value: FortValue, _text: &str) -> FResult<Self> {
        match value {
            FortValue::Integer(i) => Ok(i as f64),
            FortValue::Real(r) => Ok(r),
        }
    }

    fn to_fort(self) -> FortValue {
        FortValue::Real(self)
    }

    fn header_field() -> NumericFormat {
        NumericFormat::Real { width: 10, precision: 0, fmt: crate::format_specs::RealFmt::F, scale: 0 }
    }

    fn default_field(real_format: NumericFormat, _int_width: u32) -> NumericFormat {
        real_format
    }

    fn parse_free(tok: &str) -> FResult<Self> {
        parsing::parse_any_real(tok)
    }

    fn write_free(self) -> String {
        ser::serialize_real_free(self)
    }

    fn write_header_field(self) -> FResult<String> {
        // An F10.0 field accepts any real text, so take the first exact form that fits.
        // Each candidate is a shortest round-trip form; rounding to fit is never done.
        let free = ser::serialize_real_free(self);
        let no_lead_zero = if let Some(rest) = free.strip_prefix("0.") {
            format!(".{rest}")
        } else if let Some(rest) = free.strip_prefix("-0.") {
            format!("-.{rest}")
        } else {
            free.clone()
        };
        let sci = format!("{self:E}");

        [free, no_lead_zero, sci].into_iter()
            .find(|s| s.len() <= 10)
            .map(|s| format!("{s:>10}"))
            .ok_or_else(|| FError::Overflow { value: self.to_string(), field: Self::header_field() })
    }

    fn binary_size(precision: Precision) -> usize {
        precision.real_size()
    }

    fn read_binary<R: Read>(rdr: &mut R, precision: Precision) -> std::io::Result<Self> {
        binary::read_real(rdr, precision)
    }

    fn write_binary<W: Write>(self, wtr: &mut W, precision: Precision) -> std::io::Result<()> {
        binary::write_real(wtr, self, precision)
    }

    fn as_f64(self) -> f64 {
        self
    }

    fn checked_product(self, rhs: Self) -> Option<Self> {
        Some(self * rhs)
    }
}

/// Where the values of one layer live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StorageMode {
    /// One scalar for the whole layer
    Constant,
    /// Values follow the control record in the same file
    Internal,
    /// Values are in the file connected to a unit number
    External,
    /// Values are in a named file that is opened and closed for this array
    OpenClose,
}

impl Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StorageMode::Constant => "CONSTANT",
            StorageMode::Internal => "INTERNAL",
            StorageMode::External => "EXTERNAL",
            StorageMode::OpenClose => "OPEN/CLOSE",
        };
        write!(f, "{s}")
    }
}

impl FromStr for StorageMode {
    type Err = AError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CONSTANT" => Ok(Self::Constant),
            "INTERNAL" => Ok(Self::Internal),
            "EXTERNAL" => Ok(Self::External),
            "OPEN/CLOSE" => Ok(Self::OpenClose),
            _ => Err(AError::UnknownStorageMode(s.to_string()))
        }
    }
}

/// The dimensions of an array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Shape {
    Grid{nrow: usize, ncol: usize},
    Layered{nlay: usize, nrow: usize, ncol: usize},
}

impl Shape {
    pub fn nlay(&self) -> usize {
        match self {
            Shape::Grid { .. } => 1,
            Shape::Layered { nlay, .. } => *nlay,
        }
    }

    pub fn nrow(&self) -> usize {
        match self {
            Shape::Grid { nrow, .. } | Shape::Layered { nrow, .. } => *nrow,
        }
    }

    pub fn ncol(&self) -> usize {
        match self {
            Shape::Grid { ncol, .. } | Shape::Layered { ncol, .. } => *ncol,
        }
    }

    /// Number of values in one layer
    pub fn layer_len(&self) -> usize {
        self.nrow() * self.ncol()
    }

    /// Total number of values
    pub fn len(&self) -> usize {
        self.nlay() * self.layer_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_layered(&self) -> bool {
        matches!(self, Shape::Layered { .. })
    }
}

/// Where a layer was read from, or will be written to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceLocator {
    pub unit: Option<i32>,
    pub path: Option<PathBuf>,
    /// Byte offset of the first value in the file
    pub offset: u64,
}

/// The values of one layer
#[derive(Debug, Clone, PartialEq)]
pub enum LayerData<T> {
    Constant(T),
    Values{raw: Array2<T>, multiplier: T},
}

/// One 2D slice of an array with its own control record metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer<T> {
    pub(crate) mode: StorageMode,
    pub(crate) data: LayerData<T>,
    pub(crate) format: Option<ArrayFormat>,
    pub(crate) iprn: i32,
    pub(crate) locator: Option<SourceLocator>,
    pub(crate) binary_header: Option<BinaryHeader>,
}

impl<T: ArrayValue> Layer<T> {
    pub fn constant(value: T) -> Self {
        Self {
            mode: StorageMode::Constant,
            data: LayerData::Constant(value),
            format: None,
            iprn: -1,
            locator: None,
            binary_header: None,
        }
    }

    /// Stored values with a multiplier. Fails if some `raw * multiplier` is out of range
    /// for the value type.
    pub fn internal(raw: Array2<T>, multiplier: T) -> AResult<Self> {
        check_products(&raw, multiplier)?;
        Ok(Self::stored(raw, multiplier))
    }

    fn stored(raw: Array2<T>, multiplier: T) -> Self {
        Self {
            mode: StorageMode::Internal,
            data: LayerData::Values { raw, multiplier },
            format: None,
            iprn: -1,
            locator: None,
            binary_header: None,
        }
    }

    /// The storage mode the layer was read with or assigned
    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    /// The storage mode the layer will be written with.
    ///
    /// This differs from [`Layer::mode`] only for a CONSTANT layer whose cells no
    /// longer all hold the same value, which is written as INTERNAL.
    pub fn effective_mode(&self) -> StorageMode {
        if self.mode == StorageMode::Constant && self.constant_value().is_none() {
            StorageMode::Internal
        } else {
            self.mode
        }
    }

    /// The multiplier, which is one for a constant layer
    pub fn multiplier(&self) -> T {
        match &self.data {
            LayerData::Constant(_) => T::one(),
            LayerData::Values { multiplier, .. } => *multiplier,
        }
    }

    /// The stored values before the multiplier is applied (`None` for a constant)
    pub fn raw(&self) -> Option<&Array2<T>> {
        match &self.data {
            LayerData::Constant(_) => None,
            LayerData::Values { raw, .. } => Some(raw),
        }
    }

    pub fn data(&self) -> &LayerData<T> {
        &self.data
    }

    /// The single value of every cell, if they are all the same
    pub fn constant_value(&self) -> Option<T> {
        match &self.data {
            LayerData::Constant(c) => Some(*c),
            LayerData::Values { raw, multiplier } => {
                let first = *raw.iter().next()?;
                if raw.iter().all(|v| *v == first) {
                    Some(first * *multiplier)
                } else {
                    None
                }
            }
        }
    }

    pub fn format(&self) -> Option<ArrayFormat> {
        self.format
    }

    pub fn is_binary(&self) -> bool {
        self.format.is_some_and(|f| f.is_binary())
    }

    pub fn iprn(&self) -> i32 {
        self.iprn
    }

    pub fn locator(&self) -> Option<&SourceLocator> {
        self.locator.as_ref()
    }

    pub fn binary_header(&self) -> Option<&BinaryHeader> {
        self.binary_header.as_ref()
    }

    /// The logical values of the layer, `raw * multiplier`
    pub fn values(&self, nrow: usize, ncol: usize) -> Array2<T> {
        match &self.data {
            LayerData::Constant(c) => Array2::from_elem((nrow, ncol), *c),
            LayerData::Values { raw, multiplier } => {
                let m = *multiplier;
                raw.mapv(|v| v * m)
            }
        }
    }

    /// Raw values and multiplier to write. With `fold` the multiplier is applied to the
    /// values and one is returned as the multiplier.
    pub(crate) fn values_to_write(&self, nrow: usize, ncol: usize, fold: bool) -> (Array2<T>, T) {
        match &self.data {
            LayerData::Constant(c) => (Array2::from_elem((nrow, ncol), *c), T::one()),
            LayerData::Values { .. } if fold => (self.values(nrow, ncol), T::one()),
            LayerData::Values { raw, multiplier } => (raw.clone(), *multiplier),
        }
    }

    /// Set one cell to a logical value.
    ///
    /// The multiplier is folded into the raw values first so that the layer still
    /// satisfies `value == raw * multiplier` afterwards. A constant layer is expanded
    /// to stored values; it keeps its CONSTANT mode until written, when
    /// [`Layer::effective_mode`] decides how it is stored.
    pub fn set(&mut self, nrow: usize, ncol: usize, i: usize, j: usize, value: T) -> bool {
        if i >= nrow || j >= ncol {
            return false
        }

        let (mut raw, multiplier) = match std::mem::replace(&mut self.data, LayerData::Constant(T::default())) {
            LayerData::Constant(c) => (Array2::from_elem((nrow, ncol), c), T::one()),
            LayerData::Values { raw, multiplier } => (raw, multiplier),
        };

        if multiplier != T::one() {
            raw.mapv_inplace(|v| v * multiplier);
        }
        raw[[i, j]] = value;

        if self.mode == StorageMode::Constant && !raw.iter().all(|v| *v == value) {
            debug!("constant layer modified, it will be written as INTERNAL");
        }
        self.data = LayerData::Values { raw, multiplier: T::one() };
        true
    }

    /// Change the multiplier, keeping the raw values (so the logical values change). A
    /// constant layer has no separate multiplier, so its value is scaled by `m` instead.
    pub fn set_multiplier(&mut self, m: T) -> AResult<()> {
        match &mut self.data {
            LayerData::Constant(c) => *c = scaled(*c, m)?,
            LayerData::Values { raw, multiplier } => {
                check_products(raw, m)?;
                *multiplier = m;
            }
        }
        Ok(())
    }

    pub fn set_format(&mut self, format: Option<ArrayFormat>) {
        self.format = format;
    }

    pub fn set_iprn(&mut self, iprn: i32) {
        self.iprn = iprn;
    }

    pub fn set_binary_header(&mut self, header: Option<BinaryHeader>) {
        self.binary_header = header;
    }

    /// Store this layer in the file connected to `unit`
    pub fn set_external(&mut self, unit: i32) {
        self.mode = StorageMode::External;
        self.locator = Some(SourceLocator { unit: Some(unit), path: None, offset: 0 });
    }

    /// Store this layer in its own file
    pub fn set_open_close<P: AsRef<Path>>(&mut self, path: P) {
        self.mode = StorageMode::OpenClose;
        self.locator = Some(SourceLocator { unit: None, path: Some(path.as_ref().to_path_buf()), offset: 0 });
    }

    /// Store this layer after its control record
    pub fn set_internal(&mut self) {
        self.mode = StorageMode::Internal;
        self.locator = None;
    }
}

/// A named 2D or 3D array of `i32` or `f64` with its storage metadata.
///
/// ```
/// # use mfcodec::array::{NumArray, Shape, StorageMode};
/// let mut a = NumArray::constant("hk", Shape::Grid { nrow: 2, ncol: 3 }, 10.0);
/// assert_eq!(a.storage_mode(), StorageMode::Constant);
/// a.set(0, 1, 2, 5.0);
/// assert_eq!(a.get(0, 1, 2), Some(5.0));
/// assert_eq!(a.layer(0).unwrap().effective_mode(), StorageMode::Internal);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct NumArray<T> {
    name: String,
    shape: Shape,
    layers: Vec<Layer<T>>,
}

impl<T: ArrayValue> NumArray<T> {
    /// An array with every layer CONSTANT `value`
    pub fn constant<S: Into<String>>(name: S, shape: Shape, value: T) -> Self {
        let layers = (0..shape.nlay()).map(|_| Layer::constant(value)).collect();
        Self { name: name.into(), shape, layers }
    }

    /// A 2D INTERNAL array with a multiplier of one
    pub fn from_array2<S: Into<String>>(name: S, values: Array2<T>) -> Self {
        let (nrow, ncol) = values.dim();
        Self {
            name: name.into(),
            shape: Shape::Grid { nrow, ncol },
            layers: vec![Layer::stored(values, T::one())],
        }
    }

    /// A layered INTERNAL array with a multiplier of one
    pub fn from_array3<S: Into<String>>(name: S, values: Array3<T>) -> Self {
        let (nlay, nrow, ncol) = values.dim();
        let layers = values.axis_iter(Axis(0))
            .map(|lay| Layer::stored(lay.to_owned(), T::one()))
            .collect();
        Self { name: name.into(), shape: Shape::Layered { nlay, nrow, ncol }, layers }
    }

    /// Assemble an array from layers, which must match `shape`.
    pub fn from_layers<S: Into<String>>(name: S, shape: Shape, layers: Vec<Layer<T>>) -> Result<Self, AError> {
        let name = name.into();
        if layers.len() != shape.nlay() {
            return Err(AError::ShapeMismatch { name, expected: shape.nlay(), found: layers.len() })
        }
        for layer in &layers {
            if let Some(raw) = layer.raw() {
                if raw.dim() != (shape.nrow(), shape.ncol()) {
                    return Err(AError::ShapeMismatch { name, expected: shape.layer_len(), found: raw.len() })
                }
            }
        }
        Ok(Self { name, shape, layers })
    }

    /// Apply [`Layer::set_multiplier`] to every layer.
    pub fn with_multiplier(mut self, m: T) -> AResult<Self> {
        for layer in self.layers.iter_mut() {
            layer.set_multiplier(m)?;
        }
        Ok(self)
    }

    /// Set the data format code of every layer
    pub fn with_format(mut self, format: ArrayFormat) -> Self {
        for layer in self.layers.iter_mut() {
            layer.format = Some(format);
        }
        self
    }

    /// Store every layer, in order, in the file connected to `unit`.
    pub fn external(mut self, unit: i32) -> Self {
        for layer in self.layers.iter_mut() {
            layer.set_external(unit);
        }
        self
    }

    /// Store the array in its own file. Layered arrays get one file per layer, with
    /// `_<layer number>` added to the file stem.
    pub fn open_close<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        let nlay = self.layers.len();
        for (k, layer) in self.layers.iter_mut().enumerate() {
            if nlay > 1 {
                layer.set_open_close(layer_path(path, k + 1));
            } else {
                layer.set_open_close(path);
            }
        }
        self
    }

    /// Write the values unformatted. Only meaningful for EXTERNAL and OPEN/CLOSE storage.
    pub fn binary(self) -> Self {
        self.with_format(ArrayFormat::Binary)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn layers(&self) -> &[Layer<T>] {
        &self.layers
    }

    pub fn layer(&self, k: usize) -> Option<&Layer<T>> {
        self.layers.get(k)
    }

    pub fn layer_mut(&mut self, k: usize) -> Option<&mut Layer<T>> {
        self.layers.get_mut(k)
    }

    /// The storage mode of the first layer
    pub fn storage_mode(&self) -> StorageMode {
        self.layers.first().map(|l| l.mode).unwrap_or(StorageMode::Constant)
    }

    /// The multiplier of the first layer
    pub fn multiplier(&self) -> T {
        self.layers.first().map(|l| l.multiplier()).unwrap_or_else(T::one)
    }

    /// `true` if the first layer is stored unformatted
    pub fn is_binary(&self) -> bool {
        self.layers.first().is_some_and(|l| l.is_binary())
    }

    /// The logical values as a 3D array (a 2D array has one layer).
    pub fn values(&self) -> Array3<T> {
        let (nrow, ncol) = (self.shape.nrow(), self.shape.ncol());
        let mut out = Array3::from_elem((self.shape.nlay(), nrow, ncol), T::default());
        for (k, layer) in self.layers.iter().enumerate() {
            out.index_axis_mut(Axis(0), k).assign(&layer.values(nrow, ncol));
        }
        out
    }

    /// The logical values of one layer
    pub fn layer_values(&self, k: usize) -> Option<Array2<T>> {
        self.layers.get(k).map(|l| l.values(self.shape.nrow(), self.shape.ncol()))
    }

    pub fn get(&self, k: usize, i: usize, j: usize) -> Option<T> {
        let layer = self.layers.get(k)?;
        if i >= self.shape.nrow() || j >= self.shape.ncol() {
            return None
        }
        match &layer.data {
            LayerData::Constant(c) => Some(*c),
            LayerData::Values { raw, multiplier } => Some(raw[[i, j]] * *multiplier),
        }
    }

    /// Set one logical value. Returns `false` if the index is out of bounds.
    pub fn set(&mut self, k: usize, i: usize, j: usize, value: T) -> bool {
        let (nrow, ncol) = (self.shape.nrow(), self.shape.ncol());
        match self.layers.get_mut(k) {
            Some(layer) => layer.set(nrow, ncol, i, j, value),
            None => false,
        }
    }

    /// Sum of the logical values, as `f64`
    pub fn sum(&self) -> f64 {
        self.values().iter().map(|v| v.as_f64()).sum()
    }
}

fn scaled<T: ArrayValue>(v: T, m: T) -> AResult<T> {
    v.checked_product(m)
        .ok_or_else(|| AError::ValueError(FError::Overflow { value: format!("{v:?} * {m:?}"), field: T::header_field() }))
}

fn check_products<T: ArrayValue>(raw: &Array2<T>, m: T) -> AResult<()> {
    if m != T::one() {
        for v in raw.iter() {
            scaled(*v, m)?;
        }
    }
    Ok(())
}

pub(crate) fn layer_path(path: &Path, layer: usize) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{layer}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{layer}"),
    };
    path.with_file_name(name)
}

/// An array of either value type, for code that handles both.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyArray {
    Int(NumArray<i32>),
    Real(NumArray<f64>),
}

impl AnyArray {
    pub fn name(&self) -> &str {
        match self {
            AnyArray::Int(a) => a.name(),
            AnyArray::Real(a) => a.name(),
        }
    }

    pub fn shape(&self) -> Shape {
        match self {
            AnyArray::Int(a) => a.shape(),
            AnyArray::Real(a) => a.shape(),
        }
    }

    pub fn as_int(&self) -> Option<&NumArray<i32>> {
        if let AnyArray::Int(a) = self { Some(a) } else { None }
    }

    pub fn as_real(&self) -> Option<&NumArray<f64>> {
        if let AnyArray::Real(a) = self { Some(a) } else { None }
    }
}

impl From<NumArray<i32>> for AnyArray {
    fn from(value: NumArray<i32>) -> Self {
        Self::Int(value)
    }
}

impl From<NumArray<f64>> for AnyArray {
    fn from(value: NumArray<f64>) -> Self {
        Self::Real(value)
    }
}
