//! Unformatted (binary) array records.
//!
//! A binary array is one header record followed by `ncol * nrow` values, all in the
//! platform's native byte order:
//!
//! ```text
//! kstp: i32, kper: i32, pertim: real, totim: real, text: [u8; 16], ncol: i32, nrow: i32, ilay: i32
//! ```
//!
//! `real` is 4 or 8 bytes depending on [`Precision`], which also sets the width of the
//! real values that follow. Integer arrays always use 4-byte values.
use std::io::{Read, Write};

use crate::array::ArrayValue;

/// Width of the real numbers in a binary file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Precision {
    Single,
    #[default]
    Double,
}

impl Precision {
    /// Number of bytes in one real value
    pub fn real_size(&self) -> usize {
        match self {
            Precision::Single => 4,
            Precision::Double => 8,
        }
    }
}

pub(crate) fn read_real<R: Read>(rdr: &mut R, precision: Precision) -> std::io::Result<f64> {
    match precision {
        Precision::Single => {
            let mut buf = [0u8; 4];
            rdr.read_exact(&mut buf)?;
            Ok(f32::from_ne_bytes(buf) as f64)
        },
        Precision::Double => {
            let mut buf = [0u8; 8];
            rdr.read_exact(&mut buf)?;
            Ok(f64::from_ne_bytes(buf))
        }
    }
}

pub(crate) fn write_real<W: Write>(wtr: &mut W, v: f64, precision: Precision) -> std::io::Result<()> {
    match precision {
        Precision::Single => wtr.write_all(&(v as f32).to_ne_bytes()),
        Precision::Double => wtr.write_all(&v.to_ne_bytes()),
    }
}

pub(crate) fn read_i32<R: Read>(rdr: &mut R) -> std::io::Result<i32> {
    let mut buf = [0u8; 4];
    rdr.read_exact(&mut buf)?;
    Ok(i32::from_ne_bytes(buf))
}

pub(crate) fn write_i32<W: Write>(wtr: &mut W, v: i32) -> std::io::Result<()> {
    wtr.write_all(&v.to_ne_bytes())
}

/// The header record that precedes each binary array.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BinaryHeader {
    pub kstp: i32,
    pub kper: i32,
    pub pertim: f64,
    pub totim: f64,
    pub text: [u8; 16],
    pub ncol: i32,
    pub nrow: i32,
    pub ilay: i32,
}

impl BinaryHeader {
    /// The header given to arrays that were not read from a binary file:
    /// time step and stress period 1, times of 1.0, and the array name
    /// upper-cased and right-justified in the text label.
    pub fn new(name: &str, ncol: usize, nrow: usize, ilay: usize) -> Self {
        Self {
            kstp: 1,
            kper: 1,
            pertim: 1.0,
            totim: 1.0,
            text: Self::make_text(name),
            ncol: ncol as i32,
            nrow: nrow as i32,
            ilay: ilay as i32,
        }
    }

    /// Build a 16 byte text label: upper case, right-justified, truncated if longer.
    pub fn make_text(name: &str) -> [u8; 16] {
        let upper = name.to_ascii_uppercase();
        let bytes = upper.as_bytes();
        let bytes = &bytes[..bytes.len().min(16)];
        let mut text = [b' '; 16];
        text[16 - bytes.len()..].copy_from_slice(bytes);
        text
    }

    /// The text label with surrounding blanks removed
    pub fn text_str(&self) -> String {
        String::from_utf8_lossy(&self.text).trim().to_string()
    }

    /// Size of the header record in bytes
    pub fn byte_len(precision: Precision) -> usize {
        4 * 2 + 2 * precision.real_size() + 16 + 4 * 3
    }

    pub fn read<R: Read>(rdr: &mut R, precision: Precision) -> std::io::Result<Self> {
        let kstp = read_i32(rdr)?;
        let kper = read_i32(rdr)?;
        let pertim = read_real(rdr, precision)?;
        let totim = read_real(rdr, precision)?;
        let mut text = [0u8; 16];
        rdr.read_exact(&mut text)?;
        let ncol = read_i32(rdr)?;
        let nrow = read_i32(rdr)?;
        let ilay = read_i32(rdr)?;
        Ok(Self { kstp, kper, pertim, totim, text, ncol, nrow, ilay })
    }

    pub fn write<W: Write>(&self, wtr: &mut W, precision: Precision) -> std::io::Result<()> {
        write_i32(wtr, self.kstp)?;
        write_i32(wtr, self.kper)?;
        write_real(wtr, self.pertim, precision)?;
        write_real(wtr, self.totim, precision)?;
        wtr.write_all(&self.text)?;
        write_i32(wtr, self.ncol)?;
        write_i32(wtr, self.nrow)?;
        write_i32(wtr, self.ilay)?;
        Ok(())
    }
}

/// Read `n` values following a header. Returns the values and the number of bytes consumed.
pub fn read_values<T: ArrayValue, R: Read>(rdr: &mut R, n: usize, precision: Precision) -> std::io::Result<(Vec<T>, u64)> {
    let mut values = Vec::with_capacity(n);
    for _ in 0..n {
        values.push(T::read_binary(rdr, precision)?);
    }
    Ok((values, (n * T::binary_size(precision)) as u64))
}

/// Write the values of one array, returning the number of bytes written.
pub fn write_values<T: ArrayValue, W: Write, I: IntoIterator<Item = T>>(wtr: &mut W, values: I, precision: Precision) -> std::io::Result<u64> {
    let mut nbytes = 0;
    for v in values {
        v.write_binary(wtr, precision)?;
        nbytes += T::binary_size(precision) as u64;
    }
    Ok(nbytes)
}
