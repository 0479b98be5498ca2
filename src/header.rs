//! Array control records: the line in front of every array (or layer) that says where its
//! values are and how to read them.
//!
//! Two variants exist. The keyword form is always accepted:
//!
//! ```text
//! CONSTANT   value
//! INTERNAL   cnstnt [fmtin [iprn]]
//! EXTERNAL   unit cnstnt [fmtin [iprn]]
//! OPEN/CLOSE fname cnstnt [fmtin [iprn]]
//! ```
//!
//! The numeric form is `LOCAT CNSTNT FMTIN IPRN`, in fixed columns (`I10,F10.0,A20,I10`)
//! for fixed-format packages or as delimited tokens for free-format packages. `LOCAT`
//! is interpreted by [`classify_locat`].
use tracing::trace;

use crate::array::{ArrayValue, StorageMode};
use crate::codec_error::{AError, AResult};
use crate::format_specs::ArrayFormat;
use crate::parsing::ListTokens;
use crate::storage::classify_locat;

const LOCAT_COLS: (usize, usize) = (0, 10);
const CNSTNT_COLS: (usize, usize) = (10, 20);
const FMTIN_COLS: (usize, usize) = (20, 40);
const IPRN_COLS: (usize, usize) = (40, 50);

/// A parsed array control record
#[derive(Debug, Clone, PartialEq)]
pub struct ControlRecord<T> {
    pub mode: StorageMode,
    /// The constant for CONSTANT, the multiplier otherwise
    pub value: T,
    pub unit: Option<i32>,
    pub path: Option<String>,
    pub format: Option<ArrayFormat>,
    pub iprn: i32,
}

impl<T: ArrayValue> ControlRecord<T> {
    pub fn constant(value: T) -> Self {
        Self { mode: StorageMode::Constant, value, unit: None, path: None, format: None, iprn: -1 }
    }

    /// `true` when the data are unformatted
    pub fn is_binary(&self) -> bool {
        self.format.is_some_and(|f| f.is_binary())
    }

    /// Parse a control record. `free_format` selects how a numeric (`LOCAT`) record is
    /// split; keyword records are recognized in either case.
    pub fn parse(line: &str, free_format: bool, package_unit: Option<i32>) -> AResult<Self> {
        trace!("control record: {line}");
        let trimmed = line.trim_start();
        let first = trimmed.split(|c: char| c.is_ascii_whitespace() || c == ',').next().unwrap_or("");
        if first.is_empty() {
            return Err(AError::header(line, "blank control record"))
        }

        if first.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
            Self::parse_keyword(line)
        } else if free_format {
            Self::parse_locat_free(line, package_unit)
        } else {
            Self::parse_locat_fixed(line, package_unit)
        }
    }

    fn parse_keyword(line: &str) -> AResult<Self> {
        let toks = ListTokens::keep_slashes(line).collect_all()?;
        let mode: StorageMode = toks[0].parse()?;
        let mut rest = toks[1..].iter().copied();

        let mut record = Self::constant(T::one());
        record.mode = mode;
        match mode {
            StorageMode::Constant => {
                record.value = parse_value::<T>(line, next_token(&mut rest, line, "constant value")?)?;
                return Ok(record)
            },
            StorageMode::Internal => {},
            StorageMode::External => {
                let tok = next_token(&mut rest, line, "unit number")?;
                let unit: i32 = tok.parse()
                    .map_err(|_| AError::header(line, format!("'{tok}' is not a unit number")))?;
                record.unit = Some(unit);
            },
            StorageMode::OpenClose => {
                record.path = Some(next_token(&mut rest, line, "file name")?.to_string());
            },
        }

        record.value = parse_value::<T>(line, next_token(&mut rest, line, "multiplier")?)?;

        // Anything after the format and print code is a comment
        if let Some(fmt) = rest.next().filter(|t| t.starts_with('(')) {
            record.format = Some(ArrayFormat::parse(fmt)?);
            if let Some(iprn) = rest.next().and_then(|t| t.parse().ok()) {
                record.iprn = iprn;
            }
        }
        Ok(record)
    }

    fn parse_locat_free(line: &str, package_unit: Option<i32>) -> AResult<Self> {
        let toks = ListTokens::keep_slashes(line).collect_all()?;
        let locat_text = toks[0];
        let cnstnt = toks.get(1).copied().ok_or_else(|| AError::header(line, "missing CNSTNT"))?;
        Self::from_locat(line, locat_text, cnstnt, toks.get(2).copied().unwrap_or(""), toks.get(3).copied().unwrap_or(""), package_unit)
    }

    fn parse_locat_fixed(line: &str, package_unit: Option<i32>) -> AResult<Self> {
        let locat = columns(line, LOCAT_COLS);
        let cnstnt = columns(line, CNSTNT_COLS);
        let fmtin = columns(line, FMTIN_COLS);
        let iprn = columns(line, IPRN_COLS);
        Self::from_locat(line, &locat, &cnstnt, fmtin.trim(), &iprn, package_unit)
    }

    fn from_locat(line: &str, locat: &str, cnstnt: &str, fmtin: &str, iprn: &str, package_unit: Option<i32>) -> AResult<Self> {
        let locat_value = crate::parsing::parse_integer(locat)
            .map_err(|_| AError::UnknownStorageMode(locat.trim().to_string()))?;
        let kind = classify_locat(locat_value as i32, package_unit);

        let mut record = Self::constant(parse_value::<T>(line, cnstnt)?);
        record.mode = kind.mode;
        record.unit = kind.unit;
        if kind.mode == StorageMode::Constant {
            return Ok(record)
        }

        if kind.binary {
            record.format = Some(ArrayFormat::Binary);
        } else if !fmtin.is_empty() {
            record.format = Some(ArrayFormat::parse(fmtin)?);
        }
        if !iprn.trim().is_empty() {
            record.iprn = parse_iprn(line, iprn)?;
        }
        Ok(record)
    }

    /// Render the record. Keyword form is used for free-format packages and for
    /// OPEN/CLOSE, which has no numeric form. A fixed-format INTERNAL record needs the
    /// package unit and falls back to the keyword form without one.
    pub fn write(&self, free_format: bool, package_unit: Option<i32>) -> AResult<String> {
        if free_format {
            return self.write_keyword()
        }

        let locat = match self.mode {
            StorageMode::OpenClose => return self.write_keyword(),
            StorageMode::Constant => 0,
            StorageMode::Internal => match package_unit {
                Some(unit) => unit,
                None => return self.write_keyword(),
            },
            StorageMode::External => {
                let unit = self.unit.ok_or_else(|| AError::header("EXTERNAL", "no unit number"))?;
                if self.is_binary() { -unit } else { unit }
            },
        };

        let mut out = crate::ser::serialize_integer(10, locat as i64)?;
        out.push_str(&self.value.write_header_field()?);
        if self.mode != StorageMode::Constant {
            let fmt = self.format.map(|f| f.to_string()).unwrap_or_default();
            out.push_str(&format!("{fmt:>20}"));
            out.push_str(&crate::ser::serialize_integer(10, self.iprn as i64)?);
        }
        Ok(out)
    }

    fn write_keyword(&self) -> AResult<String> {
        let value = self.value.write_free();
        let rest = match self.mode {
            StorageMode::Constant => return Ok(format!("CONSTANT {value}")),
            StorageMode::Internal => format!("INTERNAL {value}"),
            StorageMode::External => {
                let unit = self.unit.ok_or_else(|| AError::header("EXTERNAL", "no unit number"))?;
                format!("EXTERNAL {unit} {value}")
            },
            StorageMode::OpenClose => {
                let path = self.path.as_deref().ok_or_else(|| AError::header("OPEN/CLOSE", "no file name"))?;
                if path.contains(char::is_whitespace) {
                    format!("OPEN/CLOSE '{path}' {value}")
                } else {
                    format!("OPEN/CLOSE {path} {value}")
                }
            },
        };
        let fmt = self.format.unwrap_or(ArrayFormat::Free);
        Ok(format!("{rest} {fmt} {}", self.iprn))
    }
}

fn next_token<'a, I: Iterator<Item = &'a str>>(rest: &mut I, line: &str, what: &str) -> AResult<&'a str> {
    rest.next().ok_or_else(|| AError::header(line, format!("missing {what}")))
}

fn parse_value<T: ArrayValue>(line: &str, tok: &str) -> AResult<T> {
    let tok = tok.trim();
    if tok.is_empty() {
        return Ok(T::default())
    }
    T::parse_free(tok).map_err(|e| AError::header(line, e))
}

fn parse_iprn(line: &str, tok: &str) -> AResult<i32> {
    let tok = tok.trim();
    tok.parse().map_err(|_| AError::header(line, format!("'{tok}' is not a print code")))
}

/// Characters `start..end` of a line, padded with blanks as Fortran does for short records
fn columns(line: &str, (start, end): (usize, usize)) -> String {
    line.chars().skip(start).take(end - start).collect()
}
