//! Represent the Fortran edit descriptors used by MODFLOW array blocks as Rust types.
//!
//! Two levels are modeled here. A [`NumericFormat`] is a single numeric field such
//! as `F10.3`, `I5` or `1PE12.4`. An [`ArrayFormat`] is the format code carried by
//! an array control record (the `FMTIN` column), which is either one of the two
//! keywords `(FREE)` / `(BINARY)` or a repeated numeric field like `(10E15.6)`:
//!
//! ```
//! # use mfcodec::format_specs::{ArrayFormat, NumericFormat, RealFmt};
//! let af = ArrayFormat::parse("(10E15.6)").unwrap();
//! assert_eq!(af, ArrayFormat::Fixed {
//!     per_line: 10,
//!     field: NumericFormat::Real { width: 15, precision: 6, fmt: RealFmt::E, scale: 0 }
//! });
//! assert_eq!(af.to_string(), "(10E15.6)");
//! ```
//!
//! Both are parsed with a small pest grammar; conversion of individual values to and
//! from text lives on [`NumericFormat`] (see `parse_field` and `format_field`).
use std::fmt::Display;

use pest::{Parser, iterators::Pair, RuleType};

use crate::array::ArrayValue;
use crate::fort_error::{FError, FResult};
use crate::{parsing, ser};

/// A type alias for `Result` with [`PError`] as the error type.
pub type PResult<T> = std::result::Result<T, PError>;

/// Represents an error in parsing a format string
#[derive(Debug, Clone, PartialEq)]
pub struct PError(pub String);

impl <R: RuleType> From<pest::error::Error<R>> for PError {
    fn from(value: pest::error::Error<R>) -> Self {
        Self(value.to_string())
    }
}

impl Display for PError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Format parsing error: {}", self.0)
    }
}

impl std::error::Error for PError {}

#[derive(Parser)]
#[grammar = "fort.pest"]
pub(crate) struct FortParser;

/// Representation of which format a float (i.e. real) number is written in.
///
/// Fortran can write floating point values in four formats:
/// - `F`: non-exponential with a fixed number of digits after the decimal,
/// - `G`: non-exponential when the magnitude allows it, exponential otherwise,
/// - `E`: exponential (e.g. 0.1E+02) for single precision numbers, and
/// - `D`: like `E` but for double precision numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RealFmt {
    D,
    E,
    F,
    G
}

impl Display for RealFmt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RealFmt::D => "D",
            RealFmt::E => "E",
            RealFmt::F => "F",
            RealFmt::G => "G",
        };

        write!(f, "{s}")
    }
}

impl RealFmt {
    /// `true` if the format is `RealFmt::D`, `false` otherwise
    pub fn is_d(&self) -> bool {
        matches!(self, Self::D)
    }

    /// `true` if the format is `RealFmt::F`, `false` otherwise
    pub fn is_f(&self) -> bool {
        matches!(self, Self::F)
    }
}

/// A single fixed-width numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NumericFormat {
    /// An `Iw` field: a decimal integer right-justified in `width` columns.
    Integer{width: u32},

    /// An `Fw.d`, `Ew.d`, `Dw.d` or `Gw.d` field.
    ///
    /// `precision` is the `d` part: digits after the decimal point for F, significant
    /// digits for E/D/G. `scale` holds any `kP` scale factor in effect (0 if none).
    Real{width: u32, precision: u32, fmt: RealFmt, scale: i32},
}

impl NumericFormat {
    /// Parse a single descriptor such as `"I10"`, `"F10.0"` or `"1PE12.4"`.
    ///
    /// No surrounding parentheses or repeat count are allowed; use [`ArrayFormat::parse`]
    /// for a full `FMTIN` code.
    pub fn parse(desc: &str) -> PResult<Self> {
        let tree = FortParser::parse(Rule::descriptor, desc.trim())?
            .next()
            .ok_or_else(|| PError(format!("empty descriptor '{desc}'")))?;

        let mut scale = 0;
        let mut field = None;
        for pair in tree.into_inner() {
            match pair.as_rule() {
                Rule::scale => scale = consume_signed_from_pair(pair)?,
                Rule::EOI => break,
                _ => field = Some(numeric_from_pair(pair, scale)?),
            }
        }

        field.ok_or_else(|| PError(format!("no numeric field in '{desc}'")))
    }

    /// The number of columns this field occupies.
    pub fn width(&self) -> u32 {
        match self {
            Self::Integer { width } => *width,
            Self::Real { width, .. } => *width,
        }
    }

    /// `true` for an `Iw` field
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Integer { .. })
    }

    /// Convert the text of one field into a value.
    ///
    /// The slice may be shorter than the field width (the remainder is treated as
    /// blank, as Fortran pads short records). A completely blank field reads as zero.
    /// Real fields accept `E` or `D` exponents, the legacy form where the exponent
    /// letter is dropped (`1.0-5` is `1.0E-5`), and an implied decimal point when the
    /// text has none.
    pub fn parse_field<T: ArrayValue>(&self, text: &str) -> FResult<T> {
        let value = match *self {
            Self::Integer { .. } => FortValue::Integer(parsing::parse_integer(text)?),
            Self::Real { precision, scale, .. } => FortValue::Real(parsing::parse_fixed_real(text, precision, scale)?),
        };
        T::from_fort(value, text)
    }

    /// Render `value` right-justified in exactly `width` columns.
    ///
    /// Returns `FError::Overflow` if the value cannot be represented in the field.
    pub fn format_field<T: ArrayValue>(&self, value: T) -> FResult<String> {
        match (*self, value.to_fort()) {
            (Self::Integer { width }, FortValue::Integer(i)) => ser::serialize_integer(width, i),
            (Self::Integer { width }, FortValue::Real(r)) => {
                if r.fract() == 0.0 && r.abs() < i64::MAX as f64 {
                    ser::serialize_integer(width, r as i64)
                } else {
                    Err(FError::TypeMismatch { field: *self, value: r.to_string() })
                }
            },
            (Self::Real { width, precision, fmt, scale }, v) => {
                let r = match v {
                    FortValue::Integer(i) => i as f64,
                    FortValue::Real(r) => r,
                };
                match fmt {
                    RealFmt::D => ser::serialize_real_exp(r, width, precision, scale, "D"),
                    RealFmt::E => ser::serialize_real_exp(r, width, precision, scale, "E"),
                    RealFmt::F => ser::serialize_real_f(r, width, precision, scale),
                    RealFmt::G => ser::serialize_real_g(r, width, precision, scale),
                }
            }
        }
    }
}

impl Display for NumericFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NumericFormat::Integer { width } => write!(f, "I{width}"),
            NumericFormat::Real { width, precision, fmt, scale } => {
                let p = if scale == &0 { "".to_owned() } else { format!("{scale}P") };
                write!(f, "{p}{fmt}{width}.{precision}")
            },
        }
    }
}

/// A scalar value read from or written to a numeric field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FortValue {
    Integer(i64),
    Real(f64)
}

/// The data format code (`FMTIN`) of an array control record.
///
/// ```
/// # use mfcodec::format_specs::ArrayFormat;
/// assert_eq!(ArrayFormat::parse("(free)").unwrap(), ArrayFormat::Free);
/// assert_eq!(ArrayFormat::parse("(BINARY)").unwrap(), ArrayFormat::Binary);
/// assert!(ArrayFormat::parse("10E15.6").is_err()); // parentheses are required
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ArrayFormat {
    /// Whitespace/comma delimited values (Fortran list-directed input).
    Free,
    /// Unformatted values preceded by a binary header.
    Binary,
    /// `per_line` fixed-width fields per line, each described by `field`.
    Fixed{per_line: u32, field: NumericFormat},
}

impl ArrayFormat {
    /// Parse a format code. The string must include the opening and closing parentheses.
    ///
    /// Spaces and tabs are ignored; keywords and descriptor letters are case-insensitive.
    pub fn parse(fmt_str: &str) -> PResult<Self> {
        let tree = FortParser::parse(Rule::array_format, fmt_str.trim())?
            .next()
            .ok_or_else(|| PError(format!("empty format '{fmt_str}'")))?;

        let mut stack: Vec<_> = tree.into_inner().rev().collect();
        let mut per_line: u32 = 1;
        let mut scale: i32 = 0;

        while let Some(pair) = stack.pop() {
            match pair.as_rule() {
                Rule::free => return Ok(Self::Free),
                Rule::binary => return Ok(Self::Binary),
                Rule::EOI => break,

                Rule::element => {
                    for inner in pair.into_inner().rev() {
                        stack.push(inner);
                    }
                },

                // Safe to parse: the rule only admits digits, but a huge count still
                // has to fit a u32.
                Rule::repeat => {
                    per_line = pair.as_str().parse()
                        .map_err(|_| PError(format!("repeat count '{}' is too large", pair.as_str())))?;
                    if per_line == 0 {
                        return Err(PError("repeat count must be at least 1".to_string()))
                    }
                },

                Rule::scale => scale = consume_signed_from_pair(pair)?,

                _ => {
                    let field = numeric_from_pair(pair, scale)?;
                    return Ok(Self::Fixed { per_line, field })
                }
            }
        }

        Err(PError(format!("no data format found in '{fmt_str}'")))
    }

    /// `true` for `(FREE)`
    pub fn is_free(&self) -> bool {
        matches!(self, Self::Free)
    }

    /// `true` for `(BINARY)`
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary)
    }
}

impl Display for ArrayFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArrayFormat::Free => write!(f, "(FREE)"),
            ArrayFormat::Binary => write!(f, "(BINARY)"),
            ArrayFormat::Fixed { per_line, field } => {
                // The scale factor has to precede the repeat count
                match field {
                    NumericFormat::Real { scale, .. } if *scale != 0 => {
                        let unscaled = field.to_string();
                        let unscaled = unscaled.trim_start_matches(|c: char| c != 'P').trim_start_matches('P');
                        write!(f, "({scale}P{per_line}{unscaled})")
                    },
                    _ => write!(f, "({per_line}{field})"),
                }
            }
        }
    }
}

fn numeric_from_pair(pair: Pair<Rule>, scale: i32) -> PResult<NumericFormat> {
    let rule = pair.as_rule();
    let mut stack: Vec<_> = pair.into_inner().rev().collect();
    let width = consume_number(&mut stack, Rule::width)
        .ok_or_else(|| PError("numeric descriptor without a width".to_string()))??;

    let real = |fmt| -> PResult<NumericFormat> {
        let mut stack = stack.clone();
        let precision = consume_number(&mut stack, Rule::prec)
            .ok_or_else(|| PError(format!("{fmt}{width} is missing its precision")))??;
        Ok(NumericFormat::Real { width, precision, fmt, scale })
    };

    match rule {
        Rule::integer => Ok(NumericFormat::Integer { width }),
        Rule::real => real(RealFmt::F),
        Rule::realorexp => real(RealFmt::G),
        Rule::exponential => real(RealFmt::E),
        Rule::expdouble => real(RealFmt::D),
        other => Err(PError(format!("unexpected token {other:?} where a numeric descriptor was expected"))),
    }
}

fn consume_number(stack: &mut Vec<Pair<Rule>>, rule: Rule) -> Option<PResult<u32>> {
    if stack.last()?.as_rule() != rule {
        return None;
    }
    let s = stack.pop()?.as_str().to_string();
    Some(s.parse().map_err(|_| PError(format!("'{s}' does not fit in a u32"))))
}

fn consume_signed_from_pair(pair: Pair<Rule>) -> PResult<i32> {
    let mut stack: Vec<_> = pair.into_inner().rev().collect();
    match stack.pop() {
        Some(p) if p.as_rule() == Rule::signed => {
            p.as_str().parse().map_err(|_| PError(format!("bad scale factor '{}'", p.as_str())))
        },
        _ => Ok(0),
    }
}
