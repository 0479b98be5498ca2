//! Errors from reading or writing array blocks and option blocks
use std::{fmt::Display, error::Error};
use crate::format_specs::PError;
use crate::fort_error::FError;

/// A type alias for `Result` with [`AError`] as the error type.
pub type AResult<T> = Result<T, AError>;

/// Errors that can occur while reading or writing an array block
#[derive(Debug)]
pub enum AError {
    /// The number of values found does not match the array's shape.
    ShapeMismatch{name: String, expected: usize, found: usize},
    /// The control record names a storage mode this crate does not know.
    UnknownStorageMode(String),
    /// The control record could not be understood.
    InvalidHeader{line: String, reason: String},
    /// Indicates an invalid data format code (`FMTIN`) in a control record
    FormatError(PError),
    /// Indicates a problem converting one value to or from text
    ValueError(FError),
    /// An EXTERNAL array refers to a unit number absent from the unit table.
    UnknownUnit(i32),
    /// An EXTERNAL array is being written without a unit number.
    MissingUnit{name: String},
    /// The input ended before the array was complete
    InputEndedEarly{name: String},
    /// Indicates an error reading the input
    ReadError(std::io::Error),
    /// Indicates an error writing the output
    WriteError(std::io::Error),
}

impl Display for AError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShapeMismatch { name, expected, found } => {
                write!(f, "Array '{name}' should have {expected} values but {found} were found")
            },
            Self::UnknownStorageMode(mode) => write!(f, "Unknown array storage mode '{mode}'"),
            Self::InvalidHeader { line, reason } => write!(f, "Invalid array control record '{line}': {reason}"),
            Self::FormatError(e) => write!(f, "Error parsing format: {e}"),
            Self::ValueError(e) => write!(f, "Error in array value: {e}"),
            Self::UnknownUnit(unit) => write!(f, "Unit {unit} is not associated with any file"),
            Self::MissingUnit { name } => write!(f, "Array '{name}' is stored EXTERNAL but has no unit number"),
            Self::InputEndedEarly { name } => write!(f, "Input ended before array '{name}' was complete"),
            Self::ReadError(e) => write!(f, "Error reading data: {e}"),
            Self::WriteError(e) => write!(f, "Error writing data: {e}"),
        }
    }
}

impl Error for AError {}

impl From<PError> for AError {
    fn from(value: PError) -> Self {
        Self::FormatError(value)
    }
}

impl From<FError> for AError {
    fn from(value: FError) -> Self {
        Self::ValueError(value)
    }
}

impl AError {
    pub(crate) fn header<L: Into<String>, R: ToString>(line: L, reason: R) -> Self {
        Self::InvalidHeader { line: line.into(), reason: reason.to_string() }
    }
}

/// A type alias for `Result` with [`OError`] as the error type.
pub type OResult<T> = Result<T, OError>;

/// Errors that can occur while parsing or writing options
#[derive(Debug)]
pub enum OError {
    /// A keyword is not in the package's registry (strict parsing, or writing).
    UnknownOption{keyword: String, line: String},
    /// An `OPTIONS` block was not closed by `END`.
    MalformedBlock(String),
    /// A keyword was missing one of its required values.
    MissingValue{keyword: String, value: &'static str},
    /// A value could not be parsed as its declared type.
    InvalidValue{keyword: String, value: &'static str, text: String},
    /// A registry was built with the same keyword or alias twice.
    DuplicateKeyword(String),
    /// Indicates an error reading the input
    ReadError(std::io::Error),
    /// Indicates an error writing the output
    WriteError(std::io::Error),
}

impl Display for OError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownOption { keyword, line } => write!(f, "Unknown option '{keyword}' in line '{line}'"),
            Self::MalformedBlock(msg) => write!(f, "Malformed OPTIONS block: {msg}"),
            Self::MissingValue { keyword, value } => write!(f, "Option {keyword} is missing its value '{value}'"),
            Self::InvalidValue { keyword, value, text } => write!(f, "Invalid value '{text}' for '{value}' of option {keyword}"),
            Self::DuplicateKeyword(kw) => write!(f, "Keyword {kw} is declared more than once"),
            Self::ReadError(e) => write!(f, "Error reading options: {e}"),
            Self::WriteError(e) => write!(f, "Error writing options: {e}"),
        }
    }
}

impl Error for OError {}

/// A recoverable problem found while parsing options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionWarning {
    /// The same option was given twice; the later values replaced the earlier ones.
    DuplicateOption{keyword: String},
    /// An unknown keyword was skipped because parsing was not strict.
    UnknownOption{keyword: String, line: String},
}

impl Display for OptionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateOption { keyword } => write!(f, "Option {keyword} given more than once, the last value is used"),
            Self::UnknownOption { keyword, line } => write!(f, "Skipping unknown option '{keyword}' in line '{line}'"),
        }
    }
}
