//! Errors converting single values to or from Fortran numeric fields
use std::fmt::Display;

use crate::format_specs::NumericFormat;

/// Type alias for a `Result` with [`FError`] as the error type.
pub type FResult<T> = Result<T, FError>;


/// An error related to one numeric field
#[derive(Debug, Clone, PartialEq)]
pub enum FError {
    /// Indicates an error parsing a data substring as a given type.
    ParsingError{ s: String, t: &'static str, reason: String },

    /// A value does not fit in the width of its field. Writers never emit the
    /// Fortran row of asterisks; they return this instead.
    Overflow{ value: String, field: NumericFormat },

    /// A value of the wrong kind for the field, e.g. 2.5 in an `I10` field.
    TypeMismatch{ field: NumericFormat, value: String },
}

impl Display for FError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FError::ParsingError { s, t, reason } => {
                write!(f, "Could not parse '{s}' as a {t}: {reason}")
            },
            FError::Overflow { value, field } => {
                write!(f, "Value {value} does not fit in a {field} field")
            },
            FError::TypeMismatch { field, value } => {
                write!(f, "Value {value} cannot be written in a {field} field")
            }
        }
    }
}

impl std::error::Error for FError {}

impl FError {
    pub(crate) fn parsing<S: Into<String>, R: ToString>(s: S, t: &'static str, reason: R) -> Self {
        Self::ParsingError { s: s.into(), t, reason: reason.to_string() }
    }
}
