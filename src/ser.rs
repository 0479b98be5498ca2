//! Conversion of numbers to fixed-width Fortran fields and to list-directed tokens.
//!
//! Unlike a Fortran runtime, none of these writers fill a field with `*` when a value
//! does not fit: they return [`FError::Overflow`] so the caller can decide what to do.
use ryu_floating_decimal::d2d;

use crate::fort_error::{FError, FResult};
use crate::format_specs::{NumericFormat, RealFmt};

/// Write an integer right-justified in `width` columns.
pub fn serialize_integer(width: u32, value: i64) -> FResult<String> {
    let mut b = itoa::Buffer::new();
    let s = b.format(value);
    pad_to_width(s, width)
        .ok_or_else(|| FError::Overflow { value: s.to_string(), field: NumericFormat::Integer { width } })
}

/// Write an integer as a list-directed token
pub fn serialize_integer_free(value: i64) -> String {
    let mut b = itoa::Buffer::new();
    b.format(value).to_string()
}

/// Write a real number in an `Ew.d` (or `Dw.d`) field with scale factor `scale`.
///
/// Some examples for `E12.3`:
///
/// Value    | Fortran
/// ---------|-------------
/// 3.14     | `   0.314E+01`
/// 0.0314   | `   0.314E-01`
/// 3140.0   | `   0.314E+04`
/// 3.14e120 | `   0.314+121`
///
/// A positive scale moves digits in front of the decimal point and adds a significant
/// digit (`1PE12.3` gives `   3.140E+00`); a negative one inserts zeros after it
/// (`-2PE12.3` gives `   0.003E+03`). The leading zero before the decimal point is dropped
/// when the field is one character too narrow for it.
pub fn serialize_real_exp(v: f64, width: u32, precision: u32, scale: i32, exp_ch: &str) -> FResult<String> {
    let fmt = if exp_ch == "D" { RealFmt::D } else { RealFmt::E };
    let field = NumericFormat::Real { width, precision, fmt, scale };
    let overflow = || FError::Overflow { value: v.to_string(), field };

    if !v.is_finite() {
        return Err(overflow())
    }

    // Valid scale factors are -d < k < d + 2
    let p = precision as i32;
    if scale <= -p || scale >= p + 2 {
        return Err(overflow())
    }

    let n_sig = (if scale <= 0 { p + scale } else { p + 1 }) as usize;
    let (digits, dec_exp) = round_to_digits(v, n_sig);
    let exponent = if v == 0.0 { 0 } else { dec_exp - scale };

    let mut body = String::new();
    if v.is_sign_negative() && v != 0.0 {
        body.push('-');
    }

    let needs_leading_zero = scale <= 0;
    if scale > 0 {
        body.push_str(&digits[..scale as usize]);
        body.push('.');
        body.push_str(&digits[scale as usize..]);
    } else {
        body.push('.');
        for _ in 0..(-scale) {
            body.push('0');
        }
        body.push_str(&digits);
    }

    let abs_exp = exponent.unsigned_abs();
    let sign = if exponent < 0 { '-' } else { '+' };
    if abs_exp < 100 {
        body.push_str(exp_ch);
        body.push(sign);
        body.push_str(&format!("{abs_exp:02}"));
    } else if abs_exp < 1000 {
        body.push(sign);
        body.push_str(&format!("{abs_exp:03}"));
    } else {
        return Err(overflow())
    }

    let nchar = body.len() as u32;
    if needs_leading_zero && nchar < width {
        let body = insert_leading_zero(&body);
        pad_to_width(&body, width).ok_or_else(overflow)
    } else {
        pad_to_width(&body, width).ok_or_else(overflow)
    }
}

/// Write a real number in an `Fw.d` field. A scale factor multiplies the value by `10^scale`.
pub fn serialize_real_f(v: f64, width: u32, precision: u32, scale: i32) -> FResult<String> {
    let field = NumericFormat::Real { width, precision, fmt: RealFmt::F, scale };
    let overflow = || FError::Overflow { value: v.to_string(), field };

    if !v.is_finite() {
        return Err(overflow())
    }

    let scaled = if scale == 0 { v } else { v * 10.0_f64.powi(scale) };
    let s = format!("{:.*}", precision as usize, scaled);
    if let Some(s) = pad_to_width(&s, width) {
        return Ok(s)
    }

    // "0.500" can still fit as ".500"
    let short = drop_leading_zero(&s);
    pad_to_width(&short, width).ok_or_else(overflow)
}

/// Write a real number in a `Gw.d` field.
///
/// Values with `0.1 <= |v| < 10^d` are written like `F(w-4).(d-N)` followed by four
/// blanks, where N is the number of digits before the decimal point; everything else
/// is written as `Ew.d` (with the scale factor applied).
pub fn serialize_real_g(v: f64, width: u32, precision: u32, scale: i32) -> FResult<String> {
    let field = NumericFormat::Real { width, precision, fmt: RealFmt::G, scale };
    if !v.is_finite() || precision == 0 {
        return Err(FError::Overflow { value: v.to_string(), field })
    }

    let n = if v == 0.0 {
        1
    } else {
        round_to_digits(v, precision as usize).1
    };

    if (0..=precision as i32).contains(&n) && width > 4 {
        let decimals = precision - n as u32;
        let s = serialize_real_f(v, width - 4, decimals, 0)
            .map_err(|_| FError::Overflow { value: v.to_string(), field })?;
        Ok(format!("{s}    "))
    } else {
        serialize_real_exp(v, width, precision, scale, "E")
            .map_err(|_| FError::Overflow { value: v.to_string(), field })
    }
}

/// Write a real number as a list-directed token.
///
/// The shortest text that reads back as the same value is used, always with a decimal
/// point so that it stays a real: `0.7`, `10.0`, `1.0E-06`, `1.5E+20`.
pub fn serialize_real_free(v: f64) -> String {
    if v.is_nan() {
        return "NaN".to_string()
    } else if v.is_infinite() {
        return if v > 0.0 { "Inf".to_string() } else { "-Inf".to_string() }
    } else if v == 0.0 {
        return if v.is_sign_negative() { "-0.0".to_string() } else { "0.0".to_string() }
    }

    let (digits, exponent) = shortest_digits(v);
    let sci_exp = exponent + digits.len() as i32 - 1;
    let mut out = String::new();
    if v < 0.0 {
        out.push('-');
    }

    if (-5..16).contains(&sci_exp) {
        if exponent >= 0 {
            out.push_str(&digits);
            for _ in 0..exponent {
                out.push('0');
            }
            out.push_str(".0");
        } else if sci_exp >= 0 {
            let split = (sci_exp + 1) as usize;
            out.push_str(&digits[..split]);
            out.push('.');
            out.push_str(&digits[split..]);
        } else {
            out.push_str("0.");
            for _ in 0..(-sci_exp - 1) {
                out.push('0');
            }
            out.push_str(&digits);
        }
    } else {
        out.push_str(&digits[..1]);
        out.push('.');
        if digits.len() > 1 {
            out.push_str(&digits[1..]);
        } else {
            out.push('0');
        }
        let sign = if sci_exp < 0 { '-' } else { '+' };
        out.push_str(&format!("E{sign}{:02}", sci_exp.unsigned_abs()));
    }
    out
}

/// The shortest decimal digits of `|v|` (no trailing zeros) and the power of ten of the
/// last digit, i.e. `|v| = digits * 10^exponent`. `v` must be finite and nonzero.
fn shortest_digits(v: f64) -> (String, i32) {
    let fd = d2d(v.abs());
    let mut mantissa = fd.mantissa;
    let mut exponent = fd.exponent;
    while mantissa != 0 && mantissa % 10 == 0 {
        mantissa /= 10;
        exponent += 1;
    }
    let mut b = itoa::Buffer::new();
    (b.format(mantissa).to_string(), exponent)
}

/// Round `|v|` to `n_sig` significant digits, returning the digits and the exponent `N`
/// such that `|v| = 0.digits * 10^N`. Zero returns all zero digits and `N = 0`.
fn round_to_digits(v: f64, n_sig: usize) -> (String, i32) {
    if v == 0.0 || n_sig == 0 {
        return ("0".repeat(n_sig), 0)
    }

    let (digits, exponent) = shortest_digits(v);
    let mut dec_exp = exponent + digits.len() as i32;
    let mut bytes: Vec<u8> = digits.into_bytes();

    if bytes.len() > n_sig {
        let round_up = bytes[n_sig] >= b'5';
        bytes.truncate(n_sig);
        if round_up {
            let mut i = n_sig;
            loop {
                if i == 0 {
                    // All nines carried over: 0.999 -> 0.100E+01
                    bytes.insert(0, b'1');
                    bytes.truncate(n_sig);
                    dec_exp += 1;
                    break;
                }
                i -= 1;
                if bytes[i] == b'9' {
                    bytes[i] = b'0';
                } else {
                    bytes[i] += 1;
                    break;
                }
            }
        }
    } else {
        bytes.resize(n_sig, b'0');
    }

    (String::from_utf8_lossy(&bytes).into_owned(), dec_exp)
}

fn pad_to_width(s: &str, width: u32) -> Option<String> {
    let width = width as usize;
    if s.len() > width {
        None
    } else {
        Some(format!("{s:>width$}"))
    }
}

fn insert_leading_zero(s: &str) -> String {
    if let Some(rest) = s.strip_prefix('-') {
        format!("-0{rest}")
    } else {
        format!("0{s}")
    }
}

fn drop_leading_zero(s: &str) -> String {
    if let Some(rest) = s.strip_prefix("-0.") {
        format!("-.{rest}")
    } else if let Some(rest) = s.strip_prefix("0.") {
        format!(".{rest}")
    } else {
        s.to_string()
    }
}
