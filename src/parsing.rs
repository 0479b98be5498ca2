//! Conversion of field text to numbers, and tokenizing of list-directed (free format) records.
use crate::fort_error::{FError, FResult};

/// Parse the text of an `Iw` field. Blanks are ignored and an all-blank field is zero.
pub fn parse_integer(s: &str) -> FResult<i64> {
    let compact = remove_blanks(s);
    if compact.is_empty() {
        return Ok(0)
    }

    compact.parse::<i64>()
        .map_err(|e| FError::parsing(s, "integer", format!("Invalid integer ({e})")))
}

/// Parse a list-directed integer token.
///
/// Unlike fixed fields, a token must not be empty.
pub fn parse_any_integer(s: &str) -> FResult<i64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(FError::parsing(s, "integer", "empty value"))
    }
    s.parse::<i64>()
        .map_err(|e| FError::parsing(s, "integer", format!("Invalid integer ({e})")))
}

/// Parse the text of an `F`, `E`, `D` or `G` field.
///
/// - an all-blank field is zero,
/// - `D` and `d` exponents are accepted as well as `E`,
/// - a sign after the mantissa starts the exponent (`1.0-5` is `1.0E-5`),
/// - with no decimal point, the last `precision` digits of the mantissa are the fraction,
/// - with no exponent, a scale factor `kP` divides the value by `10^k`.
pub fn parse_fixed_real(s: &str, precision: u32, scale: i32) -> FResult<f64> {
    let compact = remove_blanks(s);
    if compact.is_empty() {
        return Ok(0.0)
    }

    let (mantissa, exponent) = split_exponent(&compact)
        .ok_or_else(|| FError::parsing(s, "real", "Invalid real number format"))?;

    let exp_value: i32 = match &exponent {
        Some(e) => e.parse().map_err(|e| FError::parsing(s, "real", format!("Invalid exponent ({e})")))?,
        None => 0,
    };

    let v = if mantissa.contains('.') {
        parse_real_parts(s, &mantissa, exp_value)?
    } else {
        parse_real_parts(s, &mantissa, exp_value - precision as i32)?
    };

    if exponent.is_some() || scale == 0 {
        Ok(v)
    } else if scale > 0 {
        Ok(v / 10.0_f64.powi(scale))
    } else {
        Ok(v * 10.0_f64.powi(-scale))
    }
}

/// Parse a list-directed real token: the decimal point is never implied and no
/// scale factor applies, but `D` exponents and the dropped-`E` form still are accepted.
pub fn parse_any_real(s: &str) -> FResult<f64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(FError::parsing(s, "real", "empty value"))
    }

    // Let Rust handle the special values ("NaN", "inf", ...) directly.
    if let Ok(v) = s.parse::<f64>() {
        return Ok(v)
    }

    let (mantissa, exponent) = split_exponent(s)
        .ok_or_else(|| FError::parsing(s, "real", "Invalid real number format"))?;
    let exp_value: i32 = match exponent {
        Some(e) => e.parse().map_err(|e| FError::parsing(s, "real", format!("Invalid exponent ({e})")))?,
        None => 0,
    };
    parse_real_parts(s, &mantissa, exp_value)
}

fn parse_real_parts(orig: &str, mantissa: &str, exponent: i32) -> FResult<f64> {
    // Rust does not accept a bare sign or decimal point, while Fortran reads those as zero
    let digits = mantissa.trim_start_matches(['+', '-']);
    if digits.is_empty() || digits == "." {
        return Ok(0.0)
    }

    let text = format!("{mantissa}E{exponent}");
    text.parse::<f64>()
        .map_err(|e| FError::parsing(orig, "real", format!("Invalid real number format ({e})")))
}

/// Split a blank-free real into mantissa and exponent text, normalizing `D`
/// exponents and the form where the exponent letter is left out.
/// Returns `None` if the text has more than one exponent.
fn split_exponent(s: &str) -> Option<(String, Option<String>)> {
    let upper = s.to_ascii_uppercase().replace('D', "E");
    let bytes = upper.as_bytes();

    if let Some(i) = upper.find('E') {
        let (m, e) = upper.split_at(i);
        let e = &e[1..];
        if e.contains('E') {
            return None
        }
        return Some((m.to_string(), Some(e.to_string())))
    }

    // A sign anywhere but the first character must begin an exponent
    for i in 1..bytes.len() {
        if bytes[i] == b'+' || bytes[i] == b'-' {
            let (m, e) = upper.split_at(i);
            return Some((m.to_string(), Some(e.to_string())))
        }
    }

    Some((upper, None))
}

fn remove_blanks(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Split a list-directed token of the form `N*value` into its repeat count and value.
///
/// Tokens without a repeat prefix return a count of 1. A null value (`N*` with nothing
/// after the asterisk) is an error since array values cannot be left unset.
pub fn split_repeat(tok: &str) -> FResult<(usize, &str)> {
    let Some((count, value)) = tok.split_once('*') else {
        return Ok((1, tok))
    };

    if count.is_empty() || !count.bytes().all(|b| b.is_ascii_digit()) {
        return Ok((1, tok))
    }

    let n: usize = count.parse()
        .map_err(|e| FError::parsing(tok, "repeat count", e))?;
    if value.is_empty() {
        return Err(FError::parsing(tok, "repeat count", "null values are not supported"))
    }
    Ok((n, value))
}

/// An iterator over the tokens of one list-directed record.
///
/// Tokens are separated by whitespace or commas. A quoted token keeps its inner text
/// (quotes removed), a token starting with `(` runs to the matching `)` so that a format
/// code such as `(1P, 10E12.4)` stays whole, and a `/` ends the record.
#[derive(Debug, Clone)]
pub struct ListTokens<'a> {
    input: &'a str,
    input_idx: usize,
    found_terminal_char: bool,
    slash_ends_record: bool,
}

impl<'a> ListTokens<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, input_idx: 0, found_terminal_char: false, slash_ends_record: true }
    }

    /// Tokenize a record in which `/` is an ordinary character, as in control records
    /// that carry file paths.
    pub fn keep_slashes(input: &'a str) -> Self {
        Self { input, input_idx: 0, found_terminal_char: false, slash_ends_record: false }
    }

    /// The unread part of the record, after any leading separators
    pub fn remainder(&self) -> &'a str {
        if self.found_terminal_char {
            ""
        } else {
            self.input[self.input_idx..].trim_start_matches(|c: char| Self::is_list_sep(Some(c)))
        }
    }

    /// Collect the remaining tokens
    pub fn collect_all(self) -> FResult<Vec<&'a str>> {
        self.collect()
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.input_idx..].chars().next()
    }

    fn take_quoted_string(&mut self) -> FResult<&'a str> {
        let mut chars = self.input[self.input_idx..].chars();
        let Some(quote) = chars.next() else {
            return Err(FError::parsing(self.input, "string", "input ended early"))
        };
        let mut nbytes = quote.len_utf8();
        let mut found_end_quote = false;

        for c in chars {
            nbytes += c.len_utf8();
            if c == quote {
                found_end_quote = true;
                break;
            }
        }

        if !found_end_quote {
            return Err(FError::parsing(self.input, "string", format!("closing {quote} missing")));
        }

        let nbq = quote.len_utf8();
        let inner_str = &self.input[self.input_idx+nbq..self.input_idx+nbytes-nbq];
        self.input_idx += nbytes;
        Ok(inner_str)
    }

    fn take_parenthesized(&mut self) -> FResult<&'a str> {
        let rest = &self.input[self.input_idx..];
        let Some(end) = rest.find(')') else {
            return Err(FError::parsing(self.input, "format", "closing ) missing"));
        };
        let s = &rest[..=end];
        self.input_idx += end + 1;
        Ok(s)
    }

    fn take_until_sep(&mut self) -> &'a str {
        let start = self.input_idx;
        loop {
            let c = self.peek_char();
            if Self::is_list_sep(c) {
                break;
            } else if self.is_terminal_char(c) {
                self.found_terminal_char = true;
                break;
            } else {
                self.input_idx += c.map(|c| c.len_utf8()).unwrap_or(0);
            }
        }

        &self.input[start..self.input_idx]
    }

    fn skip_list_separators(&mut self) {
        loop {
            let c = self.peek_char();
            if c.is_none() {
                self.found_terminal_char = true;
                break;
            } else if Self::is_list_sep(c) {
                self.input_idx += c.map(|c| c.len_utf8()).unwrap_or(0);
            } else if self.is_terminal_char(c) {
                self.found_terminal_char = true;
                break;
            } else {
                break;
            }
        }
    }

    fn is_list_sep(c: Option<char>) -> bool {
        if let Some(c) = c {
            c.is_ascii_whitespace() || c == ','
        } else {
            true
        }
    }

    fn is_terminal_char(&self, c: Option<char>) -> bool {
        self.slash_ends_record && c.is_some_and(|c| c == '/')
    }
}

impl<'a> Iterator for ListTokens<'a> {
    type Item = FResult<&'a str>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.found_terminal_char {
            return None
        }

        self.skip_list_separators();
        if self.found_terminal_char {
            return None
        }

        match self.peek_char() {
            Some('\'') | Some('"') => Some(self.take_quoted_string()),
            Some('(') => Some(self.take_parenthesized()),
            Some(_) => Some(Ok(self.take_until_sep())),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_fields() -> FResult<()> {
        assert_eq!(parse_integer("   42")?, 42);
        assert_eq!(parse_integer("  -42")?, -42);
        assert_eq!(parse_integer("     ")?, 0);
        assert_eq!(parse_integer("")?, 0);
        assert!(parse_integer(" 4.2 ").is_err());
        Ok(())
    }

    #[test]
    fn test_real_fields() -> FResult<()> {
        assert_eq!(parse_fixed_real("    12.500", 3, 0)?, 12.5);
        assert_eq!(parse_fixed_real("  0.15E+02", 6, 0)?, 15.0);
        assert_eq!(parse_fixed_real("  0.15D+02", 6, 0)?, 15.0);
        assert_eq!(parse_fixed_real("  0.15d02", 6, 0)?, 15.0);
        assert_eq!(parse_fixed_real("          ", 3, 0)?, 0.0);
        Ok(())
    }

    #[test]
    fn test_missing_exponent_letter() -> FResult<()> {
        let v = parse_fixed_real("    1.0-5", 3, 0)?;
        assert!((v - 1.0e-5).abs() < 1e-20, "1.0-5 read as {v}");
        let v = parse_fixed_real("  -2.5+3", 3, 0)?;
        assert_eq!(v, -2500.0);
        let v = parse_any_real("1.0-5")?;
        assert!((v - 1.0e-5).abs() < 1e-20, "1.0-5 read as {v}");
        Ok(())
    }

    #[test]
    fn test_implied_decimal() -> FResult<()> {
        assert_eq!(parse_fixed_real("  12345", 2, 0)?, 123.45);
        assert_eq!(parse_fixed_real("  12345", 0, 0)?, 12345.0);
        // An explicit decimal point overrides the precision
        assert_eq!(parse_fixed_real(" 1.2345", 2, 0)?, 1.2345);
        Ok(())
    }

    #[test]
    fn test_scale_factor_input() -> FResult<()> {
        // A scale factor only applies when there is no exponent
        assert_eq!(parse_fixed_real("  314.0", 1, 2)?, 3.14);
        assert_eq!(parse_fixed_real("3.14E+00", 2, 2)?, 3.14);
        Ok(())
    }

    #[test]
    fn test_free_reals() -> FResult<()> {
        assert_eq!(parse_any_real("1.5")?, 1.5);
        assert_eq!(parse_any_real("1.5D3")?, 1500.0);
        assert_eq!(parse_any_real("-.5")?, -0.5);
        assert_eq!(parse_any_real("7")?, 7.0);
        assert!(parse_any_real("abc").is_err());
        assert!(parse_any_real("").is_err());
        Ok(())
    }

    #[test]
    fn test_repeat_counts() -> FResult<()> {
        assert_eq!(split_repeat("3*1.5")?, (3, "1.5"));
        assert_eq!(split_repeat("1.5")?, (1, "1.5"));
        assert!(split_repeat("3*").is_err());
        Ok(())
    }

    #[test]
    fn test_list_tokens() -> FResult<()> {
        let toks = ListTokens::new("  1.0, 2.0 3*4 'a name' / 9").collect_all()?;
        assert_eq!(toks, vec!["1.0", "2.0", "3*4", "a name"]);

        let toks = ListTokens::new("INTERNAL 1.0 (1P, 10E12.4) -1").collect_all()?;
        assert_eq!(toks, vec!["INTERNAL", "1.0", "(1P, 10E12.4)", "-1"]);

        let toks = ListTokens::new("   ").collect_all()?;
        assert!(toks.is_empty());

        assert!(ListTokens::new("'unterminated").collect_all().is_err());
        Ok(())
    }

    #[test]
    fn test_remainder() -> FResult<()> {
        let mut toks = ListTokens::new("OPEN/CLOSE");
        // '/' ends a record, so a slash keyword must not be tokenized this way
        assert_eq!(toks.next().transpose()?, Some("OPEN"));
        assert_eq!(toks.next().transpose()?, None);

        let toks = ListTokens::keep_slashes("OPEN/CLOSE data/hk.ref 1.0 (FREE) -1").collect_all()?;
        assert_eq!(toks, vec!["OPEN/CLOSE", "data/hk.ref", "1.0", "(FREE)", "-1"]);

        let mut toks = ListTokens::new("a  b c");
        toks.next();
        assert_eq!(toks.remainder(), "b c");
        Ok(())
    }
}
