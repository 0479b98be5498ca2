//! Rendering option records back to text.
//!
//! Keywords are written with their registered spelling, so an option parsed through an
//! alias or in lower case comes back in canonical form. Values are checked against the
//! declaration before anything is written.
use std::io::Write;

use crate::codec_error::{OError, OResult};
use crate::options::{OptionEntry, OptionRecord, OptionRegistry, OptionSpec, OptionStyle, OptionValue, ValueType};

/// Writes [`OptionRecord`]s for one package's registry.
///
/// ```
/// # use mfcodec::option_writer::OptionBlockWriter;
/// # use mfcodec::options::{OptionRecord, OptionStyle, OptionValue};
/// # use mfcodec::packages::wel_registry;
/// let mut rec = OptionRecord::new(OptionStyle::Block);
/// rec.set("specify", vec![OptionValue::Float(0.5), OptionValue::Int(10)]);
/// let text = OptionBlockWriter::new(wel_registry()).render(&rec).unwrap();
/// assert_eq!(text, "OPTIONS\nSPECIFY 0.5 10\nEND\n");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct OptionBlockWriter<'r> {
    registry: &'r OptionRegistry,
}

impl<'r> OptionBlockWriter<'r> {
    pub fn new(registry: &'r OptionRegistry) -> Self {
        Self { registry }
    }

    /// Render in the record's own style
    pub fn render(&self, record: &OptionRecord) -> OResult<String> {
        self.render_with_style(record, record.style())
    }

    /// Render in `style`. The block style ends with a newline after `END`; the single-line
    /// style has no trailing newline since it usually continues a package's data line.
    pub fn render_with_style(&self, record: &OptionRecord, style: OptionStyle) -> OResult<String> {
        let mut lines = vec![];
        for entry in record.iter() {
            lines.extend(self.render_entry(entry)?);
        }

        match style {
            OptionStyle::SingleLine => Ok(lines.join(" ")),
            OptionStyle::Block => {
                let mut out = String::from("OPTIONS\n");
                for line in lines {
                    out.push_str(&line);
                    out.push('\n');
                }
                out.push_str("END\n");
                Ok(out)
            }
        }
    }

    /// Write the record in its own style, ending with a newline
    pub fn write<W: Write>(&self, out: &mut W, record: &OptionRecord) -> OResult<()> {
        let mut text = self.render(record)?;
        if !text.ends_with('\n') {
            text.push('\n');
        }
        out.write_all(text.as_bytes()).map_err(OError::WriteError)
    }

    /// The text of one option. A repeatable option gives one occurrence per group of
    /// declared values.
    fn render_entry(&self, entry: &OptionEntry) -> OResult<Vec<String>> {
        let spec = self.registry.lookup(&entry.keyword)
            .ok_or_else(|| OError::UnknownOption { keyword: entry.keyword.clone(), line: String::new() })?;

        if spec.is_repeatable() && !entry.values.is_empty() {
            entry.values.chunks(spec.occurrence_len())
                .map(|group| render_occurrence(spec, group))
                .collect()
        } else {
            Ok(vec![render_occurrence(spec, &entry.values)?])
        }
    }
}

fn render_occurrence(spec: &OptionSpec, values: &[OptionValue]) -> OResult<String> {
    let n = values.len();
    if n < spec.required_count() {
        let missing = spec.values()[n].name;
        return Err(OError::MissingValue { keyword: spec.keyword().to_string(), value: missing });
    }

    let mut parts = vec![spec.keyword().to_string()];
    for (i, value) in values.iter().enumerate() {
        let vspec = spec.value_spec(i)
            .ok_or_else(|| OError::InvalidValue { keyword: spec.keyword().to_string(), value: "(extra)", text: value.to_string() })?;
        let invalid = || OError::InvalidValue { keyword: spec.keyword().to_string(), value: vspec.name, text: value.to_string() };

        let text = match (vspec.vtype, value) {
            (ValueType::Int, OptionValue::Int(_)) => value.to_string(),
            (ValueType::Int, OptionValue::Float(f)) if f.fract() == 0.0 && f.is_finite() => {
                OptionValue::Int(*f as i64).to_string()
            },
            (ValueType::Float, OptionValue::Int(i)) => OptionValue::Float(*i as f64).to_string(),
            (ValueType::Float, OptionValue::Float(_)) => value.to_string(),
            (ValueType::Str, _) => value.to_string(),
            _ => return Err(invalid()),
        };
        parts.push(text);
    }
    Ok(parts.join(" "))
}
