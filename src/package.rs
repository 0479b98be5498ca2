//! Whole package files described by static item tables.
//!
//! A [`PackageDescriptor`] lists what a package file holds, in order: its options,
//! lines of scalars and arrays. [`load_package`] and [`write_package`] walk that table
//! with the option engine and the array codec, so a package type is declared rather
//! than coded. Typed structs such as [`Bas6`] sit on top of the generic [`PackageData`].
use std::fmt::Display;
use std::io::{BufRead, Cursor, Read, Write};

use error_stack::{Report, ResultExt};
use indexmap::IndexMap;
use itertools::Itertools;
use tracing::{debug, warn};

use crate::array::{AnyArray, ArrayValue, NumArray, Shape};
use crate::array_codec::ArrayCodec;
use crate::codec_error::{AError, OError, OptionWarning};
use crate::format_specs::{NumericFormat, RealFmt};
use crate::option_parser::{OptionBlockParser, ParsedOptions};
use crate::option_writer::OptionBlockWriter;
use crate::options::{OptionRecord, OptionRegistry, OptionSettings, OptionStyle};
use crate::packages;
use crate::parsing::ListTokens;
use crate::ser;

/// One entry of a package file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageItem {
    /// The options block or option line
    Options,
    /// A data line that starts with these fields and ends with the package options
    OptionLine(&'static [LineField]),
    /// One line of real scalars
    Scalars(&'static [&'static str]),
    IntArray { name: &'static str, layered: bool },
    RealArray { name: &'static str, layered: bool },
}

/// Type of a leading field on an option line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Real,
}

/// One leading field of an option line; 10 columns wide in fixed format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineField {
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn int_field(name: &'static str) -> LineField {
    LineField { name, kind: FieldKind::Int }
}

/// The static layout of one package type
#[derive(Debug, Clone, Copy)]
pub struct PackageDescriptor {
    pub name: &'static str,
    pub registry: fn() -> &'static OptionRegistry,
    pub items: &'static [PackageItem],
    /// The option that switches the rest of the file to free format, if the package has one
    pub free_format_option: Option<&'static str>,
}

impl PackageDescriptor {
    pub fn registry(&self) -> &'static OptionRegistry {
        (self.registry)()
    }
}

pub const BAS6: PackageDescriptor = PackageDescriptor {
    name: "BAS6",
    registry: packages::bas6_registry,
    items: &[
        PackageItem::Options,
        PackageItem::IntArray { name: "IBOUND", layered: true },
        PackageItem::Scalars(&["HNOFLO"]),
        PackageItem::RealArray { name: "STRT", layered: true },
    ],
    free_format_option: Some("FREE"),
};

/// Stream package: the first line holds the dimensions, the budget units and the
/// auxiliary variables
pub const STR: PackageDescriptor = PackageDescriptor {
    name: "STR",
    registry: packages::str_registry,
    items: &[
        PackageItem::OptionLine(&[
            int_field("MXACTS"),
            int_field("NSS"),
            int_field("NTRIB"),
            int_field("NDIV"),
            int_field("ICALC"),
            LineField { name: "CONST", kind: FieldKind::Real },
            int_field("ISTCB1"),
            int_field("ISTCB2"),
        ]),
    ],
    free_format_option: None,
};

pub const WEL: PackageDescriptor = options_only("WEL", packages::wel_registry);
pub const UZF: PackageDescriptor = options_only("UZF", packages::uzf_registry);
pub const SFR: PackageDescriptor = options_only("SFR", packages::sfr_registry);
pub const AG: PackageDescriptor = options_only("AG", packages::ag_registry);

const fn options_only(name: &'static str, registry: fn() -> &'static OptionRegistry) -> PackageDescriptor {
    PackageDescriptor { name, registry, items: &[PackageItem::Options], free_format_option: None }
}

/// Grid dimensions needed to read arrays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridDims {
    pub nlay: usize,
    pub nrow: usize,
    pub ncol: usize,
}

impl GridDims {
    pub fn shape(&self, layered: bool) -> Shape {
        if layered {
            Shape::Layered { nlay: self.nlay, nrow: self.nrow, ncol: self.ncol }
        } else {
            Shape::Grid { nrow: self.nrow, ncol: self.ncol }
        }
    }
}

/// The contents of a package file
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PackageData {
    pub options: OptionRecord,
    /// Tokens of the option line that are not options
    pub positional: Vec<String>,
    pub warnings: Vec<OptionWarning>,
    pub scalars: IndexMap<String, f64>,
    pub arrays: IndexMap<String, AnyArray>,
}

impl PackageData {
    pub fn int_array(&self, name: &str) -> Option<&NumArray<i32>> {
        self.arrays.get(name).and_then(|a| a.as_int())
    }

    pub fn real_array(&self, name: &str) -> Option<&NumArray<f64>> {
        self.arrays.get(name).and_then(|a| a.as_real())
    }
}

/// Context for errors while loading a package
#[derive(Debug)]
pub struct LoadError {
    package: &'static str,
}

impl Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Could not load the {} package", self.package)
    }
}

impl std::error::Error for LoadError {}

/// Context for errors while writing a package
#[derive(Debug)]
pub struct WriteError {
    package: &'static str,
}

impl Display for WriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Could not write the {} package", self.package)
    }
}

impl std::error::Error for WriteError {}

/// Read a package file laid out as `desc` says. `codec` supplies the array settings and
/// the external file table; its free-format setting is replaced when the package has
/// an option that controls it.
pub fn load_package<R: BufRead>(desc: &PackageDescriptor, rdr: &mut R, dims: GridDims, codec: &mut ArrayCodec, opt_settings: OptionSettings) -> error_stack::Result<PackageData, LoadError> {
    let ctx = || LoadError { package: desc.name };
    let mut data = PackageData::default();

    for item in desc.items {
        match item {
            PackageItem::Options => {
                let parser = OptionBlockParser::with_settings(desc.registry(), opt_settings);
                let parsed = read_options(&parser, rdr)
                    .change_context_lazy(ctx)
                    .attach_printable("in the options")?;
                data.options = parsed.record;
                data.positional = parsed.positional;
                data.warnings = parsed.warnings;

                if let Some(kw) = desc.free_format_option {
                    let free = data.options.contains(kw);
                    debug!("{} package is in {} format", desc.name, if free { "free" } else { "fixed" });
                    codec.set_settings(codec.settings().free_format(free));
                }
            },
            PackageItem::OptionLine(fields) => {
                let parser = OptionBlockParser::with_settings(desc.registry(), opt_settings);
                let (values, rest) = read_line_fields(rdr, fields, codec.settings().is_free_format())
                    .change_context_lazy(ctx)
                    .attach_printable("in the option line")?;
                let parsed = parser.parse_line(rest.trim())
                    .change_context_lazy(ctx)
                    .attach_printable("in the option line")?;
                for w in &parsed.warnings {
                    warn!("{}: {w}", desc.name);
                }
                data.scalars.extend(fields.iter().map(|f| f.name.to_string()).zip(values));
                data.options = parsed.record;
                data.positional = parsed.positional;
                data.warnings = parsed.warnings;
            },
            PackageItem::Scalars(names) => {
                let values = read_scalars(rdr, names, codec.settings().is_free_format())
                    .change_context_lazy(ctx)
                    .attach_printable_lazy(|| format!("in the scalars {}", names.join(", ")))?;
                data.scalars.extend(names.iter().map(|n| n.to_string()).zip(values));
            },
            PackageItem::IntArray { name, layered } => {
                let a = codec.read::<i32, _>(rdr, name, dims.shape(*layered))
                    .change_context_lazy(ctx)
                    .attach_printable_lazy(|| format!("in array {name}"))?;
                data.arrays.insert(name.to_string(), a.into());
            },
            PackageItem::RealArray { name, layered } => {
                let a = codec.read::<f64, _>(rdr, name, dims.shape(*layered))
                    .change_context_lazy(ctx)
                    .attach_printable_lazy(|| format!("in array {name}"))?;
                data.arrays.insert(name.to_string(), a.into());
            },
        }
    }
    Ok(data)
}

/// Write `data` as a package file laid out as `desc` says.
pub fn write_package<W: Write>(desc: &PackageDescriptor, out: &mut W, data: &PackageData, codec: &mut ArrayCodec) -> error_stack::Result<(), WriteError> {
    let ctx = || WriteError { package: desc.name };

    for item in desc.items {
        match item {
            PackageItem::Options => {
                write_options(desc.registry(), out, data)
                    .change_context_lazy(ctx)
                    .attach_printable("in the options")?;
                if let Some(kw) = desc.free_format_option {
                    codec.set_settings(codec.settings().free_format(data.options.contains(kw)));
                }
            },
            PackageItem::OptionLine(fields) => {
                let mut line = render_line_fields(fields, &data.scalars, codec.settings().is_free_format())
                    .change_context_lazy(ctx)
                    .attach_printable("in the option line")?;
                let opts = OptionBlockWriter::new(desc.registry())
                    .render_with_style(&data.options, OptionStyle::SingleLine)
                    .change_context_lazy(ctx)
                    .attach_printable("in the option line")?;
                for part in data.positional.iter().chain(std::iter::once(&opts)).filter(|s| !s.is_empty()) {
                    line.push(' ');
                    line.push_str(part);
                }
                writeln!(out, "{line}").map_err(AError::WriteError).change_context_lazy(ctx)?;
            },
            PackageItem::Scalars(names) => {
                write_scalars(out, names, &data.scalars, codec.settings().is_free_format())
                    .change_context_lazy(ctx)
                    .attach_printable_lazy(|| format!("in the scalars {}", names.join(", ")))?;
            },
            PackageItem::IntArray { name, .. } => {
                let a = data.int_array(name)
                    .ok_or_else(|| Report::new(ctx()).attach_printable(format!("no integer array named {name}")))?;
                write_array(codec, out, a, name, ctx)?;
            },
            PackageItem::RealArray { name, .. } => {
                let a = data.real_array(name)
                    .ok_or_else(|| Report::new(ctx()).attach_printable(format!("no real array named {name}")))?;
                write_array(codec, out, a, name, ctx)?;
            },
        }
    }
    Ok(())
}

fn write_array<T: ArrayValue, W: Write, F: Fn() -> WriteError>(codec: &mut ArrayCodec, out: &mut W, a: &NumArray<T>, name: &str, ctx: F) -> error_stack::Result<(), WriteError> {
    codec.write(out, a)
        .change_context_lazy(ctx)
        .attach_printable_lazy(|| format!("in array {name}"))
}

/// Read the options at the start of a package. Comment lines are skipped; the first
/// other line (even a blank one) is either `OPTIONS` or the option line.
fn read_options<R: BufRead>(parser: &OptionBlockParser, rdr: &mut R) -> Result<ParsedOptions, OError> {
    let line = loop {
        let mut buf = String::new();
        if rdr.read_line(&mut buf).map_err(OError::ReadError)? == 0 {
            break String::new()
        }
        if !buf.trim_start().starts_with('#') {
            break buf
        }
    };

    let starts_block = line.split_whitespace().next().is_some_and(|t| t.eq_ignore_ascii_case("OPTIONS"));
    let parsed = if starts_block {
        parser.parse(&mut Cursor::new(line).chain(rdr))?
    } else {
        parser.parse_line(line.trim_end())?
    };

    for w in &parsed.warnings {
        warn!("{}: {w}", parser.registry().package());
    }
    Ok(parsed)
}

fn write_options<W: Write>(registry: &OptionRegistry, out: &mut W, data: &PackageData) -> Result<(), OError> {
    let writer = OptionBlockWriter::new(registry);
    let positional = data.positional.join(" ");
    match data.options.style() {
        OptionStyle::Block => {
            writer.write(out, &data.options)?;
            if !positional.is_empty() {
                writeln!(out, "{positional}").map_err(OError::WriteError)?;
            }
        },
        OptionStyle::SingleLine => {
            let opts = writer.render(&data.options)?;
            let line = [positional, opts].into_iter().filter(|s| !s.is_empty()).join(" ");
            writeln!(out, "{line}").map_err(OError::WriteError)?;
        }
    }
    Ok(())
}

/// Read the leading fields of a data line. Returns their values and the rest of the
/// line. In fixed format each field takes 10 columns.
fn read_line_fields<R: BufRead>(rdr: &mut R, fields: &[LineField], free_format: bool) -> Result<(Vec<f64>, String), AError> {
    let names = || fields.iter().map(|f| f.name).join(", ");
    let line = loop {
        let mut buf = String::new();
        if rdr.read_line(&mut buf).map_err(AError::ReadError)? == 0 {
            return Err(AError::InputEndedEarly { name: names() })
        }
        if !buf.trim_start().starts_with('#') {
            break buf
        }
    };
    let line = line.trim_end_matches(['\n', '\r']);

    let mut values = Vec::with_capacity(fields.len());
    if free_format {
        let mut toks = ListTokens::keep_slashes(line);
        for field in fields {
            let tok = toks.next()
                .ok_or_else(|| AError::ShapeMismatch { name: names(), expected: fields.len(), found: values.len() })??;
            values.push(match field.kind {
                FieldKind::Int => i32::parse_free(tok)? as f64,
                FieldKind::Real => f64::parse_free(tok)?,
            });
        }
        Ok((values, toks.remainder().to_string()))
    } else {
        let chars: Vec<char> = line.chars().collect();
        for (i, field) in fields.iter().enumerate() {
            let start = (i * 10).min(chars.len());
            let end = ((i + 1) * 10).min(chars.len());
            let text: String = chars[start..end].iter().collect();
            values.push(match field.kind {
                FieldKind::Int => i32::header_field().parse_field::<i32>(&text)? as f64,
                FieldKind::Real => f64::header_field().parse_field::<f64>(&text)?,
            });
        }
        Ok((values, chars[(fields.len() * 10).min(chars.len())..].iter().collect()))
    }
}

fn render_line_fields(fields: &[LineField], scalars: &IndexMap<String, f64>, free_format: bool) -> Result<String, AError> {
    let mut parts = vec![];
    for field in fields {
        let v = scalars.get(field.name).copied()
            .ok_or_else(|| AError::header(field.name, "no value for field"))?;
        let int = || i32::header_field().format_field(v);
        parts.push(match (field.kind, free_format) {
            (FieldKind::Int, true) => int()?.trim_start().to_string(),
            (FieldKind::Int, false) => int()?,
            (FieldKind::Real, true) => ser::serialize_real_free(v),
            (FieldKind::Real, false) => v.write_header_field()?,
        });
    }
    Ok(parts.join(if free_format { " " } else { "" }))
}

/// A free-format scalar line is list-directed; a fixed-format one has 10 columns per value.
fn read_scalars<R: BufRead>(rdr: &mut R, names: &[&str], free_format: bool) -> Result<Vec<f64>, AError> {
    let mut line = String::new();
    if rdr.read_line(&mut line).map_err(AError::ReadError)? == 0 {
        return Err(AError::InputEndedEarly { name: names.join(", ") })
    }
    let line = line.trim_end_matches(['\n', '\r']);

    if free_format {
        let toks = ListTokens::new(line).collect_all()?;
        if toks.len() < names.len() {
            return Err(AError::ShapeMismatch { name: names.join(", "), expected: names.len(), found: toks.len() })
        }
        toks.iter().take(names.len()).map(|t| f64::parse_free(t).map_err(AError::from)).collect()
    } else {
        let field = NumericFormat::Real { width: 10, precision: 0, fmt: RealFmt::F, scale: 0 };
        let chars: Vec<char> = line.chars().collect();
        (0..names.len()).map(|i| {
            let start = (i * 10).min(chars.len());
            let end = ((i + 1) * 10).min(chars.len());
            let text: String = chars[start..end].iter().collect();
            field.parse_field::<f64>(&text).map_err(AError::from)
        }).collect()
    }
}

fn write_scalars<W: Write>(out: &mut W, names: &[&str], scalars: &IndexMap<String, f64>, free_format: bool) -> Result<(), AError> {
    let mut parts = vec![];
    for name in names {
        let v = scalars.get(*name).copied()
            .ok_or_else(|| AError::header(*name, "no value for scalar"))?;
        parts.push(if free_format { ser::serialize_real_free(v) } else { v.write_header_field()? });
    }
    let sep = if free_format { " " } else { "" };
    writeln!(out, "{}", parts.join(sep)).map_err(AError::WriteError)
}

/// Options of the basic package
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bas6Options {
    pub xsection: bool,
    pub chtoch: bool,
    pub free: bool,
    pub printtime: bool,
    pub showprogress: bool,
    pub stoperror: Option<f64>,
}

/// The basic package: boundary array, no-flow head and starting heads
#[derive(Debug, Clone, PartialEq)]
pub struct Bas6 {
    pub options: Bas6Options,
    pub ibound: NumArray<i32>,
    pub hnoflo: f64,
    pub strt: NumArray<f64>,
}

impl Bas6 {
    /// Build from generic package data. Fails if an item is missing.
    pub fn from_data(data: &PackageData) -> error_stack::Result<Self, LoadError> {
        let missing = |what: &str| Report::new(LoadError { package: BAS6.name }).attach_printable(format!("no {what}"));
        let rec = &data.options;
        let stoperror = match rec.get("STOPERROR") {
            Some(v) => Some(v.first().and_then(|v| v.as_float()).ok_or_else(|| missing("STOPERROR value"))?),
            None => None,
        };

        Ok(Self {
            options: Bas6Options {
                xsection: rec.contains("XSECTION"),
                chtoch: rec.contains("CHTOCH"),
                free: rec.contains("FREE"),
                printtime: rec.contains("PRINTTIME"),
                showprogress: rec.contains("SHOWPROGRESS"),
                stoperror,
            },
            ibound: data.int_array("IBOUND").cloned().ok_or_else(|| missing("IBOUND array"))?,
            hnoflo: data.scalars.get("HNOFLO").copied().ok_or_else(|| missing("HNOFLO"))?,
            strt: data.real_array("STRT").cloned().ok_or_else(|| missing("STRT array"))?,
        })
    }

    pub fn to_data(&self) -> PackageData {
        let mut options = OptionRecord::new(OptionStyle::SingleLine);
        let o = &self.options;
        for (kw, on) in [("XSECTION", o.xsection), ("CHTOCH", o.chtoch), ("FREE", o.free), ("PRINTTIME", o.printtime), ("SHOWPROGRESS", o.showprogress)] {
            if on {
                options.set_flag(kw);
            }
        }
        if let Some(stoper) = o.stoperror {
            options.set("STOPERROR", vec![stoper.into()]);
        }

        let mut data = PackageData { options, ..Default::default() };
        data.scalars.insert("HNOFLO".to_string(), self.hnoflo);
        data.arrays.insert("IBOUND".to_string(), self.ibound.clone().into());
        data.arrays.insert("STRT".to_string(), self.strt.clone().into());
        data
    }

    pub fn load<R: BufRead>(rdr: &mut R, dims: GridDims, codec: &mut ArrayCodec) -> error_stack::Result<Self, LoadError> {
        let data = load_package(&BAS6, rdr, dims, codec, OptionSettings::default())?;
        Self::from_data(&data)
    }

    pub fn write<W: Write>(&self, out: &mut W, codec: &mut ArrayCodec) -> error_stack::Result<(), WriteError> {
        write_package(&BAS6, out, &self.to_data(), codec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    use crate::array::StorageMode;
    use crate::array_codec::ArraySettings;
    use crate::options::OptionValue;
    use crate::storage::StorageResolver;

    const DIMS: GridDims = GridDims { nlay: 2, nrow: 2, ncol: 3 };

    const FREE_BAS: &str = "# basic package\nFREE PRINTTIME\nINTERNAL 1 (FREE) -1\n1 1 1\n1 -1 1\nCONSTANT 1\n-999.0\nINTERNAL 1.0 (FREE) -1\n10.0 10.0 10.0\n10.0 9.5 10.0\nCONSTANT 5.0\n";

    fn fixed_bas() -> String {
        let ibound_header = format!("{:>10}{:>10}{:>20}{:>10}", 1, 1, "(3I3)", -1);
        format!("# basic package\nCHTOCH\n{ibound_header}\n  1  1  1\n  1  0  1\n         0         1\n   -999.99\n         0      10.0\n         0       5.0\n")
    }

    fn fixed_codec() -> ArrayCodec {
        ArrayCodec::with_resolver(ArraySettings::default(), StorageResolver::default().with_package_unit(1))
    }

    #[test]
    fn test_load_free_bas6() -> error_stack::Result<(), LoadError> {
        let mut codec = ArrayCodec::new(ArraySettings::default().free_format(false));
        let data = load_package(&BAS6, &mut Cursor::new(FREE_BAS), DIMS, &mut codec, OptionSettings::default())?;
        assert!(codec.settings().is_free_format(), "FREE switches the codec to free format");
        assert_eq!(data.options.style(), OptionStyle::SingleLine);
        assert!(data.options.contains("FREE") && data.options.contains("PRINTTIME"));
        assert_eq!(data.scalars.get("HNOFLO"), Some(&-999.0));

        let ibound = data.int_array("IBOUND").unwrap();
        assert_eq!(ibound.values(), array![[[1, 1, 1], [1, -1, 1]], [[1, 1, 1], [1, 1, 1]]]);
        let strt = data.real_array("STRT").unwrap();
        assert_eq!(strt.get(0, 1, 1), Some(9.5));
        assert_eq!(strt.layer(1).unwrap().mode(), StorageMode::Constant);
        Ok(())
    }

    #[test]
    fn test_free_bas6_round_trip() -> error_stack::Result<(), WriteError> {
        let mut codec = ArrayCodec::new(ArraySettings::default());
        let bas = Bas6::load(&mut Cursor::new(FREE_BAS), DIMS, &mut codec).change_context(WriteError { package: "BAS6" })?;

        let mut out = vec![];
        bas.write(&mut out, &mut codec)?;
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("FREE PRINTTIME\nINTERNAL 1 (FREE) -1\n"), "{text}");

        let back = Bas6::load(&mut Cursor::new(text), DIMS, &mut codec).change_context(WriteError { package: "BAS6" })?;
        assert_eq!(back, bas);
        Ok(())
    }

    #[test]
    fn test_fixed_bas6_round_trip() -> error_stack::Result<(), WriteError> {
        let mut codec = fixed_codec();
        let data = load_package(&BAS6, &mut Cursor::new(fixed_bas()), DIMS, &mut codec, OptionSettings::default())
            .change_context(WriteError { package: "BAS6" })?;
        assert!(!codec.settings().is_free_format());
        assert_eq!(data.scalars.get("HNOFLO"), Some(&-999.99));
        assert_eq!(data.int_array("IBOUND").unwrap().get(0, 1, 1), Some(0));

        let mut out = vec![];
        write_package(&BAS6, &mut out, &data, &mut codec)?;
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, fixed_bas().trim_start_matches("# basic package\n"));

        let back = load_package(&BAS6, &mut Cursor::new(text), DIMS, &mut codec, OptionSettings::default())
            .change_context(WriteError { package: "BAS6" })?;
        assert_eq!(back, data);
        Ok(())
    }

    #[test]
    fn test_blank_option_line() -> error_stack::Result<(), LoadError> {
        let text = fixed_bas().replace("CHTOCH", "");
        let mut codec = fixed_codec();
        let bas = Bas6::load(&mut Cursor::new(text), DIMS, &mut codec)?;
        assert_eq!(bas.options, Bas6Options::default());
        assert_eq!(bas.ibound.get(1, 0, 0), Some(1));
        Ok(())
    }

    #[test]
    fn test_load_errors_carry_context() {
        let text = "FREE\nINTERNAL 1 (FREE) -1\n1 1 1\n";
        let mut codec = ArrayCodec::new(ArraySettings::default());
        let res = load_package(&BAS6, &mut Cursor::new(text), DIMS, &mut codec, OptionSettings::default());
        let report = res.unwrap_err();
        let msg = format!("{report:?}");
        assert!(msg.contains("Could not load the BAS6 package"), "{msg}");
        assert!(msg.contains("in array IBOUND"), "{msg}");
        assert!(report.downcast_ref::<AError>().is_some_and(|e| matches!(e, AError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_missing_array_on_write() {
        let mut data = PackageData::default();
        data.scalars.insert("HNOFLO".to_string(), 0.0);
        let mut codec = ArrayCodec::new(ArraySettings::default());
        let res = write_package(&BAS6, &mut vec![], &data, &mut codec);
        assert!(format!("{:?}", res.unwrap_err()).contains("no integer array named IBOUND"));
    }

    const STR_FIXED: &str = "        23         7         0         0         1   86400.0        40        -1 AUX IFACE AUX XYZ\n";

    #[test]
    fn test_fixed_str_round_trip() -> error_stack::Result<(), WriteError> {
        let mut codec = ArrayCodec::new(ArraySettings::default().free_format(false));
        let data = load_package(&STR, &mut Cursor::new(format!("# stream package\n{STR_FIXED}")), DIMS, &mut codec, OptionSettings::default())
            .change_context(WriteError { package: "STR" })?;
        let fields: Vec<_> = data.scalars.values().copied().collect();
        assert_eq!(fields, vec![23.0, 7.0, 0.0, 0.0, 1.0, 86400.0, 40.0, -1.0]);
        assert_eq!(data.scalars.keys().next().map(|k| k.as_str()), Some("MXACTS"));
        assert_eq!(data.options.get("AUXILIARY"), Some(&[OptionValue::from("IFACE"), OptionValue::from("XYZ")][..]));
        assert!(data.positional.is_empty() && data.warnings.is_empty());

        let mut out = vec![];
        write_package(&STR, &mut out, &data, &mut codec)?;
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, STR_FIXED.replace("AUX ", "AUXILIARY "));

        let back = load_package(&STR, &mut Cursor::new(text), DIMS, &mut codec, OptionSettings::default())
            .change_context(WriteError { package: "STR" })?;
        assert_eq!(back, data);
        Ok(())
    }

    #[test]
    fn test_free_str_round_trip() -> error_stack::Result<(), WriteError> {
        let mut fixed = ArrayCodec::new(ArraySettings::default().free_format(false));
        let data = load_package(&STR, &mut Cursor::new(STR_FIXED), DIMS, &mut fixed, OptionSettings::default())
            .change_context(WriteError { package: "STR" })?;

        let mut free = ArrayCodec::new(ArraySettings::default());
        let mut out = vec![];
        write_package(&STR, &mut out, &data, &mut free)?;
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "23 7 0 0 1 86400.0 40 -1 AUXILIARY IFACE AUXILIARY XYZ\n");

        let back = load_package(&STR, &mut Cursor::new(text), DIMS, &mut free, OptionSettings::default())
            .change_context(WriteError { package: "STR" })?;
        assert_eq!(back, data);
        Ok(())
    }

    #[test]
    fn test_str_line_errors() {
        let mut codec = ArrayCodec::new(ArraySettings::default());
        let res = load_package(&STR, &mut Cursor::new("23 7 0\n"), DIMS, &mut codec, OptionSettings::default());
        let report = res.unwrap_err();
        assert!(format!("{report:?}").contains("in the option line"));
        assert!(report.downcast_ref::<AError>().is_some_and(|e| matches!(e, AError::ShapeMismatch { expected: 8, found: 3, .. })));

        let mut data = PackageData::default();
        data.scalars.extend(["MXACTS", "NSS", "NTRIB", "NDIV", "ICALC", "CONST", "ISTCB1", "ISTCB2"].map(|n| (n.to_string(), 1.0)));
        data.scalars.insert("NSS".to_string(), 7.5);
        let res = write_package(&STR, &mut vec![], &data, &mut codec);
        assert!(res.unwrap_err().downcast_ref::<AError>().is_some_and(|e| matches!(e, AError::ValueError(_))));
    }

    #[test]
    fn test_fixed_scalar_precision() -> error_stack::Result<(), WriteError> {
        let mut codec = fixed_codec();
        let mut data = load_package(&BAS6, &mut Cursor::new(fixed_bas()), DIMS, &mut codec, OptionSettings::default())
            .change_context(WriteError { package: "BAS6" })?;
        data.scalars.insert("HNOFLO".to_string(), 0.123456789);

        let mut out = vec![];
        write_package(&BAS6, &mut out, &data, &mut codec)?;
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("\n.123456789\n"), "{text}");
        let back = load_package(&BAS6, &mut Cursor::new(text), DIMS, &mut codec, OptionSettings::default())
            .change_context(WriteError { package: "BAS6" })?;
        assert_eq!(back.scalars.get("HNOFLO"), Some(&0.123456789));

        data.scalars.insert("HNOFLO".to_string(), 1.0 / 3.0);
        let res = write_package(&BAS6, &mut vec![], &data, &mut codec);
        assert!(format!("{:?}", res.unwrap_err()).contains("in the scalars HNOFLO"));
        Ok(())
    }

    #[test]
    fn test_options_only_packages() -> error_stack::Result<(), LoadError> {
        let text = "# wells\nOPTIONS\nSPECIFY 0.5 10\nTABFILES 2 28\nEND\n   10    50  AUX IFACE\n";
        let mut rdr = Cursor::new(text);
        let mut codec = ArrayCodec::default();
        let data = load_package(&WEL, &mut rdr, DIMS, &mut codec, OptionSettings::default())?;
        assert_eq!(data.options.style(), OptionStyle::Block);
        assert_eq!(data.options.get("TABFILES"), Some(&[OptionValue::Int(2), OptionValue::Int(28)][..]));
        assert!(data.positional.is_empty());

        // The stream is left at the line after END
        let mut rest = String::new();
        rdr.read_line(&mut rest).unwrap();
        assert_eq!(rest, "   10    50  AUX IFACE\n");

        let mut data = data;
        data.positional = vec!["10".into(), "50".into()];
        let mut out = vec![];
        write_package(&WEL, &mut out, &data, &mut codec).change_context(LoadError { package: "WEL" })?;
        assert_eq!(String::from_utf8(out).unwrap(), "OPTIONS\nSPECIFY 0.5 10\nTABFILES 2 28\nEND\n10 50\n");

        for desc in [UZF, SFR, AG, STR] {
            assert_eq!(desc.registry().package(), desc.name);
        }
        for desc in [UZF, SFR, AG] {
            assert_eq!(desc.items, &[PackageItem::Options]);
        }
        Ok(())
    }
}
