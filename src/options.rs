//! Option declarations and parsed option records.
//!
//! Each package type declares the keywords it understands in one [`OptionRegistry`].
//! Parsing an `OPTIONS` block (or a legacy option line) against a registry gives an
//! [`OptionRecord`]: the options in the order they appeared, plus the style they were
//! written in so that they can be written back the same way.
use std::collections::HashMap;
use std::fmt::Display;

use indexmap::IndexMap;
use itertools::Itertools;

use crate::codec_error::{OError, OResult};
use crate::parsing;
use crate::ser;

/// The type of one option value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Int,
    Float,
    Str,
}

/// How many times a declared value may appear
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occurs {
    /// Exactly once
    Required,
    /// Zero or one time; only the last values of an option may be optional
    Optional,
    /// Any number of times, up to the end of the option
    Rest,
}

/// One declared value of an option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueSpec {
    pub name: &'static str,
    pub vtype: ValueType,
    pub occurs: Occurs,
}

impl ValueSpec {
    /// Parse the text of this value
    pub fn parse(&self, keyword: &str, text: &str) -> OResult<OptionValue> {
        let invalid = || OError::InvalidValue { keyword: keyword.to_string(), value: self.name, text: text.to_string() };
        match self.vtype {
            ValueType::Int => parsing::parse_any_integer(text)
                .map(OptionValue::Int)
                .map_err(|_| invalid()),
            ValueType::Float => parsing::parse_any_real(text)
                .map(OptionValue::Float)
                .map_err(|_| invalid()),
            ValueType::Str => Ok(OptionValue::Str(text.to_string())),
        }
    }
}

/// Declaration of one option keyword.
///
/// ```
/// # use mfcodec::options::{OptionSpec, ValueType};
/// let spec = OptionSpec::new("SPECIFY")
///     .value("phiramp", ValueType::Float)
///     .optional_value("iunitramp", ValueType::Int);
/// assert_eq!(spec.required_count(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSpec {
    keyword: &'static str,
    values: Vec<ValueSpec>,
    aliases: Vec<&'static str>,
    attaches_to: Option<&'static str>,
    repeatable: bool,
}

impl OptionSpec {
    /// An option spelled `keyword` with no values yet. Keywords may be more than one
    /// word (`"END OPTIONS"`-style); matching ignores case and the amount of whitespace.
    pub fn new(keyword: &'static str) -> Self {
        Self { keyword, values: vec![], aliases: vec![], attaches_to: None, repeatable: false }
    }

    /// An option with no values
    pub fn flag(keyword: &'static str) -> Self {
        Self::new(keyword)
    }

    pub fn value(self, name: &'static str, vtype: ValueType) -> Self {
        self.push_value(name, vtype, Occurs::Required)
    }

    pub fn optional_value(self, name: &'static str, vtype: ValueType) -> Self {
        self.push_value(name, vtype, Occurs::Optional)
    }

    /// Values that take up the rest of the option
    pub fn rest_values(self, name: &'static str, vtype: ValueType) -> Self {
        self.push_value(name, vtype, Occurs::Rest)
    }

    fn push_value(mut self, name: &'static str, vtype: ValueType, occurs: Occurs) -> Self {
        self.values.push(ValueSpec { name, vtype, occurs });
        self
    }

    /// Another spelling of the keyword
    pub fn alias(mut self, alias: &'static str) -> Self {
        self.aliases.push(alias);
        self
    }

    /// The package field this option sets, when it is not named after the keyword
    pub fn attaches_to(mut self, field: &'static str) -> Self {
        self.attaches_to = Some(field);
        self
    }

    /// The option may be given more than once (`AUX IFACE AUX XYZ`). Each occurrence
    /// adds its values instead of replacing the earlier ones.
    pub fn repeatable(mut self) -> Self {
        self.repeatable = true;
        self
    }

    pub fn keyword(&self) -> &'static str {
        self.keyword
    }

    pub fn is_repeatable(&self) -> bool {
        self.repeatable
    }

    /// Number of values written with each occurrence of a repeatable option
    pub fn occurrence_len(&self) -> usize {
        self.values.len().max(1)
    }

    pub fn values(&self) -> &[ValueSpec] {
        &self.values
    }

    pub fn aliases(&self) -> &[&'static str] {
        &self.aliases
    }

    /// The package field this option sets, by default the lower-case keyword
    pub fn field(&self) -> String {
        match self.attaches_to {
            Some(f) => f.to_string(),
            None => self.keyword.to_ascii_lowercase().replace(' ', "_"),
        }
    }

    /// Number of values that must be present
    pub fn required_count(&self) -> usize {
        self.values.iter().filter(|v| v.occurs == Occurs::Required).count()
    }

    /// Maximum number of values, `None` if unbounded
    pub fn max_count(&self) -> Option<usize> {
        if self.values.iter().any(|v| v.occurs == Occurs::Rest) {
            None
        } else {
            Some(self.values.len())
        }
    }

    /// The declaration of value number `i`, repeating the last one for `Rest` values
    pub fn value_spec(&self, i: usize) -> Option<&ValueSpec> {
        match self.values.get(i) {
            Some(v) => Some(v),
            None => self.values.last().filter(|v| v.occurs == Occurs::Rest),
        }
    }

    fn spellings(&self) -> impl Iterator<Item = &'static str> + '_ {
        std::iter::once(self.keyword).chain(self.aliases.iter().copied())
    }
}

/// Upper-case a keyword and collapse its whitespace to single blanks
pub(crate) fn normalize_keyword(keyword: &str) -> String {
    keyword.split_whitespace()
        .map(|w| w.to_ascii_uppercase())
        .join(" ")
}

/// The options one package type recognizes. Immutable once built.
#[derive(Debug, Clone)]
pub struct OptionRegistry {
    package: &'static str,
    specs: IndexMap<&'static str, OptionSpec>,
    spellings: HashMap<String, &'static str>,
    max_words: usize,
}

/// Collects option declarations for an [`OptionRegistry`]
#[derive(Debug, Clone)]
pub struct RegistryBuilder {
    package: &'static str,
    specs: Vec<OptionSpec>,
}

impl RegistryBuilder {
    pub fn option(mut self, spec: OptionSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Build the registry. Fails if two options share a keyword or alias.
    pub fn build(self) -> OResult<OptionRegistry> {
        let mut specs = IndexMap::new();
        let mut spellings = HashMap::new();
        let mut max_words = 1;

        for spec in self.specs {
            for spelling in spec.spellings() {
                let norm = normalize_keyword(spelling);
                if norm.is_empty() || spellings.insert(norm.clone(), spec.keyword).is_some() {
                    return Err(OError::DuplicateKeyword(norm))
                }
                max_words = max_words.max(spelling.split_whitespace().count());
            }
            specs.insert(spec.keyword, spec);
        }

        Ok(OptionRegistry { package: self.package, specs, spellings, max_words })
    }
}

impl OptionRegistry {
    pub fn builder(package: &'static str) -> RegistryBuilder {
        RegistryBuilder { package, specs: vec![] }
    }

    /// Name of the package type this registry belongs to
    pub fn package(&self) -> &'static str {
        self.package
    }

    /// Find an option by keyword or alias, ignoring case
    pub fn lookup(&self, keyword: &str) -> Option<&OptionSpec> {
        let canonical = self.spellings.get(&normalize_keyword(keyword))?;
        self.specs.get(canonical)
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.lookup(keyword).is_some()
    }

    /// Match the longest keyword at the start of `tokens`. Returns the option and the
    /// number of tokens its keyword took.
    pub fn match_longest(&self, tokens: &[&str]) -> Option<(&OptionSpec, usize)> {
        let longest = self.max_words.min(tokens.len());
        (1..=longest).rev().find_map(|n| {
            self.lookup(&tokens[..n].join(" ")).map(|spec| (spec, n))
        })
    }

    /// The declared options, in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &OptionSpec> {
        self.specs.values()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// One parsed option value
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OptionValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl OptionValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            OptionValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The value as a real number; integers convert
    pub fn as_float(&self) -> Option<f64> {
        match self {
            OptionValue::Int(i) => Some(*i as f64),
            OptionValue::Float(f) => Some(*f),
            OptionValue::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl Display for OptionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionValue::Int(i) => write!(f, "{}", ser::serialize_integer_free(*i)),
            OptionValue::Float(v) => write!(f, "{}", ser::serialize_real_free(*v)),
            OptionValue::Str(s) if s.contains(char::is_whitespace) => write!(f, "'{s}'"),
            OptionValue::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for OptionValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

/// How options were (or will be) written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OptionStyle {
    /// Keywords on the package's first data line
    SingleLine,
    /// An `OPTIONS` ... `END` block
    #[default]
    Block,
}

/// One option and its values
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OptionEntry {
    pub keyword: String,
    pub values: Vec<OptionValue>,
}

/// The options of one package, in order.
///
/// ```
/// # use mfcodec::options::{OptionRecord, OptionStyle, OptionValue};
/// let mut rec = OptionRecord::new(OptionStyle::Block);
/// rec.set_flag("NOPRINT");
/// rec.set("specify", vec![OptionValue::Float(0.5)]);
/// assert_eq!(rec.get("SPECIFY"), Some(&[OptionValue::Float(0.5)][..]));
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OptionRecord {
    style: OptionStyle,
    entries: Vec<OptionEntry>,
}

impl OptionRecord {
    pub fn new(style: OptionStyle) -> Self {
        Self { style, entries: vec![] }
    }

    pub fn style(&self) -> OptionStyle {
        self.style
    }

    pub fn set_style(&mut self, style: OptionStyle) {
        self.style = style;
    }

    pub fn with_style(mut self, style: OptionStyle) -> Self {
        self.style = style;
        self
    }

    /// Set an option's values. An option that is already present keeps its position and
    /// gets the new values; returns `true` in that case.
    pub fn set<K: AsRef<str>>(&mut self, keyword: K, values: Vec<OptionValue>) -> bool {
        let keyword = normalize_keyword(keyword.as_ref());
        match self.entries.iter_mut().find(|e| e.keyword == keyword) {
            Some(entry) => {
                entry.values = values;
                true
            },
            None => {
                self.entries.push(OptionEntry { keyword, values });
                false
            }
        }
    }

    /// Add values to an option, creating it at the end if it is not present yet.
    /// Returns `true` if the option was already present.
    pub fn append<K: AsRef<str>>(&mut self, keyword: K, values: Vec<OptionValue>) -> bool {
        let keyword = normalize_keyword(keyword.as_ref());
        match self.entries.iter_mut().find(|e| e.keyword == keyword) {
            Some(entry) => {
                entry.values.extend(values);
                true
            },
            None => {
                self.entries.push(OptionEntry { keyword, values });
                false
            }
        }
    }

    /// Set an option that takes no values
    pub fn set_flag<K: AsRef<str>>(&mut self, keyword: K) -> bool {
        self.set(keyword, vec![])
    }

    pub fn remove<K: AsRef<str>>(&mut self, keyword: K) -> Option<OptionEntry> {
        let keyword = normalize_keyword(keyword.as_ref());
        let idx = self.entries.iter().position(|e| e.keyword == keyword)?;
        Some(self.entries.remove(idx))
    }

    pub fn get<K: AsRef<str>>(&self, keyword: K) -> Option<&[OptionValue]> {
        let keyword = normalize_keyword(keyword.as_ref());
        self.entries.iter().find(|e| e.keyword == keyword).map(|e| e.values.as_slice())
    }

    pub fn contains<K: AsRef<str>>(&self, keyword: K) -> bool {
        self.get(keyword).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OptionEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `true` if both records hold the same options with the same values, ignoring
    /// order and style
    pub fn same_options(&self, other: &OptionRecord) -> bool {
        self.len() == other.len()
            && self.entries.iter().all(|e| other.get(&e.keyword) == Some(e.values.as_slice()))
    }
}

/// Settings for parsing options
#[derive(Debug, Clone, Copy, Default)]
pub struct OptionSettings {
    strict: bool,
}

impl OptionSettings {
    /// If `true`, an unknown keyword in an `OPTIONS` block is an error. Otherwise (the
    /// default) it is skipped with a warning.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }
}
