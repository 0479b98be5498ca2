//! Parsing of package options.
//!
//! Options come in two forms. The block form:
//!
//! ```text
//! OPTIONS
//! SPECIFY 0.5 10
//! TABFILES 2 28
//! END
//! ```
//!
//! and the legacy single-line form, where the keywords follow the package's ordinary
//! data on its first line (`10 50 AUX IFACE NOPRINT`). In the single-line form any token
//! spelled like a registered keyword starts an option; every other token is returned
//! as positional data, in order.
use std::io::{BufRead, Cursor};

use tracing::{trace, warn};

use crate::codec_error::{OError, OResult, OptionWarning};
use crate::options::{normalize_keyword, Occurs, OptionRecord, OptionRegistry, OptionSettings, OptionSpec, OptionStyle, OptionValue};
use crate::parsing::ListTokens;

/// Where the parser is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    ExpectOptionsOrFirstToken,
    InBlock,
    SingleLine,
    Done,
}

/// The result of parsing options
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedOptions {
    pub record: OptionRecord,
    /// Problems that did not stop parsing
    pub warnings: Vec<OptionWarning>,
    /// Tokens of a single option line that are not options
    pub positional: Vec<String>,
}

impl ParsedOptions {
    fn new(style: OptionStyle) -> Self {
        Self { record: OptionRecord::new(style), warnings: vec![], positional: vec![] }
    }

    fn insert(&mut self, spec: &OptionSpec, values: Vec<OptionValue>) {
        if spec.is_repeatable() {
            self.record.append(spec.keyword(), values);
        } else if self.record.set(spec.keyword(), values) {
            warn!("option {} given more than once, using the last one", spec.keyword());
            self.warnings.push(OptionWarning::DuplicateOption { keyword: spec.keyword().to_string() });
        }
    }
}

/// Parses options against one package's registry.
///
/// ```
/// # use mfcodec::option_parser::OptionBlockParser;
/// # use mfcodec::packages::uzf_registry;
/// let parser = OptionBlockParser::new(uzf_registry());
/// let parsed = parser.parse_str("OPTIONS\nNOSURFLEAK\nETSQUARE 0.7\nEND\n").unwrap();
/// assert!(parsed.record.contains("NOSURFLEAK"));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct OptionBlockParser<'r> {
    registry: &'r OptionRegistry,
    settings: OptionSettings,
}

impl<'r> OptionBlockParser<'r> {
    pub fn new(registry: &'r OptionRegistry) -> Self {
        Self { registry, settings: OptionSettings::default() }
    }

    pub fn with_settings(registry: &'r OptionRegistry, settings: OptionSettings) -> Self {
        Self { registry, settings }
    }

    pub fn registry(&self) -> &'r OptionRegistry {
        self.registry
    }

    /// Parse options from a stream positioned at the start of a package file (after any
    /// comment lines, which are skipped). For the block form, the stream is left after
    /// the `END` line; for the single-line form, after that one line.
    pub fn parse<R: BufRead>(&self, rdr: &mut R) -> OResult<ParsedOptions> {
        let mut state = ParserState::ExpectOptionsOrFirstToken;
        let mut parsed = ParsedOptions::new(OptionStyle::SingleLine);
        let mut pending = String::new();

        loop {
            state = match state {
                ParserState::ExpectOptionsOrFirstToken => {
                    match next_content_line(rdr)? {
                        None => ParserState::Done,
                        Some(line) => {
                            let is_block = first_token(&line).is_some_and(|t| t.eq_ignore_ascii_case("OPTIONS"));
                            pending = line;
                            if is_block {
                                parsed.record.set_style(OptionStyle::Block);
                                ParserState::InBlock
                            } else {
                                ParserState::SingleLine
                            }
                        }
                    }
                },
                ParserState::InBlock => {
                    let line = next_content_line(rdr)?
                        .ok_or_else(|| OError::MalformedBlock("input ended before END".to_string()))?;
                    if self.block_line(&line, &mut parsed)? {
                        ParserState::Done
                    } else {
                        ParserState::InBlock
                    }
                },
                ParserState::SingleLine => {
                    self.option_line(&pending, &mut parsed)?;
                    ParserState::Done
                },
                ParserState::Done => break,
            };
        }
        Ok(parsed)
    }

    /// Parse options from a string
    pub fn parse_str(&self, text: &str) -> OResult<ParsedOptions> {
        self.parse(&mut Cursor::new(text))
    }

    /// Parse a single option line
    pub fn parse_line(&self, line: &str) -> OResult<ParsedOptions> {
        let mut parsed = ParsedOptions::new(OptionStyle::SingleLine);
        self.option_line(line, &mut parsed)?;
        Ok(parsed)
    }

    /// Handle one line inside a block. Returns `true` at the `END` line.
    fn block_line(&self, line: &str, parsed: &mut ParsedOptions) -> OResult<bool> {
        trace!("option line: {line}");
        let toks = tokenize(line)?;
        let Some(first) = toks.first() else {
            return Ok(false)
        };
        if is_block_end(first) {
            return Ok(true)
        }

        let Some((spec, n)) = self.registry.match_longest(&toks) else {
            let keyword = toks[0].to_string();
            if self.settings.is_strict() {
                return Err(OError::UnknownOption { keyword, line: line.to_string() })
            }
            warn!("skipping unknown {} option '{keyword}'", self.registry.package());
            parsed.warnings.push(OptionWarning::UnknownOption { keyword, line: line.to_string() });
            return Ok(false)
        };

        // Tokens after the declared values are a comment
        let mut rest = toks[n..].iter().copied();
        let mut values = vec![];
        for vspec in spec.values() {
            match vspec.occurs {
                Occurs::Required => {
                    let text = rest.next().ok_or_else(|| OError::MissingValue { keyword: spec.keyword().to_string(), value: vspec.name })?;
                    values.push(vspec.parse(spec.keyword(), text)?);
                },
                Occurs::Optional => {
                    match rest.next().map(|t| vspec.parse(spec.keyword(), t)) {
                        Some(Ok(v)) => values.push(v),
                        _ => break,
                    }
                },
                Occurs::Rest => {
                    for text in rest.by_ref() {
                        values.push(vspec.parse(spec.keyword(), text)?);
                    }
                }
            }
        }

        parsed.insert(spec, values);
        Ok(false)
    }

    /// Scan a single-line record for keywords, longest match first
    fn option_line(&self, line: &str, parsed: &mut ParsedOptions) -> OResult<()> {
        trace!("option line: {line}");
        let toks = tokenize(line)?;
        let is_keyword = |i: usize| self.registry.match_longest(&toks[i..]).is_some();

        let mut i = 0;
        while i < toks.len() {
            let Some((spec, n)) = self.registry.match_longest(&toks[i..]) else {
                parsed.positional.push(toks[i].to_string());
                i += 1;
                continue;
            };
            i += n;

            let mut values = vec![];
            for vspec in spec.values() {
                match vspec.occurs {
                    Occurs::Required => {
                        let text = toks.get(i).ok_or_else(|| OError::MissingValue { keyword: spec.keyword().to_string(), value: vspec.name })?;
                        values.push(vspec.parse(spec.keyword(), text)?);
                        i += 1;
                    },
                    Occurs::Optional => {
                        if i >= toks.len() || is_keyword(i) {
                            break;
                        }
                        match vspec.parse(spec.keyword(), toks[i]) {
                            Ok(v) => {
                                values.push(v);
                                i += 1;
                            },
                            Err(_) => break,
                        }
                    },
                    Occurs::Rest => {
                        while i < toks.len() && !is_keyword(i) {
                            values.push(vspec.parse(spec.keyword(), toks[i])?);
                            i += 1;
                        }
                    }
                }
            }

            parsed.insert(spec, values);
        }
        Ok(())
    }
}

/// The next line that is neither blank nor a comment
fn next_content_line<R: BufRead>(rdr: &mut R) -> OResult<Option<String>> {
    loop {
        let mut buf = String::new();
        let n = rdr.read_line(&mut buf).map_err(OError::ReadError)?;
        if n == 0 {
            return Ok(None)
        }
        let content = strip_comment(&buf).trim();
        if !content.is_empty() {
            return Ok(Some(content.to_string()))
        }
    }
}

/// Cut `line` at the first `#` that is not inside a quoted token
fn strip_comment(line: &str) -> &str {
    let mut quote = None;
    for (i, c) in line.char_indices() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '#') => return &line[..i],
            _ => {}
        }
    }
    line
}

fn first_token(line: &str) -> Option<&str> {
    line.split(|c: char| c.is_ascii_whitespace() || c == ',').find(|t| !t.is_empty())
}

fn tokenize(line: &str) -> OResult<Vec<&str>> {
    ListTokens::keep_slashes(line).collect_all()
        .map_err(|e| OError::MalformedBlock(e.to_string()))
}

/// `true` if `keyword` is spelled like `END` or `END OPTIONS`
pub fn is_block_end(keyword: &str) -> bool {
    matches!(normalize_keyword(keyword).as_str(), "END" | "END OPTIONS")
}
