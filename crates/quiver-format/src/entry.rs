//! Entry model and the line grammar that delimits entries in a stream.
//!
//! ```text
//! QV_TAG <tag>
//! <payload line>*
//! QV_NOEOL                 (only when the payload lacks a final newline)
//! QV_META <term> <value>*
//! QV_END
//! ```
//!
//! Every marker starts with the reserved prefix `QV_`. A payload line that
//! itself starts with that prefix cannot be represented; writers refuse such
//! payloads rather than emit an ambiguous stream.

use std::fmt;
use std::path::Path;

use crate::error::{QuiverError, QuiverResult};

/// Prefix shared by every marker line.
pub const RESERVED_PREFIX: &[u8] = b"QV_";
pub const TAG_MARKER: &str = "QV_TAG";
pub const META_MARKER: &str = "QV_META";
pub const NO_EOL_MARKER: &str = "QV_NOEOL";
pub const END_MARKER: &str = "QV_END";

/// Classification of a single stream line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineKind<'a> {
    /// `QV_TAG <tag>` with a well-formed tag.
    Open(&'a str),
    /// `QV_META <term> <value>`.
    Meta { term: &'a str, value: &'a str },
    /// `QV_NOEOL`.
    NoEol,
    /// `QV_END`.
    End,
    /// Starts with the reserved prefix but is not a valid marker.
    Reserved,
    /// Empty line (only meaningful between entries).
    Blank,
    /// Anything else: payload content.
    Content,
}

/// Strip a trailing `\n` and an optional `\r` before it.
fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Classify one line of a stream. Pure; the line may or may not carry its
/// trailing newline.
pub fn classify(line: &[u8]) -> LineKind<'_> {
    let body = trim_eol(line);
    if body.is_empty() {
        return LineKind::Blank;
    }
    if !body.starts_with(RESERVED_PREFIX) {
        return LineKind::Content;
    }
    let Ok(text) = std::str::from_utf8(body) else {
        return LineKind::Reserved;
    };
    let (keyword, rest) = match text.split_once(' ') {
        Some((keyword, rest)) => (keyword, rest),
        None => (text, ""),
    };
    match keyword {
        TAG_MARKER => {
            let tag = rest.trim();
            if is_valid_tag(tag) {
                LineKind::Open(tag)
            } else {
                LineKind::Reserved
            }
        }
        META_MARKER => {
            let (term, value) = rest.split_once(' ').unwrap_or((rest, ""));
            if term.is_empty() || term.chars().any(char::is_whitespace) {
                LineKind::Reserved
            } else {
                LineKind::Meta { term, value }
            }
        }
        NO_EOL_MARKER if rest.trim().is_empty() => LineKind::NoEol,
        END_MARKER if rest.trim().is_empty() => LineKind::End,
        _ => LineKind::Reserved,
    }
}

/// Returns the tag if `line` is an entry open marker.
pub fn parse_entry_header(line: &[u8]) -> Option<&str> {
    match classify(line) {
        LineKind::Open(tag) => Some(tag),
        _ => None,
    }
}

/// Returns true if `line` closes an entry.
pub fn is_terminator(line: &[u8]) -> bool {
    matches!(classify(line), LineKind::End)
}

/// Returns `(term, value)` if `line` is a metadata line.
pub fn parse_meta_line(line: &[u8]) -> Option<(&str, &str)> {
    match classify(line) {
        LineKind::Meta { term, value } => Some((term, value)),
        _ => None,
    }
}

pub fn is_no_eol_marker(line: &[u8]) -> bool {
    matches!(classify(line), LineKind::NoEol)
}

/// True for any line that a payload must not contain.
pub fn is_reserved(line: &[u8]) -> bool {
    line.starts_with(RESERVED_PREFIX)
}

/// Tags name extracted files, so besides being non-empty and free of
/// whitespace they must be a single path component.
pub fn is_valid_tag(tag: &str) -> bool {
    is_valid_term(tag) && tag != "." && tag != ".." && !tag.contains(['/', '\\'])
}

fn is_valid_term(term: &str) -> bool {
    !term.is_empty() && !term.chars().any(char::is_whitespace)
}

pub fn validate_tag(tag: &str) -> QuiverResult<()> {
    if is_valid_tag(tag) {
        Ok(())
    } else {
        Err(QuiverError::InvalidTag(tag.to_string()))
    }
}

pub(crate) fn open_line(tag: &str) -> String {
    format!("{TAG_MARKER} {tag}\n")
}

pub(crate) fn meta_line(term: &str, value: &MetaValue) -> String {
    format!("{META_MARKER} {term} {value}\n")
}

/// A metadata scalar, kept in the exact textual form it was written with.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MetaValue(String);

impl MetaValue {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric view of the value, if it parses as a float.
    pub fn as_f64(&self) -> Option<f64> {
        self.0.trim().parse().ok()
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        Self(value.to_string())
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

/// Ordered term -> value mapping attached to one entry.
///
/// Terms keep the position of their first insertion; re-inserting a term
/// replaces its value in place.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    terms: Vec<(String, MetaValue)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a term. Returns the previous value, if any.
    pub fn insert(
        &mut self,
        term: impl Into<String>,
        value: impl Into<MetaValue>,
    ) -> Option<MetaValue> {
        let term = term.into();
        let value = value.into();
        match self.terms.iter_mut().find(|(t, _)| *t == term) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.terms.push((term, value));
                None
            }
        }
    }

    pub fn get(&self, term: &str) -> Option<&MetaValue> {
        self.terms
            .iter()
            .find(|(t, _)| t == term)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.terms.iter().map(|(t, v)| (t.as_str(), v))
    }

    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(|(t, _)| t.as_str())
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Check that every term and value can be written as a `QV_META` line.
    pub fn validate(&self) -> QuiverResult<()> {
        for (term, value) in &self.terms {
            if !is_valid_term(term) {
                return Err(QuiverError::InvalidMetadata {
                    term: term.clone(),
                    reason: "terms must be non-empty and contain no whitespace".into(),
                });
            }
            if value.0.contains(['\n', '\r']) {
                return Err(QuiverError::InvalidMetadata {
                    term: term.clone(),
                    reason: "values must not contain line breaks".into(),
                });
            }
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<MetaValue>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Metadata::new();
        for (term, value) in iter {
            metadata.insert(term, value);
        }
        metadata
    }
}

/// One packed item: a tag, an opaque payload, and its metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub tag: String,
    /// Exact bytes of the source file.
    pub payload: Vec<u8>,
    pub metadata: Metadata,
}

impl Entry {
    pub fn new(tag: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            tag: tag.into(),
            payload: payload.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Read a file into an entry tagged with the file's stem.
    pub fn from_file(path: &Path) -> QuiverResult<Self> {
        let tag = tag_for_path(path)?;
        let payload = std::fs::read(path)?;
        Ok(Self::new(tag, payload))
    }
}

/// The tag a source file is packed under: its file stem.
pub fn tag_for_path(path: &Path) -> QuiverResult<&str> {
    let tag = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| QuiverError::InvalidTag(path.display().to_string()))?;
    validate_tag(tag)?;
    Ok(tag)
}

/// Half-open byte range `[start, end)` covering a whole entry, open marker
/// through terminator line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntrySpan {
    pub start: u64,
    pub end: u64,
}

impl EntrySpan {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}
