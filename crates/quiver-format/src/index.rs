use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entry::{Entry, EntrySpan};
use crate::error::{QuiverError, QuiverResult};
use crate::reader::{EntryReader, ScanMode};

/// What to do when a requested tag names more than one entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Fail with [`QuiverError::AmbiguousTag`].
    #[default]
    Error,
    /// Take the earliest entry in stream order.
    First,
    /// Take every matching entry, in stream order.
    All,
}

/// Tag -> byte ranges of one stream, built by a single forward scan.
///
/// Never persisted; rebuild it for every stream you open.
#[derive(Clone, Debug, Default)]
pub struct TagIndex {
    spans: HashMap<String, Vec<EntrySpan>>,
    order: Vec<String>,
}

impl TagIndex {
    /// Scan a stream once, recording the span of every entry.
    pub fn build<R: BufRead>(reader: R) -> QuiverResult<Self> {
        let mut index = Self::default();
        let mut entries = EntryReader::new(reader, ScanMode::Headers);
        while let Some(parsed) = entries.next_entry()? {
            index
                .spans
                .entry(parsed.entry.tag.clone())
                .or_default()
                .push(parsed.span);
            index.order.push(parsed.entry.tag);
        }
        debug!(
            entries = index.order.len(),
            tags = index.spans.len(),
            "tag index built"
        );
        Ok(index)
    }

    /// Every span recorded for `tag`, in stream order.
    pub fn lookup(&self, tag: &str) -> &[EntrySpan] {
        self.spans.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolve a tag to the spans selected by `policy`.
    pub fn resolve(&self, tag: &str, policy: DuplicatePolicy) -> QuiverResult<&[EntrySpan]> {
        let spans = self.lookup(tag);
        match (spans.len(), policy) {
            (0, _) => Err(QuiverError::UnknownTag(tag.to_string())),
            (1, _) | (_, DuplicatePolicy::All) => Ok(spans),
            (_, DuplicatePolicy::First) => Ok(&spans[..1]),
            (count, DuplicatePolicy::Error) => Err(QuiverError::AmbiguousTag {
                tag: tag.to_string(),
                count,
            }),
        }
    }

    /// Tags in stream order, duplicates included.
    pub fn tags(&self) -> &[String] {
        &self.order
    }

    /// Number of entries (not distinct tags).
    pub fn entry_count(&self) -> usize {
        self.order.len()
    }

    /// Tags that occur more than once.
    pub fn duplicates(&self) -> Vec<&str> {
        let mut duplicates: Vec<&str> = self
            .spans
            .iter()
            .filter(|(_, spans)| spans.len() > 1)
            .map(|(tag, _)| tag.as_str())
            .collect();
        duplicates.sort_unstable();
        duplicates
    }
}

/// Copy one entry's bytes verbatim from a seekable source.
pub fn copy_span<R: Read + Seek, W: Write>(
    src: &mut R,
    span: EntrySpan,
    dst: &mut W,
) -> QuiverResult<u64> {
    src.seek(SeekFrom::Start(span.start))?;
    let copied = io::copy(&mut src.by_ref().take(span.len()), dst)?;
    if copied != span.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("stream ended inside entry at byte {}", span.start),
        )
        .into());
    }
    Ok(copied)
}

/// Read the bytes of one span into memory.
pub fn read_span<R: Read + Seek>(src: &mut R, span: EntrySpan) -> QuiverResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(span.len() as usize);
    copy_span(src, span, &mut buf)?;
    Ok(buf)
}

/// Decode the single entry located at `span`.
pub fn read_entry_at<R: Read + Seek>(src: &mut R, span: EntrySpan) -> QuiverResult<Entry> {
    src.seek(SeekFrom::Start(span.start))?;
    let limited = BufReader::new(src.by_ref().take(span.len()));
    let mut reader = EntryReader::new(limited, ScanMode::Payloads);
    match reader.next_entry()? {
        Some(parsed) => Ok(parsed.entry),
        None => Err(QuiverError::malformed(
            0,
            format!("no entry at byte range {}..{}", span.start, span.end),
        )),
    }
}
