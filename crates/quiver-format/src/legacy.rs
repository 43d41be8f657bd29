//! Conversion of unterminated legacy streams.
//!
//! Older tooling wrote entries as a `QV_TAG <tag>` line, an optional
//! `QV_SCORE <tag> k=v|k=v` line, and payload up to the next `QV_TAG`, with
//! no terminator. Such streams are not concatenation safe, so they are only
//! read here, to be rewritten in the current grammar.

use std::io::{BufRead, Write};

use tracing::{debug, warn};

use crate::entry::{classify, Entry, LineKind, MetaValue, Metadata};
use crate::error::{QuiverError, QuiverResult};
use crate::writer::QuiverWriter;

const SCORE_MARKER: &[u8] = b"QV_SCORE";

/// Parse the `k=v|k=v` body of a legacy score line.
pub fn parse_score_fields(body: &str) -> QuiverResult<Metadata> {
    let mut metadata = Metadata::new();
    for pair in body.split('|').map(str::trim).filter(|p| !p.is_empty()) {
        let (term, value) = pair
            .split_once('=')
            .ok_or_else(|| QuiverError::InvalidMetadata {
                term: pair.to_string(),
                reason: "expected term=value".into(),
            })?;
        metadata.insert(term.trim(), MetaValue::from(value.trim()));
    }
    metadata.validate()?;
    Ok(metadata)
}

/// Returns `(tag, fields)` for a `QV_SCORE` line.
fn score_line(line: &[u8]) -> Option<(&str, &str)> {
    let rest = line.strip_prefix(SCORE_MARKER)?;
    if !rest.is_empty() && !rest[0].is_ascii_whitespace() {
        return None;
    }
    let text = std::str::from_utf8(rest).ok()?.trim();
    Some(text.split_once(char::is_whitespace).unwrap_or((text, "")))
}

/// Read a legacy stream and write every entry through `writer`.
///
/// Returns the number of entries converted. Lines already in the current
/// grammar (`QV_META`, `QV_NOEOL`, `QV_END`) are rejected: the input is not
/// a legacy stream.
pub fn upgrade_legacy<R: BufRead, W: Write>(
    mut reader: R,
    writer: &mut QuiverWriter<W>,
) -> QuiverResult<usize> {
    let mut current: Option<Entry> = None;
    let mut converted = 0;
    let mut line = Vec::new();
    let mut line_no = 0u64;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        line_no += 1;

        if let Some((tag, fields)) = score_line(&line) {
            let entry = current
                .as_mut()
                .ok_or_else(|| QuiverError::malformed(line_no, "score line outside an entry"))?;
            if tag != entry.tag {
                warn!(line = line_no, entry = %entry.tag, score_tag = tag, "score line names another tag");
            }
            for (term, value) in parse_score_fields(fields)?.iter() {
                entry.metadata.insert(term, value.clone());
            }
            continue;
        }

        match classify(&line) {
            LineKind::Open(tag) => {
                if let Some(done) = current.replace(Entry::new(tag, Vec::new())) {
                    writer.append(&done)?;
                    converted += 1;
                    debug!(tag = %done.tag, "legacy entry converted");
                }
            }
            LineKind::Meta { .. } | LineKind::NoEol | LineKind::End => {
                return Err(QuiverError::malformed(
                    line_no,
                    "stream is already in the terminated format",
                ));
            }
            LineKind::Blank if current.is_none() => {}
            _ => match current.as_mut() {
                Some(entry) => entry.payload.extend_from_slice(&line),
                None => {
                    return Err(QuiverError::malformed(line_no, "content before the first tag"))
                }
            },
        }
    }

    if let Some(done) = current {
        writer.append(&done)?;
        converted += 1;
    }
    writer.flush()?;
    Ok(converted)
}
