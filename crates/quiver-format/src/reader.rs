use std::io::BufRead;

use tracing::debug;

use crate::entry::{classify, Entry, EntrySpan, LineKind, Metadata};
use crate::error::{QuiverError, QuiverResult};

/// How much of each entry the reader keeps in memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanMode {
    /// Tag, metadata and span only; payload bytes are discarded as read.
    Headers,
    /// Also buffer the payload of the current entry.
    Payloads,
    /// Also keep the raw bytes of the whole entry, markers included.
    Verbatim,
}

/// An entry as produced by [`EntryReader`].
#[derive(Clone, Debug)]
pub struct ParsedEntry {
    /// In [`ScanMode::Headers`] the payload is left empty.
    pub entry: Entry,
    pub span: EntrySpan,
    /// Payload size in bytes, known in every mode.
    pub payload_len: u64,
    /// Raw entry bytes, only in [`ScanMode::Verbatim`].
    pub raw: Option<Vec<u8>>,
}

/// Forward-only, single-pass reader turning a byte stream into entries.
///
/// Holds at most one entry in memory. After the first error the iterator
/// is exhausted; re-reading requires a fresh reader.
pub struct EntryReader<R> {
    reader: R,
    mode: ScanMode,
    offset: u64,
    line_no: u64,
    line: Vec<u8>,
    done: bool,
}

impl<R: BufRead> EntryReader<R> {
    pub fn new(reader: R, mode: ScanMode) -> Self {
        Self {
            reader,
            mode,
            offset: 0,
            line_no: 0,
            line: Vec::new(),
            done: false,
        }
    }

    /// Byte offset of the next unread byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    fn read_line(&mut self) -> QuiverResult<usize> {
        self.line.clear();
        let n = self.reader.read_until(b'\n', &mut self.line)?;
        if n > 0 {
            self.offset += n as u64;
            self.line_no += 1;
        }
        Ok(n)
    }

    /// Read the next complete entry, or `None` at a clean end of stream.
    pub fn next_entry(&mut self) -> QuiverResult<Option<ParsedEntry>> {
        let (tag, start) = loop {
            let start = self.offset;
            if self.read_line()? == 0 {
                return Ok(None);
            }
            let reason = match classify(&self.line) {
                LineKind::Blank if self.line.ends_with(b"\n") => continue,
                LineKind::Blank => "stream does not end with a newline",
                LineKind::Open(tag) => break (tag.to_string(), start),
                LineKind::End => "QV_END without a matching QV_TAG",
                LineKind::Meta { .. } | LineKind::NoEol => "marker outside of an entry",
                LineKind::Reserved => "unrecognised marker line",
                LineKind::Content => "content outside of an entry",
            };
            return Err(QuiverError::malformed(self.line_no, reason));
        };

        let keep_payload = self.mode != ScanMode::Headers;
        let mut raw = (self.mode == ScanMode::Verbatim).then(|| self.line.clone());
        let mut payload = Vec::new();
        let mut payload_len = 0u64;
        let mut metadata = Metadata::new();
        let mut in_metadata = false;
        let mut no_eol = false;

        loop {
            if self.read_line()? == 0 {
                return Err(QuiverError::malformed(
                    self.line_no,
                    format!("entry {tag} is not terminated before end of stream"),
                ));
            }
            if let Some(raw) = raw.as_mut() {
                raw.extend_from_slice(&self.line);
            }
            match classify(&self.line) {
                LineKind::End if self.line.ends_with(b"\n") => break,
                LineKind::End => {
                    return Err(QuiverError::malformed(
                        self.line_no,
                        format!("QV_END of entry {tag} is not followed by a newline"),
                    ));
                }
                LineKind::Open(next) => {
                    return Err(QuiverError::malformed(
                        self.line_no,
                        format!("entry {tag} is not terminated before QV_TAG {next}"),
                    ));
                }
                LineKind::Meta { term, value } => {
                    in_metadata = true;
                    metadata.insert(term, value);
                }
                LineKind::NoEol => {
                    if in_metadata || no_eol || payload_len == 0 {
                        return Err(QuiverError::malformed(
                            self.line_no,
                            format!("misplaced QV_NOEOL in entry {tag}"),
                        ));
                    }
                    no_eol = true;
                }
                LineKind::Reserved => {
                    return Err(QuiverError::malformed(
                        self.line_no,
                        format!("unrecognised marker line in entry {tag}"),
                    ));
                }
                LineKind::Blank | LineKind::Content => {
                    if in_metadata || no_eol {
                        return Err(QuiverError::malformed(
                            self.line_no,
                            format!("payload line after metadata in entry {tag}"),
                        ));
                    }
                    payload_len += self.line.len() as u64;
                    if keep_payload {
                        payload.extend_from_slice(&self.line);
                    }
                }
            }
        }

        if no_eol {
            // The writer appended exactly one '\n' before QV_NOEOL.
            payload_len -= 1;
            if keep_payload {
                payload.pop();
            }
        }

        let span = EntrySpan {
            start,
            end: self.offset,
        };
        debug!(tag = %tag, start, end = span.end, payload_len, "parsed entry");

        Ok(Some(ParsedEntry {
            entry: Entry {
                tag,
                payload,
                metadata,
            },
            span,
            payload_len,
            raw,
        }))
    }
}

impl<R: BufRead> Iterator for EntryReader<R> {
    type Item = QuiverResult<ParsedEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Parse every entry of a stream, payloads included.
pub fn read_all<R: BufRead>(reader: R) -> QuiverResult<Vec<Entry>> {
    EntryReader::new(reader, ScanMode::Payloads)
        .map(|parsed| parsed.map(|p| p.entry))
        .collect()
}

/// Tags of every entry, in stream order.
pub fn list_tags<R: BufRead>(reader: R) -> QuiverResult<Vec<String>> {
    EntryReader::new(reader, ScanMode::Headers)
        .map(|parsed| parsed.map(|p| p.entry.tag))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO: &[u8] = b"QV_TAG a\nATOM 1\nATOM 2\nQV_META score 1.5\nQV_END\nQV_TAG b\nATOM 3\nQV_END\n";

    fn parse(data: &[u8], mode: ScanMode) -> QuiverResult<Vec<ParsedEntry>> {
        EntryReader::new(data, mode).collect()
    }

    fn malformed_line(result: QuiverResult<Vec<ParsedEntry>>) -> u64 {
        match result {
            Err(QuiverError::MalformedStream { line, .. }) => line,
            other => panic!("expected malformed stream, got {other:?}"),
        }
    }

    #[test]
    fn parses_entries_with_payload_and_metadata() {
        let entries = parse(TWO, ScanMode::Payloads).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entry.tag, "a");
        assert_eq!(entries[0].entry.payload, b"ATOM 1\nATOM 2\n");
        assert_eq!(entries[0].entry.metadata.get("score").unwrap().as_str(), "1.5");
        assert_eq!(entries[1].entry.tag, "b");
        assert_eq!(entries[1].entry.payload, b"ATOM 3\n");
        assert!(entries[1].entry.metadata.is_empty());
    }

    #[test]
    fn spans_cover_whole_entries() {
        let entries = parse(TWO, ScanMode::Headers).unwrap();
        assert_eq!(entries[0].span.start, 0);
        assert_eq!(entries[0].span.end, entries[1].span.start);
        assert_eq!(entries[1].span.end, TWO.len() as u64);
        let first = &TWO[entries[0].span.start as usize..entries[0].span.end as usize];
        assert!(first.starts_with(b"QV_TAG a\n"));
        assert!(first.ends_with(b"QV_END\n"));
    }

    #[test]
    fn headers_mode_discards_payload_but_counts_it() {
        let entries = parse(TWO, ScanMode::Headers).unwrap();
        assert!(entries[0].entry.payload.is_empty());
        assert_eq!(entries[0].payload_len, 14);
        assert!(entries[0].raw.is_none());
    }

    #[test]
    fn verbatim_mode_keeps_raw_bytes() {
        let entries = parse(TWO, ScanMode::Verbatim).unwrap();
        let raw = entries[1].raw.as_ref().unwrap();
        assert_eq!(raw.as_slice(), b"QV_TAG b\nATOM 3\nQV_END\n");
    }

    #[test]
    fn empty_stream_has_no_entries() {
        assert!(parse(b"", ScanMode::Payloads).unwrap().is_empty());
        assert!(parse(b"\n\n", ScanMode::Payloads).unwrap().is_empty());
    }

    #[test]
    fn blank_lines_between_entries_are_skipped() {
        let data = b"QV_TAG a\nx\nQV_END\n\nQV_TAG b\ny\nQV_END\n\n";
        let tags = list_tags(&data[..]).unwrap();
        assert_eq!(tags, vec!["a", "b"]);
    }

    #[test]
    fn blank_lines_inside_payload_are_kept() {
        let data = b"QV_TAG a\nx\n\ny\nQV_END\n";
        let entries = read_all(&data[..]).unwrap();
        assert_eq!(entries[0].payload, b"x\n\ny\n");
    }

    #[test]
    fn no_eol_marker_restores_missing_newline() {
        let data = b"QV_TAG a\nATOM 1\nEND\nQV_NOEOL\nQV_META k v\nQV_END\n";
        let entries = parse(data, ScanMode::Payloads).unwrap();
        assert_eq!(entries[0].entry.payload, b"ATOM 1\nEND");
        assert_eq!(entries[0].payload_len, 10);
    }

    #[test]
    fn terminator_without_newline_at_eof_is_malformed() {
        let line = malformed_line(parse(b"QV_TAG a\nx\nQV_END", ScanMode::Headers));
        assert_eq!(line, 3);
    }

    #[test]
    fn stream_accepted_alone_stays_valid_when_concatenated() {
        let first = b"QV_TAG a\nx\nQV_END";
        let second = b"QV_TAG b\ny\nQV_END\n";
        assert!(list_tags(&first[..]).is_err());
        assert_eq!(list_tags(&second[..]).unwrap(), vec!["b"]);
        assert!(list_tags([&first[..], &second[..]].concat().as_slice()).is_err());
    }

    #[test]
    fn trailing_carriage_return_without_newline_is_malformed() {
        let line = malformed_line(parse(b"QV_TAG a\nQV_END\n\r", ScanMode::Headers));
        assert_eq!(line, 3);
    }

    #[test]
    fn unterminated_entry_at_eof_is_malformed() {
        let line = malformed_line(parse(b"QV_TAG a\nATOM 1\n", ScanMode::Headers));
        assert_eq!(line, 2);
    }

    #[test]
    fn open_marker_inside_entry_is_malformed() {
        let line = malformed_line(parse(b"QV_TAG a\nATOM\nQV_TAG b\nQV_END\n", ScanMode::Headers));
        assert_eq!(line, 3);
    }

    #[test]
    fn unmatched_terminator_is_malformed() {
        let line = malformed_line(parse(b"QV_TAG a\nQV_END\nQV_END\n", ScanMode::Headers));
        assert_eq!(line, 3);
    }

    #[test]
    fn content_outside_entry_is_malformed() {
        malformed_line(parse(b"ATOM 1\nQV_TAG a\nQV_END\n", ScanMode::Headers));
    }

    #[test]
    fn payload_after_metadata_is_malformed() {
        malformed_line(parse(b"QV_TAG a\nQV_META k v\nATOM\nQV_END\n", ScanMode::Headers));
    }

    #[test]
    fn unknown_marker_inside_entry_is_malformed() {
        malformed_line(parse(b"QV_TAG a\nQV_BOGUS\nQV_END\n", ScanMode::Headers));
    }

    #[test]
    fn misplaced_no_eol_is_malformed() {
        malformed_line(parse(b"QV_TAG a\nQV_NOEOL\nQV_END\n", ScanMode::Headers));
        malformed_line(parse(b"QV_TAG a\nx\nQV_META k v\nQV_NOEOL\nQV_END\n", ScanMode::Headers));
    }

    #[test]
    fn iterator_stops_after_error() {
        let mut reader = EntryReader::new(&b"QV_TAG a\nQV_END\nQV_END\nQV_TAG b\nQV_END\n"[..], ScanMode::Headers);
        assert!(reader.next().unwrap().is_ok());
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }

    #[test]
    fn duplicate_tags_are_legal() {
        let tags = list_tags(&b"QV_TAG a\nQV_END\nQV_TAG a\nQV_END\n"[..]).unwrap();
        assert_eq!(tags, vec!["a", "a"]);
    }
}
