use std::io::Write;

use tracing::debug;

use crate::entry::{
    is_reserved, meta_line, open_line, validate_tag, Entry, END_MARKER, NO_EOL_MARKER,
};
use crate::error::{QuiverError, QuiverResult};

/// Serializes entries into the Quiver grammar.
///
/// Emits no stream header, footer, or index, and always ends every entry
/// with a newline-terminated `QV_END`, so the output of any number of
/// writers can be concatenated into a valid stream.
pub struct QuiverWriter<W: Write> {
    inner: W,
    entries_written: usize,
    bytes_written: u64,
}

impl<W: Write> QuiverWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            entries_written: 0,
            bytes_written: 0,
        }
    }

    /// Validate and write one entry. Nothing is written if validation fails.
    pub fn append(&mut self, entry: &Entry) -> QuiverResult<()> {
        validate_entry(entry)?;

        let mut buf = Vec::with_capacity(entry.payload.len() + 64);
        buf.extend_from_slice(open_line(&entry.tag).as_bytes());
        buf.extend_from_slice(&entry.payload);
        if !entry.payload.is_empty() && !entry.payload.ends_with(b"\n") {
            buf.push(b'\n');
            buf.extend_from_slice(NO_EOL_MARKER.as_bytes());
            buf.push(b'\n');
        }
        for (term, value) in entry.metadata.iter() {
            buf.extend_from_slice(meta_line(term, value).as_bytes());
        }
        buf.extend_from_slice(END_MARKER.as_bytes());
        buf.push(b'\n');

        self.inner.write_all(&buf)?;
        self.entries_written += 1;
        self.bytes_written += buf.len() as u64;
        debug!(tag = %entry.tag, bytes = buf.len(), "entry written");
        Ok(())
    }

    /// Copy the bytes of an already encoded entry verbatim.
    ///
    /// `raw` must be one whole entry as a verbatim scan returns it, ending in
    /// the newline of its `QV_END` line.
    pub fn append_raw(&mut self, raw: &[u8]) -> QuiverResult<()> {
        self.inner.write_all(raw)?;
        self.bytes_written += raw.len() as u64;
        self.entries_written += 1;
        Ok(())
    }

    pub fn entries_written(&self) -> usize {
        self.entries_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn flush(&mut self) -> QuiverResult<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Check that `entry` can be written: a valid tag, writable metadata, and no
/// payload line that would be read back as a marker.
pub fn validate_entry(entry: &Entry) -> QuiverResult<()> {
    validate_tag(&entry.tag)?;
    entry.metadata.validate()?;
    check_payload(entry)
}

fn check_payload(entry: &Entry) -> QuiverResult<()> {
    let collision = entry
        .payload
        .split_inclusive(|&b| b == b'\n')
        .position(is_reserved);
    match collision {
        Some(index) => Err(QuiverError::MarkerCollision {
            tag: entry.tag.clone(),
            line: index + 1,
        }),
        None => Ok(()),
    }
}
