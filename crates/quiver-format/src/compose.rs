//! Stream transforms built on the reader, index and writer: build, append,
//! extract, slice, split and rename.
//!
//! Every file these functions create is first written to a temporary file in
//! the destination directory and then persisted over the final name, so an
//! error never leaves a partially written output behind.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, info, warn};

use crate::entry::{open_line, tag_for_path, validate_tag, Entry, EntrySpan};
use crate::error::{QuiverError, QuiverResult};
use crate::index::{read_entry_at, read_span, DuplicatePolicy, TagIndex};
use crate::reader::{list_tags, EntryReader, ScanMode};
use crate::writer::{validate_entry, QuiverWriter};

/// Files produced by an extraction.
#[derive(Clone, Debug, Default)]
pub struct ExtractReport {
    pub written: Vec<PathBuf>,
    /// Destinations that already existed and were left alone.
    pub skipped: Vec<PathBuf>,
    /// Requested tags with no entry in the stream.
    pub missing: Vec<String>,
}

/// Outcome of a slice.
#[derive(Clone, Debug, Default)]
pub struct SliceReport {
    /// Tags copied, in output order.
    pub written: Vec<String>,
    pub missing: Vec<String>,
}

fn staging_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}

/// Write `dest` through a temporary file next to it.
///
/// The temporary file is removed on every error path; on success it replaces
/// `dest` (or, without `overwrite`, fails if `dest` appeared meanwhile).
pub fn write_atomic<F>(dest: &Path, overwrite: bool, fill: F) -> QuiverResult<()>
where
    F: FnOnce(&mut dyn Write) -> QuiverResult<()>,
{
    let mut tmp = NamedTempFile::new_in(staging_dir(dest))?;
    {
        let mut out = BufWriter::new(&mut tmp);
        fill(&mut out)?;
        out.flush()?;
    }
    tmp.as_file().sync_all()?;
    if let Ok(existing) = fs::metadata(dest) {
        fs::set_permissions(tmp.path(), existing.permissions())?;
    }
    if overwrite {
        tmp.persist(dest).map_err(|e| e.error)?;
    } else {
        tmp.persist_noclobber(dest).map_err(|e| e.error)?;
    }
    Ok(())
}

/// Check every file about to be packed: readable, a unique valid tag, and a
/// payload the writer accepts.
fn check_inputs(paths: &[PathBuf], existing: &HashSet<String>) -> QuiverResult<()> {
    let mut seen = HashSet::new();
    for path in paths {
        let tag = tag_for_path(path)?;
        if existing.contains(tag) || !seen.insert(tag) {
            return Err(QuiverError::DuplicateTag(tag.to_string()));
        }
    }
    for path in paths {
        validate_entry(&Entry::from_file(path)?)?;
    }
    Ok(())
}

/// Pack one entry per file, tagged by file stem, into `writer`.
///
/// Every input is read and validated before the first entry is written, so
/// a bad input leaves `writer` untouched.
pub fn build_stream<W: Write>(
    paths: &[PathBuf],
    writer: &mut QuiverWriter<W>,
) -> QuiverResult<usize> {
    check_inputs(paths, &HashSet::new())?;
    for path in paths {
        writer.append(&Entry::from_file(path)?)?;
    }
    writer.flush()?;
    Ok(paths.len())
}

/// Append files to an existing stream (created if missing).
///
/// The stream is rewritten through a temporary file, so a failure on any
/// input leaves it unchanged. Tags already present are refused.
pub fn append_files(stream: &Path, paths: &[PathBuf]) -> QuiverResult<usize> {
    let existing: HashSet<String> = if stream.exists() {
        list_tags(BufReader::new(File::open(stream)?))?
            .into_iter()
            .collect()
    } else {
        HashSet::new()
    };
    check_inputs(paths, &existing)?;

    write_atomic(stream, true, |out| {
        if stream.exists() {
            io::copy(&mut File::open(stream)?, out)?;
        }
        let mut writer = QuiverWriter::new(out);
        for path in paths {
            writer.append(&Entry::from_file(path)?)?;
        }
        Ok(())
    })?;
    info!(stream = %stream.display(), added = paths.len(), "entries appended");
    Ok(paths.len())
}

/// Destination file for a payload: `<dir>/<tag>.<ext>`.
///
/// The tag must be a valid tag, so the file always lands directly in
/// `out_dir`.
pub fn payload_path(out_dir: &Path, tag: &str, ext: &str) -> QuiverResult<PathBuf> {
    validate_tag(tag)?;
    Ok(if ext.is_empty() {
        out_dir.join(tag)
    } else {
        out_dir.join(format!("{tag}.{ext}"))
    })
}

/// File names handed out during one extraction.
#[derive(Debug, Default)]
struct OutputNames {
    used: HashSet<PathBuf>,
}

impl OutputNames {
    /// `<tag>.<ext>` the first time, then `<tag>_<n>.<ext>` for later entries
    /// that would land on a name already used in this run.
    fn next(&mut self, out_dir: &Path, tag: &str, ext: &str) -> QuiverResult<PathBuf> {
        let mut dest = payload_path(out_dir, tag, ext)?;
        let mut n = 1;
        while !self.used.insert(dest.clone()) {
            dest = payload_path(out_dir, &format!("{tag}_{n}"), ext)?;
            n += 1;
        }
        Ok(dest)
    }
}

fn write_payload(
    entry: &Entry,
    dest: PathBuf,
    overwrite: bool,
    report: &mut ExtractReport,
) -> QuiverResult<()> {
    if !overwrite && dest.exists() {
        warn!(path = %dest.display(), "output exists; skipping");
        report.skipped.push(dest);
        return Ok(());
    }
    write_atomic(&dest, overwrite, |out| {
        out.write_all(&entry.payload)?;
        Ok(())
    })?;
    debug!(tag = %entry.tag, path = %dest.display(), "payload extracted");
    report.written.push(dest);
    Ok(())
}

/// Write every payload of a stream to `<out_dir>/<tag>.<ext>`.
///
/// Later entries of a repeated tag are written as `<tag>_<n>.<ext>`. Files
/// written before an error are kept.
pub fn extract_all<R: BufRead>(
    reader: R,
    out_dir: &Path,
    ext: &str,
    overwrite: bool,
) -> QuiverResult<ExtractReport> {
    fs::create_dir_all(out_dir)?;
    let mut report = ExtractReport::default();
    let mut names = OutputNames::default();
    for parsed in EntryReader::new(reader, ScanMode::Payloads) {
        let entry = parsed?.entry;
        let dest = names.next(out_dir, &entry.tag, ext)?;
        write_payload(&entry, dest, overwrite, &mut report)?;
    }
    Ok(report)
}

/// Requested tags, trimmed, without blanks, first occurrence kept.
pub fn unique_tags(tags: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    tags.iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty() && seen.insert(*t))
        .collect()
}

/// Resolve every requested tag up front.
///
/// Unknown tags are collected into `missing`; an ambiguous tag aborts before
/// any output is produced.
fn resolve_all<'a>(
    index: &'a TagIndex,
    tags: &'a [String],
    policy: DuplicatePolicy,
    missing: &mut Vec<String>,
) -> QuiverResult<Vec<(&'a str, &'a [EntrySpan])>> {
    let mut selected = Vec::new();
    for tag in unique_tags(tags) {
        match index.resolve(tag, policy) {
            Ok(spans) => selected.push((tag, spans)),
            Err(QuiverError::UnknownTag(tag)) => {
                warn!(tag = %tag, "tag not found in stream; skipping");
                missing.push(tag);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(selected)
}

/// Extract the payloads of the requested tags using random access.
///
/// With [`DuplicatePolicy::All`], later duplicates are written as
/// `<tag>_<n>.<ext>`.
pub fn extract_tags<R: Read + Seek>(
    src: &mut R,
    index: &TagIndex,
    tags: &[String],
    out_dir: &Path,
    ext: &str,
    policy: DuplicatePolicy,
    overwrite: bool,
) -> QuiverResult<ExtractReport> {
    let mut report = ExtractReport::default();
    let selected = resolve_all(index, tags, policy, &mut report.missing)?;
    fs::create_dir_all(out_dir)?;
    let mut names = OutputNames::default();
    for (tag, spans) in selected {
        for span in spans {
            let entry = read_entry_at(src, *span)?;
            let dest = names.next(out_dir, tag, ext)?;
            write_payload(&entry, dest, overwrite, &mut report)?;
        }
    }
    Ok(report)
}

/// Copy the requested entries, in request order, into a new stream.
///
/// Entries are copied byte for byte from the source. Fails with
/// [`QuiverError::UnknownTag`] if none of the tags exist.
pub fn slice<R: Read + Seek, W: Write>(
    src: &mut R,
    index: &TagIndex,
    tags: &[String],
    policy: DuplicatePolicy,
    writer: &mut QuiverWriter<W>,
) -> QuiverResult<SliceReport> {
    let mut report = SliceReport::default();
    let selected = resolve_all(index, tags, policy, &mut report.missing)?;
    if selected.is_empty() {
        if let Some(first) = report.missing.first() {
            return Err(QuiverError::UnknownTag(first.clone()));
        }
        return Ok(report);
    }
    for (tag, spans) in selected {
        for span in spans {
            let raw = read_span(src, *span)?;
            writer.append_raw(&raw)?;
        }
        report.written.push(tag.to_string());
    }
    writer.flush()?;
    Ok(report)
}

type Piece = QuiverWriter<BufWriter<NamedTempFile>>;

fn finish_piece(writer: Piece) -> QuiverResult<TempPath> {
    let count = writer.entries_written();
    let tmp = writer.into_inner().into_inner().map_err(|e| e.into_error())?;
    tmp.as_file().sync_all()?;
    debug!(path = %tmp.path().display(), entries = count, "split piece staged");
    Ok(tmp.into_temp_path())
}

/// Digits used to number `pieces` split outputs: at least three, and enough
/// for every number to have the same width so names sort in piece order.
pub fn piece_number_width(pieces: usize) -> usize {
    pieces.saturating_sub(1).to_string().len().max(3)
}

/// Split a stream into pieces of at most `batch` entries each, written as
/// `<out_dir>/<prefix>_NNN.qv` in input order.
///
/// Pieces are staged as temporary files and only named once the whole
/// stream has parsed, so a malformed stream leaves no pieces behind.
pub fn split<R: BufRead>(
    reader: R,
    batch: usize,
    out_dir: &Path,
    prefix: &str,
) -> QuiverResult<Vec<PathBuf>> {
    if batch == 0 {
        return Err(QuiverError::InvalidBatchSize);
    }
    fs::create_dir_all(out_dir)?;

    let mut staged = Vec::new();
    let mut current: Option<Piece> = None;
    for (i, parsed) in EntryReader::new(reader, ScanMode::Verbatim).enumerate() {
        let parsed = parsed?;
        if i % batch == 0 {
            if let Some(piece) = current.take() {
                staged.push(finish_piece(piece)?);
            }
            current = Some(QuiverWriter::new(BufWriter::new(NamedTempFile::new_in(out_dir)?)));
        }
        if let Some(writer) = current.as_mut() {
            let raw = parsed.raw.expect("verbatim scan keeps raw bytes");
            writer.append_raw(&raw)?;
        }
    }
    if let Some(piece) = current.take() {
        staged.push(finish_piece(piece)?);
    }

    let width = piece_number_width(staged.len());
    let mut pieces = Vec::with_capacity(staged.len());
    for (number, tmp) in staged.into_iter().enumerate() {
        let path = out_dir.join(format!("{prefix}_{number:0width$}.qv"));
        tmp.persist(&path).map_err(|e| e.error)?;
        pieces.push(path);
    }
    info!(pieces = pieces.len(), batch, "stream split");
    Ok(pieces)
}

/// Replace every entry's tag, positionally, rewriting the file atomically.
///
/// Payload and metadata bytes are copied unchanged. On any failure the
/// original file is left exactly as it was.
pub fn rename_in_place(path: &Path, new_tags: &[String]) -> QuiverResult<usize> {
    let count = EntryReader::new(BufReader::new(File::open(path)?), ScanMode::Headers)
        .try_fold(0usize, |n, parsed| parsed.map(|_| n + 1))?;
    if count != new_tags.len() {
        return Err(QuiverError::TagCountMismatch {
            expected: count,
            actual: new_tags.len(),
        });
    }
    let mut seen = HashSet::new();
    for tag in new_tags {
        validate_tag(tag)?;
        if !seen.insert(tag.as_str()) {
            return Err(QuiverError::DuplicateTag(tag.clone()));
        }
    }

    write_atomic(path, true, |out| {
        let reader = EntryReader::new(BufReader::new(File::open(path)?), ScanMode::Verbatim);
        let mut writer = QuiverWriter::new(out);
        for (parsed, new_tag) in reader.zip(new_tags) {
            let parsed = parsed?;
            let raw = parsed.raw.expect("verbatim scan keeps raw bytes");
            let body = raw
                .iter()
                .position(|&b| b == b'\n')
                .map_or(raw.len(), |i| i + 1);
            let mut renamed = open_line(new_tag).into_bytes();
            renamed.extend_from_slice(&raw[body..]);
            writer.append_raw(&renamed)?;
            debug!(from = %parsed.entry.tag, to = %new_tag, "entry renamed");
        }
        if writer.entries_written() != count {
            return Err(QuiverError::TagCountMismatch {
                expected: writer.entries_written(),
                actual: count,
            });
        }
        Ok(())
    })?;
    info!(path = %path.display(), entries = count, "tags renamed");
    Ok(count)
}
