//! Tabular projection of per-entry metadata.
//!
//! Entries carry arbitrary, entry-specific term sets. The table's columns are
//! the union of all terms in first-seen order, after a leading `tag` column;
//! cells an entry does not define are reported as missing, never dropped.

use std::collections::HashSet;
use std::io::{BufRead, Write};

use crate::entry::{MetaValue, Metadata};
use crate::error::QuiverResult;
use crate::reader::{EntryReader, ScanMode};

/// Name of the leading column holding each entry's tag.
pub const TAG_COLUMN: &str = "tag";

#[derive(Clone, Debug, Default)]
pub struct ScoreTable {
    columns: Vec<String>,
    known: HashSet<String>,
    entries: Vec<(String, Metadata)>,
}

/// One projected row, aligned to [`ScoreTable::columns`].
#[derive(Clone, Debug, PartialEq)]
pub struct ScoreRow<'a> {
    pub tag: &'a str,
    pub cells: Vec<Option<&'a MetaValue>>,
}

impl ScoreTable {
    pub fn project<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a Metadata)>,
    {
        let mut table = Self::default();
        for (tag, metadata) in entries {
            table.push(tag, metadata.clone());
        }
        table
    }

    /// Project every entry of a stream without buffering payloads.
    pub fn from_reader<R: BufRead>(reader: R) -> QuiverResult<Self> {
        let mut table = Self::default();
        for parsed in EntryReader::new(reader, ScanMode::Headers) {
            let entry = parsed?.entry;
            table.push(&entry.tag, entry.metadata);
        }
        Ok(table)
    }

    fn push(&mut self, tag: &str, metadata: Metadata) {
        for term in metadata.terms() {
            if !self.known.contains(term) {
                self.known.insert(term.to_string());
                self.columns.push(term.to_string());
            }
        }
        self.entries.push((tag.to_string(), metadata));
    }

    /// Metadata term columns, excluding the leading tag column.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Header row: the tag column followed by every term column.
    pub fn header(&self) -> Vec<&str> {
        std::iter::once(TAG_COLUMN)
            .chain(self.columns.iter().map(String::as_str))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if no entry defines any metadata term.
    pub fn has_no_terms(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = ScoreRow<'_>> {
        self.entries.iter().map(|(tag, metadata)| ScoreRow {
            tag,
            cells: self.columns.iter().map(|c| metadata.get(c)).collect(),
        })
    }

    /// Render as delimited text with `missing` in undefined cells.
    pub fn write_delimited<W: Write>(
        &self,
        out: W,
        delimiter: u8,
        missing: &str,
    ) -> QuiverResult<()> {
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(out);
        wtr.write_record(self.header())?;
        for row in self.rows() {
            let record = std::iter::once(row.tag).chain(
                row.cells
                    .iter()
                    .map(|cell| cell.map(MetaValue::as_str).unwrap_or(missing)),
            );
            wtr.write_record(record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(pairs: &[(&str, &str)]) -> Metadata {
        pairs.iter().copied().collect()
    }

    #[test]
    fn union_of_heterogeneous_terms() {
        let first = metadata(&[("a", "1"), ("b", "2")]);
        let second = metadata(&[("b", "3"), ("c", "4")]);
        let table = ScoreTable::project([("t1", &first), ("t2", &second)]);

        assert_eq!(table.header(), vec!["tag", "a", "b", "c"]);
        let rows: Vec<_> = table.rows().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].tag, "t1");
        assert_eq!(rows[0].cells[0].unwrap().as_str(), "1");
        assert_eq!(rows[0].cells[1].unwrap().as_str(), "2");
        assert_eq!(rows[0].cells[2], None);
        assert_eq!(rows[1].cells[0], None);
        assert_eq!(rows[1].cells[1].unwrap().as_str(), "3");
        assert_eq!(rows[1].cells[2].unwrap().as_str(), "4");
    }

    #[test]
    fn column_order_is_first_seen() {
        let first = metadata(&[("z", "1")]);
        let second = metadata(&[("a", "1"), ("z", "2")]);
        let table = ScoreTable::project([("t1", &first), ("t2", &second)]);
        assert_eq!(table.columns(), &["z", "a"]);
    }

    #[test]
    fn repeated_terms_add_one_column_each() {
        let common = metadata(&[("score", "1"), ("rmsd", "2")]);
        let extra = metadata(&[("rmsd", "3"), ("plddt", "90")]);
        let rows = std::iter::repeat(("t", &common))
            .take(500)
            .chain([("u", &extra)]);
        let table = ScoreTable::project(rows);
        assert_eq!(table.columns(), &["score", "rmsd", "plddt"]);
        assert_eq!(table.len(), 501);
    }

    #[test]
    fn renders_tab_separated_with_missing_marker() {
        let first = metadata(&[("a", "1"), ("b", "2")]);
        let second = metadata(&[("b", "3"), ("c", "4")]);
        let table = ScoreTable::project([("t1", &first), ("t2", &second)]);

        let mut out = Vec::new();
        table.write_delimited(&mut out, b'\t', "NaN").unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "tag\ta\tb\tc\nt1\t1\t2\tNaN\nt2\tNaN\t3\t4\n");
    }

    #[test]
    fn entries_without_metadata_still_get_rows() {
        let empty = Metadata::new();
        let scored = metadata(&[("s", "0.5")]);
        let table = ScoreTable::project([("bare", &empty), ("scored", &scored)]);
        assert_eq!(table.len(), 2);
        let mut out = Vec::new();
        table.write_delimited(&mut out, b',', "").unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "tag,s\nbare,\nscored,0.5\n");
    }

    #[test]
    fn from_reader_reads_stream_metadata() {
        let stream = b"QV_TAG a\nx\nQV_META e -1\nQV_END\nQV_TAG b\nQV_META f 2\nQV_END\n";
        let table = ScoreTable::from_reader(&stream[..]).unwrap();
        assert_eq!(table.header(), vec!["tag", "e", "f"]);
        assert!(!table.has_no_terms());
    }
}
