//! Quiver: a line-oriented container for many tagged text payloads in one
//! file.
//!
//! Each entry is a tag, an opaque payload, and an ordered set of metadata
//! terms, delimited by reserved marker lines. Streams carry no header,
//! footer, or count, so concatenating valid streams yields a valid stream.
//!
//! # Architecture
//!
//! - **entry**: the entry model and line grammar
//! - **EntryReader**: forward-only streaming parser, one entry in memory
//! - **TagIndex**: tag to byte-span map for random access and slicing
//! - **QuiverWriter**: serializer that refuses unrepresentable payloads
//! - **compose**: build, append, extract, slice, split, and atomic rename
//! - **ScoreTable**: union-of-terms projection of entry metadata
//! - **legacy**: conversion of unterminated streams from older tooling

pub mod compose;
pub mod config;
pub mod entry;
pub mod error;
pub mod index;
pub mod legacy;
pub mod reader;
pub mod scores;
pub mod writer;

pub use compose::{ExtractReport, SliceReport};
pub use config::QuiverConfig;
pub use entry::{Entry, EntrySpan, MetaValue, Metadata};
pub use error::{QuiverError, QuiverResult};
pub use index::{DuplicatePolicy, TagIndex};
pub use legacy::upgrade_legacy;
pub use reader::{list_tags, read_all, EntryReader, ParsedEntry, ScanMode};
pub use scores::ScoreTable;
pub use writer::QuiverWriter;
