use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuiverError {
    #[error("malformed quiver stream at line {line}: {reason}")]
    MalformedStream { line: u64, reason: String },

    #[error("tag count mismatch: stream has {expected} entries, {actual} new tags supplied")]
    TagCountMismatch { expected: usize, actual: usize },

    #[error("tag {tag} matches {count} entries; choose the first match or all matches")]
    AmbiguousTag { tag: String, count: usize },

    #[error("tag not found in stream: {0}")]
    UnknownTag(String),

    #[error("payload of {tag} collides with a reserved marker at line {line}")]
    MarkerCollision { tag: String, line: usize },

    #[error("invalid tag {0:?}: tags must be non-empty single path components without whitespace")]
    InvalidTag(String),

    #[error("invalid metadata term {term:?}: {reason}")]
    InvalidMetadata { term: String, reason: String },

    #[error("duplicate tag: {0}")]
    DuplicateTag(String),

    #[error("batch size must be a positive integer")]
    InvalidBatchSize,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("score table error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type QuiverResult<T> = Result<T, QuiverError>;

impl QuiverError {
    pub(crate) fn malformed(line: u64, reason: impl Into<String>) -> Self {
        Self::MalformedStream {
            line,
            reason: reason.into(),
        }
    }
}
