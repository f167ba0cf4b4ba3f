/// Crate-wide error type
///
/// Mirrors the error kinds every index agrees on: malformed input is never
/// represented here (callers skip and log, they don't construct an error for
/// it) — this type exists for the kinds that actually cross an API boundary.
use std::fmt;

#[derive(Debug)]
pub enum IndexError {
    /// KV-store I/O failure. The caller must abort the whole batch.
    Io(rocksdb::Error),
    /// A stored record failed to deserialize (corruption or format drift).
    Corrupt(String),
    /// Caller exceeded a configured rate limit.
    RateLimited(String),
    /// Missing or invalid configuration (e.g. no WAVE genesis ref).
    Config(String),
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::Io(e) => write!(f, "kv store error: {}", e),
            IndexError::Corrupt(msg) => write!(f, "corrupt record: {}", msg),
            IndexError::RateLimited(msg) => write!(f, "rate limited: {}", msg),
            IndexError::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for IndexError {}

impl From<rocksdb::Error> for IndexError {
    fn from(e: rocksdb::Error) -> Self {
        IndexError::Io(e)
    }
}

pub type IndexResult<T> = Result<T, IndexError>;
