//! Error types for tabserve.

/// Custom error type for engine and boundary operations.
///
/// The three request-facing kinds mirror the HTTP statuses the boundary
/// maps them to: `InvalidRequest` and `Unsupported` become 400, `NotFound`
/// becomes 404. `Io` covers local file handling during uploads.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The request shape, a column, an operator, a value, or a cursor was
    /// rejected by one of the compilers, or the SQL engine rejected a
    /// parameterized query (which implies the spec that produced it was
    /// invalid).
    #[error("{0}")]
    InvalidRequest(String),

    /// Unknown dataset id, unknown profile column, or missing import session.
    #[error("{0}")]
    NotFound(String),

    /// Upload suffix outside the allow-list, or a multi-entity format sent
    /// to the single-step upload endpoint.
    #[error("{0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<duckdb::Error> for Error {
    fn from(e: duckdb::Error) -> Self {
        Self::InvalidRequest(format!("Invalid query input: {e}"))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::InvalidRequest(format!("Failed to read SQLite database: {e}"))
    }
}

impl Error {
    /// Shorthand for an `InvalidRequest` with a formatted message.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Shorthand for a `NotFound` with a formatted message.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

/// Result type alias for tabserve operations.
pub type Result<T> = std::result::Result<T, Error>;
