use thiserror::Error;

pub type Result<T> = std::result::Result<T, CplError>;

/// Errors surfaced by the provenance storage backends.
///
/// `NotFound`, `AlreadyExists`, and `DbNull` are recoverable at the caller:
/// a lookup may simply miss, and a lost version-number race is detected
/// through `AlreadyExists` and resolved by retrying with a higher number.
/// Empty enumerations are not errors; they report `Ok(0)`.
#[derive(Debug, Error)]
pub enum CplError {
    /// The requested entity does not exist.
    #[error("not found")]
    NotFound,
    /// Unique-key violation while creating a version; the sanctioned signal
    /// that another writer claimed the number first.
    #[error("already exists")]
    AlreadyExists,
    /// The column was SQL NULL and the caller asked for null-aware reads.
    #[error("column is NULL")]
    DbNull,
    /// A result-set column the statement promised is missing.
    #[error("missing result column: {0}")]
    DbKeyNotFound(String),
    /// A result-set column holds a value of an unexpected type.
    #[error("invalid column type: {0}")]
    DbInvalidType(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("insufficient resources")]
    InsufficientResources,
    /// The engine rejected or timed out the statement.
    #[error("statement failed: {0}")]
    Statement(String),
    /// A statement could not be prepared while (re)connecting.
    #[error("could not prepare statement: {0}")]
    PrepareStatement(String),
    /// The database connection could not be established or maintained.
    #[error("connection failed: {0}")]
    Connection(String),
    /// A backend produced a response the library could not interpret.
    #[error("malformed backend response: {0}")]
    BackendInternal(String),
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
    /// Guard value; must not reach the caller.
    #[error("internal error")]
    Internal,
}

impl From<rusqlite::Error> for CplError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => CplError::NotFound,
            rusqlite::Error::InvalidColumnIndex(i) => CplError::DbKeyNotFound(i.to_string()),
            rusqlite::Error::InvalidColumnName(name) => CplError::DbKeyNotFound(name),
            rusqlite::Error::InvalidColumnType(i, name, ty) => {
                CplError::DbInvalidType(format!("column {i} ({name}) is {ty}"))
            }
            other => CplError::Statement(other.to_string()),
        }
    }
}
