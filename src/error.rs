use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, FluxError>;

/// Every error kind the storage engine can surface, per the error-handling
/// design: user-input errors are recoverable (callers see `Ok(false)`),
/// infrastructure errors are fatal and propagate as `Err`.
#[derive(Error, Debug)]
pub enum FluxError {
    #[error("table or attribute name already exists: {0}")]
    SchemaConflict(String),

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("type mismatch for attribute {attr}: expected {expected}, got {actual}")]
    TypeMismatch {
        attr: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("value for attribute {attr} exceeds max length {max} (got {actual})")]
    LengthExceeded {
        attr: String,
        max: u16,
        actual: usize,
    },

    #[error("null value supplied for NOT NULL attribute {0}")]
    NullInNotNull(String),

    #[error("primary key violation on attribute {0}")]
    PrimaryKeyViolation(String),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("invariant breach: {0}")]
    InvariantBreach(String),
}
