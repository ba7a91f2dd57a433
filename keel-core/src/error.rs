use std::borrow::Cow;
use thiserror::Error;

/// Programmer mistakes detected before any I/O is performed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("Entity `{entity}` has no field or column named `{field}`")]
    UnknownField {
        entity: Cow<'static, str>,
        field: String,
    },
    #[error("Field `{field}` of `{entity}` cannot be updated")]
    NotUpdatable {
        entity: Cow<'static, str>,
        field: String,
    },
    #[error("Field `{field}` of `{entity}` is a detail table and cannot be used in {usage}")]
    DetailColumn {
        entity: Cow<'static, str>,
        field: String,
        usage: &'static str,
    },
    #[error("Nothing to execute: {0}")]
    MissingPayload(&'static str),
    #[error("`{entity}` is bound to a read-only source and cannot be written")]
    ReadOnly { entity: Cow<'static, str> },
    #[error("`{entity}` does not declare a key")]
    MissingKey { entity: Cow<'static, str> },
    #[error("Expected {expected} key values for `{entity}`, got {actual}")]
    KeyArity {
        entity: Cow<'static, str>,
        expected: usize,
        actual: usize,
    },
    #[error("Unsupported expression: {0}")]
    UnsupportedExpression(String),
    #[error("Invalid filter `{filter}` at offset {offset}: {message}")]
    Filter {
        filter: String,
        offset: usize,
        message: String,
    },
    #[error("Invalid metadata for `{entity}`: {message}")]
    Metadata {
        entity: Cow<'static, str>,
        message: String,
    },
    #[error("A stream is still reading from the ambient connection, drop it before running another statement in the scope")]
    StreamOpen,
    #[error("{0}")]
    Unsupported(String),
}

/// Violations of the ambient transaction scope discipline.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionError {
    #[error("The ambient transaction was already rolled back by a scope disposed without completion")]
    RolledBack,
    #[error("The ambient transaction was already committed")]
    AlreadyCommitted,
    #[error("The transaction scope was already disposed")]
    Disposed,
    #[error("The ambient transaction is bound to a different database")]
    DatabaseMismatch,
}

/// The operation was stopped by its cancellation token.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("The operation was cancelled")]
pub struct Cancelled;

/// Log and wrap a domain error into [`crate::Error`].
pub(crate) fn raise(error: impl Into<crate::Error>) -> crate::Error {
    let error = error.into();
    log::error!("{:#}", error);
    error
}
