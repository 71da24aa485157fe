//! Typed error hierarchy (§7).
//!
//! `SheetError` covers the abort-before-mutation family: bounds violations,
//! writes to locked cells under protect mode, malformed abbreviations/sort
//! criteria, and persistence I/O failures. These are checked *before* any
//! state is touched and returned as `Result<_, SheetError>` from every
//! `EditOps`/persistence entry point.
//!
//! In-cell arithmetic/reference errors never take this path: they are a
//! `CellError` value stored on the cell itself (see `cell.rs`), matching the
//! "errors surface at the cell boundary, not as non-local exits" policy.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum SheetError {
    #[error("row or column out of bounds")]
    Bounds,
    #[error("sheet has reached its maximum size")]
    MaxSizeExceeded,
    #[error("cell ({row}, {col}) is locked")]
    Locked { row: i32, col: i32 },
    #[error("could not parse: {0}")]
    Parse(String),
    #[error("unknown register '{0}'")]
    UnknownRegister(char),
    #[error("no such name '{0}'")]
    UnknownName(String),
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for SheetError {
    fn from(e: std::io::Error) -> Self {
        SheetError::Io(e.to_string())
    }
}

pub type SheetResult<T> = Result<T, SheetError>;
