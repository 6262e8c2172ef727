//! Error taxonomy for the DML core, grouped by subsystem and composed into
//! [`DmlError`] via `#[from]`: callers match on the outer enum, subsystems
//! raise their own narrow enum.

use thiserror::Error;

use crate::row::RowKey;

/// Validation, type/conversion, constraint, transient, and internal errors,
/// unified behind one top-level type so the `update()` /
/// `update_with_generated_keys()` entry points have a single `Result` error
/// type.
#[derive(Error, Debug)]
pub enum DmlError {
    #[error(transparent)]
    RowAssembly(#[from] RowAssemblyError),
    #[error(transparent)]
    SetClause(#[from] SetClauseError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    DupKey(#[from] DupKeyError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    /// Internal invariant break — an assertion, not a recoverable condition.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl DmlError {
    pub fn internal(msg: impl Into<String>) -> Self {
        DmlError::Internal(msg.into())
    }

    /// Attach a simplified representation of the offending row so a client
    /// can point at the failing input.
    pub fn with_row_context(self, row_repr: impl Into<String>) -> Self {
        DmlError::Driver(DriverError::RowContext {
            row_repr: row_repr.into(),
            source: Box::new(self),
        })
    }
}

#[derive(Error, Debug)]
pub enum RowAssemblyError {
    #[error("column count does not match: expected {expected}, got {got}")]
    ColumnCountMismatch { expected: usize, got: usize },
    #[error("generated column `{0}` cannot be assigned")]
    GeneratedColumnAssigned(String),
    #[error("column `{0}` is NOT NULL but no value was supplied")]
    NullIntoNotNull(String),
    #[error("column `{0}` specified more than once in the column list")]
    DuplicateColumnName(String),
}

#[derive(Error, Debug)]
pub enum SetClauseError {
    #[error("duplicate assignment to column `{0}`")]
    DuplicateColumnName(String),
    #[error("generated column `{0}` cannot be assigned")]
    GeneratedColumnAssigned(String),
    #[error("array element index must be in [1, {max}], got {got}")]
    ArrayElementOutOfRange { got: i64, max: i64 },
    #[error("array element target is not an array at this nesting level")]
    ArrayElementNotArray,
    #[error("NULL value encountered while navigating into an array element target")]
    NullValueInArrayTarget,
}

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("value of type {from} is not convertible to {to}")]
    NotConvertible { from: &'static str, to: &'static str },
    #[error("value is not a boolean (found {0})")]
    NotBoolean(&'static str),
    #[error("integer overflow during conversion")]
    Overflow,
    #[error("row-value assignment arity mismatch: expected {expected}, got {got}")]
    RowArityMismatch { expected: usize, got: usize },
    #[error("row-value assignment source evaluated to NULL")]
    NullRowExpression,
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("FETCH FIRST row count must be a non-negative integer, got {0:?}")]
    InvalidFetchCount(Option<i64>),
}

#[derive(Error, Debug)]
pub enum DupKeyError {
    #[error("duplicate key on index {index_id:?}, columns {conflicting_columns:?}")]
    DuplicateKey {
        index_id: u32,
        conflicting_columns: Vec<String>,
    },
}

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("target row was matched by more than one source row in this MERGE: {0:?}")]
    DuplicateKey(RowKey),
}

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("lock timed out after {timeout_ms}ms")]
    LockTimeout { timeout_ms: i64 },
    #[error("statement was concurrently updated and must be retried")]
    ConcurrentUpdate,
    #[error("statement canceled")]
    Canceled,
    #[error("permission denied for statement")]
    PermissionDenied,
    #[error("{source} while processing row `{row_repr}`")]
    RowContext {
        row_repr: String,
        #[source]
        source: Box<DmlError>,
    },
    #[error("column `{0}` not found")]
    ColumnNotFound(String),
}
