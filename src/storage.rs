//! Collaborator contracts: the storage engine, user permission model, and
//! trigger plumbing this crate consumes but does not implement. A concrete
//! implementation lives in the test-only [`crate::mem`] module; a real
//! deployment would plug in its own storage engine behind the same traits.

use crate::error::DmlError;
use crate::row::{Row, RowKey};
use crate::schema::TableMeta;
use crate::session::Session;

/// `check_table_right` permission kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RightKind {
    Select,
    Insert,
    Update,
    Delete,
    SchemaOwner,
}

/// The authorization collaborator. Only the permission-check interface is
/// consumed here; the user/role model itself is out of scope here.
pub trait User {
    fn check_table_right(&self, table: &str, kind: RightKind) -> Result<(), DmlError>;
}

/// Trigger firing order and veto semantics: `BEFORE_ROW` returning `true`
/// means "trigger consumed the row; do not apply", modeled as an explicit
/// boolean return rather than an exception.
pub trait TriggerHost {
    fn fire_before_statement(&self, session: &Session, table: &str, kind: StmtKind) -> Result<(), DmlError>;
    fn fire_after_statement(&self, session: &Session, table: &str, kind: StmtKind) -> Result<(), DmlError>;

    /// Returns `true` when a trigger vetoed this row (consumed it).
    fn fire_before_row(
        &self,
        session: &Session,
        table: &str,
        old: Option<&Row>,
        new: Option<&Row>,
    ) -> Result<bool, DmlError>;

    fn fire_after_row(
        &self,
        session: &Session,
        table: &str,
        old: Option<&Row>,
        new: Option<&Row>,
    ) -> Result<(), DmlError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StmtKind {
    Insert,
    Update,
    Delete,
}

/// The storage engine / table contract. `DmlDriver` and friends hold a
/// `&mut dyn Table` (or a generic `T: Table`) for the duration of one
/// statement; everything below this trait (B-tree pages, WAL, MV-store) is
/// out of scope here.
pub trait Table {
    fn meta(&self) -> &TableMeta;

    /// A row sized to this table, every slot `NULL`.
    fn template_row(&self) -> Row {
        Row::template(self.meta().col_count())
    }

    /// The constant used for outer-join absences on this table's side of a
    /// MERGE.
    fn null_row(&self) -> Row {
        Row::template(self.meta().col_count())
    }

    /// Fill identity columns (respecting `overriding_system`), apply
    /// defaults to unset non-identity columns, convert types, evaluate
    /// generated columns, and enforce NOT NULL.
    fn convert_insert_row(&mut self, session: &Session, row: &mut Row, overriding_system: bool) -> Result<(), DmlError>;

    /// The UPDATE counterpart: defaults/conversion/generated recompute
    /// without touching identity semantics.
    fn convert_update_row(&mut self, session: &Session, row: &mut Row) -> Result<(), DmlError>;

    /// Insert `row`, assigning it a fresh key. Fails with
    /// [`crate::error::DupKeyError`] wrapped in [`DmlError`] on a
    /// primary/unique-key conflict; `DupKeyHandler` is the only caller
    /// expected to interpret that failure specially.
    fn add_row(&mut self, session: &Session, row: Row) -> Result<Row, DmlError>;

    fn remove_row(&mut self, session: &Session, key: RowKey) -> Result<(), DmlError>;

    /// Atomic rewrite of a batch of (old, new) pairs. Old/new pairs share
    /// the same `key`; the storage engine replaces the stored values.
    fn update_rows(&mut self, session: &Session, pairs: &[(Row, Row)]) -> Result<(), DmlError>;

    /// Attempt to lock a single row for the duration of the statement.
    /// `Ok(None)` means the row vanished or was locked away under snapshot
    /// isolation: the scan must skip it. `Ok(Some(row))` is the
    /// freshest committed view of that key; if it differs from the
    /// in-filter cached row, the predicate must be re-evaluated against it.
    fn lock_row(&mut self, session: &Session, key: RowKey, timeout_ms: i64) -> Result<Option<Row>, DmlError>;

    /// Iterate every row currently visible to this transaction, used by
    /// `FilteredScan` in the absence of an index plan.
    fn scan(&self) -> Vec<Row>;

    fn get_by_key(&self, key: RowKey) -> Option<Row>;

    /// Identify which unique index (if any) a just-failed `add_row`
    /// violated, and the row's values for that index's columns.
    fn conflicting_index(&self, row: &Row) -> Option<(u32, Vec<usize>)>;
}
