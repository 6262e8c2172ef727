//! [`Row`] and [`RowKey`]: the unit of data the whole pipeline moves.
//!
//! A row's *identity* (its storage key) is tracked separately from its
//! *contents* (the value vector), because a row being rewritten keeps its
//! key across the rewrite.

use std::fmt;

use crate::value::Value;

/// Opaque storage-engine identity for a row. Two `Row`s with the same key
/// represent the same logical row at different points in time (e.g. before
/// and after an UPDATE); a fresh row built for INSERT has no key until the
/// storage engine assigns one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey(pub u64);

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An ordered vector of [`Value`]s indexed by column id, plus an opaque row
/// key. Invariant: `values.len()` equals the owning table's column count; a
/// row handed out by a cursor must not be mutated in place — build a new
/// `Row` instead and swap it in.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub key: Option<RowKey>,
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(key: Option<RowKey>, values: Vec<Value>) -> Self {
        Row { key, values }
    }

    /// A row sized to `col_count`, every slot `NULL`, no key yet assigned.
    /// The starting point for `RowAssembly::build_insert_row`.
    pub fn template(col_count: usize) -> Self {
        Row {
            key: None,
            values: vec![Value::Null; col_count],
        }
    }

    /// Cheap "has-not-been-re-read" check: true when both rows carry the
    /// same key and their value vectors compare equal. A real storage
    /// engine would use pointer/generation identity here; comparing values
    /// is the behaviorally-equivalent stand-in this crate's trait boundary
    /// allows.
    pub fn shared_data_equal(&self, other: &Row) -> bool {
        self.key == other.key && self.values == other.values
    }

    pub fn col(&self, idx: usize) -> &Value {
        &self.values[idx]
    }

    pub fn set_col(&mut self, idx: usize, value: Value) {
        self.values[idx] = value;
    }

    /// A short, simplified representation suitable for attaching to error
    /// context so a client can point at the failing input row.
    pub fn simplified_repr(&self) -> String {
        let cols: Vec<String> = self.values.iter().map(|v| v.to_string()).collect();
        format!("({})", cols.join(", "))
    }
}
