//! [`Session`]: the explicit context threaded through every call site
//! (isolation level, timezone, identity-last-value) instead of implicit
//! global or thread-local session state: a small, cheaply-constructed
//! struct passed by reference rather than process-wide mutable state.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Isolation levels a statement may run under. Order matters: higher
/// variants offer strictly more protection, and the discriminant order is
/// relied upon by `>=`/`<=` comparisons elsewhere in the larger system
/// this crate plugs into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Snapshot,
    #[default]
    Serializable,
}

/// Case-canonicalization mode used to resolve generated-key column names
/// when an exact-case match fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentifierCase {
    #[default]
    Upper,
    Lower,
}

/// Per-session runtime knobs, passed explicitly rather than read from
/// ambient globals.
pub struct Session {
    pub user: String,
    pub isolation_level: IsolationLevel,
    pub lock_timeout_ms: i64,
    pub identifier_case: IdentifierCase,
    /// ANSI-strictness knob: when true, an UPDATE whose computed new row
    /// equals the old row does not count as an affected row.
    pub update_to_current_values_returns_zero: bool,
    /// Whether an INSERT resolved via `ON DUPLICATE KEY UPDATE`
    /// contributes 1 or 2 to the affected-row count. Exposed as a knob
    /// rather than hardcoded, since real engines disagree on this (see
    /// DESIGN.md).
    pub on_duplicate_key_reports_two: bool,
    identity_last_value: AtomicU64,
    current_row_number: Cell<u64>,
    canceled: Cell<bool>,
}

impl Default for Session {
    fn default() -> Self {
        Session {
            user: "anonymous".to_string(),
            isolation_level: IsolationLevel::default(),
            lock_timeout_ms: 5_000,
            identifier_case: IdentifierCase::default(),
            update_to_current_values_returns_zero: false,
            on_duplicate_key_reports_two: false,
            identity_last_value: AtomicU64::new(0),
            current_row_number: Cell::new(0),
            canceled: Cell::new(false),
        }
    }
}

impl Session {
    pub fn for_user(user: impl Into<String>) -> Self {
        Session {
            user: user.into(),
            ..Session::default()
        }
    }

    pub fn set_identity_last_value(&self, value: u64) {
        self.identity_last_value.store(value, Ordering::SeqCst);
    }

    pub fn identity_last_value(&self) -> u64 {
        self.identity_last_value.load(Ordering::SeqCst)
    }

    pub fn set_current_row_number(&self, n: u64) {
        self.current_row_number.set(n);
    }

    pub fn current_row_number(&self) -> u64 {
        self.current_row_number.get()
    }

    /// Mark this session's in-flight statement canceled; `check_canceled`
    /// will raise from this point on. Used by tests to simulate a
    /// client-side query timeout.
    pub fn cancel(&self) {
        self.canceled.set(true);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.get()
    }
}
