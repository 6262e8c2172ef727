//! [`DmlDriver`]: the top-level per-statement orchestration — permission
//! check, `BEFORE_STATEMENT`, a buffered per-row pass (`BEFORE_ROW` veto,
//! then apply + OLD/NEW/FINAL emission + `AFTER_ROW` during drain),
//! `AFTER_STATEMENT`, and a timing/trace log on the way out. The row-at-
//! a-time loop runs inside a `tracing::instrument`ed span that logs row
//! counts on exit.

use std::time::Instant;

use tracing::{debug, instrument};

use crate::delta::DeltaCollector;
use crate::dup_key::{attempt_insert, DupKeyMode, DupKeyOutcome};
use crate::error::{DmlError, DriverError};
use crate::generated_keys::GeneratedKeysProjector;
use crate::merge::{MergeExecutor, MergeOutcome};
use crate::row::Row;
use crate::row_assembly::{build_insert_row, build_update_row, InsertSpec};
use crate::session::Session;
use crate::set_clause::SetClauseList;
use crate::storage::{RightKind, StmtKind, Table, TriggerHost, User};
use crate::value::Value;

/// How often (in processed rows) to check `session.is_canceled()`.
const CANCEL_CHECK_INTERVAL: usize = 128;

/// Affected/suppressed/ignored row counts for one statement. `suppressed`
/// counts rows a `BEFORE_ROW` trigger vetoed; `ignored` counts rows dropped
/// by `INSERT IGNORE` / `ON CONFLICT DO NOTHING`. Neither contributes to
/// `affected`, which is what a client-facing row count reports.
#[derive(Debug, Default, Clone, Copy)]
pub struct DmlOutcome {
    pub affected: u64,
    pub suppressed: u64,
    pub ignored: u64,
}

impl DmlOutcome {
    fn merge_counts(&mut self, other: MergeOutcome) {
        self.affected += other.rows_inserted + other.rows_updated + other.rows_deleted;
    }
}

/// One statement's worth of collaborators, borrowed for the duration of
/// `execute_*`. Bundled into one struct rather than threaded as four
/// separate parameters through every method.
pub struct DmlDriver<'a> {
    pub table: &'a mut dyn Table,
    pub session: &'a Session,
    pub user: &'a dyn User,
    pub triggers: &'a dyn TriggerHost,
    pub table_name: &'a str,
    /// The statement-level write lock. Held for the duration of one
    /// `execute_*` call; released by
    /// `MutexGuard`'s `Drop` on every exit path, including an early `?`.
    pub write_lock: &'a parking_lot::Mutex<()>,
}

impl<'a> DmlDriver<'a> {
    pub fn new(
        table: &'a mut dyn Table,
        session: &'a Session,
        user: &'a dyn User,
        triggers: &'a dyn TriggerHost,
        table_name: &'a str,
        write_lock: &'a parking_lot::Mutex<()>,
    ) -> Self {
        DmlDriver { table, session, user, triggers, table_name, write_lock }
    }

    /// Acquire the statement write lock and arm the guaranteed reset of
    /// `session.current_row_number` back to zero on scope exit — the
    /// `finally`-style cleanup around the whole per-row pass, regardless of
    /// which `?` bails out.
    fn begin_statement(&self) -> (parking_lot::MutexGuard<'_, ()>, impl Drop + '_) {
        let lock_guard = self.write_lock.lock();
        let reset_guard = scopeguard::guard(self.session, |s| s.set_current_row_number(0));
        (lock_guard, reset_guard)
    }

    /// Plain `INSERT ... VALUES (...), (...), ...`: one trigger-firing cycle
    /// per row, so a `BEFORE_ROW` veto on row 3 of 5 does not suppress the
    /// other four.
    #[instrument(skip_all, fields(table = %self.table_name, rows = specs.len()))]
    pub fn execute_insert(
        &mut self,
        specs: Vec<InsertSpec<'_>>,
        delta: &mut DeltaCollector<'_>,
        mut generated_keys: Option<&mut GeneratedKeysProjector<'_>>,
        params: &[Value],
    ) -> Result<DmlOutcome, DmlError> {
        let started = Instant::now();
        let _guards = self.begin_statement();
        self.user.check_table_right(self.table_name, RightKind::Insert)?;
        self.triggers.fire_before_statement(self.session, self.table_name, StmtKind::Insert)?;

        let mut outcome = DmlOutcome::default();
        let mut pending: Vec<Row> = Vec::new();

        for (i, spec) in specs.into_iter().enumerate() {
            self.check_canceled(i)?;
            self.session.set_current_row_number(i as u64 + 1);
            let new_row = build_insert_row(self.table, self.session, spec, None, params)?;
            if self.triggers.fire_before_row(self.session, self.table_name, None, Some(&new_row))? {
                outcome.suppressed += 1;
                continue;
            }
            pending.push(new_row);
        }

        for new_row in pending.drain(..) {
            delta.new_(&new_row);
            let inserted = self
                .table
                .add_row(self.session, new_row.clone())
                .map_err(|e| e.with_row_context(new_row.simplified_repr()))?;
            if let Some(g) = generated_keys.as_deref_mut() {
                g.emit(&inserted);
            }
            delta.final_(&inserted);
            self.triggers.fire_after_row(self.session, self.table_name, None, Some(&inserted))?;
            outcome.affected += 1;
        }

        self.triggers.fire_after_statement(self.session, self.table_name, StmtKind::Insert)?;
        debug!(affected = outcome.affected, suppressed = outcome.suppressed, elapsed_us = started.elapsed().as_micros() as u64, "insert complete");
        Ok(outcome)
    }

    /// `INSERT ... ON DUPLICATE KEY UPDATE` / `INSERT IGNORE` /
    /// `ON CONFLICT DO NOTHING`. The affected-row count for a resolved
    /// conflict is governed by `session.on_duplicate_key_reports_two`.
    #[instrument(skip_all, fields(table = %self.table_name, rows = specs.len()))]
    pub fn execute_insert_on_conflict(
        &mut self,
        specs: Vec<InsertSpec<'_>>,
        mut mode: DupKeyMode<'_>,
        delta: &mut DeltaCollector<'_>,
        params: &[Value],
    ) -> Result<DmlOutcome, DmlError> {
        let started = Instant::now();
        let _guards = self.begin_statement();
        self.user.check_table_right(self.table_name, RightKind::Insert)?;
        self.triggers.fire_before_statement(self.session, self.table_name, StmtKind::Insert)?;

        let mut outcome = DmlOutcome::default();

        for (i, spec) in specs.into_iter().enumerate() {
            self.check_canceled(i)?;
            self.session.set_current_row_number(i as u64 + 1);
            let candidate = build_insert_row(self.table, self.session, spec, None, params)?;
            if self.triggers.fire_before_row(self.session, self.table_name, None, Some(&candidate))? {
                outcome.suppressed += 1;
                continue;
            }

            match attempt_insert(self.table, self.session, candidate, &mut mode, params)? {
                DupKeyOutcome::Inserted(row) => {
                    delta.new_(&row);
                    delta.final_(&row);
                    self.triggers.fire_after_row(self.session, self.table_name, None, Some(&row))?;
                    outcome.affected += 1;
                }
                DupKeyOutcome::Updated { old, new } => {
                    delta.old(&old);
                    delta.new_(&new);
                    delta.final_(&new);
                    self.triggers.fire_after_row(self.session, self.table_name, Some(&old), Some(&new))?;
                    outcome.affected += if self.session.on_duplicate_key_reports_two { 2 } else { 1 };
                }
                DupKeyOutcome::Ignored(_) => {
                    outcome.ignored += 1;
                }
            }
        }

        self.triggers.fire_after_statement(self.session, self.table_name, StmtKind::Insert)?;
        debug!(affected = outcome.affected, ignored = outcome.ignored, elapsed_us = started.elapsed().as_micros() as u64, "insert-on-conflict complete");
        Ok(outcome)
    }

    /// `UPDATE t SET ... WHERE ...` against an already-scanned-and-locked
    /// set of old rows (`scan::FilteredScan` is the producer in the common
    /// case).
    #[instrument(skip_all, fields(table = %self.table_name, rows = old_rows.len()))]
    pub fn execute_update(
        &mut self,
        old_rows: Vec<Row>,
        set_clauses: &mut SetClauseList,
        delta: &mut DeltaCollector<'_>,
        params: &[Value],
    ) -> Result<DmlOutcome, DmlError> {
        let started = Instant::now();
        let _guards = self.begin_statement();
        self.user.check_table_right(self.table_name, RightKind::Update)?;
        self.triggers.fire_before_statement(self.session, self.table_name, StmtKind::Update)?;

        let mut outcome = DmlOutcome::default();
        let mut pending: Vec<(Row, Row, bool)> = Vec::new();

        for (i, old_row) in old_rows.into_iter().enumerate() {
            self.check_canceled(i)?;
            self.session.set_current_row_number(i as u64 + 1);
            let (new_row, changed) = build_update_row(self.table, self.session, &old_row, set_clauses, None, params)?;
            if self.triggers.fire_before_row(self.session, self.table_name, Some(&old_row), Some(&new_row))? {
                outcome.suppressed += 1;
                continue;
            }
            pending.push((old_row, new_row, changed));
        }

        for (old_row, new_row, changed) in pending.drain(..) {
            delta.old(&old_row);
            delta.new_(&new_row);
            self.table
                .update_rows(self.session, &[(old_row.clone(), new_row.clone())])
                .map_err(|e| e.with_row_context(new_row.simplified_repr()))?;
            delta.final_(&new_row);
            self.triggers.fire_after_row(self.session, self.table_name, Some(&old_row), Some(&new_row))?;
            if changed {
                outcome.affected += 1;
            }
        }

        self.triggers.fire_after_statement(self.session, self.table_name, StmtKind::Update)?;
        debug!(affected = outcome.affected, suppressed = outcome.suppressed, elapsed_us = started.elapsed().as_micros() as u64, "update complete");
        Ok(outcome)
    }

    /// `DELETE FROM t WHERE ...` against an already-scanned-and-locked set
    /// of rows. No predicate-less special case: an empty `old_rows` from the
    /// caller's scan is just zero affected rows.
    #[instrument(skip_all, fields(table = %self.table_name, rows = old_rows.len()))]
    pub fn execute_delete(&mut self, old_rows: Vec<Row>, delta: &mut DeltaCollector<'_>) -> Result<DmlOutcome, DmlError> {
        let started = Instant::now();
        let _guards = self.begin_statement();
        self.user.check_table_right(self.table_name, RightKind::Delete)?;
        self.triggers.fire_before_statement(self.session, self.table_name, StmtKind::Delete)?;

        let mut outcome = DmlOutcome::default();
        let mut pending: Vec<Row> = Vec::new();

        for (i, old_row) in old_rows.into_iter().enumerate() {
            self.check_canceled(i)?;
            self.session.set_current_row_number(i as u64 + 1);
            if self.triggers.fire_before_row(self.session, self.table_name, Some(&old_row), None)? {
                outcome.suppressed += 1;
                continue;
            }
            pending.push(old_row);
        }

        for old_row in pending.drain(..) {
            delta.old(&old_row);
            let key = old_row.key.ok_or_else(|| DmlError::internal("row queued for delete has no key"))?;
            self.table
                .remove_row(self.session, key)
                .map_err(|e| e.with_row_context(old_row.simplified_repr()))?;
            self.triggers.fire_after_row(self.session, self.table_name, Some(&old_row), None)?;
            outcome.affected += 1;
        }

        self.triggers.fire_after_statement(self.session, self.table_name, StmtKind::Delete)?;
        debug!(affected = outcome.affected, suppressed = outcome.suppressed, elapsed_us = started.elapsed().as_micros() as u64, "delete complete");
        Ok(outcome)
    }

    /// `MERGE INTO ... USING ... ON ... WHEN ...`. Trigger firing per branch
    /// happens inside [`MergeExecutor::run`] itself, since which trigger
    /// kind applies depends on which branch matched a given row; this method
    /// wraps the statement-level permission check and BEFORE/AFTER STATEMENT
    /// pair around it — fired once per `StmtKind` the declared WHEN clauses
    /// actually require (spec §4.5's "or-mask"), not unconditionally as
    /// `Update`, so a MERGE with only a `WHEN NOT MATCHED THEN INSERT`
    /// branch fires INSERT-kind statement triggers and never UPDATE-kind.
    #[instrument(skip_all, fields(table = %self.table_name))]
    pub fn execute_merge(
        &mut self,
        merge: &mut MergeExecutor,
        join_predicate: &crate::expr::Expr,
        source_rows: &[Row],
        params: &[Value],
    ) -> Result<DmlOutcome, DmlError> {
        let started = Instant::now();
        let _guards = self.begin_statement();
        self.user.check_table_right(self.table_name, RightKind::Update)?;

        let stmt_kinds = merge.required_stmt_kinds();
        for kind in &stmt_kinds {
            self.triggers.fire_before_statement(self.session, self.table_name, *kind)?;
        }

        let merge_outcome = merge.run(self.table, self.session, self.triggers, self.table_name, join_predicate, source_rows, params)?;

        for kind in &stmt_kinds {
            self.triggers.fire_after_statement(self.session, self.table_name, *kind)?;
        }
        let mut outcome = DmlOutcome::default();
        outcome.merge_counts(merge_outcome);
        debug!(
            inserted = merge_outcome.rows_inserted,
            updated = merge_outcome.rows_updated,
            deleted = merge_outcome.rows_deleted,
            elapsed_us = started.elapsed().as_micros() as u64,
            "merge complete"
        );
        Ok(outcome)
    }

    fn check_canceled(&self, row_index: usize) -> Result<(), DmlError> {
        if row_index % CANCEL_CHECK_INTERVAL == 0 && self.session.is_canceled() {
            return Err(DriverError::Canceled.into());
        }
        Ok(())
    }
}
