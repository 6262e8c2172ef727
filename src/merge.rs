//! [`MergeExecutor`]: `MERGE INTO target USING source ON cond WHEN ...`.
//! Reuses the UPDATE row-application loop for the mutation side, and
//! represents `WHEN` branches as a tagged enum rather than a class
//! hierarchy with an `isMatched()` virtual.

use indexmap::IndexSet;

use crate::error::{DmlError, MergeError};
use crate::expr::{EvalCtx, Expr};
use crate::row::{Row, RowKey};
use crate::row_assembly::{build_insert_row, build_update_row, InsertSpec};
use crate::session::Session;
use crate::set_clause::SetClauseList;
use crate::storage::{StmtKind, Table, TriggerHost};
use crate::value::Value;

/// Outcome of matching one source row against the current target rows, used
/// to drive the missed-lock retry in [`MergeExecutor::run`].
enum SourceMatch {
    /// At least one target row joined successfully (a branch may or may not
    /// have applied — an unmatched guard still counts as `Matched` per
    /// spec §4.5 step 3).
    Matched,
    /// No target row joined.
    NotMatched,
    /// A candidate target row's lock was missed (the row vanished under
    /// snapshot isolation) and no other candidate joined; retry once.
    LockMissed,
}

/// The action of one `WHEN MATCHED` branch.
pub enum MatchedAction {
    Update(SetClauseList),
    Delete,
}

/// The action of one `WHEN NOT MATCHED [BY TARGET]` branch.
pub struct NotMatchedInsert {
    pub targeted_columns: Vec<usize>,
    pub value_expressions: Vec<Expr>,
    pub overriding_system: bool,
}

/// One `WHEN` branch: an optional `AND <guard>` plus its action. Branches
/// are tried in declaration order; the first whose guard passes (or has no
/// guard) wins, mirroring the SQL standard's first-match rule.
pub struct WhenClause<A> {
    pub guard: Option<Expr>,
    pub action: A,
}

pub struct MergeExecutor {
    pub matched: Vec<WhenClause<MatchedAction>>,
    pub not_matched: Vec<WhenClause<NotMatchedInsert>>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MergeOutcome {
    pub rows_inserted: u64,
    pub rows_updated: u64,
    pub rows_deleted: u64,
}

impl MergeExecutor {
    pub fn new() -> Self {
        MergeExecutor {
            matched: Vec::new(),
            not_matched: Vec::new(),
        }
    }

    /// Run the MERGE. `join_predicate` is evaluated with the target row
    /// bound as [`crate::expr::ColumnSide::Target`] and the source row as
    /// [`crate::expr::ColumnSide::Source`].
    ///
    /// Each source row is matched against every current target row; a
    /// target row matched by more than one source row in the same statement
    /// raises [`MergeError::DuplicateKey`] rather than silently applying the
    /// branch twice, since which source row "wins" would otherwise depend
    /// on scan order.
    ///
    /// Per spec §4.5 step 2, a candidate target row is locked and the join
    /// condition is re-tested against the locked (freshest) version before
    /// a branch is picked. If the lock is missed (the row vanished under
    /// snapshot isolation), the source row is not immediately treated as
    /// `NOT MATCHED` — it is remembered and retried exactly once, after the
    /// source cursor has advanced past every other row, before falling
    /// through to a `WHEN NOT MATCHED` branch.
    pub fn run(
        &mut self,
        table: &mut dyn Table,
        session: &Session,
        triggers: &dyn TriggerHost,
        table_name: &str,
        join_predicate: &Expr,
        source_rows: &[Row],
        params: &[Value],
    ) -> Result<MergeOutcome, DmlError> {
        let mut outcome = MergeOutcome::default();
        let mut processed_targets: IndexSet<RowKey> = IndexSet::new();
        let mut missed_source: Vec<&Row> = Vec::new();

        for source_row in source_rows {
            match self.match_source_row(table, session, triggers, table_name, join_predicate, source_row, params, &mut processed_targets, &mut outcome)? {
                SourceMatch::Matched => {}
                SourceMatch::LockMissed => missed_source.push(source_row),
                SourceMatch::NotMatched => self.insert_not_matched(table, session, triggers, table_name, source_row, params, &mut outcome)?,
            }
        }

        for source_row in missed_source {
            let retried = self.match_source_row(table, session, triggers, table_name, join_predicate, source_row, params, &mut processed_targets, &mut outcome)?;
            if !matches!(retried, SourceMatch::Matched) {
                self.insert_not_matched(table, session, triggers, table_name, source_row, params, &mut outcome)?;
            }
        }

        Ok(outcome)
    }

    /// Try to match `source_row` against the current target rows, locking
    /// each join-predicate candidate and re-testing the join condition
    /// against the locked row before picking a `WHEN MATCHED` branch.
    #[allow(clippy::too_many_arguments)]
    fn match_source_row(
        &mut self,
        table: &mut dyn Table,
        session: &Session,
        triggers: &dyn TriggerHost,
        table_name: &str,
        join_predicate: &Expr,
        source_row: &Row,
        params: &[Value],
        processed_targets: &mut IndexSet<RowKey>,
        outcome: &mut MergeOutcome,
    ) -> Result<SourceMatch, DmlError> {
        let row_lockable = table.meta().row_lockable;
        let candidates = table.scan();
        let mut any_matched = false;
        let mut lock_missed = false;

        for cached in &candidates {
            if !join_matches(join_predicate, cached, source_row, session, params)? {
                continue;
            }

            let target = if row_lockable {
                let key = cached.key.ok_or_else(|| DmlError::internal("MERGE target row has no key"))?;
                match table.lock_row(session, key, session.lock_timeout_ms)? {
                    None => {
                        lock_missed = true;
                        continue;
                    }
                    Some(locked) => {
                        if !locked.shared_data_equal(cached) && !join_matches(join_predicate, &locked, source_row, session, params)? {
                            continue;
                        }
                        locked
                    }
                }
            } else {
                cached.clone()
            };

            any_matched = true;
            let key = target.key.ok_or_else(|| DmlError::internal("MERGE target row has no key"))?;
            if processed_targets.contains(&key) {
                return Err(MergeError::DuplicateKey(key).into());
            }

            if let Some(idx) = self.pick_matched_index(&target, source_row, session, params)? {
                processed_targets.insert(key);
                let action = &mut self.matched[idx].action;
                apply_matched(table, session, triggers, table_name, &target, source_row, action, params, outcome)?;
            }
        }

        if any_matched {
            Ok(SourceMatch::Matched)
        } else if lock_missed {
            Ok(SourceMatch::LockMissed)
        } else {
            Ok(SourceMatch::NotMatched)
        }
    }

    fn insert_not_matched(
        &self,
        table: &mut dyn Table,
        session: &Session,
        triggers: &dyn TriggerHost,
        table_name: &str,
        source_row: &Row,
        params: &[Value],
        outcome: &mut MergeOutcome,
    ) -> Result<(), DmlError> {
        if let Some(idx) = self.pick_not_matched_index(source_row, session, params)? {
            let action = &self.not_matched[idx].action;
            apply_not_matched(table, session, triggers, table_name, source_row, action, params, outcome)?;
        }
        Ok(())
    }

    /// Which statement-trigger kinds this MERGE must fire, per spec §4.5:
    /// "the statement fires each of INSERT, UPDATE, DELETE separately iff
    /// at least one When requires it (evaluated via an or-mask)" — so a
    /// MERGE with only a `WHEN NOT MATCHED THEN INSERT` branch never fires
    /// an UPDATE-kind statement trigger, and vice versa.
    pub fn required_stmt_kinds(&self) -> Vec<StmtKind> {
        let mut kinds = Vec::new();
        if !self.not_matched.is_empty() {
            kinds.push(StmtKind::Insert);
        }
        if self.matched.iter().any(|c| matches!(c.action, MatchedAction::Update(_))) {
            kinds.push(StmtKind::Update);
        }
        if self.matched.iter().any(|c| matches!(c.action, MatchedAction::Delete)) {
            kinds.push(StmtKind::Delete);
        }
        kinds
    }

    fn pick_matched_index(
        &self,
        target: &Row,
        source: &Row,
        session: &Session,
        params: &[Value],
    ) -> Result<Option<usize>, DmlError> {
        for (i, clause) in self.matched.iter().enumerate() {
            if guard_passes(&clause.guard, Some(target), Some(source), session, params)? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    fn pick_not_matched_index(&self, source: &Row, session: &Session, params: &[Value]) -> Result<Option<usize>, DmlError> {
        for (i, clause) in self.not_matched.iter().enumerate() {
            if guard_passes(&clause.guard, None, Some(source), session, params)? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }
}

impl Default for MergeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn join_matches(predicate: &Expr, target: &Row, source: &Row, session: &Session, params: &[Value]) -> Result<bool, DmlError> {
    let ctx = EvalCtx::new(session).with_target(target).with_source(source).with_params(params);
    Ok(predicate.boolean_value(&ctx)?.unwrap_or(false))
}

fn guard_passes(
    guard: &Option<Expr>,
    target: Option<&Row>,
    source: Option<&Row>,
    session: &Session,
    params: &[Value],
) -> Result<bool, DmlError> {
    let Some(guard) = guard else { return Ok(true) };
    let mut ctx = EvalCtx::new(session).with_params(params);
    if let Some(t) = target {
        ctx = ctx.with_target(t);
    }
    if let Some(s) = source {
        ctx = ctx.with_source(s);
    }
    Ok(guard.boolean_value(&ctx)?.unwrap_or(false))
}

#[allow(clippy::too_many_arguments)]
fn apply_matched(
    table: &mut dyn Table,
    session: &Session,
    triggers: &dyn TriggerHost,
    table_name: &str,
    target: &Row,
    source: &Row,
    action: &mut MatchedAction,
    params: &[Value],
    outcome: &mut MergeOutcome,
) -> Result<(), DmlError> {
    match action {
        MatchedAction::Update(set_clauses) => {
            let (new_row, _changed) = build_update_row(table, session, target, set_clauses, Some(source), params)?;
            if triggers.fire_before_row(session, table_name, Some(target), Some(&new_row))? {
                return Ok(());
            }
            table.update_rows(session, &[(target.clone(), new_row.clone())])?;
            triggers.fire_after_row(session, table_name, Some(target), Some(&new_row))?;
            outcome.rows_updated += 1;
        }
        MatchedAction::Delete => {
            if triggers.fire_before_row(session, table_name, Some(target), None)? {
                return Ok(());
            }
            let key = target.key.ok_or_else(|| DmlError::internal("MERGE target row has no key"))?;
            table.remove_row(session, key)?;
            triggers.fire_after_row(session, table_name, Some(target), None)?;
            outcome.rows_deleted += 1;
        }
    }
    Ok(())
}

fn apply_not_matched(
    table: &mut dyn Table,
    session: &Session,
    triggers: &dyn TriggerHost,
    table_name: &str,
    source: &Row,
    action: &NotMatchedInsert,
    params: &[Value],
    outcome: &mut MergeOutcome,
) -> Result<(), DmlError> {
    let spec = InsertSpec {
        targeted_columns: &action.targeted_columns,
        value_expressions: &action.value_expressions,
        overriding_system: action.overriding_system,
    };
    let new_row = build_insert_row(table, session, spec, Some(source), params)?;
    if triggers.fire_before_row(session, table_name, None, Some(&new_row))? {
        return Ok(());
    }
    let inserted = table.add_row(session, new_row)?;
    triggers.fire_after_row(session, table_name, None, Some(&inserted))?;
    outcome.rows_inserted += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::expr::ColumnSide;
    use crate::mem::MemTable;
    use crate::mem::NoTriggers;
    use crate::schema::{ColumnMeta, TableMeta};
    use crate::value::ColumnType;

    /// A [`Table`] wrapping a [`MemTable`] whose `lock_row` misses exactly
    /// once (returns `Ok(None)`) before delegating normally, used to exercise
    /// [`MergeExecutor::run`]'s missed-lock-retry-once path without needing a
    /// real concurrent writer.
    struct FlakyLockTable {
        inner: MemTable,
        missed_once: Cell<bool>,
    }

    impl FlakyLockTable {
        fn new(inner: MemTable) -> Self {
            FlakyLockTable { inner, missed_once: Cell::new(false) }
        }
    }

    impl Table for FlakyLockTable {
        fn meta(&self) -> &TableMeta {
            self.inner.meta()
        }

        fn convert_insert_row(&mut self, session: &Session, row: &mut Row, overriding_system: bool) -> Result<(), DmlError> {
            self.inner.convert_insert_row(session, row, overriding_system)
        }

        fn convert_update_row(&mut self, session: &Session, row: &mut Row) -> Result<(), DmlError> {
            self.inner.convert_update_row(session, row)
        }

        fn add_row(&mut self, session: &Session, row: Row) -> Result<Row, DmlError> {
            self.inner.add_row(session, row)
        }

        fn remove_row(&mut self, session: &Session, key: RowKey) -> Result<(), DmlError> {
            self.inner.remove_row(session, key)
        }

        fn update_rows(&mut self, session: &Session, pairs: &[(Row, Row)]) -> Result<(), DmlError> {
            self.inner.update_rows(session, pairs)
        }

        fn lock_row(&mut self, session: &Session, key: RowKey, timeout_ms: i64) -> Result<Option<Row>, DmlError> {
            if !self.missed_once.replace(true) {
                return Ok(None);
            }
            self.inner.lock_row(session, key, timeout_ms)
        }

        fn scan(&self) -> Vec<Row> {
            self.inner.scan()
        }

        fn get_by_key(&self, key: RowKey) -> Option<Row> {
            self.inner.get_by_key(key)
        }

        fn conflicting_index(&self, row: &Row) -> Option<(u32, Vec<usize>)> {
            self.inner.conflicting_index(row)
        }
    }

    fn table() -> MemTable {
        let meta = TableMeta {
            name: "t".into(),
            columns: vec![
                ColumnMeta::simple(0, "id", ColumnType::Int),
                ColumnMeta::simple(1, "balance", ColumnType::Int),
            ],
            primary_key: Some(vec![0]),
            row_lockable: true,
            unique_indexes: vec![],
            has_row_id: true,
        };
        MemTable::new(meta)
    }

    fn join_on_id() -> Expr {
        Expr::host(|ctx| {
            let t = Expr::Column { side: ColumnSide::Target, index: 0 }.value(ctx)?;
            let s = Expr::Column { side: ColumnSide::Source, index: 0 }.value(ctx)?;
            Ok(Value::Bool(t.sql_eq(&s).unwrap_or(false)))
        })
    }

    #[test]
    fn matched_row_is_updated_and_unmatched_is_inserted() {
        let mut t = table();
        let session = Session::default();
        t.add_row(&session, Row::new(None, vec![Value::Int(1), Value::Int(100)])).unwrap();

        let mut set_clauses = SetClauseList::new(2);
        let balance_col = ColumnMeta::simple(1, "balance", ColumnType::Int);
        let add_delta = Expr::host(|ctx| {
            let cur = Expr::Column { side: ColumnSide::Target, index: 1 }.value(ctx)?.to_i64()?;
            let delta = Expr::Column { side: ColumnSide::Source, index: 1 }.value(ctx)?.to_i64()?;
            Ok(Value::Int(cur + delta))
        });
        set_clauses.add_simple(&balance_col, add_delta, None).unwrap();

        let mut merge = MergeExecutor::new();
        merge.matched.push(WhenClause { guard: None, action: MatchedAction::Update(set_clauses) });
        merge.not_matched.push(WhenClause {
            guard: None,
            action: NotMatchedInsert {
                targeted_columns: vec![0, 1],
                value_expressions: vec![
                    Expr::Column { side: ColumnSide::Source, index: 0 },
                    Expr::Column { side: ColumnSide::Source, index: 1 },
                ],
                overriding_system: false,
            },
        });

        let source_rows = vec![
            Row::new(None, vec![Value::Int(1), Value::Int(10)]),
            Row::new(None, vec![Value::Int(2), Value::Int(50)]),
        ];
        let join = join_on_id();
        let outcome = merge
            .run(&mut t, &session, &NoTriggers, "t", &join, &source_rows, &[])
            .unwrap();

        assert_eq!(outcome.rows_updated, 1);
        assert_eq!(outcome.rows_inserted, 1);
        assert_eq!(t.row_count(), 2);
    }

    #[test]
    fn a_target_row_matched_twice_is_rejected() {
        let mut t = table();
        let session = Session::default();
        t.add_row(&session, Row::new(None, vec![Value::Int(1), Value::Int(100)])).unwrap();

        let mut set_clauses = SetClauseList::new(2);
        let balance_col = ColumnMeta::simple(1, "balance", ColumnType::Int);
        set_clauses.add_simple(&balance_col, Expr::Literal(Value::Int(1)), None).unwrap();

        let mut merge = MergeExecutor::new();
        merge.matched.push(WhenClause { guard: None, action: MatchedAction::Update(set_clauses) });

        // Always-true join: every source row matches every target row.
        let join = Expr::Literal(Value::Bool(true));
        let source_rows = vec![
            Row::new(None, vec![Value::Int(1), Value::Int(1)]),
            Row::new(None, vec![Value::Int(1), Value::Int(1)]),
        ];
        let err = merge.run(&mut t, &session, &NoTriggers, "t", &join, &source_rows, &[]).unwrap_err();
        assert!(matches!(err, DmlError::Merge(MergeError::DuplicateKey(_))));
    }

    #[test]
    fn a_missed_target_lock_is_retried_once_before_falling_to_not_matched() {
        let inner = table();
        let session = Session::default();
        let mut t = FlakyLockTable::new(inner);
        t.add_row(&session, Row::new(None, vec![Value::Int(1), Value::Int(100)])).unwrap();

        let mut set_clauses = SetClauseList::new(2);
        let balance_col = ColumnMeta::simple(1, "balance", ColumnType::Int);
        set_clauses.add_simple(&balance_col, Expr::Literal(Value::Int(999)), None).unwrap();

        let mut merge = MergeExecutor::new();
        merge.matched.push(WhenClause { guard: None, action: MatchedAction::Update(set_clauses) });

        let join = join_on_id();
        let source_rows = vec![Row::new(None, vec![Value::Int(1), Value::Int(1)])];

        let outcome = merge.run(&mut t, &session, &NoTriggers, "t", &join, &source_rows, &[]).unwrap();

        // The first pass misses the lock and defers; the retry pass after the
        // source cursor has advanced past every other row picks it back up
        // rather than falling through to WHEN NOT MATCHED.
        assert_eq!(outcome.rows_updated, 1);
        assert_eq!(outcome.rows_inserted, 0);
        let row = t.get_by_key(RowKey(1)).unwrap();
        assert_eq!(*row.col(1), Value::Int(999));
    }

    #[test]
    fn required_stmt_kinds_reflects_only_the_declared_when_branches() {
        let insert_only = MergeExecutor {
            matched: Vec::new(),
            not_matched: vec![WhenClause {
                guard: None,
                action: NotMatchedInsert {
                    targeted_columns: vec![0],
                    value_expressions: vec![Expr::Column { side: ColumnSide::Source, index: 0 }],
                    overriding_system: false,
                },
            }],
        };
        assert_eq!(insert_only.required_stmt_kinds(), vec![StmtKind::Insert]);

        let mut set_clauses = SetClauseList::new(2);
        let balance_col = ColumnMeta::simple(1, "balance", ColumnType::Int);
        set_clauses.add_simple(&balance_col, Expr::Literal(Value::Int(0)), None).unwrap();
        let update_only = MergeExecutor {
            matched: vec![WhenClause { guard: None, action: MatchedAction::Update(set_clauses) }],
            not_matched: Vec::new(),
        };
        assert_eq!(update_only.required_stmt_kinds(), vec![StmtKind::Update]);

        let delete_only = MergeExecutor {
            matched: vec![WhenClause { guard: None, action: MatchedAction::Delete }],
            not_matched: Vec::new(),
        };
        assert_eq!(delete_only.required_stmt_kinds(), vec![StmtKind::Delete]);

        let none = MergeExecutor::new();
        assert!(none.required_stmt_kinds().is_empty());
    }
}
