//! [`DupKeyHandler`]: `INSERT ... ON DUPLICATE KEY UPDATE`, `INSERT IGNORE`,
//! and `ON CONFLICT DO NOTHING`. A duplicate is resolved by synthesizing a
//! child UPDATE statement against the row that already owns the
//! conflicting index entry, reusing the UPDATE row-assembly path as the
//! fallback from the INSERT path rather than duplicating that logic for
//! the upsert case.

use crate::error::DmlError;
use crate::row::Row;
use crate::row_assembly::build_update_row;
use crate::session::Session;
use crate::set_clause::SetClauseList;
use crate::storage::Table;
use crate::value::Value;

/// What to do when `INSERT`ing `row` collides with an existing unique/primary
/// key.
pub enum DupKeyMode<'a> {
    /// `INSERT IGNORE` / `ON CONFLICT DO NOTHING`: swallow the conflict.
    Ignore,
    /// `ON DUPLICATE KEY UPDATE`: apply `SetClauseList` to the existing row.
    /// `VALUES(col)` in the SET list resolves against the row that would
    /// have been inserted — bound as [`crate::expr::ColumnSide::Source`].
    UpdateOnConflict(&'a mut SetClauseList),
}

pub enum DupKeyOutcome {
    Inserted(Row),
    Updated { old: Row, new: Row },
    Ignored(Row),
}

/// Try to insert `row`; on a unique-key conflict, run `mode` instead of
/// propagating the error.
pub fn attempt_insert(
    table: &mut dyn Table,
    session: &Session,
    row: Row,
    mode: &mut DupKeyMode<'_>,
    params: &[Value],
) -> Result<DupKeyOutcome, DmlError> {
    if let Some((_index_id, columns)) = table.conflicting_index(&row) {
        let existing = find_existing(table, &row, &columns).ok_or_else(|| {
            DmlError::internal("conflicting_index reported a conflict but no matching row was found")
        })?;
        return match mode {
            DupKeyMode::Ignore => Ok(DupKeyOutcome::Ignored(row)),
            DupKeyMode::UpdateOnConflict(set_clauses) => {
                let (new_row, _changed) =
                    build_update_row(table, session, &existing, set_clauses, Some(&row), params)?;
                table.update_rows(session, &[(existing.clone(), new_row.clone())])?;
                Ok(DupKeyOutcome::Updated {
                    old: existing,
                    new: new_row,
                })
            }
        };
    }
    let inserted = table.add_row(session, row)?;
    Ok(DupKeyOutcome::Inserted(inserted))
}

fn find_existing(table: &dyn Table, row: &Row, columns: &[usize]) -> Option<Row> {
    let proj: Vec<&Value> = columns.iter().map(|&i| row.col(i)).collect();
    table
        .scan()
        .into_iter()
        .find(|existing| columns.iter().map(|&i| existing.col(i)).collect::<Vec<_>>() == proj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{ColumnSide, Expr};
    use crate::mem::MemTable;
    use crate::schema::{ColumnMeta, TableMeta};
    use crate::value::ColumnType;

    fn table() -> MemTable {
        let meta = TableMeta {
            name: "t".into(),
            columns: vec![
                ColumnMeta::simple(0, "id", ColumnType::Int),
                ColumnMeta::simple(1, "hits", ColumnType::Int),
            ],
            primary_key: Some(vec![0]),
            row_lockable: true,
            unique_indexes: vec![],
            has_row_id: true,
        };
        MemTable::new(meta)
    }

    #[test]
    fn fresh_key_inserts_normally() {
        let mut t = table();
        let session = Session::default();
        let row = Row::new(None, vec![Value::Int(1), Value::Int(1)]);
        let mut mode = DupKeyMode::Ignore;
        let outcome = attempt_insert(&mut t, &session, row, &mut mode, &[]).unwrap();
        assert!(matches!(outcome, DupKeyOutcome::Inserted(_)));
    }

    #[test]
    fn conflict_with_ignore_mode_drops_the_row() {
        let mut t = table();
        let session = Session::default();
        t.add_row(&session, Row::new(None, vec![Value::Int(1), Value::Int(1)])).unwrap();

        let row = Row::new(None, vec![Value::Int(1), Value::Int(1)]);
        let mut mode = DupKeyMode::Ignore;
        let outcome = attempt_insert(&mut t, &session, row, &mut mode, &[]).unwrap();
        assert!(matches!(outcome, DupKeyOutcome::Ignored(_)));
        assert_eq!(t.row_count(), 1);
    }

    #[test]
    fn conflict_with_update_mode_bumps_the_existing_row() {
        let mut t = table();
        let session = Session::default();
        t.add_row(&session, Row::new(None, vec![Value::Int(1), Value::Int(5)])).unwrap();

        let mut set_clauses = SetClauseList::new(2);
        let hits = &ColumnMeta::simple(1, "hits", ColumnType::Int);
        // hits = hits + VALUES(hits), using the Source-bound donor row.
        let expr = Expr::host(|ctx| {
            let old = Expr::Column { side: ColumnSide::Target, index: 1 }.value(ctx)?.to_i64()?;
            let donor = Expr::Column { side: ColumnSide::Source, index: 1 }.value(ctx)?.to_i64()?;
            Ok(Value::Int(old + donor))
        });
        set_clauses.add_simple(hits, expr, None).unwrap();

        let row = Row::new(None, vec![Value::Int(1), Value::Int(3)]);
        let mut mode = DupKeyMode::UpdateOnConflict(&mut set_clauses);
        let outcome = attempt_insert(&mut t, &session, row, &mut mode, &[]).unwrap();
        match outcome {
            DupKeyOutcome::Updated { new, .. } => assert_eq!(new.col(1), &Value::Int(8)),
            _ => panic!("expected an Updated outcome"),
        }
        assert_eq!(t.row_count(), 1);
    }
}
