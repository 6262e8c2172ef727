//! [`RowAssembly`]: produce a fully-typed, defaults-filled new row for
//! insert or update. Delegates identity/default/generated-column resolution
//! to the storage engine's `convert_insert_row` / `convert_update_row`
//! rather than recomputing generated columns itself.

use itertools::Itertools;

use crate::error::{DmlError, RowAssemblyError};
use crate::expr::{EvalCtx, Expr};
use crate::row::Row;
use crate::schema::TableMeta;
use crate::session::Session;
use crate::set_clause::SetClauseList;
use crate::storage::Table;

/// Targeted-column insert values: a column list and a parallel list of
/// value expressions.
pub struct InsertSpec<'a> {
    pub targeted_columns: &'a [usize],
    pub value_expressions: &'a [Expr],
    pub overriding_system: bool,
}

/// Build a fully-typed new row for INSERT. `source_row` is bound as
/// [`crate::expr::ColumnSide::Source`] for MERGE's
/// `WHEN NOT MATCHED THEN INSERT`, whose value expressions reference the
/// `USING` row; `None` for an ordinary `INSERT ... VALUES`.
pub fn build_insert_row(
    table: &mut dyn Table,
    session: &Session,
    spec: InsertSpec<'_>,
    source_row: Option<&Row>,
    params: &[crate::value::Value],
) -> Result<Row, DmlError> {
    if spec.targeted_columns.len() != spec.value_expressions.len() {
        return Err(RowAssemblyError::ColumnCountMismatch {
            expected: spec.targeted_columns.len(),
            got: spec.value_expressions.len(),
        }
        .into());
    }

    let meta: TableMeta = table.meta().clone();

    if !spec.targeted_columns.iter().all_unique() {
        let dup = spec
            .targeted_columns
            .iter()
            .duplicates()
            .next()
            .and_then(|&idx| meta.columns.get(idx))
            .map(|c| c.name.clone())
            .unwrap_or_else(|| "?".to_string());
        return Err(RowAssemblyError::DuplicateColumnName(dup).into());
    }
    let mut row = Row::template(meta.col_count());

    for (&col_idx, expr) in spec.targeted_columns.iter().zip(spec.value_expressions) {
        let col = &meta.columns[col_idx];
        if col.flags.generated_always && !expr.is_default_marker() {
            return Err(RowAssemblyError::GeneratedColumnAssigned(col.name.clone()).into());
        }
        if expr.is_default_marker() {
            continue;
        }
        let mut ctx = EvalCtx::new(session).with_target(&row).with_params(params);
        if let Some(source) = source_row {
            ctx = ctx.with_source(source);
        }
        let value = expr.value(&ctx)?;
        row.set_col(col_idx, value.convert_to(col.col_type.clone())?);
    }

    table.convert_insert_row(session, &mut row, spec.overriding_system)?;
    Ok(row)
}

/// Build the new row for UPDATE from `old_row` and a `SetClauseList`.
/// Returns `(new_row, changed)` where `changed` is
/// `false` only under `update_to_current_values_returns_zero` when the
/// computed row is identical to `old_row`. `source_row` is the donor row for
/// `ON DUPLICATE KEY UPDATE` and MERGE's `WHEN MATCHED THEN UPDATE`; `None`
/// for a plain `UPDATE ... SET`.
pub fn build_update_row(
    table: &mut dyn Table,
    session: &Session,
    old_row: &Row,
    set_clauses: &mut SetClauseList,
    source_row: Option<&Row>,
    params: &[crate::value::Value],
) -> Result<(Row, bool), DmlError> {
    let meta: TableMeta = table.meta().clone();
    let mut new_row = old_row.clone();
    new_row.key = old_row.key;

    let mut touched_by_on_update: Vec<usize> = Vec::new();

    for col in &meta.columns {
        let action = set_clauses.action_for(col.id);
        let computed = match action {
            None => {
                if col.flags.generated_always {
                    crate::value::Value::Null
                } else {
                    old_row.col(col.id).clone()
                }
            }
            Some(crate::set_clause::UpdateAction::OnUpdateMarker) => {
                if col.flags.generated_always {
                    crate::value::Value::Null
                } else {
                    old_row.col(col.id).clone()
                }
            }
            Some(crate::set_clause::UpdateAction::Default) => {
                if col.flags.identity {
                    old_row.col(col.id).clone()
                } else {
                    crate::value::Value::Null
                }
            }
            Some(other) => {
                let ctx = crate::set_clause::SetEvalCtx {
                    session,
                    old_row,
                    new_row_so_far: &new_row,
                    source_row,
                    params,
                };
                let v = crate::set_clause::evaluate_action(other, col, &ctx, set_clauses)?;
                if v.is_null() && col.flags.default_on_null {
                    if col.flags.identity {
                        old_row.col(col.id).clone()
                    } else {
                        crate::value::Value::Null
                    }
                } else if col.flags.generated_always {
                    return Err(RowAssemblyError::GeneratedColumnAssigned(col.name.clone()).into());
                } else {
                    v
                }
            }
        };
        new_row.set_col(col.id, computed.convert_to(col.col_type.clone())?);
        if set_clauses.action_for(col.id).is_none() && col.on_update_expr.is_some() {
            touched_by_on_update.push(col.id);
        }
    }

    new_row.key = old_row.key;
    table.convert_update_row(session, &mut new_row)?;

    let has_any_on_update = meta.columns.iter().any(|c| c.on_update_expr.is_some());
    if has_any_on_update && !rows_equal(old_row, &new_row) {
        for col in &meta.columns {
            if set_clauses.action_for(col.id).is_some() {
                continue;
            }
            if let Some(expr) = &col.on_update_expr {
                let ctx = EvalCtx::new(session).with_target(&new_row).with_params(params);
                let v = expr.value(&ctx)?;
                new_row.set_col(col.id, v.convert_to(col.col_type.clone())?);
            }
        }
        table.convert_update_row(session, &mut new_row)?;
    }

    let changed = if session.update_to_current_values_returns_zero {
        !rows_equal(old_row, &new_row)
    } else {
        true
    };

    Ok((new_row, changed))
}

fn rows_equal(a: &Row, b: &Row) -> bool {
    a.values == b.values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemTable;
    use crate::schema::{ColumnMeta, TableMeta};
    use crate::value::{ColumnType, Value};

    fn simple_table() -> MemTable {
        let meta = TableMeta {
            name: "t".into(),
            columns: vec![
                ColumnMeta::simple(0, "id", ColumnType::Int),
                ColumnMeta::simple(1, "v", ColumnType::Int),
            ],
            primary_key: Some(vec![0]),
            row_lockable: true,
            unique_indexes: vec![],
            has_row_id: true,
        };
        MemTable::new(meta)
    }

    #[test]
    fn insert_arity_mismatch_fails() {
        let mut table = simple_table();
        let session = Session::default();
        let spec = InsertSpec {
            targeted_columns: &[0, 1],
            value_expressions: &[Expr::Literal(Value::Int(1))],
            overriding_system: false,
        };
        let err = build_insert_row(&mut table, &session, spec, None, &[]).unwrap_err();
        assert!(matches!(err, DmlError::RowAssembly(RowAssemblyError::ColumnCountMismatch { .. })));
    }

    #[test]
    fn insert_rejects_repeated_column_in_column_list() {
        let mut table = simple_table();
        let session = Session::default();
        let spec = InsertSpec {
            targeted_columns: &[0, 0],
            value_expressions: &[Expr::Literal(Value::Int(1)), Expr::Literal(Value::Int(2))],
            overriding_system: false,
        };
        let err = build_insert_row(&mut table, &session, spec, None, &[]).unwrap_err();
        assert!(matches!(err, DmlError::RowAssembly(RowAssemblyError::DuplicateColumnName(_))));
    }

    #[test]
    fn insert_skips_default_marker_columns() {
        let mut table = simple_table();
        let session = Session::default();
        let spec = InsertSpec {
            targeted_columns: &[0, 1],
            value_expressions: &[Expr::Literal(Value::Int(1)), Expr::DefaultMarker],
            overriding_system: false,
        };
        let row = build_insert_row(&mut table, &session, spec, None, &[]).unwrap();
        assert_eq!(row.col(0), &Value::Int(1));
        assert_eq!(row.col(1), &Value::Null);
    }
}
