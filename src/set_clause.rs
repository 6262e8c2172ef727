//! [`SetClauseEngine`]: interpreting an UPDATE SET list — simple
//! assignments, row-value assignments, array-element assignments,
//! `DEFAULT`, and `ON UPDATE`.
//!
//! The row-value-assignment cache is modeled as a small arena owned by the
//! [`SetClauseList`], with `UpdateAction::Multiple` variants holding an
//! index into it, rather than an `Rc<RefCell<_>>` shared between actions.

use smallvec::SmallVec;

use crate::error::{DmlError, SetClauseError};
use crate::expr::{ColumnSide, EvalCtx, Expr};
use crate::row::Row;
use crate::schema::ColumnMeta;
use crate::session::Session;
use crate::value::Value;

/// Array-element index paths are almost always 1-3 levels deep
/// (`a[i]`, `a[i][j]`); inline storage avoids a heap allocation for the
/// common case.
type IndexPath = SmallVec<[i64; 4]>;

/// Ceiling on array element indexes accepted by [`array_update`]. Not part
/// of the SQL standard; a guard against pathological `a[999999999]=x`
/// growing an unbounded vector.
pub const MAX_ARRAY_CARDINALITY: i64 = 1_000_000;

/// One SET-list action, tagged rather than downcast.
#[derive(Debug, Clone)]
pub enum UpdateAction {
    Simple(Expr, Option<Vec<Expr>>),
    Multiple {
        arena_idx: usize,
        position: usize,
        first: bool,
        last: bool,
        array_indexes: Option<Vec<Expr>>,
    },
    Default,
    OnUpdateMarker,
}

struct RowExprSlot {
    expr: Expr,
    len: usize,
    cached: Option<Vec<Value>>,
}

/// A dense array of [`UpdateAction`] indexed by column id, at most one
/// action per column. Evaluation order is column-id ascending (enforced by
/// `row_assembly::build_update_row` iterating `meta.columns` in id order),
/// so the `first=true` action of a `Multiple` group is always the
/// smallest-id target and `last=true` the largest.
pub struct SetClauseList {
    actions: Vec<Option<UpdateAction>>,
    arena: Vec<RowExprSlot>,
}

impl SetClauseList {
    pub fn new(col_count: usize) -> Self {
        SetClauseList {
            actions: vec![None; col_count],
            arena: Vec::new(),
        }
    }

    pub fn action_for(&self, col_id: usize) -> Option<UpdateAction> {
        self.actions[col_id].clone()
    }

    fn reject_duplicate(&self, col_id: usize, col_name: &str) -> Result<(), DmlError> {
        if self.actions[col_id].is_some() {
            return Err(SetClauseError::DuplicateColumnName(col_name.to_string()).into());
        }
        Ok(())
    }

    pub fn add_simple(
        &mut self,
        col: &ColumnMeta,
        expr: Expr,
        array_indexes: Option<Vec<Expr>>,
    ) -> Result<(), DmlError> {
        self.reject_duplicate(col.id, &col.name)?;
        self.actions[col.id] = Some(UpdateAction::Simple(expr, array_indexes));
        Ok(())
    }

    pub fn add_default(&mut self, col: &ColumnMeta) -> Result<(), DmlError> {
        self.reject_duplicate(col.id, &col.name)?;
        self.actions[col.id] = Some(UpdateAction::Default);
        Ok(())
    }

    /// `SET (c1, c2) = (v1, v2)`: one shared row-expression, evaluated once
    /// (by the `first=true` action) and cached until the `last=true` action
    /// clears it. `cols` must be given in the same order as the row-ctor's
    /// positions.
    pub fn add_multiple(
        &mut self,
        cols: &[ColumnMeta],
        row_expr: Expr,
        array_indexes: Vec<Option<Vec<Expr>>>,
    ) -> Result<(), DmlError> {
        for col in cols {
            self.reject_duplicate(col.id, &col.name)?;
        }
        let arena_idx = self.arena.len();
        self.arena.push(RowExprSlot {
            expr: row_expr,
            len: cols.len(),
            cached: None,
        });
        let last_pos = cols.len() - 1;
        for (position, (col, idxs)) in cols.iter().zip(array_indexes).enumerate() {
            self.actions[col.id] = Some(UpdateAction::Multiple {
                arena_idx,
                position,
                first: position == 0,
                last: position == last_pos,
                array_indexes: idxs,
            });
        }
        Ok(())
    }

    pub fn implicit_on_update_columns<'a>(&self, columns: &'a [ColumnMeta]) -> Vec<&'a ColumnMeta> {
        columns
            .iter()
            .filter(|c| c.on_update_expr.is_some() && self.actions[c.id].is_none())
            .collect()
    }
}

/// Evaluation environment for one row's worth of SET-action evaluation.
/// `source_row` is the donor row for `ON DUPLICATE KEY UPDATE ... VALUES(col)`
/// and MERGE's `WHEN MATCHED THEN UPDATE` — `None` for a plain UPDATE, which
/// has no second row in scope.
pub struct SetEvalCtx<'a> {
    pub session: &'a Session,
    pub old_row: &'a Row,
    pub new_row_so_far: &'a Row,
    pub source_row: Option<&'a Row>,
    pub params: &'a [Value],
}

/// Evaluate a non-`Default`/non-`OnUpdateMarker` action for one column.
/// Those two variants are handled directly in `row_assembly` because they
/// don't need expression evaluation at all.
pub fn evaluate_action(
    action: &UpdateAction,
    col: &ColumnMeta,
    ctx: &SetEvalCtx<'_>,
    list: &mut SetClauseList,
) -> Result<Value, DmlError> {
    match action {
        UpdateAction::Simple(expr, array_indexes) => {
            let eval_ctx = make_ctx(ctx);
            let rhs = expr.value(&eval_ctx)?;
            apply_optional_array_update(col, ctx.old_row, array_indexes.as_deref(), rhs, &eval_ctx)
        }
        UpdateAction::Multiple {
            arena_idx,
            position,
            first,
            last,
            array_indexes,
        } => {
            if *first {
                let eval_ctx = make_ctx(ctx);
                let slot = &list.arena[*arena_idx];
                let tuple = slot.expr.row_tuple(&eval_ctx, slot.len)?;
                list.arena[*arena_idx].cached = Some(tuple);
            }
            let tuple = list.arena[*arena_idx]
                .cached
                .clone()
                .ok_or_else(|| DmlError::internal("row-expression cache missing for SetMultiple action"))?;
            let rhs = tuple
                .get(*position)
                .cloned()
                .ok_or_else(|| DmlError::internal("row-expression position out of range"))?;
            if *last {
                list.arena[*arena_idx].cached = None;
            }
            let eval_ctx = make_ctx(ctx);
            apply_optional_array_update(col, ctx.old_row, array_indexes.as_deref(), rhs, &eval_ctx)
        }
        UpdateAction::Default | UpdateAction::OnUpdateMarker => {
            Ok(ctx.old_row.col(col.id).clone())
        }
    }
}

fn make_ctx<'a>(ctx: &SetEvalCtx<'a>) -> EvalCtx<'a> {
    let mut eval_ctx = EvalCtx::new(ctx.session).with_target(ctx.old_row).with_params(ctx.params);
    if let Some(source) = ctx.source_row {
        eval_ctx = eval_ctx.with_source(source);
    }
    eval_ctx
}

fn apply_optional_array_update(
    col: &ColumnMeta,
    old_row: &Row,
    array_indexes: Option<&[Expr]>,
    rhs: Value,
    ctx: &EvalCtx<'_>,
) -> Result<Value, DmlError> {
    match array_indexes {
        None => Ok(rhs),
        Some(idx_exprs) => {
            let indexes = eval_indexes(idx_exprs, ctx)?;
            array_update(old_row.col(col.id), &indexes, rhs)
        }
    }
}

fn eval_indexes(idx_exprs: &[Expr], ctx: &EvalCtx<'_>) -> Result<IndexPath, DmlError> {
    idx_exprs.iter().map(|e| e.value(ctx)?.to_i64()).collect()
}

/// Recursively descend `indexes` against `base`, producing a new array
/// value with the deepest element replaced. Iterative-in-spirit: each level
/// produces a freshly owned `Vec`, so there is no possibility of cycles.
pub fn array_update(base: &Value, indexes: &[i64], new_value: Value) -> Result<Value, DmlError> {
    let (idx, rest) = indexes
        .split_first()
        .ok_or_else(|| DmlError::internal("array_update called with empty index path"))?;
    let idx = *idx;
    if !(1..=MAX_ARRAY_CARDINALITY).contains(&idx) {
        return Err(SetClauseError::ArrayElementOutOfRange {
            got: idx,
            max: MAX_ARRAY_CARDINALITY,
        }
        .into());
    }
    let pos = (idx - 1) as usize;

    let mut items: Vec<Value> = match base {
        Value::Null => {
            if !rest.is_empty() {
                return Err(SetClauseError::NullValueInArrayTarget.into());
            }
            Vec::new()
        }
        Value::Array(items) => items.clone(),
        _ => return Err(SetClauseError::ArrayElementNotArray.into()),
    };

    while items.len() <= pos {
        items.push(Value::Null);
    }

    if rest.is_empty() {
        items[pos] = new_value;
    } else {
        items[pos] = array_update(&items[pos], rest, new_value)?;
    }

    Ok(Value::Array(items))
}

/// Binds unqualified/qualified column references to a specific side
/// (target or source) and folds constants. A thin pass: real column-name
/// resolution is a planner concern out of scope here, so this operates on
/// already-`Expr::Column` references and only rewrites their `side`.
pub fn bind_side(expr: Expr, side: ColumnSide) -> Expr {
    match expr {
        Expr::Column { index, .. } => Expr::Column { side, index },
        Expr::RowCtor(items) => Expr::RowCtor(items.into_iter().map(|e| bind_side(e, side)).collect()),
        other => other.optimize(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ColumnType;

    fn col(id: usize, name: &str) -> ColumnMeta {
        ColumnMeta::simple(id, name, ColumnType::Int)
    }

    #[test]
    fn duplicate_column_assignment_fails() {
        let mut list = SetClauseList::new(2);
        let c0 = col(0, "a");
        list.add_simple(&c0, Expr::Literal(Value::Int(1)), None).unwrap();
        let err = list.add_simple(&c0, Expr::Literal(Value::Int(2)), None).unwrap_err();
        assert!(matches!(err, DmlError::SetClause(SetClauseError::DuplicateColumnName(_))));
    }

    #[test]
    fn array_update_replaces_single_element() {
        let base = Value::Array(vec![Value::Int(10), Value::Int(20), Value::Int(30)]);
        let updated = array_update(&base, &[2], Value::Int(99)).unwrap();
        assert_eq!(
            updated,
            Value::Array(vec![Value::Int(10), Value::Int(99), Value::Int(30)])
        );
    }

    #[test]
    fn array_update_grows_and_fills_null_gaps() {
        let base = Value::Array(vec![Value::Int(10), Value::Int(20), Value::Int(30)]);
        let updated = array_update(&base, &[5], Value::Int(7)).unwrap();
        assert_eq!(
            updated,
            Value::Array(vec![
                Value::Int(10),
                Value::Int(20),
                Value::Int(30),
                Value::Null,
                Value::Int(7)
            ])
        );
    }

    #[test]
    fn array_update_rejects_index_below_one() {
        let base = Value::Array(vec![Value::Int(1)]);
        let err = array_update(&base, &[0], Value::Int(1)).unwrap_err();
        assert!(matches!(err, DmlError::SetClause(SetClauseError::ArrayElementOutOfRange { .. })));
    }

    #[test]
    fn array_update_rejects_non_array_intermediate() {
        let base = Value::Int(5);
        let err = array_update(&base, &[1, 2], Value::Int(1)).unwrap_err();
        assert!(matches!(err, DmlError::SetClause(SetClauseError::ArrayElementNotArray)));
    }

    #[test]
    fn array_update_rejects_null_intermediate() {
        let err = array_update(&Value::Null, &[1, 2], Value::Int(1)).unwrap_err();
        assert!(matches!(err, DmlError::SetClause(SetClauseError::NullValueInArrayTarget)));
    }
}
