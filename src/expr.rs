//! The expression contract used by the rest of this crate, and a small
//! tagged-union implementation of it.
//!
//! Expression trees are an explicit sum type rather than a class hierarchy
//! resolved at runtime via downcasts, matched wherever a variant needs to
//! be distinguished — including here, since `SetClauseEngine` needs to tell
//! a `DEFAULT` marker apart from an ordinary expression without downcasting.

use std::sync::Arc;

use crate::error::{ConversionError, DmlError};
use crate::row::Row;
use crate::session::Session;
use crate::value::Value;

/// Which row a column reference resolves against. Planner-bound: by the
/// time an `Expr::Column` reaches this crate, `mapAndOptimize` (here,
/// [`Expr::bind`]) has already decided which side it targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSide {
    Target,
    Source,
}

/// Evaluation environment for an [`Expr`]: the session plus whichever rows
/// are in scope. `target` is the row being built/updated; `source` is only
/// present for MERGE's `USING` side and ON-DUPLICATE-KEY's donor row.
pub struct EvalCtx<'a> {
    pub session: &'a Session,
    pub target: Option<&'a Row>,
    pub source: Option<&'a Row>,
    pub params: &'a [Value],
}

impl<'a> EvalCtx<'a> {
    pub fn new(session: &'a Session) -> Self {
        EvalCtx {
            session,
            target: None,
            source: None,
            params: &[],
        }
    }

    pub fn with_target(mut self, row: &'a Row) -> Self {
        self.target = Some(row);
        self
    }

    pub fn with_source(mut self, row: &'a Row) -> Self {
        self.source = Some(row);
        self
    }

    pub fn with_params(mut self, params: &'a [Value]) -> Self {
        self.params = params;
        self
    }
}

type HostFn = Arc<dyn Fn(&EvalCtx) -> Result<Value, DmlError> + Send + Sync>;

/// An expression tree evaluable against a [`Session`] (plus whatever rows
/// are in scope), producing a [`Value`]. Knows whether it is constant so
/// `SetClauseEngine::optimize` can fold it ahead of the row loop.
#[derive(Clone)]
pub enum Expr {
    Literal(Value),
    Parameter(usize),
    Column { side: ColumnSide, index: usize },
    /// The bare `DEFAULT` keyword in a VALUES list or SET clause.
    DefaultMarker,
    /// A row-value constructor, `(e1, e2, ...)`.
    RowCtor(Vec<Expr>),
    /// Escape hatch for planner-supplied expressions this crate does not
    /// need to introspect (arithmetic, function calls, subqueries): a
    /// closure over the evaluation context. Not constant-foldable.
    Host(HostFn),
}

impl std::fmt::Debug for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Literal(v) => write!(f, "Literal({v:?})"),
            Expr::Parameter(i) => write!(f, "Parameter({i})"),
            Expr::Column { side, index } => write!(f, "Column({side:?}, {index})"),
            Expr::DefaultMarker => write!(f, "DEFAULT"),
            Expr::RowCtor(items) => write!(f, "RowCtor({items:?})"),
            Expr::Host(_) => write!(f, "Host(..)"),
        }
    }
}

impl Expr {
    pub fn host(f: impl Fn(&EvalCtx) -> Result<Value, DmlError> + Send + Sync + 'static) -> Self {
        Expr::Host(Arc::new(f))
    }

    pub fn is_default_marker(&self) -> bool {
        matches!(self, Expr::DefaultMarker)
    }

    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Literal(_) => true,
            Expr::RowCtor(items) => items.iter().all(Expr::is_constant),
            _ => false,
        }
    }

    /// Fold constant sub-expressions ahead of the row loop. Only `RowCtor`
    /// needs recursion here; everything else is already maximally reduced
    /// or is opaque (`Host`).
    pub fn optimize(self) -> Expr {
        match self {
            Expr::RowCtor(items) => Expr::RowCtor(items.into_iter().map(Expr::optimize).collect()),
            other => other,
        }
    }

    pub fn value(&self, ctx: &EvalCtx) -> Result<Value, DmlError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Parameter(i) => ctx
                .params
                .get(*i)
                .cloned()
                .ok_or_else(|| DmlError::internal(format!("parameter {i} out of range"))),
            Expr::Column { side, index } => {
                let row = match side {
                    ColumnSide::Target => ctx.target,
                    ColumnSide::Source => ctx.source,
                }
                .ok_or_else(|| DmlError::internal("column reference has no bound row in this context"))?;
                row.values
                    .get(*index)
                    .cloned()
                    .ok_or_else(|| DmlError::internal(format!("column index {index} out of range")))
            }
            Expr::DefaultMarker => Ok(Value::Null),
            Expr::RowCtor(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(item.value(ctx)?);
                }
                Ok(Value::Row(values))
            }
            Expr::Host(f) => f(ctx),
        }
    }

    pub fn boolean_value(&self, ctx: &EvalCtx) -> Result<Option<bool>, DmlError> {
        self.value(ctx)?.to_bool()
    }

    /// Evaluate and coerce to a row-tuple, used by `SET (c1,c2) = (v1,v2)`.
    /// Fails `DATA_CONVERSION_ERROR` on NULL and arity mismatch.
    pub fn row_tuple(&self, ctx: &EvalCtx, expected_len: usize) -> Result<Vec<Value>, DmlError> {
        let v = self.value(ctx)?;
        match v {
            Value::Null => Err(ConversionError::NullRowExpression.into()),
            Value::Row(items) if items.len() == expected_len => Ok(items),
            Value::Row(items) => Err(ConversionError::RowArityMismatch {
                expected: expected_len,
                got: items.len(),
            }
            .into()),
            other => Err(ConversionError::NotConvertible {
                from: match other {
                    Value::Array(_) => "ARRAY",
                    _ => "SCALAR",
                },
                to: "ROW",
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_is_constant_and_evaluates_itself() {
        let session = Session::default();
        let ctx = EvalCtx::new(&session);
        let e = Expr::Literal(Value::Int(7));
        assert!(e.is_constant());
        assert_eq!(e.value(&ctx).unwrap(), Value::Int(7));
    }

    #[test]
    fn default_marker_is_not_constant_but_is_itself() {
        assert!(!Expr::DefaultMarker.is_constant());
        assert!(Expr::DefaultMarker.is_default_marker());
    }

    #[test]
    fn row_ctor_reads_target_columns() {
        let session = Session::default();
        let row = Row::new(None, vec![Value::Int(1), Value::Int(2)]);
        let ctx = EvalCtx::new(&session).with_target(&row);
        let e = Expr::RowCtor(vec![
            Expr::Column { side: ColumnSide::Target, index: 0 },
            Expr::Column { side: ColumnSide::Target, index: 1 },
        ]);
        assert_eq!(e.value(&ctx).unwrap(), Value::Row(vec![Value::Int(1), Value::Int(2)]));
    }
}
