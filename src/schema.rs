//! Column and table metadata, trimmed to the flags this DML core actually
//! branches on (identity, generated, default, on-update) rather than the
//! full DDL surface (sequences, access control, table type) which belongs
//! to the planner/DDL layer out of scope here.

pub use crate::value::ColumnType;
use crate::expr::Expr;

/// Per-column flags. At most one of `generated_always`,
/// `generated_by_default`, and `generated_expression` should be set on a
/// real schema, but the DML core does not enforce that — it is a planner
/// invariant, not a runtime one.
#[derive(Debug, Clone, Default)]
pub struct ColumnFlags {
    pub identity: bool,
    pub generated_always: bool,
    pub generated_by_default: bool,
    pub generated_expression: bool,
    pub default_on_null: bool,
    pub hidden: bool,
}

/// A column's static description: id, declared type, flags, and the source
/// expression backing each non-null flag.
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub id: usize,
    pub name: String,
    pub col_type: ColumnType,
    pub flags: ColumnFlags,
    pub default_expr: Option<Expr>,
    pub generated_expr: Option<Expr>,
    pub on_update_expr: Option<Expr>,
    pub not_null: bool,
}

impl ColumnMeta {
    pub fn simple(id: usize, name: impl Into<String>, col_type: ColumnType) -> Self {
        ColumnMeta {
            id,
            name: name.into(),
            col_type,
            flags: ColumnFlags::default(),
            default_expr: None,
            generated_expr: None,
            on_update_expr: None,
            not_null: false,
        }
    }

    pub fn is_generated_always(&self) -> bool {
        self.flags.generated_always
    }

    /// Whether this column's value is system-controlled unless
    /// `overriding_system` is set: identity or generated-always columns.
    pub fn is_system_controlled(&self) -> bool {
        self.flags.identity || self.flags.generated_always
    }
}

/// A table's column list plus the pieces the DML core needs to know about
/// to build rows and route conflicts: a primary key descriptor (column ids,
/// in order) and the row-lockable capability flag.
#[derive(Debug, Clone)]
pub struct TableMeta {
    pub name: String,
    pub columns: Vec<ColumnMeta>,
    pub primary_key: Option<Vec<usize>>,
    pub row_lockable: bool,
    /// One or more unique indexes, each a non-empty, ordered list of column
    /// ids. The primary key (if any) need not also appear here.
    pub unique_indexes: Vec<UniqueIndex>,
    pub has_row_id: bool,
}

#[derive(Debug, Clone)]
pub struct UniqueIndex {
    pub id: u32,
    pub columns: Vec<usize>,
}

impl TableMeta {
    pub fn col_count(&self) -> usize {
        self.columns.len()
    }

    pub fn find_by_name(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Every column that is an identity, has a non-constant default, or
    /// participates in the primary key — used by `GeneratedKeys`'s boolean
    /// "all auto-ish" request.
    pub fn auto_ish_columns(&self) -> Vec<usize> {
        let pk: Vec<usize> = self.primary_key.clone().unwrap_or_default();
        self.columns
            .iter()
            .filter(|c| {
                c.flags.identity
                    || c.flags.generated_always
                    || c.flags.generated_by_default
                    || c.default_expr.as_ref().is_some_and(|e| !e.is_constant())
                    || pk.contains(&c.id)
            })
            .map(|c| c.id)
            .collect()
    }
}
