//! A minimal in-memory [`Table`] and friends, used only by this crate's own
//! tests and the integration suite. Rows keyed in a `BTreeMap`, a handful
//! of unique indexes checked by linear scan rather than a real B-tree
//! index — adequate for a reference implementation, not for anything that
//! needs to be fast.

use std::collections::BTreeMap;

use crate::error::{DmlError, DupKeyError, RowAssemblyError};
use crate::expr::EvalCtx;
use crate::row::{Row, RowKey};
use crate::schema::TableMeta;
use crate::session::Session;
use crate::storage::{RightKind, StmtKind, Table, TriggerHost, User};
use crate::value::Value;

/// Index id reserved for primary-key conflicts, never assigned to a
/// `UniqueIndex` in [`TableMeta::unique_indexes`].
pub const PRIMARY_KEY_INDEX_ID: u32 = 0;

pub struct MemTable {
    meta: TableMeta,
    rows: BTreeMap<u64, Row>,
    next_key: u64,
}

impl MemTable {
    pub fn new(meta: TableMeta) -> Self {
        MemTable {
            meta,
            rows: BTreeMap::new(),
            next_key: 1,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn find_conflict(&self, row: &Row) -> Option<(u32, Vec<usize>)> {
        if let Some(pk) = self.meta.primary_key.clone() {
            if !pk.is_empty() && self.conflicts_on(&pk, row) {
                return Some((PRIMARY_KEY_INDEX_ID, pk));
            }
        }
        for idx in &self.meta.unique_indexes {
            if self.conflicts_on(&idx.columns, row) {
                return Some((idx.id, idx.columns.clone()));
            }
        }
        None
    }

    fn conflicts_on(&self, columns: &[usize], row: &Row) -> bool {
        let proj: Vec<&Value> = columns.iter().map(|&i| row.col(i)).collect();
        if proj.iter().any(|v| v.is_null()) {
            return false;
        }
        self.rows.values().any(|existing| {
            existing.key != row.key
                && columns.iter().map(|&i| existing.col(i)).collect::<Vec<_>>() == proj
        })
    }
}

impl Table for MemTable {
    fn meta(&self) -> &TableMeta {
        &self.meta
    }

    fn convert_insert_row(&mut self, session: &Session, row: &mut Row, overriding_system: bool) -> Result<(), DmlError> {
        let meta = self.meta.clone();
        for col in &meta.columns {
            if col.flags.identity {
                if !overriding_system || row.col(col.id).is_null() {
                    let next = session.identity_last_value() + 1;
                    session.set_identity_last_value(next);
                    row.set_col(col.id, Value::Int(next as i64));
                }
            } else if col.flags.generated_always {
                if let Some(expr) = &col.generated_expr {
                    let value = {
                        let ctx = EvalCtx::new(session).with_target(row);
                        expr.value(&ctx)?
                    };
                    row.set_col(col.id, value.convert_to(col.col_type.clone())?);
                }
            } else if row.col(col.id).is_null() {
                if let Some(expr) = &col.default_expr {
                    let value = {
                        let ctx = EvalCtx::new(session).with_target(row);
                        expr.value(&ctx)?
                    };
                    row.set_col(col.id, value.convert_to(col.col_type.clone())?);
                } else if col.flags.generated_by_default {
                    let next = session.identity_last_value() + 1;
                    session.set_identity_last_value(next);
                    row.set_col(col.id, Value::Int(next as i64));
                }
            }
            if col.not_null && row.col(col.id).is_null() {
                return Err(RowAssemblyError::NullIntoNotNull(col.name.clone()).into());
            }
        }
        Ok(())
    }

    fn convert_update_row(&mut self, session: &Session, row: &mut Row) -> Result<(), DmlError> {
        let meta = self.meta.clone();
        for col in &meta.columns {
            if col.flags.generated_always {
                if let Some(expr) = &col.generated_expr {
                    let value = {
                        let ctx = EvalCtx::new(session).with_target(row);
                        expr.value(&ctx)?
                    };
                    row.set_col(col.id, value.convert_to(col.col_type.clone())?);
                }
            }
            if col.not_null && row.col(col.id).is_null() {
                return Err(RowAssemblyError::NullIntoNotNull(col.name.clone()).into());
            }
        }
        Ok(())
    }

    fn add_row(&mut self, _session: &Session, mut row: Row) -> Result<Row, DmlError> {
        if let Some((index_id, columns)) = self.find_conflict(&row) {
            let conflicting_columns = columns.iter().map(|&i| self.meta.columns[i].name.clone()).collect();
            return Err(DupKeyError::DuplicateKey {
                index_id,
                conflicting_columns,
            }
            .into());
        }
        let key = RowKey(self.next_key);
        self.next_key += 1;
        row.key = Some(key);
        self.rows.insert(key.0, row.clone());
        Ok(row)
    }

    fn remove_row(&mut self, _session: &Session, key: RowKey) -> Result<(), DmlError> {
        self.rows.remove(&key.0);
        Ok(())
    }

    fn update_rows(&mut self, _session: &Session, pairs: &[(Row, Row)]) -> Result<(), DmlError> {
        for (_old, new) in pairs {
            let key = new.key.ok_or_else(|| DmlError::internal("update_rows given a new row with no key"))?;
            self.rows.insert(key.0, new.clone());
        }
        Ok(())
    }

    fn lock_row(&mut self, _session: &Session, key: RowKey, _timeout_ms: i64) -> Result<Option<Row>, DmlError> {
        Ok(self.rows.get(&key.0).cloned())
    }

    fn scan(&self) -> Vec<Row> {
        self.rows.values().cloned().collect()
    }

    fn get_by_key(&self, key: RowKey) -> Option<Row> {
        self.rows.get(&key.0).cloned()
    }

    fn conflicting_index(&self, row: &Row) -> Option<(u32, Vec<usize>)> {
        self.find_conflict(row)
    }
}

/// A `User` that grants every right, for tests that aren't exercising
/// authorization.
pub struct AllowAllUser;

impl User for AllowAllUser {
    fn check_table_right(&self, _table: &str, _kind: RightKind) -> Result<(), DmlError> {
        Ok(())
    }
}

/// A `TriggerHost` with no triggers registered: every hook is a no-op, no
/// `BEFORE_ROW` ever vetoes.
pub struct NoTriggers;

impl TriggerHost for NoTriggers {
    fn fire_before_statement(&self, _session: &Session, _table: &str, _kind: StmtKind) -> Result<(), DmlError> {
        Ok(())
    }

    fn fire_after_statement(&self, _session: &Session, _table: &str, _kind: StmtKind) -> Result<(), DmlError> {
        Ok(())
    }

    fn fire_before_row(
        &self,
        _session: &Session,
        _table: &str,
        _old: Option<&Row>,
        _new: Option<&Row>,
    ) -> Result<bool, DmlError> {
        Ok(false)
    }

    fn fire_after_row(
        &self,
        _session: &Session,
        _table: &str,
        _old: Option<&Row>,
        _new: Option<&Row>,
    ) -> Result<(), DmlError> {
        Ok(())
    }
}
