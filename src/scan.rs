//! [`FilteredScan`]: iterate a table's rows under a WHERE predicate,
//! `FETCH FIRST n ROWS`, and row locking. Re-checks a row after acquiring
//! its lock rather than trusting the pre-lock snapshot.

use crate::error::{DmlError, DriverError, ScanError};
use crate::expr::{EvalCtx, Expr};
use crate::row::Row;
use crate::session::Session;
use crate::storage::Table;
use crate::value::Value;

/// How often (in scanned rows) to check `session.is_canceled()`. Matches
/// the cadence used elsewhere in this crate.
const CANCEL_CHECK_INTERVAL: usize = 128;

pub struct FilteredScan<'a> {
    pub predicate: Option<&'a Expr>,
    pub fetch_first: Option<i64>,
}

impl<'a> FilteredScan<'a> {
    pub fn new(predicate: Option<&'a Expr>, fetch_first: Option<i64>) -> Self {
        FilteredScan { predicate, fetch_first }
    }

    /// Run the scan against `table`'s current snapshot, locking and
    /// re-validating each candidate row if the table is row-lockable.
    pub fn run(&self, table: &mut dyn Table, session: &Session, params: &[Value]) -> Result<Vec<Row>, DmlError> {
        if let Some(n) = self.fetch_first {
            if n < 0 {
                return Err(ScanError::InvalidFetchCount(Some(n)).into());
            }
        }

        let row_lockable = table.meta().row_lockable;
        let candidates = table.scan();
        let mut out = Vec::new();

        for (i, cached) in candidates.into_iter().enumerate() {
            if i % CANCEL_CHECK_INTERVAL == 0 && session.is_canceled() {
                return Err(DriverError::Canceled.into());
            }
            if let Some(limit) = self.fetch_first {
                if out.len() as i64 >= limit {
                    break;
                }
            }
            if !self.matches(&cached, session, params)? {
                continue;
            }

            let row = if row_lockable {
                let key = match cached.key {
                    Some(k) => k,
                    None => continue,
                };
                match table.lock_row(session, key, session.lock_timeout_ms)? {
                    None => continue,
                    Some(locked) => {
                        if !locked.shared_data_equal(&cached) && !self.matches(&locked, session, params)? {
                            continue;
                        }
                        locked
                    }
                }
            } else {
                cached
            };
            out.push(row);
        }
        Ok(out)
    }

    fn matches(&self, row: &Row, session: &Session, params: &[Value]) -> Result<bool, DmlError> {
        match self.predicate {
            None => Ok(true),
            Some(expr) => {
                let ctx = EvalCtx::new(session).with_target(row).with_params(params);
                Ok(expr.boolean_value(&ctx)?.unwrap_or(false))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ColumnSide;
    use crate::mem::MemTable;
    use crate::schema::{ColumnMeta, TableMeta};
    use crate::value::ColumnType;

    fn table_with_rows(n: i64) -> MemTable {
        let meta = TableMeta {
            name: "t".into(),
            columns: vec![ColumnMeta::simple(0, "id", ColumnType::Int)],
            primary_key: Some(vec![0]),
            row_lockable: true,
            unique_indexes: vec![],
            has_row_id: true,
        };
        let mut t = MemTable::new(meta);
        let session = Session::default();
        for i in 0..n {
            t.add_row(&session, Row::new(None, vec![Value::Int(i)])).unwrap();
        }
        t
    }

    #[test]
    fn fetch_first_limits_result_count() {
        let mut t = table_with_rows(10);
        let session = Session::default();
        let scan = FilteredScan::new(None, Some(3));
        let rows = scan.run(&mut t, &session, &[]).unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn predicate_filters_rows() {
        let mut t = table_with_rows(5);
        let session = Session::default();
        let predicate = Expr::host(|ctx| {
            let v = Expr::Column { side: ColumnSide::Target, index: 0 }.value(ctx)?;
            Ok(Value::Bool(v.to_i64()? >= 3))
        });
        let scan = FilteredScan::new(Some(&predicate), None);
        let rows = scan.run(&mut t, &session, &[]).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn negative_fetch_first_is_rejected() {
        let mut t = table_with_rows(1);
        let session = Session::default();
        let scan = FilteredScan::new(None, Some(-1));
        let err = scan.run(&mut t, &session, &[]).unwrap_err();
        assert!(matches!(err, DmlError::Scan(ScanError::InvalidFetchCount(_))));
    }

    #[test]
    fn canceled_session_aborts_scan() {
        let mut t = table_with_rows(5);
        let session = Session::default();
        session.cancel();
        let scan = FilteredScan::new(None, None);
        let err = scan.run(&mut t, &session, &[]).unwrap_err();
        assert!(matches!(err, DmlError::Driver(DriverError::Canceled)));
    }
}
