//! [`DeltaSink`] and [`DeltaMode`]: emit `OLD`/`NEW`/`FINAL` row streams to
//! a caller-supplied sink, the mechanism behind `RETURNING` /
//! `data_change_delta_table` and `FINAL TABLE(...)`.
//!
//! For an updated row, `OLD` precedes `NEW` precedes `FINAL`; for an
//! insert, `NEW` precedes `FINAL`; for a delete, only `OLD` fires.
//! `DmlDriver` is the only caller that sequences these calls — this module
//! just defines the sink contract and a mode filter.

use crate::row::Row;

/// Which snapshot a caller wants streamed, chosen once per statement
/// invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaMode {
    Old,
    New,
    Final,
    None,
}

/// A sink that consumes rows of a chosen delta mode. `emit` is called once
/// per row per applicable mode; a `DeltaMode::None` sink must not be called
/// at all (checked by [`DeltaCollector::emit`] rather than trusted to every
/// call site).
pub trait DeltaSink {
    fn emit(&mut self, row: Row);
}

/// A `DeltaSink` that appends into a `Vec`, the simplest useful
/// implementation and the one `GeneratedKeys` and tests build on.
#[derive(Default)]
pub struct VecSink {
    pub rows: Vec<Row>,
}

impl DeltaSink for VecSink {
    fn emit(&mut self, row: Row) {
        self.rows.push(row);
    }
}

/// Wraps a [`DeltaSink`] with the [`DeltaMode`] the statement was invoked
/// with, so `DmlDriver` can call `collector.old(...)`, `.new_(...)`,
/// `.final_(...)` unconditionally and have only the selected mode actually
/// reach the sink.
pub struct DeltaCollector<'a> {
    mode: DeltaMode,
    sink: &'a mut dyn DeltaSink,
}

impl<'a> DeltaCollector<'a> {
    pub fn new(mode: DeltaMode, sink: &'a mut dyn DeltaSink) -> Self {
        DeltaCollector { mode, sink }
    }

    pub fn mode(&self) -> DeltaMode {
        self.mode
    }

    pub fn old(&mut self, row: &Row) {
        if self.mode == DeltaMode::Old {
            self.sink.emit(row.clone());
        }
    }

    pub fn new_(&mut self, row: &Row) {
        if self.mode == DeltaMode::New {
            self.sink.emit(row.clone());
        }
    }

    pub fn final_(&mut self, row: &Row) {
        if self.mode == DeltaMode::Final {
            self.sink.emit(row.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn only_selected_mode_reaches_sink() {
        let mut sink = VecSink::default();
        let row = Row::new(None, vec![Value::Int(1)]);
        {
            let mut collector = DeltaCollector::new(DeltaMode::New, &mut sink);
            collector.old(&row);
            collector.new_(&row);
            collector.final_(&row);
        }
        assert_eq!(sink.rows.len(), 1);
    }

    #[test]
    fn none_mode_emits_nothing() {
        let mut sink = VecSink::default();
        let row = Row::new(None, vec![Value::Int(1)]);
        {
            let mut collector = DeltaCollector::new(DeltaMode::None, &mut sink);
            collector.old(&row);
            collector.new_(&row);
            collector.final_(&row);
        }
        assert!(sink.rows.is_empty());
    }
}
