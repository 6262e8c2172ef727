//! [`Value`]: a tagged union over the SQL scalar domains this engine knows
//! how to move through a row pipeline, carrying every scalar domain as a
//! single sum type rather than one Rust type per SQL type.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::{ConversionError, DmlError};

/// A SQL scalar, or a nested array/row composite of scalars.
///
/// `Null` is a distinct variant rather than `Option<Value>` wrapping every
/// other variant: SQL `NULL` is a property of a *value slot*, not of a type,
/// and `UNKNOWN` (the three-valued-logic result of a boolean expression
/// touching `NULL`) is represented separately in [`Value::to_bool`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Array(Vec<Value>),
    Row(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// SQL three-valued boolean read of a value: `NULL` maps to `None`
    /// ("unknown"), anything else must already be a `Bool`.
    pub fn to_bool(&self) -> Result<Option<bool>, DmlError> {
        match self {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(*b)),
            other => Err(ConversionError::NotBoolean(other.type_name()).into()),
        }
    }

    /// Integer/long read with overflow check.
    pub fn to_i64(&self) -> Result<i64, DmlError> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Decimal(d) => d
                .to_string()
                .parse::<i64>()
                .map_err(|_| ConversionError::Overflow.into()),
            other => Err(ConversionError::NotConvertible {
                from: other.type_name(),
                to: "INTEGER",
            }
            .into()),
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_row(&self) -> Option<&[Value]> {
        match self {
            Value::Row(v) => Some(v),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) => "INTEGER",
            Value::Decimal(_) => "DECIMAL",
            Value::Text(_) => "CHARACTER",
            Value::Bytes(_) => "BINARY",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::Array(_) => "ARRAY",
            Value::Row(_) => "ROW",
        }
    }

    /// SQL equality: `NULL = anything` (including `NULL`) is `UNKNOWN`,
    /// represented here as `None` rather than `Some(false)`.
    pub fn sql_eq(&self, other: &Value) -> Option<bool> {
        if self.is_null() || other.is_null() {
            return None;
        }
        Some(self == other)
    }

    /// Convert this value to `target`, the declared type of the column it
    /// is about to be stored in. `NULL` always converts to `NULL`.
    pub fn convert_to(&self, target: ColumnType) -> Result<Value, DmlError> {
        if self.is_null() {
            return Ok(Value::Null);
        }
        match (self, target) {
            (Value::Bool(_), ColumnType::Bool) => Ok(self.clone()),
            (Value::Int(_), ColumnType::Int) => Ok(self.clone()),
            (Value::Int(i), ColumnType::Decimal) => Ok(Value::Decimal(Decimal::from(*i))),
            (Value::Decimal(_), ColumnType::Decimal) => Ok(self.clone()),
            (Value::Text(_), ColumnType::Text) => Ok(self.clone()),
            (Value::Bytes(_), ColumnType::Bytes) => Ok(self.clone()),
            (Value::Timestamp(_), ColumnType::Timestamp) => Ok(self.clone()),
            (Value::Array(_), ColumnType::Array(_)) => Ok(self.clone()),
            (Value::Row(_), ColumnType::Row(_)) => Ok(self.clone()),
            (v, t) => Err(ConversionError::NotConvertible {
                from: v.type_name(),
                to: t.name(),
            }
            .into()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Text(s) => write!(f, "'{s}'"),
            Value::Bytes(b) => write!(f, "X'{}'", hex_encode(b)),
            Value::Timestamp(t) => write!(f, "{t}"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Row(items) => {
                write!(f, "(")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Partial ordering under SQL semantics: `NULL` is incomparable to
/// everything, including itself.
impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.partial_cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.partial_cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// The declared type of a column, used to drive [`Value::convert_to`].
/// Kept separate from [`Value`] itself: a column's declared type persists
/// across rows even when its current value is `NULL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Bool,
    Int,
    Decimal,
    Text,
    Bytes,
    Timestamp,
    Array(Box<ColumnType>),
    Row(Vec<ColumnType>),
}

impl ColumnType {
    fn name(&self) -> &'static str {
        match self {
            ColumnType::Bool => "BOOLEAN",
            ColumnType::Int => "INTEGER",
            ColumnType::Decimal => "DECIMAL",
            ColumnType::Text => "CHARACTER",
            ColumnType::Bytes => "BINARY",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Array(_) => "ARRAY",
            ColumnType::Row(_) => "ROW",
        }
    }
}
