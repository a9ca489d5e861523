//! Values flowing through the query engine
//!
//! The engine only needs a small contract from the value model:
//! - a total order with defined ranks for SQL null, JSON null and absent
//! - hashing consistent with that order (for grouping)
//! - numeric addition/subtraction/multiplication/division
//! - a size estimate for memory accounting
//! - a canonical byte encoding (for duplicate elimination)

mod arith;
mod compare;

pub use arith::{add, divide, multiply, real_divide, subtract, ArithOp};
pub use compare::{compare_for_sort, compare_total_order, GroupKey, RowComparator};
use compare::I64_BOUND;

use std::mem;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A value produced or consumed by a plan step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Absent value ("no value"), distinct from null
    Empty,
    /// JSON null stored in a document
    JsonNull,
    /// SQL NULL
    Null,
    Boolean(bool),
    Integer(i32),
    Long(i64),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Array(Vec<Value>),
    Map(Record),
}

impl Value {
    /// True for SQL null, JSON null and absent
    pub fn is_null_like(&self) -> bool {
        matches!(self, Value::Empty | Value::JsonNull | Value::Null)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    pub fn is_sql_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Long(_) | Value::Double(_))
    }

    /// Returns the record if this value is a map
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Map(record) => Some(record),
            _ => None,
        }
    }

    /// Returns the value as i64 if it is an integral number
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(i64::from(*v)),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(f64::from(*v)),
            Value::Long(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Name of the value's type, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Empty => "EMPTY",
            Value::JsonNull => "JSON_NULL",
            Value::Null => "NULL",
            Value::Boolean(_) => "BOOLEAN",
            Value::Integer(_) => "INTEGER",
            Value::Long(_) => "LONG",
            Value::Double(_) => "DOUBLE",
            Value::String(_) => "STRING",
            Value::Binary(_) => "BINARY",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::Array(_) => "ARRAY",
            Value::Map(_) => "MAP",
        }
    }

    /// Estimated number of bytes this value occupies in memory
    pub fn size_in_bytes(&self) -> u64 {
        let shallow = mem::size_of::<Value>() as u64;
        let deep = match self {
            Value::String(s) => s.capacity() as u64,
            Value::Binary(b) => b.capacity() as u64,
            Value::Array(items) => items.iter().map(Value::size_in_bytes).sum(),
            Value::Map(record) => record.heap_size(),
            _ => 0,
        };
        shallow + deep
    }

    /// Appends a canonical encoding of this value to `out`.
    ///
    /// Numerically equal values encode identically regardless of their
    /// width. A double takes the integer encoding only when it equals a long
    /// exactly, and every NaN shares one encoding.
    pub fn write_key_bytes(&self, out: &mut Vec<u8>) {
        match self {
            Value::Empty => out.push(0),
            Value::JsonNull => out.push(1),
            Value::Null => out.push(2),
            Value::Boolean(b) => {
                out.push(3);
                out.push(u8::from(*b));
            }
            Value::Integer(_) | Value::Long(_) => {
                out.push(4);
                out.extend_from_slice(&self.as_i64().unwrap_or_default().to_be_bytes());
            }
            Value::Double(d) => {
                if d.fract() == 0.0 && *d >= -I64_BOUND && *d < I64_BOUND {
                    out.push(4);
                    out.extend_from_slice(&(*d as i64).to_be_bytes());
                } else {
                    let bits = if d.is_nan() { f64::NAN.to_bits() } else { d.to_bits() };
                    out.push(5);
                    out.extend_from_slice(&bits.to_be_bytes());
                }
            }
            Value::String(s) => {
                out.push(6);
                write_len_prefixed(out, s.as_bytes());
            }
            Value::Binary(b) => {
                out.push(7);
                write_len_prefixed(out, b);
            }
            Value::Timestamp(ts) => {
                out.push(8);
                out.extend_from_slice(&ts.timestamp_nanos_opt().unwrap_or_default().to_be_bytes());
            }
            Value::Array(items) => {
                out.push(9);
                out.extend_from_slice(&(items.len() as u32).to_be_bytes());
                for item in items {
                    item.write_key_bytes(out);
                }
            }
            Value::Map(record) => {
                out.push(10);
                out.extend_from_slice(&(record.len() as u32).to_be_bytes());
                for (name, value) in record.sorted_fields() {
                    write_len_prefixed(out, name.as_bytes());
                    value.write_key_bytes(out);
                }
            }
        }
    }
}

fn write_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Value::Map(v)
    }
}

/// An insertion-ordered map of field name to value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Builder-style field insertion
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.put(name, value.into());
        self
    }

    /// Sets a field, replacing an existing value in place
    pub fn put(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Fields ordered by name, for order-independent comparison and hashing
    pub(crate) fn sorted_fields(&self) -> Vec<(&str, &Value)> {
        let mut sorted: Vec<_> = self.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        sorted
    }

    fn heap_size(&self) -> u64 {
        self.fields
            .iter()
            .map(|(n, v)| n.capacity() as u64 + v.size_in_bytes())
            .sum()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut record = Record::new();
        for (name, value) in iter {
            record.put(name, value);
        }
        record
    }
}
