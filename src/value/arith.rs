//! Numeric arithmetic
//!
//! Integer results widen to Long on overflow; Long overflow is an error.
//! Any Double operand makes the result a Double (IEEE semantics).
//! Integral division truncates and rejects a zero divisor.

use crate::errors::{QueryError, QueryResult};

use super::Value;

/// Arithmetic operator encoded as one character per argument in a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    /// Division that always produces a Double
    RealDivide,
}

impl ArithOp {
    /// Parses the plan's operator character
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(ArithOp::Add),
            '-' => Some(ArithOp::Subtract),
            '*' => Some(ArithOp::Multiply),
            '/' => Some(ArithOp::Divide),
            'd' => Some(ArithOp::RealDivide),
            _ => None,
        }
    }

    pub fn is_additive(&self) -> bool {
        matches!(self, ArithOp::Add | ArithOp::Subtract)
    }

    pub fn apply(&self, a: &Value, b: &Value) -> QueryResult<Value> {
        match self {
            ArithOp::Add => add(a, b),
            ArithOp::Subtract => subtract(a, b),
            ArithOp::Multiply => multiply(a, b),
            ArithOp::Divide => divide(a, b),
            ArithOp::RealDivide => real_divide(a, b),
        }
    }
}

enum Operands {
    Ints(i32, i32),
    Longs(i64, i64),
    Doubles(f64, f64),
}

fn operands(a: &Value, b: &Value, op: &str) -> QueryResult<Operands> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Ok(Operands::Ints(*x, *y)),
        (Value::Double(_), _) | (_, Value::Double(_)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(Operands::Doubles(x, y)),
            _ => Err(type_mismatch(a, b, op)),
        },
        _ => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => Ok(Operands::Longs(x, y)),
            _ => Err(type_mismatch(a, b, op)),
        },
    }
}

fn type_mismatch(a: &Value, b: &Value, op: &str) -> QueryError {
    QueryError::type_error(format!(
        "cannot apply {} to {} and {}",
        op,
        a.type_name(),
        b.type_name()
    ))
}

fn long_result(result: Option<i64>, op: &str) -> QueryResult<Value> {
    result
        .map(Value::Long)
        .ok_or_else(|| QueryError::Overflow(format!("LONG {}", op)))
}

pub fn add(a: &Value, b: &Value) -> QueryResult<Value> {
    match operands(a, b, "+")? {
        Operands::Ints(x, y) => Ok(x
            .checked_add(y)
            .map(Value::Integer)
            .unwrap_or(Value::Long(i64::from(x) + i64::from(y)))),
        Operands::Longs(x, y) => long_result(x.checked_add(y), "addition"),
        Operands::Doubles(x, y) => Ok(Value::Double(x + y)),
    }
}

pub fn subtract(a: &Value, b: &Value) -> QueryResult<Value> {
    match operands(a, b, "-")? {
        Operands::Ints(x, y) => Ok(x
            .checked_sub(y)
            .map(Value::Integer)
            .unwrap_or(Value::Long(i64::from(x) - i64::from(y)))),
        Operands::Longs(x, y) => long_result(x.checked_sub(y), "subtraction"),
        Operands::Doubles(x, y) => Ok(Value::Double(x - y)),
    }
}

pub fn multiply(a: &Value, b: &Value) -> QueryResult<Value> {
    match operands(a, b, "*")? {
        Operands::Ints(x, y) => Ok(x
            .checked_mul(y)
            .map(Value::Integer)
            .unwrap_or(Value::Long(i64::from(x) * i64::from(y)))),
        Operands::Longs(x, y) => long_result(x.checked_mul(y), "multiplication"),
        Operands::Doubles(x, y) => Ok(Value::Double(x * y)),
    }
}

pub fn divide(a: &Value, b: &Value) -> QueryResult<Value> {
    match operands(a, b, "/")? {
        Operands::Ints(_, 0) | Operands::Longs(_, 0) => Err(QueryError::DivisionByZero),
        Operands::Ints(x, y) => Ok(x
            .checked_div(y)
            .map(Value::Integer)
            .unwrap_or(Value::Long(i64::from(x) / i64::from(y)))),
        Operands::Longs(x, y) => long_result(x.checked_div(y), "division"),
        Operands::Doubles(x, y) => Ok(Value::Double(x / y)),
    }
}

pub fn real_divide(a: &Value, b: &Value) -> QueryResult<Value> {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Ok(Value::Double(x / y)),
        _ => Err(type_mismatch(a, b, "real division")),
    }
}
