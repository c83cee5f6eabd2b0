use std::fmt::{Display, Formatter};
use std::sync::Arc;

use arrow_array::{ArrayRef, BooleanArray, Float64Array, Int32Array, Int64Array, StringArray};

/// A constant a column is compared against.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int64(i64),
    Int32(i32),
    Float64(f64),
    Utf8(String),
    Boolean(bool),
}

impl Literal {
    /// A single-element array holding the literal.
    pub fn to_array(&self) -> ArrayRef {
        match self {
            Literal::Int64(v) => Arc::new(Int64Array::from(vec![*v])),
            Literal::Int32(v) => Arc::new(Int32Array::from(vec![*v])),
            Literal::Float64(v) => Arc::new(Float64Array::from(vec![*v])),
            Literal::Utf8(v) => Arc::new(StringArray::from(vec![v.as_str()])),
            Literal::Boolean(v) => Arc::new(BooleanArray::from(vec![*v])),
        }
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Int64(v) => write!(f, "{v}"),
            Literal::Int32(v) => write!(f, "{v}"),
            Literal::Float64(v) => write!(f, "{v}"),
            Literal::Utf8(v) => write!(f, "\"{v}\""),
            Literal::Boolean(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Int64(value)
    }
}

impl From<i32> for Literal {
    fn from(value: i32) -> Self {
        Literal::Int32(value)
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::Float64(value)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::Boolean(value)
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::Utf8(value.to_string())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Literal::Utf8(value)
    }
}
