use std::fmt::{Display, Formatter};

use arrow_array::{Array, ArrayRef, BooleanArray, Scalar};
use arrow_ord::cmp;
use orbit_error::OrbitResult;

use crate::Literal;

/// Comparison operators supported by [`Filter::Compare`](crate::Filter::Compare).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Operator {
    /// Compare every value of `array` against `value`, coerced to the array's type.
    pub fn compare(self, array: &ArrayRef, value: &Literal) -> OrbitResult<BooleanArray> {
        let literal = arrow_cast::cast(&value.to_array(), array.data_type())?;
        let rhs = Scalar::new(literal);
        let mask = match self {
            Operator::Eq => cmp::eq(array, &rhs),
            Operator::NotEq => cmp::neq(array, &rhs),
            Operator::Lt => cmp::lt(array, &rhs),
            Operator::Lte => cmp::lt_eq(array, &rhs),
            Operator::Gt => cmp::gt(array, &rhs),
            Operator::Gte => cmp::gt_eq(array, &rhs),
        }?;
        Ok(mask)
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let display = match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
        };
        Display::fmt(display, f)
    }
}
