//! Row filters evaluated against Arrow record batches.
//!
//! A [`Filter`] compares a named column against a [`Literal`], or combines other filters with
//! boolean connectives. Evaluating a filter yields a [`BooleanArray`] mask; a row is kept only
//! where the mask is `true`, so comparisons against nulls drop the row.

use std::fmt::{Display, Formatter};

use arrow_array::{Array, BooleanArray, RecordBatch};
use arrow_select::filter::prep_null_mask_filter;
use orbit_error::{OrbitResult, orbit_err};

mod literal;
mod operator;

pub use literal::*;
pub use operator::*;

/// A predicate over the rows of a record batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Compare a column against a constant.
    Compare {
        column: String,
        op: Operator,
        value: Literal,
    },
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    /// Names of every column the filter reads, in first-use order and without duplicates.
    pub fn columns(&self) -> Vec<&str> {
        let mut columns = Vec::new();
        self.collect_columns(&mut columns);
        columns
    }

    fn collect_columns<'a>(&'a self, columns: &mut Vec<&'a str>) {
        match self {
            Filter::Compare { column, .. } => {
                if !columns.contains(&column.as_str()) {
                    columns.push(column);
                }
            }
            Filter::And(lhs, rhs) | Filter::Or(lhs, rhs) => {
                lhs.collect_columns(columns);
                rhs.collect_columns(columns);
            }
            Filter::Not(child) => child.collect_columns(columns),
        }
    }

    /// Evaluate the filter over `batch`.
    pub fn evaluate(&self, batch: &RecordBatch) -> OrbitResult<BooleanArray> {
        match self {
            Filter::Compare { column, op, value } => {
                let array = batch.column_by_name(column).ok_or_else(|| {
                    orbit_err!(InvalidArgument: "filter column {column} is not in the batch")
                })?;
                op.compare(array, value)
            }
            Filter::And(lhs, rhs) => Ok(arrow_arith::boolean::and_kleene(
                &lhs.evaluate(batch)?,
                &rhs.evaluate(batch)?,
            )?),
            Filter::Or(lhs, rhs) => Ok(arrow_arith::boolean::or_kleene(
                &lhs.evaluate(batch)?,
                &rhs.evaluate(batch)?,
            )?),
            Filter::Not(child) => Ok(arrow_arith::boolean::not(&child.evaluate(batch)?)?),
        }
    }
}

impl Display for Filter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Filter::Compare { column, op, value } => write!(f, "({column} {op} {value})"),
            Filter::And(lhs, rhs) => write!(f, "({lhs} and {rhs})"),
            Filter::Or(lhs, rhs) => write!(f, "({lhs} or {rhs})"),
            Filter::Not(child) => write!(f, "not {child}"),
        }
    }
}

/// Evaluate a conjunction of filters. Returns `None` when there is nothing to filter by.
pub fn evaluate_all(filters: &[Filter], batch: &RecordBatch) -> OrbitResult<Option<BooleanArray>> {
    let mut mask: Option<BooleanArray> = None;
    for filter in filters {
        let next = filter.evaluate(batch)?;
        mask = Some(match mask {
            None => next,
            Some(prev) => arrow_arith::boolean::and_kleene(&prev, &next)?,
        });
    }
    Ok(mask)
}

/// Number of rows a mask keeps. Nulls count as dropped.
pub fn selected_count(mask: &BooleanArray) -> usize {
    match mask.null_count() {
        0 => mask.true_count(),
        _ => prep_null_mask_filter(mask).true_count(),
    }
}

fn compare(column: impl Into<String>, op: Operator, value: impl Into<Literal>) -> Filter {
    Filter::Compare {
        column: column.into(),
        op,
        value: value.into(),
    }
}

/// Create a new `Filter` using the `Eq` operator.
///
/// ## Example usage
///
/// ```
/// use std::sync::Arc;
///
/// use arrow_array::{ArrayRef, Int64Array, RecordBatch};
/// use orbit_expr::eq;
///
/// let batch = RecordBatch::try_from_iter([(
///     "id",
///     Arc::new(Int64Array::from(vec![1, 2, 3])) as ArrayRef,
/// )])
/// .unwrap();
/// let mask = eq("id", 3i64).evaluate(&batch).unwrap();
///
/// assert_eq!(mask.iter().collect::<Vec<_>>(), vec![Some(false), Some(false), Some(true)]);
/// ```
pub fn eq(column: impl Into<String>, value: impl Into<Literal>) -> Filter {
    compare(column, Operator::Eq, value)
}

/// Create a new `Filter` using the `NotEq` operator.
pub fn not_eq(column: impl Into<String>, value: impl Into<Literal>) -> Filter {
    compare(column, Operator::NotEq, value)
}

/// Create a new `Filter` using the `Lt` operator.
pub fn lt(column: impl Into<String>, value: impl Into<Literal>) -> Filter {
    compare(column, Operator::Lt, value)
}

/// Create a new `Filter` using the `Lte` operator.
pub fn lt_eq(column: impl Into<String>, value: impl Into<Literal>) -> Filter {
    compare(column, Operator::Lte, value)
}

/// Create a new `Filter` using the `Gt` operator.
pub fn gt(column: impl Into<String>, value: impl Into<Literal>) -> Filter {
    compare(column, Operator::Gt, value)
}

/// Create a new `Filter` using the `Gte` operator.
pub fn gt_eq(column: impl Into<String>, value: impl Into<Literal>) -> Filter {
    compare(column, Operator::Gte, value)
}

pub fn and(lhs: Filter, rhs: Filter) -> Filter {
    Filter::And(Box::new(lhs), Box::new(rhs))
}

pub fn or(lhs: Filter, rhs: Filter) -> Filter {
    Filter::Or(Box::new(lhs), Box::new(rhs))
}

pub fn not(child: Filter) -> Filter {
    Filter::Not(Box::new(child))
}
