use crate::value::Value;
use std::cmp::Ordering;

/// Order two values of a comparable family.
///
/// Returns `None` when either side is null or the pair is not ordered
/// (mixed families, lists, structured payloads).
#[must_use]
pub fn compare_order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            left.as_float()?.partial_cmp(&right.as_float()?)
        }
        (Value::Text(a), Value::Text(b)) => Some(a.as_str().cmp(b.as_str())),
        (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
        (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
        (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Equality across numeric representations; everything else is structural.
#[must_use]
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            compare_order(left, right) == Some(Ordering::Equal)
        }
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        _ => left == right,
    }
}

/// Compare two lists as unordered bags.
#[must_use]
pub fn bag_equal(left: &[Value], right: &[Value]) -> bool {
    if left.len() != right.len() {
        return false;
    }

    let mut left = left.to_vec();
    let mut right = right.to_vec();
    left.sort_by(canonical_cmp);
    right.sort_by(canonical_cmp);

    left.iter().zip(&right).all(|(a, b)| values_equal(a, b))
}

// Total order used to canonicalize bags before comparison.
fn canonical_cmp(left: &Value, right: &Value) -> Ordering {
    left.rank()
        .cmp(&right.rank())
        .then_with(|| compare_order(left, right).unwrap_or(Ordering::Equal))
        .then_with(|| left.to_text().cmp(&right.to_text()))
}
