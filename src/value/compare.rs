//! Total order over values
//!
//! Ordering rules (ascending):
//! - numbers < timestamps < strings < booleans < binaries < arrays < maps
//! - numbers compare numerically across Integer/Long/Double, NaN is the largest number
//! - absent < JSON null < SQL null, all placed after every other value
//!   unless nulls-first is requested, in which case they precede every other value

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::Value;
use crate::plan::SortSpec;

static EMPTY: Value = Value::Empty;

fn null_rank(value: &Value) -> Option<u8> {
    match value {
        Value::Empty => Some(0),
        Value::JsonNull => Some(1),
        Value::Null => Some(2),
        _ => None,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Integer(_) | Value::Long(_) | Value::Double(_) => 0,
        Value::Timestamp(_) => 1,
        Value::String(_) => 2,
        Value::Boolean(_) => 3,
        Value::Binary(_) => 4,
        Value::Array(_) => 5,
        Value::Map(_) => 6,
        Value::Empty | Value::JsonNull | Value::Null => 7,
    }
}

/// Compares two values in the engine's total order.
///
/// `nulls_first` moves the three null-like values ahead of everything else
/// while keeping their relative order.
pub fn compare_total_order(a: &Value, b: &Value, nulls_first: bool) -> Ordering {
    match (null_rank(a), null_rank(b)) {
        (Some(ra), Some(rb)) => return ra.cmp(&rb),
        (Some(_), None) => {
            return if nulls_first {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        (None, Some(_)) => {
            return if nulls_first {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (None, None) => {}
    }

    let (ta, tb) = (type_rank(a), type_rank(b));
    if ta != tb {
        return ta.cmp(&tb);
    }

    match (a, b) {
        (Value::Timestamp(x), Value::Timestamp(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
        (Value::Binary(x), Value::Binary(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (xv, yv) in x.iter().zip(y.iter()) {
                let ord = compare_total_order(xv, yv, nulls_first);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Map(x), Value::Map(y)) => {
            let (xs, ys) = (x.sorted_fields(), y.sorted_fields());
            for ((xn, xv), (yn, yv)) in xs.iter().zip(ys.iter()) {
                let ord = xn
                    .cmp(yn)
                    .then_with(|| compare_total_order(xv, yv, nulls_first));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            xs.len().cmp(&ys.len())
        }
        _ => compare_numbers(a, b),
    }
}

/// 2^63 as a double, the first value past the `i64` range
pub(crate) const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

fn compare_numbers(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Double(x), Value::Double(y)) => return compare_doubles(*x, *y),
        (Value::Double(x), _) => {
            if let Some(y) = b.as_i64() {
                return compare_long_double(y, *x).reverse();
            }
        }
        (_, Value::Double(y)) => {
            if let Some(x) = a.as_i64() {
                return compare_long_double(x, *y);
            }
        }
        _ => {}
    }
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    compare_doubles(
        a.as_f64().unwrap_or(f64::NAN),
        b.as_f64().unwrap_or(f64::NAN),
    )
}

/// Compares a long against a double without rounding the long.
fn compare_long_double(x: i64, y: f64) -> Ordering {
    if y.is_nan() || y >= I64_BOUND {
        return Ordering::Less;
    }
    if y < -I64_BOUND {
        return Ordering::Greater;
    }
    let whole = y.trunc();
    match x.cmp(&(whole as i64)) {
        Ordering::Equal => 0.0f64.partial_cmp(&(y - whole)).unwrap_or(Ordering::Equal),
        ord => ord,
    }
}

fn compare_doubles(x: f64, y: f64) -> Ordering {
    match (x.is_nan(), y.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
    }
}

/// Compares two values for one sort key.
///
/// For descending keys the null rank is inverted before the whole order is
/// reversed, so the requested null placement survives the reversal.
pub fn compare_for_sort(a: &Value, b: &Value, spec: &SortSpec) -> Ordering {
    let nulls_first = if spec.descending {
        !spec.nulls_first
    } else {
        spec.nulls_first
    };
    let ord = compare_total_order(a, b, nulls_first);
    if spec.descending {
        ord.reverse()
    } else {
        ord
    }
}

/// Compares rows (records) field by field according to a list of sort specs.
///
/// A missing field, or a row that is not a record, sorts as absent.
#[derive(Debug, Clone)]
pub struct RowComparator {
    specs: Arc<[SortSpec]>,
}

impl RowComparator {
    pub fn new(specs: impl Into<Arc<[SortSpec]>>) -> Self {
        Self {
            specs: specs.into(),
        }
    }

    pub fn specs(&self) -> &[SortSpec] {
        &self.specs
    }

    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        for spec in self.specs.iter() {
            let ord = compare_for_sort(field_of(a, &spec.field), field_of(b, &spec.field), spec);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

fn field_of<'a>(row: &'a Value, name: &str) -> &'a Value {
    row.as_record().and_then(|r| r.get(name)).unwrap_or(&EMPTY)
}

/// A tuple of grouping values usable as a hash map key.
///
/// Equality follows the total order, so `Integer(1)` and `Double(1.0)` are
/// the same key while `Long(2^53 + 1)` and `Double(2^53)` are not. The hash
/// is taken over the canonical key encoding, which maps a double to the
/// integer encoding exactly when it equals some long.
#[derive(Debug, Clone)]
pub struct GroupKey {
    values: Vec<Value>,
    encoded: Vec<u8>,
}

impl GroupKey {
    pub fn new(values: Vec<Value>) -> Self {
        let mut encoded = Vec::with_capacity(values.len() * 10);
        for value in &values {
            value.write_key_bytes(&mut encoded);
        }
        Self { values, encoded }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Estimated memory held by this key
    pub fn size_in_bytes(&self) -> u64 {
        self.values.iter().map(Value::size_in_bytes).sum::<u64>() + self.encoded.capacity() as u64
    }
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(other.values.iter())
                .all(|(a, b)| compare_total_order(a, b, false) == Ordering::Equal)
    }
}

impl Eq for GroupKey {}

impl Hash for GroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.encoded.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Record;
    use std::collections::HashMap;

    fn sorted(mut values: Vec<Value>, spec: &SortSpec) -> Vec<Value> {
        values.sort_by(|a, b| compare_for_sort(a, b, spec));
        values
    }

    #[test]
    fn test_numbers_compare_across_widths() {
        assert_eq!(
            compare_total_order(&Value::Integer(3), &Value::Double(2.5), false),
            Ordering::Greater
        );
        assert_eq!(
            compare_total_order(&Value::Long(2), &Value::Double(2.0), false),
            Ordering::Equal
        );
        assert_eq!(
            compare_total_order(&Value::Double(f64::NAN), &Value::Long(i64::MAX), false),
            Ordering::Greater
        );
    }

    #[test]
    fn test_null_ranks() {
        let values = vec![
            Value::Null,
            Value::Long(1),
            Value::JsonNull,
            Value::Empty,
            Value::from("a"),
        ];

        let last = sorted(values.clone(), &SortSpec::asc("x"));
        assert_eq!(
            last,
            vec![
                Value::Long(1),
                Value::from("a"),
                Value::Empty,
                Value::JsonNull,
                Value::Null
            ]
        );

        let first = sorted(values, &SortSpec::asc("x").nulls_first());
        assert_eq!(
            first,
            vec![
                Value::Empty,
                Value::JsonNull,
                Value::Null,
                Value::Long(1),
                Value::from("a")
            ]
        );
    }

    #[test]
    fn test_descending_keeps_requested_null_placement() {
        let values = vec![Value::Null, Value::Long(1), Value::Long(3), Value::Long(2)];

        let desc_nulls_last = sorted(values.clone(), &SortSpec::desc("x"));
        assert_eq!(
            desc_nulls_last,
            vec![Value::Long(3), Value::Long(2), Value::Long(1), Value::Null]
        );

        let desc_nulls_first = sorted(values, &SortSpec::desc("x").nulls_first());
        assert_eq!(
            desc_nulls_first,
            vec![Value::Null, Value::Long(3), Value::Long(2), Value::Long(1)]
        );
    }

    #[test]
    fn test_descending_is_reverse_of_ascending_with_inverted_nulls() {
        let values = vec![
            Value::Long(5),
            Value::Null,
            Value::from("b"),
            Value::Empty,
            Value::Double(-1.5),
            Value::from("a"),
            Value::JsonNull,
        ];

        for nulls_first in [false, true] {
            let mut desc_spec = SortSpec::desc("x");
            desc_spec.nulls_first = nulls_first;
            let mut asc_spec = SortSpec::asc("x");
            asc_spec.nulls_first = !nulls_first;

            let desc = sorted(values.clone(), &desc_spec);
            let mut asc = sorted(values.clone(), &asc_spec);
            asc.reverse();
            assert_eq!(desc, asc);
        }
    }

    #[test]
    fn test_row_comparator_uses_first_differing_field() {
        let cmp = RowComparator::new(vec![SortSpec::asc("a"), SortSpec::desc("b")]);
        let r1 = Value::Map(Record::new().with("a", 1).with("b", 1));
        let r2 = Value::Map(Record::new().with("a", 1).with("b", 2));
        let r3 = Value::Map(Record::new().with("a", 0).with("b", 0));

        assert_eq!(cmp.compare(&r1, &r2), Ordering::Greater);
        assert_eq!(cmp.compare(&r3, &r1), Ordering::Less);
        assert_eq!(cmp.compare(&r1, &r1.clone()), Ordering::Equal);
    }

    #[test]
    fn test_group_key_equality_and_hash_agree() {
        let mut map = HashMap::new();
        map.insert(GroupKey::new(vec![Value::Integer(1), Value::from("x")]), 1);

        let same = GroupKey::new(vec![Value::Double(1.0), Value::from("x")]);
        assert_eq!(map.get(&same), Some(&1));

        let different = GroupKey::new(vec![Value::Integer(1), Value::from("y")]);
        assert_eq!(map.get(&different), None);
    }

    #[test]
    fn test_long_and_double_compare_exactly() {
        let big = Value::Long(i64::MAX);
        let rounded = Value::Double(i64::MAX as f64);
        assert_eq!(compare_total_order(&big, &rounded, false), Ordering::Less);
        assert_eq!(compare_total_order(&rounded, &big, false), Ordering::Greater);

        let odd = Value::Long((1 << 53) + 1);
        let even = Value::Double((1u64 << 53) as f64);
        assert_eq!(compare_total_order(&odd, &even, false), Ordering::Greater);

        assert_eq!(
            compare_total_order(&Value::Long(-3), &Value::Double(-2.5), false),
            Ordering::Less
        );
        assert_eq!(
            compare_total_order(&Value::Long(i64::MIN), &Value::Double(f64::NEG_INFINITY), false),
            Ordering::Greater
        );
    }

    #[test]
    fn test_group_key_lookup_matches_equality_at_large_magnitudes() {
        let pairs = [
            (Value::Long(i64::MAX), Value::Double(i64::MAX as f64)),
            (Value::Long((1 << 53) + 1), Value::Double((1u64 << 53) as f64)),
            (Value::Long(1 << 53), Value::Double((1u64 << 53) as f64)),
            (Value::Long(i64::MIN), Value::Double(i64::MIN as f64)),
            (Value::Long(0), Value::Double(-0.0)),
            (Value::Integer(3), Value::Double(3.0)),
        ];
        for (long, double) in pairs {
            let mut map = HashMap::new();
            map.insert(GroupKey::new(vec![long.clone()]), 1);
            let lookup = GroupKey::new(vec![double.clone()]);
            let equal = lookup == GroupKey::new(vec![long.clone()]);
            assert_eq!(
                map.get(&lookup).is_some(),
                equal,
                "{:?} vs {:?}",
                long,
                double
            );
        }

        let mut map = HashMap::new();
        map.insert(GroupKey::new(vec![Value::Long(1 << 53)]), 1);
        assert_eq!(
            map.get(&GroupKey::new(vec![Value::Double((1u64 << 53) as f64)])),
            Some(&1)
        );
        assert_eq!(
            map.get(&GroupKey::new(vec![Value::Double(i64::MAX as f64)])),
            None
        );
    }

    #[test]
    fn test_nan_keys_share_one_group() {
        let quiet = Value::Double(f64::NAN);
        let other = Value::Double(f64::from_bits(f64::NAN.to_bits() | 1));
        let mut map = HashMap::new();
        map.insert(GroupKey::new(vec![quiet]), 1);
        assert_eq!(map.get(&GroupKey::new(vec![other])), Some(&1));
    }
}
