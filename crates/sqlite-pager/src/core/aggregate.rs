//! Online aggregates over a stream of result rows.
//!
//! Each `(field, operation)` pair owns one accumulator. Averages keep a
//! running total and count and divide only in [`Accumulators::finish`].

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::DbRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AggregateOp {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    #[serde(alias = "count_distinct")]
    CountDistinct,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSpec {
    /// Row key to aggregate; `*` counts rows for `count`.
    pub field: String,
    pub operation: AggregateOp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    pub field: String,
    pub operation: AggregateOp,
    pub value: Value,
    /// Non-null values that contributed.
    pub observed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct AggregateKey {
    field: String,
    op: AggregateOp,
}

/// Exact while every addend is an integer and the total fits in i64.
#[derive(Debug, Clone, Default)]
struct NumericTotal {
    int: Option<i64>,
    float: f64,
    count: u64,
}

impl NumericTotal {
    fn add(&mut self, v: &Value) {
        let (as_int, as_float) = match v {
            Value::Number(n) => (n.as_i64(), n.as_f64()),
            Value::String(s) => (s.trim().parse::<i64>().ok(), s.trim().parse::<f64>().ok()),
            _ => (None, None),
        };
        let Some(f) = as_float else { return };
        self.int = match (self.count, self.int, as_int) {
            (0, _, Some(i)) => Some(i),
            (_, Some(total), Some(i)) => total.checked_add(i),
            _ => None,
        };
        self.float += f;
        self.count += 1;
    }

    fn sum(&self) -> Value {
        match (self.count, self.int) {
            (0, _) => Value::Null,
            (_, Some(i)) => Value::from(i),
            (_, None) => Value::from(self.float),
        }
    }

    fn avg(&self) -> Value {
        if self.count == 0 {
            Value::Null
        } else {
            Value::from(self.float / self.count as f64)
        }
    }
}

#[derive(Debug, Clone)]
enum Accumulator {
    Total(NumericTotal),
    Extremum { best: Option<Value>, keep: Ordering, seen: u64 },
    Tally(u64),
    Distinct(HashSet<String>),
}

impl Accumulator {
    fn for_op(op: AggregateOp) -> Self {
        match op {
            AggregateOp::Sum | AggregateOp::Avg => Accumulator::Total(NumericTotal::default()),
            AggregateOp::Min => Accumulator::Extremum {
                best: None,
                keep: Ordering::Less,
                seen: 0,
            },
            AggregateOp::Max => Accumulator::Extremum {
                best: None,
                keep: Ordering::Greater,
                seen: 0,
            },
            AggregateOp::Count => Accumulator::Tally(0),
            AggregateOp::CountDistinct => Accumulator::Distinct(HashSet::new()),
        }
    }

    fn observe(&mut self, v: &Value) {
        match self {
            Accumulator::Total(t) => t.add(v),
            Accumulator::Extremum { best, keep, seen } => {
                let replace = match best {
                    None => true,
                    Some(b) => compare_values(v, b) == Some(*keep),
                };
                if comparable(v) {
                    *seen += 1;
                    if replace {
                        *best = Some(v.clone());
                    }
                }
            }
            Accumulator::Tally(n) => *n += 1,
            Accumulator::Distinct(set) => {
                set.insert(v.to_string());
            }
        }
    }

    fn finish(&self, op: AggregateOp) -> (Value, u64) {
        match self {
            Accumulator::Total(t) if op == AggregateOp::Avg => (t.avg(), t.count),
            Accumulator::Total(t) => (t.sum(), t.count),
            Accumulator::Extremum { best, seen, .. } => (best.clone().unwrap_or(Value::Null), *seen),
            Accumulator::Tally(n) => (Value::from(*n), *n),
            Accumulator::Distinct(set) => (Value::from(set.len() as u64), set.len() as u64),
        }
    }
}

/// SQLite-like ordering: numbers before text. Other kinds do not compare.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => Some(i.cmp(&j)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Number(_), Value::String(_)) => Some(Ordering::Less),
        (Value::String(_), Value::Number(_)) => Some(Ordering::Greater),
        _ => None,
    }
}

fn comparable(v: &Value) -> bool {
    matches!(v, Value::Number(_) | Value::String(_))
}

/// All accumulators of one streaming run.
#[derive(Debug, Clone, Default)]
pub struct Accumulators {
    entries: BTreeMap<AggregateKey, Accumulator>,
}

impl Accumulators {
    /// Duplicate specs share one accumulator.
    pub fn new(specs: &[AggregationSpec]) -> Self {
        let entries = specs
            .iter()
            .map(|s| {
                (
                    AggregateKey {
                        field: s.field.clone(),
                        op: s.operation,
                    },
                    Accumulator::for_op(s.operation),
                )
            })
            .collect();
        Self { entries }
    }

    pub fn observe(&mut self, row: &DbRow) {
        for (key, acc) in self.entries.iter_mut() {
            if key.field == "*" && key.op == AggregateOp::Count {
                acc.observe(&Value::Null);
                continue;
            }
            match lookup(row, &key.field) {
                Some(v) if !v.is_null() => acc.observe(v),
                _ => {}
            }
        }
    }

    pub fn finish(&self) -> Vec<AggregationResult> {
        self.entries
            .iter()
            .map(|(key, acc)| {
                let (value, observed) = acc.finish(key.op);
                AggregationResult {
                    field: key.field.clone(),
                    operation: key.op,
                    value,
                    observed,
                }
            })
            .collect()
    }
}

fn lookup<'a>(row: &'a DbRow, field: &str) -> Option<&'a Value> {
    row.get(field)
        .or_else(|| row.iter().find(|(k, _)| k.eq_ignore_ascii_case(field)).map(|(_, v)| v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> DbRow {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn spec(field: &str, operation: AggregateOp) -> AggregationSpec {
        AggregationSpec {
            field: field.into(),
            operation,
        }
    }

    fn result(results: &[AggregationResult], field: &str, op: AggregateOp) -> Value {
        results
            .iter()
            .find(|r| r.field == field && r.operation == op)
            .map(|r| r.value.clone())
            .unwrap()
    }

    #[test]
    fn test_all_operations() {
        let mut acc = Accumulators::new(&[
            spec("amount", AggregateOp::Sum),
            spec("amount", AggregateOp::Avg),
            spec("amount", AggregateOp::Min),
            spec("amount", AggregateOp::Max),
            spec("amount", AggregateOp::Count),
            spec("region", AggregateOp::CountDistinct),
            spec("*", AggregateOp::Count),
        ]);
        for (amount, region) in [(json!(10), "eu"), (json!(20), "us"), (Value::Null, "eu"), (json!(5), "apac")] {
            acc.observe(&row(&[("amount", amount), ("region", json!(region))]));
        }
        let out = acc.finish();
        assert_eq!(result(&out, "amount", AggregateOp::Sum), json!(35));
        assert_eq!(result(&out, "amount", AggregateOp::Avg), json!(35.0 / 3.0));
        assert_eq!(result(&out, "amount", AggregateOp::Min), json!(5));
        assert_eq!(result(&out, "amount", AggregateOp::Max), json!(20));
        assert_eq!(result(&out, "amount", AggregateOp::Count), json!(3));
        assert_eq!(result(&out, "region", AggregateOp::CountDistinct), json!(3));
        assert_eq!(result(&out, "*", AggregateOp::Count), json!(4));
    }

    #[test]
    fn test_avg_is_not_average_of_batch_averages() {
        // Batches [1, 2, 3] and [10]: mean of means would be 6.
        let mut acc = Accumulators::new(&[spec("v", AggregateOp::Avg)]);
        for v in [1, 2, 3, 10] {
            acc.observe(&row(&[("v", json!(v))]));
        }
        assert_eq!(acc.finish()[0].value, json!(4.0));
    }

    #[test]
    fn test_mixed_numeric_sum_and_empty_inputs() {
        let mut acc = Accumulators::new(&[spec("v", AggregateOp::Sum), spec("w", AggregateOp::Max)]);
        acc.observe(&row(&[("v", json!(1)), ("w", Value::Null)]));
        acc.observe(&row(&[("v", json!(2.5)), ("w", Value::Null)]));
        acc.observe(&row(&[("v", json!("not a number"))]));
        let out = acc.finish();
        assert_eq!(result(&out, "v", AggregateOp::Sum), json!(3.5));
        assert_eq!(result(&out, "w", AggregateOp::Max), Value::Null);
    }

    #[test]
    fn test_text_extremes_and_case_insensitive_fields() {
        let mut acc = Accumulators::new(&[spec("Name", AggregateOp::Min), spec("name", AggregateOp::Max)]);
        for n in ["mango", "apple", "zucchini"] {
            acc.observe(&row(&[("name", json!(n))]));
        }
        let out = acc.finish();
        assert_eq!(result(&out, "Name", AggregateOp::Min), json!("apple"));
        assert_eq!(result(&out, "name", AggregateOp::Max), json!("zucchini"));
    }

    #[test]
    fn test_operation_names() {
        let s: AggregationSpec = serde_json::from_value(json!({"field": "x", "operation": "countDistinct"})).unwrap();
        assert_eq!(s.operation, AggregateOp::CountDistinct);
        let s: AggregationSpec = serde_json::from_value(json!({"field": "x", "operation": "count_distinct"})).unwrap();
        assert_eq!(s.operation, AggregateOp::CountDistinct);
        assert!(serde_json::from_value::<AggregationSpec>(json!({"field": "x", "operation": "median"})).is_err());
    }
}
