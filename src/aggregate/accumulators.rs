use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value, json};

/// Sorted keys make the serialized form a stable identity for any value.
pub fn canonical(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// A JSON value with a total order, so that accumulated sets come out in
/// the same order no matter which contribution arrived first.
#[derive(Debug, Clone)]
pub struct SortableValue(pub Value);

impl SortableValue {
    fn rank(&self) -> u8 {
        match self.0 {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
}

impl Ord for SortableValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.0, &other.0) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => {
                    let a = a.as_f64().unwrap_or(f64::NAN);
                    let b = b.as_f64().unwrap_or(f64::NAN);
                    a.total_cmp(&b)
                }
            },
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Null, Value::Null) => Ordering::Equal,
            (a, b) if self.rank() == other.rank() => canonical(a).cmp(&canonical(b)),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for SortableValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SortableValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortableValue {}

pub trait Accumulator {
    fn accumulate(&mut self, value: &Value);

    fn get(&self) -> Value;
}

/// Distinct values, flattening lists. Only the least `max_size` values in
/// sort order are kept.
pub struct SetAccumulator {
    values: BTreeSet<SortableValue>,
    max_size: usize,
}

impl SetAccumulator {
    pub fn new(max_size: usize) -> Self {
        Self {
            values: BTreeSet::new(),
            max_size,
        }
    }

    fn add(&mut self, value: &Value) {
        self.values.insert(SortableValue(value.clone()));
        if self.values.len() > self.max_size
            && let Some(dropped) = self.values.pop_last()
        {
            tracing::debug!(
                max_size = self.max_size,
                dropped = %canonical(&dropped.0),
                "set accumulator is full"
            );
        }
    }
}

impl Accumulator for SetAccumulator {
    fn accumulate(&mut self, value: &Value) {
        match value {
            Value::Array(values) => values.iter().for_each(|value| self.add(value)),
            value => self.add(value),
        }
    }

    fn get(&self) -> Value {
        Value::Array(self.values.iter().map(|value| value.0.clone()).collect())
    }
}

#[derive(Debug, Clone, Copy)]
enum Total {
    Int(i64),
    Float(f64),
}

/// Sums numbers, ignoring nulls. Stays integral until a float or an
/// overflow shows up.
#[derive(Default)]
pub struct SumAccumulator {
    total: Option<Total>,
}

impl SumAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, number: &serde_json::Number) {
        let next = match (self.total, number.as_i64()) {
            (None, Some(n)) => Total::Int(n),
            (Some(Total::Int(total)), Some(n)) => total
                .checked_add(n)
                .map_or(Total::Float(total as f64 + n as f64), Total::Int),
            (total, _) => {
                let n = number.as_f64().unwrap_or_default();
                match total {
                    Some(Total::Int(total)) => Total::Float(total as f64 + n),
                    Some(Total::Float(total)) => Total::Float(total + n),
                    None => Total::Float(n),
                }
            }
        };
        self.total = Some(next);
    }
}

impl Accumulator for SumAccumulator {
    fn accumulate(&mut self, value: &Value) {
        match value {
            Value::Number(number) => self.add(number),
            Value::Array(values) => values.iter().for_each(|value| self.accumulate(value)),
            _ => {}
        }
    }

    fn get(&self) -> Value {
        match self.total {
            Some(Total::Int(total)) => json!(total),
            Some(Total::Float(total)) => json!(total),
            None => Value::Null,
        }
    }
}

/// Feeds the inner accumulator once per distinct key. Values are
/// `[key, value]` pairs, so the same file seen through two bundles is
/// only counted once.
pub struct DistinctAccumulator<A> {
    inner: A,
    keys: BTreeSet<SortableValue>,
}

impl<A: Accumulator> DistinctAccumulator<A> {
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            keys: BTreeSet::new(),
        }
    }
}

impl<A: Accumulator> Accumulator for DistinctAccumulator<A> {
    fn accumulate(&mut self, value: &Value) {
        let Some([key, value]) = value.as_array().and_then(|pair| pair.first_chunk::<2>()) else {
            return;
        };
        if self.keys.insert(SortableValue(key.clone())) {
            self.inner.accumulate(value);
        }
    }

    fn get(&self) -> Value {
        self.inner.get()
    }
}

/// The number of distinct non-null values.
#[derive(Default)]
pub struct UniqueValueCountAccumulator {
    values: BTreeSet<SortableValue>,
}

impl UniqueValueCountAccumulator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Accumulator for UniqueValueCountAccumulator {
    fn accumulate(&mut self, value: &Value) {
        match value {
            Value::Null => {}
            Value::Array(values) => values.iter().for_each(|value| self.accumulate(value)),
            value => {
                self.values.insert(SortableValue(value.clone()));
            }
        }
    }

    fn get(&self) -> Value {
        json!(self.values.len())
    }
}

fn extremum(current: &mut Option<SortableValue>, value: &Value, wanted: Ordering) {
    match value {
        Value::Null => {}
        Value::Array(values) => values
            .iter()
            .for_each(|value| extremum(current, value, wanted)),
        value => {
            let value = SortableValue(value.clone());
            if current.as_ref().is_none_or(|current| value.cmp(current) == wanted) {
                *current = Some(value);
            }
        }
    }
}

#[derive(Default)]
pub struct MinAccumulator {
    value: Option<SortableValue>,
}

impl MinAccumulator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Accumulator for MinAccumulator {
    fn accumulate(&mut self, value: &Value) {
        extremum(&mut self.value, value, Ordering::Less);
    }

    fn get(&self) -> Value {
        self.value.as_ref().map_or(Value::Null, |value| value.0.clone())
    }
}

#[derive(Default)]
pub struct MaxAccumulator {
    value: Option<SortableValue>,
}

impl MaxAccumulator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Accumulator for MaxAccumulator {
    fn accumulate(&mut self, value: &Value) {
        extremum(&mut self.value, value, Ordering::Greater);
    }

    fn get(&self) -> Value {
        self.value.as_ref().map_or(Value::Null, |value| value.0.clone())
    }
}

/// Distinct objects, identified by the given key fields or, without key
/// fields, by their entire content.
pub struct SetOfDictAccumulator {
    key_fields: Vec<&'static str>,
    values: BTreeMap<SortableValue, Value>,
    max_size: usize,
}

impl SetOfDictAccumulator {
    pub fn new(key_fields: &[&'static str], max_size: usize) -> Self {
        Self {
            key_fields: key_fields.to_vec(),
            values: BTreeMap::new(),
            max_size,
        }
    }

    fn key(&self, object: &Map<String, Value>) -> SortableValue {
        if self.key_fields.is_empty() {
            return SortableValue(Value::Object(object.clone()));
        }
        SortableValue(Value::Array(
            self.key_fields
                .iter()
                .map(|field| object.get(*field).cloned().unwrap_or(Value::Null))
                .collect(),
        ))
    }
}

impl Accumulator for SetOfDictAccumulator {
    fn accumulate(&mut self, value: &Value) {
        match value {
            Value::Array(values) => values.iter().for_each(|value| self.accumulate(value)),
            Value::Object(object) => {
                let key = self.key(object);
                // Equal keys with different content keep the greater one.
                let entry = self.values.entry(key).or_insert_with(|| value.clone());
                if canonical(value) > canonical(entry) {
                    *entry = value.clone();
                }
                if self.values.len() > self.max_size {
                    self.values.pop_last();
                }
            }
            _ => {}
        }
    }

    fn get(&self) -> Value {
        Value::Array(self.values.values().cloned().collect())
    }
}

/// Distinct values ordered by how often they occur, most frequent first.
pub struct FrequencySetAccumulator {
    counts: BTreeMap<SortableValue, usize>,
    max_size: usize,
}

impl FrequencySetAccumulator {
    pub fn new(max_size: usize) -> Self {
        Self {
            counts: BTreeMap::new(),
            max_size,
        }
    }
}

impl Accumulator for FrequencySetAccumulator {
    fn accumulate(&mut self, value: &Value) {
        match value {
            Value::Null => {}
            Value::Array(values) => values.iter().for_each(|value| self.accumulate(value)),
            value => *self.counts.entry(SortableValue(value.clone())).or_default() += 1,
        }
    }

    fn get(&self) -> Value {
        let mut counts = self.counts.iter().collect::<Vec<_>>();
        // Stable sort keeps ties in value order.
        counts.sort_by(|(_, a), (_, b)| b.cmp(a));
        Value::Array(
            counts
                .into_iter()
                .take(self.max_size)
                .map(|(value, _)| value.0.clone())
                .collect(),
        )
    }
}

/// Collapses to one value, ignoring nulls. Disagreeing values collapse to
/// null.
#[derive(Default)]
pub struct SingleValueAccumulator {
    value: Option<SortableValue>,
    conflict: bool,
}

impl SingleValueAccumulator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Accumulator for SingleValueAccumulator {
    fn accumulate(&mut self, value: &Value) {
        if value.is_null() || self.conflict {
            return;
        }
        let value = SortableValue(value.clone());
        match &self.value {
            Some(current) if *current != value => {
                tracing::debug!(
                    first = %canonical(&current.0),
                    second = %canonical(&value.0),
                    "conflicting single values"
                );
                self.value = None;
                self.conflict = true;
            }
            Some(_) => {}
            None => self.value = Some(value),
        }
    }

    fn get(&self) -> Value {
        self.value.as_ref().map_or(Value::Null, |value| value.0.clone())
    }
}
