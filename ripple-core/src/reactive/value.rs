//! Observed Values
//!
//! The engine observes dynamically shaped data: *records* (insertion
//! ordered, string keyed) and *sequences* (index addressed, with a
//! length). Both live behind a shared [`Target`] handle whose identity is
//! a [`TargetId`]; the dependency store and the wrapper cache are keyed by
//! that id and never by a wrapped view.
//!
//! # Keys
//!
//! A [`Key`] is either a normal field or index, or one of the sentinels:
//!
//! - [`Key::Length`] tracks the length of a sequence.
//! - [`Key::Iterate`] tracks "the key set of a record changed" and is what
//!   enumeration subscribes to.
//! - [`Key::Raw`] is the escape key that reads the unwrapped target
//!   through a wrapper. It is never tracked.
//!
//! Keys are normalized against the target they address: on a record an
//! index `3` is the field `"3"`, on a sequence the field `"3"` is the
//! index `3` and the field `"length"` is [`Key::Length`].
//!
//! # Holes
//!
//! Deleting an index of a sequence leaves `Null` in the slot. The sequence
//! only shrinks when its length is written.

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::IndexMap;
use serde::ser::Error as _;
use serde::{Serialize, Serializer};

use super::proxy::{Access, Reactive};
use super::refs::Ref;
use super::runtime::{Runtime, TriggerKind};
use super::subscriber::TargetId;
use crate::error::{ReactiveError, Result};

// ----------------------------------------------------------------------------
// Keys
// ----------------------------------------------------------------------------

/// A property key on an observed value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// A named field of a record.
    Field(Rc<str>),
    /// An element position of a sequence.
    Index(usize),
    /// The length of a sequence.
    Length,
    /// Sentinel for "the set of keys changed". Used by enumeration.
    Iterate,
    /// Escape key returning the unwrapped target. Never tracked.
    Raw,
}

impl Key {
    /// Create a field key.
    pub fn field(name: impl Into<Rc<str>>) -> Self {
        Key::Field(name.into())
    }

    /// The index addressed by this key, if it is an index key.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Key::Index(index) => Some(*index),
            _ => None,
        }
    }

    /// Whether this key may be recorded by `track`.
    pub fn is_trackable(&self) -> bool {
        !matches!(self, Key::Raw)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Field(name) => f.write_str(name),
            Key::Index(index) => write!(f, "{index}"),
            Key::Length => f.write_str("length"),
            Key::Iterate => f.write_str("<iterate>"),
            Key::Raw => f.write_str("<raw>"),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Field(name.into())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Field(name.into())
    }
}

impl From<Rc<str>> for Key {
    fn from(name: Rc<str>) -> Self {
        Key::Field(name)
    }
}

impl From<i32> for Key {
    fn from(index: i32) -> Self {
        match usize::try_from(index) {
            Ok(index) => Key::Index(index),
            Err(_) => Key::Field(index.to_string().into()),
        }
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

// ----------------------------------------------------------------------------
// Values
// ----------------------------------------------------------------------------

/// A dynamically typed value stored in, or read from, an observed target.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// Absence of a value. Also what reading a missing key yields.
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    /// A raw, unwrapped record or sequence.
    Object(Target),
    /// A wrapped view over a record or sequence.
    Reactive(Reactive),
    /// A ref, unwrapped automatically by `proxy_refs`.
    Ref(Ref),
}

impl Value {
    /// Name of the variant, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(target) if target.is_sequence() => "sequence",
            Value::Object(_) => "record",
            Value::Reactive(_) => "reactive",
            Value::Ref(_) => "ref",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The wrapped view, if this value is one.
    pub fn as_reactive(&self) -> Option<&Reactive> {
        match self {
            Value::Reactive(reactive) => Some(reactive),
            _ => None,
        }
    }

    /// The ref, if this value is one.
    pub fn as_ref_wrapper(&self) -> Option<&Ref> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// The underlying target of a raw or wrapped structured value.
    pub fn target(&self) -> Option<&Target> {
        match self {
            Value::Object(target) => Some(target),
            Value::Reactive(reactive) => Some(reactive.target()),
            _ => None,
        }
    }

    /// Whether this is a record or sequence, raw or wrapped.
    pub fn is_structured(&self) -> bool {
        self.target().is_some()
    }

    /// Strip any wrapper, yielding the raw target for wrapped values.
    pub fn into_raw(self) -> Value {
        match self {
            Value::Reactive(reactive) => Value::Object(reactive.raw()),
            other => other,
        }
    }

    /// Same-value comparison used to decide whether a write changed
    /// anything.
    ///
    /// Identical to `==` except that `NaN` is considered equal to `NaN`,
    /// so writing `NaN` over `NaN` is not a change.
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => self == other,
        }
    }

    /// Take an untracked JSON snapshot of this value.
    ///
    /// Wrapped views snapshot their raw target and refs snapshot their
    /// current value. Cycles and non-finite numbers are errors.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let mut stack = Vec::new();
        snapshot(self, &mut stack)
    }
}

/// Integral numbers below this magnitude snapshot as JSON integers.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

fn snapshot(value: &Value, stack: &mut Vec<TargetId>) -> Result<serde_json::Value> {
    use serde_json::Value as Json;

    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) if n.fract() == 0.0 && n.abs() < MAX_SAFE_INTEGER => Json::from(*n as i64),
        Value::Number(n) => serde_json::Number::from_f64(*n)
            .map(Json::Number)
            .ok_or_else(|| ReactiveError::NonFiniteNumber(n.to_string()))?,
        Value::String(s) => Json::String(s.to_string()),
        Value::Ref(r) => snapshot(&r.get_untracked(), stack)?,
        Value::Reactive(reactive) => snapshot(&Value::Object(reactive.raw()), stack)?,
        Value::Object(target) => {
            if stack.contains(&target.id()) {
                return Err(ReactiveError::Cycle);
            }
            stack.push(target.id());
            let json = match &*target.0.data.borrow() {
                Data::Record(fields) => {
                    let mut map = serde_json::Map::with_capacity(fields.len());
                    for (name, field) in fields {
                        map.insert(name.to_string(), snapshot(field, stack)?);
                    }
                    Json::Object(map)
                }
                Data::Sequence(items) => Json::Array(
                    items
                        .iter()
                        .map(|item| snapshot(item, stack))
                        .collect::<Result<Vec<_>>>()?,
                ),
            };
            stack.pop();
            json
        }
    })
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().map_err(S::Error::custom)?.serialize(serializer)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<Target> for Value {
    fn from(target: Target) -> Self {
        Value::Object(target)
    }
}

impl From<Reactive> for Value {
    fn from(reactive: Reactive) -> Self {
        Value::Reactive(reactive)
    }
}

impl From<Ref> for Value {
    fn from(r: Ref) -> Self {
        Value::Ref(r)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::from(s),
            Json::Array(items) => Value::Object(Target::from_items(items)),
            Json::Object(fields) => Value::Object(Target::from_fields(fields)),
        }
    }
}

// ----------------------------------------------------------------------------
// Targets
// ----------------------------------------------------------------------------

/// Shape of a structured value. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Record,
    Sequence,
}

pub(crate) enum Data {
    Record(IndexMap<Rc<str>, Value>),
    Sequence(Vec<Value>),
}

struct TargetInner {
    id: TargetId,
    shape: Shape,
    data: RefCell<Data>,
}

impl Drop for TargetInner {
    fn drop(&mut self) {
        Runtime::forget_target(self.id);
    }
}

/// Shared handle to a raw record or sequence.
///
/// Cloning the handle shares the data. Access through a `Target` is raw:
/// nothing is tracked and nothing is triggered. Wrap it with
/// [`reactive`](super::reactive) to observe it.
#[derive(Clone)]
pub struct Target(Rc<TargetInner>);

/// Result of a raw write: how the key was classified and what it held.
pub(crate) struct WriteOutcome {
    pub kind: TriggerKind,
    pub old: Value,
}

impl Target {
    fn new(shape: Shape, data: Data) -> Self {
        Self(Rc::new(TargetInner {
            id: TargetId::new(),
            shape,
            data: RefCell::new(data),
        }))
    }

    /// Create an empty record.
    pub fn record() -> Self {
        Self::new(Shape::Record, Data::Record(IndexMap::new()))
    }

    /// Create an empty sequence.
    pub fn sequence() -> Self {
        Self::new(Shape::Sequence, Data::Sequence(Vec::new()))
    }

    /// Create a record from `(name, value)` pairs, keeping their order.
    pub fn from_fields<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Rc<str>>,
        V: Into<Value>,
    {
        let fields = fields
            .into_iter()
            .map(|(name, value)| (name.into(), value.into().into_raw()))
            .collect();
        Self::new(Shape::Record, Data::Record(fields))
    }

    /// Create a sequence from its items.
    pub fn from_items<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let items = items
            .into_iter()
            .map(|item| item.into().into_raw())
            .collect();
        Self::new(Shape::Sequence, Data::Sequence(items))
    }

    /// This target's identity.
    pub fn id(&self) -> TargetId {
        self.0.id
    }

    pub fn shape(&self) -> Shape {
        self.0.shape
    }

    pub fn is_sequence(&self) -> bool {
        self.0.shape == Shape::Sequence
    }

    /// Number of fields or items.
    pub fn len(&self) -> usize {
        match &*self.0.data.borrow() {
            Data::Record(fields) => fields.len(),
            Data::Sequence(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both handles refer to the same data.
    pub fn ptr_eq(&self, other: &Target) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Snapshot of the raw items of a sequence (empty for records).
    pub fn items(&self) -> Vec<Value> {
        match &*self.0.data.borrow() {
            Data::Sequence(items) => items.clone(),
            Data::Record(_) => Vec::new(),
        }
    }

    /// Resolve `key` against this target's shape.
    ///
    /// Returns `None` for keys that can never address data here
    /// (sentinels, non-numeric fields of a sequence).
    pub(crate) fn normalize(&self, key: Key) -> Option<Key> {
        match (self.0.shape, key) {
            (_, Key::Iterate | Key::Raw) => None,
            (Shape::Record, Key::Index(index)) => Some(Key::Field(index.to_string().into())),
            (Shape::Record, Key::Length) => Some(Key::field("length")),
            (Shape::Record, key) => Some(key),
            (Shape::Sequence, Key::Field(name)) => {
                if &*name == "length" {
                    return Some(Key::Length);
                }
                name.parse::<usize>()
                    .ok()
                    .filter(|index| index.to_string() == *name)
                    .map(Key::Index)
            }
            (Shape::Sequence, key) => Some(key),
        }
    }

    /// Raw read of a normalized key.
    pub(crate) fn get(&self, key: &Key) -> Option<Value> {
        match (&*self.0.data.borrow(), key) {
            (Data::Record(fields), Key::Field(name)) => fields.get(name).cloned(),
            (Data::Sequence(items), Key::Index(index)) => items.get(*index).cloned(),
            (Data::Sequence(items), Key::Length) => Some(Value::from(items.len())),
            _ => None,
        }
    }

    /// Raw existence check of a normalized key.
    pub(crate) fn contains(&self, key: &Key) -> bool {
        match (&*self.0.data.borrow(), key) {
            (Data::Record(fields), Key::Field(name)) => fields.contains_key(name),
            (Data::Sequence(items), Key::Index(index)) => *index < items.len(),
            (Data::Sequence(_), Key::Length) => true,
            _ => false,
        }
    }

    /// Raw write of a normalized, non-length key.
    ///
    /// Writing past the end of a sequence pads it with `Null`. Indices at
    /// or beyond [`MAX_LENGTH`] are rejected.
    pub(crate) fn set(&self, key: Key, value: Value) -> Option<WriteOutcome> {
        match (&mut *self.0.data.borrow_mut(), key) {
            (Data::Record(fields), Key::Field(name)) => Some(match fields.insert(name, value) {
                Some(old) => WriteOutcome {
                    kind: TriggerKind::Update,
                    old,
                },
                None => WriteOutcome {
                    kind: TriggerKind::Add,
                    old: Value::Null,
                },
            }),
            (Data::Sequence(items), Key::Index(index)) => {
                if index < items.len() {
                    let old = std::mem::replace(&mut items[index], value);
                    Some(WriteOutcome {
                        kind: TriggerKind::Update,
                        old,
                    })
                } else if index >= MAX_LENGTH {
                    None
                } else {
                    items.resize(index, Value::Null);
                    items.push(value);
                    Some(WriteOutcome {
                        kind: TriggerKind::Add,
                        old: Value::Null,
                    })
                }
            }
            _ => None,
        }
    }

    /// Truncate or pad a sequence. Returns the previous length.
    pub(crate) fn set_length(&self, len: usize) -> usize {
        match &mut *self.0.data.borrow_mut() {
            Data::Sequence(items) => {
                let old = items.len();
                items.resize(len, Value::Null);
                old
            }
            Data::Record(fields) => fields.len(),
        }
    }

    /// Raw delete of a normalized key, returning what was there.
    pub(crate) fn remove(&self, key: &Key) -> Option<Value> {
        match (&mut *self.0.data.borrow_mut(), key) {
            (Data::Record(fields), Key::Field(name)) => fields.shift_remove(name),
            (Data::Sequence(items), Key::Index(index)) => items
                .get_mut(*index)
                .map(|slot| std::mem::take(slot)),
            _ => None,
        }
    }

    /// Own keys in enumeration order.
    pub(crate) fn own_keys(&self) -> Vec<Key> {
        match &*self.0.data.borrow() {
            Data::Record(fields) => fields.keys().cloned().map(Key::Field).collect(),
            Data::Sequence(items) => (0..items.len()).map(Key::Index).collect(),
        }
    }
}

/// Largest sequence length. Valid indices are strictly below it.
pub const MAX_LENGTH: usize = u32::MAX as usize;

/// Interpret a value as a sequence length.
pub(crate) fn as_length(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) if *n >= 0.0 && *n <= MAX_LENGTH as f64 && n.fract() == 0.0 => {
            Some(*n as usize)
        }
        _ => None,
    }
}

impl Access for Target {
    fn read(&self, key: impl Into<Key>) -> Value {
        let key = key.into();
        if key == Key::Raw {
            return Value::Object(self.clone());
        }
        self.normalize(key)
            .and_then(|key| self.get(&key))
            .unwrap_or_default()
    }

    fn write(&self, key: impl Into<Key>, value: impl Into<Value>) -> bool {
        let Some(key) = self.normalize(key.into()) else {
            return false;
        };
        let value = value.into().into_raw();
        if key == Key::Length {
            return match as_length(&value) {
                Some(len) => {
                    self.set_length(len);
                    true
                }
                None => false,
            };
        }
        self.set(key, value).is_some()
    }

    fn has(&self, key: impl Into<Key>) -> bool {
        self.normalize(key.into())
            .is_some_and(|key| self.contains(&key))
    }

    fn keys(&self) -> Vec<Key> {
        self.own_keys()
    }

    fn delete(&self, key: impl Into<Key>) -> bool {
        match self.normalize(key.into()) {
            Some(Key::Length) => false,
            Some(key) => {
                self.remove(&key);
                true
            }
            None => true,
        }
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Target {}

impl Hash for Target {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.0.data.try_borrow().map(|data| match &*data {
            Data::Record(fields) => fields.len(),
            Data::Sequence(items) => items.len(),
        });
        let mut out = f.debug_struct("Target");
        out.field("id", &self.0.id).field("shape", &self.0.shape);
        if let Ok(len) = len {
            out.field("len", &len);
        }
        out.finish()
    }
}

impl TryFrom<serde_json::Value> for Target {
    type Error = ReactiveError;

    fn try_from(json: serde_json::Value) -> Result<Self> {
        match Value::from(json) {
            Value::Object(target) => Ok(target),
            other => Err(ReactiveError::NotStructured {
                kind: other.kind_name(),
            }),
        }
    }
}

impl From<&Target> for Target {
    fn from(target: &Target) -> Self {
        target.clone()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nan_is_the_same_value_as_nan() {
        let nan = Value::Number(f64::NAN);
        assert_ne!(nan, nan.clone());
        assert!(nan.same_value(&Value::Number(f64::NAN)));
        assert!(!nan.same_value(&Value::Number(1.0)));
        assert!(Value::from(0.0).same_value(&Value::from(-0.0)));
    }

    #[test]
    fn structured_values_compare_by_identity() {
        let a = Target::record();
        let b = Target::record();
        assert_eq!(Value::from(a.clone()), Value::from(a.clone()));
        assert_ne!(Value::from(a), Value::from(b));
    }

    #[test]
    fn keys_normalize_per_shape() {
        let record = Target::record();
        assert_eq!(record.normalize(Key::Index(2)), Some(Key::field("2")));
        assert_eq!(record.normalize(Key::Iterate), None);

        let sequence = Target::sequence();
        assert_eq!(sequence.normalize(Key::from("2")), Some(Key::Index(2)));
        assert_eq!(sequence.normalize(Key::from("length")), Some(Key::Length));
        assert_eq!(sequence.normalize(Key::from("02")), None);
        assert_eq!(sequence.normalize(Key::from("name")), None);
    }

    #[test]
    fn raw_writes_classify_add_and_update() {
        let record = Target::record();
        let first = record.set(Key::field("a"), Value::from(1)).unwrap();
        assert_eq!(first.kind, TriggerKind::Add);
        let second = record.set(Key::field("a"), Value::from(2)).unwrap();
        assert_eq!(second.kind, TriggerKind::Update);
        assert_eq!(second.old, Value::from(1));

        let sequence = Target::from_items([1, 2]);
        assert_eq!(
            sequence.set(Key::Index(1), Value::from(5)).unwrap().kind,
            TriggerKind::Update
        );
        assert_eq!(
            sequence.set(Key::Index(4), Value::from(5)).unwrap().kind,
            TriggerKind::Add
        );
        assert_eq!(sequence.len(), 5);
        assert_eq!(sequence.read(3), Value::Null);
    }

    #[test]
    fn deleting_an_index_leaves_a_hole() {
        let sequence = Target::from_items([1, 2, 3]);
        assert!(sequence.delete(1));
        assert_eq!(sequence.len(), 3);
        assert_eq!(sequence.read(1), Value::Null);
        assert!(!sequence.delete(Key::Length));
    }

    #[test]
    fn raw_length_writes_truncate() {
        let sequence = Target::from_items([1, 2, 3]);
        assert!(sequence.write(Key::Length, 1));
        assert_eq!(sequence.items(), vec![Value::from(1)]);
        assert!(!sequence.write(Key::Length, 1.5));
        assert!(!sequence.write(Key::Length, -1));
        assert!(!sequence.write(Key::Length, 1e20));
        assert!(!sequence.write(MAX_LENGTH, 0));
        assert_eq!(sequence.len(), 1);
    }

    #[test]
    fn json_round_trip_keeps_field_order() {
        let input = json!({ "b": 1, "a": [true, null, "x"], "c": { "d": 2.5 } });
        let target = Target::try_from(input.clone()).unwrap();
        assert_eq!(
            target.keys(),
            vec![Key::field("b"), Key::field("a"), Key::field("c")]
        );
        assert_eq!(Value::from(target).to_json().unwrap(), input);
    }

    #[test]
    fn primitives_are_not_targets() {
        let err = Target::try_from(json!(3)).unwrap_err();
        assert_eq!(err, ReactiveError::NotStructured { kind: "number" });
    }

    #[test]
    fn snapshot_rejects_cycles_and_nan() {
        let record = Target::record();
        record.write("me", record.clone());
        assert_eq!(
            Value::from(record.clone()).to_json(),
            Err(ReactiveError::Cycle)
        );
        record.delete("me");

        record.write("n", f64::NAN);
        assert!(matches!(
            Value::from(record).to_json(),
            Err(ReactiveError::NonFiniteNumber(_))
        ));
    }

    #[test]
    fn serialize_matches_snapshot() {
        let target = Target::try_from(json!({ "a": [1, 2] })).unwrap();
        let text = serde_json::to_string(&Value::from(target)).unwrap();
        assert_eq!(text, r#"{"a":[1,2]}"#);
    }
}
