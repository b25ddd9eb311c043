//! Interception Layer
//!
//! A [`Reactive`] is a view over a raw [`Target`] through which every
//! access is instrumented:
//!
//! - `read`, `has` and `keys` call [`Runtime::track`];
//! - `write` and `delete` call [`Runtime::trigger`] when they change
//!   something.
//!
//! Callers never reach the data except through the [`Access`] trait, so
//! nothing read through a view escapes tracking. Nested records and
//! sequences are wrapped on demand when they are read, never eagerly.
//!
//! # Variants
//!
//! | Constructor          | Writes   | Nested values      |
//! |----------------------|----------|--------------------|
//! | [`reactive`]         | allowed  | wrapped reactive   |
//! | [`shallow_reactive`] | allowed  | returned raw       |
//! | [`readonly`]         | rejected | wrapped readonly   |
//! | [`shallow_readonly`] | rejected | returned raw       |
//!
//! Readonly views do not track plain reads, since nothing can change
//! through them. Membership checks and enumeration still track, so a
//! readonly view sees keys added through a writable view of the same
//! target.
//!
//! # Identity
//!
//! Views are cached per `(target, variant)`, so wrapping the same target
//! twice yields the identical view. The cache holds views weakly; a view
//! nobody holds is rebuilt on the next request.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::warn;

use super::runtime::{Runtime, TriggerKind};
use super::subscriber::TargetId;
use super::value::{as_length, Key, Target, Value};

/// Capability interface shared by raw targets, reactive views and
/// ref-unwrapping views.
pub trait Access {
    /// Read the value at `key`. Missing keys read as `Null`.
    fn read(&self, key: impl Into<Key>) -> Value;

    /// Write `value` at `key`. Returns `false` if the key cannot be
    /// written on this kind of value.
    fn write(&self, key: impl Into<Key>, value: impl Into<Value>) -> bool;

    /// Whether `key` exists.
    fn has(&self, key: impl Into<Key>) -> bool;

    /// Own keys, in enumeration order.
    fn keys(&self) -> Vec<Key>;

    /// Remove `key`. Returns `false` if the key cannot be removed.
    fn delete(&self, key: impl Into<Key>) -> bool;
}

/// Which variant of view a [`Reactive`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyMode {
    Reactive,
    ShallowReactive,
    Readonly,
    ShallowReadonly,
}

impl ProxyMode {
    pub fn is_readonly(self) -> bool {
        matches!(self, ProxyMode::Readonly | ProxyMode::ShallowReadonly)
    }

    pub fn is_shallow(self) -> bool {
        matches!(self, ProxyMode::ShallowReactive | ProxyMode::ShallowReadonly)
    }

    /// Mode used to wrap nested values read through a deep view.
    fn nested(self) -> Self {
        if self.is_readonly() {
            ProxyMode::Readonly
        } else {
            ProxyMode::Reactive
        }
    }
}

struct ProxyInner {
    target: Target,
    mode: ProxyMode,
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        let key = (self.target.id(), self.mode);
        let _ = VIEWS.try_with(|views| {
            if let Ok(mut views) = views.try_borrow_mut() {
                if views.get(&key).is_some_and(|view| view.strong_count() == 0) {
                    views.remove(&key);
                }
            }
        });
    }
}

thread_local! {
    static VIEWS: RefCell<HashMap<(TargetId, ProxyMode), Weak<ProxyInner>>> =
        RefCell::new(HashMap::new());
}

/// An instrumented view over a record or sequence.
///
/// Cloning the handle clones the view, not the data.
#[derive(Clone)]
pub struct Reactive(Rc<ProxyInner>);

impl Reactive {
    /// Get or create the view of `target` in `mode`.
    pub(crate) fn wrap(target: Target, mode: ProxyMode) -> Self {
        let key = (target.id(), mode);
        let cached = VIEWS.with(|views| views.borrow().get(&key).and_then(Weak::upgrade));
        if let Some(inner) = cached {
            return Self(inner);
        }

        let inner = Rc::new(ProxyInner { target, mode });
        VIEWS.with(|views| views.borrow_mut().insert(key, Rc::downgrade(&inner)));
        Self(inner)
    }

    /// The unwrapped target.
    pub fn raw(&self) -> Target {
        self.0.target.clone()
    }

    pub fn target(&self) -> &Target {
        &self.0.target
    }

    pub fn mode(&self) -> ProxyMode {
        self.0.mode
    }

    /// Identity of the underlying target.
    pub fn id(&self) -> TargetId {
        self.0.target.id()
    }

    pub fn is_readonly(&self) -> bool {
        self.0.mode.is_readonly()
    }

    pub fn is_shallow(&self) -> bool {
        self.0.mode.is_shallow()
    }

    pub fn is_sequence(&self) -> bool {
        self.0.target.is_sequence()
    }

    /// Number of items or fields, tracked.
    pub fn len(&self) -> usize {
        if self.is_sequence() {
            Runtime::track(self.id(), Key::Length);
            self.0.target.len()
        } else {
            self.keys().len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both handles are the same view.
    pub fn ptr_eq(&self, other: &Reactive) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn track_read(&self, key: Key) {
        if !self.is_readonly() {
            Runtime::track(self.id(), key);
        }
    }

    fn reject(&self, op: &str, key: &Key) {
        warn!(target_id = %self.id(), key = %key, "{op} rejected: value is readonly");
    }

    fn wrap_nested(&self, value: Value) -> Value {
        if self.is_shallow() {
            return value;
        }
        match value {
            Value::Object(target) => Value::Reactive(Self::wrap(target, self.0.mode.nested())),
            other => other,
        }
    }
}

impl Access for Reactive {
    fn read(&self, key: impl Into<Key>) -> Value {
        let key = key.into();
        if key == Key::Raw {
            return Value::Object(self.raw());
        }
        let Some(key) = self.0.target.normalize(key) else {
            return Value::Null;
        };

        self.track_read(key.clone());
        let value = self.0.target.get(&key).unwrap_or_default();
        self.wrap_nested(value)
    }

    fn write(&self, key: impl Into<Key>, value: impl Into<Value>) -> bool {
        let key = key.into();
        if self.is_readonly() {
            self.reject("write", &key);
            return true;
        }
        let Some(key) = self.0.target.normalize(key) else {
            return false;
        };
        let value = value.into().into_raw();
        let target = &self.0.target;

        if key == Key::Length {
            let Some(len) = as_length(&value) else {
                warn!(target_id = %self.id(), value = ?value, "invalid length");
                return false;
            };
            if target.set_length(len) != len {
                Runtime::trigger(self.id(), &Key::Length, TriggerKind::Update, Some(len));
            }
            return true;
        }

        let Some(outcome) = target.set(key.clone(), value.clone()) else {
            warn!(target_id = %self.id(), key = %key, "write rejected: index out of range");
            return false;
        };
        match outcome.kind {
            TriggerKind::Add => Runtime::trigger(self.id(), &key, TriggerKind::Add, None),
            TriggerKind::Update if !outcome.old.same_value(&value) => {
                Runtime::trigger(self.id(), &key, TriggerKind::Update, None)
            }
            _ => {}
        }
        true
    }

    fn has(&self, key: impl Into<Key>) -> bool {
        let Some(key) = self.0.target.normalize(key.into()) else {
            return false;
        };
        Runtime::track(self.id(), key.clone());
        self.0.target.contains(&key)
    }

    fn keys(&self) -> Vec<Key> {
        let key = if self.is_sequence() {
            Key::Length
        } else {
            Key::Iterate
        };
        Runtime::track(self.id(), key);
        self.0.target.own_keys()
    }

    fn delete(&self, key: impl Into<Key>) -> bool {
        let key = key.into();
        if self.is_readonly() {
            self.reject("delete", &key);
            return true;
        }
        match self.0.target.normalize(key) {
            None => true,
            Some(Key::Length) => false,
            Some(key) => {
                let existed = self.0.target.contains(&key);
                if self.0.target.remove(&key).is_some() && existed {
                    Runtime::trigger(self.id(), &key, TriggerKind::Delete, None);
                }
                true
            }
        }
    }
}

impl PartialEq for Reactive {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Reactive {}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactive")
            .field("target", &self.0.target)
            .field("mode", &self.0.mode)
            .finish()
    }
}

impl From<Reactive> for Target {
    fn from(reactive: Reactive) -> Self {
        reactive.raw()
    }
}

impl From<&Reactive> for Target {
    fn from(reactive: &Reactive) -> Self {
        reactive.raw()
    }
}

/// Deep, writable view of `target`.
pub fn reactive(target: impl Into<Target>) -> Reactive {
    Reactive::wrap(target.into(), ProxyMode::Reactive)
}

/// Writable view whose nested values are returned raw.
pub fn shallow_reactive(target: impl Into<Target>) -> Reactive {
    Reactive::wrap(target.into(), ProxyMode::ShallowReactive)
}

/// Deep view that rejects writes and deletes.
pub fn readonly(target: impl Into<Target>) -> Reactive {
    Reactive::wrap(target.into(), ProxyMode::Readonly)
}

/// Readonly view whose nested values are returned raw.
pub fn shallow_readonly(target: impl Into<Target>) -> Reactive {
    Reactive::wrap(target.into(), ProxyMode::ShallowReadonly)
}

pub fn is_reactive(value: &Value) -> bool {
    value.as_reactive().is_some()
}

pub fn is_readonly(value: &Value) -> bool {
    value.as_reactive().is_some_and(Reactive::is_readonly)
}

pub fn is_shallow(value: &Value) -> bool {
    value.as_reactive().is_some_and(Reactive::is_shallow)
}

/// Strip a view, returning the raw target. Other values pass through.
pub fn to_raw(value: Value) -> Value {
    value.into_raw()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Effect, MAX_LENGTH};
    use serde_json::json;
    use std::cell::Cell;

    fn state(json: serde_json::Value) -> Reactive {
        reactive(Target::try_from(json).unwrap())
    }

    fn counting_effect(body: impl Fn() + 'static) -> (Effect, Rc<Cell<usize>>) {
        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();
        let effect = Effect::new(move || {
            runs_clone.set(runs_clone.get() + 1);
            body();
        });
        (effect, runs)
    }

    #[test]
    fn wrapping_is_identity_stable() {
        let target = Target::record();
        let a = reactive(&target);
        let b = reactive(&target);
        assert!(a.ptr_eq(&b));

        let ro = readonly(&target);
        assert!(!ro.ptr_eq(&a));
        assert!(ro.ptr_eq(&readonly(a.clone())));
    }

    #[test]
    fn raw_key_returns_unwrapped_target() {
        let target = Target::record();
        let view = reactive(&target);
        assert_eq!(view.read(Key::Raw), Value::Object(target.clone()));
        assert_eq!(to_raw(Value::from(view)), Value::Object(target));
    }

    #[test]
    fn nested_values_are_wrapped_on_read() {
        let view = state(json!({ "inner": { "x": 1 } }));
        let inner = view.read("inner");
        assert!(is_reactive(&inner));
        assert_eq!(inner, view.read("inner"));

        let shallow = shallow_reactive(view.raw());
        assert!(matches!(shallow.read("inner"), Value::Object(_)));

        let ro = readonly(view.raw());
        assert!(is_readonly(&ro.read("inner")));
    }

    #[test]
    fn tracking_is_per_key() {
        let view = state(json!({ "a": 1, "b": 2 }));
        let view_clone = view.clone();
        let (_effect, runs) = counting_effect(move || {
            view_clone.read("a");
        });

        view.write("b", 3);
        assert_eq!(runs.get(), 1);
        view.write("a", 3);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn unchanged_writes_do_not_trigger() {
        let view = state(json!({ "a": 1 }));
        let view_clone = view.clone();
        let (_effect, runs) = counting_effect(move || {
            view_clone.read("a");
        });

        view.write("a", 1);
        assert_eq!(runs.get(), 1);

        view.write("a", f64::NAN);
        assert_eq!(runs.get(), 2);
        view.write("a", f64::NAN);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn writing_a_view_stores_the_raw_target() {
        let view = state(json!({}));
        let child = reactive(Target::record());
        view.write("child", child.clone());
        assert_eq!(view.raw().read("child"), Value::Object(child.raw()));
        assert_eq!(view.read("child"), Value::Reactive(child));
    }

    #[test]
    fn has_tracks_the_key() {
        let view = state(json!({}));
        let view_clone = view.clone();
        let (_effect, runs) = counting_effect(move || {
            view_clone.has("a");
        });

        view.write("a", 1);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn enumeration_tracks_key_set_changes() {
        let view = state(json!({ "a": 1 }));
        let view_clone = view.clone();
        let (_effect, runs) = counting_effect(move || {
            view_clone.keys();
        });

        // Value changes do not affect enumeration.
        view.write("a", 2);
        assert_eq!(runs.get(), 1);

        view.write("b", 1);
        assert_eq!(runs.get(), 2);

        view.delete("missing");
        assert_eq!(runs.get(), 2);

        view.delete("a");
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn sequence_enumeration_tracks_length() {
        let view = state(json!([1, 2]));
        let view_clone = view.clone();
        let (_effect, runs) = counting_effect(move || {
            view_clone.keys();
        });

        view.write(2, 3);
        assert_eq!(runs.get(), 2);
        view.write(0, 9);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn length_truncation_reaches_dropped_indices() {
        let view = state(json!([1, 2, 3]));

        let tail = view.clone();
        let (_on_tail, tail_runs) = counting_effect(move || {
            tail.read(2);
        });
        let head = view.clone();
        let (_on_head, head_runs) = counting_effect(move || {
            head.read(0);
        });

        assert!(view.write("length", 1));
        assert_eq!(tail_runs.get(), 2);
        assert_eq!(head_runs.get(), 1);
        assert_eq!(view.raw().len(), 1);
    }

    #[test]
    fn invalid_length_is_rejected() {
        let view = state(json!([1, 2, 3]));
        assert!(!view.write(Key::Length, -1));
        assert!(!view.write(Key::Length, "two"));
        assert_eq!(view.raw().len(), 3);
    }

    #[test]
    fn readonly_rejects_mutation_without_tracking() {
        let target = Target::try_from(json!({ "a": 1 })).unwrap();
        let ro = readonly(&target);

        let ro_clone = ro.clone();
        let effect = Effect::new(move || {
            ro_clone.read("a");
        });
        assert!(effect.deps().is_empty());

        assert!(ro.write("a", 2));
        assert!(ro.delete("a"));
        assert_eq!(target.read("a"), Value::from(1));
    }

    #[test]
    fn readonly_membership_and_enumeration_track() {
        let target = Target::record();
        let ro = readonly(&target);

        let ro_clone = ro.clone();
        let (_effect, runs) = counting_effect(move || {
            ro_clone.has("x");
            ro_clone.keys();
        });

        reactive(&target).write("x", 1);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn readonly_sequence_len_tracks() {
        let target = Target::from_items([1, 2]);
        let ro = readonly(&target);

        let ro_clone = ro.clone();
        let (_effect, runs) = counting_effect(move || {
            ro_clone.len();
        });

        reactive(&target).push(3);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn oversized_length_and_index_are_rejected() {
        let view = state(json!([1, 2, 3]));
        assert!(!view.write(Key::Length, 1e20));
        assert!(!view.write(Key::Length, f64::INFINITY));
        assert!(!view.write(MAX_LENGTH, 0));
        assert!(!view.write(Key::Index(usize::MAX), 0));
        assert_eq!(view.raw().len(), 3);

        assert!(view.write(Key::Length, 2));
        assert_eq!(view.raw().len(), 2);
    }

    #[test]
    fn cache_entry_is_rebuilt_after_drop() {
        let target = Target::record();
        drop(reactive(&target));

        let second = reactive(&target);
        assert_eq!(second.raw(), target);
        assert!(second.ptr_eq(&reactive(&target)));
    }
}
