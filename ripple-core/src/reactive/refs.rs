//! Refs
//!
//! A [`Ref`] is a single observable slot with `get` and `set`. There are
//! two kinds:
//!
//! - a cell made by [`Ref::new`], backed by a one-field reactive record;
//! - a property ref made by [`to_ref`], delegating to one key of an
//!   existing reactive view, so the property can be handed around without
//!   losing reactivity.
//!
//! Refs are a variant of [`Value`], not a marker stamped on a record, so
//! [`proxy_refs`] decides whether to unwrap by matching on the variant.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::context::untracked;
use super::proxy::{reactive, Access, Reactive};
use super::value::{Key, Target, Value};
use crate::error::{ReactiveError, Result};

enum RefKind {
    Cell(Reactive),
    Property { source: Reactive, key: Key },
}

/// A single observable value.
#[derive(Clone)]
pub struct Ref(Rc<RefKind>);

impl Ref {
    /// Create a ref holding `value`.
    pub fn new(value: impl Into<Value>) -> Self {
        let cell = reactive(Target::from_fields([("value", value.into())]));
        Self(Rc::new(RefKind::Cell(cell)))
    }

    /// Read the value, tracked.
    pub fn get(&self) -> Value {
        match &*self.0 {
            RefKind::Cell(cell) => cell.read("value"),
            RefKind::Property { source, key } => source.read(key),
        }
    }

    /// Read the value without recording a dependency.
    pub fn get_untracked(&self) -> Value {
        untracked(|| self.get())
    }

    pub fn set(&self, value: impl Into<Value>) {
        match &*self.0 {
            RefKind::Cell(cell) => cell.write("value", value),
            RefKind::Property { source, key } => source.write(key, value),
        };
    }

    /// Whether both handles are the same ref.
    pub fn ptr_eq(&self, other: &Ref) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Ref {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            RefKind::Cell(cell) => f.debug_tuple("Ref").field(&cell.id()).finish(),
            RefKind::Property { source, key } => f
                .debug_struct("Ref")
                .field("source", &source.id())
                .field("key", key)
                .finish(),
        }
    }
}

/// A ref reading and writing `source[key]`.
pub fn to_ref(source: &Reactive, key: impl Into<Key>) -> Ref {
    Ref(Rc::new(RefKind::Property {
        source: source.clone(),
        key: key.into(),
    }))
}

/// A property ref for every key of `source`, in enumeration order.
pub fn to_refs(source: &Reactive) -> IndexMap<Key, Ref> {
    source
        .keys()
        .into_iter()
        .map(|key| {
            let r = to_ref(source, &key);
            (key, r)
        })
        .collect()
}

pub fn is_ref(value: &Value) -> bool {
    matches!(value, Value::Ref(_))
}

/// The ref's value for refs, the value itself otherwise.
pub fn unref(value: Value) -> Value {
    match value {
        Value::Ref(r) => r.get(),
        other => other,
    }
}

#[derive(Debug, Clone)]
enum Source {
    Raw(Target),
    View(Reactive),
}

impl Source {
    fn read(&self, key: &Key) -> Value {
        match self {
            Source::Raw(target) => target.read(key),
            Source::View(view) => view.read(key),
        }
    }

    fn write(&self, key: &Key, value: Value) -> bool {
        match self {
            Source::Raw(target) => target.write(key, value),
            Source::View(view) => view.write(key, value),
        }
    }
}

/// A view that unwraps refs on read and assigns through them on write.
#[derive(Debug, Clone)]
pub struct ProxyRefs {
    source: Source,
}

/// Wrap a raw target or a reactive view so its refs read as plain values.
pub fn proxy_refs(source: impl Into<Value>) -> Result<ProxyRefs> {
    let source = match source.into() {
        Value::Object(target) => Source::Raw(target),
        Value::Reactive(view) => Source::View(view),
        other => {
            return Err(ReactiveError::NotStructured {
                kind: other.kind_name(),
            })
        }
    };
    Ok(ProxyRefs { source })
}

impl ProxyRefs {
    /// The wrapped target or view.
    pub fn source(&self) -> Value {
        match &self.source {
            Source::Raw(target) => Value::Object(target.clone()),
            Source::View(view) => Value::Reactive(view.clone()),
        }
    }
}

impl Access for ProxyRefs {
    fn read(&self, key: impl Into<Key>) -> Value {
        unref(self.source.read(&key.into()))
    }

    /// Assigning a plain value to a key holding a ref sets the ref.
    /// Assigning a ref replaces whatever was there.
    fn write(&self, key: impl Into<Key>, value: impl Into<Value>) -> bool {
        let key = key.into();
        let value = value.into();
        let assign_through = !is_ref(&value);
        match untracked(|| self.source.read(&key)) {
            Value::Ref(existing) if assign_through => {
                existing.set(value);
                true
            }
            _ => self.source.write(&key, value),
        }
    }

    fn has(&self, key: impl Into<Key>) -> bool {
        match &self.source {
            Source::Raw(target) => target.has(key),
            Source::View(view) => view.has(key),
        }
    }

    fn keys(&self) -> Vec<Key> {
        match &self.source {
            Source::Raw(target) => target.keys(),
            Source::View(view) => view.keys(),
        }
    }

    fn delete(&self, key: impl Into<Key>) -> bool {
        match &self.source {
            Source::Raw(target) => target.delete(key),
            Source::View(view) => view.delete(key),
        }
    }
}
