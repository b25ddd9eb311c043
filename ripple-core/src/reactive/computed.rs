//! Computed Implementation
//!
//! A Computed cell is a cached derived value that re-evaluates only when
//! the values it read change.
//!
//! # How Computed Cells Work
//!
//! 1. The getter is wrapped in a lazy effect. Nothing runs at creation.
//!
//! 2. On first access the effect runs, the result is cached and the cell
//!    becomes clean.
//!
//! 3. When a dependency changes, the effect's scheduler only marks the
//!    cell dirty. The getter does not run.
//!
//! 4. On next access a dirty cell re-runs the getter. A clean cell returns
//!    its cache.
//!
//! A cell is itself observable: reading it tracks the cell's own `value`
//! key, and becoming dirty triggers that key, so an effect reading a
//! computed cell re-runs when the cell's inputs change. The notification
//! is only sent on the clean-to-dirty transition; a cell that is already
//! dirty has nothing new to report.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use super::effect::{Effect, EffectOptions};
use super::runtime::{Runtime, TriggerKind};
use super::subscriber::TargetId;
use super::value::Key;

fn value_key() -> Key {
    Key::field("value")
}

struct ComputedInner<T> {
    /// Identity under which readers subscribe to this cell.
    id: TargetId,
    dirty: Cell<bool>,
    cached: RefCell<Option<T>>,
    effect: Effect<T>,
}

impl<T> ComputedInner<T> {
    fn invalidate(&self) {
        if !self.dirty.replace(true) {
            trace!(target_id = %self.id, "computed invalidated");
            Runtime::trigger(self.id, &value_key(), TriggerKind::Update, None);
        }
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        self.effect.stop();
        Runtime::forget_target(self.id);
    }
}

/// A lazily evaluated, memoized derived value.
///
/// # Example
///
/// ```rust,ignore
/// let state = reactive(Target::from_fields([("a", 1)]));
/// let state_clone = state.clone();
/// let double = Computed::new(move || state_clone.read("a").as_f64().unwrap_or(0.0) * 2.0);
///
/// assert_eq!(double.get(), 2.0);
/// state.write("a", 3);
/// assert_eq!(double.get(), 6.0);
/// ```
pub struct Computed<T> {
    inner: Rc<ComputedInner<T>>,
}

impl<T: Clone + 'static> Computed<T> {
    /// Create a new computed cell. The getter does not run until the
    /// first [`get`](Self::get).
    pub fn new(getter: impl Fn() -> T + 'static) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<ComputedInner<T>>| {
            let weak = weak.clone();
            let options = EffectOptions::default().lazy().scheduler(move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.invalidate();
                }
            });
            ComputedInner {
                id: TargetId::new(),
                dirty: Cell::new(true),
                cached: RefCell::new(None),
                effect: Effect::with_options(getter, options),
            }
        });
        Self { inner }
    }

    /// Get the current value, recomputing it first if it is dirty.
    ///
    /// When called within a reactive context, the running effect becomes
    /// a dependent of this cell.
    pub fn get(&self) -> T {
        let inner = &self.inner;
        let cached = if inner.dirty.get() {
            None
        } else {
            inner.cached.borrow().clone()
        };

        let value = match cached {
            Some(value) => value,
            None => {
                let value = inner.effect.run();
                inner.dirty.set(false);
                *inner.cached.borrow_mut() = Some(value.clone());
                value
            }
        };

        Runtime::track(inner.id, value_key());
        value
    }

    /// Whether the next [`get`](Self::get) recomputes.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    /// Identity readers subscribe to.
    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    /// Get the number of times the getter has run.
    pub fn compute_count(&self) -> usize {
        self.inner.effect.run_count()
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("dirty", &self.inner.dirty.get())
            .field("cached", &self.inner.cached.try_borrow().ok())
            .finish()
    }
}

/// Create a computed cell. Shorthand for [`Computed::new`].
pub fn computed<T: Clone + 'static>(getter: impl Fn() -> T + 'static) -> Computed<T> {
    Computed::new(getter)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
