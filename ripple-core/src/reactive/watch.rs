//! Watch
//!
//! A watcher runs a callback with the new and previous value of a source
//! whenever the source changes.
//!
//! # How Watchers Work
//!
//! The source is turned into a getter and wrapped in a lazy effect whose
//! scheduler is the watcher's job. The job:
//!
//! 1. runs the invalidation callback registered by the previous callback
//!    invocation, if any;
//! 2. re-runs the getter for the new value;
//! 3. calls the callback with `(new, old, on_invalidate)`.
//!
//! With [`Flush::Post`] the job is queued as a microtask instead of running
//! inside the trigger, so it runs at the next [`drain`](super::drain).
//!
//! Without `immediate`, the getter runs once at setup to capture the
//! initial old value and the callback does not run.
//!
//! # Sources
//!
//! A getter closure is used as is. A [`Reactive`] or structured [`Value`]
//! source is traversed deeply, reading every reachable key, so any nested
//! mutation triggers the watcher. A [`Ref`] source yields its value.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::computed::Computed;
use super::effect::{Effect, EffectOptions};
use super::proxy::{Access, Reactive};
use super::refs::Ref;
use super::scheduler::queue_microtask;
use super::subscriber::TargetId;
use super::value::Value;

/// When a triggered watcher runs its callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flush {
    /// Inside the trigger, synchronously.
    #[default]
    Sync,
    /// At the next microtask checkpoint.
    Post,
}

/// Options accepted by [`watch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    /// Run the callback once at setup, with no old value.
    pub immediate: bool,
    pub flush: Flush,
}

impl WatchOptions {
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn flush(mut self, flush: Flush) -> Self {
        self.flush = flush;
        self
    }
}

/// What a watcher observes.
pub struct WatchSource<T> {
    getter: Box<dyn Fn() -> T>,
}

impl<T> WatchSource<T> {
    /// Watch whatever `getter` returns.
    pub fn getter(getter: impl Fn() -> T + 'static) -> Self {
        Self {
            getter: Box::new(getter),
        }
    }
}

impl From<Reactive> for WatchSource<Value> {
    fn from(source: Reactive) -> Self {
        WatchSource::from(Value::Reactive(source))
    }
}

impl From<Value> for WatchSource<Value> {
    fn from(source: Value) -> Self {
        Self::getter(move || {
            traverse(&source);
            source.clone()
        })
    }
}

impl From<Ref> for WatchSource<Value> {
    fn from(source: Ref) -> Self {
        Self::getter(move || source.get())
    }
}

impl<T: Clone + 'static> From<Computed<T>> for WatchSource<T> {
    fn from(source: Computed<T>) -> Self {
        Self::getter(move || source.get())
    }
}

/// Read every key reachable from `value`, so the running effect depends
/// on all of them. Each target is visited once.
pub fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    visit(value, &mut seen);
}

fn visit(value: &Value, seen: &mut HashSet<TargetId>) {
    match value {
        Value::Reactive(view) => {
            if !seen.insert(view.id()) {
                return;
            }
            for key in view.keys() {
                visit(&view.read(key), seen);
            }
        }
        Value::Ref(r) => visit(&r.get(), seen),
        _ => {}
    }
}

type Cleanup = Box<dyn FnOnce()>;

/// Lets a callback register cleanup for work it started.
///
/// The registered function runs before the next callback invocation and
/// when the watcher stops, so a callback can tell that its result went
/// stale.
#[derive(Clone, Default)]
pub struct OnInvalidate {
    slot: Rc<RefCell<Option<Cleanup>>>,
}

impl OnInvalidate {
    /// Register `cleanup`, replacing any previous registration.
    pub fn register(&self, cleanup: impl FnOnce() + 'static) {
        *self.slot.borrow_mut() = Some(Box::new(cleanup));
    }

    fn run(&self) {
        let cleanup = self.slot.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
}

impl fmt::Debug for OnInvalidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self.slot.try_borrow().map(|slot| slot.is_some()).ok();
        f.debug_struct("OnInvalidate")
            .field("pending", &pending)
            .finish()
    }
}

type Callback<T> = Box<dyn Fn(&T, Option<&T>, &OnInvalidate)>;

struct WatchInner<T> {
    effect: Effect<T>,
    callback: Callback<T>,
    old: RefCell<Option<T>>,
    on_invalidate: OnInvalidate,
}

impl<T: Clone + 'static> WatchInner<T> {
    fn job(&self) {
        if !self.effect.is_active() {
            return;
        }
        self.on_invalidate.run();
        let new = self.effect.run();
        // Swapped before the callback, so a callback that re-triggers the
        // watcher sees this value as old.
        let old = self.old.replace(Some(new.clone()));
        (self.callback)(&new, old.as_ref(), &self.on_invalidate);
    }

    fn schedule(self: &Rc<Self>, flush: Flush) {
        match flush {
            Flush::Sync => self.job(),
            Flush::Post => {
                let weak = Rc::downgrade(self);
                queue_microtask(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.job();
                    }
                });
            }
        }
    }
}

trait Watcher {
    fn stop(&self);
    fn is_active(&self) -> bool;
}

impl<T> Watcher for WatchInner<T> {
    fn stop(&self) {
        if self.effect.is_active() {
            self.effect.stop();
            self.on_invalidate.run();
            debug!(effect = %self.effect.id(), "watch stopped");
        }
    }

    fn is_active(&self) -> bool {
        self.effect.is_active()
    }
}

/// Handle to a running watcher. Dropping it stops the watcher.
#[must_use = "the watcher stops as soon as the handle is dropped"]
pub struct WatchHandle {
    inner: Rc<dyn Watcher>,
}

impl WatchHandle {
    /// Stop watching. Runs any pending invalidation callback.
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Call `callback` with `(new, old, on_invalidate)` whenever `source`
/// changes.
pub fn watch<T, S, F>(source: S, callback: F, options: WatchOptions) -> WatchHandle
where
    T: Clone + 'static,
    S: Into<WatchSource<T>>,
    F: Fn(&T, Option<&T>, &OnInvalidate) + 'static,
{
    let getter = source.into().getter;
    let flush = options.flush;

    let inner = Rc::new_cyclic(|weak: &Weak<WatchInner<T>>| {
        let weak = weak.clone();
        let effect_options = EffectOptions::default().lazy().scheduler(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.schedule(flush);
            }
        });
        WatchInner {
            effect: Effect::with_options(getter, effect_options),
            callback: Box::new(callback),
            old: RefCell::new(None),
            on_invalidate: OnInvalidate::default(),
        }
    });

    debug!(effect = %inner.effect.id(), ?options, "watch created");

    if options.immediate {
        inner.job();
    } else {
        *inner.old.borrow_mut() = Some(inner.effect.run());
    }

    WatchHandle { inner }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
