//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects observed values
//! and effects. It owns the dependency store and the effect registry, and
//! implements the two operations everything else is built on:
//!
//! - [`Runtime::track`] records that the running effect read
//!   `(target, key)`.
//! - [`Runtime::trigger`] selects the effects affected by a mutation of
//!   `(target, key)` and re-runs them, either directly or through their
//!   scheduler.
//!
//! # Ownership
//!
//! The store holds effect ids only. The registry maps those ids to the
//! effects themselves and keeps an effect alive exactly as long as it is
//! subscribed to at least one dependency set, so an effect nobody holds a
//! handle to keeps reacting until it is stopped or everything it read is
//! gone.
//!
//! # Thread Safety
//!
//! All state is thread-local. Reactivity never crosses threads.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::trace;

use super::context::ReactiveContext;
use super::effect::{EffectCore, EffectRef, Reaction};
use super::store::DepStore;
use super::subscriber::{EffectId, TargetId};
use super::value::Key;

/// Classification of a write, deciding which extra subscribers hear it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    /// An existing key changed value.
    Update,
    /// A new key appeared (or an index at or past the end was written).
    Add,
    /// An existing key was removed.
    Delete,
}

/// One `(target, key)` pair an effect is subscribed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DepKey {
    pub target: TargetId,
    pub key: Key,
}

#[derive(Default)]
struct RuntimeState {
    store: DepStore,
    registry: HashMap<EffectId, Rc<dyn Reaction>>,
}

thread_local! {
    static RUNTIME: RefCell<RuntimeState> = RefCell::new(RuntimeState::default());
}

fn with_state<R>(f: impl FnOnce(&mut RuntimeState) -> R) -> R {
    RUNTIME.with(|state| f(&mut state.borrow_mut()))
}

/// Like `with_state`, but gives up instead of panicking when the state is
/// busy or already torn down. Used from `Drop` paths.
fn try_with_state<R>(f: impl FnOnce(&mut RuntimeState) -> R) -> Option<R> {
    RUNTIME
        .try_with(|state| state.try_borrow_mut().ok().map(|mut state| f(&mut state)))
        .ok()
        .flatten()
}

/// The thread-local reactive runtime.
pub struct Runtime;

impl Runtime {
    /// Record that the running effect read `(target, key)`.
    ///
    /// A no-op when no effect is running, when tracking is paused, or when
    /// `key` is not trackable.
    pub fn track(target: TargetId, key: Key) {
        if !key.is_trackable() || !ReactiveContext::should_track() {
            return;
        }
        let Some(effect) = ReactiveContext::current() else {
            return;
        };
        let core = effect.core();
        if !core.is_active() {
            return;
        }

        let id = core.id();
        let inserted = with_state(|state| {
            let inserted = state.store.subscribe(target, key.clone(), id);
            if inserted {
                state.registry.entry(id).or_insert_with(|| effect.clone());
            }
            inserted
        });

        if inserted {
            trace!(effect = %id, target_id = %target, key = %key, "track");
            core.push_dep(DepKey { target, key });
        }
    }

    /// Re-run every effect affected by a mutation of `(target, key)`.
    ///
    /// `new_length` is only meaningful for writes to [`Key::Length`]. The
    /// effect currently running is never re-run by its own writes.
    pub fn trigger(target: TargetId, key: &Key, kind: TriggerKind, new_length: Option<usize>) {
        let exclude = ReactiveContext::current_effect_id();
        let to_run: Vec<Rc<dyn Reaction>> = with_state(|state| {
            state
                .store
                .select(target, key, kind, new_length, exclude)
                .into_iter()
                .filter_map(|id| state.registry.get(&id).cloned())
                .collect()
        });

        if to_run.is_empty() {
            return;
        }

        trace!(target_id = %target, key = %key, ?kind, effects = to_run.len(), "trigger");
        for effect in to_run {
            notify(effect);
        }
    }

    /// Remove an effect from every dependency set it belongs to.
    pub(crate) fn cleanup(core: &EffectCore) {
        let deps = core.take_deps();
        let released = try_with_state(|state| {
            for dep in &deps {
                state.store.unsubscribe(dep.target, &dep.key, core.id());
            }
            state.registry.remove(&core.id())
        });
        // Dropped here, outside the borrow.
        drop(released);
    }

    /// Forget every dependency set of a target that no longer exists.
    ///
    /// Effects left without any subscription are released from the
    /// registry.
    pub(crate) fn forget_target(target: TargetId) {
        let released = try_with_state(|state| {
            let affected = state.store.forget(target);
            let mut released = Vec::new();
            for id in affected {
                let orphaned = state.registry.get(&id).is_some_and(|effect| {
                    effect.core().retain_deps(|dep| dep.target != target);
                    effect.core().dep_count() == 0
                });
                if orphaned {
                    released.extend(state.registry.remove(&id));
                }
            }
            released
        });
        drop(released);
    }

    /// Number of effects subscribed to `(target, key)`.
    pub fn subscriber_count(target: TargetId, key: &Key) -> usize {
        with_state(|state| state.store.subscriber_count(target, key))
    }

    /// Whether any effect observes `target`.
    pub fn is_observed(target: TargetId) -> bool {
        with_state(|state| state.store.is_observed(target))
    }

    /// Number of effects currently kept alive by their subscriptions.
    pub fn registered_effects() -> usize {
        with_state(|state| state.registry.len())
    }

    /// Get the id of the effect currently being tracked, if any.
    pub fn current_effect() -> Option<EffectId> {
        ReactiveContext::current_effect_id()
    }

    /// Check if reads are currently being recorded.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active() && ReactiveContext::should_track()
    }
}

/// Hand a triggered effect to its scheduler, or run it right away.
///
/// An effect that is already running further up the stack is not
/// re-entered; it runs again once its current run returns.
fn notify(effect: Rc<dyn Reaction>) {
    let core = effect.core();
    if !core.is_active() {
        return;
    }
    let id = core.id();
    let running = core.is_running();
    match core.scheduler().cloned() {
        Some(scheduler) => scheduler(EffectRef::new(effect)),
        None if running => {
            trace!(effect = %id, "deferring re-entrant run");
            core.request_rerun();
        }
        None => effect.execute(),
    }
}
