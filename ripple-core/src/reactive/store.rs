//! Dependency Store
//!
//! A two-level map from observed value to property key to the set of
//! effects that read that property during their last run:
//!
//! ```text
//! target#3 ─┬─ "a"       -> { effect#1, effect#4 }
//!           ├─ <iterate> -> { effect#2 }
//!           └─ length    -> { effect#4 }
//! ```
//!
//! The store only holds ids. It does not keep targets or effects alive,
//! and it has no behavior beyond insertion, lookup and removal, plus the
//! pure selection rule that decides which subscribers a mutation reaches.
//! Empty sets and empty per-target maps are removed eagerly so that an
//! unobserved value leaves nothing behind.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};

use super::runtime::TriggerKind;
use super::subscriber::{EffectId, TargetId};
use super::value::Key;

/// Effects subscribed to one `(target, key)` pair, in subscription order.
pub type DepSet = IndexSet<EffectId>;

/// The process-wide dependency store.
#[derive(Debug, Default)]
pub struct DepStore {
    targets: HashMap<TargetId, IndexMap<Key, DepSet>>,
}

impl DepStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `effect` to `(target, key)`.
    ///
    /// Returns `true` if the effect was not already subscribed.
    pub fn subscribe(&mut self, target: TargetId, key: Key, effect: EffectId) -> bool {
        self.targets
            .entry(target)
            .or_default()
            .entry(key)
            .or_default()
            .insert(effect)
    }

    /// Remove `effect` from `(target, key)`, pruning empty entries.
    ///
    /// Returns `true` if the effect was subscribed.
    pub fn unsubscribe(&mut self, target: TargetId, key: &Key, effect: EffectId) -> bool {
        let Some(keys) = self.targets.get_mut(&target) else {
            return false;
        };
        let Some(set) = keys.get_mut(key) else {
            return false;
        };
        let removed = set.shift_remove(&effect);
        if set.is_empty() {
            keys.shift_remove(key);
        }
        if keys.is_empty() {
            self.targets.remove(&target);
        }
        removed
    }

    /// The effects subscribed to `(target, key)`, if any.
    pub fn subscribers(&self, target: TargetId, key: &Key) -> Option<&DepSet> {
        self.targets.get(&target)?.get(key)
    }

    /// Number of effects subscribed to `(target, key)`.
    pub fn subscriber_count(&self, target: TargetId, key: &Key) -> usize {
        self.subscribers(target, key).map_or(0, IndexSet::len)
    }

    /// Whether anything at all observes `target`.
    pub fn is_observed(&self, target: TargetId) -> bool {
        self.targets.contains_key(&target)
    }

    /// Number of observed targets.
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Drop every dependency set of `target`.
    ///
    /// Returns the effects that were subscribed to any of them.
    pub fn forget(&mut self, target: TargetId) -> DepSet {
        self.targets
            .remove(&target)
            .into_iter()
            .flat_map(|keys| keys.into_values())
            .flatten()
            .collect()
    }

    /// Select the effects a mutation of `(target, key)` must re-run.
    ///
    /// The result is a fresh set, so callers can run the effects while
    /// those effects unsubscribe and resubscribe themselves.
    ///
    /// - subscribers of `key` itself;
    /// - for `Add` and `Delete`, subscribers of [`Key::Iterate`];
    /// - for an `Add` at an index, subscribers of [`Key::Length`];
    /// - for a write to [`Key::Length`], subscribers of every index at or
    ///   past `new_length`.
    ///
    /// `exclude` (the effect currently running) is never selected.
    pub fn select(
        &self,
        target: TargetId,
        key: &Key,
        kind: TriggerKind,
        new_length: Option<usize>,
        exclude: Option<EffectId>,
    ) -> DepSet {
        let mut selected = DepSet::new();
        let Some(keys) = self.targets.get(&target) else {
            return selected;
        };

        let mut add = |set: Option<&DepSet>| {
            for effect in set.into_iter().flatten() {
                if Some(*effect) != exclude {
                    selected.insert(*effect);
                }
            }
        };

        add(keys.get(key));

        if matches!(kind, TriggerKind::Add | TriggerKind::Delete) {
            add(keys.get(&Key::Iterate));
        }

        if kind == TriggerKind::Add && matches!(key, Key::Index(_)) {
            add(keys.get(&Key::Length));
        }

        if *key == Key::Length {
            if let Some(new_length) = new_length {
                for (dep_key, set) in keys {
                    if dep_key.as_index().is_some_and(|index| index >= new_length) {
                        add(Some(set));
                    }
                }
            }
        }

        selected
    }
}
