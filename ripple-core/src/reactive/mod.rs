//! Reactive Primitives
//!
//! This module implements the reactive dependency engine: observed values,
//! effects, computed cells, watchers and refs. Everything else in the
//! crate is built on the two runtime operations, *track* and *trigger*.
//!
//! # Concepts
//!
//! ## Observed values
//!
//! A [`Target`] is a raw record or sequence. Wrapping it with [`reactive`]
//! yields a [`Reactive`] view through which every read is tracked and
//! every change is triggered. The view is the only way to observe a target;
//! raw access through the `Target` itself is invisible to the engine.
//!
//! ## Effects
//!
//! An [`Effect`] is a computation that re-runs whenever a value it read
//! during its last run changes. Effects can route re-runs through a
//! scheduler, for instance the batching job queue ([`EffectOptions::batched`]).
//!
//! ## Computed cells
//!
//! A [`Computed`] cell is a lazily evaluated, cached derived value. It is
//! itself observable, so effects and other cells can depend on it.
//!
//! ## Watchers
//!
//! [`watch`] calls a callback with the new and previous value of a source,
//! synchronously or at the next microtask checkpoint ([`drain`]).
//!
//! ## Refs
//!
//! A [`Ref`] is a single observable slot. [`proxy_refs`] gives a view over
//! a record whose refs read and write as plain values.
//!
//! # Implementation Notes
//!
//! The engine is single-threaded. The dependency store, the effect
//! registry, the context stack, the view cache and the job queue are all
//! thread-local, and reactive handles are `!Send`.

mod array;
mod computed;
mod context;
mod effect;
mod proxy;
mod refs;
mod runtime;
mod scheduler;
mod store;
mod subscriber;
mod value;
mod watch;

pub use computed::{computed, Computed};
pub use context::{untracked, ReactiveContext, TrackingGuard};
pub use effect::{effect, Effect, EffectOptions, EffectRef, Scheduler};
pub use proxy::{
    is_reactive, is_readonly, is_shallow, reactive, readonly, shallow_reactive, shallow_readonly,
    to_raw, Access, ProxyMode, Reactive,
};
pub use refs::{is_ref, proxy_refs, to_ref, to_refs, unref, ProxyRefs, Ref};
pub use runtime::{DepKey, Runtime, TriggerKind};
pub use scheduler::{
    drain, flush_jobs, has_pending, pending_jobs, queue_job, queue_microtask, Job, JobKey,
    MAX_FLUSH_PASSES,
};
pub use store::{DepSet, DepStore};
pub use subscriber::{EffectId, TargetId};
pub use value::{Key, Shape, Target, Value, MAX_LENGTH};
pub use watch::{traverse, watch, Flush, OnInvalidate, WatchHandle, WatchOptions, WatchSource};
