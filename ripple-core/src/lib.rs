//! Ripple Core
//!
//! This crate provides a fine-grained reactive dependency engine. It
//! records which computations read which pieces of mutable state and
//! re-runs exactly the affected computations when that state changes.
//! It implements:
//!
//! - Observed records and sequences with reactive, shallow and readonly views
//! - Effects with pluggable schedulers and a batching job queue
//! - Lazily evaluated computed cells
//! - Watchers with synchronous or deferred flush and stale-result invalidation
//! - Refs and ref-unwrapping views
//!
//! Renderers, template compilers and component systems are expected to be
//! built on top of this crate; none of them live here.
//!
//! # Architecture
//!
//! - `reactive`: the engine itself (values, track/trigger, effects and
//!   everything built on them)
//! - `error`: the crate error type
//!
//! # Example
//!
//! ```rust
//! use ripple_core::reactive::{computed, reactive, Access, Effect, Target};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let state = reactive(Target::from_fields([("a", 1)]));
//!
//! // Create an effect
//! let seen = Rc::new(Cell::new(0.0));
//! let (state_clone, seen_clone) = (state.clone(), seen.clone());
//! let _effect = Effect::new(move || {
//!     seen_clone.set(state_clone.read("a").as_f64().unwrap_or_default());
//! });
//!
//! // Create a derived value
//! let state_clone = state.clone();
//! let doubled = computed(move || state_clone.read("a").as_f64().unwrap_or_default() * 2.0);
//!
//! // Update the state
//! state.write("a", 3);
//! // Effect automatically ran
//! assert_eq!(seen.get(), 3.0);
//! assert_eq!(doubled.get(), 6.0);
//! ```

pub mod error;
pub mod reactive;

pub use error::{ReactiveError, Result};
