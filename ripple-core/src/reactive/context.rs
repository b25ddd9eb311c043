//! Reactive Context
//!
//! The reactive context tracks which effect is currently running.
//! This enables automatic dependency tracking: when a property is read,
//! we can register the current effect as a subscriber.
//!
//! # Implementation
//!
//! We use a thread-local stack to track the currently executing effect.
//! When entering an effect we push it onto the stack; when the body
//! completes the guard pops it again, which restores the enclosing effect
//! even if the body panicked.
//!
//! The context also owns the "should track" flag. Sequence mutators turn
//! tracking off while they read the length and elements they are about
//! to rewrite, otherwise two effects pushing onto the same sequence would
//! keep re-triggering each other. Entering an effect turns tracking back
//! on for the duration of its body.

use std::cell::RefCell;
use std::rc::Rc;

use super::effect::Reaction;
use super::subscriber::EffectId;

thread_local! {
    static CONTEXT: RefCell<ContextState> = RefCell::new(ContextState {
        stack: Vec::new(),
        should_track: true,
    });
}

struct ContextState {
    stack: Vec<ContextEntry>,
    should_track: bool,
}

/// An entry in the reactive context stack.
struct ContextEntry {
    effect: Rc<dyn Reaction>,
    /// Tracking flag of the enclosing frame, restored on exit.
    saved_should_track: bool,
}

/// Guard that pops the context when dropped.
///
/// This ensures the context stack is properly maintained even if
/// the effect body panics.
pub struct ReactiveContext {
    effect_id: EffectId,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given effect.
    ///
    /// While this context is active, any tracked read registers the effect
    /// as a subscriber. The context is exited when the guard is dropped.
    pub(crate) fn enter(effect: Rc<dyn Reaction>) -> Self {
        let effect_id = effect.core().id();
        CONTEXT.with(|ctx| {
            let mut ctx = ctx.borrow_mut();
            let saved_should_track = ctx.should_track;
            ctx.should_track = true;
            ctx.stack.push(ContextEntry {
                effect,
                saved_should_track,
            });
        });

        Self { effect_id }
    }

    /// Check if there is an active reactive context.
    pub fn is_active() -> bool {
        CONTEXT.with(|ctx| !ctx.borrow().stack.is_empty())
    }

    /// Get the id of the currently running effect, if any.
    pub fn current_effect_id() -> Option<EffectId> {
        CONTEXT.with(|ctx| {
            ctx.borrow()
                .stack
                .last()
                .map(|entry| entry.effect.core().id())
        })
    }

    /// The currently running effect, if any.
    pub(crate) fn current() -> Option<Rc<dyn Reaction>> {
        CONTEXT.with(|ctx| ctx.borrow().stack.last().map(|entry| entry.effect.clone()))
    }

    /// Number of nested effects currently running.
    pub fn depth() -> usize {
        CONTEXT.with(|ctx| ctx.borrow().stack.len())
    }

    /// Whether reads are currently being recorded.
    pub fn should_track() -> bool {
        CONTEXT.with(|ctx| ctx.borrow().should_track)
    }

    /// Suppress tracking until the returned guard is dropped.
    pub fn pause_tracking() -> TrackingGuard {
        let saved = CONTEXT.with(|ctx| {
            let mut ctx = ctx.borrow_mut();
            std::mem::replace(&mut ctx.should_track, false)
        });
        TrackingGuard { saved }
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        let popped = CONTEXT
            .try_with(|ctx| {
                let mut ctx = ctx.borrow_mut();
                let entry = ctx.stack.pop()?;
                ctx.should_track = entry.saved_should_track;
                Some(entry)
            })
            .ok()
            .flatten();

        // Verify we're popping the right context. The entry itself is
        // dropped here, outside the borrow, since it may own the effect.
        if let Some(entry) = popped {
            debug_assert_eq!(
                entry.effect.core().id(),
                self.effect_id,
                "ReactiveContext mismatch"
            );
        }
    }
}

/// Restores the previous tracking flag when dropped.
#[must_use = "tracking resumes as soon as the guard is dropped"]
pub struct TrackingGuard {
    saved: bool,
}

impl Drop for TrackingGuard {
    fn drop(&mut self) {
        let _ = CONTEXT.try_with(|ctx| ctx.borrow_mut().should_track = self.saved);
    }
}

/// Run `f` without recording any dependency.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _pause = ReactiveContext::pause_tracking();
    f()
}
