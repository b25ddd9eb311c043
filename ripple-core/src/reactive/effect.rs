//! Effect Implementation
//!
//! An Effect is a re-runnable computation that runs whenever the observed
//! values it read during its last run change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its body immediately to establish
//!    initial dependencies (unless it was created lazy).
//!
//! 2. Before every run the effect removes itself from every dependency set
//!    it belongs to. The body then re-subscribes it to whatever it reads
//!    this time, so a branch that is no longer taken leaves nothing behind.
//!
//! 3. When a dependency changes, the effect is handed to its scheduler if
//!    it has one, otherwise it re-runs synchronously.
//!
//! # Differences from Computed
//!
//! - Computed cells cache their result; effects just run their body.
//! - Computed cells are lazy (compute on access); effects are eager.
//! - A computed cell is itself observable, an effect is not.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::{debug, trace};

use super::context::ReactiveContext;
use super::runtime::{DepKey, Runtime};
use super::scheduler::queue_job;
use super::subscriber::EffectId;

/// Decides when a triggered effect actually re-runs.
pub type Scheduler = Rc<dyn Fn(EffectRef)>;

/// Options accepted by [`Effect::with_options`].
#[derive(Clone, Default)]
pub struct EffectOptions {
    /// Do not run the body at creation.
    pub lazy: bool,
    /// Called with the effect instead of re-running it on trigger.
    pub scheduler: Option<Scheduler>,
}

impl EffectOptions {
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn scheduler(mut self, scheduler: impl Fn(EffectRef) + 'static) -> Self {
        self.scheduler = Some(Rc::new(scheduler));
        self
    }

    /// Re-run through the job queue, once per flush.
    pub fn batched() -> Self {
        Self::default().scheduler(|effect| queue_job(effect))
    }
}

impl fmt::Debug for EffectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectOptions")
            .field("lazy", &self.lazy)
            .field("scheduler", &self.scheduler.is_some())
            .finish()
    }
}

/// State shared by every kind of effect, whatever its body returns.
pub(crate) struct EffectCore {
    id: EffectId,
    deps: RefCell<SmallVec<[DepKey; 4]>>,
    scheduler: Option<Scheduler>,
    active: Cell<bool>,
    running: Cell<bool>,
    rerun: Cell<bool>,
    runs: Cell<usize>,
}

impl EffectCore {
    fn new(scheduler: Option<Scheduler>) -> Self {
        Self {
            id: EffectId::new(),
            deps: RefCell::new(SmallVec::new()),
            scheduler,
            active: Cell::new(true),
            running: Cell::new(false),
            rerun: Cell::new(false),
            runs: Cell::new(0),
        }
    }

    pub fn id(&self) -> EffectId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Whether the body is currently on the stack.
    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Ask the running frame to run the body again once it returns.
    pub fn request_rerun(&self) {
        self.rerun.set(true);
    }

    pub fn scheduler(&self) -> Option<&Scheduler> {
        self.scheduler.as_ref()
    }

    pub fn push_dep(&self, dep: DepKey) {
        self.deps.borrow_mut().push(dep);
    }

    pub fn take_deps(&self) -> SmallVec<[DepKey; 4]> {
        std::mem::take(&mut *self.deps.borrow_mut())
    }

    pub fn deps(&self) -> Vec<DepKey> {
        self.deps.borrow().to_vec()
    }

    pub fn retain_deps(&self, mut keep: impl FnMut(&DepKey) -> bool) {
        self.deps.borrow_mut().retain(|dep| keep(dep));
    }

    pub fn dep_count(&self) -> usize {
        self.deps.borrow().len()
    }
}

/// Type-erased view of an effect, as stored by the runtime.
pub(crate) trait Reaction {
    fn core(&self) -> &EffectCore;

    /// Run the body, discarding its result.
    fn execute(self: Rc<Self>);
}

struct EffectInner<T> {
    core: EffectCore,
    body: Box<dyn Fn() -> T>,
}

/// Marks an effect as running for the lifetime of the guard.
struct RunningGuard<'a> {
    flag: &'a Cell<bool>,
    saved: bool,
}

impl<'a> RunningGuard<'a> {
    fn new(flag: &'a Cell<bool>) -> Self {
        let saved = flag.replace(true);
        Self { flag, saved }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(self.saved);
    }
}

impl<T: 'static> EffectInner<T> {
    fn run(self: &Rc<Self>) -> T {
        // A stopped effect still runs its body, but records nothing.
        if !self.core.is_active() {
            return (self.body)();
        }

        loop {
            let result = self.run_once();
            // Only the outermost frame of this effect replays a pending run.
            let replay = !self.core.is_running() && self.core.rerun.replace(false);
            if !replay || !self.core.is_active() {
                return result;
            }
            trace!(effect = %self.core.id(), "re-running after a nested write");
        }
    }

    fn run_once(self: &Rc<Self>) -> T {
        Runtime::cleanup(&self.core);

        let _ctx = ReactiveContext::enter(self.clone());
        let _running = RunningGuard::new(&self.core.running);
        self.core.runs.set(self.core.runs.get() + 1);

        (self.body)()
    }
}

impl<T: 'static> Reaction for EffectInner<T> {
    fn core(&self) -> &EffectCore {
        &self.core
    }

    fn execute(self: Rc<Self>) {
        self.run();
    }
}

/// A computation that re-runs when the values it read change.
///
/// # Example
///
/// ```rust,ignore
/// let state = reactive(Target::from_fields([("count", 0)]));
///
/// let state_clone = state.clone();
/// let effect = Effect::new(move || {
///     println!("Count is: {:?}", state_clone.read("count"));
/// });
///
/// state.write("count", 5); // Prints: "Count is: Number(5.0)"
/// ```
pub struct Effect<T = ()> {
    inner: Rc<EffectInner<T>>,
}

impl<T: 'static> Effect<T> {
    /// Create an effect and run it immediately.
    pub fn new(body: impl Fn() -> T + 'static) -> Self {
        Self::with_options(body, EffectOptions::default())
    }

    /// Create an effect with explicit options.
    pub fn with_options(body: impl Fn() -> T + 'static, options: EffectOptions) -> Self {
        let effect = Self {
            inner: Rc::new(EffectInner {
                core: EffectCore::new(options.scheduler),
                body: Box::new(body),
            }),
        };

        debug!(effect = %effect.id(), lazy = options.lazy, "effect created");

        if !options.lazy {
            effect.run();
        }
        effect
    }

    /// Run the body now, re-collecting dependencies, and return its result.
    pub fn run(&self) -> T {
        self.inner.run()
    }

    /// A type-erased handle, as passed to schedulers.
    pub fn effect_ref(&self) -> EffectRef {
        EffectRef::new(self.reaction())
    }

    pub(crate) fn reaction(&self) -> Rc<dyn Reaction> {
        self.inner.clone()
    }
}

impl<T> Effect<T> {
    /// Unsubscribe from every dependency set. The effect is never
    /// triggered again.
    pub fn stop(&self) {
        if self.inner.core.active.replace(false) {
            Runtime::cleanup(&self.inner.core);
            debug!(effect = %self.id(), "effect stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.core.is_active()
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> EffectId {
        self.inner.core.id()
    }

    /// The `(target, key)` pairs read during the last run.
    pub fn deps(&self) -> Vec<DepKey> {
        self.inner.core.deps()
    }

    /// Get the number of times the body ran while the effect was active.
    pub fn run_count(&self) -> usize {
        self.inner.core.runs.get()
    }
}

impl<T> Clone for Effect<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Effect<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = &self.inner.core;
        f.debug_struct("Effect")
            .field("id", &core.id)
            .field("run_count", &core.runs.get())
            .field("dependency_count", &core.deps.try_borrow().map(|d| d.len()).ok())
            .field("active", &core.active.get())
            .finish()
    }
}

/// Create an effect. Shorthand for [`Effect::with_options`].
pub fn effect<T: 'static>(body: impl Fn() -> T + 'static, options: EffectOptions) -> Effect<T> {
    Effect::with_options(body, options)
}

/// A type-erased effect handle, as handed to schedulers.
#[derive(Clone)]
pub struct EffectRef(Rc<dyn Reaction>);

impl EffectRef {
    pub(crate) fn new(reaction: Rc<dyn Reaction>) -> Self {
        Self(reaction)
    }

    /// Re-run the effect now.
    pub fn run(&self) {
        self.0.clone().execute();
    }

    pub fn id(&self) -> EffectId {
        self.0.core().id()
    }

    pub fn is_active(&self) -> bool {
        self.0.core().is_active()
    }
}

impl fmt::Debug for EffectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EffectRef").field(&self.id()).finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
