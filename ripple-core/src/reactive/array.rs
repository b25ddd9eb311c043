//! Sequence Instrumentation
//!
//! Methods on [`Reactive`] that need more than the plain traps when the
//! view is over a sequence.
//!
//! # Membership
//!
//! [`Reactive::includes`], [`Reactive::index_of`] and
//! [`Reactive::last_index_of`] compare against the elements as read
//! through the view, which wraps nested values. A caller holding the raw
//! target of an element would never find it that way, so a miss is
//! retried against the raw elements with the raw needle.
//!
//! # Mutation
//!
//! [`push`](Reactive::push), [`pop`](Reactive::pop),
//! [`shift`](Reactive::shift), [`unshift`](Reactive::unshift) and
//! [`splice`](Reactive::splice) read the length and the elements they are
//! about to move. Those reads run with tracking paused, otherwise two
//! effects pushing onto the same sequence would each depend on its length
//! and keep re-running each other. The moves themselves go through the
//! instrumented `write` and `delete`, so subscribers hear every change.

use super::context::ReactiveContext;
use super::proxy::{Access, Reactive};
use super::value::{Key, Value};

impl Reactive {
    /// Read every element through the view, tracking each index.
    fn tracked_items(&self) -> Vec<Value> {
        let len = self.len();
        (0..len).map(|index| self.read(index)).collect()
    }

    fn search(
        &self,
        needle: Value,
        matches: fn(&Value, &Value) -> bool,
        from_end: bool,
    ) -> Option<usize> {
        let find = |items: &[Value], needle: &Value| {
            if from_end {
                items.iter().rposition(|item| matches(item, needle))
            } else {
                items.iter().position(|item| matches(item, needle))
            }
        };

        let items = self.tracked_items();
        find(&items, &needle).or_else(|| find(&self.target().items(), &needle.into_raw()))
    }

    /// Whether the sequence contains `needle`. `NaN` is found.
    pub fn includes(&self, needle: impl Into<Value>) -> bool {
        self.search(needle.into(), Value::same_value, false)
            .is_some()
    }

    /// Position of the first element equal to `needle`.
    pub fn index_of(&self, needle: impl Into<Value>) -> Option<usize> {
        self.search(needle.into(), |a, b| a == b, false)
    }

    /// Position of the last element equal to `needle`.
    pub fn last_index_of(&self, needle: impl Into<Value>) -> Option<usize> {
        self.search(needle.into(), |a, b| a == b, true)
    }

    /// Append `item`, returning the length afterwards.
    pub fn push(&self, item: impl Into<Value>) -> usize {
        let _pause = ReactiveContext::pause_tracking();
        let len = self.target().len();
        self.write(len, item);
        self.target().len()
    }

    /// Remove and return the last element. `Null` if empty.
    pub fn pop(&self) -> Value {
        let _pause = ReactiveContext::pause_tracking();
        let len = self.target().len();
        if len == 0 {
            return Value::Null;
        }
        let last = self.read(len - 1);
        self.write(Key::Length, len - 1);
        last
    }

    /// Remove and return the first element. `Null` if empty.
    pub fn shift(&self) -> Value {
        let _pause = ReactiveContext::pause_tracking();
        let len = self.target().len();
        if len == 0 {
            return Value::Null;
        }
        let first = self.read(0);
        for index in 1..len {
            self.write(index - 1, self.read(index));
        }
        self.delete(len - 1);
        self.write(Key::Length, len - 1);
        first
    }

    /// Insert `item` at the front, returning the length afterwards.
    pub fn unshift(&self, item: impl Into<Value>) -> usize {
        let _pause = ReactiveContext::pause_tracking();
        let len = self.target().len();
        for index in (1..=len).rev() {
            self.write(index, self.read(index - 1));
        }
        self.write(0, item);
        self.target().len()
    }

    /// Remove `delete_count` elements starting at `start` and insert
    /// `items` in their place. Returns the removed elements.
    ///
    /// `start` and `delete_count` are clamped to the sequence.
    pub fn splice(&self, start: usize, delete_count: usize, items: Vec<Value>) -> Vec<Value> {
        let _pause = ReactiveContext::pause_tracking();
        let len = self.target().len();
        let start = start.min(len);
        let delete_count = delete_count.min(len - start);
        let insert_count = items.len();

        let removed: Vec<Value> = (start..start + delete_count)
            .map(|index| self.read(index))
            .collect();

        if insert_count < delete_count {
            for index in start..len - delete_count {
                self.write(index + insert_count, self.read(index + delete_count));
            }
            for index in (len - delete_count + insert_count..len).rev() {
                self.delete(index);
            }
        } else if insert_count > delete_count {
            for index in (start..len - delete_count).rev() {
                self.write(index + insert_count, self.read(index + delete_count));
            }
        }

        for (offset, item) in items.into_iter().enumerate() {
            self.write(start + offset, item);
        }
        self.write(Key::Length, len - delete_count + insert_count);

        removed
    }
}
