//! Completion signals
//!
//! A launched transfer reports back through two hooks: an [`Event`] on the receiving side that
//! fires once the data has landed, and an [`Event`] on the sending side that fires once the send
//! buffer may be reused. The sending side additionally owns a [`SendCounter`] that is bumped when
//! the transfer is actually launched, not when it is merely requested.
//!
//! Events count. A copy engine calls [`Event::register()`] when it launches a copy and
//! [`Event::signal()`] when that copy completes, so one event can track every transfer of a
//! communication phase and [`Event::wait()`] returns once all of them are done.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

#[derive(Default)]
struct EventState {
    outstanding: usize,
    fired: usize,
}

#[derive(Default)]
struct EventInner {
    state: Mutex<EventState>,
    done: Condvar,
}

/// A counting completion signal shared between the party that waits and the copy engine.
///
/// Cloning an `Event` yields another handle to the same signal.
///
/// # Examples
///
/// ```
/// use pgas_rendezvous::event::Event;
///
/// let event = Event::new();
/// event.register();
/// assert!(!event.test());
/// event.signal();
/// assert!(event.test());
/// event.wait();
/// assert_eq!(event.fired(), 1);
/// ```
#[derive(Clone, Default)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    /// A new event with nothing outstanding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce one more completion that this event has to wait for.
    pub fn register(&self) {
        self.state().outstanding += 1;
    }

    /// Report one completion.
    ///
    /// # Panics
    ///
    /// Panics if nothing is outstanding.
    pub fn signal(&self) {
        let mut state = self.state();
        assert!(
            state.outstanding > 0,
            "event signalled without an outstanding completion"
        );
        state.outstanding -= 1;
        state.fired += 1;
        if state.outstanding == 0 {
            self.inner.done.notify_all();
        }
    }

    /// Withdraw one outstanding completion that will never be signalled.
    ///
    /// Waiters are released as if the completion had happened, but [`fired()`](#method.fired) is
    /// not raised.
    ///
    /// # Panics
    ///
    /// Panics if nothing is outstanding.
    pub fn cancel(&self) {
        let mut state = self.state();
        assert!(
            state.outstanding > 0,
            "event cancelled without an outstanding completion"
        );
        state.outstanding -= 1;
        if state.outstanding == 0 {
            self.inner.done.notify_all();
        }
    }

    /// `true` if no completion is outstanding.
    pub fn test(&self) -> bool {
        self.state().outstanding == 0
    }

    /// Block until no completion is outstanding.
    pub fn wait(&self) {
        let mut state = self.state();
        while state.outstanding > 0 {
            state = self
                .inner
                .done
                .wait(state)
                .expect("event mutex poisoned");
        }
    }

    /// Number of completions registered but not yet signalled.
    pub fn outstanding(&self) -> usize {
        self.state().outstanding
    }

    /// Number of completions signalled over the lifetime of the event.
    pub fn fired(&self) -> usize {
        self.state().fired
    }

    fn state(&self) -> MutexGuard<'_, EventState> {
        self.inner.state.lock().expect("event mutex poisoned")
    }
}

/// Handles are equal if they refer to the same signal.
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Event {}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Event")
            .field("outstanding", &state.outstanding)
            .field("fired", &state.fired)
            .finish()
    }
}

/// Counts transfers that have been launched on behalf of a sender.
///
/// Cloning a `SendCounter` yields another handle to the same count.
#[derive(Clone, Default, Debug)]
pub struct SendCounter(Arc<AtomicUsize>);

impl SendCounter {
    /// A counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one launched transfer.
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    /// The current count.
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    /// Reset the count to zero and return the previous value.
    pub fn reset(&self) -> usize {
        self.0.swap(0, Ordering::AcqRel)
    }
}

/// Handles are equal if they refer to the same count.
impl PartialEq for SendCounter {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for SendCounter {}
