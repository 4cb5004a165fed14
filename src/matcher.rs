//! Sender side tag matching
//!
//! Every half of every transfer goes through [`Matcher::submit_half()`]: the local send, and the
//! receive request that the transport relays from the process owning the destination buffer. The
//! matcher looks for the other half in its [`PendingTable`]. On a hit it merges both halves and
//! launches the copy, on a miss it parks the half in the table.
//!
//! Lookup, merge and removal, or the insertion, happen under one lock on the table, so a transfer
//! is launched exactly once no matter which half arrives first or from which thread. The copy is
//! handed to the [`CopyEngine`] after the lock is released.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, error, trace};

use crate::descriptor::{Half, Transfer, TransferDescriptor};
use crate::error::ProtocolViolation;
use crate::event::{Event, SendCounter};
use crate::memory::GlobalAddress;
use crate::pending::PendingTable;
use crate::{Count, Rank, Tag};

/// The one-sided copy primitive of the communication runtime.
pub trait CopyEngine {
    /// Memory handle understood by the engine
    type Address: GlobalAddress;

    /// Start copying `nbytes` from `src` to `dst` without waiting for it.
    ///
    /// Implementations must [`register()`](../event/struct.Event.html#method.register) both events
    /// before returning and [`signal()`](../event/struct.Event.html#method.signal)
    /// `on_data_ready` once the data is visible at `dst` and `on_send_done` once `src` may be
    /// reused.
    fn async_copy_and_signal(
        &self,
        src: Self::Address,
        dst: Self::Address,
        nbytes: Count,
        on_data_ready: Option<Event>,
        on_send_done: Option<Event>,
    );
}

impl<'a, E: CopyEngine> CopyEngine for &'a E {
    type Address = E::Address;

    fn async_copy_and_signal(
        &self,
        src: Self::Address,
        dst: Self::Address,
        nbytes: Count,
        on_data_ready: Option<Event>,
        on_send_done: Option<Event>,
    ) {
        (**self).async_copy_and_signal(src, dst, nbytes, on_data_ready, on_send_done)
    }
}

/// Outcome of submitting a half
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Submission {
    /// No counterpart was pending, the half now waits in the table.
    Pending,
    /// The counterpart was pending and the transfer has been launched.
    Launched,
}

/// Matches send and receive halves and launches completed transfers.
///
/// A `Matcher` owns its pending table. Independent matchers never see each other's halves.
pub struct Matcher<E: CopyEngine> {
    engine: E,
    table: Mutex<PendingTable<E::Address>>,
    launched: AtomicUsize,
}

impl<E: CopyEngine> Matcher<E> {
    /// A matcher with an empty table that launches transfers on `engine`.
    pub fn new(engine: E) -> Self {
        Matcher {
            engine,
            table: Mutex::new(PendingTable::new()),
            launched: AtomicUsize::new(0),
        }
    }

    /// The engine transfers are launched on
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Submit one half of the transfer tagged `tag` to `rank`.
    ///
    /// If the other half is pending it is merged with `half` and the transfer is launched,
    /// otherwise `half` is stored until the other half is submitted.
    ///
    /// # Panics
    ///
    /// A [`ProtocolViolation`] is unrecoverable and panics: both halves must agree on `nbytes`,
    /// and the same half must not be submitted twice for a tag that is still pending.
    pub fn submit_half(
        &self,
        rank: Rank,
        tag: Tag,
        nbytes: Count,
        half: Half<E::Address>,
    ) -> Submission {
        match self.try_submit_half(rank, tag, nbytes, half) {
            Ok(submission) => submission,
            Err(violation) => {
                error!(rank, tag, nbytes, %violation, "rendezvous protocol violation");
                panic!("rendezvous protocol violation: {}", violation);
            }
        }
    }

    /// Like [`submit_half()`](#method.submit_half), but report a violation instead of panicking.
    ///
    /// The pending half involved in a violation has already been taken out of the table and is
    /// dropped.
    pub fn try_submit_half(
        &self,
        rank: Rank,
        tag: Tag,
        nbytes: Count,
        half: Half<E::Address>,
    ) -> Result<Submission, ProtocolViolation> {
        let transfer = {
            let mut table = self.table();
            match table.find_and_remove(rank, tag) {
                Some(descriptor) => {
                    debug!(rank, tag, nbytes, role = ?half.role(), "matched pending half");
                    descriptor.merge(rank, nbytes, half)?
                }
                None => {
                    debug!(rank, tag, nbytes, role = ?half.role(), "no match, half pending");
                    table.insert(rank, TransferDescriptor::from_half(tag, nbytes, half));
                    return Ok(Submission::Pending);
                }
            }
        };

        self.launch(transfer);
        Ok(Submission::Launched)
    }

    /// Non-blocking send of `nbytes` from `src` to the process owning `dst`.
    ///
    /// The transfer is matched by `tag` against the receive request of that process. `dst` only
    /// needs to identify the destination rank, the destination buffer and `on_data_ready` come
    /// with the receive request. `on_send_done` fires once `src` may be reused and `sent_counter`
    /// is incremented once the transfer is launched.
    ///
    /// Unlike the classic non-blocking send there is no `on_data_ready` argument: the receive
    /// request always supplies the data-ready hook, and a hook given by the sender would be
    /// replaced by it on every match.
    ///
    /// # Panics
    ///
    /// See [`submit_half()`](#method.submit_half).
    pub fn send(
        &self,
        src: E::Address,
        dst: E::Address,
        nbytes: Count,
        tag: Tag,
        on_send_done: Option<Event>,
        sent_counter: Option<SendCounter>,
    ) -> Submission {
        self.submit_half(
            dst.owning_rank(),
            tag,
            nbytes,
            Half::Send {
                src,
                on_send_done,
                sent_counter,
            },
        )
    }

    /// Submit the receive request for `nbytes` into `dst`, as relayed from the owner of `dst`.
    ///
    /// `on_data_ready` fires once the data has landed in `dst`.
    ///
    /// # Panics
    ///
    /// See [`submit_half()`](#method.submit_half).
    pub fn post_receive(
        &self,
        dst: E::Address,
        nbytes: Count,
        tag: Tag,
        on_data_ready: Option<Event>,
    ) -> Submission {
        self.submit_half(
            dst.owning_rank(),
            tag,
            nbytes,
            Half::Receive { dst, on_data_ready },
        )
    }

    /// Number of transfers launched so far.
    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::Acquire)
    }

    /// Number of halves waiting for their counterpart.
    pub fn pending(&self) -> usize {
        self.table().len()
    }

    /// Number of halves waiting under `rank`.
    pub fn pending_for(&self, rank: Rank) -> usize {
        self.table().pending_for(rank)
    }

    /// Tags waiting under `rank`, oldest first.
    pub fn pending_tags(&self, rank: Rank) -> Vec<Tag> {
        self.table().tags_for(rank)
    }

    /// Run `f` on the pending table while holding its lock.
    pub fn with_table<R>(&self, f: impl FnOnce(&PendingTable<E::Address>) -> R) -> R {
        f(&self.table())
    }

    fn launch(&self, transfer: Transfer<E::Address>) {
        let Transfer {
            src,
            dst,
            nbytes,
            tag,
            on_data_ready,
            on_send_done,
            sent_counter,
        } = transfer;

        trace!(?src, ?dst, nbytes, tag, "launching transfer");
        self.engine
            .async_copy_and_signal(src, dst, nbytes, on_data_ready, on_send_done);
        if let Some(counter) = sent_counter {
            counter.increment();
        }
        self.launched.fetch_add(1, Ordering::AcqRel);
    }

    fn table(&self) -> MutexGuard<'_, PendingTable<E::Address>> {
        self.table.lock().expect("pending table mutex poisoned")
    }
}

impl<E: CopyEngine + fmt::Debug> fmt::Debug for Matcher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matcher")
            .field("engine", &self.engine)
            .field("pending", &self.pending())
            .field("launched", &self.launched())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::memory::GlobalPtr;

    /// Records launches instead of copying.
    #[derive(Default)]
    struct Recorder {
        launches: Mutex<Vec<(GlobalPtr, GlobalPtr, Count)>>,
    }

    impl CopyEngine for Recorder {
        type Address = GlobalPtr;

        fn async_copy_and_signal(
            &self,
            src: GlobalPtr,
            dst: GlobalPtr,
            nbytes: Count,
            _on_data_ready: Option<Event>,
            _on_send_done: Option<Event>,
        ) {
            self.launches.lock().unwrap().push((src, dst, nbytes));
        }
    }

    #[test]
    #[traced_test]
    fn send_then_receive() {
        let matcher = Matcher::new(Recorder::default());
        let counter = SendCounter::new();

        let submission = matcher.send(
            GlobalPtr::new(0, 0),
            GlobalPtr::at_rank(3),
            128,
            7,
            None,
            Some(counter.clone()),
        );
        assert_eq!(submission, Submission::Pending);
        assert_eq!(matcher.pending_for(3), 1);
        assert_eq!(counter.get(), 0);

        let submission = matcher.post_receive(GlobalPtr::new(3, 64), 128, 7, None);
        assert_eq!(submission, Submission::Launched);
        assert_eq!(matcher.pending_for(3), 0);
        assert_eq!(counter.get(), 1);
        assert_eq!(matcher.launched(), 1);
        assert_eq!(
            *matcher.engine().launches.lock().unwrap(),
            vec![(GlobalPtr::new(0, 0), GlobalPtr::new(3, 64), 128)]
        );
        assert!(logs_contain("no match, half pending"));
        assert!(logs_contain("matched pending half"));
    }

    #[test]
    fn violation_is_reported() {
        let matcher = Matcher::new(Recorder::default());
        matcher.post_receive(GlobalPtr::new(1, 0), 16, 4, None);

        let err = matcher
            .try_submit_half(
                1,
                4,
                32,
                Half::Send {
                    src: GlobalPtr::new(0, 0),
                    on_send_done: None,
                    sent_counter: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, ProtocolViolation::LengthMismatch { .. }));
        assert_eq!(matcher.pending(), 0);
        assert_eq!(matcher.launched(), 0);
    }

    #[test]
    #[should_panic(expected = "rendezvous protocol violation: duplicate receive half")]
    fn duplicate_receive_panics() {
        let matcher = Matcher::new(Recorder::default());
        matcher.post_receive(GlobalPtr::new(2, 0), 8, 1, None);
        matcher.post_receive(GlobalPtr::new(2, 8), 8, 1, None);
    }

    #[test]
    fn borrowed_engine() {
        let recorder = Recorder::default();
        let matcher = Matcher::new(&recorder);
        matcher.post_receive(GlobalPtr::new(1, 0), 4, 0, None);
        matcher.send(GlobalPtr::new(0, 0), GlobalPtr::at_rank(1), 4, 0, None, None);
        assert_eq!(recorder.launches.lock().unwrap().len(), 1);
    }
}
