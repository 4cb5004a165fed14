//! An in-process copy engine
//!
//! [`LoopbackEngine`] moves bytes between the segments of a [`Segments`] address space. Launching
//! a copy only queues it, the copy happens when the owner of the engine drives
//! [`progress()`](struct.LoopbackEngine.html#method.progress). This keeps launch and completion
//! apart the way a remote memory transport does.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tracing::{trace, warn};

use crate::error::Result;
use crate::event::Event;
use crate::matcher::CopyEngine;
use crate::memory::{GlobalPtr, Segments};
use crate::Count;

#[derive(Debug)]
struct QueuedCopy {
    src: GlobalPtr,
    dst: GlobalPtr,
    nbytes: Count,
    on_data_ready: Option<Event>,
    on_send_done: Option<Event>,
}

/// Copies between the segments of one process, completed by explicit progress.
///
/// # Examples
///
/// ```
/// use pgas_rendezvous::prelude::*;
///
/// let segments = Segments::new(2, 8);
/// let engine = LoopbackEngine::new(segments.clone());
/// let done = Event::new();
///
/// let src = segments.ptr(0, 0).unwrap();
/// let dst = segments.ptr(1, 0).unwrap();
/// segments.write(src, &[42]).unwrap();
///
/// engine.async_copy_and_signal(src, dst, 1, None, Some(done.clone()));
/// assert!(!done.test());
/// assert_eq!(engine.progress().unwrap(), 1);
/// assert!(done.test());
/// assert_eq!(segments.read(dst, 1).unwrap(), vec![42]);
/// ```
#[derive(Debug)]
pub struct LoopbackEngine {
    segments: Segments,
    queue: Mutex<VecDeque<QueuedCopy>>,
}

impl LoopbackEngine {
    /// An engine copying within `segments`.
    pub fn new(segments: Segments) -> Self {
        LoopbackEngine {
            segments,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// The address space the engine copies within
    pub fn segments(&self) -> &Segments {
        &self.segments
    }

    /// Number of launched copies that have not completed yet.
    pub fn in_flight(&self) -> usize {
        self.queue().len()
    }

    /// Complete every queued copy in launch order and return how many completed.
    ///
    /// For each copy `on_data_ready` is signalled before `on_send_done`. Copies launched while
    /// progress is running are left for the next call.
    ///
    /// # Errors
    ///
    /// Stops at the first copy that does not fit into its segments. That copy is discarded and its
    /// events are [cancelled](../event/struct.Event.html#method.cancel), so waiters return without
    /// counting it as fired. Later copies stay queued.
    pub fn progress(&self) -> Result<usize> {
        let batch: Vec<QueuedCopy> = self.queue().drain(..).collect();
        let mut batch = batch.into_iter();
        let mut completed = 0;

        while let Some(copy) = batch.next() {
            if let Err(err) = self.segments.copy(copy.src, copy.dst, copy.nbytes) {
                warn!(src = ?copy.src, dst = ?copy.dst, nbytes = copy.nbytes, %err, "copy failed");
                for event in copy.on_data_ready.iter().chain(copy.on_send_done.iter()) {
                    event.cancel();
                }
                let mut queue = self.queue();
                for (index, rest) in batch.by_ref().enumerate() {
                    queue.insert(index, rest);
                }
                return Err(err);
            }
            trace!(src = ?copy.src, dst = ?copy.dst, nbytes = copy.nbytes, "copy complete");
            if let Some(event) = copy.on_data_ready {
                event.signal();
            }
            if let Some(event) = copy.on_send_done {
                event.signal();
            }
            completed += 1;
        }

        Ok(completed)
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<QueuedCopy>> {
        self.queue.lock().expect("copy queue mutex poisoned")
    }
}

impl CopyEngine for LoopbackEngine {
    type Address = GlobalPtr;

    fn async_copy_and_signal(
        &self,
        src: GlobalPtr,
        dst: GlobalPtr,
        nbytes: Count,
        on_data_ready: Option<Event>,
        on_send_done: Option<Event>,
    ) {
        for event in on_data_ready.iter().chain(on_send_done.iter()) {
            event.register();
        }
        self.queue().push_back(QueuedCopy {
            src,
            dst,
            nbytes,
            on_data_ready,
            on_send_done,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn completes_in_launch_order() {
        let segments = Segments::new(2, 8);
        let engine = LoopbackEngine::new(segments.clone());
        let src = segments.ptr(0, 0).unwrap();
        let dst = segments.ptr(1, 0).unwrap();
        segments.write(src, &[1, 2]).unwrap();

        let ready = Event::new();
        engine.async_copy_and_signal(src, dst, 1, Some(ready.clone()), None);
        engine.async_copy_and_signal(src.checked_add(1).unwrap(), dst, 1, Some(ready.clone()), None);
        assert_eq!(ready.outstanding(), 2);
        assert_eq!(engine.in_flight(), 2);

        assert_eq!(engine.progress().unwrap(), 2);
        assert_eq!(engine.in_flight(), 0);
        assert_eq!(ready.fired(), 2);
        // The later copy wins.
        assert_eq!(segments.read(dst, 1).unwrap(), vec![2]);
        assert_eq!(engine.progress().unwrap(), 0);
    }

    #[test]
    fn failed_copy_keeps_the_rest() {
        let segments = Segments::new(2, 4);
        let engine = LoopbackEngine::new(segments.clone());
        let done = Event::new();

        engine.async_copy_and_signal(
            GlobalPtr::new(0, 0),
            GlobalPtr::new(1, 2),
            4,
            None,
            Some(done.clone()),
        );
        engine.async_copy_and_signal(
            GlobalPtr::new(0, 0),
            GlobalPtr::new(1, 0),
            4,
            None,
            Some(done.clone()),
        );

        assert!(matches!(
            engine.progress(),
            Err(Error::OutOfBounds { rank: 1, .. })
        ));
        assert_eq!(engine.in_flight(), 1);
        assert_eq!(done.outstanding(), 1);
        assert_eq!(done.fired(), 0);

        assert_eq!(engine.progress().unwrap(), 1);
        assert!(done.test());
        assert_eq!(done.fired(), 1);
    }
}
