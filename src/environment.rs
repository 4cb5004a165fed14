//! Environmental management
//!
//! A [`Context`] is the communication subsystem of one process: it knows where the process sits
//! in the address space and owns the [`Matcher`] that all of its transfers go through. Nothing is
//! global, a program (or a test) can hold as many independent contexts as it likes.
//!
//! Transfers are usually grouped into communication phases, each waited for as a whole. A
//! [`Channel`] bundles the completion hooks of one such phase.

use std::fmt;

use conv::ConvUtil;
use tracing::debug;

use crate::descriptor::Half;
use crate::error::{Error, Result};
use crate::event::{Event, SendCounter};
use crate::matcher::{CopyEngine, Matcher, Submission};
use crate::memory::GlobalAddress;
use crate::{Count, Rank, Tag};

/// How the communication runtime calls into the matcher.
///
/// The pending table is guarded by a mutex at both levels. With `Serialized` the lock is never
/// contended.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum Threading {
    /// Local calls and transport handlers never run concurrently, for example because the
    /// runtime makes progress cooperatively on the calling thread.
    Serialized,
    /// Local calls and transport handlers may run concurrently on different threads.
    #[default]
    Multiple,
}

/// Describes the place of a process in the address space.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Config {
    rank: Rank,
    size: usize,
    threading: Threading,
}

impl Config {
    /// Process `rank` of `size`, with `Threading::Multiple`.
    pub fn new(rank: Rank, size: usize) -> Self {
        Config {
            rank,
            size,
            threading: Threading::default(),
        }
    }

    /// Use the given threading level.
    pub fn with_threading(mut self, threading: Threading) -> Self {
        self.threading = threading;
        self
    }

    /// Rank of the local process
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Number of processes in the address space
    pub fn size(&self) -> usize {
        self.size
    }

    /// Threading level
    pub fn threading(&self) -> Threading {
        self.threading
    }

    /// Check that the configuration describes a non-empty address space containing `rank`.
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(Error::EmptyWorld);
        }
        self.check_rank(self.rank)
    }

    fn check_rank(&self, rank: Rank) -> Result<()> {
        match rank.value_as::<usize>() {
            Ok(index) if index < self.size => Ok(()),
            _ => Err(Error::RankOutOfRange {
                rank,
                size: self.size,
            }),
        }
    }
}

/// The communication subsystem of one process.
///
/// # Examples
///
/// See `demos/halo_exchange.rs`
pub struct Context<E: CopyEngine> {
    config: Config,
    matcher: Matcher<E>,
}

impl<E: CopyEngine> Context<E> {
    /// Set up a context launching its transfers on `engine`.
    pub fn new(config: Config, engine: E) -> Result<Self> {
        config.validate()?;
        debug!(
            rank = config.rank,
            size = config.size,
            threading = ?config.threading,
            "rendezvous context ready"
        );
        Ok(Context {
            config,
            matcher: Matcher::new(engine),
        })
    }

    /// Rank of the local process
    pub fn rank(&self) -> Rank {
        self.config.rank
    }

    /// Number of processes in the address space
    pub fn size(&self) -> usize {
        self.config.size
    }

    /// The configuration the context was set up with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The matcher all transfers of this process go through
    pub fn matcher(&self) -> &Matcher<E> {
        &self.matcher
    }

    /// The engine transfers are launched on
    pub fn engine(&self) -> &E {
        self.matcher.engine()
    }

    /// A handle to the peer at `rank`.
    pub fn process_at_rank(&self, rank: Rank) -> Result<Process<'_, E>> {
        self.config.check_rank(rank)?;
        Ok(Process {
            context: self,
            rank,
        })
    }

    /// A handle to the local process.
    pub fn this_process(&self) -> Process<'_, E> {
        Process {
            context: self,
            rank: self.config.rank,
        }
    }
}

impl<E: CopyEngine + fmt::Debug> fmt::Debug for Context<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("matcher", &self.matcher)
            .finish()
    }
}

/// A peer process, as seen from a [`Context`].
///
/// Transfers submitted through a `Process` are keyed under its rank, the rank that owns the
/// destination buffer.
pub struct Process<'a, E: CopyEngine> {
    context: &'a Context<E>,
    rank: Rank,
}

impl<'a, E: CopyEngine> Process<'a, E> {
    /// Rank of the peer
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Send `nbytes` from `src` to this process under `tag`.
    ///
    /// Completion is reported on the send event and the send counter of `channel`.
    pub fn send(
        &self,
        src: E::Address,
        nbytes: Count,
        tag: Tag,
        channel: &Channel,
    ) -> Submission {
        self.context.matcher.submit_half(
            self.rank,
            tag,
            nbytes,
            Half::Send {
                src,
                on_send_done: Some(channel.send_event()),
                sent_counter: Some(channel.send_counter()),
            },
        )
    }

    /// Submit the receive request of this process for `nbytes` into `dst` under `tag`.
    ///
    /// Completion is reported on the receive event of `channel`.
    ///
    /// # Errors
    ///
    /// [`Error::WrongRank`] if `dst` is not owned by this process.
    pub fn receive_into(
        &self,
        dst: E::Address,
        nbytes: Count,
        tag: Tag,
        channel: &Channel,
    ) -> Result<Submission> {
        if dst.owning_rank() != self.rank {
            return Err(Error::WrongRank {
                expected: self.rank,
                actual: dst.owning_rank(),
            });
        }
        Ok(self
            .context
            .matcher
            .post_receive(dst, nbytes, tag, Some(channel.recv_event())))
    }

    /// Number of halves waiting under this process.
    pub fn pending(&self) -> usize {
        self.context.matcher.pending_for(self.rank)
    }
}

impl<'a, E: CopyEngine> fmt::Debug for Process<'a, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process").field("rank", &self.rank).finish()
    }
}

/// Completion hooks of one communication phase.
#[derive(Clone, Debug)]
pub struct Channel {
    name: String,
    send_event: Event,
    recv_event: Event,
    send_counter: SendCounter,
}

impl Channel {
    /// A channel with fresh events and a zeroed counter.
    pub fn new(name: impl Into<String>) -> Self {
        Channel {
            name: name.into(),
            send_event: Event::new(),
            recv_event: Event::new(),
            send_counter: SendCounter::new(),
        }
    }

    /// Name of the phase
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fired for every send of the phase once its buffer may be reused
    pub fn send_event(&self) -> Event {
        self.send_event.clone()
    }

    /// Fired for every receive of the phase once its data has landed
    pub fn recv_event(&self) -> Event {
        self.recv_event.clone()
    }

    /// Counts the sends of the phase that have been launched
    pub fn send_counter(&self) -> SendCounter {
        self.send_counter.clone()
    }

    /// Block until every launched send and receive of the phase has completed.
    pub fn wait_all(&self) {
        self.send_event.wait();
        self.recv_event.wait();
    }

    /// `true` if nothing launched on the phase is outstanding.
    pub fn test_all(&self) -> bool {
        self.send_event.test() && self.recv_event.test()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LoopbackEngine;
    use crate::memory::{GlobalPtr, Segments};

    #[test]
    fn config_validation() {
        assert_eq!(Config::new(0, 0).validate(), Err(Error::EmptyWorld));
        assert_eq!(
            Config::new(2, 2).validate(),
            Err(Error::RankOutOfRange { rank: 2, size: 2 })
        );
        assert_eq!(
            Config::new(-1, 2).validate(),
            Err(Error::RankOutOfRange { rank: -1, size: 2 })
        );
        assert!(Config::new(1, 2).validate().is_ok());

        let config = Config::new(0, 4).with_threading(Threading::Serialized);
        assert_eq!(config.threading(), Threading::Serialized);
        assert_eq!(Config::new(0, 4).threading(), Threading::Multiple);
    }

    #[test]
    fn context_rejects_bad_config() {
        let engine = LoopbackEngine::new(Segments::new(1, 8));
        assert!(matches!(
            Context::new(Config::new(3, 1), engine),
            Err(Error::RankOutOfRange { rank: 3, size: 1 })
        ));
    }

    #[test]
    fn process_handles() {
        let segments = Segments::new(2, 16);
        let context =
            Context::new(Config::new(0, 2), LoopbackEngine::new(segments.clone())).unwrap();
        assert_eq!(context.this_process().rank(), 0);
        assert!(context.process_at_rank(2).is_err());

        let peer = context.process_at_rank(1).unwrap();
        let channel = Channel::new("patch");
        assert_eq!(
            peer.receive_into(GlobalPtr::new(0, 0), 4, 1, &channel),
            Err(Error::WrongRank {
                expected: 1,
                actual: 0
            })
        );

        let src = segments.ptr(0, 0).unwrap();
        let dst = segments.ptr(1, 8).unwrap();
        segments.write(src, &[9, 8, 7, 6]).unwrap();

        assert_eq!(peer.send(src, 4, 1, &channel), Submission::Pending);
        assert_eq!(peer.pending(), 1);
        assert_eq!(
            peer.receive_into(dst, 4, 1, &channel),
            Ok(Submission::Launched)
        );
        assert_eq!(peer.pending(), 0);
        assert!(!channel.test_all());

        context.engine().progress().unwrap();
        channel.wait_all();
        assert_eq!(channel.send_counter().get(), 1);
        assert_eq!(segments.read(dst, 4).unwrap(), vec![9, 8, 7, 6]);
    }
}
