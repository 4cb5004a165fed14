//! Transfer descriptors
//!
//! A transfer is described by two halves that are submitted independently. The send half knows
//! the source buffer, the hook that tells the sender its buffer is free again, and the counter of
//! launched sends. The receive half knows the destination buffer and the hook that tells the
//! receiver its data has landed. Both know the tag and the size.
//!
//! The first half to arrive becomes a [`TransferDescriptor`] with one side unset. The second
//! half is [merged](struct.TransferDescriptor.html#method.merge) into it, which produces a
//! [`Transfer`]: the same record with both addresses present, ready to be launched.

use crate::error::ProtocolViolation;
use crate::event::{Event, SendCounter};
use crate::memory::GlobalAddress;
use crate::{Count, Rank, Tag};

/// Which side of a transfer a half supplies
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Role {
    /// The half carries the source buffer.
    Send,
    /// The half carries the destination buffer.
    Receive,
}

impl Role {
    fn name(self) -> &'static str {
        match self {
            Role::Send => "send",
            Role::Receive => "receive",
        }
    }
}

/// One side of a transfer together with the completion hooks that belong to that side.
#[derive(Clone, Debug)]
pub enum Half<A> {
    /// Supplied by the process that owns the data.
    Send {
        /// Source buffer
        src: A,
        /// Fired once the source buffer may be reused
        on_send_done: Option<Event>,
        /// Incremented once when the transfer is launched
        sent_counter: Option<SendCounter>,
    },
    /// Supplied by the process that owns the destination buffer.
    Receive {
        /// Destination buffer
        dst: A,
        /// Fired once the data has landed in `dst`
        on_data_ready: Option<Event>,
    },
}

impl<A> Half<A> {
    /// The side this half supplies.
    pub fn role(&self) -> Role {
        match self {
            Half::Send { .. } => Role::Send,
            Half::Receive { .. } => Role::Receive,
        }
    }
}

/// A transfer with exactly one of its two halves known.
///
/// Descriptors only ever live in the [pending table](../pending/struct.PendingTable.html). A
/// descriptor that would have both halves is never built: merging consumes it and yields a
/// [`Transfer`] instead.
#[derive(Clone, Debug)]
pub struct TransferDescriptor<A> {
    tag: Tag,
    nbytes: Count,
    src: Option<A>,
    dst: Option<A>,
    on_data_ready: Option<Event>,
    on_send_done: Option<Event>,
    sent_counter: Option<SendCounter>,
}

impl<A: GlobalAddress> TransferDescriptor<A> {
    /// A descriptor holding only `half`.
    pub fn from_half(tag: Tag, nbytes: Count, half: Half<A>) -> Self {
        let mut descriptor = TransferDescriptor {
            tag,
            nbytes,
            src: None,
            dst: None,
            on_data_ready: None,
            on_send_done: None,
            sent_counter: None,
        };
        descriptor.fill(half);
        descriptor
    }

    /// Tag the descriptor is matched by
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Size recorded by the half that created the descriptor
    pub fn nbytes(&self) -> Count {
        self.nbytes
    }

    /// The side that is known.
    pub fn known(&self) -> Role {
        if self.src.is_some() {
            Role::Send
        } else {
            Role::Receive
        }
    }

    /// Source buffer, if the send half is known
    pub fn src(&self) -> Option<A> {
        self.src
    }

    /// Destination buffer, if the receive half is known
    pub fn dst(&self) -> Option<A> {
        self.dst
    }

    /// Assert that exactly one side is known.
    ///
    /// # Panics
    ///
    /// Panics if both or neither of the addresses are set.
    pub fn check(&self) {
        assert!(
            self.src.is_some() != self.dst.is_some(),
            "pending descriptor for tag {} must have exactly one side set (src: {:?}, dst: {:?})",
            self.tag,
            self.src,
            self.dst
        );
    }

    /// Complete the descriptor with its missing half.
    ///
    /// `rank` is the key the descriptor was stored under and only serves to describe a violation.
    ///
    /// # Errors
    ///
    /// - [`ProtocolViolation::LengthMismatch`] if `nbytes` differs from the recorded size.
    /// - [`ProtocolViolation::DuplicateHalf`] if the side `half` supplies is already set.
    pub fn merge(
        mut self,
        rank: Rank,
        nbytes: Count,
        half: Half<A>,
    ) -> Result<Transfer<A>, ProtocolViolation> {
        if nbytes != self.nbytes {
            return Err(ProtocolViolation::LengthMismatch {
                rank,
                tag: self.tag,
                expected: self.nbytes,
                actual: nbytes,
            });
        }

        let role = half.role();
        let already_set = match role {
            Role::Send => self.src.is_some(),
            Role::Receive => self.dst.is_some(),
        };
        if already_set {
            return Err(ProtocolViolation::DuplicateHalf {
                rank,
                tag: self.tag,
                side: role.name(),
            });
        }
        self.fill(half);

        match (self.src, self.dst) {
            (Some(src), Some(dst)) => Ok(Transfer {
                src,
                dst,
                nbytes: self.nbytes,
                tag: self.tag,
                on_data_ready: self.on_data_ready,
                on_send_done: self.on_send_done,
                sent_counter: self.sent_counter,
            }),
            // A resident descriptor has one side set and the other was just filled.
            _ => unreachable!("merged descriptor for tag {} is incomplete", self.tag),
        }
    }

    fn fill(&mut self, half: Half<A>) {
        match half {
            Half::Send {
                src,
                on_send_done,
                sent_counter,
            } => {
                self.src = Some(src);
                self.on_send_done = on_send_done;
                self.sent_counter = sent_counter;
            }
            Half::Receive { dst, on_data_ready } => {
                self.dst = Some(dst);
                self.on_data_ready = on_data_ready;
            }
        }
    }
}

/// A fully matched transfer, handed to the copy engine exactly once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transfer<A> {
    /// Source buffer
    pub src: A,
    /// Destination buffer
    pub dst: A,
    /// Number of bytes to copy
    pub nbytes: Count,
    /// Tag both halves were matched by
    pub tag: Tag,
    /// Fired on the receiving side once the data has landed
    pub on_data_ready: Option<Event>,
    /// Fired on the sending side once the source buffer may be reused
    pub on_send_done: Option<Event>,
    /// Incremented when the transfer is launched
    pub sent_counter: Option<SendCounter>,
}
