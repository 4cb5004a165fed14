#![deny(missing_docs)]
#![warn(missing_copy_implementations)]
#![warn(trivial_casts)]
#![warn(trivial_numeric_casts)]
#![warn(unused_extern_crates)]
#![warn(unused_import_braces)]
#![warn(unused_qualifications)]

//! Rendezvous matching for one-sided point to point communication
//!
//! In a partitioned global address space (PGAS) a process can write straight into the memory of
//! another process, given a handle to that memory. What it cannot do on its own is find out
//! *where* the receiver wants a message to land. This crate implements the *Active Receive*
//! (sender side tag matching) protocol that closes that gap:
//!
//! 1. The receiver sends its receive request (buffer handle, message size and tag) to the
//!    sender. The transport materializes it on the sender as a [`post_receive()`] call.
//! 2. The sender calls [`send()`] with its send buffer, size and tag.
//! 3. Whichever of the two arrives second finds the first one in the pending table, merges both
//!    halves, and launches a single one-sided copy from the send buffer to the receive buffer.
//!
//! [`post_receive()`]: matcher/struct.Matcher.html#method.post_receive
//! [`send()`]: matcher/struct.Matcher.html#method.send
//!
//! # Usage
//!
//! ```
//! use pgas_rendezvous::prelude::*;
//!
//! let segments = Segments::new(2, 64);
//! let engine = LoopbackEngine::new(segments.clone());
//! let context = Context::new(Config::new(0, 2), engine).unwrap();
//!
//! let src = segments.ptr(0, 0).unwrap();
//! let dst = segments.ptr(1, 0).unwrap();
//! segments.write(src, b"hello").unwrap();
//!
//! let channel = Channel::new("boundary");
//! let matcher = context.matcher();
//! matcher.post_receive(dst, 5, 7, Some(channel.recv_event()));
//! matcher.send(src, GlobalPtr::at_rank(1), 5, 7, Some(channel.send_event()),
//!     Some(channel.send_counter()));
//!
//! context.engine().progress().unwrap();
//! channel.wait_all();
//! assert_eq!(segments.read(dst, 5).unwrap(), b"hello");
//! assert_eq!(channel.send_counter().get(), 1);
//! ```
//!
//! # Features
//!
//! - **Pending table**: unmatched halves, keyed by destination rank, scanned oldest first.
//! - **Matcher**: merge-or-insert under one critical section, exactly-once launch.
//! - **Completion**: counting [`Event`](event/struct.Event.html)s and
//! [`SendCounter`](event/struct.SendCounter.html)s that the copy engine signals.
//! - **Loopback engine**: an in-process address space with explicit progress, used to drive
//! the protocol without a network.
//!
//! Not supported:
//!
//! - Ordering between different tags of the same rank
//! - Flow control, timeouts or cancellation of pending halves
//! - Any particular remote memory transport

pub mod descriptor;
pub mod engine;
pub mod environment;
pub mod error;
pub mod event;
pub mod matcher;
pub mod memory;
pub mod pending;

pub use error::{Error, ProtocolViolation};

/// Identifies a process within the address space.
pub type Rank = i32;
/// Can be used to tag messages on both halves of a transfer so they can be matched.
pub type Tag = i32;
/// Encodes the size in bytes of a transfer.
pub type Count = usize;

/// Re-exports all traits.
pub mod traits {
    pub use crate::matcher::CopyEngine;
    pub use crate::memory::GlobalAddress;
}

/// Re-exports the types needed to set up a context and move data.
pub mod prelude {
    pub use crate::descriptor::{Half, Role, Transfer, TransferDescriptor};
    pub use crate::engine::LoopbackEngine;
    pub use crate::environment::{Channel, Config, Context, Process, Threading};
    pub use crate::event::{Event, SendCounter};
    pub use crate::matcher::{Matcher, Submission};
    pub use crate::memory::{GlobalPtr, Segments};
    pub use crate::pending::PendingTable;
    pub use crate::traits::*;
    pub use crate::{Count, Rank, Tag};
}
