//! Protocol violations and recoverable errors

use thiserror::Error;

use crate::{Count, Rank, Tag};

/// A broken rendezvous invariant.
///
/// These are never transient: they mean that the caller or the transport submitted the same half
/// twice, reused a tag that is still in flight, or disagreed with the peer about the size of a
/// message. [`Matcher::submit_half()`](../matcher/struct.Matcher.html#method.submit_half) turns
/// them into a panic.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// The two halves of a transfer disagree on its size.
    #[error(
        "message size mismatch for rank {rank} tag {tag}: pending half has {expected} bytes, \
         incoming half has {actual} bytes"
    )]
    LengthMismatch {
        /// Destination rank the transfer is keyed under
        rank: Rank,
        /// Tag of the transfer
        tag: Tag,
        /// Size recorded by the first half
        expected: Count,
        /// Size supplied by the second half
        actual: Count,
    },
    /// The side an incoming half wants to fill is already filled.
    #[error("duplicate {side} half for rank {rank} tag {tag}")]
    DuplicateHalf {
        /// Destination rank the transfer is keyed under
        rank: Rank,
        /// Tag of the transfer
        tag: Tag,
        /// Which side was submitted twice, `"send"` or `"receive"`
        side: &'static str,
    },
}

/// Errors that the caller can recover from.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A configuration describes no processes at all.
    #[error("address space must contain at least one rank")]
    EmptyWorld,
    /// A rank lies outside of `0..size`.
    #[error("rank {rank} is out of range for an address space of {size} ranks")]
    RankOutOfRange {
        /// The offending rank
        rank: Rank,
        /// Number of ranks in the address space
        size: usize,
    },
    /// A memory range does not fit into its segment.
    #[error(
        "range of {len} bytes at offset {offset} does not fit into the {capacity} byte segment \
         of rank {rank}"
    )]
    OutOfBounds {
        /// Rank owning the segment
        rank: Rank,
        /// Start of the range
        offset: usize,
        /// Length of the range
        len: usize,
        /// Size of the segment
        capacity: usize,
    },
    /// A buffer handed to a process handle belongs to another rank.
    #[error("buffer belongs to rank {actual}, expected rank {expected}")]
    WrongRank {
        /// Rank of the process handle
        expected: Rank,
        /// Rank owning the buffer
        actual: Rank,
    },
    /// A pointer that names only a rank was used to access memory.
    #[error("pointer to rank {0} does not address any memory")]
    NullAddress(Rank),
}

/// Shorthand for results carrying an [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        let err = ProtocolViolation::LengthMismatch {
            rank: 1,
            tag: 4,
            expected: 16,
            actual: 32,
        };
        assert_eq!(
            err.to_string(),
            "message size mismatch for rank 1 tag 4: pending half has 16 bytes, incoming half \
             has 32 bytes"
        );

        let err = ProtocolViolation::DuplicateHalf {
            rank: 2,
            tag: 9,
            side: "send",
        };
        assert_eq!(err.to_string(), "duplicate send half for rank 2 tag 9");

        let err = Error::RankOutOfRange { rank: 4, size: 2 };
        assert_eq!(
            err.to_string(),
            "rank 4 is out of range for an address space of 2 ranks"
        );
    }
}
