//! The pending-request table
//!
//! Holds the first-arriving half of every transfer until its counterpart shows up. Descriptors
//! are keyed by the rank that owns the destination buffer, several tags may be pending under one
//! rank, and within a rank they are kept in arrival order.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::descriptor::TransferDescriptor;
use crate::memory::GlobalAddress;
use crate::{Rank, Tag};

/// Descriptors pending under one rank; most ranks have only a handful in flight.
type Bucket<A> = SmallVec<[TransferDescriptor<A>; 4]>;

/// A multi-valued map from destination rank to half-filled descriptors.
///
/// The table does no locking of its own, the [`Matcher`](../matcher/struct.Matcher.html) owns it
/// behind a mutex.
#[derive(Debug)]
pub struct PendingTable<A> {
    buckets: HashMap<Rank, Bucket<A>>,
    len: usize,
}

impl<A> Default for PendingTable<A> {
    fn default() -> Self {
        PendingTable {
            buckets: HashMap::new(),
            len: 0,
        }
    }
}

impl<A: GlobalAddress> PendingTable<A> {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `descriptor` under `rank`, after everything already pending there.
    ///
    /// No uniqueness is enforced, several descriptors with the same tag may coexist.
    pub fn insert(&mut self, rank: Rank, descriptor: TransferDescriptor<A>) {
        descriptor.check();
        self.buckets.entry(rank).or_default().push(descriptor);
        self.len += 1;
    }

    /// Remove and return the oldest descriptor under `rank` whose tag is `tag`.
    pub fn find_and_remove(&mut self, rank: Rank, tag: Tag) -> Option<TransferDescriptor<A>> {
        let bucket = self.buckets.get_mut(&rank)?;
        let index = bucket.iter().position(|descriptor| descriptor.tag() == tag)?;
        let descriptor = bucket.remove(index);
        if bucket.is_empty() {
            self.buckets.remove(&rank);
        }
        self.len -= 1;
        Some(descriptor)
    }

    /// Total number of pending descriptors.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of descriptors pending under `rank`.
    pub fn pending_for(&self, rank: Rank) -> usize {
        self.buckets.get(&rank).map_or(0, |bucket| bucket.len())
    }

    /// Tags pending under `rank`, oldest first.
    pub fn tags_for(&self, rank: Rank) -> Vec<Tag> {
        self.buckets.get(&rank).map_or_else(Vec::new, |bucket| {
            bucket.iter().map(TransferDescriptor::tag).collect()
        })
    }

    /// Ranks with at least one pending descriptor, in ascending order.
    pub fn ranks(&self) -> Vec<Rank> {
        let mut ranks: Vec<Rank> = self.buckets.keys().copied().collect();
        ranks.sort_unstable();
        ranks
    }

    /// Descriptors pending under `rank`, oldest first.
    pub fn iter_rank(&self, rank: Rank) -> impl Iterator<Item = &TransferDescriptor<A>> {
        self.buckets.get(&rank).into_iter().flat_map(|bucket| bucket.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Half;
    use crate::memory::GlobalPtr;

    fn send(tag: Tag, offset: usize) -> TransferDescriptor<GlobalPtr> {
        TransferDescriptor::from_half(
            tag,
            8,
            Half::Send {
                src: GlobalPtr::new(0, offset),
                on_send_done: None,
                sent_counter: None,
            },
        )
    }

    #[test]
    fn insert_and_find() {
        let mut table = PendingTable::new();
        assert!(table.is_empty());

        table.insert(3, send(7, 0));
        table.insert(3, send(8, 8));
        table.insert(4, send(7, 16));
        assert_eq!(table.len(), 3);
        assert_eq!(table.pending_for(3), 2);
        assert_eq!(table.tags_for(3), vec![7, 8]);
        assert_eq!(table.ranks(), vec![3, 4]);

        let found = table.find_and_remove(3, 8).unwrap();
        assert_eq!(found.src(), Some(GlobalPtr::new(0, 8)));
        assert_eq!(table.tags_for(3), vec![7]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn miss_leaves_table_alone() {
        let mut table = PendingTable::new();
        table.insert(1, send(1, 0));

        assert!(table.find_and_remove(1, 2).is_none());
        assert!(table.find_and_remove(2, 1).is_none());
        assert_eq!(table.len(), 1);
        assert_eq!(table.pending_for(1), 1);
    }

    #[test]
    fn oldest_first() {
        let mut table = PendingTable::new();
        table.insert(5, send(1, 0));
        table.insert(5, send(1, 8));

        assert_eq!(
            table.find_and_remove(5, 1).unwrap().src(),
            Some(GlobalPtr::new(0, 0))
        );
        assert_eq!(
            table.find_and_remove(5, 1).unwrap().src(),
            Some(GlobalPtr::new(0, 8))
        );
        assert!(table.is_empty());
        assert!(table.ranks().is_empty());
        assert_eq!(table.iter_rank(5).count(), 0);
    }
}
