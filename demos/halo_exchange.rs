#![deny(warnings)]
extern crate pgas_rendezvous;

use pgas_rendezvous::prelude::*;

const RANKS: usize = 4;
const CELLS: usize = 8;

/// Every rank owns `CELLS` bytes of interior followed by one ghost cell. Each rank sends its last
/// interior cell into the ghost cell of its right neighbour.
///
/// The matcher runs on the sending side, so every rank has its own context. A receiver's request
/// is relayed to the context of its left neighbour, the way a transport would deliver it.
fn main() {
    let segments = Segments::new(RANKS, CELLS + 1);
    let contexts: Vec<_> = (0..RANKS)
        .map(|rank| {
            Context::new(
                Config::new(rank as Rank, RANKS),
                LoopbackEngine::new(segments.clone()),
            )
            .unwrap()
        })
        .collect();
    let channel = Channel::new("fill boundary");

    for rank in 0..RANKS {
        let interior = segments.ptr(rank as Rank, 0).unwrap();
        segments.write(interior, &[rank as u8 + 1; CELLS]).unwrap();
    }

    // Receive requests first for odd ranks, sends first for even ones.
    for (rank, context) in contexts.iter().enumerate() {
        let right = ((rank + 1) % RANKS) as Rank;
        let neighbour = context.process_at_rank(right).unwrap();
        let last = segments.ptr(rank as Rank, CELLS - 1).unwrap();
        let ghost = segments.ptr(right, CELLS).unwrap();
        let tag = rank as Tag;

        if rank % 2 == 1 {
            neighbour.receive_into(ghost, 1, tag, &channel).unwrap();
            neighbour.send(last, 1, tag, &channel);
        } else {
            neighbour.send(last, 1, tag, &channel);
            neighbour.receive_into(ghost, 1, tag, &channel).unwrap();
        }
    }

    for context in &contexts {
        context.engine().progress().unwrap();
    }
    channel.wait_all();

    for rank in 0..RANKS {
        let ghost = segments.ptr(rank as Rank, CELLS).unwrap();
        let value = segments.read(ghost, 1).unwrap()[0];
        let left = (rank + RANKS - 1) % RANKS;
        println!("Process {} got ghost cell {} from process {}.", rank, value, left);
        assert_eq!(value, left as u8 + 1);
    }
    assert_eq!(channel.send_counter().get(), RANKS);
}
