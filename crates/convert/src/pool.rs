//! The per-key pool of unassigned slot numbers used during bulk load.

use rand::seq::SliceRandom;
use rand::Rng;

/// Slots still available for one primary key: a shuffled vector consumed
/// from the end, so draw-and-remove is O(1).
pub struct SlotPool {
    slots: Vec<i32>,
}

impl SlotPool {
    pub fn shuffled(max_nodes: u32, rng: &mut impl Rng) -> SlotPool {
        let mut slots: Vec<i32> = (0..max_nodes as i32).collect();
        slots.shuffle(rng);
        SlotPool { slots }
    }

    /// Removes and returns a uniformly random remaining slot.
    pub fn draw(&mut self) -> Option<i32> {
        self.slots.pop()
    }

    pub fn remaining(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_draws_every_slot_exactly_once() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut pool = SlotPool::shuffled(8, &mut rng);

        let mut seen = HashSet::new();
        while let Some(rk) = pool.draw() {
            assert!((0..8).contains(&rk));
            assert!(seen.insert(rk), "slot {rk} drawn twice");
        }
        assert_eq!(seen.len(), 8);
        assert_eq!(pool.remaining(), 0);
        assert_eq!(pool.draw(), None);
    }

    #[test]
    fn test_remaining_tracks_draws() {
        let mut rng = SmallRng::seed_from_u64(1);
        let mut pool = SlotPool::shuffled(4, &mut rng);
        assert_eq!(pool.remaining(), 4);
        pool.draw().unwrap();
        pool.draw().unwrap();
        assert_eq!(pool.remaining(), 2);
    }
}
