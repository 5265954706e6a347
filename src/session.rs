use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use tracing::debug;

/// One randomized pass over a fixed universe of items.
///
/// Rules:
/// - `initialize` shuffles the given items into `order` and rewinds the cursor.
/// - `reset` reshuffles the items already held and rewinds the cursor.
/// - `next_batch` hands out `order[cursor..cursor + n]` and advances the cursor,
///   so every item is served exactly once per pass and batches never overlap.
///
/// Shuffling goes through [`SliceRandom::shuffle`], an in-place Fisher-Yates
/// (walk `i` from the last index down to 1, swap with a uniform `j` in `0..=i`).
#[derive(Debug)]
pub struct PhotoSession<T, R = StdRng> {
    order: Vec<T>,
    cursor: usize,
    rng: R,
}

impl<T> PhotoSession<T, StdRng> {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }
}

impl<T> Default for PhotoSession<T, StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, R: rand::Rng> PhotoSession<T, R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            order: Vec::new(),
            cursor: 0,
            rng,
        }
    }

    /// Replace the universe with a fresh permutation of `items`.
    pub fn initialize<I>(&mut self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        self.order = items.into_iter().collect();
        self.order.shuffle(&mut self.rng);
        self.cursor = 0;
        debug!(total = self.order.len(), "session initialized");
    }

    /// Reshuffle the held universe without fetching anything new.
    pub fn reset(&mut self) {
        self.order.shuffle(&mut self.rng);
        self.cursor = 0;
        debug!(total = self.order.len(), "session reset");
    }

    pub fn has_more(&self) -> bool {
        self.cursor < self.order.len()
    }

    pub fn total_count(&self) -> usize {
        self.order.len()
    }

    pub fn shown_count(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.order.len() - self.cursor
    }
}

impl<T: Clone, R: rand::Rng> PhotoSession<T, R> {
    /// Serve up to `count` unseen items; short or empty once the pass runs out.
    pub fn next_batch(&mut self, count: usize) -> Vec<T> {
        let end = self.cursor.saturating_add(count).min(self.order.len());
        let batch = self.order[self.cursor..end].to_vec();
        self.cursor = end;
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn drain<R: rand::Rng>(session: &mut PhotoSession<u32, R>, batch: usize) -> Vec<Vec<u32>> {
        let mut batches = Vec::new();
        while session.has_more() {
            batches.push(session.next_batch(batch));
        }
        batches
    }

    #[test]
    fn full_pass_covers_every_item_once() {
        let mut session = PhotoSession::seeded(7);
        session.initialize(0..103u32);
        let batches = drain(&mut session, 10);

        assert_eq!(batches.len(), 11);
        let mut flat: Vec<u32> = batches.concat();
        flat.sort_unstable();
        assert_eq!(flat, (0..103).collect::<Vec<_>>());
        assert_eq!(session.shown_count(), 103);
        assert_eq!(session.remaining(), 0);
    }

    #[test]
    fn batches_never_share_items() {
        let mut session = PhotoSession::seeded(11);
        session.initialize(0..57u32);
        let mut seen = HashSet::new();
        for batch in drain(&mut session, 8) {
            for item in batch {
                assert!(seen.insert(item), "item {item} served twice");
            }
        }
    }

    #[test]
    fn batch_is_short_only_at_the_tail() {
        let mut session = PhotoSession::seeded(3);
        session.initialize(0..25u32);
        assert_eq!(session.next_batch(10).len(), 10);
        assert_eq!(session.next_batch(10).len(), 10);
        assert_eq!(session.next_batch(10).len(), 5);
        assert!(!session.has_more());
    }

    #[test]
    fn zero_count_returns_empty_without_advancing() {
        let mut session = PhotoSession::seeded(1);
        session.initialize(0..4u32);
        assert!(session.next_batch(0).is_empty());
        assert_eq!(session.shown_count(), 0);
        assert!(session.has_more());
    }

    #[test]
    fn exhausted_session_stays_exhausted() {
        let mut session = PhotoSession::seeded(5);
        session.initialize(0..3u32);
        assert_eq!(session.next_batch(usize::MAX).len(), 3);
        for _ in 0..5 {
            assert!(session.next_batch(10).is_empty());
            assert!(!session.has_more());
        }
        assert_eq!(session.shown_count(), 3);
    }

    #[test]
    fn empty_universe_has_nothing_to_serve() {
        let mut session: PhotoSession<u32> = PhotoSession::seeded(9);
        session.initialize(Vec::new());
        assert!(!session.has_more());
        assert_eq!(session.total_count(), 0);
        assert!(session.next_batch(10).is_empty());
        session.reset();
        assert!(!session.has_more());
    }

    #[test]
    fn reset_rewinds_and_covers_again() {
        let mut session = PhotoSession::seeded(21);
        session.initialize(0..30u32);
        let first_pass: Vec<u32> = drain(&mut session, 7).concat();

        session.reset();
        assert_eq!(session.shown_count(), 0);
        assert!(session.has_more());
        assert_eq!(session.total_count(), 30);

        let second_pass: Vec<u32> = drain(&mut session, 7).concat();
        let mut sorted = second_pass.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..30).collect::<Vec<_>>());
        // 30! orderings; an identical pass would mean reset did not reshuffle.
        assert_ne!(first_pass, second_pass);
    }

    #[test]
    fn duplicate_inputs_are_served_as_distinct_entries() {
        let mut session = PhotoSession::seeded(2);
        session.initialize(vec![1u32, 1, 2]);
        let mut served = drain(&mut session, 2).concat();
        served.sort_unstable();
        assert_eq!(served, vec![1, 1, 2]);
    }

    #[test]
    fn positions_are_uniform_across_shuffles() {
        const ITEMS: usize = 5;
        const TRIALS: usize = 20_000;
        let mut counts = [[0usize; ITEMS]; ITEMS];
        let mut session = PhotoSession::seeded(0xDEC0_D1A5);
        for _ in 0..TRIALS {
            session.initialize(0..ITEMS as u32);
            for (pos, item) in session.next_batch(ITEMS).into_iter().enumerate() {
                counts[item as usize][pos] += 1;
            }
        }

        let expected = TRIALS / ITEMS;
        // Binomial sd is ~57 here; 300 is more than five of them.
        for (item, row) in counts.iter().enumerate() {
            for (pos, &count) in row.iter().enumerate() {
                assert!(
                    count.abs_diff(expected) < 300,
                    "item {item} landed in slot {pos} {count} times (expected ~{expected})"
                );
            }
        }
    }
}
