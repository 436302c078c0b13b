//! Ordered play queue with order modes and a cursor.

use crate::identity::BeatmapIdentity;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Order in which the queue is walked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayMode {
    #[default]
    Sequential,
    Shuffle,
    RepeatOne,
    RepeatAll,
}

impl PlayMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Shuffle => "shuffle",
            Self::RepeatOne => "repeat_one",
            Self::RepeatAll => "repeat_all",
        }
    }

    /// Whether walking past either end continues from the other end
    #[must_use]
    pub const fn wraps(self) -> bool {
        !matches!(self, Self::Sequential)
    }
}

impl std::fmt::Display for PlayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Play queue owned by the session controller.
///
/// `order` maps play positions to indices into `items`. Outside shuffle mode it
/// is the identity permutation; in shuffle mode it is a cyclic derangement, so
/// no item keeps its original slot and consecutive cycles never start with the
/// item that just played.
#[derive(Debug, Clone, Default)]
pub struct PlayQueue {
    items: Vec<BeatmapIdentity>,
    order: Vec<usize>,
    position: Option<usize>,
    mode: PlayMode,
}

impl PlayQueue {
    #[must_use]
    pub fn new(mode: PlayMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Build a queue over `items` with the cursor unset.
    #[must_use]
    pub fn with_items(items: Vec<BeatmapIdentity>, mode: PlayMode) -> Self {
        let mut queue = Self::new(mode);
        queue.items = items;
        queue.rebuild_order(&mut rand::thread_rng());
        queue
    }

    #[must_use]
    pub fn items(&self) -> &[BeatmapIdentity] {
        &self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub const fn mode(&self) -> PlayMode {
        self.mode
    }

    /// Index into [`items`](Self::items) of the item under the cursor
    #[must_use]
    pub fn cursor(&self) -> Option<usize> {
        self.position.and_then(|p| self.order.get(p).copied())
    }

    #[must_use]
    pub fn current(&self) -> Option<&BeatmapIdentity> {
        self.cursor().and_then(|i| self.items.get(i))
    }

    /// Identity at a play position
    #[must_use]
    pub fn at(&self, position: usize) -> Option<&BeatmapIdentity> {
        self.order.get(position).and_then(|&i| self.items.get(i))
    }

    /// Identities in play order
    pub fn play_order(&self) -> impl Iterator<Item = &BeatmapIdentity> {
        self.order.iter().filter_map(|&i| self.items.get(i))
    }

    /// Move the cursor to a play position returned by [`candidates`](Self::candidates).
    pub fn commit(&mut self, position: usize) {
        if position < self.order.len() {
            self.position = Some(position);
        }
    }

    /// Point the cursor at the first play position holding `identity`.
    pub fn seek_to(&mut self, identity: &BeatmapIdentity) -> bool {
        let found = self
            .order
            .iter()
            .position(|&i| self.items.get(i) == Some(identity));
        if found.is_some() {
            self.position = found;
        }
        found.is_some()
    }

    pub fn clear_cursor(&mut self) {
        self.position = None;
    }

    /// Switch order mode, keeping the current item under the cursor.
    pub fn set_mode(&mut self, mode: PlayMode) {
        self.set_mode_with(mode, &mut rand::thread_rng());
    }

    pub(crate) fn set_mode_with<R: Rng + ?Sized>(&mut self, mode: PlayMode, rng: &mut R) {
        let current = self.cursor();
        self.mode = mode;
        self.rebuild_order(rng);
        self.position = current.and_then(|index| self.order.iter().position(|&i| i == index));
    }

    /// Play positions to try, in order, when moving in `direction`.
    ///
    /// With `finished` set the move is an automatic advance after the track
    /// ended, which replays the current item in repeat-one mode. Advancing past
    /// the end in shuffle mode draws a fresh derangement whose first item is
    /// not the one that just played; the cursor is remapped onto it.
    pub fn candidates(&mut self, direction: Direction, finished: bool) -> Vec<usize> {
        self.candidates_with(direction, finished, &mut rand::thread_rng())
    }

    pub(crate) fn candidates_with<R: Rng + ?Sized>(
        &mut self,
        direction: Direction,
        finished: bool,
        rng: &mut R,
    ) -> Vec<usize> {
        let len = self.order.len();
        if len == 0 {
            return Vec::new();
        }

        let Some(position) = self.position else {
            return match direction {
                Direction::Forward => (0..len).collect(),
                Direction::Backward => (0..len).rev().collect(),
            };
        };

        if finished && self.mode == PlayMode::RepeatOne {
            return vec![position];
        }

        match direction {
            Direction::Forward => {
                let mut positions: Vec<usize> = (position + 1..len).collect();
                if self.mode == PlayMode::Shuffle {
                    if positions.is_empty() {
                        let just_played = self.order[position];
                        self.reshuffle(Some(just_played), rng);
                        self.position = self.order.iter().position(|&i| i == just_played);
                        positions = (0..len).filter(|&p| self.order[p] != just_played).collect();
                        if len == 1 {
                            positions.push(0);
                        }
                    } else {
                        positions.extend(0..=position);
                    }
                } else if self.mode.wraps() {
                    positions.extend(0..=position);
                }
                positions
            }
            Direction::Backward => {
                let mut positions: Vec<usize> = (0..position).rev().collect();
                if self.mode.wraps() {
                    positions.extend((position..len).rev());
                }
                positions
            }
        }
    }

    fn rebuild_order<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if self.mode == PlayMode::Shuffle {
            self.reshuffle(None, rng);
        } else {
            self.order = (0..self.items.len()).collect();
        }
    }

    /// Sattolo's algorithm: a uniformly random single cycle, hence a derangement.
    ///
    /// Draws again until the first item differs from `avoid_first`. Two items
    /// have only one derangement, which is kept as is.
    fn reshuffle<R: Rng + ?Sized>(&mut self, avoid_first: Option<usize>, rng: &mut R) {
        let len = self.items.len();
        loop {
            let mut order: Vec<usize> = (0..len).collect();
            for i in (1..len).rev() {
                let j = rng.gen_range(0..i);
                order.swap(i, j);
            }
            let accepted = len < 3 || order.first() != avoid_first.as_ref();
            self.order = order;
            if accepted {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ids(n: usize) -> Vec<BeatmapIdentity> {
        (0..n)
            .map(|i| BeatmapIdentity::new(format!("{i} Artist - Title"), "Normal"))
            .collect()
    }

    fn shuffled(n: usize, seed: u64) -> (PlayQueue, StdRng) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut queue = PlayQueue::with_items(ids(n), PlayMode::Sequential);
        queue.set_mode_with(PlayMode::Shuffle, &mut rng);
        (queue, rng)
    }

    #[test]
    fn test_fresh_queue_has_no_cursor() {
        let queue = PlayQueue::with_items(ids(3), PlayMode::Sequential);
        assert_eq!(queue.cursor(), None);
        assert!(queue.current().is_none());
    }

    #[test]
    fn test_empty_queue_has_no_candidates() {
        let mut queue = PlayQueue::new(PlayMode::RepeatAll);
        assert!(queue.candidates(Direction::Forward, false).is_empty());
        assert!(queue.candidates(Direction::Backward, true).is_empty());
    }

    #[test]
    fn test_sequential_stops_at_ends() {
        let mut queue = PlayQueue::with_items(ids(3), PlayMode::Sequential);
        queue.commit(2);
        assert!(queue.candidates(Direction::Forward, false).is_empty());

        queue.commit(0);
        assert!(queue.candidates(Direction::Backward, false).is_empty());
        assert_eq!(queue.candidates(Direction::Forward, false), vec![1, 2]);
    }

    #[test]
    fn test_repeat_all_wraps() {
        let mut queue = PlayQueue::with_items(ids(3), PlayMode::RepeatAll);
        queue.commit(2);
        assert_eq!(queue.candidates(Direction::Forward, false), vec![0, 1, 2]);

        queue.commit(0);
        assert_eq!(queue.candidates(Direction::Backward, false), vec![2, 1, 0]);
    }

    #[test]
    fn test_repeat_one_replays_on_finish_only() {
        let mut queue = PlayQueue::with_items(ids(3), PlayMode::RepeatOne);
        queue.commit(1);
        assert_eq!(queue.candidates(Direction::Forward, true), vec![1]);
        assert_eq!(queue.candidates(Direction::Forward, false), vec![2, 0, 1]);
    }

    #[test]
    fn test_shuffle_is_derangement() {
        for seed in 0..20 {
            let (queue, _) = shuffled(6, seed);
            for (position, &index) in queue.order.iter().enumerate() {
                assert_ne!(position, index, "seed {seed} left item {index} in place");
            }
            let mut sorted = queue.order.clone();
            sorted.sort_unstable();
            assert_eq!(sorted, (0..6).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_shuffle_wrap_does_not_repeat_last_item() {
        for seed in 0..20 {
            let (mut queue, mut rng) = shuffled(4, seed);
            queue.commit(3);
            let just_played = queue.cursor().unwrap();

            let candidates = queue.candidates_with(Direction::Forward, false, &mut rng);
            assert_eq!(candidates.len(), 3);
            let first = queue.at(candidates[0]).unwrap();
            assert_ne!(first, &queue.items()[just_played]);
            // cursor still points at the item that just played
            assert_eq!(queue.cursor(), Some(just_played));
        }
    }

    #[test]
    fn test_shuffle_wrap_keeps_derangement() {
        for len in 2..6 {
            for seed in 0..20 {
                let (mut queue, mut rng) = shuffled(len, seed);
                queue.commit(len - 1);
                queue.candidates_with(Direction::Forward, false, &mut rng);

                for (position, &index) in queue.order.iter().enumerate() {
                    assert_ne!(position, index, "len {len} seed {seed} left item {index} in place");
                }
            }
        }
    }

    #[test]
    fn test_two_item_shuffle_alternates() {
        let (mut queue, mut rng) = shuffled(2, 3);
        assert_eq!(queue.order, vec![1, 0]);

        queue.commit(1);
        let candidates = queue.candidates_with(Direction::Forward, false, &mut rng);
        assert_eq!(queue.order, vec![1, 0]);
        assert_eq!(candidates, vec![0]);
        assert_eq!(queue.at(candidates[0]), Some(&queue.items()[1]));
    }

    #[test]
    fn test_single_item_shuffle_wrap_replays() {
        let (mut queue, mut rng) = shuffled(1, 7);
        queue.commit(0);
        assert_eq!(
            queue.candidates_with(Direction::Forward, false, &mut rng),
            vec![0]
        );
    }

    #[test]
    fn test_set_mode_keeps_current_item() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut queue = PlayQueue::with_items(ids(5), PlayMode::Sequential);
        queue.commit(3);
        let before = queue.current().cloned();

        queue.set_mode_with(PlayMode::Shuffle, &mut rng);
        assert_eq!(queue.current().cloned(), before);

        queue.set_mode_with(PlayMode::Sequential, &mut rng);
        assert_eq!(queue.cursor(), Some(3));
    }

    #[test]
    fn test_seek_to() {
        let items = ids(3);
        let mut queue = PlayQueue::with_items(items.clone(), PlayMode::Sequential);
        assert!(queue.seek_to(&items[2]));
        assert_eq!(queue.cursor(), Some(2));
        assert!(!queue.seek_to(&BeatmapIdentity::new("missing", "Hard")));
        assert_eq!(queue.cursor(), Some(2));
    }

    #[test]
    fn test_play_mode_serde_names() {
        assert_eq!(serde_json::to_string(&PlayMode::RepeatOne).unwrap(), "\"repeat_one\"");
        let mode: PlayMode = serde_json::from_str("\"shuffle\"").unwrap();
        assert_eq!(mode, PlayMode::Shuffle);
    }
}
