//! Client-side record of intended creation order.
//!
//! Slots are reserved before a stage is dispatched and filled as successful
//! completions arrive, in any order. Iteration always follows the reserved
//! (client-intended) order; slots whose request failed stay empty and are
//! skipped.

use std::collections::HashMap;

use hoyobar_core::{ListedReply, PostId, PostRecord, ReplyRecord};

/// A contiguous range of ledger slots reserved for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    base: usize,
    len: usize,
}

impl Reservation {
    /// Number of reserved slots.
    #[must_use]
    pub const fn len(self) -> usize {
        self.len
    }

    /// Returns true if nothing was reserved.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.len == 0
    }

    const fn index(self, slot: usize) -> Option<usize> {
        if slot < self.len {
            Some(self.base + slot)
        } else {
            None
        }
    }
}

#[derive(Debug)]
struct Section<T> {
    entries: Vec<Option<T>>,
}

impl<T> Default for Section<T> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T> Section<T> {
    fn reserve(&mut self, count: usize) -> Reservation {
        let base = self.entries.len();
        self.entries.resize_with(base + count, || None);
        Reservation { base, len: count }
    }

    fn fill(&mut self, reservation: Reservation, slot: usize, value: T) -> bool {
        let Some(index) = reservation.index(slot) else {
            return false;
        };
        match self.entries.get_mut(index) {
            Some(entry) if entry.is_none() => {
                *entry = Some(value);
                true
            }
            _ => false,
        }
    }

    fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.entries.iter().flatten()
    }

    fn filled(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}

/// Intended creation order of posts and replies.
#[derive(Debug, Default)]
pub struct CreationLedger {
    posts: Section<PostRecord>,
    replies: Section<ReplyRecord>,
    replies_by_post: HashMap<PostId, Vec<usize>>,
}

impl CreationLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `count` post slots, in dispatch order.
    pub fn reserve_posts(&mut self, count: usize) -> Reservation {
        self.posts.reserve(count)
    }

    /// Reserves `count` reply slots, in dispatch order.
    pub fn reserve_replies(&mut self, count: usize) -> Reservation {
        self.replies.reserve(count)
    }

    /// Fills a reserved post slot. Returns false if the slot is outside the
    /// reservation or already filled.
    pub fn fill_post(&mut self, reservation: Reservation, slot: usize, post: PostRecord) -> bool {
        self.posts.fill(reservation, slot, post)
    }

    /// Fills a reserved reply slot. Returns false if the slot is outside the
    /// reservation or already filled.
    pub fn fill_reply(&mut self, reservation: Reservation, slot: usize, reply: ReplyRecord) -> bool {
        let post_id = reply.post_id;
        let Some(index) = reservation.index(slot) else {
            return false;
        };
        if !self.replies.fill(reservation, slot, reply) {
            return false;
        }
        let positions = self.replies_by_post.entry(post_id).or_default();
        let at = positions.partition_point(|&p| p < index);
        positions.insert(at, index);
        true
    }

    /// Created posts, oldest first.
    pub fn posts(&self) -> impl DoubleEndedIterator<Item = &PostRecord> {
        self.posts.iter()
    }

    /// Created replies, oldest first.
    pub fn replies(&self) -> impl DoubleEndedIterator<Item = &ReplyRecord> {
        self.replies.iter()
    }

    /// Number of created posts.
    #[must_use]
    pub fn post_count(&self) -> usize {
        self.posts.filled()
    }

    /// Number of created replies.
    #[must_use]
    pub fn reply_count(&self) -> usize {
        self.replies.filled()
    }

    /// The first post created.
    #[must_use]
    pub fn oldest_post(&self) -> Option<&PostRecord> {
        self.posts.iter().next()
    }

    /// Posts as a `create_time` list should return them.
    #[must_use]
    pub fn expected_posts_most_recent_first(&self) -> Vec<PostRecord> {
        self.posts.iter().rev().cloned().collect()
    }

    /// Replies to `post_id` as the reply list should return them.
    #[must_use]
    pub fn expected_replies_most_recent_first(&self, post_id: PostId) -> Vec<ListedReply> {
        self.replies_by_post
            .get(&post_id)
            .map(|positions| {
                positions
                    .iter()
                    .rev()
                    .filter_map(|&index| self.replies.entries.get(index).and_then(Option::as_ref))
                    .map(ListedReply::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Posts with at least one reply, oldest post first.
    #[must_use]
    pub fn posts_with_replies(&self) -> Vec<PostId> {
        self.posts
            .iter()
            .filter(|post| self.replies_by_post.contains_key(&post.post_id))
            .map(|post| post.post_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use hoyobar_core::{ReplyId, UserId};

    use super::*;

    fn post(id: u64) -> PostRecord {
        PostRecord {
            post_id: PostId::new(id),
            author_id: UserId::new(1),
            title: format!("t{id}"),
            content: format!("c{id}"),
        }
    }

    fn reply(id: u64, post_id: u64) -> ReplyRecord {
        ReplyRecord {
            reply_id: ReplyId::new(id),
            author_id: UserId::new(2),
            post_id: PostId::new(post_id),
            content: format!("r{id}"),
        }
    }

    #[test]
    fn test_order_follows_slots_not_arrival() {
        let mut ledger = CreationLedger::new();
        let reservation = ledger.reserve_posts(3);

        assert!(ledger.fill_post(reservation, 2, post(30)));
        assert!(ledger.fill_post(reservation, 0, post(10)));
        assert!(ledger.fill_post(reservation, 1, post(20)));

        let ids: Vec<u64> = ledger.posts().map(|p| p.post_id.get()).collect();
        assert_eq!(ids, vec![10, 20, 30]);
        let expected: Vec<u64> = ledger
            .expected_posts_most_recent_first()
            .iter()
            .map(|p| p.post_id.get())
            .collect();
        assert_eq!(expected, vec![30, 20, 10]);
        assert_eq!(ledger.oldest_post().unwrap().post_id, PostId::new(10));
    }

    #[test]
    fn test_failed_slots_are_skipped() {
        let mut ledger = CreationLedger::new();
        let reservation = ledger.reserve_posts(3);
        ledger.fill_post(reservation, 0, post(1));
        ledger.fill_post(reservation, 2, post(3));
        assert_eq!(ledger.post_count(), 2);
        assert_eq!(ledger.posts().count(), 2);
    }

    #[test]
    fn test_fill_rejects_out_of_range_and_refill() {
        let mut ledger = CreationLedger::new();
        let reservation = ledger.reserve_posts(1);
        assert!(!ledger.fill_post(reservation, 1, post(1)));
        assert!(ledger.fill_post(reservation, 0, post(1)));
        assert!(!ledger.fill_post(reservation, 0, post(2)));
    }

    #[test]
    fn test_reservations_append() {
        let mut ledger = CreationLedger::new();
        let first = ledger.reserve_posts(1);
        let second = ledger.reserve_posts(1);
        ledger.fill_post(second, 0, post(2));
        ledger.fill_post(first, 0, post(1));
        let ids: Vec<u64> = ledger.posts().map(|p| p.post_id.get()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_replies_grouped_by_post() {
        let mut ledger = CreationLedger::new();
        let posts = ledger.reserve_posts(2);
        ledger.fill_post(posts, 0, post(1));
        ledger.fill_post(posts, 1, post(2));

        let replies = ledger.reserve_replies(3);
        ledger.fill_reply(replies, 2, reply(102, 1));
        ledger.fill_reply(replies, 0, reply(100, 1));
        ledger.fill_reply(replies, 1, reply(101, 2));

        let for_first: Vec<u64> = ledger
            .expected_replies_most_recent_first(PostId::new(1))
            .iter()
            .map(|r| r.reply_id.get())
            .collect();
        assert_eq!(for_first, vec![102, 100]);
        assert_eq!(ledger.reply_count(), 3);
        assert_eq!(ledger.posts_with_replies(), vec![PostId::new(1), PostId::new(2)]);
        assert!(ledger.expected_replies_most_recent_first(PostId::new(9)).is_empty());
    }
}
