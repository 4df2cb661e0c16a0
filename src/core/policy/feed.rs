// src/core/policy/feed.rs

//! The rule-server updates feed: a monotone sequence counter over published
//! deltas, with a bounded ring buffer so web consumers can catch up from a
//! since-token without replaying the full rule set.

use crate::core::policy::list::RuleDelta;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// How many deltas the ring buffer retains. A consumer whose token has
/// fallen off the buffer must resynchronize from a full snapshot.
pub const FEED_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct FeedInner {
    next_seq: u64,
    entries: VecDeque<(u64, RuleDelta)>,
}

/// What a `since` query returns.
#[derive(Debug, Clone)]
pub struct FeedPage {
    /// Deltas newer than the supplied token, oldest first.
    pub entries: Vec<(u64, RuleDelta)>,
    /// The token to pass on the next call.
    pub next_token: u64,
    /// True when the supplied token predates the buffer and deltas were lost.
    pub gapped: bool,
}

#[derive(Debug, Default)]
pub struct RuleFeed {
    inner: Mutex<FeedInner>,
}

impl RuleFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a delta and returns its sequence number.
    pub fn push(&self, delta: RuleDelta) -> u64 {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        if inner.entries.len() == FEED_CAPACITY {
            inner.entries.pop_front();
        }
        inner.entries.push_back((seq, delta));
        seq
    }

    /// The token a brand-new consumer should start from.
    pub fn current_token(&self) -> u64 {
        self.inner.lock().next_seq
    }

    /// Returns all deltas with sequence ≥ `token`.
    pub fn since(&self, token: u64) -> FeedPage {
        let inner = self.inner.lock();
        let oldest = inner.entries.front().map(|(seq, _)| *seq).unwrap_or(inner.next_seq);
        let entries: Vec<_> = inner
            .entries
            .iter()
            .filter(|(seq, _)| *seq >= token)
            .cloned()
            .collect();
        FeedPage {
            entries,
            next_token: inner.next_seq,
            gapped: token < oldest,
        }
    }
}
