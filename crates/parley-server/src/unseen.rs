//! Per-recipient, per-conversation unseen counters.
//!
//! Counters are derived state. The store can always answer the same question,
//! so a counter that drifts (crash mid-fanout, restart) is simply rebuilt when
//! its owner reconnects.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use parley_shared::protocol::UnseenCount;
use parley_shared::{Conversation, UserId};

#[derive(Default)]
struct Inner {
    counts: HashMap<(UserId, Conversation), u32>,
    /// The conversation each user's client currently has open.
    viewing: HashMap<UserId, Conversation>,
}

#[derive(Clone, Default)]
pub struct UnseenCounter {
    inner: Arc<RwLock<Inner>>,
}

impl UnseenCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump the counter unless `recipient` is looking at `conversation` right
    /// now. Returns whether it was bumped.
    pub async fn increment(&self, recipient: UserId, conversation: Conversation) -> bool {
        let mut inner = self.inner.write().await;
        if inner.viewing.get(&recipient) == Some(&conversation) {
            return false;
        }
        *inner.counts.entry((recipient, conversation)).or_insert(0) += 1;
        true
    }

    /// One message left the unread set. Never goes below zero.
    pub async fn decrement(&self, recipient: UserId, conversation: Conversation) {
        let mut inner = self.inner.write().await;
        if let Some(count) = inner.counts.get_mut(&(recipient, conversation)) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                inner.counts.remove(&(recipient, conversation));
            }
        }
    }

    pub async fn reset(&self, recipient: UserId, conversation: Conversation) {
        self.inner
            .write()
            .await
            .counts
            .remove(&(recipient, conversation));
    }

    pub async fn get(&self, recipient: UserId, conversation: Conversation) -> u32 {
        self.inner
            .read()
            .await
            .counts
            .get(&(recipient, conversation))
            .copied()
            .unwrap_or(0)
    }

    /// Non-zero counters of one recipient, ordered by conversation.
    pub async fn counts_for(&self, recipient: UserId) -> Vec<UnseenCount> {
        let inner = self.inner.read().await;
        let mut counts: Vec<UnseenCount> = inner
            .counts
            .iter()
            .filter(|((user, _), count)| *user == recipient && **count > 0)
            .map(|((_, conversation), count)| UnseenCount {
                conversation: *conversation,
                count: *count,
            })
            .collect();
        counts.sort_by_key(|c| c.conversation);
        counts
    }

    /// Replace every counter of `recipient` with `counts` from the store.
    pub async fn rebuild(&self, recipient: UserId, counts: HashMap<Conversation, u32>) {
        let mut inner = self.inner.write().await;
        inner.counts.retain(|(user, _), _| *user != recipient);
        let conversations = counts.len();
        for (conversation, count) in counts {
            if count > 0 {
                inner.counts.insert((recipient, conversation), count);
            }
        }
        debug!(user = %recipient, conversations, "Unseen counters rebuilt");
    }

    pub async fn set_viewing(&self, user: UserId, conversation: Option<Conversation>) {
        let mut inner = self.inner.write().await;
        match conversation {
            Some(conversation) => inner.viewing.insert(user, conversation),
            None => inner.viewing.remove(&user),
        };
    }
}
