//! # BubbleKit Notification Queue
//!
//! Ordered, capacity-bounded holding area for bubbles awaiting or under
//! display. Owned exclusively by the widget frame; the UI layer only renders
//! what the queue holds.
//!
//! Ordering is newest-first for display. Eviction is FIFO: when an insert
//! would exceed capacity, the entry with the oldest `created_at` among the
//! current members is removed, never the least recently used.

use bubblekit_core::{Bubble, BubbleId, BubbleState};
use std::collections::VecDeque;
use tracing::debug;

/// Outcome of an enqueue, reported so the renderer can drop the evicted
/// element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    pub id: BubbleId,
    pub evicted: Option<BubbleId>,
}

/// Bounded bubble queue, newest-first.
#[derive(Debug)]
pub struct BubbleQueue {
    bubbles: VecDeque<Bubble>,
    capacity: usize,
}

impl BubbleQueue {
    /// Create a queue holding at most `capacity` bubbles. A zero capacity
    /// is clamped to one; the protocol never produces one, but the store
    /// value is user-writable.
    pub fn new(capacity: usize) -> Self {
        Self {
            bubbles: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a bubble at the front (most recent first). Evicts the oldest
    /// surviving entry when over capacity.
    pub fn enqueue(&mut self, bubble: Bubble) -> Enqueued {
        let id = bubble.id;
        self.bubbles.push_front(bubble);

        let mut evicted = None;
        while self.bubbles.len() > self.capacity {
            evicted = self.evict_oldest();
        }

        debug!(?id, ?evicted, len = self.bubbles.len(), "Bubble enqueued");
        Enqueued { id, evicted }
    }

    /// Remove a specific bubble. Absent ids are a success no-op: the user
    /// may dismiss a bubble that capacity eviction already removed.
    pub fn dismiss(&mut self, id: BubbleId) -> bool {
        if let Some(idx) = self.bubbles.iter().position(|b| b.id == id) {
            self.bubbles.remove(idx);
            debug!(?id, len = self.bubbles.len(), "Bubble dismissed");
            true
        } else {
            debug!(?id, "Dismiss for absent bubble ignored");
            false
        }
    }

    /// Replace a loading placeholder with final content, in place. The
    /// entry keeps its id, `created_at`, and queue position; nothing is
    /// re-inserted or reordered. No-op when the id is gone (evicted or
    /// dismissed before the fill-in resolved).
    pub fn settle(
        &mut self,
        id: BubbleId,
        title: impl Into<String>,
        content: impl Into<String>,
        full_description: impl Into<String>,
    ) -> bool {
        match self.bubbles.iter_mut().find(|b| b.id == id) {
            Some(bubble) => {
                bubble.title = title.into();
                bubble.content = content.into();
                bubble.full_description = full_description.into();
                bubble.state = BubbleState::Settled;
                debug!(?id, "Bubble settled");
                true
            }
            None => {
                debug!(?id, "Settle for absent bubble ignored");
                false
            }
        }
    }

    /// Change capacity, trimming oldest entries when shrinking.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.bubbles.len() > self.capacity {
            self.evict_oldest();
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.bubbles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bubbles.is_empty()
    }

    pub fn get(&self, id: BubbleId) -> Option<&Bubble> {
        self.bubbles.iter().find(|b| b.id == id)
    }

    /// Bubbles in display order, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Bubble> {
        self.bubbles.iter()
    }

    pub fn clear(&mut self) {
        self.bubbles.clear();
    }

    fn evict_oldest(&mut self) -> Option<BubbleId> {
        // The back of the deque is the oldest insertion; created_at ties
        // break toward it.
        let mut oldest: Option<(usize, u64)> = None;
        for (idx, bubble) in self.bubbles.iter().enumerate().rev() {
            match oldest {
                Some((_, ts)) if bubble.created_at >= ts => {}
                _ => oldest = Some((idx, bubble.created_at)),
            }
        }
        let evicted = self.bubbles.remove(oldest?.0)?;
        debug!(id = ?evicted.id, "Bubble evicted");
        Some(evicted.id)
    }
}
