//! Logical subscriptions and their consumer queues.
//!
//! The [`SubscriptionRegistry`] is owned by the connection driver and
//! outlives any one socket. Each entry fans frames out through a bounded
//! broadcast channel; consumers hold a [`Subscription`].

use std::collections::HashMap;

use futures_util::Stream;
use tokio::sync::{broadcast, mpsc};

use super::types::{Frame, SubscriptionId, SubscriptionKey};

/// Whether the venue currently knows about a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// Registered locally; the subscribe frame has not been sent on the
    /// current socket.
    Pending,
    /// Subscribe frame sent on the current socket.
    Active,
}

/// Snapshot of one registry entry.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub key: SubscriptionKey,
    pub status: SubscriptionStatus,
    pub consumers: usize,
}

struct Entry {
    key: SubscriptionKey,
    status: SubscriptionStatus,
    sender: broadcast::Sender<Frame>,
    consumers: usize,
    seq: u64,
}

/// All logically active subscriptions of one connection.
///
/// Identical channel+params share one entry; the entry is removed when its
/// last consumer goes away.
pub struct SubscriptionRegistry {
    entries: HashMap<SubscriptionId, Entry>,
    capacity: usize,
    next_seq: u64,
}

impl SubscriptionRegistry {
    /// `capacity` bounds each consumer queue.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            next_seq: 0,
        }
    }

    /// Add a consumer for `key`.
    ///
    /// Returns the consumer's queue and whether the entry is new (and so
    /// needs a subscribe frame).
    pub fn subscribe(&mut self, key: SubscriptionKey) -> (broadcast::Receiver<Frame>, bool) {
        let id = key.id();
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.consumers += 1;
            return (entry.sender.subscribe(), false);
        }

        let (sender, receiver) = broadcast::channel(self.capacity);
        self.next_seq += 1;
        self.entries.insert(
            id,
            Entry {
                key,
                status: SubscriptionStatus::Pending,
                sender,
                consumers: 1,
                seq: self.next_seq,
            },
        );
        (receiver, true)
    }

    /// Drop one consumer of `id`.
    ///
    /// When it was the last one the entry is removed and returned, so the
    /// caller can decide whether an unsubscribe frame is due.
    pub fn release(&mut self, id: &SubscriptionId) -> Option<(SubscriptionKey, SubscriptionStatus)> {
        let entry = self.entries.get_mut(id)?;
        entry.consumers = entry.consumers.saturating_sub(1);
        if entry.consumers > 0 {
            return None;
        }
        self.entries
            .remove(id)
            .map(|entry| (entry.key, entry.status))
    }

    pub fn mark_active(&mut self, id: &SubscriptionId) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.status = SubscriptionStatus::Active;
        }
    }

    /// The socket is gone: nothing is active any more.
    pub fn demote_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.status = SubscriptionStatus::Pending;
        }
    }

    /// Pending subscriptions in the order they were first requested.
    pub fn pending(&self) -> Vec<SubscriptionKey> {
        let mut pending: Vec<_> = self
            .entries
            .values()
            .filter(|entry| entry.status == SubscriptionStatus::Pending)
            .collect();
        pending.sort_by_key(|entry| entry.seq);
        pending.into_iter().map(|entry| entry.key.clone()).collect()
    }

    /// Push a frame to every consumer of `id`.
    ///
    /// Returns `false` when no such subscription exists. A full queue drops
    /// its oldest frame.
    pub fn dispatch(&self, id: &SubscriptionId, frame: Frame) -> bool {
        match self.entries.get(id) {
            Some(entry) => {
                let _ = entry.sender.send(frame);
                true
            }
            None => false,
        }
    }

    pub fn status(&self, id: &SubscriptionId) -> Option<SubscriptionStatus> {
        self.entries.get(id).map(|entry| entry.status)
    }

    pub fn snapshot(&self) -> Vec<SubscriptionInfo> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by_key(|(_, entry)| entry.seq);
        entries
            .into_iter()
            .map(|(id, entry)| SubscriptionInfo {
                id: id.clone(),
                key: entry.key.clone(),
                status: entry.status,
                consumers: entry.consumers,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry, ending all consumer streams.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// A caller's handle on one subscription: a cancelable, lazy sequence of
/// raw inbound frames.
///
/// Dropping it cancels. Frames arrive in socket order; if the consumer falls
/// more than the configured capacity behind, the oldest frames are skipped.
pub struct Subscription {
    id: SubscriptionId,
    rx: Option<broadcast::Receiver<Frame>>,
    release_tx: mpsc::UnboundedSender<SubscriptionId>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        rx: broadcast::Receiver<Frame>,
        release_tx: mpsc::UnboundedSender<SubscriptionId>,
    ) -> Self {
        Self {
            id,
            rx: Some(rx),
            release_tx,
        }
    }

    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn is_canceled(&self) -> bool {
        self.rx.is_none()
    }

    /// Receive the next frame.
    ///
    /// `None` once canceled or once the connection is closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(frame) => return Some(frame),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        subscription = %self.id,
                        skipped,
                        "Subscription consumer lagging, dropped oldest frames"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Stop delivery and release the subscription. Idempotent.
    ///
    /// The unsubscribe frame, if any, is sent by the connection in the
    /// background; failures there are logged, never surfaced.
    pub fn cancel(&mut self) {
        if self.rx.take().is_none() {
            return;
        }
        if self.release_tx.send(self.id.clone()).is_err() {
            tracing::trace!(subscription = %self.id, "Connection gone, nothing to release");
        }
    }

    /// Turn into a [`Stream`] of frames.
    pub fn into_stream(self) -> impl Stream<Item = Frame> + Send + 'static {
        futures_util::stream::unfold(self, |mut sub| async move {
            let frame = sub.recv().await?;
            Some((frame, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("canceled", &self.is_canceled())
            .finish()
    }
}
