// SPDX-License-Identifier: MIT OR Apache-2.0
//! Broadcast-based tape distribution for the observer stream (§4.7, §6).

use synapse_core::TapeEvent;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

/// Fans out every tape event to any number of observer subscribers.
///
/// Mirrors the teacher's broadcast-channel event bus: a lagging or absent
/// subscriber never blocks the exchange, it simply misses events (and a
/// fresh subscriber is caught up via the `/observer` snapshot first).
pub struct TapeBus {
    tx: broadcast::Sender<TapeEvent>,
}

impl TapeBus {
    /// Create a tape bus with the default channel capacity.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self { tx }
    }

    /// Subscribe to future tape events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TapeEvent> {
        self.tx.subscribe()
    }

    /// Publish a tape event to all current subscribers.
    ///
    /// Delivery is best-effort: an event published with no subscribers is
    /// silently dropped, matching the observer stream's "subscribe to see
    /// what happens next" contract.
    pub fn publish(&self, event: TapeEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for TapeBus {
    fn default() -> Self {
        Self::new()
    }
}
