//! Connected viewer tracking
//!
//! [`ViewerCount`] holds the number of connected viewers and broadcasts every
//! new value. [`EncoderGate`] listens to it and starts or stops the encoder
//! processes when the count leaves or reaches zero.

mod gate;

pub use gate::EncoderGate;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

/// Channel capacity for count updates
const COUNT_CHANNEL_CAPACITY: usize = 64;

/// Shared viewer counter with change notifications
pub struct ViewerCount {
    count: Mutex<u32>,
    tx: broadcast::Sender<u32>,
}

impl ViewerCount {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(COUNT_CHANNEL_CAPACITY);
        Self {
            count: Mutex::new(0),
            tx,
        }
    }

    pub fn get(&self) -> u32 {
        *self.count.lock()
    }

    /// Receive every new value. A lagged receiver should resync from [`Self::get`].
    pub fn subscribe(&self) -> broadcast::Receiver<u32> {
        self.tx.subscribe()
    }

    /// Count one more viewer until the returned ticket is dropped
    pub fn join(self: &Arc<Self>) -> ViewerTicket {
        self.update(|count| count.saturating_add(1));
        ViewerTicket {
            viewers: Arc::clone(self),
        }
    }

    fn update(&self, f: impl FnOnce(u32) -> u32) {
        // Sent under the lock so subscribers observe values in mutation order
        let mut count = self.count.lock();
        *count = f(*count);
        tracing::debug!(viewers = *count, "Viewer count changed");
        let _ = self.tx.send(*count);
    }
}

impl Default for ViewerCount {
    fn default() -> Self {
        Self::new()
    }
}

/// One connected viewer. Dropping it decrements the count exactly once.
pub struct ViewerTicket {
    viewers: Arc<ViewerCount>,
}

impl Drop for ViewerTicket {
    fn drop(&mut self) {
        self.viewers.update(|count| count.saturating_sub(1));
    }
}

impl std::fmt::Debug for ViewerTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerTicket").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_leave() {
        let viewers = Arc::new(ViewerCount::new());
        let tickets: Vec<_> = (0..5).map(|_| viewers.join()).collect();
        assert_eq!(viewers.get(), 5);

        let mut tickets = tickets.into_iter();
        for _ in 0..3 {
            drop(tickets.next());
        }
        assert_eq!(viewers.get(), 2);

        drop(tickets);
        assert_eq!(viewers.get(), 0);
    }

    #[tokio::test]
    async fn test_every_change_is_broadcast_in_order() {
        let viewers = Arc::new(ViewerCount::new());
        let mut rx = viewers.subscribe();

        let a = viewers.join();
        let b = viewers.join();
        drop(a);
        drop(b);

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(rx.recv().await.unwrap());
        }
        assert_eq!(seen, vec![1, 2, 1, 0]);
    }
}
