//! Event producers
//!
//! Each producer pushes one [`EventToken`] per tick onto the shared bounded
//! queue. A full queue blocks the send, which is what propagates backpressure
//! from slow workers back to the producers.

use std::time::Duration;

use async_channel::Sender;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// One unit of available read work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventToken;

/// Capacity of the shared event queue
pub const QUEUE_CAPACITY: usize = 1000;

/// Time allowed for an in-flight send to land after a stop request
pub const STOP_GRACE: Duration = Duration::from_millis(100);

/// Tick period for a target rate
///
/// `messages_per_second` must be non-zero.
pub fn tick_period(messages_per_second: u32) -> Duration {
    Duration::from_secs(1) / messages_per_second.max(1)
}

/// A running producer task
#[derive(Debug)]
pub struct Producer {
    id: usize,
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<u64>,
}

impl Producer {
    /// Spawn a producer ticking every `send_every`
    pub fn start(id: usize, sender: Sender<EventToken>, send_every: Duration) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(produce(sender, send_every, stop_rx));

        Self {
            id,
            stop_tx,
            handle,
        }
    }

    /// Stop ticking, wait out the grace period and join.
    ///
    /// Returns the number of tokens this producer enqueued.
    pub async fn stop(self) -> u64 {
        // The task may already be gone if the queue was closed
        let _ = self.stop_tx.send(());
        tokio::time::sleep(STOP_GRACE).await;

        match self.handle.await {
            Ok(sent) => sent,
            Err(e) => {
                tracing::error!(producer = self.id, error = %e, "Producer task failed");
                0
            }
        }
    }
}

async fn produce(
    sender: Sender<EventToken>,
    send_every: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) -> u64 {
    let mut ticker = interval_at(Instant::now() + send_every, send_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut sent = 0;
    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = ticker.tick() => {
                if sender.send(EventToken).await.is_err() {
                    break;
                }
                sent += 1;
            }
        }
    }

    sent
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_period() {
        assert_eq!(tick_period(10), Duration::from_millis(100));
        assert_eq!(tick_period(1), Duration::from_secs(1));
        assert_eq!(tick_period(4000), Duration::from_micros(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_producer_rate() {
        let (tx, rx) = async_channel::bounded(QUEUE_CAPACITY);
        let producer = Producer::start(0, tx, tick_period(10));

        tokio::time::sleep(Duration::from_millis(1050)).await;
        let sent = producer.stop().await;

        assert_eq!(sent, 10);
        assert_eq!(rx.len(), 10);
        assert!(rx.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_blocks_instead_of_dropping() {
        let (tx, rx) = async_channel::bounded(2);
        let producer = Producer::start(0, tx, tick_period(100));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(rx.len(), 2);

        // Drain concurrently so the blocked send can complete during stop
        let drain = tokio::spawn(async move {
            let mut received = 0u64;
            while rx.recv().await.is_ok() {
                received += 1;
            }
            received
        });

        let sent = producer.stop().await;
        let received = drain.await.unwrap();
        assert_eq!(sent, received);
    }
}
