//! Poll Fan-out Hub
//! Mission: One broadcast channel per poll subject, created on first subscriber
//!
//! Delivery is fire-and-forget: no acks, no replay. A receiver that falls behind
//! skips to the newest results.

use crate::polls::models::PollResults;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::debug;

const DEFAULT_CAPACITY: usize = 64;

pub struct PollHub {
    channels: RwLock<HashMap<String, broadcast::Sender<PollResults>>>,
    capacity: usize,
}

impl Default for PollHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl PollHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, subject_id: &str) -> broadcast::Receiver<PollResults> {
        if let Some(tx) = self.channels.read().get(subject_id) {
            return tx.subscribe();
        }
        let mut channels = self.channels.write();
        channels
            .entry(subject_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Push fresh results; returns how many receivers got them.
    pub fn publish(&self, results: PollResults) -> usize {
        let channels = self.channels.read();
        let Some(tx) = channels.get(&results.subject_id) else {
            return 0;
        };
        let subject_id = results.subject_id.clone();
        let reached = tx.send(results).unwrap_or(0);
        debug!(poll_id = %subject_id, reached, "Published poll results");
        reached
    }

    /// Drop channels nobody listens to. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut channels = self.channels.write();
        let before = channels.len();
        channels.retain(|_, tx| tx.receiver_count() > 0);
        before - channels.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polls::models::OptionTally;

    fn results(subject_id: &str, votes: i64) -> PollResults {
        PollResults {
            subject_id: subject_id.to_string(),
            short_code: "ABC234".to_string(),
            question: "Q".to_string(),
            is_open: true,
            total_votes: votes,
            options: vec![OptionTally {
                option_id: "o1".to_string(),
                label: "Yes".to_string(),
                votes,
            }],
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_only_that_subject() {
        let hub = PollHub::default();
        let mut a = hub.subscribe("a");
        let mut a2 = hub.subscribe("a");
        let mut b = hub.subscribe("b");

        assert_eq!(hub.publish(results("a", 1)), 2);
        assert_eq!(a.recv().await.unwrap().total_votes, 1);
        assert_eq!(a2.recv().await.unwrap().total_votes, 1);
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_listeners() {
        let hub = PollHub::default();
        assert_eq!(hub.publish(results("nobody", 1)), 0);
        assert_eq!(hub.channel_count(), 0);

        let rx = hub.subscribe("gone");
        drop(rx);
        assert_eq!(hub.publish(results("gone", 1)), 0);
    }

    #[test]
    fn test_prune_drops_idle_channels() {
        let hub = PollHub::default();
        let _keep = hub.subscribe("live");
        drop(hub.subscribe("idle"));
        assert_eq!(hub.channel_count(), 2);
        assert_eq!(hub.prune(), 1);
        assert_eq!(hub.channel_count(), 1);
    }

    #[tokio::test]
    async fn test_lagged_receiver_reports_skip() {
        let hub = PollHub::new(2);
        let mut rx = hub.subscribe("a");
        for v in 1..=5 {
            hub.publish(results("a", v));
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        // After the lag the oldest retained value comes next
        assert_eq!(rx.recv().await.unwrap().total_votes, 4);
    }
}
