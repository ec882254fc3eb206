//! Bounded hand-off between the syslog listener and the collector.
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
    mpsc::{self, Receiver, SyncSender, TrySendError},
};

use tracing::debug;

use super::SyslogMessage;
use crate::config::OverflowPolicy;

/// Producer half of the log channel. Cloned once per connection.
#[derive(Debug, Clone)]
pub struct LogSender {
    tx: SyncSender<SyslogMessage>,
    policy: OverflowPolicy,
    dropped: Arc<AtomicU64>,
}

/// Creates a channel holding at most `capacity` pending messages.
pub fn channel(capacity: usize, policy: OverflowPolicy) -> (LogSender, Receiver<SyslogMessage>) {
    let (tx, rx) = mpsc::sync_channel(capacity.max(1));
    let sender = LogSender {
        tx,
        policy,
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (sender, rx)
}

impl LogSender {
    /// Enqueues a message according to the overflow policy.
    ///
    /// Returns `false` once the collector is gone and nothing more can be delivered.
    pub fn send(&self, message: SyslogMessage) -> bool {
        match self.policy {
            OverflowPolicy::Block => self.tx.send(message).is_ok(),
            OverflowPolicy::DropNewest => match self.tx.try_send(message) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!("Log channel full; dropped message ({total} dropped so far)");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            },
        }
    }

    /// Number of messages discarded by [`OverflowPolicy::DropNewest`].
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Shared drop counter, readable after the sender is gone.
    pub(crate) fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }
}
