//! Inbound-request events and the bounded channel that carries them to the
//! stats collector.

use crate::config::OverflowPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Record of one served request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundRequest {
    pub method: String,
    /// Request path as received
    pub path: String,
    /// Registered route pattern that served the request
    pub route: String,
    pub status_code: u16,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub params: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub query: HashMap<String, String>,
}

/// Receiving half of the event channel, owned by the collector.
pub type EventReceiver = mpsc::Receiver<InboundRequest>;

/// Create a bounded event channel.
pub fn channel(capacity: usize, policy: OverflowPolicy) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sender = EventSender {
        tx: Some(tx),
        policy,
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (sender, rx)
}

/// Sending half of the event channel, cloned into every endpoint.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Option<mpsc::Sender<InboundRequest>>,
    policy: OverflowPolicy,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    /// A sender that discards every event, used when stats are off.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            policy: OverflowPolicy::DropNewest,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Number of events dropped because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Send an event according to the overflow policy.
    ///
    /// With [`OverflowPolicy::DropNewest`] this never waits. With
    /// [`OverflowPolicy::Block`] it waits for the collector to make room.
    pub async fn emit(&self, event: InboundRequest) {
        let Some(tx) = &self.tx else {
            return;
        };

        match self.policy {
            OverflowPolicy::DropNewest => match tx.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(event)) => {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        method = %event.method,
                        path = %event.path,
                        dropped,
                        "Stats channel full, dropping event"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Stats collector stopped, event discarded");
                }
            },
            OverflowPolicy::Block => {
                if tx.send(event).await.is_err() {
                    debug!("Stats collector stopped, event discarded");
                }
            }
        }
    }
}
