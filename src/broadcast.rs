use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

pub type SubscriberId = u64;

/// Outbound channel to one connection's writer task.
pub type SubscriberSink = mpsc::UnboundedSender<String>;

/// Direct replies sent to a single subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Welcome { message: String, timestamp: DateTime<Utc> },
    Pong { timestamp: DateTime<Utc> },
    Subscribed { channel: String, timestamp: DateTime<Utc> },
    Unsubscribed { channel: String, timestamp: DateTime<Utc> },
}

/// Control messages a subscriber may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Ping,
    Subscribe { channel: String },
    Unsubscribe { channel: String },
}

/// Broadcast frame: `{"type", "data", "timestamp"}`.
#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: &'a T,
    timestamp: DateTime<Utc>,
}

struct Subscriber {
    sink: SubscriberSink,
    channels: HashSet<String>,
    last_seen: Instant,
}

/// Fans alerts out to every connected subscriber.
///
/// Writes are non-blocking channel sends, so one slow or dead connection
/// never holds up the others. A failed send removes that subscriber.
pub struct AlertBroadcaster {
    subscribers: Mutex<HashMap<SubscriberId, Subscriber>>,
    next_id: AtomicU64,
    welcome: String,
}

impl AlertBroadcaster {
    pub fn new(welcome: impl Into<String>) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            welcome: welcome.into(),
        }
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriberId, Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a subscriber and send it (only it) the welcome message.
    pub fn register(&self, sink: SubscriberSink) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry().insert(
            id,
            Subscriber {
                sink,
                channels: HashSet::new(),
                last_seen: Instant::now(),
            },
        );
        self.send_to(
            id,
            &ServerMessage::Welcome {
                message: self.welcome.clone(),
                timestamp: Utc::now(),
            },
        );
        info!(subscriber = id, total = self.subscriber_count(), "Subscriber registered");
        id
    }

    pub fn unregister(&self, id: SubscriberId) -> bool {
        let removed = self.registry().remove(&id).is_some();
        if removed {
            info!(subscriber = id, "Subscriber unregistered");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().len()
    }

    /// Serialize once and write to every open subscriber. Returns the number
    /// of subscribers the frame was delivered to.
    pub fn broadcast<T: Serialize>(&self, kind: &str, payload: &T) -> usize {
        let frame = match serde_json::to_string(&Envelope {
            kind,
            data: payload,
            timestamp: Utc::now(),
        }) {
            Ok(frame) => frame,
            Err(e) => {
                error!(kind, "Dropping broadcast frame that failed to serialize: {e}");
                return 0;
            }
        };

        let mut registry = self.registry();
        let mut failed = Vec::new();
        let mut delivered = 0;
        for (id, subscriber) in registry.iter() {
            if subscriber.sink.is_closed() || subscriber.sink.send(frame.clone()).is_err() {
                failed.push(*id);
            } else {
                delivered += 1;
            }
        }
        for id in &failed {
            registry.remove(id);
            debug!(subscriber = id, "Removed subscriber after failed write");
        }
        debug!(kind, delivered, dropped = failed.len(), "Broadcast sent");
        delivered
    }

    /// Handle an inbound text frame from a subscriber.
    pub fn handle_message(&self, id: SubscriberId, text: &str) {
        self.touch(id);
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(subscriber = id, "Ignoring unrecognised client message: {e}");
                return;
            }
        };

        let reply = match message {
            ClientMessage::Ping => ServerMessage::Pong {
                timestamp: Utc::now(),
            },
            ClientMessage::Subscribe { channel } => {
                if let Some(subscriber) = self.registry().get_mut(&id) {
                    subscriber.channels.insert(channel.clone());
                }
                debug!(subscriber = id, %channel, channels = ?self.channels(id), "Subscribed");
                ServerMessage::Subscribed {
                    channel,
                    timestamp: Utc::now(),
                }
            }
            ClientMessage::Unsubscribe { channel } => {
                if let Some(subscriber) = self.registry().get_mut(&id) {
                    subscriber.channels.remove(&channel);
                }
                debug!(subscriber = id, %channel, channels = ?self.channels(id), "Unsubscribed");
                ServerMessage::Unsubscribed {
                    channel,
                    timestamp: Utc::now(),
                }
            }
        };
        self.send_to(id, &reply);
    }

    /// Record activity from a subscriber.
    pub fn touch(&self, id: SubscriberId) {
        if let Some(subscriber) = self.registry().get_mut(&id) {
            subscriber.last_seen = Instant::now();
        }
    }

    /// True if the subscriber is gone or has been silent longer than `max_idle`.
    pub fn is_idle(&self, id: SubscriberId, max_idle: Duration) -> bool {
        self.registry()
            .get(&id)
            .is_none_or(|s| s.last_seen.elapsed() > max_idle)
    }

    pub fn channels(&self, id: SubscriberId) -> Vec<String> {
        let mut channels: Vec<String> = self
            .registry()
            .get(&id)
            .map(|s| s.channels.iter().cloned().collect())
            .unwrap_or_default();
        channels.sort();
        channels
    }

    /// Drop every subscriber. Their writer tasks see the closed channel and
    /// close the underlying connections.
    pub fn close_all(&self) -> usize {
        let mut registry = self.registry();
        let count = registry.len();
        registry.clear();
        if count > 0 {
            info!("Closed {count} subscriber connections");
        }
        count
    }

    fn send_to(&self, id: SubscriberId, message: &ServerMessage) {
        let frame = match serde_json::to_string(message) {
            Ok(frame) => frame,
            Err(e) => {
                error!(subscriber = id, "Dropping reply that failed to serialize: {e}");
                return;
            }
        };
        let mut registry = self.registry();
        let failed = registry
            .get(&id)
            .is_some_and(|s| s.sink.send(frame).is_err());
        if failed {
            registry.remove(&id);
            debug!(subscriber = id, "Removed subscriber after failed write");
        }
    }
}
