//! # In-Memory Publish/Subscribe
//!
//! Subject-addressed fan-out over `tokio::sync::broadcast`. Active patterns
//! are tracked so `publish` can report how many subscriptions matched;
//! dropping a subscription removes its pattern.

use crate::errors::BusError;
use crate::ports::{Message, MessageStream, PubSub};
use crate::subject;
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

type PatternRegistry = Arc<Mutex<HashMap<u64, String>>>;

/// In-process subject bus.
pub struct InMemoryPubSub {
    sender: broadcast::Sender<Message>,
    patterns: PatternRegistry,
    next_id: AtomicU64,
    messages_published: AtomicU64,
}

impl InMemoryPubSub {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            patterns: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.patterns.lock().len()
    }

    /// Total messages published.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for InMemoryPubSub {
    async fn publish(&self, subject_name: &str, payload: Vec<u8>) -> Result<usize, BusError> {
        subject::validate_subject(subject_name)?;
        self.messages_published.fetch_add(1, Ordering::Relaxed);

        let matched = self
            .patterns
            .lock()
            .values()
            .filter(|p| subject::matches(p, subject_name))
            .count();

        let message = Message {
            subject: subject_name.to_string(),
            payload,
        };
        if self.sender.send(message).is_err() {
            debug!(subject = subject_name, "Message dropped (no subscribers)");
        } else {
            debug!(subject = subject_name, matched, "Message published");
        }
        Ok(matched)
    }

    async fn subscribe(&self, pattern: &str) -> Result<Box<dyn MessageStream>, BusError> {
        subject::validate_pattern(pattern)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let receiver = self.sender.subscribe();
        self.patterns.lock().insert(id, pattern.to_string());
        debug!(pattern, "Subscription created");

        Ok(Box::new(Subscription {
            id,
            pattern: pattern.to_string(),
            receiver: Some(receiver),
            patterns: self.patterns.clone(),
        }))
    }
}

struct Subscription {
    id: u64,
    pattern: String,
    receiver: Option<broadcast::Receiver<Message>>,
    patterns: PatternRegistry,
}

#[async_trait]
impl MessageStream for Subscription {
    async fn next(&mut self) -> Option<Message> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(message) if subject::matches(&self.pattern, &message.subject) => {
                    return Some(message)
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(pattern = %self.pattern, skipped, "Subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn stop(&mut self) {
        if self.receiver.take().is_some() {
            self.patterns.lock().remove(&self.id);
            debug!(pattern = %self.pattern, "Subscription stopped");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}
