//! Fan-out registry mapping channels to listeners.
//!
//! A channel is an event type or the wildcard [`ALL_CHANNEL`]. Each listener
//! invocation is isolated: a panicking listener is logged and skipped without
//! affecting the remaining listeners.

use dashmap::DashMap;
use events::{Event, ALL_CHANNEL};
use log::*;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Callback invoked for every event published on a subscribed channel.
pub type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Unique identifier for a registered listener
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberId(String);

impl SubscriberId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct Subscriber {
    id: SubscriberId,
    callback: Callback,
}

/// Listener registry with dual indices: by channel for dispatch and by
/// subscriber id for removal.
pub struct EventBus {
    /// Listeners per channel, in registration order.
    channels: DashMap<String, Vec<Subscriber>>,

    /// Channel each subscriber is registered on.
    subscribers: DashMap<SubscriberId, String>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            subscribers: DashMap::new(),
        }
    }

    /// Registers `callback` on `channel` and returns its id.
    pub fn on(&self, channel: &str, callback: Callback) -> SubscriberId {
        let id = SubscriberId::new();

        self.channels
            .entry(channel.to_string())
            .or_default()
            .push(Subscriber {
                id: id.clone(),
                callback,
            });
        self.subscribers.insert(id.clone(), channel.to_string());

        debug!("Registered listener {} on channel {channel}", id.as_str());
        id
    }

    /// Removes a listener. Returns `false` when it was not registered.
    pub fn off(&self, id: &SubscriberId) -> bool {
        let Some((_, channel)) = self.subscribers.remove(id) else {
            return false;
        };

        if let Some(mut listeners) = self.channels.get_mut(&channel) {
            listeners.retain(|subscriber| &subscriber.id != id);

            if listeners.is_empty() {
                drop(listeners); // Release lock before removal
                self.channels.remove_if(&channel, |_, listeners| listeners.is_empty());
            }
        }

        debug!("Removed listener {} from channel {channel}", id.as_str());
        true
    }

    /// Dispatches `event` to its type's channel, then to the wildcard channel.
    ///
    /// Returns the number of listeners that completed without panicking.
    pub fn publish(&self, event: &Event) -> usize {
        let mut delivered = 0;

        for channel in [event.event_type.as_str(), ALL_CHANNEL] {
            // Snapshot so listeners may subscribe or unsubscribe re-entrantly.
            let listeners = match self.channels.get(channel) {
                Some(listeners) => listeners.clone(),
                None => continue,
            };

            for subscriber in listeners {
                let result =
                    panic::catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(event)));
                match result {
                    Ok(()) => delivered += 1,
                    Err(cause) => error!(
                        "Listener {} on channel {channel} panicked handling {}: {}",
                        subscriber.id.as_str(),
                        event.event_type,
                        panic_message(&*cause)
                    ),
                }
            }

            if event.event_type == ALL_CHANNEL {
                break;
            }
        }

        delivered
    }

    /// Total number of registered listeners across all channels.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = cause.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = cause.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
