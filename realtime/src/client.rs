//! The realtime client: owns one transport, the cursor store, the
//! deduplicator and the event bus, and turns raw transport batches into bus
//! dispatches.
//!
//! ```text
//! Idle ──(first subscriber)──► Connecting ──(transport ready)──► Connected
//!  ▲                              ▲                                  │
//!  │                              └──(delay elapses)── Backoff ◄─────┘
//!  └──────────────(last subscriber removed, from any state)            (transport error)
//! ```
//!
//! A single driver task per start performs every transport call, so at most
//! one request is ever outstanding. Stopping bumps a generation counter: any
//! pending delay is cancelled at once, and a request already in flight is
//! allowed to resolve but its result is discarded.

use crate::bus::{Callback, EventBus, SubscriberId};
use crate::cursor::{CursorStore, CURSOR_BEGINNING};
use crate::dedup::Deduplicator;
use crate::error::{config_error, Error};
use crate::lock;
use crate::reconnect::ReconnectPolicy;
use crate::storage::{FileStorage, MemoryStorage, SessionStorage};
use crate::transport::{Batch, PollOptions, PollTransport, PushTransport, Transport, TransportMode};
use chrono::Utc;
use events::{Event, ALL_CHANNEL};
use log::*;
use service::config::{Config, TransportKind};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Backoff,
}

/// Mutable delivery state, only touched between transport calls.
struct Session {
    dedup: Deduplicator,
    cursor: String,
    skip_next_batch: bool,
    failure_streak: u32,
}

struct Inner {
    bus: EventBus,
    transport: tokio::sync::Mutex<Box<dyn Transport>>,
    mode: TransportMode,
    cursor_store: CursorStore,
    policy: ReconnectPolicy,
    session: Mutex<Session>,
    state: watch::Sender<ConnectionState>,
    generation: watch::Sender<u64>,
    // Serializes subscriber-count driven start/stop against state transitions.
    lifecycle: Mutex<()>,
}

/// Handle to a realtime client. Cloning is cheap and yields the same client.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

/// Registration returned by [`RealtimeClient::subscribe`].
///
/// Dropping it unsubscribes the listener; removing the last listener stops
/// the client.
#[must_use = "dropping a Subscription unsubscribes its listener"]
pub struct Subscription {
    inner: Arc<Inner>,
    id: Option<SubscriberId>,
}

impl Subscription {
    pub fn id(&self) -> Option<&SubscriberId> {
        self.id.as_ref()
    }

    pub fn unsubscribe(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if let Some(id) = self.id.take() {
            self.inner.remove_subscriber(&id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

impl RealtimeClient {
    pub fn new(transport: Box<dyn Transport>, cursor_store: CursorStore) -> Self {
        let mode = transport.mode();
        let (state, _) = watch::channel(ConnectionState::Idle);
        let (generation, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                bus: EventBus::new(),
                transport: tokio::sync::Mutex::new(transport),
                mode,
                cursor_store,
                policy: ReconnectPolicy::new(),
                session: Mutex::new(Session {
                    dedup: Deduplicator::new(),
                    cursor: CURSOR_BEGINNING.to_string(),
                    skip_next_batch: false,
                    failure_streak: 0,
                }),
                state,
                generation,
                lifecycle: Mutex::new(()),
            }),
        }
    }

    /// Builds a client with the transport and session storage selected by `config`.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let storage: Arc<dyn SessionStorage> = match config.session_file() {
            Some(path) => Arc::new(FileStorage::new(path)),
            None => Arc::new(MemoryStorage::new()),
        };
        let cursor_store = CursorStore::new(config.client_name(), storage);
        let auth_token = config.auth_token().map(str::to_string);

        let transport: Box<dyn Transport> = match config.transport {
            TransportKind::Poll => {
                let mut options = PollOptions::new(config.realtime_url());
                options.batch_limit = config.batch_limit;
                options.interval = config.poll_interval();
                options.auth_token = auth_token;
                Box::new(PollTransport::new(options)?)
            }
            TransportKind::Push => {
                let url = config.push_url().ok_or_else(|| {
                    config_error("push transport selected but no push URL is configured")
                })?;
                Box::new(PushTransport::new(url, auth_token))
            }
        };

        info!(
            "Realtime client '{}' using {} transport",
            config.client_name(),
            config.transport
        );
        Ok(Self::new(transport, cursor_store))
    }

    /// Subscribes `callback` to every event (the `all` channel).
    ///
    /// Must be called within a Tokio runtime: the first subscriber starts
    /// the transport.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe_to(ALL_CHANNEL, callback)
    }

    /// Subscribes `callback` to a single channel (an event type).
    pub fn subscribe_to<F>(&self, channel: &str, callback: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        let id = self.inner.add_subscriber(channel, callback);

        Subscription {
            inner: self.inner.clone(),
            id: Some(id),
        }
    }

    /// Stops the transport and clears pending timers. Delivery resumes when
    /// the next subscriber is added.
    pub fn stop(&self) {
        let _guard = lock(&self.inner.lifecycle);
        self.inner.stop_locked();
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Receiver notified on every connection state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Number of consecutive transport failures since the last success.
    pub fn failure_streak(&self) -> u32 {
        lock(&self.inner.session).failure_streak
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.bus.len()
    }

    /// Resume position the next poll will use.
    pub fn cursor(&self) -> String {
        lock(&self.inner.session).cursor.clone()
    }
}

impl Inner {
    fn add_subscriber(self: &Arc<Self>, channel: &str, callback: Callback) -> SubscriberId {
        let _guard = lock(&self.lifecycle);
        let id = self.bus.on(channel, callback);

        if *self.state.borrow() == ConnectionState::Idle {
            self.start_locked();
        }
        id
    }

    fn remove_subscriber(&self, id: &SubscriberId) {
        let _guard = lock(&self.lifecycle);
        if self.bus.off(id) && self.bus.is_empty() {
            self.stop_locked();
        }
    }

    fn start_locked(self: &Arc<Self>) {
        let generation = *self.generation.borrow();
        self.set_state(ConnectionState::Connecting);
        tokio::spawn(drive(self.clone(), generation));
    }

    fn stop_locked(&self) {
        self.generation.send_modify(|generation| *generation += 1);
        self.set_state(ConnectionState::Idle);
    }

    fn is_stopped(&self, generation: u64) -> bool {
        *self.generation.borrow() != generation
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            debug!("Realtime connection {:?} -> {:?}", state, next);
            *state = next;
            true
        });
    }

    /// Applies a state change unless the driver of `generation` has been stopped.
    fn transition(&self, generation: u64, next: ConnectionState) -> bool {
        let _guard = lock(&self.lifecycle);
        if self.is_stopped(generation) {
            return false;
        }
        self.set_state(next);
        true
    }

    /// Loads the persisted cursor; a fresh or stale session suppresses the
    /// next batch so history is not replayed as new.
    fn restore_cursor(&self) {
        if self.mode != TransportMode::Poll {
            return;
        }

        let restored = self.cursor_store.load();
        let mut session = lock(&self.session);
        match restored {
            Some(cursor) => {
                debug!("Resuming realtime delivery after {}", cursor.position);
                session.cursor = cursor.position;
                session.skip_next_batch = false;
            }
            None => {
                debug!("Fresh realtime session, first batch will not be dispatched");
                session.cursor = CURSOR_BEGINNING.to_string();
                session.skip_next_batch = true;
            }
        }
    }

    fn current_cursor(&self) -> String {
        lock(&self.session).cursor.clone()
    }

    fn mark_connected(&self, generation: u64) {
        lock(&self.session).failure_streak = 0;
        self.transition(generation, ConnectionState::Connected);
    }

    /// Counts a transport failure and returns the delay before retrying.
    fn record_failure(&self, generation: u64, err: &Error) -> Duration {
        let streak = {
            let mut session = lock(&self.session);
            session.failure_streak += 1;
            session.failure_streak
        };
        let delay = self.policy.next_delay(streak);

        warn!(
            "Realtime transport failed ({err}), attempt {streak}, retrying in {}ms",
            delay.as_millis()
        );
        self.transition(generation, ConnectionState::Backoff);
        delay
    }

    fn publish_auth_error(&self, status: u16) {
        warn!("Realtime endpoint rejected credentials with status {status}");
        self.bus
            .publish(&Event::auth_error(status, Utc::now().to_rfc3339()));
    }

    /// Advances the cursor, filters duplicates and publishes the survivors.
    fn process_batch(&self, batch: Batch) {
        let Batch { events, cursor } = batch;

        let fresh: Vec<Event> = {
            let mut session = lock(&self.session);
            if let Some(position) = &cursor {
                session.cursor = position.clone();
            }
            let skip = std::mem::take(&mut session.skip_next_batch);

            let mut fresh = Vec::with_capacity(events.len());
            for event in events {
                let key = event.dedup_key();
                if session.dedup.seen(&key) {
                    trace!("Suppressing duplicate event {key}");
                    continue;
                }
                session.dedup.remember(&key);
                fresh.push(event);
            }

            if skip {
                debug!(
                    "Dropping {} event(s) from the first batch of a fresh session",
                    fresh.len()
                );
                fresh.clear();
            }
            fresh
        };

        for event in &fresh {
            self.bus.publish(event);
        }

        if self.mode == TransportMode::Poll {
            if let Some(position) = &cursor {
                self.cursor_store.save(position);
            }
        }
    }
}

/// Waits for `delay` unless the driver is stopped first. Returns `false` when stopped.
async fn pause(
    inner: &Inner,
    generation: u64,
    stop_rx: &mut watch::Receiver<u64>,
    delay: Duration,
) -> bool {
    if inner.is_stopped(generation) {
        return false;
    }

    tokio::select! {
        _ = tokio::time::sleep(delay) => !inner.is_stopped(generation),
        _ = stop_rx.changed() => false,
    }
}

/// Drives the transport for one start/stop cycle.
async fn drive(inner: Arc<Inner>, generation: u64) {
    let mut stop_rx = inner.generation.subscribe();

    // Held for the whole cycle: a restarted client waits here until the
    // previous cycle's in-flight request has resolved.
    let mut transport = inner.transport.lock().await;
    if inner.is_stopped(generation) {
        return;
    }

    inner.restore_cursor();

    'connect: loop {
        if !inner.transition(generation, ConnectionState::Connecting) {
            break;
        }

        let opened = transport.open().await;
        if inner.is_stopped(generation) {
            break;
        }

        if let Err(e) = opened {
            let delay = inner.record_failure(generation, &e);
            if pause(&inner, generation, &mut stop_rx, delay).await {
                continue 'connect;
            }
            break;
        }

        if inner.mode == TransportMode::Push {
            inner.mark_connected(generation);
        }

        loop {
            let cursor = inner.current_cursor();
            let result = transport.next_batch(&cursor).await;

            if inner.is_stopped(generation) {
                debug!("Discarding realtime result that resolved after the client stopped");
                break 'connect;
            }

            let delay = match result {
                Ok(batch) => {
                    inner.mark_connected(generation);
                    inner.process_batch(batch);
                    transport.interval()
                }
                Err(e) => match e.unauthorized_status() {
                    Some(status) => {
                        inner.publish_auth_error(status);
                        let interval = transport.interval().unwrap_or(inner.policy.base_delay());
                        Some(interval * 2)
                    }
                    None => {
                        transport.close();
                        let delay = inner.record_failure(generation, &e);
                        if pause(&inner, generation, &mut stop_rx, delay).await {
                            continue 'connect;
                        }
                        break 'connect;
                    }
                },
            };

            if let Some(delay) = delay {
                if !pause(&inner, generation, &mut stop_rx, delay).await {
                    break 'connect;
                }
            }
        }
    }

    transport.close();
    debug!("Realtime driver stopped");
}
