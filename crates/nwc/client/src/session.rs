//! The relay session contract the engine consumes.
//!
//! The engine never talks to a websocket directly: it sees a
//! [`SessionProvider`] (one per wallet connection) handing out
//! [`RelaySession`]s (one per relay). The default runtime in [`crate::relay`]
//! and [`crate::sessions`] implements these traits; tests script them.

use crate::error::NwcResult;
use async_trait::async_trait;
use futures::future::BoxFuture;
use nwc_core::Event;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// A Nostr subscription filter, passed through as JSON.
pub type Filter = Value;

/// Per-relay connection snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionSnapshot {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    Failed,
}

/// Connection state aggregated across all relays of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateConnectionState {
    /// Every relay is connected.
    Ready,
    /// At least one relay is connected.
    Degraded,
    /// No relay connected, at least one still connecting.
    Connecting,
    Disconnected,
    /// No relay connected and at least one failed terminally.
    Failed,
}

/// Fold per-relay snapshots into one session-wide state.
pub fn aggregate_state(snapshots: &[ConnectionSnapshot]) -> AggregateConnectionState {
    if snapshots.is_empty() {
        return AggregateConnectionState::Disconnected;
    }

    let connected = snapshots
        .iter()
        .filter(|s| **s == ConnectionSnapshot::Connected)
        .count();
    if connected == snapshots.len() {
        AggregateConnectionState::Ready
    } else if connected > 0 {
        AggregateConnectionState::Degraded
    } else if snapshots.contains(&ConnectionSnapshot::Failed) {
        AggregateConnectionState::Failed
    } else if snapshots.contains(&ConnectionSnapshot::Connecting) {
        AggregateConnectionState::Connecting
    } else {
        AggregateConnectionState::Disconnected
    }
}

/// Retry policy for session operations. One retry on a single timeout while
/// the connection reports Connected; no separate write-confirmation timeout,
/// and never a pre-request network check.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub retry_on_timeout_when_connected: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_on_timeout_when_connected: true,
        }
    }
}

/// Outcome of a stored-events query.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Events(Vec<Event>),
    Timeout,
    ConnectionFailed(String),
}

/// Outcome of a publish-and-await-one-response exchange.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    Event(Event),
    Timeout,
    ConnectionFailed(String),
}

/// Handle to a long-lived subscription shared by many requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedSubscription {
    pub id: String,
}

/// Inbound traffic delivered to the session output sink.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Event {
        relay_url: String,
        event: Event,
    },
    PublishAck {
        relay_url: String,
        event_id: String,
        accepted: bool,
        message: String,
    },
    EndOfStored {
        relay_url: String,
        subscription_id: String,
    },
    SubscriptionClosed {
        relay_url: String,
        subscription_id: String,
        message: String,
    },
}

/// The session output sink: all inbound traffic funnels into one channel
/// consumed by the client's router task.
pub type EventSink = mpsc::UnboundedSender<SessionEvent>;

/// Called with a relay handle once that relay connects (and again after a
/// reconnect), so the core can install its subscriptions.
pub type SessionConfigurator = Arc<dyn Fn(SessionHandle) -> BoxFuture<'static, ()> + Send + Sync>;

/// One relay session as seen by the engine.
#[async_trait]
pub trait RelaySession: Send + Sync {
    fn url(&self) -> &str;

    /// Watch channel with the relay's connection snapshot.
    fn snapshots(&self) -> watch::Receiver<ConnectionSnapshot>;

    async fn subscribe(&self, id: &str, filters: &[Filter]) -> NwcResult<()>;

    async fn unsubscribe(&self, id: &str) -> NwcResult<()>;

    /// Open a long-lived subscription, confirmed within `timeout`; `None` on
    /// timeout.
    async fn create_shared_subscription(
        &self,
        filters: Vec<Filter>,
        timeout: Duration,
    ) -> Option<SharedSubscription>;

    /// One-shot stored-events query.
    async fn query(
        &self,
        filters: Vec<Filter>,
        timeout: Duration,
        retry: RetryConfig,
    ) -> QueryOutcome;

    /// Publish `event` and return the first event arriving on `sub` whose
    /// `e` tag equals `correlation_id`.
    async fn request_one_via(
        &self,
        sub: &SharedSubscription,
        event: &Event,
        correlation_id: &str,
        timeout: Duration,
        retry: RetryConfig,
    ) -> RequestOutcome;
}

/// A relay session plus its URL, as handed out by the provider.
#[derive(Clone)]
pub struct SessionHandle {
    pub url: String,
    pub session: Arc<dyn RelaySession>,
}

/// The per-credentials session provider.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Open one logical session per relay. Inbound traffic goes to `sink`;
    /// `configurator` runs against each relay once it connects.
    async fn open(&self, sink: EventSink, configurator: SessionConfigurator) -> NwcResult<()>;

    /// Handles for every relay currently managed, in credential order.
    fn runtime_handles(&self) -> Vec<SessionHandle>;

    /// Make sure a relay session exists and is connected (used by recovery).
    async fn ensure_relay(&self, url: &str) -> NwcResult<()>;

    /// Publish to all relays; success if any accepts.
    async fn publish(&self, event: &Event) -> NwcResult<()>;

    async fn publish_to(&self, relay: &str, event: &Event) -> NwcResult<()>;

    /// Pass-through for relay AUTH challenges.
    async fn authenticate(&self, relay: &str, event: &Event) -> NwcResult<()>;

    async fn close(&self);
}
