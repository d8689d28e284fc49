//! Default relay session over tokio-tungstenite.
//!
//! One websocket per relay with a background reader task. The reader
//! translates relay frames (EVENT / OK / EOSE / CLOSED / NOTICE / AUTH) into
//! local waiters — query collectors, subscription confirmations, response
//! matchers — and forwards everything else to the session output sink.

use crate::error::{Failure, NwcResult};
use crate::session::{
    ConnectionSnapshot, EventSink, Filter, QueryOutcome, RelaySession, RequestOutcome, RetryConfig,
    SessionEvent, SharedSubscription,
};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use nwc_core::{E_TAG, Event, RESPONSE_KIND, find_tag_value};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Relay connection configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub connect_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// A message received from the relay.
#[derive(Debug, Clone)]
enum RelayMessage {
    /// `["EVENT", subscription_id, event]`
    Event(String, Event),
    /// `["OK", event_id, success, message]`
    Ok(String, bool, String),
    /// `["EOSE", subscription_id]`
    Eose(String),
    /// `["CLOSED", subscription_id, message]`
    Closed(String, String),
    /// `["NOTICE", message]`
    Notice(String),
    /// `["AUTH", challenge]`
    Auth(String),
}

/// Waiters the reader task resolves.
struct Waiters {
    /// Query subscriptions collecting events until EOSE.
    collectors: StdMutex<HashMap<String, mpsc::UnboundedSender<Event>>>,
    /// Subscriptions awaiting their EOSE confirmation.
    eose: StdMutex<HashMap<String, oneshot::Sender<()>>>,
    /// request-one-via matchers keyed by correlation id (`e` tag).
    matchers: StdMutex<HashMap<String, oneshot::Sender<Event>>>,
}

impl Waiters {
    fn new() -> Self {
        Self {
            collectors: StdMutex::new(HashMap::new()),
            eose: StdMutex::new(HashMap::new()),
            matchers: StdMutex::new(HashMap::new()),
        }
    }
}

/// A single relay session.
pub struct Relay {
    url: Url,
    config: RelayConfig,
    state_tx: Arc<watch::Sender<ConnectionSnapshot>>,
    state_rx: watch::Receiver<ConnectionSnapshot>,
    writer: Mutex<Option<WsWriter>>,
    waiters: Arc<Waiters>,
    reader_task: StdMutex<Option<JoinHandle<()>>>,
}

impl Relay {
    pub fn new(url: &str, config: RelayConfig) -> NwcResult<Self> {
        let url = Url::parse(url)
            .map_err(|e| Failure::network_caused_by("invalid relay URL", e.to_string()))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(Failure::network(format!(
                "relay URL must use ws:// or wss://, got {}",
                url.scheme()
            )));
        }

        let (state_tx, state_rx) = watch::channel(ConnectionSnapshot::Disconnected);
        Ok(Self {
            url,
            config,
            state_tx: Arc::new(state_tx),
            state_rx,
            writer: Mutex::new(None),
            waiters: Arc::new(Waiters::new()),
            reader_task: StdMutex::new(None),
        })
    }

    /// Connect and start the reader task. Inbound traffic not claimed by a
    /// local waiter is forwarded to `sink`.
    pub async fn connect(&self, sink: EventSink) -> NwcResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        let _ = self.state_tx.send(ConnectionSnapshot::Connecting);
        info!(url = %self.url, "connecting to relay");

        let ws_stream = match timeout(
            self.config.connect_timeout,
            connect_async(self.url.as_str()),
        )
        .await
        {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                let _ = self.state_tx.send(ConnectionSnapshot::Failed);
                return Err(Failure::network_caused_by(
                    format!("websocket connect to {} failed", self.url),
                    e.to_string(),
                ));
            }
            Err(_) => {
                let _ = self.state_tx.send(ConnectionSnapshot::Failed);
                return Err(Failure::timeout(format!(
                    "connect to {} timed out after {:?}",
                    self.url, self.config.connect_timeout
                )));
            }
        };

        let (writer, reader) = ws_stream.split();
        *self.writer.lock().await = Some(writer);

        let task = tokio::spawn(run_reader(
            self.url.to_string(),
            reader,
            Arc::clone(&self.waiters),
            sink,
            Arc::clone(&self.state_tx),
        ));
        if let Some(old) = self
            .reader_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task)
        {
            old.abort();
        }

        let _ = self.state_tx.send(ConnectionSnapshot::Connected);
        info!(url = %self.url, "relay connected");
        Ok(())
    }

    pub async fn disconnect(&self) {
        let _ = self.state_tx.send(ConnectionSnapshot::Disconnecting);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.close().await;
        }
        if let Some(task) = self
            .reader_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        let _ = self.state_tx.send(ConnectionSnapshot::Disconnected);
        info!(url = %self.url, "relay disconnected");
    }

    pub fn is_connected(&self) -> bool {
        *self.state_rx.borrow() == ConnectionSnapshot::Connected
    }

    /// Publish an event (fire-and-forget; OK frames arrive via the sink).
    /// Confirmation delay is not a write failure.
    pub async fn send_event(&self, event: &Event) -> NwcResult<()> {
        self.send_message(&json!(["EVENT", event])).await
    }

    /// Respond to an AUTH challenge.
    pub async fn send_auth(&self, event: &Event) -> NwcResult<()> {
        self.send_message(&json!(["AUTH", event])).await
    }

    async fn send_message(&self, message: &Value) -> NwcResult<()> {
        let text = serde_json::to_string(message)
            .map_err(|e| Failure::unknown(format!("message serialization: {e}")))?;
        debug!(url = %self.url, %text, "sending");

        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(stream) => stream.send(Message::Text(text.into())).await.map_err(|e| {
                Failure::network_caused_by(
                    format!("send to {} failed", self.url),
                    e.to_string(),
                )
            }),
            None => Err(Failure::network(format!("{} is not connected", self.url))),
        }
    }

    fn register_eose(&self, id: &str) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .eose
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), tx);
        rx
    }

    fn clear_eose(&self, id: &str) {
        self.waiters
            .eose
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    fn random_subscription_id(prefix: &str) -> String {
        use rand::Rng;
        let salt: [u8; 4] = rand::rng().random();
        format!("{prefix}-{}", hex::encode(salt))
    }
}

#[async_trait]
impl RelaySession for Relay {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    fn snapshots(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.state_rx.clone()
    }

    async fn subscribe(&self, id: &str, filters: &[Filter]) -> NwcResult<()> {
        let mut message = vec![json!("REQ"), json!(id)];
        message.extend(filters.iter().cloned());
        self.send_message(&Value::Array(message)).await
    }

    async fn unsubscribe(&self, id: &str) -> NwcResult<()> {
        self.send_message(&json!(["CLOSE", id])).await
    }

    async fn create_shared_subscription(
        &self,
        filters: Vec<Filter>,
        timeout_after: Duration,
    ) -> Option<SharedSubscription> {
        let id = Self::random_subscription_id("nwc");
        let confirmed = self.register_eose(&id);

        if let Err(e) = self.subscribe(&id, &filters).await {
            debug!(url = %self.url, error = %e, "shared subscription REQ failed");
            self.clear_eose(&id);
            return None;
        }

        match timeout(timeout_after, confirmed).await {
            Ok(Ok(())) => Some(SharedSubscription { id }),
            _ => {
                self.clear_eose(&id);
                let _ = self.unsubscribe(&id).await;
                None
            }
        }
    }

    async fn query(
        &self,
        filters: Vec<Filter>,
        timeout_after: Duration,
        retry: RetryConfig,
    ) -> QueryOutcome {
        let mut attempted = false;
        loop {
            let id = Self::random_subscription_id("q");
            let (event_tx, mut event_rx) = mpsc::unbounded_channel();
            self.waiters
                .collectors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id.clone(), event_tx);
            let done = self.register_eose(&id);

            let cleanup = |relay: &Self| {
                relay
                    .waiters
                    .collectors
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id);
                relay.clear_eose(&id);
            };

            if let Err(e) = self.subscribe(&id, &filters).await {
                cleanup(self);
                return QueryOutcome::ConnectionFailed(e.to_string());
            }

            match timeout(timeout_after, done).await {
                Ok(Ok(())) => {
                    cleanup(self);
                    let _ = self.unsubscribe(&id).await;
                    let mut events = Vec::new();
                    while let Ok(event) = event_rx.try_recv() {
                        events.push(event);
                    }
                    return QueryOutcome::Events(events);
                }
                _ => {
                    cleanup(self);
                    let _ = self.unsubscribe(&id).await;
                    if retry.retry_on_timeout_when_connected && !attempted && self.is_connected() {
                        attempted = true;
                        debug!(url = %self.url, "query timed out while connected, retrying once");
                        continue;
                    }
                    return QueryOutcome::Timeout;
                }
            }
        }
    }

    async fn request_one_via(
        &self,
        _sub: &SharedSubscription,
        event: &Event,
        correlation_id: &str,
        timeout_after: Duration,
        retry: RetryConfig,
    ) -> RequestOutcome {
        let (tx, mut rx) = oneshot::channel();
        self.waiters
            .matchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(correlation_id.to_string(), tx);

        let clear_matcher = |relay: &Self| {
            relay
                .waiters
                .matchers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(correlation_id);
        };

        let mut attempted = false;
        loop {
            if let Err(e) = self.send_event(event).await {
                clear_matcher(self);
                return RequestOutcome::ConnectionFailed(e.to_string());
            }

            match timeout(timeout_after, &mut rx).await {
                Ok(Ok(response)) => return RequestOutcome::Event(response),
                Ok(Err(_)) => {
                    // matcher dropped during disconnect
                    return RequestOutcome::ConnectionFailed(format!(
                        "{} dropped the response matcher",
                        self.url
                    ));
                }
                Err(_) => {
                    if retry.retry_on_timeout_when_connected && !attempted && self.is_connected() {
                        attempted = true;
                        debug!(url = %self.url, correlation_id, "request timed out while connected, resending once");
                        continue;
                    }
                    clear_matcher(self);
                    return RequestOutcome::Timeout;
                }
            }
        }
    }
}

/// Background reader: parses frames, resolves local waiters, forwards the
/// rest to the sink.
async fn run_reader(
    relay_url: String,
    mut reader: WsReader,
    waiters: Arc<Waiters>,
    sink: EventSink,
    state_tx: Arc<watch::Sender<ConnectionSnapshot>>,
) {
    while let Some(frame) = reader.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                info!(url = %relay_url, "relay closed the connection");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(url = %relay_url, error = %e, "relay stream error");
                break;
            }
        };

        let Some(message) = parse_relay_message(text.as_str()) else {
            continue;
        };
        dispatch(&relay_url, message, &waiters, &sink);
    }

    let _ = state_tx.send(ConnectionSnapshot::Disconnected);
}

fn dispatch(relay_url: &str, message: RelayMessage, waiters: &Waiters, sink: &EventSink) {
    match message {
        RelayMessage::Event(subscription_id, event) => {
            if let Some(collector) = waiters
                .collectors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&subscription_id)
            {
                let _ = collector.send(event);
                return;
            }

            // a pending request-one-via claims its response by `e` tag
            if event.kind == RESPONSE_KIND {
                if let Some(correlation_id) = find_tag_value(&event.tags, E_TAG) {
                    let matcher = waiters
                        .matchers
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(correlation_id);
                    if let Some(tx) = matcher {
                        let _ = tx.send(event);
                        return;
                    }
                }
            }

            let _ = sink.send(SessionEvent::Event {
                relay_url: relay_url.to_string(),
                event,
            });
        }
        RelayMessage::Ok(event_id, accepted, message) => {
            let _ = sink.send(SessionEvent::PublishAck {
                relay_url: relay_url.to_string(),
                event_id,
                accepted,
                message,
            });
        }
        RelayMessage::Eose(subscription_id) => {
            let waiter = waiters
                .eose
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&subscription_id);
            if let Some(tx) = waiter {
                let _ = tx.send(());
            }
            let _ = sink.send(SessionEvent::EndOfStored {
                relay_url: relay_url.to_string(),
                subscription_id,
            });
        }
        RelayMessage::Closed(subscription_id, message) => {
            waiters
                .collectors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&subscription_id);
            let _ = sink.send(SessionEvent::SubscriptionClosed {
                relay_url: relay_url.to_string(),
                subscription_id,
                message,
            });
        }
        RelayMessage::Notice(message) => {
            warn!(url = %relay_url, %message, "relay notice");
        }
        RelayMessage::Auth(challenge) => {
            debug!(url = %relay_url, %challenge, "relay requested auth");
        }
    }
}

fn parse_relay_message(text: &str) -> Option<RelayMessage> {
    let value: Value = serde_json::from_str(text).ok()?;
    let array = value.as_array()?;
    let message_type = array.first()?.as_str()?;

    match message_type {
        "EVENT" if array.len() >= 3 => {
            let subscription_id = array[1].as_str()?.to_string();
            let event: Event = serde_json::from_value(array[2].clone()).ok()?;
            Some(RelayMessage::Event(subscription_id, event))
        }
        "OK" if array.len() >= 4 => Some(RelayMessage::Ok(
            array[1].as_str()?.to_string(),
            array[2].as_bool().unwrap_or(false),
            array[3].as_str().unwrap_or("").to_string(),
        )),
        "EOSE" if array.len() >= 2 => Some(RelayMessage::Eose(array[1].as_str()?.to_string())),
        "CLOSED" if array.len() >= 2 => Some(RelayMessage::Closed(
            array[1].as_str()?.to_string(),
            array.get(2).and_then(Value::as_str).unwrap_or("").to_string(),
        )),
        "NOTICE" if array.len() >= 2 => Some(RelayMessage::Notice(array[1].as_str()?.to_string())),
        "AUTH" if array.len() >= 2 => Some(RelayMessage::Auth(array[1].as_str()?.to_string())),
        other => {
            debug!(message_type = other, "unhandled relay message type");
            None
        }
    }
}
