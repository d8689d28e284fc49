//! Request engine.
//!
//! Builds encrypted request events, races every ready relay for the
//! response, and resolves the winner against the pending registry. The
//! correlation id of a request is its signed event id. All waits are bounded
//! by the caller's deadline; late responses are dropped by the registry.

use crate::crypto::CryptoContext;
use crate::error::{Failure, NwcResult};
use crate::init::{InitStateMachine, ReadyRelay};
use crate::pending::{Completion, PendingRegistry};
use crate::router::EventRouter;
use crate::session::{RequestOutcome, RetryConfig};
use nwc_core::nip47::{
    ENCRYPTION_TAG, EXPIRATION_TAG, EncryptionScheme, Method, P_TAG, RESPONSE_KIND, RawResponse,
    serialize_request,
};
use nwc_core::{Event, EventTemplate, REQUEST_KIND};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

/// A signed request event ready for dispatch. The event id is the
/// correlation id, available before anything touches the network.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub event: Event,
    pub scheme: EncryptionScheme,
}

impl PreparedRequest {
    pub fn id(&self) -> &str {
        &self.event.id
    }
}

/// Build and sign a kind-23194 request event carrying the encrypted
/// `{method, params}` body.
pub fn build_request_event(
    crypto: &CryptoContext,
    wallet_pubkey: &str,
    method: Method,
    params: &Value,
    expiration: Option<u64>,
) -> NwcResult<PreparedRequest> {
    let body = serialize_request(method, params);
    let (ciphertext, scheme) = crypto.encrypt_active(&body)?;

    let mut tags = vec![
        vec![P_TAG.to_string(), wallet_pubkey.to_string()],
        vec![
            ENCRYPTION_TAG.to_string(),
            scheme.as_tag_value().to_string(),
        ],
    ];
    if let Some(expiration) = expiration {
        tags.push(vec![EXPIRATION_TAG.to_string(), expiration.to_string()]);
    }

    let event = crypto.sign(&EventTemplate {
        created_at: current_timestamp(),
        kind: REQUEST_KIND,
        tags,
        content: ciphertext,
    })?;

    Ok(PreparedRequest { event, scheme })
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

pub struct RequestEngine {
    wallet_pubkey: String,
    crypto: Arc<CryptoContext>,
    registry: Arc<PendingRegistry>,
    init: Arc<InitStateMachine>,
    router: Arc<EventRouter>,
    retry: RetryConfig,
}

impl RequestEngine {
    pub fn new(
        wallet_pubkey: String,
        crypto: Arc<CryptoContext>,
        registry: Arc<PendingRegistry>,
        init: Arc<InitStateMachine>,
        router: Arc<EventRouter>,
    ) -> Self {
        Self {
            wallet_pubkey,
            crypto,
            registry,
            init,
            router,
            retry: RetryConfig::default(),
        }
    }

    pub fn prepare(&self, method: Method, params: &Value) -> NwcResult<PreparedRequest> {
        build_request_event(&self.crypto, &self.wallet_pubkey, method, params, None)
    }

    /// Single-request path: returns the decoded `result` payload, with
    /// wallet-side errors already translated.
    pub async fn execute(
        &self,
        method: Method,
        params: Value,
        deadline: Duration,
    ) -> NwcResult<Value> {
        let prepared = self.prepare(method, &params)?;
        self.dispatch(method, prepared, deadline).await
    }

    /// Dispatch an already-prepared single request (the observable path
    /// prepares eagerly so the handle can expose the event id).
    pub async fn dispatch(
        &self,
        method: Method,
        prepared: PreparedRequest,
        deadline: Duration,
    ) -> NwcResult<Value> {
        let started = Instant::now();
        let handles = self.init.await_ready(deadline).await?;
        if handles.is_empty() {
            return Err(Failure::network("no response subscriptions available"));
        }

        let correlation_id = prepared.id().to_string();
        let mut completion_rx = self.registry.register_single(&correlation_id, method)?;

        let remaining = deadline.saturating_sub(started.elapsed());
        let result = self
            .run_single(&prepared, &correlation_id, handles, remaining, &mut completion_rx)
            .await;
        self.registry.remove(&correlation_id);
        result
    }

    async fn run_single(
        &self,
        prepared: &PreparedRequest,
        correlation_id: &str,
        handles: Vec<ReadyRelay>,
        remaining: Duration,
        completion_rx: &mut tokio::sync::oneshot::Receiver<Completion>,
    ) -> NwcResult<Value> {
        let race = race_relays(
            handles,
            prepared.event.clone(),
            correlation_id.to_string(),
            remaining,
            self.retry,
        );
        tokio::pin!(race);
        let deadline_sleep = sleep(remaining);
        tokio::pin!(deadline_sleep);

        tokio::select! {
            outcome = &mut race => match outcome {
                RequestOutcome::Event(event) => self.decode_response(&event),
                RequestOutcome::Timeout => Err(Failure::timeout(format!(
                    "no response within {remaining:?}"
                ))),
                RequestOutcome::ConnectionFailed(cause) => {
                    Err(Failure::network_caused_by("all relays failed", cause))
                }
            },
            // the response subscription may beat the race
            completion = completion_rx => match completion {
                Ok(Completion::Single(raw)) => raw_to_result(raw),
                Ok(Completion::Multi(_)) => {
                    Err(Failure::unknown("multi completion for a single request"))
                }
                Ok(Completion::Cancelled) | Err(_) => {
                    Err(Failure::unknown("request cancelled"))
                }
            },
            _ = &mut deadline_sleep => Err(Failure::timeout(format!(
                "no response within {remaining:?}"
            ))),
        }
    }

    /// Multi-request path: resolves once every expected key has a response,
    /// bounded by the deadline.
    pub async fn execute_multi(
        &self,
        method: Method,
        params: Value,
        expected: HashSet<String>,
        deadline: Duration,
    ) -> NwcResult<HashMap<String, RawResponse>> {
        let prepared = self.prepare(method, &params)?;
        self.dispatch_multi(method, prepared, expected, deadline)
            .await
    }

    /// Dispatch an already-prepared multi request.
    pub async fn dispatch_multi(
        &self,
        method: Method,
        prepared: PreparedRequest,
        expected: HashSet<String>,
        deadline: Duration,
    ) -> NwcResult<HashMap<String, RawResponse>> {
        let started = Instant::now();
        let handles = self.init.await_ready(deadline).await?;
        if handles.is_empty() {
            return Err(Failure::network("no response subscriptions available"));
        }

        let correlation_id = prepared.id().to_string();
        let mut completion_rx =
            self.registry
                .register_multi(&correlation_id, method, expected)?;

        let remaining = deadline.saturating_sub(started.elapsed());
        let race = race_relays(
            handles,
            prepared.event.clone(),
            correlation_id.clone(),
            remaining,
            self.retry,
        );
        tokio::pin!(race);
        let deadline_sleep = sleep(remaining);
        tokio::pin!(deadline_sleep);
        let mut race_done = false;

        loop {
            tokio::select! {
                outcome = &mut race, if !race_done => {
                    race_done = true;
                    match outcome {
                        RequestOutcome::Event(event) => {
                            // first response; the rest arrive via the
                            // response subscription
                            self.router.handle_response(&event, Some(&correlation_id));
                        }
                        RequestOutcome::Timeout => {
                            debug!(correlation_id, "multi publish race timed out");
                        }
                        RequestOutcome::ConnectionFailed(cause) => {
                            self.registry.remove(&correlation_id);
                            return Err(Failure::network_caused_by("all relays failed", cause));
                        }
                    }
                }
                completion = &mut completion_rx => {
                    return match completion {
                        Ok(Completion::Multi(results)) => Ok(results),
                        Ok(Completion::Single(_)) => {
                            Err(Failure::unknown("single completion for a multi request"))
                        }
                        Ok(Completion::Cancelled) | Err(_) => {
                            Err(Failure::unknown("request cancelled"))
                        }
                    };
                }
                _ = &mut deadline_sleep => {
                    self.registry.remove(&correlation_id);
                    return Err(Failure::timeout(format!(
                        "multi request incomplete after {remaining:?}"
                    )));
                }
            }
        }
    }

    /// Decode a response event returned by the relay race.
    fn decode_response(&self, event: &Event) -> NwcResult<Value> {
        if event.kind != RESPONSE_KIND {
            return Err(Failure::protocol(format!(
                "expected kind {RESPONSE_KIND}, got {}",
                event.kind
            )));
        }
        let plaintext = self.crypto.decrypt_event(event)?;
        let raw = RawResponse::parse(&plaintext)?;
        raw_to_result(raw)
    }
}

fn raw_to_result(raw: RawResponse) -> NwcResult<Value> {
    if let Some(error) = raw.error {
        return Err(Failure::Wallet(error));
    }
    Ok(raw.result.unwrap_or(Value::Null))
}

/// Race every ready relay; the first successful response wins and the losers
/// are cancelled. Aggregated failure prefers Timeout over ConnectionFailed.
async fn race_relays(
    handles: Vec<ReadyRelay>,
    event: Event,
    correlation_id: String,
    timeout_after: Duration,
    retry: RetryConfig,
) -> RequestOutcome {
    let (tx, mut rx) = mpsc::channel(handles.len().max(1));
    let mut tasks = Vec::with_capacity(handles.len());

    for relay in handles {
        let tx = tx.clone();
        let event = event.clone();
        let correlation_id = correlation_id.clone();
        tasks.push(tokio::spawn(async move {
            let outcome = relay
                .session
                .request_one_via(
                    &relay.subscription,
                    &event,
                    &correlation_id,
                    timeout_after,
                    retry,
                )
                .await;
            let _ = tx.send((relay.url, outcome)).await;
        }));
    }
    drop(tx);

    let mut saw_timeout = false;
    let mut connection_failure: Option<String> = None;
    while let Some((url, outcome)) = rx.recv().await {
        match outcome {
            RequestOutcome::Event(response) => {
                for task in &tasks {
                    task.abort();
                }
                debug!(url, correlation_id, "relay won the response race");
                return RequestOutcome::Event(response);
            }
            RequestOutcome::Timeout => saw_timeout = true,
            RequestOutcome::ConnectionFailed(cause) => {
                warn!(url, cause, "relay failed during request");
                connection_failure.get_or_insert(cause);
            }
        }
    }

    if saw_timeout {
        RequestOutcome::Timeout
    } else if let Some(cause) = connection_failure {
        RequestOutcome::ConnectionFailed(cause)
    } else {
        RequestOutcome::Timeout
    }
}
