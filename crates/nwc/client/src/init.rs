//! Initialization state machine.
//!
//! Construction never blocks: a background task opens the session, installs
//! the notification subscription on each relay, and creates the per-relay
//! response subscription. Relays that miss the subscription window are
//! retried by a recovery task until every relay is promoted.

use crate::error::{Failure, NwcResult};
use crate::session::{
    EventSink, Filter, RelaySession, SessionConfigurator, SessionProvider, SharedSubscription,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

/// How long each relay gets to confirm the response subscription.
pub const SUBSCRIPTION_TIMEOUT: Duration = Duration::from_secs(5);
/// Pause between recovery sweeps over still-pending relays.
pub const RECOVERY_INTERVAL: Duration = Duration::from_secs(3);

const NOTIFICATION_SUBSCRIPTION_ID: &str = "nwc-notifications";

/// Lifecycle of the multi-relay setup.
#[derive(Debug, Clone, PartialEq)]
pub enum InitState {
    NotStarted,
    Initializing,
    Ready {
        ready: Vec<String>,
    },
    PartialReady {
        ready: Vec<String>,
        pending: Vec<String>,
    },
    Failed {
        cause: String,
    },
}

/// A relay whose response subscription is live.
#[derive(Clone)]
pub struct ReadyRelay {
    pub url: String,
    pub session: Arc<dyn RelaySession>,
    pub subscription: SharedSubscription,
}

impl std::fmt::Debug for ReadyRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadyRelay")
            .field("url", &self.url)
            .field("session", &self.session.url())
            .field("subscription", &self.subscription)
            .finish()
    }
}

pub struct InitStateMachine {
    provider: Arc<dyn SessionProvider>,
    relay_urls: Vec<String>,
    response_filters: Vec<Filter>,
    sink: EventSink,
    configurator: SessionConfigurator,
    state_tx: watch::Sender<InitState>,
    state_rx: watch::Receiver<InitState>,
    subscriptions: Mutex<HashMap<String, SharedSubscription>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl InitStateMachine {
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        relay_urls: Vec<String>,
        response_filters: Vec<Filter>,
        notification_filters: Vec<Filter>,
        sink: EventSink,
    ) -> Arc<Self> {
        let (state_tx, state_rx) = watch::channel(InitState::NotStarted);

        // Installs the notification subscription whenever a relay (re)connects.
        let configurator: SessionConfigurator = Arc::new(move |handle| {
            let filters = notification_filters.clone();
            Box::pin(async move {
                if let Err(e) = handle
                    .session
                    .subscribe(NOTIFICATION_SUBSCRIPTION_ID, &filters)
                    .await
                {
                    warn!(url = handle.url, error = %e, "notification subscription failed");
                }
            })
        });

        Arc::new(Self {
            provider,
            relay_urls,
            response_filters,
            sink,
            configurator,
            state_tx,
            state_rx,
            subscriptions: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn state(&self) -> InitState {
        self.state_rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<InitState> {
        self.state_rx.clone()
    }

    /// Kick off initialization in the background. A no-op unless the machine
    /// is in `NotStarted`.
    pub fn start(self: &Arc<Self>) {
        let should_run = self.state_tx.send_if_modified(|state| {
            if matches!(state, InitState::NotStarted) {
                *state = InitState::Initializing;
                true
            } else {
                false
            }
        });
        if !should_run {
            return;
        }

        let machine = Arc::clone(self);
        let task = tokio::spawn(async move { machine.run_initialization().await });
        self.record_task(task);
    }

    async fn run_initialization(self: Arc<Self>) {
        if let Err(e) = self
            .provider
            .open(self.sink.clone(), Arc::clone(&self.configurator))
            .await
        {
            warn!(error = %e, "session open failed");
            let _ = self.state_tx.send(InitState::Failed {
                cause: e.to_string(),
            });
            self.spawn_recovery(self.relay_urls.clone());
            return;
        }

        let handles = self.provider.runtime_handles();
        let mut ready = Vec::new();
        let mut pending = Vec::new();

        for handle in &handles {
            match handle
                .session
                .create_shared_subscription(self.response_filters.clone(), SUBSCRIPTION_TIMEOUT)
                .await
            {
                Some(subscription) => {
                    self.store_subscription(&handle.url, subscription);
                    ready.push(handle.url.clone());
                }
                None => {
                    debug!(url = handle.url, "response subscription not confirmed");
                    pending.push(handle.url.clone());
                }
            }
        }

        // relays the provider never materialized still need recovering
        for url in &self.relay_urls {
            if !ready.contains(url) && !pending.contains(url) {
                pending.push(url.clone());
            }
        }

        if pending.is_empty() && !ready.is_empty() {
            info!(relays = ready.len(), "all relays ready");
            let _ = self.state_tx.send(InitState::Ready { ready });
        } else if !ready.is_empty() {
            info!(
                ready = ready.len(),
                pending = pending.len(),
                "partially ready, starting recovery"
            );
            let _ = self.state_tx.send(InitState::PartialReady {
                ready,
                pending: pending.clone(),
            });
            self.spawn_recovery(pending);
        } else {
            warn!("no relay produced a response subscription");
            let _ = self.state_tx.send(InitState::Failed {
                cause: "no response subscriptions available".to_string(),
            });
            self.spawn_recovery(pending);
        }
    }

    fn spawn_recovery(self: &Arc<Self>, pending: Vec<String>) {
        if pending.is_empty() {
            return;
        }
        let machine = Arc::clone(self);
        let task = tokio::spawn(async move { machine.run_recovery(pending).await });
        self.record_task(task);
    }

    async fn run_recovery(self: Arc<Self>, mut pending: Vec<String>) {
        while !pending.is_empty() {
            sleep(RECOVERY_INTERVAL).await;

            let mut still_pending = Vec::new();
            for url in pending {
                if self.try_recover_relay(&url).await {
                    self.promote(&url);
                } else {
                    still_pending.push(url);
                }
            }
            pending = still_pending;
        }
    }

    async fn try_recover_relay(&self, url: &str) -> bool {
        if let Err(e) = self.provider.ensure_relay(url).await {
            debug!(url, error = %e, "recovery reconnect failed");
            return false;
        }

        let Some(handle) = self
            .provider
            .runtime_handles()
            .into_iter()
            .find(|handle| handle.url == url)
        else {
            return false;
        };

        match handle
            .session
            .create_shared_subscription(self.response_filters.clone(), SUBSCRIPTION_TIMEOUT)
            .await
        {
            Some(subscription) => {
                self.store_subscription(url, subscription);
                true
            }
            None => false,
        }
    }

    /// Move a recovered relay into the ready set, re-deriving the state from
    /// the subscription table so stale recovery snapshots cannot regress it.
    fn promote(&self, url: &str) {
        info!(url, "relay recovered");
        let ready_now: Vec<String> = {
            let subscriptions = self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.relay_urls
                .iter()
                .filter(|candidate| subscriptions.contains_key(*candidate))
                .cloned()
                .collect()
        };
        let pending_now: Vec<String> = self
            .relay_urls
            .iter()
            .filter(|candidate| !ready_now.contains(candidate))
            .cloned()
            .collect();

        let _ = self.state_tx.send(if pending_now.is_empty() {
            InitState::Ready { ready: ready_now }
        } else {
            InitState::PartialReady {
                ready: ready_now,
                pending: pending_now,
            }
        });
    }

    /// Wait until the machine reaches a usable state and return the relays
    /// whose response subscription is live. A `Failed` machine is restarted
    /// once (the network may have come back since).
    pub async fn await_ready(self: &Arc<Self>, deadline: Duration) -> NwcResult<Vec<ReadyRelay>> {
        let mut rx = self.state_rx.clone();

        let restarted = self.state_tx.send_if_modified(|state| {
            if matches!(state, InitState::Failed { .. }) {
                *state = InitState::NotStarted;
                true
            } else {
                false
            }
        });
        if restarted {
            debug!("initialization previously failed, restarting");
            self.start();
        }

        let deadline_at = Instant::now() + deadline;
        loop {
            let current = rx.borrow_and_update().clone();
            match current {
                InitState::Ready { .. } | InitState::PartialReady { .. } => {
                    return Ok(self.ready_relays());
                }
                InitState::Failed { cause } => {
                    return Err(Failure::network_caused_by(
                        "wallet session initialization failed",
                        cause,
                    ));
                }
                InitState::NotStarted | InitState::Initializing => {}
            }

            let remaining = deadline_at.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Failure::timeout("timed out waiting for relay readiness"));
            }
            match timeout(remaining, rx.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    return Err(Failure::unknown("initialization state machine dropped"));
                }
                Err(_) => {
                    return Err(Failure::timeout("timed out waiting for relay readiness"));
                }
            }
        }
    }

    fn ready_relays(&self) -> Vec<ReadyRelay> {
        let subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.provider
            .runtime_handles()
            .into_iter()
            .filter_map(|handle| {
                subscriptions.get(&handle.url).map(|subscription| ReadyRelay {
                    url: handle.url,
                    session: handle.session,
                    subscription: subscription.clone(),
                })
            })
            .collect()
    }

    fn store_subscription(&self, url: &str, subscription: SharedSubscription) {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), subscription);
    }

    fn record_task(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }

    /// Abort the background tasks. Called from `close()`.
    pub fn close(&self) {
        for task in self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
    }
}
