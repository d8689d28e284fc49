//! Multi-relay session provider and the process-wide session manager.
//!
//! `RelaySessionProvider` implements the session contract over a set of
//! [`Relay`]s. `SessionManager` reference-counts providers per connection URI
//! so several clients for the same wallet share one set of sockets.

use crate::error::{Failure, NwcResult};
use crate::relay::{Relay, RelayConfig};
use crate::session::{
    EventSink, RelaySession, SessionConfigurator, SessionHandle, SessionProvider,
};
use async_trait::async_trait;
use nwc_core::{Event, WalletConnectUri};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Session provider backed by one [`Relay`] per URL.
pub struct RelaySessionProvider {
    urls: Vec<String>,
    config: RelayConfig,
    relays: Mutex<Vec<(String, Arc<Relay>)>>,
    sink: Mutex<Option<EventSink>>,
    configurator: Mutex<Option<SessionConfigurator>>,
}

impl RelaySessionProvider {
    pub fn new(urls: &[String]) -> Self {
        Self::with_config(urls, RelayConfig::default())
    }

    pub fn with_config(urls: &[String], config: RelayConfig) -> Self {
        Self {
            urls: urls.to_vec(),
            config,
            relays: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
            configurator: Mutex::new(None),
        }
    }

    fn relay(&self, url: &str) -> Option<Arc<Relay>> {
        self.relays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(relay_url, _)| relay_url == url)
            .map(|(_, relay)| Arc::clone(relay))
    }

    fn get_or_create_relay(&self, url: &str) -> NwcResult<Arc<Relay>> {
        if let Some(relay) = self.relay(url) {
            return Ok(relay);
        }
        let relay = Arc::new(Relay::new(url, self.config.clone())?);
        self.relays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((url.to_string(), Arc::clone(&relay)));
        Ok(relay)
    }

    fn stored_sink(&self) -> Option<EventSink> {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn stored_configurator(&self) -> Option<SessionConfigurator> {
        self.configurator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SessionProvider for RelaySessionProvider {
    async fn open(&self, sink: EventSink, configurator: SessionConfigurator) -> NwcResult<()> {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink.clone());
        *self
            .configurator
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&configurator));

        let mut connected = 0usize;
        let mut last_error = None;
        for url in &self.urls {
            let relay = match self.get_or_create_relay(url) {
                Ok(relay) => relay,
                Err(e) => {
                    warn!(url, error = %e, "skipping unusable relay URL");
                    last_error = Some(e);
                    continue;
                }
            };
            match relay.connect(sink.clone()).await {
                Ok(()) => {
                    connected += 1;
                    let handle = SessionHandle {
                        url: url.clone(),
                        session: relay as Arc<dyn RelaySession>,
                    };
                    (*configurator)(handle).await;
                }
                Err(e) => {
                    warn!(url, error = %e, "relay connect failed");
                    last_error = Some(e);
                }
            }
        }

        if connected == 0 {
            return Err(last_error
                .unwrap_or_else(|| Failure::network("no relays could be opened")));
        }
        info!(connected, total = self.urls.len(), "session opened");
        Ok(())
    }

    fn runtime_handles(&self) -> Vec<SessionHandle> {
        self.relays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(url, relay)| SessionHandle {
                url: url.clone(),
                session: Arc::clone(relay) as Arc<dyn RelaySession>,
            })
            .collect()
    }

    async fn ensure_relay(&self, url: &str) -> NwcResult<()> {
        let relay = self.get_or_create_relay(url)?;
        if relay.is_connected() {
            return Ok(());
        }

        let sink = self
            .stored_sink()
            .ok_or_else(|| Failure::network("session is not open"))?;
        relay.connect(sink).await?;

        if let Some(configurator) = self.stored_configurator() {
            (*configurator)(SessionHandle {
                url: url.to_string(),
                session: relay as Arc<dyn RelaySession>,
            })
            .await;
        }
        Ok(())
    }

    async fn publish(&self, event: &Event) -> NwcResult<()> {
        let relays: Vec<(String, Arc<Relay>)> = self
            .relays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(url, relay)| (url.clone(), Arc::clone(relay)))
            .collect();

        let mut last_error = Failure::network("no relays available");
        let mut accepted = false;
        for (url, relay) in relays {
            match relay.send_event(event).await {
                Ok(()) => accepted = true,
                Err(e) => {
                    debug!(url, error = %e, "publish failed");
                    last_error = e;
                }
            }
        }

        if accepted { Ok(()) } else { Err(last_error) }
    }

    async fn publish_to(&self, relay_url: &str, event: &Event) -> NwcResult<()> {
        match self.relay(relay_url) {
            Some(relay) => relay.send_event(event).await,
            None => Err(Failure::network(format!("unknown relay {relay_url}"))),
        }
    }

    async fn authenticate(&self, relay_url: &str, event: &Event) -> NwcResult<()> {
        match self.relay(relay_url) {
            Some(relay) => relay.send_auth(event).await,
            None => Err(Failure::network(format!("unknown relay {relay_url}"))),
        }
    }

    async fn close(&self) {
        let relays: Vec<Arc<Relay>> = self
            .relays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, relay)| Arc::clone(relay))
            .collect();
        for relay in relays {
            relay.disconnect().await;
        }
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.configurator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

struct ManagedSession {
    provider: Arc<RelaySessionProvider>,
    refs: usize,
}

/// Reference-counted session providers keyed by connection URI. `acquire`
/// returns the same provider while any reference is alive; the last
/// `release` disposes it.
#[derive(Default)]
pub struct SessionManager {
    entries: Mutex<HashMap<String, ManagedSession>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, uri: &WalletConnectUri) -> Arc<RelaySessionProvider> {
        let key = uri.to_string();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(key).or_insert_with(|| ManagedSession {
            provider: Arc::new(RelaySessionProvider::new(&uri.relays)),
            refs: 0,
        });
        entry.refs += 1;
        Arc::clone(&entry.provider)
    }

    /// Drop one reference. Returns true when the underlying session was
    /// disposed.
    pub fn release(&self, uri: &WalletConnectUri) -> bool {
        let key = uri.to_string();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = entries.get_mut(&key) else {
            return false;
        };

        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs > 0 {
            return false;
        }

        if let Some(entry) = entries.remove(&key) {
            // best-effort teardown; outside a runtime the sockets close on drop
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let provider = entry.provider;
                handle.spawn(async move { provider.close().await });
            }
        }
        true
    }

    pub fn active_sessions(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_uri() -> WalletConnectUri {
        WalletConnectUri::new(
            "ab".repeat(32),
            vec!["wss://relay.example.com".to_string()],
            [7u8; 32],
        )
        .unwrap()
    }

    #[test]
    fn test_acquire_shares_and_release_disposes() {
        let manager = SessionManager::new();
        let uri = sample_uri();

        let first = manager.acquire(&uri);
        let second = manager.acquire(&uri);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.active_sessions(), 1);

        assert!(!manager.release(&uri));
        assert_eq!(manager.active_sessions(), 1);

        assert!(manager.release(&uri));
        assert_eq!(manager.active_sessions(), 0);

        let third = manager.acquire(&uri);
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn test_release_unknown_uri_is_noop() {
        let manager = SessionManager::new();
        assert!(!manager.release(&sample_uri()));
    }

    #[test]
    fn test_runtime_handles_preserve_order() {
        let provider = RelaySessionProvider::new(&[
            "wss://a.example".to_string(),
            "wss://b.example".to_string(),
        ]);
        provider.get_or_create_relay("wss://a.example").unwrap();
        provider.get_or_create_relay("wss://b.example").unwrap();

        let urls: Vec<String> = provider
            .runtime_handles()
            .into_iter()
            .map(|handle| handle.url)
            .collect();
        assert_eq!(urls, vec!["wss://a.example", "wss://b.example"]);
    }
}
