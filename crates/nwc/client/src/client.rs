//! The wallet client façade.
//!
//! `NwcClient` owns the engine, the registry, the init machine, and the
//! router task. Construction is non-blocking: initialization runs in the
//! background and every request waits for readiness under its own deadline.
//! Each wallet method has a suspending form taking a deadline and an
//! observable `_request` form returning a [`RequestHandle`].

use crate::crypto::CryptoContext;
use crate::engine::RequestEngine;
use crate::error::{Failure, NwcResult};
use crate::handle::{OBSERVABLE_DEADLINE, RequestHandle};
use crate::init::{InitState, InitStateMachine};
use crate::pending::PendingRegistry;
use crate::router::EventRouter;
use crate::session::{
    AggregateConnectionState, QueryOutcome, RetryConfig, SessionProvider, aggregate_state,
};
use crate::sessions::RelaySessionProvider;
use nwc_core::nip47::{
    BalanceResult, BitcoinAmount, GetInfoResult, INFO_EVENT_KIND, ListTransactionsParams,
    LookupInvoiceParams, MakeInvoiceParams, Method, MultiPayInvoiceItem, MultiPayKeysendItem,
    NOTIFICATION_KIND, NwcError, PayInvoiceParams, PayInvoiceResult, PayKeysendParams,
    RESPONSE_KIND, RawResponse, Transaction, WalletDescriptor, WalletMetadata, WalletNotification,
    parse_transactions,
};
use nwc_core::{CodecError, WalletConnectUri, get_public_key_hex};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Bounded notification fan-out; lagging subscribers lose the oldest items.
const NOTIFICATION_CAPACITY: usize = 64;

/// Per-item outcome of a multi request.
#[derive(Debug, Clone, PartialEq)]
pub enum MultiResult<T> {
    Success(T),
    Failure(NwcError),
}

struct ClientInner {
    uri: WalletConnectUri,
    client_pubkey: String,
    crypto: Arc<CryptoContext>,
    registry: Arc<PendingRegistry>,
    init: Arc<InitStateMachine>,
    router: Arc<EventRouter>,
    engine: RequestEngine,
    provider: Arc<dyn SessionProvider>,
    owns_provider: bool,
    notifications: Mutex<Option<broadcast::Sender<WalletNotification>>>,
    latest_info: Mutex<Option<GetInfoResult>>,
    router_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// A Nostr Wallet Connect client.
#[derive(Clone)]
pub struct NwcClient {
    inner: Arc<ClientInner>,
}

impl NwcClient {
    /// Connect with the default relay session runtime. The session is owned
    /// by this client and released on [`NwcClient::close`].
    pub fn connect(uri: &str) -> NwcResult<Self> {
        let uri = WalletConnectUri::parse(uri)
            .map_err(|e| Failure::unknown(format!("invalid connection URI: {e}")))?;
        let provider = Arc::new(RelaySessionProvider::new(&uri.relays));
        Self::build(uri, provider, true)
    }

    /// Connect over an externally managed session provider (e.g. one shared
    /// through [`crate::sessions::SessionManager`]). The provider is NOT
    /// closed by [`NwcClient::close`].
    pub fn with_session_provider(
        uri: WalletConnectUri,
        provider: Arc<dyn SessionProvider>,
    ) -> NwcResult<Self> {
        Self::build(uri, provider, false)
    }

    fn build(
        uri: WalletConnectUri,
        provider: Arc<dyn SessionProvider>,
        owns_provider: bool,
    ) -> NwcResult<Self> {
        let client_pubkey = get_public_key_hex(&uri.secret).map_err(Failure::from)?;
        let crypto = Arc::new(CryptoContext::new(uri.secret, &uri.wallet_pubkey)?);
        let registry = Arc::new(PendingRegistry::new());
        let (notif_tx, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        let router = EventRouter::new(
            uri.wallet_pubkey.clone(),
            client_pubkey.clone(),
            Arc::clone(&crypto),
            Arc::clone(&registry),
            notif_tx.clone(),
        );

        let (sink_tx, sink_rx) = mpsc::unbounded_channel();
        let router_task = router.spawn(sink_rx);

        let response_filters = vec![json!({
            "kinds": [RESPONSE_KIND],
            "authors": [uri.wallet_pubkey],
            "#p": [client_pubkey],
        })];
        // both variants: some wallets omit the p tag on notifications
        let notification_filters = vec![
            json!({
                "kinds": [NOTIFICATION_KIND],
                "authors": [uri.wallet_pubkey],
                "#p": [client_pubkey],
            }),
            json!({
                "kinds": [NOTIFICATION_KIND],
                "authors": [uri.wallet_pubkey],
            }),
        ];

        let init = InitStateMachine::new(
            Arc::clone(&provider),
            uri.relays.clone(),
            response_filters,
            notification_filters,
            sink_tx,
        );
        init.start();

        let engine = RequestEngine::new(
            uri.wallet_pubkey.clone(),
            Arc::clone(&crypto),
            Arc::clone(&registry),
            Arc::clone(&init),
            Arc::clone(&router),
        );

        info!(wallet = %uri.wallet_pubkey, relays = uri.relays.len(), "wallet client created");
        Ok(Self {
            inner: Arc::new(ClientInner {
                uri,
                client_pubkey,
                crypto,
                registry,
                init,
                router,
                engine,
                provider,
                owns_provider,
                notifications: Mutex::new(Some(notif_tx)),
                latest_info: Mutex::new(None),
                router_task: Mutex::new(Some(router_task)),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn uri(&self) -> &WalletConnectUri {
        &self.inner.uri
    }

    pub fn client_pubkey(&self) -> &str {
        &self.inner.client_pubkey
    }

    pub fn init_state(&self) -> InitState {
        self.inner.init.state()
    }

    /// Connection state aggregated over all relays.
    pub fn connection_state(&self) -> AggregateConnectionState {
        let snapshots: Vec<_> = self
            .inner
            .provider
            .runtime_handles()
            .iter()
            .map(|handle| *handle.session.snapshots().borrow())
            .collect();
        aggregate_state(&snapshots)
    }

    /// Subscribe to wallet push notifications.
    pub fn notifications(&self) -> NwcResult<broadcast::Receiver<WalletNotification>> {
        self.inner
            .notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or_else(|| Failure::unknown("client is closed"))
    }

    // --- suspending wallet methods ---

    pub async fn get_balance(&self, deadline: Duration) -> NwcResult<BitcoinAmount> {
        self.ensure_open()?;
        let result = self
            .inner
            .engine
            .execute(Method::GetBalance, json!({}), deadline)
            .await?;
        Ok(BalanceResult::from_value(&result)?.balance)
    }

    pub async fn get_info(&self, deadline: Duration) -> NwcResult<GetInfoResult> {
        self.ensure_open()?;
        let result = self
            .inner
            .engine
            .execute(Method::GetInfo, json!({}), deadline)
            .await?;
        let info = GetInfoResult::from_value(&result)?;
        *self
            .inner
            .latest_info
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(info.clone());
        Ok(info)
    }

    pub async fn pay_invoice(
        &self,
        params: PayInvoiceParams,
        deadline: Duration,
    ) -> NwcResult<PayInvoiceResult> {
        self.ensure_open()?;
        let result = self
            .inner
            .engine
            .execute(Method::PayInvoice, to_params(&params)?, deadline)
            .await?;
        Ok(PayInvoiceResult::from_value(&result)?)
    }

    pub async fn pay_keysend(
        &self,
        params: PayKeysendParams,
        deadline: Duration,
    ) -> NwcResult<PayInvoiceResult> {
        self.ensure_open()?;
        let result = self
            .inner
            .engine
            .execute(Method::PayKeysend, to_params(&params)?, deadline)
            .await?;
        Ok(PayInvoiceResult::from_value(&result)?)
    }

    pub async fn make_invoice(
        &self,
        params: MakeInvoiceParams,
        deadline: Duration,
    ) -> NwcResult<Transaction> {
        self.ensure_open()?;
        let result = self
            .inner
            .engine
            .execute(Method::MakeInvoice, to_params(&params)?, deadline)
            .await?;
        Ok(Transaction::from_value(&result)?)
    }

    pub async fn lookup_invoice(
        &self,
        params: LookupInvoiceParams,
        deadline: Duration,
    ) -> NwcResult<Transaction> {
        self.ensure_open()?;
        if params.payment_hash.is_none() && params.invoice.is_none() {
            return Err(Failure::protocol(
                "lookup_invoice requires payment_hash or invoice",
            ));
        }
        let result = self
            .inner
            .engine
            .execute(Method::LookupInvoice, to_params(&params)?, deadline)
            .await?;
        Ok(Transaction::from_value(&result)?)
    }

    pub async fn list_transactions(
        &self,
        params: ListTransactionsParams,
        deadline: Duration,
    ) -> NwcResult<Vec<Transaction>> {
        self.ensure_open()?;
        let result = self
            .inner
            .engine
            .execute(Method::ListTransactions, to_params(&params)?, deadline)
            .await?;
        Ok(parse_transactions(&result)?)
    }

    pub async fn multi_pay_invoice(
        &self,
        invoices: Vec<MultiPayInvoiceItem>,
        deadline: Duration,
    ) -> NwcResult<HashMap<String, MultiResult<PayInvoiceResult>>> {
        self.ensure_open()?;
        let (params, expected) = multi_invoice_params(invoices)?;
        let results = self
            .inner
            .engine
            .execute_multi(Method::MultiPayInvoice, params, expected, deadline)
            .await?;
        Ok(map_multi(results, |value| {
            PayInvoiceResult::from_value(value)
        }))
    }

    pub async fn multi_pay_keysend(
        &self,
        keysends: Vec<MultiPayKeysendItem>,
        deadline: Duration,
    ) -> NwcResult<HashMap<String, MultiResult<PayInvoiceResult>>> {
        self.ensure_open()?;
        let (params, expected) = multi_keysend_params(keysends)?;
        let results = self
            .inner
            .engine
            .execute_multi(Method::MultiPayKeysend, params, expected, deadline)
            .await?;
        Ok(map_multi(results, |value| {
            PayInvoiceResult::from_value(value)
        }))
    }

    /// Fetch the wallet info event (kind 13194) from the ready relays, first
    /// non-empty answer wins, and renegotiate the encryption scheme.
    pub async fn refresh_wallet_metadata(&self, deadline: Duration) -> NwcResult<WalletMetadata> {
        self.ensure_open()?;
        let started = Instant::now();
        let handles = self.inner.init.await_ready(deadline).await?;
        if handles.is_empty() {
            return Err(Failure::network("no response subscriptions available"));
        }

        let filter = json!({
            "kinds": [INFO_EVENT_KIND],
            "authors": [self.inner.uri.wallet_pubkey],
            "limit": 1,
        });
        let remaining = deadline.saturating_sub(started.elapsed());

        let (tx, mut rx) = mpsc::channel(handles.len());
        let mut tasks = Vec::with_capacity(handles.len());
        for relay in handles {
            let tx = tx.clone();
            let filter = filter.clone();
            tasks.push(tokio::spawn(async move {
                let outcome = relay
                    .session
                    .query(vec![filter], remaining, RetryConfig::default())
                    .await;
                let _ = tx.send(outcome).await;
            }));
        }
        drop(tx);

        let mut metadata = None;
        while let Some(outcome) = rx.recv().await {
            if let QueryOutcome::Events(events) = outcome {
                if let Some(event) = events.first() {
                    metadata = Some(WalletMetadata::from_event(event));
                    break;
                }
            }
        }
        for task in &tasks {
            task.abort();
        }

        let Some(metadata) = metadata else {
            return Err(Failure::network("Unable to fetch wallet metadata"));
        };
        self.inner.crypto.apply_metadata(metadata.clone())?;
        debug!(schemes = ?metadata.encryption_schemes, "wallet metadata refreshed");
        Ok(metadata)
    }

    /// Merge the connection URI, the latest metadata and info, and the
    /// negotiated scheme. Fetches whatever has not been seen yet.
    pub async fn describe_wallet(&self, deadline: Duration) -> NwcResult<WalletDescriptor> {
        self.ensure_open()?;
        let metadata = match self.inner.crypto.metadata() {
            Some(metadata) => metadata,
            None => self.refresh_wallet_metadata(deadline).await?,
        };
        let stored_info = self
            .inner
            .latest_info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let info = match stored_info {
            Some(info) => info,
            None => self.get_info(deadline).await?,
        };

        Ok(WalletDescriptor {
            uri: self.inner.uri.clone(),
            metadata,
            info,
            encryption: self.inner.crypto.active_scheme(),
        })
    }

    // --- observable forms ---

    pub fn get_balance_request(&self) -> RequestHandle<BitcoinAmount> {
        self.observable(Method::GetBalance, Ok(json!({})), |value| {
            Ok(BalanceResult::from_value(&value)?.balance)
        })
    }

    pub fn get_info_request(&self) -> RequestHandle<GetInfoResult> {
        let inner = Arc::clone(&self.inner);
        self.observable(Method::GetInfo, Ok(json!({})), move |value| {
            let info = GetInfoResult::from_value(&value)?;
            *inner
                .latest_info
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(info.clone());
            Ok(info)
        })
    }

    pub fn pay_invoice_request(&self, params: PayInvoiceParams) -> RequestHandle<PayInvoiceResult> {
        self.observable(Method::PayInvoice, to_params(&params), |value| {
            Ok(PayInvoiceResult::from_value(&value)?)
        })
    }

    pub fn pay_keysend_request(&self, params: PayKeysendParams) -> RequestHandle<PayInvoiceResult> {
        self.observable(Method::PayKeysend, to_params(&params), |value| {
            Ok(PayInvoiceResult::from_value(&value)?)
        })
    }

    pub fn make_invoice_request(&self, params: MakeInvoiceParams) -> RequestHandle<Transaction> {
        self.observable(Method::MakeInvoice, to_params(&params), |value| {
            Ok(Transaction::from_value(&value)?)
        })
    }

    pub fn lookup_invoice_request(&self, params: LookupInvoiceParams) -> RequestHandle<Transaction> {
        if params.payment_hash.is_none() && params.invoice.is_none() {
            return RequestHandle::failed(Failure::protocol(
                "lookup_invoice requires payment_hash or invoice",
            ));
        }
        self.observable(Method::LookupInvoice, to_params(&params), |value| {
            Ok(Transaction::from_value(&value)?)
        })
    }

    pub fn list_transactions_request(
        &self,
        params: ListTransactionsParams,
    ) -> RequestHandle<Vec<Transaction>> {
        self.observable(Method::ListTransactions, to_params(&params), |value| {
            Ok(parse_transactions(&value)?)
        })
    }

    pub fn multi_pay_invoice_request(
        &self,
        invoices: Vec<MultiPayInvoiceItem>,
    ) -> RequestHandle<HashMap<String, MultiResult<PayInvoiceResult>>> {
        self.observable_multi(Method::MultiPayInvoice, multi_invoice_params(invoices))
    }

    pub fn multi_pay_keysend_request(
        &self,
        keysends: Vec<MultiPayKeysendItem>,
    ) -> RequestHandle<HashMap<String, MultiResult<PayInvoiceResult>>> {
        self.observable_multi(Method::MultiPayKeysend, multi_keysend_params(keysends))
    }

    fn observable_multi(
        &self,
        method: Method,
        parts: NwcResult<(Value, HashSet<String>)>,
    ) -> RequestHandle<HashMap<String, MultiResult<PayInvoiceResult>>> {
        if let Err(failure) = self.ensure_open() {
            return RequestHandle::failed(failure);
        }
        let (params, expected) = match parts {
            Ok(parts) => parts,
            Err(failure) => return RequestHandle::failed(failure),
        };
        let prepared = match self.inner.engine.prepare(method, &params) {
            Ok(prepared) => prepared,
            Err(failure) => return RequestHandle::failed(failure),
        };

        let event_id = prepared.id().to_string();
        let inner = Arc::clone(&self.inner);
        RequestHandle::spawn(Some(event_id), async move {
            let results = inner
                .engine
                .dispatch_multi(method, prepared, expected, OBSERVABLE_DEADLINE)
                .await?;
            Ok(map_multi(results, |value| {
                PayInvoiceResult::from_value(value)
            }))
        })
    }

    pub fn refresh_wallet_metadata_request(&self) -> RequestHandle<WalletMetadata> {
        let client = self.clone();
        RequestHandle::spawn(None, async move {
            client.refresh_wallet_metadata(OBSERVABLE_DEADLINE).await
        })
    }

    pub fn describe_wallet_request(&self) -> RequestHandle<WalletDescriptor> {
        let client = self.clone();
        RequestHandle::spawn(None, async move {
            client.describe_wallet(OBSERVABLE_DEADLINE).await
        })
    }

    fn observable<T, P>(
        &self,
        method: Method,
        params: NwcResult<Value>,
        parse: P,
    ) -> RequestHandle<T>
    where
        T: Clone + Send + Sync + 'static,
        P: FnOnce(Value) -> Result<T, CodecError> + Send + 'static,
    {
        if let Err(failure) = self.ensure_open() {
            return RequestHandle::failed(failure);
        }
        let params = match params {
            Ok(params) => params,
            Err(failure) => return RequestHandle::failed(failure),
        };
        // prepare eagerly so the handle can expose the request event id
        let prepared = match self.inner.engine.prepare(method, &params) {
            Ok(prepared) => prepared,
            Err(failure) => return RequestHandle::failed(failure),
        };

        let event_id = prepared.id().to_string();
        let inner = Arc::clone(&self.inner);
        RequestHandle::spawn(Some(event_id), async move {
            let value = inner
                .engine
                .dispatch(method, prepared, OBSERVABLE_DEADLINE)
                .await?;
            parse(value).map_err(Failure::from)
        })
    }

    /// Cancel all pending awaiters, stop background tasks, close the
    /// notification channel, free key material, and release the session if
    /// owned. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(wallet = %self.inner.uri.wallet_pubkey, "closing wallet client");

        self.inner.registry.cancel_all();
        self.inner.init.close();
        if let Some(task) = self
            .inner
            .router_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.inner.router.close_notifications();
        self.inner
            .notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.inner.crypto.close();

        if self.inner.owns_provider {
            self.inner.provider.close().await;
        }
    }

    fn ensure_open(&self) -> NwcResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Failure::unknown("client is closed"));
        }
        Ok(())
    }
}

fn to_params<P: serde::Serialize>(params: &P) -> NwcResult<Value> {
    serde_json::to_value(params)
        .map_err(|e| Failure::unknown(format!("params serialization: {e}")))
}

/// Assign item ids (caller-supplied or random 8-byte hex) and build the
/// `multi_pay_invoice` params plus the expected key set.
fn multi_invoice_params(
    invoices: Vec<MultiPayInvoiceItem>,
) -> NwcResult<(Value, HashSet<String>)> {
    let mut items = Vec::with_capacity(invoices.len());
    let mut expected = HashSet::new();
    for mut item in invoices {
        let id = item.id.clone().unwrap_or_else(random_item_id);
        if !expected.insert(id.clone()) {
            return Err(Failure::protocol(format!("duplicate invoice id '{id}'")));
        }
        item.id = Some(id);
        items.push(item);
    }
    Ok((json!({ "invoices": items }), expected))
}

fn multi_keysend_params(
    keysends: Vec<MultiPayKeysendItem>,
) -> NwcResult<(Value, HashSet<String>)> {
    let mut items = Vec::with_capacity(keysends.len());
    let mut expected = HashSet::new();
    for mut item in keysends {
        let id = item.id.clone().unwrap_or_else(random_item_id);
        if !expected.insert(id.clone()) {
            return Err(Failure::protocol(format!("duplicate keysend id '{id}'")));
        }
        item.id = Some(id);
        items.push(item);
    }
    Ok((json!({ "keysends": items }), expected))
}

fn map_multi<T>(
    results: HashMap<String, RawResponse>,
    parse: impl Fn(&Value) -> Result<T, CodecError>,
) -> HashMap<String, MultiResult<T>> {
    results
        .into_iter()
        .map(|(id, raw)| {
            let outcome = if let Some(error) = raw.error {
                MultiResult::Failure(error)
            } else {
                match raw.result.as_ref().map(&parse) {
                    Some(Ok(value)) => MultiResult::Success(value),
                    Some(Err(e)) => MultiResult::Failure(NwcError {
                        code: "internal".to_string(),
                        message: e.to_string(),
                    }),
                    None => MultiResult::Failure(NwcError {
                        code: "internal".to_string(),
                        message: "missing result payload".to_string(),
                    }),
                }
            };
            (id, outcome)
        })
        .collect()
}

fn random_item_id() -> String {
    use rand::Rng;
    let bytes: [u8; 8] = rand::rng().random();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nwc_core::{generate_secret_key, get_public_key_hex};

    fn test_uri() -> String {
        let wallet_pubkey = get_public_key_hex(&generate_secret_key()).unwrap();
        let secret = hex::encode(generate_secret_key());
        format!(
            "nostr+walletconnect://{wallet_pubkey}?relay=wss://relay.example.com&secret={secret}&lud16=bob@example.com"
        )
    }

    #[tokio::test]
    async fn test_connect_parses_uri() {
        let client = NwcClient::connect(&test_uri()).unwrap();
        assert_eq!(client.uri().wallet_pubkey.len(), 64);
        assert_eq!(client.uri().lud16.as_deref(), Some("bob@example.com"));
        assert_eq!(client.client_pubkey().len(), 64);
        client.close().await;
    }

    #[tokio::test]
    async fn test_lookup_invoice_requires_a_reference() {
        let client = NwcClient::connect(&test_uri()).unwrap();
        let err = client
            .lookup_invoice(LookupInvoiceParams::default(), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Failure::Protocol { .. }));

        let handle = client.lookup_invoice_request(LookupInvoiceParams::default());
        assert!(!handle.is_active());
        client.close().await;
    }

    #[tokio::test]
    async fn test_operations_fail_after_close() {
        let client = NwcClient::connect(&test_uri()).unwrap();
        client.close().await;

        let err = client
            .get_balance(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Failure::Unknown { .. }));
        assert!(client.notifications().is_err());

        // close is idempotent
        client.close().await;
    }

    #[tokio::test]
    async fn test_random_item_ids_are_distinct_hex() {
        let a = random_item_id();
        let b = random_item_id();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
