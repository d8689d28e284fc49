//! End-to-end engine tests against a scripted in-memory wallet.
//!
//! The mock session provider implements the session contract directly; the
//! mock wallet decrypts request events with the real ciphers and answers
//! according to a per-test script, so everything between the façade and the
//! wire codec is exercised.

use async_trait::async_trait;
use nwc_client::{
    ConnectionSnapshot, CryptoContext, EventRouter, EventSink, Failure, Filter, InitState,
    InitStateMachine, MultiResult, NwcClient, NwcResult, PeerCipher, PendingRegistry, QueryOutcome,
    RelaySession, RequestEngine, RequestOutcome, RetryConfig, SessionConfigurator, SessionEvent,
    SessionHandle, SessionProvider, SharedSubscription,
};
use nwc_core::nip47::{
    ENCRYPTION_TAG, EncryptionScheme, INFO_EVENT_KIND, ListTransactionsParams,
    LookupInvoiceParams, MultiPayInvoiceItem, NOTIFICATION_KIND, PayInvoiceParams, RESPONSE_KIND,
    TransactionDirection, TransactionState, WalletNotification,
};
use nwc_core::{
    Event, EventTemplate, WalletConnectUri, finalize_event, find_tag_value, generate_secret_key,
    get_public_key_hex,
};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep, timeout};

/// One scripted wallet answer; `d_tag` keys multi-request items.
struct WalletReply {
    body: Value,
    d_tag: Option<String>,
}

impl WalletReply {
    fn new(body: Value) -> Self {
        Self { body, d_tag: None }
    }

    fn keyed(body: Value, d_tag: &str) -> Self {
        Self {
            body,
            d_tag: Some(d_tag.to_string()),
        }
    }
}

type Script = dyn Fn(&str, &Value) -> Vec<WalletReply> + Send + Sync;

/// In-memory wallet service: real keys, real encryption, scripted answers.
struct MockWallet {
    secret: [u8; 32],
    pubkey: String,
    client_pubkey: String,
    cipher: PeerCipher,
    script: Box<Script>,
    info_event: Mutex<Option<Event>>,
}

impl MockWallet {
    fn new(client_pubkey: &str, script: Box<Script>) -> Self {
        let secret = generate_secret_key();
        let pubkey = get_public_key_hex(&secret).unwrap();
        let cipher = PeerCipher::derive(&secret, client_pubkey).unwrap();
        Self {
            secret,
            pubkey,
            client_pubkey: client_pubkey.to_string(),
            cipher,
            script,
            info_event: Mutex::new(None),
        }
    }

    /// Publish a kind-13194 info event advertising `encryption_tokens`.
    fn set_info(&self, capabilities: &str, encryption_tokens: Option<&str>) {
        let mut tags = Vec::new();
        if let Some(tokens) = encryption_tokens {
            tags.push(vec![ENCRYPTION_TAG.to_string(), tokens.to_string()]);
        }
        let event = finalize_event(
            &EventTemplate {
                created_at: 1_700_000_000,
                kind: INFO_EVENT_KIND,
                tags,
                content: capabilities.to_string(),
            },
            &self.secret,
        )
        .unwrap();
        *self.info_event.lock().unwrap() = Some(event);
    }

    /// Decrypt a request event and produce the scripted response events.
    fn respond(&self, request_event: &Event) -> Vec<Event> {
        let scheme = find_tag_value(&request_event.tags, ENCRYPTION_TAG)
            .map(EncryptionScheme::from_token)
            .unwrap_or(EncryptionScheme::Nip04);
        let plaintext = self
            .cipher
            .decrypt(&request_event.content, &scheme)
            .expect("wallet could not decrypt request");
        let request: Value = serde_json::from_str(&plaintext).unwrap();
        let method = request["method"].as_str().unwrap().to_string();
        let params = request["params"].clone();

        (self.script)(&method, &params)
            .into_iter()
            .map(|reply| self.response_event(request_event, &scheme, reply))
            .collect()
    }

    fn response_event(
        &self,
        request_event: &Event,
        scheme: &EncryptionScheme,
        reply: WalletReply,
    ) -> Event {
        let mut tags = vec![
            vec!["p".to_string(), self.client_pubkey.clone()],
            vec!["e".to_string(), request_event.id.clone()],
            vec![
                ENCRYPTION_TAG.to_string(),
                scheme.as_tag_value().to_string(),
            ],
        ];
        if let Some(d_tag) = reply.d_tag {
            tags.push(vec!["d".to_string(), d_tag]);
        }

        let content = self.cipher.encrypt(&reply.body.to_string(), scheme).unwrap();
        finalize_event(
            &EventTemplate {
                created_at: 1_700_000_001,
                kind: RESPONSE_KIND,
                tags,
                content,
            },
            &self.secret,
        )
        .unwrap()
    }

    /// Push a signed notification event straight into a session sink.
    fn push_notification(&self, sink: &EventSink, body: Value) {
        let content = self
            .cipher
            .encrypt(&body.to_string(), &EncryptionScheme::Nip04)
            .unwrap();
        let event = finalize_event(
            &EventTemplate {
                created_at: 1_700_000_002,
                kind: NOTIFICATION_KIND,
                tags: vec![vec!["p".to_string(), self.client_pubkey.clone()]],
                content,
            },
            &self.secret,
        )
        .unwrap();
        let _ = sink.send(SessionEvent::Event {
            relay_url: "wss://mock-0.example".to_string(),
            event,
        });
    }
}

struct MockRelay {
    url: String,
    wallet: Arc<MockWallet>,
    state_rx: watch::Receiver<ConnectionSnapshot>,
    _state_tx: watch::Sender<ConnectionSnapshot>,
    sink: Mutex<Option<EventSink>>,
    sent: Mutex<Vec<Event>>,
    fail_subscription: AtomicBool,
}

impl MockRelay {
    fn new(url: &str, wallet: Arc<MockWallet>) -> Arc<Self> {
        let (state_tx, state_rx) = watch::channel(ConnectionSnapshot::Connected);
        Arc::new(Self {
            url: url.to_string(),
            wallet,
            state_rx,
            _state_tx: state_tx,
            sink: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            fail_subscription: AtomicBool::new(false),
        })
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl RelaySession for MockRelay {
    fn url(&self) -> &str {
        &self.url
    }

    fn snapshots(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.state_rx.clone()
    }

    async fn subscribe(&self, _id: &str, _filters: &[Filter]) -> NwcResult<()> {
        Ok(())
    }

    async fn unsubscribe(&self, _id: &str) -> NwcResult<()> {
        Ok(())
    }

    async fn create_shared_subscription(
        &self,
        _filters: Vec<Filter>,
        _timeout: Duration,
    ) -> Option<SharedSubscription> {
        if self.fail_subscription.load(Ordering::SeqCst) {
            return None;
        }
        Some(SharedSubscription {
            id: format!("mock-sub-{}", self.url),
        })
    }

    async fn query(
        &self,
        filters: Vec<Filter>,
        _timeout: Duration,
        _retry: RetryConfig,
    ) -> QueryOutcome {
        let wants_info = filters.iter().any(|filter| {
            filter["kinds"]
                .as_array()
                .map(|kinds| kinds.iter().any(|k| k.as_u64() == Some(INFO_EVENT_KIND as u64)))
                .unwrap_or(false)
        });
        if wants_info {
            if let Some(event) = self.wallet.info_event.lock().unwrap().clone() {
                return QueryOutcome::Events(vec![event]);
            }
        }
        QueryOutcome::Events(Vec::new())
    }

    async fn request_one_via(
        &self,
        _sub: &SharedSubscription,
        event: &Event,
        _correlation_id: &str,
        timeout_after: Duration,
        _retry: RetryConfig,
    ) -> RequestOutcome {
        self.sent.lock().unwrap().push(event.clone());

        let mut replies = self.wallet.respond(event);
        if replies.is_empty() {
            sleep(timeout_after).await;
            return RequestOutcome::Timeout;
        }

        let first = replies.remove(0);
        // remaining responses arrive through the response subscription
        let sink = self.sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            for reply in replies {
                let _ = sink.send(SessionEvent::Event {
                    relay_url: self.url.clone(),
                    event: reply,
                });
            }
        }
        RequestOutcome::Event(first)
    }
}

struct MockProvider {
    relays: Vec<Arc<MockRelay>>,
    sink: Mutex<Option<EventSink>>,
}

impl MockProvider {
    fn new(relays: Vec<Arc<MockRelay>>) -> Arc<Self> {
        Arc::new(Self {
            relays,
            sink: Mutex::new(None),
        })
    }

    fn sink(&self) -> EventSink {
        self.sink.lock().unwrap().clone().expect("session not open")
    }
}

#[async_trait]
impl SessionProvider for MockProvider {
    async fn open(&self, sink: EventSink, configurator: SessionConfigurator) -> NwcResult<()> {
        *self.sink.lock().unwrap() = Some(sink.clone());
        for relay in &self.relays {
            *relay.sink.lock().unwrap() = Some(sink.clone());
            (*configurator)(SessionHandle {
                url: relay.url.clone(),
                session: Arc::clone(relay) as Arc<dyn RelaySession>,
            })
            .await;
        }
        Ok(())
    }

    fn runtime_handles(&self) -> Vec<SessionHandle> {
        self.relays
            .iter()
            .map(|relay| SessionHandle {
                url: relay.url.clone(),
                session: Arc::clone(relay) as Arc<dyn RelaySession>,
            })
            .collect()
    }

    async fn ensure_relay(&self, _url: &str) -> NwcResult<()> {
        Ok(())
    }

    async fn publish(&self, _event: &Event) -> NwcResult<()> {
        Ok(())
    }

    async fn publish_to(&self, _relay: &str, _event: &Event) -> NwcResult<()> {
        Ok(())
    }

    async fn authenticate(&self, _relay: &str, _event: &Event) -> NwcResult<()> {
        Ok(())
    }

    async fn close(&self) {}
}

struct Harness {
    client: NwcClient,
    provider: Arc<MockProvider>,
    wallet: Arc<MockWallet>,
    relays: Vec<Arc<MockRelay>>,
}

fn harness(relay_count: usize, script: Box<Script>) -> Harness {
    let client_secret = generate_secret_key();
    let client_pubkey = get_public_key_hex(&client_secret).unwrap();
    let wallet = Arc::new(MockWallet::new(&client_pubkey, script));

    let urls: Vec<String> = (0..relay_count)
        .map(|i| format!("wss://mock-{i}.example"))
        .collect();
    let relays: Vec<Arc<MockRelay>> = urls
        .iter()
        .map(|url| MockRelay::new(url, Arc::clone(&wallet)))
        .collect();
    let provider = MockProvider::new(relays.clone());

    let uri = WalletConnectUri::new(wallet.pubkey.clone(), urls, client_secret).unwrap();
    let client =
        NwcClient::with_session_provider(uri, Arc::clone(&provider) as Arc<dyn SessionProvider>)
            .unwrap();

    Harness {
        client,
        provider,
        wallet,
        relays,
    }
}

const DEADLINE: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_pay_invoice_success() {
    let h = harness(
        1,
        Box::new(|method, _params| {
            assert_eq!(method, "pay_invoice");
            vec![WalletReply::new(json!({
                "result_type": "pay_invoice",
                "result": {"preimage": "deadbeef", "fees_paid": 2500},
            }))]
        }),
    );

    let result = h
        .client
        .pay_invoice(
            PayInvoiceParams {
                invoice: "lnbc1invoice".to_string(),
                amount: None,
                metadata: None,
            },
            DEADLINE,
        )
        .await
        .unwrap();

    assert_eq!(result.preimage, "deadbeef");
    assert_eq!(result.fees_paid.map(|fee| fee.msats()), Some(2500));
    // exactly one request event was dispatched
    assert_eq!(h.relays[0].sent_count(), 1);
    h.client.close().await;
}

#[tokio::test]
async fn test_pay_invoice_wallet_error() {
    let h = harness(
        1,
        Box::new(|_, _| {
            vec![WalletReply::new(json!({
                "result_type": "pay_invoice",
                "result": null,
                "error": {"code": "WALLET_ERROR", "message": "insufficient balance"},
            }))]
        }),
    );

    let err = h
        .client
        .pay_invoice(
            PayInvoiceParams {
                invoice: "lnbc1fail".to_string(),
                amount: None,
                metadata: None,
            },
            DEADLINE,
        )
        .await
        .unwrap_err();

    match err {
        Failure::Wallet(wallet_error) => {
            assert_eq!(wallet_error.code, "WALLET_ERROR");
            assert_eq!(wallet_error.message, "insufficient balance");
        }
        other => panic!("expected wallet error, got {other:?}"),
    }
    h.client.close().await;
}

#[tokio::test]
async fn test_list_transactions_settled_only() {
    // with unpaid=false the wallet reports only the settled payment
    let h = harness(
        1,
        Box::new(|_, params| {
            assert_eq!(params["unpaid"], json!(false));
            vec![WalletReply::new(json!({
                "result_type": "list_transactions",
                "result": {"transactions": [{
                    "type": "outgoing",
                    "state": "settled",
                    "payment_hash": "aa".repeat(32),
                    "amount": 10_000,
                    "created_at": 1_700_000_000,
                }]},
            }))]
        }),
    );

    let transactions = h
        .client
        .list_transactions(ListTransactionsParams::default(), DEADLINE)
        .await
        .unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].direction, TransactionDirection::Outgoing);
    assert_eq!(transactions[0].state, TransactionState::Settled);
    h.client.close().await;
}

#[tokio::test]
async fn test_list_transactions_unpaid_outgoing_limited() {
    let h = harness(
        1,
        Box::new(|_, params| {
            assert_eq!(params["unpaid"], json!(true));
            assert_eq!(params["type"], json!("outgoing"));
            assert_eq!(params["limit"], json!(1));
            vec![WalletReply::new(json!({
                "result_type": "list_transactions",
                "result": {"transactions": [{
                    "type": "outgoing",
                    "state": "pending",
                    "payment_hash": "bb".repeat(32),
                    "amount": 5_000,
                    "created_at": 1_700_000_100,
                }]},
            }))]
        }),
    );

    let transactions = h
        .client
        .list_transactions(
            ListTransactionsParams {
                unpaid: true,
                transaction_type: Some(TransactionDirection::Outgoing),
                limit: Some(1),
                ..Default::default()
            },
            DEADLINE,
        )
        .await
        .unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].direction, TransactionDirection::Outgoing);
    h.client.close().await;
}

#[tokio::test]
async fn test_multi_pay_invoice_partial_failure() {
    // one success, one wallet-side failure, keyed by d tag
    let h = harness(
        1,
        Box::new(|method, params| {
            assert_eq!(method, "multi_pay_invoice");
            params["invoices"]
                .as_array()
                .unwrap()
                .iter()
                .map(|item| {
                    let id = item["id"].as_str().unwrap();
                    if id == "a" {
                        WalletReply::keyed(
                            json!({
                                "result_type": "multi_pay_invoice",
                                "result": {"preimage": "00ff"},
                            }),
                            id,
                        )
                    } else {
                        WalletReply::keyed(
                            json!({
                                "result_type": "multi_pay_invoice",
                                "result": null,
                                "error": {"code": "INSUFFICIENT_BALANCE", "message": "no funds"},
                            }),
                            id,
                        )
                    }
                })
                .collect()
        }),
    );

    let results = h
        .client
        .multi_pay_invoice(
            vec![
                MultiPayInvoiceItem {
                    id: Some("a".to_string()),
                    invoice: "lnbc1a".to_string(),
                    amount: None,
                    metadata: None,
                },
                MultiPayInvoiceItem {
                    id: Some("b".to_string()),
                    invoice: "lnbc1b".to_string(),
                    amount: None,
                    metadata: None,
                },
            ],
            DEADLINE,
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    match &results["a"] {
        MultiResult::Success(payment) => assert_eq!(payment.preimage, "00ff"),
        other => panic!("expected success for a, got {other:?}"),
    }
    match &results["b"] {
        MultiResult::Failure(error) => assert_eq!(error.code, "INSUFFICIENT_BALANCE"),
        other => panic!("expected failure for b, got {other:?}"),
    }
    h.client.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_timeout_observes_deadline_and_clears_registry() {
    // built at engine level so the registry is inspectable
    let client_secret = generate_secret_key();
    let client_pubkey = get_public_key_hex(&client_secret).unwrap();
    let wallet = Arc::new(MockWallet::new(
        &client_pubkey,
        Box::new(|_, _| Vec::new()), // never answers
    ));
    let relay = MockRelay::new("wss://mock-0.example", Arc::clone(&wallet));
    let provider = MockProvider::new(vec![Arc::clone(&relay)]);

    let crypto = Arc::new(CryptoContext::new(client_secret, &wallet.pubkey).unwrap());
    let registry = Arc::new(PendingRegistry::new());
    let (notif_tx, _notif_rx) = tokio::sync::broadcast::channel(64);
    let router = EventRouter::new(
        wallet.pubkey.clone(),
        client_pubkey,
        Arc::clone(&crypto),
        Arc::clone(&registry),
        notif_tx,
    );
    let (sink_tx, sink_rx) = mpsc::unbounded_channel();
    let router_task = router.spawn(sink_rx);
    let init = InitStateMachine::new(
        Arc::clone(&provider) as Arc<dyn SessionProvider>,
        vec!["wss://mock-0.example".to_string()],
        vec![json!({"kinds": [RESPONSE_KIND]})],
        vec![],
        sink_tx,
    );
    init.start();
    let engine = RequestEngine::new(
        wallet.pubkey.clone(),
        crypto,
        Arc::clone(&registry),
        Arc::clone(&init),
        router,
    );

    let deadline = Duration::from_millis(200);
    let started = Instant::now();
    let err = engine
        .execute(nwc_core::Method::GetBalance, json!({}), deadline)
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    // deadline monotonicity: at least the full deadline elapsed
    assert!(started.elapsed() >= deadline);
    // the pending entry is gone; a late response would be dropped
    assert!(registry.is_empty());

    init.close();
    router_task.abort();
}

#[tokio::test]
async fn test_response_race_with_two_relays_resolves_once() {
    let h = harness(
        2,
        Box::new(|_, _| {
            vec![WalletReply::new(json!({
                "result_type": "get_balance",
                "result": {"balance": 42_000},
            }))]
        }),
    );

    let balance = h.client.get_balance(DEADLINE).await.unwrap();
    assert_eq!(balance.msats(), 42_000);
    // both relays raced the request
    let total_sent: usize = h.relays.iter().map(|relay| relay.sent_count()).sum();
    assert_eq!(total_sent, 2);
    h.client.close().await;
}

#[tokio::test]
async fn test_refresh_metadata_negotiates_nip44() {
    let h = harness(
        1,
        Box::new(|_, _| {
            vec![WalletReply::new(json!({
                "result_type": "get_balance",
                "result": {"balance": 7},
            }))]
        }),
    );
    h.wallet
        .set_info("pay_invoice get_balance notifications", Some("nip44_v2 nip04"));

    let metadata = h.client.refresh_wallet_metadata(DEADLINE).await.unwrap();
    assert_eq!(
        metadata.encryption_schemes,
        vec![EncryptionScheme::Nip44V2, EncryptionScheme::Nip04]
    );
    assert!(!metadata.defaulted_to_nip04);

    // subsequent requests are encrypted with NIP-44; the wallet (which
    // follows the request's encryption tag) still answers correctly
    let balance = h.client.get_balance(DEADLINE).await.unwrap();
    assert_eq!(balance.msats(), 7);

    let sent = h.relays[0].sent.lock().unwrap();
    let request = sent.last().unwrap();
    assert_eq!(
        find_tag_value(&request.tags, ENCRYPTION_TAG),
        Some("nip44_v2")
    );
    drop(sent);
    h.client.close().await;
}

#[tokio::test]
async fn test_refresh_metadata_fails_without_info_event() {
    let h = harness(1, Box::new(|_, _| Vec::new()));

    let err = h.client.refresh_wallet_metadata(DEADLINE).await.unwrap_err();
    match err {
        Failure::Network { msg, .. } => assert!(msg.contains("Unable to fetch wallet metadata")),
        other => panic!("expected network failure, got {other:?}"),
    }
    h.client.close().await;
}

#[tokio::test]
async fn test_describe_wallet_merges_sources() {
    let h = harness(
        1,
        Box::new(|method, _| match method {
            "get_info" => vec![WalletReply::new(json!({
                "result_type": "get_info",
                "result": {
                    "alias": "mock-node",
                    "network": "regtest",
                    "methods": ["pay_invoice", "get_balance"],
                },
            }))],
            _ => Vec::new(),
        }),
    );
    h.wallet.set_info("pay_invoice get_balance", Some("nip44_v2"));

    let descriptor = h.client.describe_wallet(DEADLINE).await.unwrap();
    assert_eq!(descriptor.uri.wallet_pubkey, h.wallet.pubkey);
    assert_eq!(descriptor.info.alias.as_deref(), Some("mock-node"));
    assert_eq!(descriptor.encryption, EncryptionScheme::Nip44V2);
    assert!(!descriptor.metadata.capabilities.is_empty());
    h.client.close().await;
}

#[tokio::test]
async fn test_observable_request_happy_path() {
    let h = harness(
        1,
        Box::new(|_, _| {
            vec![WalletReply::new(json!({
                "result_type": "get_balance",
                "result": {"balance": 9_000},
            }))]
        }),
    );

    let handle = h.client.get_balance_request();
    assert!(handle.event_id().is_some());
    let balance = handle.to_result(DEADLINE).await.unwrap();
    assert_eq!(balance.msats(), 9_000);
    h.client.close().await;
}

#[tokio::test]
async fn test_notifications_flow_through_broadcast() {
    let h = harness(
        1,
        Box::new(|_, _| {
            vec![WalletReply::new(json!({
                "result_type": "get_balance",
                "result": {"balance": 1},
            }))]
        }),
    );
    let mut notifications = h.client.notifications().unwrap();

    // drive one request so the session is open and the sink is installed
    h.client.get_balance(DEADLINE).await.unwrap();

    h.wallet.push_notification(
        &h.provider.sink(),
        json!({
            "notification_type": "payment_received",
            "notification": {
                "type": "incoming",
                "state": "settled",
                "payment_hash": "cc".repeat(32),
                "amount": 12_345,
                "created_at": 1_700_000_050,
            },
        }),
    );

    let notification = timeout(DEADLINE, notifications.recv()).await.unwrap().unwrap();
    match notification {
        WalletNotification::PaymentReceived(tx) => assert_eq!(tx.amount.msats(), 12_345),
        other => panic!("unexpected notification: {other:?}"),
    }
    h.client.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_partial_ready_promotes_through_recovery() {
    let h = harness(
        2,
        Box::new(|_, _| {
            vec![WalletReply::new(json!({
                "result_type": "get_balance",
                "result": {"balance": 3},
            }))]
        }),
    );
    // the second relay refuses its response subscription at first
    h.relays[1].fail_subscription.store(true, Ordering::SeqCst);

    // requests already work through the healthy relay
    let balance = h.client.get_balance(DEADLINE).await.unwrap();
    assert_eq!(balance.msats(), 3);
    assert!(matches!(
        h.client.init_state(),
        InitState::PartialReady { .. }
    ));

    // let recovery promote the laggard
    h.relays[1].fail_subscription.store(false, Ordering::SeqCst);
    let promoted = timeout(Duration::from_secs(30), async {
        loop {
            if matches!(h.client.init_state(), InitState::Ready { .. }) {
                break;
            }
            sleep(Duration::from_millis(500)).await;
        }
    })
    .await;
    assert!(promoted.is_ok(), "recovery never promoted the relay");
    h.client.close().await;
}

#[tokio::test]
async fn test_lookup_invoice_round_trip() {
    let h = harness(
        1,
        Box::new(|method, params| {
            assert_eq!(method, "lookup_invoice");
            assert_eq!(params["payment_hash"], json!("dd".repeat(32)));
            vec![WalletReply::new(json!({
                "result_type": "lookup_invoice",
                "result": {
                    "type": "incoming",
                    "state": "pending",
                    "invoice": "lnbc1pending",
                    "payment_hash": "dd".repeat(32),
                    "amount": 77_000,
                    "created_at": 1_700_000_200,
                    "expires_at": 1_700_003_800,
                },
            }))]
        }),
    );

    let transaction = h
        .client
        .lookup_invoice(
            LookupInvoiceParams {
                payment_hash: Some("dd".repeat(32)),
                invoice: None,
            },
            DEADLINE,
        )
        .await
        .unwrap();
    assert_eq!(transaction.state, TransactionState::Pending);
    assert_eq!(transaction.amount.msats(), 77_000);
    h.client.close().await;
}
