//! NIP-47 wire codec.
//!
//! Request bodies, response envelopes, transactions, notifications, and the
//! wallet info event. Wallet `result` payloads are schema-less JSON (wallets
//! differ), so parsing happens per method over `serde_json::Value`, and
//! `metadata` blobs round-trip verbatim.

use crate::event::{Event, find_tag_value};
use crate::uri::WalletConnectUri;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use thiserror::Error;

/// Kind of the replaceable wallet info event.
pub const INFO_EVENT_KIND: u16 = 13194;
/// Kind of client-authored request events.
pub const REQUEST_KIND: u16 = 23194;
/// Kind of wallet-authored response events.
pub const RESPONSE_KIND: u16 = 23195;
/// Kind of wallet-authored notification events.
pub const NOTIFICATION_KIND: u16 = 23197;

pub const P_TAG: &str = "p";
pub const E_TAG: &str = "e";
pub const D_TAG: &str = "d";
pub const ENCRYPTION_TAG: &str = "encryption";
pub const EXPIRATION_TAG: &str = "expiration";
pub const NOTIFICATIONS_TAG: &str = "notifications";

const ENCRYPTION_NIP44: &str = "nip44_v2";
const ENCRYPTION_NIP04: &str = "nip04";

/// Errors from decoding wallet payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed payload: {0}")]
    Malformed(String),
}

fn malformed(msg: impl Into<String>) -> CodecError {
    CodecError::Malformed(msg.into())
}

/// A non-negative Lightning amount in millisatoshis.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BitcoinAmount(u64);

impl BitcoinAmount {
    pub const fn from_msats(msats: u64) -> Self {
        Self(msats)
    }

    pub const fn msats(self) -> u64 {
        self.0
    }

    pub const fn sats(self) -> u64 {
        self.0 / 1000
    }
}

impl fmt::Display for BitcoinAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} msat", self.0)
    }
}

/// NWC request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GetBalance,
    GetInfo,
    PayInvoice,
    MultiPayInvoice,
    PayKeysend,
    MultiPayKeysend,
    MakeInvoice,
    LookupInvoice,
    ListTransactions,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::GetBalance => "get_balance",
            Method::GetInfo => "get_info",
            Method::PayInvoice => "pay_invoice",
            Method::MultiPayInvoice => "multi_pay_invoice",
            Method::PayKeysend => "pay_keysend",
            Method::MultiPayKeysend => "multi_pay_keysend",
            Method::MakeInvoice => "make_invoice",
            Method::LookupInvoice => "lookup_invoice",
            Method::ListTransactions => "list_transactions",
        }
    }

    pub fn from_str(token: &str) -> Option<Self> {
        Some(match token {
            "get_balance" => Method::GetBalance,
            "get_info" => Method::GetInfo,
            "pay_invoice" => Method::PayInvoice,
            "multi_pay_invoice" => Method::MultiPayInvoice,
            "pay_keysend" => Method::PayKeysend,
            "multi_pay_keysend" => Method::MultiPayKeysend,
            "make_invoice" => Method::MakeInvoice,
            "lookup_invoice" => Method::LookupInvoice,
            "list_transactions" => Method::ListTransactions,
            _ => return None,
        })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encryption schemes negotiable over the `encryption` tag. `Unknown` is
/// retained for forward compatibility but is never selected as active.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EncryptionScheme {
    Nip44V2,
    Nip04,
    Unknown(String),
}

impl EncryptionScheme {
    pub fn as_tag_value(&self) -> &str {
        match self {
            EncryptionScheme::Nip44V2 => ENCRYPTION_NIP44,
            EncryptionScheme::Nip04 => ENCRYPTION_NIP04,
            EncryptionScheme::Unknown(token) => token,
        }
    }

    pub fn from_token(token: &str) -> Self {
        match token {
            ENCRYPTION_NIP44 => EncryptionScheme::Nip44V2,
            ENCRYPTION_NIP04 => EncryptionScheme::Nip04,
            other => EncryptionScheme::Unknown(other.to_string()),
        }
    }

    /// Parse a space-or-comma-separated scheme list.
    pub fn parse_list(value: &str) -> Vec<Self> {
        value
            .split([' ', ','])
            .filter(|token| !token.is_empty())
            .map(Self::from_token)
            .collect()
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, EncryptionScheme::Unknown(_))
    }
}

impl fmt::Display for EncryptionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag_value())
    }
}

/// Wallet capabilities advertised in the info event content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    PayInvoice,
    MultiPayInvoice,
    PayKeysend,
    MultiPayKeysend,
    MakeInvoice,
    LookupInvoice,
    ListTransactions,
    GetBalance,
    GetInfo,
    Notifications,
    Unknown(String),
}

impl Capability {
    pub fn from_token(token: &str) -> Self {
        if token == "notifications" {
            return Capability::Notifications;
        }
        match Method::from_str(token) {
            Some(Method::PayInvoice) => Capability::PayInvoice,
            Some(Method::MultiPayInvoice) => Capability::MultiPayInvoice,
            Some(Method::PayKeysend) => Capability::PayKeysend,
            Some(Method::MultiPayKeysend) => Capability::MultiPayKeysend,
            Some(Method::MakeInvoice) => Capability::MakeInvoice,
            Some(Method::LookupInvoice) => Capability::LookupInvoice,
            Some(Method::ListTransactions) => Capability::ListTransactions,
            Some(Method::GetBalance) => Capability::GetBalance,
            Some(Method::GetInfo) => Capability::GetInfo,
            None => Capability::Unknown(token.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Capability::PayInvoice => "pay_invoice",
            Capability::MultiPayInvoice => "multi_pay_invoice",
            Capability::PayKeysend => "pay_keysend",
            Capability::MultiPayKeysend => "multi_pay_keysend",
            Capability::MakeInvoice => "make_invoice",
            Capability::LookupInvoice => "lookup_invoice",
            Capability::ListTransactions => "list_transactions",
            Capability::GetBalance => "get_balance",
            Capability::GetInfo => "get_info",
            Capability::Notifications => "notifications",
            Capability::Unknown(token) => token,
        }
    }
}

/// Notification types a wallet may push.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NotificationType {
    PaymentReceived,
    PaymentSent,
    Unknown(String),
}

impl NotificationType {
    pub fn from_token(token: &str) -> Self {
        match token {
            "payment_received" => NotificationType::PaymentReceived,
            "payment_sent" => NotificationType::PaymentSent,
            other => NotificationType::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            NotificationType::PaymentReceived => "payment_received",
            NotificationType::PaymentSent => "payment_sent",
            NotificationType::Unknown(token) => token,
        }
    }
}

/// Bitcoin network reported by `get_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Signet,
    Regtest,
    Unknown,
}

impl Network {
    pub fn from_token(token: &str) -> Self {
        match token.to_lowercase().as_str() {
            "mainnet" => Network::Mainnet,
            "testnet" => Network::Testnet,
            "signet" => Network::Signet,
            "regtest" => Network::Regtest,
            _ => Network::Unknown,
        }
    }
}

/// Payment direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionDirection {
    Incoming,
    Outgoing,
}

impl TransactionDirection {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "incoming" => Some(TransactionDirection::Incoming),
            "outgoing" => Some(TransactionDirection::Outgoing),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionDirection::Incoming => "incoming",
            TransactionDirection::Outgoing => "outgoing",
        }
    }
}

/// Settlement state. Unrecognized wire values normalize to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    Pending,
    Settled,
    Expired,
    Failed,
    Unknown,
}

impl TransactionState {
    pub fn from_token(token: &str) -> Self {
        match token {
            "pending" => TransactionState::Pending,
            "settled" => TransactionState::Settled,
            "expired" => TransactionState::Expired,
            "failed" => TransactionState::Failed,
            _ => TransactionState::Unknown,
        }
    }
}

/// The wallet-side error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NwcError {
    pub code: String,
    pub message: String,
}

impl fmt::Display for NwcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// A Lightning transaction as reported by the wallet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    #[serde(rename = "type")]
    pub direction: TransactionDirection,
    pub state: TransactionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preimage: Option<String>,
    pub payment_hash: String,
    pub amount: BitcoinAmount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fees_paid: Option<BitcoinAmount>,
    pub created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Transaction {
    /// Parse a transaction object. `type`, `payment_hash`, `amount` and
    /// `created_at` are required; an unrecognized `type` is a protocol
    /// violation while an unrecognized `state` normalizes to `Unknown`.
    pub fn from_value(value: &Value) -> Result<Self, CodecError> {
        let obj = value
            .as_object()
            .ok_or_else(|| malformed("transaction is not an object"))?;

        let direction_token = required_str(obj, "type")?;
        let direction = TransactionDirection::from_token(direction_token)
            .ok_or_else(|| malformed(format!("unknown transaction type '{direction_token}'")))?;

        let state = optional_str(obj, "state")
            .map(TransactionState::from_token)
            .unwrap_or(TransactionState::Unknown);

        Ok(Transaction {
            direction,
            state,
            invoice: optional_str(obj, "invoice").map(str::to_string),
            description: optional_str(obj, "description").map(str::to_string),
            description_hash: optional_str(obj, "description_hash").map(str::to_string),
            preimage: optional_str(obj, "preimage").map(str::to_string),
            payment_hash: required_str(obj, "payment_hash")?.to_string(),
            amount: BitcoinAmount::from_msats(required_u64(obj, "amount")?),
            fees_paid: optional_u64(obj, "fees_paid").map(BitcoinAmount::from_msats),
            created_at: required_u64(obj, "created_at")?,
            expires_at: optional_u64(obj, "expires_at"),
            settled_at: optional_u64(obj, "settled_at"),
            metadata: obj.get("metadata").filter(|v| !v.is_null()).cloned(),
        })
    }
}

fn required_str<'a>(
    obj: &'a serde_json::Map<String, Value>,
    key: &str,
) -> Result<&'a str, CodecError> {
    obj.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(format!("missing required field '{key}'")))
}

fn required_u64(obj: &serde_json::Map<String, Value>, key: &str) -> Result<u64, CodecError> {
    obj.get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| malformed(format!("missing required field '{key}'")))
}

fn optional_str<'a>(obj: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

fn optional_u64(obj: &serde_json::Map<String, Value>, key: &str) -> Option<u64> {
    obj.get(key).and_then(Value::as_u64)
}

// --- request params ---

#[derive(Debug, Clone, Serialize)]
pub struct PayInvoiceParams {
    pub invoice: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<BitcoinAmount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MultiPayInvoiceItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub invoice: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<BitcoinAmount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TlvRecord {
    #[serde(rename = "type")]
    pub record_type: u64,
    /// Hex-encoded record value.
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PayKeysendParams {
    pub pubkey: String,
    pub amount: BitcoinAmount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preimage: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tlv_records: Vec<TlvRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MultiPayKeysendItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub pubkey: String,
    pub amount: BitcoinAmount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preimage: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tlv_records: Vec<TlvRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MakeInvoiceParams {
    pub amount: BitcoinAmount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LookupInvoiceParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ListTransactionsParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    pub unpaid: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub transaction_type: Option<TransactionDirection>,
}

/// Serialize a `{method, params}` request body. serde_json emits no
/// insignificant whitespace, so the encoding is deterministic.
pub fn serialize_request(method: Method, params: &Value) -> String {
    json!({ "method": method.as_str(), "params": params }).to_string()
}

// --- response envelope ---

/// The decrypted response envelope `{result_type, result, error}`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub result_type: String,
    pub result: Option<Value>,
    pub error: Option<NwcError>,
}

impl RawResponse {
    /// Parse a decrypted response body.
    pub fn parse(plaintext: &str) -> Result<Self, CodecError> {
        let value: Value = serde_json::from_str(plaintext)
            .map_err(|e| malformed(format!("response is not JSON: {e}")))?;
        let obj = value
            .as_object()
            .ok_or_else(|| malformed("response is not a JSON object"))?;

        let result_type = required_str(obj, "result_type")?.to_string();
        let result = obj.get("result").filter(|v| !v.is_null()).cloned();
        let error = parse_error_field(obj.get("error"));

        Ok(RawResponse {
            result_type,
            result,
            error,
        })
    }

    /// A synthetic envelope carrying only an error, used for fan-out.
    pub fn from_error(result_type: &str, error: NwcError) -> Self {
        RawResponse {
            result_type: result_type.to_string(),
            result: None,
            error: Some(error),
        }
    }
}

/// `null` or absent means no error; an object qualifies only with a
/// non-empty `code`. A missing `message` becomes the empty string.
fn parse_error_field(value: Option<&Value>) -> Option<NwcError> {
    let obj = value?.as_object()?;
    let code = obj.get("code")?.as_str()?;
    if code.is_empty() {
        return None;
    }
    Some(NwcError {
        code: code.to_string(),
        message: obj
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
    })
}

// --- typed results ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceResult {
    pub balance: BitcoinAmount,
}

impl BalanceResult {
    pub fn from_value(value: &Value) -> Result<Self, CodecError> {
        let obj = value
            .as_object()
            .ok_or_else(|| malformed("balance result is not an object"))?;
        Ok(BalanceResult {
            balance: BitcoinAmount::from_msats(required_u64(obj, "balance")?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayInvoiceResult {
    pub preimage: String,
    pub fees_paid: Option<BitcoinAmount>,
}

impl PayInvoiceResult {
    pub fn from_value(value: &Value) -> Result<Self, CodecError> {
        let obj = value
            .as_object()
            .ok_or_else(|| malformed("payment result is not an object"))?;
        Ok(PayInvoiceResult {
            preimage: required_str(obj, "preimage")?.to_string(),
            fees_paid: optional_u64(obj, "fees_paid").map(BitcoinAmount::from_msats),
        })
    }
}

/// Result of `get_info`.
#[derive(Debug, Clone, PartialEq)]
pub struct GetInfoResult {
    pub alias: Option<String>,
    pub color: Option<String>,
    pub pubkey: Option<String>,
    pub network: Network,
    pub block_height: Option<u64>,
    pub block_hash: Option<String>,
    pub methods: Vec<Capability>,
    pub notifications: Vec<NotificationType>,
}

impl GetInfoResult {
    pub fn from_value(value: &Value) -> Result<Self, CodecError> {
        let obj = value
            .as_object()
            .ok_or_else(|| malformed("info result is not an object"))?;

        let methods = obj
            .get("methods")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(Capability::from_token)
                    .collect()
            })
            .unwrap_or_default();

        let notifications = obj
            .get("notifications")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(NotificationType::from_token)
                    .collect()
            })
            .unwrap_or_default();

        Ok(GetInfoResult {
            alias: optional_str(obj, "alias").map(str::to_string),
            color: optional_str(obj, "color").map(str::to_string),
            pubkey: optional_str(obj, "pubkey").map(str::to_string),
            network: optional_str(obj, "network")
                .map(Network::from_token)
                .unwrap_or(Network::Unknown),
            block_height: optional_u64(obj, "block_height"),
            block_hash: optional_str(obj, "block_hash").map(str::to_string),
            methods,
            notifications,
        })
    }
}

/// Parse the `list_transactions` result (`{"transactions": [...]}`).
pub fn parse_transactions(value: &Value) -> Result<Vec<Transaction>, CodecError> {
    let entries = value
        .as_object()
        .and_then(|obj| obj.get("transactions"))
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("missing 'transactions' array"))?;

    entries.iter().map(Transaction::from_value).collect()
}

// --- notifications ---

/// A decoded wallet push notification.
#[derive(Debug, Clone, PartialEq)]
pub enum WalletNotification {
    PaymentReceived(Transaction),
    PaymentSent(Transaction),
}

impl WalletNotification {
    pub fn transaction(&self) -> &Transaction {
        match self {
            WalletNotification::PaymentReceived(tx) | WalletNotification::PaymentSent(tx) => tx,
        }
    }
}

/// Parse a decrypted `{notification_type, notification}` body. Unknown types
/// return `Ok(None)` and are dropped by the caller.
pub fn parse_notification(plaintext: &str) -> Result<Option<WalletNotification>, CodecError> {
    let value: Value = serde_json::from_str(plaintext)
        .map_err(|e| malformed(format!("notification is not JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| malformed("notification is not a JSON object"))?;

    let notification_type = required_str(obj, "notification_type")?;
    let payload = obj
        .get("notification")
        .ok_or_else(|| malformed("missing 'notification' payload"))?;

    match NotificationType::from_token(notification_type) {
        NotificationType::PaymentReceived => Ok(Some(WalletNotification::PaymentReceived(
            Transaction::from_value(payload)?,
        ))),
        NotificationType::PaymentSent => Ok(Some(WalletNotification::PaymentSent(
            Transaction::from_value(payload)?,
        ))),
        NotificationType::Unknown(_) => Ok(None),
    }
}

// --- wallet info event ---

/// Wallet metadata parsed from the kind-13194 info event.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WalletMetadata {
    pub capabilities: Vec<Capability>,
    pub encryption_schemes: Vec<EncryptionScheme>,
    pub notification_types: Vec<NotificationType>,
    /// True when the info event carried no `encryption` tag; NIP-47 then
    /// defaults the wallet to NIP-04.
    pub defaulted_to_nip04: bool,
}

impl WalletMetadata {
    pub fn from_event(event: &Event) -> Self {
        let capabilities = event
            .content
            .split_whitespace()
            .map(Capability::from_token)
            .collect();

        let (encryption_schemes, defaulted_to_nip04) =
            match find_tag_value(&event.tags, ENCRYPTION_TAG) {
                Some(value) => (EncryptionScheme::parse_list(value), false),
                None => (Vec::new(), true),
            };

        let notification_types = find_tag_value(&event.tags, NOTIFICATIONS_TAG)
            .map(|value| {
                value
                    .split_whitespace()
                    .map(NotificationType::from_token)
                    .collect()
            })
            .unwrap_or_default();

        WalletMetadata {
            capabilities,
            encryption_schemes,
            notification_types,
            defaulted_to_nip04,
        }
    }

    pub fn advertises(&self, scheme: &EncryptionScheme) -> bool {
        self.encryption_schemes.contains(scheme)
    }

    pub fn supports(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Everything known about the connected wallet, assembled by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletDescriptor {
    pub uri: WalletConnectUri,
    pub metadata: WalletMetadata,
    pub info: GetInfoResult,
    pub encryption: EncryptionScheme,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_event(content: &str, tags: Vec<Vec<String>>) -> Event {
        Event {
            id: "00".repeat(32),
            pubkey: "ab".repeat(32),
            created_at: 1_700_000_000,
            kind: INFO_EVENT_KIND,
            tags,
            content: content.to_string(),
            sig: "00".repeat(64),
        }
    }

    #[test]
    fn test_serialize_request_is_compact() {
        let body = serialize_request(
            Method::PayInvoice,
            &json!({"invoice": "lnbc1", "amount": 1000}),
        );
        // no insignificant whitespace, and the body round-trips
        assert!(!body.contains(' '));
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["method"], json!("pay_invoice"));
        assert_eq!(parsed["params"], json!({"invoice": "lnbc1", "amount": 1000}));
        // identical input always encodes to identical bytes
        assert_eq!(
            body,
            serialize_request(
                Method::PayInvoice,
                &json!({"invoice": "lnbc1", "amount": 1000}),
            )
        );
    }

    #[test]
    fn test_parse_response_happy() {
        let raw = RawResponse::parse(
            r#"{"result_type":"get_balance","result":{"balance":21000},"error":null}"#,
        )
        .unwrap();
        assert_eq!(raw.result_type, "get_balance");
        assert!(raw.error.is_none());
        let balance = BalanceResult::from_value(raw.result.as_ref().unwrap()).unwrap();
        assert_eq!(balance.balance, BitcoinAmount::from_msats(21000));
    }

    #[test]
    fn test_parse_response_requires_result_type() {
        assert!(RawResponse::parse(r#"{"result":{}}"#).is_err());
        assert!(RawResponse::parse("[1,2]").is_err());
        assert!(RawResponse::parse("not json").is_err());
    }

    #[test]
    fn test_parse_error_field_policy() {
        let raw = RawResponse::parse(
            r#"{"result_type":"pay_invoice","error":{"code":"RESTRICTED","message":"no"}}"#,
        )
        .unwrap();
        assert_eq!(
            raw.error,
            Some(NwcError {
                code: "RESTRICTED".to_string(),
                message: "no".to_string()
            })
        );

        // missing message defaults to empty
        let raw =
            RawResponse::parse(r#"{"result_type":"pay_invoice","error":{"code":"X"}}"#).unwrap();
        assert_eq!(raw.error.unwrap().message, "");

        // empty code means no error
        let raw =
            RawResponse::parse(r#"{"result_type":"pay_invoice","error":{"code":""}}"#).unwrap();
        assert!(raw.error.is_none());
    }

    #[test]
    fn test_transaction_required_fields() {
        let full = json!({
            "type": "incoming",
            "state": "settled",
            "payment_hash": "ff".repeat(32),
            "amount": 2500,
            "created_at": 1_700_000_000,
            "fees_paid": 3,
            "metadata": {"order": 42},
        });
        let tx = Transaction::from_value(&full).unwrap();
        assert_eq!(tx.direction, TransactionDirection::Incoming);
        assert_eq!(tx.state, TransactionState::Settled);
        assert_eq!(tx.fees_paid, Some(BitcoinAmount::from_msats(3)));
        assert_eq!(tx.metadata, Some(json!({"order": 42})));

        for missing in ["type", "payment_hash", "amount", "created_at"] {
            let mut partial = full.clone();
            partial.as_object_mut().unwrap().remove(missing);
            assert!(Transaction::from_value(&partial).is_err(), "{missing}");
        }
    }

    #[test]
    fn test_transaction_enum_normalization() {
        let tx = json!({
            "type": "sideways",
            "payment_hash": "aa",
            "amount": 1,
            "created_at": 1,
        });
        assert!(Transaction::from_value(&tx).is_err());

        let tx = json!({
            "type": "outgoing",
            "state": "negotiating",
            "payment_hash": "aa",
            "amount": 1,
            "created_at": 1,
        });
        assert_eq!(
            Transaction::from_value(&tx).unwrap().state,
            TransactionState::Unknown
        );
    }

    #[test]
    fn test_transaction_metadata_roundtrip() {
        let tx = Transaction::from_value(&json!({
            "type": "incoming",
            "payment_hash": "aa",
            "amount": 1,
            "created_at": 1,
            "metadata": {"nested": {"k": [1, 2, 3]}},
        }))
        .unwrap();
        let emitted = serde_json::to_value(&tx).unwrap();
        assert_eq!(emitted["metadata"], json!({"nested": {"k": [1, 2, 3]}}));
    }

    #[test]
    fn test_info_event_whitespace_schemes() {
        // two tokens separated by spaces in a single tag value
        let event = info_event(
            "pay_invoice get_balance",
            vec![vec![
                ENCRYPTION_TAG.to_string(),
                "nip44_v2   nip04".to_string(),
            ]],
        );
        let metadata = WalletMetadata::from_event(&event);
        assert_eq!(
            metadata.encryption_schemes,
            vec![EncryptionScheme::Nip44V2, EncryptionScheme::Nip04]
        );
        assert!(!metadata.defaulted_to_nip04);
    }

    #[test]
    fn test_info_event_comma_schemes() {
        let event = info_event(
            "",
            vec![vec![ENCRYPTION_TAG.to_string(), "nip44_v2,nip04".to_string()]],
        );
        let metadata = WalletMetadata::from_event(&event);
        assert_eq!(
            metadata.encryption_schemes,
            vec![EncryptionScheme::Nip44V2, EncryptionScheme::Nip04]
        );
    }

    #[test]
    fn test_info_event_missing_encryption_tag() {
        // missing tag means empty set + defaulted flag
        let event = info_event("pay_invoice", vec![]);
        let metadata = WalletMetadata::from_event(&event);
        assert!(metadata.encryption_schemes.is_empty());
        assert!(metadata.defaulted_to_nip04);
    }

    #[test]
    fn test_info_event_capabilities_and_notifications() {
        let event = info_event(
            "pay_invoice get_balance make_rain notifications",
            vec![vec![
                NOTIFICATIONS_TAG.to_string(),
                "payment_received payment_sent balance_changed".to_string(),
            ]],
        );
        let metadata = WalletMetadata::from_event(&event);
        assert!(metadata.supports(&Capability::PayInvoice));
        assert!(metadata.supports(&Capability::Notifications));
        assert!(
            metadata
                .capabilities
                .contains(&Capability::Unknown("make_rain".to_string()))
        );
        assert_eq!(
            metadata.notification_types,
            vec![
                NotificationType::PaymentReceived,
                NotificationType::PaymentSent,
                NotificationType::Unknown("balance_changed".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_notification_known_and_unknown() {
        let body = json!({
            "notification_type": "payment_received",
            "notification": {
                "type": "incoming",
                "state": "settled",
                "payment_hash": "aa",
                "amount": 5000,
                "created_at": 10,
            },
        })
        .to_string();
        let parsed = parse_notification(&body).unwrap().unwrap();
        match parsed {
            WalletNotification::PaymentReceived(tx) => {
                assert_eq!(tx.amount, BitcoinAmount::from_msats(5000));
            }
            other => panic!("unexpected notification: {other:?}"),
        }

        let unknown = json!({
            "notification_type": "balance_changed",
            "notification": {},
        })
        .to_string();
        assert!(parse_notification(&unknown).unwrap().is_none());
    }

    #[test]
    fn test_parse_transactions_result() {
        let value = json!({
            "transactions": [{
                "type": "outgoing",
                "state": "settled",
                "payment_hash": "aa",
                "amount": 1000,
                "created_at": 5,
            }],
        });
        let txs = parse_transactions(&value).unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].direction, TransactionDirection::Outgoing);

        assert!(parse_transactions(&json!({})).is_err());
    }

    #[test]
    fn test_get_info_result_parse() {
        let info = GetInfoResult::from_value(&json!({
            "alias": "test-node",
            "color": "#ff9900",
            "pubkey": "02abc",
            "network": "signet",
            "block_height": 800_000,
            "methods": ["pay_invoice", "get_balance", "make_rain"],
            "notifications": ["payment_received"],
        }))
        .unwrap();
        assert_eq!(info.alias.as_deref(), Some("test-node"));
        assert_eq!(info.network, Network::Signet);
        assert_eq!(info.block_height, Some(800_000));
        assert!(info.methods.contains(&Capability::GetBalance));
        assert!(
            info.methods
                .contains(&Capability::Unknown("make_rain".to_string()))
        );
        assert_eq!(info.notifications, vec![NotificationType::PaymentReceived]);

        let minimal = GetInfoResult::from_value(&json!({})).unwrap();
        assert_eq!(minimal.network, Network::Unknown);
        assert!(minimal.methods.is_empty());
    }
}
