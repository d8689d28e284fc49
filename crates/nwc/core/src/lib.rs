//! Nostr Wallet Connect (NIP-47) protocol layer.
//!
//! This crate provides:
//! - NIP-01: event shape, canonical serialization, schnorr signing/verification
//! - NIP-04: legacy encrypted payloads over a per-peer shared secret
//! - NIP-44 v2: encrypted payloads over a per-peer conversation key
//! - NIP-47: the wallet-connect wire codec (requests, responses, transactions,
//!   notifications, wallet info metadata)
//! - Connection URI (`nostr+walletconnect://`) parsing and construction
//!
//! The networked client engine lives in the sibling `nwc-client` crate.

pub mod event;
pub mod nip04;
pub mod nip44;
pub mod nip47;
pub mod uri;

pub use event::{
    Event, EventError, EventTemplate, finalize_event, find_tag_value, find_tag_values,
    generate_secret_key, get_event_hash, get_public_key_hex, pubkey_hex_to_compressed,
    serialize_event, verify_event,
};
pub use nip04::{Nip04Error, SharedSecret};
pub use nip44::{ConversationKey, Nip44Error};
pub use nip47::{
    BalanceResult, BitcoinAmount, Capability, CodecError, D_TAG, E_TAG, ENCRYPTION_TAG,
    EXPIRATION_TAG, EncryptionScheme, GetInfoResult, INFO_EVENT_KIND, ListTransactionsParams,
    LookupInvoiceParams, MakeInvoiceParams, Method, MultiPayInvoiceItem, MultiPayKeysendItem,
    NOTIFICATION_KIND, NOTIFICATIONS_TAG, Network, NotificationType, NwcError, P_TAG,
    PayInvoiceParams, PayInvoiceResult, PayKeysendParams, REQUEST_KIND, RESPONSE_KIND, RawResponse,
    TlvRecord, Transaction, TransactionDirection, TransactionState, WalletDescriptor,
    WalletMetadata, WalletNotification, parse_notification, parse_transactions, serialize_request,
};
pub use uri::{UriError, WalletConnectUri};
