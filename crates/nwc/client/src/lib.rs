//! Nostr Wallet Connect (NIP-47) client engine.
//!
//! Takes typed wallet operations, delivers them as signed, end-to-end
//! encrypted events to a wallet service over one or more relays, correlates
//! the asynchronous responses, and surfaces typed results, failures, and
//! push notifications.
//!
//! # Example
//!
//! ```no_run
//! use nwc_client::NwcClient;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = NwcClient::connect(
//!         "nostr+walletconnect://b889ff...?relay=wss://relay.example.com&secret=71a8c1...",
//!     )?;
//!
//!     let balance = client.get_balance(Duration::from_secs(10)).await?;
//!     println!("balance: {balance}");
//!
//!     let mut notifications = client.notifications()?;
//!     while let Ok(notification) = notifications.recv().await {
//!         println!("payment update: {notification:?}");
//!     }
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

mod client;
mod crypto;
mod engine;
mod error;
mod handle;
mod init;
mod pending;
mod relay;
mod router;
mod session;
mod sessions;

pub use client::{MultiResult, NwcClient};
pub use crypto::{CryptoContext, PeerCipher, select_scheme};
pub use engine::{PreparedRequest, RequestEngine, build_request_event};
pub use error::{Failure, NwcResult};
pub use handle::{OBSERVABLE_DEADLINE, RequestHandle, RequestState};
pub use init::{
    InitState, InitStateMachine, RECOVERY_INTERVAL, ReadyRelay, SUBSCRIPTION_TIMEOUT,
};
pub use pending::{Completion, PendingRegistry, RegistryOutcome};
pub use relay::{Relay, RelayConfig};
pub use router::EventRouter;
pub use session::{
    AggregateConnectionState, ConnectionSnapshot, EventSink, Filter, QueryOutcome, RelaySession,
    RequestOutcome, RetryConfig, SessionConfigurator, SessionEvent, SessionHandle, SessionProvider,
    SharedSubscription, aggregate_state,
};
pub use sessions::{RelaySessionProvider, SessionManager};
