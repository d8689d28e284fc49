//! Inbound event router.
//!
//! A single task drains the session output sink and dispatches by kind:
//! responses complete pending entries, notifications feed the broadcast
//! channel, acknowledgements are logged. Late or unmatched responses are
//! dropped silently.

use crate::crypto::CryptoContext;
use crate::pending::{PendingRegistry, RegistryOutcome};
use crate::session::SessionEvent;
use nwc_core::nip47::{D_TAG, E_TAG, NOTIFICATION_KIND, P_TAG, RESPONSE_KIND, RawResponse};
use nwc_core::{Event, find_tag_value, parse_notification};
use nwc_core::nip47::WalletNotification;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct EventRouter {
    wallet_pubkey: String,
    client_pubkey: String,
    crypto: Arc<CryptoContext>,
    registry: Arc<PendingRegistry>,
    /// Dropped on close so subscribers observe the channel closing.
    notifications: Mutex<Option<broadcast::Sender<WalletNotification>>>,
}

impl EventRouter {
    pub fn new(
        wallet_pubkey: String,
        client_pubkey: String,
        crypto: Arc<CryptoContext>,
        registry: Arc<PendingRegistry>,
        notifications: broadcast::Sender<WalletNotification>,
    ) -> Arc<Self> {
        Arc::new(Self {
            wallet_pubkey,
            client_pubkey,
            crypto,
            registry,
            notifications: Mutex::new(Some(notifications)),
        })
    }

    /// Release the notification sender so subscribers see the channel close.
    pub fn close_notifications(&self) {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Drain the session sink until the client closes.
    pub fn spawn(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<SessionEvent>) -> JoinHandle<()> {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                router.route(event);
            }
        })
    }

    pub fn route(&self, session_event: SessionEvent) {
        match session_event {
            SessionEvent::Event { relay_url, event } => match event.kind {
                RESPONSE_KIND => self.handle_response(&event, None),
                NOTIFICATION_KIND => self.handle_notification(&event),
                kind => debug!(relay_url, kind, "ignoring event of unexpected kind"),
            },
            SessionEvent::PublishAck {
                relay_url,
                event_id,
                accepted,
                message,
            } => {
                debug!(relay_url, event_id, accepted, message, "publish acknowledged");
            }
            SessionEvent::EndOfStored {
                relay_url,
                subscription_id,
            } => {
                debug!(relay_url, subscription_id, "end of stored events");
            }
            SessionEvent::SubscriptionClosed {
                relay_url,
                subscription_id,
                message,
            } => {
                debug!(relay_url, subscription_id, message, "subscription closed by relay");
            }
        }
    }

    /// Decode a kind-23195 response and complete the matching pending entry.
    /// `request_id_override` carries the correlation id when the engine feeds
    /// a raced response back through the router.
    pub fn handle_response(&self, event: &Event, request_id_override: Option<&str>) {
        if !self.authenticate(event) {
            return;
        }

        let plaintext = match self.crypto.decrypt_event(event) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(event = %event.id, error = %e, "response decryption failed");
                return;
            }
        };

        let raw = match RawResponse::parse(&plaintext) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(event = %event.id, error = %e, "response decode failed");
                return;
            }
        };

        let correlation_id = find_tag_value(&event.tags, E_TAG)
            .map(str::to_string)
            .or_else(|| request_id_override.map(str::to_string))
            .or_else(|| self.registry.resolve_request_id(&raw.result_type));
        let Some(correlation_id) = correlation_id else {
            debug!(event = %event.id, "dropping response with no matching request");
            return;
        };

        if self.registry.complete_single(&correlation_id, raw.clone())
            == RegistryOutcome::SingleCompleted
        {
            return;
        }

        // multi item: keyed by `d` tag, falling back to the payment hash
        let item_key = find_tag_value(&event.tags, D_TAG)
            .map(str::to_string)
            .or_else(|| {
                raw.result
                    .as_ref()
                    .and_then(|result| result.get("payment_hash"))
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
            });
        match item_key {
            Some(key) => {
                let outcome = self.registry.add_multi(&correlation_id, &key, raw);
                debug!(correlation_id, key, ?outcome, "multi response absorbed");
            }
            None => {
                debug!(correlation_id, "dropping multi response with no item key");
            }
        }
    }

    fn handle_notification(&self, event: &Event) {
        if !self.authenticate(event) {
            return;
        }

        let plaintext = match self.crypto.decrypt_event(event) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(event = %event.id, error = %e, "notification decryption failed");
                return;
            }
        };

        match parse_notification(&plaintext) {
            Ok(Some(notification)) => {
                // nobody listening is fine
                let sender = self
                    .notifications
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if let Some(sender) = sender.as_ref() {
                    let _ = sender.send(notification);
                }
            }
            Ok(None) => {
                debug!(event = %event.id, "dropping notification of unknown type");
            }
            Err(e) => {
                warn!(event = %event.id, error = %e, "notification decode failed");
            }
        }
    }

    /// The event must be wallet-authored, and a present `p` tag must target
    /// this client.
    fn authenticate(&self, event: &Event) -> bool {
        if event.pubkey != self.wallet_pubkey {
            warn!(event = %event.id, author = %event.pubkey, "rejecting event from foreign author");
            return false;
        }
        if let Some(target) = find_tag_value(&event.tags, P_TAG) {
            if target != self.client_pubkey {
                warn!(event = %event.id, target, "rejecting event targeted at another client");
                return false;
            }
        }
        true
    }

}
