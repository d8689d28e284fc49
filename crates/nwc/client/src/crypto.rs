//! Encryption layer and scheme negotiation.
//!
//! Both per-peer secrets (the NIP-44 conversation key and the NIP-04 shared
//! secret) are derived once at client construction and zeroized on close.
//! The active scheme starts at NIP-04, the NIP-47 default, and is updated
//! whenever wallet metadata is refreshed.

use crate::error::{Failure, NwcResult};
use nwc_core::event::{Event, EventTemplate, finalize_event, find_tag_value};
use nwc_core::nip47::{ENCRYPTION_TAG, EncryptionScheme, WalletMetadata};
use nwc_core::{ConversationKey, SharedSecret, pubkey_hex_to_compressed};
use std::sync::{Mutex, PoisonError, RwLock};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// The client signing key. Zeroed when dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
struct SigningKey([u8; 32]);

/// Per-peer derived secrets for both supported schemes.
pub struct PeerCipher {
    conversation_key: ConversationKey,
    shared_secret: SharedSecret,
}

impl PeerCipher {
    pub fn derive(secret_key: &[u8; 32], wallet_pubkey: &str) -> NwcResult<Self> {
        let peer = pubkey_hex_to_compressed(wallet_pubkey)
            .map_err(|e| Failure::unknown(format!("invalid wallet pubkey: {e}")))?;

        Ok(Self {
            conversation_key: ConversationKey::derive(secret_key, &peer)
                .map_err(|e| Failure::unknown(format!("conversation key derivation: {e}")))?,
            shared_secret: SharedSecret::derive(secret_key, &peer)
                .map_err(|e| Failure::unknown(format!("shared secret derivation: {e}")))?,
        })
    }

    pub fn encrypt(&self, plaintext: &str, scheme: &EncryptionScheme) -> NwcResult<String> {
        match scheme {
            EncryptionScheme::Nip44V2 => self
                .conversation_key
                .encrypt(plaintext)
                .map_err(|e| Failure::unknown(format!("NIP-44 encryption: {e}"))),
            EncryptionScheme::Nip04 => self
                .shared_secret
                .encrypt(plaintext)
                .map_err(|e| Failure::unknown(format!("NIP-04 encryption: {e}"))),
            EncryptionScheme::Unknown(token) => Err(Failure::encryption_unsupported(format!(
                "cannot encrypt with unknown scheme '{token}'"
            ))),
        }
    }

    pub fn decrypt(&self, ciphertext: &str, scheme: &EncryptionScheme) -> NwcResult<String> {
        match scheme {
            EncryptionScheme::Nip44V2 => self
                .conversation_key
                .decrypt(ciphertext)
                .map_err(|e| Failure::protocol(format!("NIP-44 decryption failed: {e}"))),
            EncryptionScheme::Nip04 => self
                .shared_secret
                .decrypt(ciphertext)
                .map_err(|e| Failure::protocol(format!("NIP-04 decryption failed: {e}"))),
            EncryptionScheme::Unknown(token) => Err(Failure::encryption_unsupported(format!(
                "cannot decrypt with unknown scheme '{token}'"
            ))),
        }
    }
}

/// Select the active scheme for the given wallet metadata, preferring
/// NIP-44 v2 over NIP-04.
pub fn select_scheme(metadata: &WalletMetadata) -> NwcResult<EncryptionScheme> {
    let candidates: Vec<EncryptionScheme> = metadata
        .encryption_schemes
        .iter()
        .filter(|scheme| scheme.is_supported())
        .cloned()
        .collect();

    let candidates = if candidates.is_empty() {
        if metadata.defaulted_to_nip04 {
            vec![EncryptionScheme::Nip04]
        } else {
            return Err(Failure::encryption_unsupported(format!(
                "wallet advertises no supported encryption scheme: {:?}",
                metadata
                    .encryption_schemes
                    .iter()
                    .map(EncryptionScheme::as_tag_value)
                    .collect::<Vec<_>>()
            )));
        }
    } else {
        candidates
    };

    for preference in [EncryptionScheme::Nip44V2, EncryptionScheme::Nip04] {
        if candidates.contains(&preference) {
            return Ok(preference);
        }
    }
    Ok(candidates[0].clone())
}

struct KeyMaterial {
    signing_key: SigningKey,
    cipher: PeerCipher,
}

/// Shared crypto state: key material (until close), the active scheme, and
/// the latest wallet metadata. Single writer, many readers; reads never hold
/// a lock across an await.
pub struct CryptoContext {
    keys: Mutex<Option<KeyMaterial>>,
    active: RwLock<EncryptionScheme>,
    metadata: RwLock<Option<WalletMetadata>>,
}

impl CryptoContext {
    pub fn new(secret_key: [u8; 32], wallet_pubkey: &str) -> NwcResult<Self> {
        let cipher = PeerCipher::derive(&secret_key, wallet_pubkey)?;
        Ok(Self {
            keys: Mutex::new(Some(KeyMaterial {
                signing_key: SigningKey(secret_key),
                cipher,
            })),
            active: RwLock::new(EncryptionScheme::Nip04),
            metadata: RwLock::new(None),
        })
    }

    pub fn active_scheme(&self) -> EncryptionScheme {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn metadata(&self) -> Option<WalletMetadata> {
        self.metadata
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Store refreshed metadata and renegotiate the active scheme.
    pub fn apply_metadata(&self, metadata: WalletMetadata) -> NwcResult<EncryptionScheme> {
        let scheme = select_scheme(&metadata)?;
        debug!(scheme = %scheme, "negotiated encryption scheme");
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = scheme.clone();
        *self
            .metadata
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(metadata);
        Ok(scheme)
    }

    /// Encrypt with the active scheme, returning the scheme actually used so
    /// the caller can stamp the `encryption` tag.
    pub fn encrypt_active(&self, plaintext: &str) -> NwcResult<(String, EncryptionScheme)> {
        let scheme = self.active_scheme();
        let ciphertext = self.with_keys(|keys| keys.cipher.encrypt(plaintext, &scheme))?;
        Ok((ciphertext, scheme))
    }

    pub fn decrypt(&self, ciphertext: &str, scheme: &EncryptionScheme) -> NwcResult<String> {
        self.with_keys(|keys| keys.cipher.decrypt(ciphertext, scheme))
    }

    /// Decrypt an inbound event. A supported `encryption` tag is
    /// authoritative; otherwise the active scheme is inferred, with a single
    /// NIP-04 retry when the wallet advertises it. The original failure wins
    /// if the retry also fails.
    pub fn decrypt_event(&self, event: &Event) -> NwcResult<String> {
        let tagged = find_tag_value(&event.tags, ENCRYPTION_TAG).map(EncryptionScheme::from_token);

        if let Some(scheme) = tagged.filter(EncryptionScheme::is_supported) {
            return self.decrypt(&event.content, &scheme);
        }

        let active = self.active_scheme();
        match self.decrypt(&event.content, &active) {
            Ok(plaintext) => Ok(plaintext),
            Err(original) => {
                let nip04_advertised = self
                    .metadata()
                    .map(|m| m.advertises(&EncryptionScheme::Nip04))
                    .unwrap_or(false);
                if active != EncryptionScheme::Nip04 && nip04_advertised {
                    debug!(event = %event.id, "inferred-scheme decrypt failed, retrying with NIP-04");
                    match self.decrypt(&event.content, &EncryptionScheme::Nip04) {
                        Ok(plaintext) => Ok(plaintext),
                        Err(_) => Err(original),
                    }
                } else {
                    Err(original)
                }
            }
        }
    }

    /// Sign an event template with the client key.
    pub fn sign(&self, template: &EventTemplate) -> NwcResult<Event> {
        self.with_keys(|keys| finalize_event(template, &keys.signing_key.0).map_err(Failure::from))
    }

    /// Drop and zeroize all key material. Subsequent operations fail.
    pub fn close(&self) {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn with_keys<T>(&self, f: impl FnOnce(&KeyMaterial) -> NwcResult<T>) -> NwcResult<T> {
        let guard = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(keys) => f(keys),
            None => Err(Failure::unknown("client is closed")),
        }
    }
}
