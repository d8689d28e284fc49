//! Minimal NIP-01 event layer: canonical serialization, schnorr signing and
//! verification, and tag helpers.
//!
//! Signing is deterministic (`sign_schnorr_no_aux_rand`) so the event id of a
//! finalized event is a stable function of its template and key.

use bitcoin::hashes::{Hash, sha256};
use bitcoin::secp256k1::schnorr::Signature;
use bitcoin::secp256k1::{Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Errors from event construction and verification.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("event id mismatch: expected {expected}, got {actual}")]
    IdMismatch { expected: String, actual: String },
}

/// A signed Nostr event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

/// The unsigned portion of an event, ready for [`finalize_event`].
#[derive(Debug, Clone)]
pub struct EventTemplate {
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

/// Generate a fresh secp256k1 secret key.
pub fn generate_secret_key() -> [u8; 32] {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    loop {
        rand::rng().fill_bytes(&mut bytes);
        if SecretKey::from_slice(&bytes).is_ok() {
            return bytes;
        }
    }
}

/// Derive the x-only public key for a secret key, hex-encoded.
pub fn get_public_key_hex(secret_key: &[u8; 32]) -> Result<String, EventError> {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(secret_key)
        .map_err(|e| EventError::InvalidSecretKey(e.to_string()))?;
    let keypair = Keypair::from_secret_key(&secp, &sk);
    let (xonly, _parity) = keypair.x_only_public_key();
    Ok(hex::encode(xonly.serialize()))
}

/// Convert an x-only hex public key into the 33-byte compressed form used by
/// ECDH. Nostr keys are x-only; the even-parity point is assumed.
pub fn pubkey_hex_to_compressed(pubkey_hex: &str) -> Result<[u8; 33], EventError> {
    let bytes =
        hex::decode(pubkey_hex).map_err(|e| EventError::InvalidPublicKey(e.to_string()))?;
    let xonly: [u8; 32] = bytes
        .try_into()
        .map_err(|_| EventError::InvalidPublicKey("expected 32 bytes".to_string()))?;

    let mut compressed = [0u8; 33];
    compressed[0] = 0x02;
    compressed[1..].copy_from_slice(&xonly);
    Ok(compressed)
}

/// Canonical NIP-01 serialization: `[0, pubkey, created_at, kind, tags, content]`.
pub fn serialize_event(
    pubkey: &str,
    created_at: u64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> String {
    json!([0, pubkey, created_at, kind, tags, content]).to_string()
}

fn event_digest(
    pubkey: &str,
    created_at: u64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> [u8; 32] {
    let serialized = serialize_event(pubkey, created_at, kind, tags, content);
    sha256::Hash::hash(serialized.as_bytes()).to_byte_array()
}

/// The event id: sha256 over the canonical serialization, hex-encoded.
pub fn get_event_hash(
    pubkey: &str,
    created_at: u64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> String {
    hex::encode(event_digest(pubkey, created_at, kind, tags, content))
}

/// Sign an event template, producing a complete event with id and signature.
pub fn finalize_event(template: &EventTemplate, secret_key: &[u8; 32]) -> Result<Event, EventError> {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(secret_key)
        .map_err(|e| EventError::InvalidSecretKey(e.to_string()))?;
    let keypair = Keypair::from_secret_key(&secp, &sk);
    let (xonly, _parity) = keypair.x_only_public_key();
    let pubkey = hex::encode(xonly.serialize());

    let digest = event_digest(
        &pubkey,
        template.created_at,
        template.kind,
        &template.tags,
        &template.content,
    );
    let message = Message::from_digest(digest);
    let sig = secp.sign_schnorr_no_aux_rand(&message, &keypair);

    Ok(Event {
        id: hex::encode(digest),
        pubkey,
        created_at: template.created_at,
        kind: template.kind,
        tags: template.tags.clone(),
        content: template.content.clone(),
        sig: hex::encode(sig.as_ref()),
    })
}

/// Verify an event's id and schnorr signature.
pub fn verify_event(event: &Event) -> Result<(), EventError> {
    let expected = get_event_hash(
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    );
    if expected != event.id {
        return Err(EventError::IdMismatch {
            expected,
            actual: event.id.clone(),
        });
    }

    let secp = Secp256k1::new();
    let pubkey_bytes =
        hex::decode(&event.pubkey).map_err(|e| EventError::InvalidPublicKey(e.to_string()))?;
    let xonly = XOnlyPublicKey::from_slice(&pubkey_bytes)
        .map_err(|e| EventError::InvalidPublicKey(e.to_string()))?;

    let sig_bytes =
        hex::decode(&event.sig).map_err(|e| EventError::InvalidSignature(e.to_string()))?;
    let sig = Signature::from_slice(&sig_bytes)
        .map_err(|e| EventError::InvalidSignature(e.to_string()))?;

    let digest: [u8; 32] = hex::decode(&event.id)
        .map_err(|e| EventError::InvalidSignature(e.to_string()))?
        .try_into()
        .map_err(|_| EventError::InvalidSignature("event id is not 32 bytes".to_string()))?;
    let message = Message::from_digest(digest);

    secp.verify_schnorr(&sig, &message, &xonly)
        .map_err(|e| EventError::InvalidSignature(e.to_string()))
}

/// First value of the first tag named `name`.
pub fn find_tag_value<'a>(tags: &'a [Vec<String>], name: &str) -> Option<&'a str> {
    tags.iter()
        .find(|tag| tag.first().map(|t| t == name).unwrap_or(false))
        .and_then(|tag| tag.get(1))
        .map(String::as_str)
}

/// First values of every tag named `name`.
pub fn find_tag_values<'a>(tags: &'a [Vec<String>], name: &str) -> Vec<&'a str> {
    tags.iter()
        .filter(|tag| tag.first().map(|t| t == name).unwrap_or(false))
        .filter_map(|tag| tag.get(1))
        .map(String::as_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_secret() -> [u8; 32] {
        let mut key = [0u8; 32];
        key[31] = 7;
        key
    }

    fn sample_template() -> EventTemplate {
        EventTemplate {
            created_at: 1_700_000_000,
            kind: 23194,
            tags: vec![vec!["p".to_string(), "ab".repeat(32)]],
            content: "ciphertext".to_string(),
        }
    }

    #[test]
    fn test_finalize_is_deterministic() {
        let secret = test_secret();
        let a = finalize_event(&sample_template(), &secret).unwrap();
        let b = finalize_event(&sample_template(), &secret).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.sig, b.sig);
        assert_eq!(a.id.len(), 64);
    }

    #[test]
    fn test_finalize_and_verify() {
        let secret = test_secret();
        let event = finalize_event(&sample_template(), &secret).unwrap();
        assert_eq!(event.pubkey, get_public_key_hex(&secret).unwrap());
        verify_event(&event).unwrap();
    }

    #[test]
    fn test_verify_rejects_tampered_content() {
        let secret = test_secret();
        let mut event = finalize_event(&sample_template(), &secret).unwrap();
        event.content = "tampered".to_string();
        assert!(matches!(
            verify_event(&event),
            Err(EventError::IdMismatch { .. })
        ));
    }

    #[test]
    fn test_verify_rejects_wrong_signer() {
        let secret = test_secret();
        let mut other = test_secret();
        other[0] = 9;

        let mut event = finalize_event(&sample_template(), &secret).unwrap();
        let forged = finalize_event(&sample_template(), &other).unwrap();
        event.sig = forged.sig;
        assert!(verify_event(&event).is_err());
    }

    #[test]
    fn test_tag_helpers() {
        let tags = vec![
            vec!["e".to_string(), "first".to_string()],
            vec!["p".to_string(), "peer".to_string()],
            vec!["e".to_string(), "second".to_string()],
            vec!["empty".to_string()],
        ];
        assert_eq!(find_tag_value(&tags, "e"), Some("first"));
        assert_eq!(find_tag_value(&tags, "p"), Some("peer"));
        assert_eq!(find_tag_value(&tags, "empty"), None);
        assert_eq!(find_tag_value(&tags, "missing"), None);
        assert_eq!(find_tag_values(&tags, "e"), vec!["first", "second"]);
    }

    #[test]
    fn test_event_serde_roundtrip() {
        let secret = test_secret();
        let event = finalize_event(&sample_template(), &secret).unwrap();
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
