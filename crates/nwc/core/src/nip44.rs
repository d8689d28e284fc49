//! NIP-44 v2 encryption over a per-peer conversation key.
//!
//! The conversation key is the HKDF-extract PRK of the ECDH x-coordinate
//! under the `nip44-v2` salt (a single HMAC-SHA256, no expand step), derived
//! once per peer and reused for every message in both directions. Per-message
//! keys come from HKDF-expand over that PRK with the nonce as info. Payload
//! layout: `version(1) || nonce(32) || ciphertext || mac(32)`, base64-encoded.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use bitcoin::secp256k1::{PublicKey, SecretKey, ecdh};
use chacha20::ChaCha20;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const VERSION: u8 = 2;

const MIN_PLAINTEXT_LEN: usize = 1;
const MAX_PLAINTEXT_LEN: usize = 65535;
/// 2-byte length prefix plus the 32-byte minimum padded block.
const MIN_CIPHERTEXT_LEN: usize = 2 + 32;
const NONCE_SIZE: usize = 32;
const MAC_SIZE: usize = 32;
const HKDF_SALT: &[u8] = b"nip44-v2";

type HmacSha256 = Hmac<Sha256>;

/// Errors from NIP-44 operations.
#[derive(Debug, Error)]
pub enum Nip44Error {
    #[error("plaintext length out of range")]
    PlaintextLength,

    #[error("invalid payload structure")]
    InvalidPayload,

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),

    #[error("MAC verification failed")]
    MacVerificationFailed,

    #[error("invalid padding")]
    InvalidPadding,

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

/// The per-peer NIP-44 conversation key. Zeroed when dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ConversationKey([u8; 32]);

impl ConversationKey {
    /// Derive the conversation key from our secret key and the peer's
    /// 33-byte compressed public key. Symmetric: both sides derive the same
    /// key.
    pub fn derive(secret_key: &[u8; 32], peer_pubkey: &[u8]) -> Result<Self, Nip44Error> {
        let sk = SecretKey::from_slice(secret_key)
            .map_err(|e| Nip44Error::InvalidKey(e.to_string()))?;
        let pk = PublicKey::from_slice(peer_pubkey)
            .map_err(|e| Nip44Error::InvalidKey(e.to_string()))?;

        let shared_point = ecdh::shared_secret_point(&pk, &sk);
        let shared_x = &shared_point[..32];

        // HKDF-extract: the PRK itself is the conversation key; there is no
        // expand step at this stage.
        let mut prk = HmacSha256::new_from_slice(HKDF_SALT)
            .map_err(|e| Nip44Error::InvalidKey(e.to_string()))?;
        prk.update(shared_x);

        let mut key = [0u8; 32];
        key.copy_from_slice(&prk.finalize().into_bytes());
        Ok(Self(key))
    }

    /// Encrypt a plaintext, producing the base64 payload.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, Nip44Error> {
        use rand::RngCore;
        let mut nonce = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce);
        self.encrypt_with_nonce(plaintext, &nonce)
    }

    fn encrypt_with_nonce(&self, plaintext: &str, nonce: &[u8; 32]) -> Result<String, Nip44Error> {
        let (chacha_key, chacha_nonce, hmac_key) = self.message_keys(nonce)?;

        let mut buffer = pad(plaintext)?;
        let mut cipher = ChaCha20::new(&chacha_key.into(), &chacha_nonce.into());
        cipher.apply_keystream(&mut buffer);

        let mut mac =
            HmacSha256::new_from_slice(&hmac_key).map_err(|_| Nip44Error::InvalidPayload)?;
        mac.update(nonce);
        mac.update(&buffer);
        let mac_bytes = mac.finalize().into_bytes();

        let mut payload = Vec::with_capacity(1 + NONCE_SIZE + buffer.len() + MAC_SIZE);
        payload.push(VERSION);
        payload.extend_from_slice(nonce);
        payload.extend_from_slice(&buffer);
        payload.extend_from_slice(&mac_bytes);

        Ok(BASE64_STANDARD.encode(&payload))
    }

    /// Decrypt a base64 payload produced by [`ConversationKey::encrypt`].
    pub fn decrypt(&self, payload: &str) -> Result<String, Nip44Error> {
        let decoded = BASE64_STANDARD.decode(payload)?;
        if decoded.len() < 1 + NONCE_SIZE + MIN_CIPHERTEXT_LEN + MAC_SIZE {
            return Err(Nip44Error::InvalidPayload);
        }

        let version = decoded[0];
        if version != VERSION {
            return Err(Nip44Error::UnsupportedVersion(version));
        }

        let nonce: [u8; 32] = decoded[1..1 + NONCE_SIZE]
            .try_into()
            .map_err(|_| Nip44Error::InvalidPayload)?;
        let ciphertext = &decoded[1 + NONCE_SIZE..decoded.len() - MAC_SIZE];
        let mac_received = &decoded[decoded.len() - MAC_SIZE..];

        let (chacha_key, chacha_nonce, hmac_key) = self.message_keys(&nonce)?;

        let mut mac =
            HmacSha256::new_from_slice(&hmac_key).map_err(|_| Nip44Error::InvalidPayload)?;
        mac.update(&nonce);
        mac.update(ciphertext);
        mac.verify_slice(mac_received)
            .map_err(|_| Nip44Error::MacVerificationFailed)?;

        let mut buffer = ciphertext.to_vec();
        let mut cipher = ChaCha20::new(&chacha_key.into(), &chacha_nonce.into());
        cipher.apply_keystream(&mut buffer);

        unpad(&buffer)
    }

    /// HKDF-expand the conversation key (already a PRK) with the nonce as
    /// info into the per-message ChaCha20 key, ChaCha20 nonce, and HMAC key.
    fn message_keys(&self, nonce: &[u8; 32]) -> Result<([u8; 32], [u8; 12], [u8; 32]), Nip44Error> {
        let hkdf = Hkdf::<Sha256>::from_prk(&self.0)
            .map_err(|e| Nip44Error::InvalidKey(e.to_string()))?;
        let mut output = [0u8; 76];
        hkdf.expand(nonce, &mut output)
            .map_err(|_| Nip44Error::InvalidPayload)?;

        let mut chacha_key = [0u8; 32];
        let mut chacha_nonce = [0u8; 12];
        let mut hmac_key = [0u8; 32];
        chacha_key.copy_from_slice(&output[0..32]);
        chacha_nonce.copy_from_slice(&output[32..44]);
        hmac_key.copy_from_slice(&output[44..76]);

        Ok((chacha_key, chacha_nonce, hmac_key))
    }
}

/// Padded plaintext length, excluding the 2-byte length prefix: 32-byte
/// chunks up to 256 bytes, then the chunk is an eighth of the next power of
/// two above the length (so it doubles past each power-of-two boundary).
fn calc_padded_len(unpadded_len: usize) -> usize {
    if unpadded_len <= 32 {
        return 32;
    }
    let next_power = unpadded_len.next_power_of_two();
    let chunk = if next_power <= 256 {
        32
    } else {
        next_power / 8
    };
    chunk * ((unpadded_len - 1) / chunk + 1)
}

/// `[len: u16 BE][plaintext][zeros]`; the prefix is not counted by the
/// padding rounding.
fn pad(plaintext: &str) -> Result<Vec<u8>, Nip44Error> {
    let bytes = plaintext.as_bytes();
    if bytes.len() < MIN_PLAINTEXT_LEN || bytes.len() > MAX_PLAINTEXT_LEN {
        return Err(Nip44Error::PlaintextLength);
    }

    let mut padded = vec![0u8; 2 + calc_padded_len(bytes.len())];
    padded[0..2].copy_from_slice(&(bytes.len() as u16).to_be_bytes());
    padded[2..2 + bytes.len()].copy_from_slice(bytes);
    Ok(padded)
}

fn unpad(padded: &[u8]) -> Result<String, Nip44Error> {
    if padded.len() < 2 {
        return Err(Nip44Error::InvalidPadding);
    }

    let plaintext_len = u16::from_be_bytes([padded[0], padded[1]]) as usize;
    if plaintext_len < MIN_PLAINTEXT_LEN || plaintext_len > MAX_PLAINTEXT_LEN {
        return Err(Nip44Error::InvalidPadding);
    }

    if padded.len() != 2 + calc_padded_len(plaintext_len) {
        return Err(Nip44Error::InvalidPadding);
    }
    if padded[2 + plaintext_len..].iter().any(|&b| b != 0) {
        return Err(Nip44Error::InvalidPadding);
    }

    String::from_utf8(padded[2..2 + plaintext_len].to_vec())
        .map_err(|_| Nip44Error::InvalidPadding)
}
