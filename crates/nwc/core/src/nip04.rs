//! NIP-04 encryption over a per-peer shared secret.
//!
//! Legacy scheme kept for wallets that never advertised NIP-44. AES-256-CBC
//! keyed with the raw ECDH x-coordinate (NIP-04 does not hash the shared
//! point), wire format `<ciphertext_base64>?iv=<iv_base64>`.

use aes::Aes256;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use bitcoin::secp256k1::{PublicKey, SecretKey, ecdh};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Errors from NIP-04 operations.
#[derive(Debug, Error)]
pub enum Nip04Error {
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("decryption failed: {0}")]
    Decryption(String),
}

/// The per-peer NIP-04 shared secret. Zeroed when dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    /// Derive the shared secret from our secret key and the peer's 33-byte
    /// compressed public key.
    pub fn derive(secret_key: &[u8; 32], peer_pubkey: &[u8]) -> Result<Self, Nip04Error> {
        let sk = SecretKey::from_slice(secret_key)
            .map_err(|e| Nip04Error::InvalidKey(e.to_string()))?;
        let pk = PublicKey::from_slice(peer_pubkey)
            .map_err(|e| Nip04Error::InvalidKey(e.to_string()))?;

        let shared_point = ecdh::shared_secret_point(&pk, &sk);
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&shared_point[..32]);
        Ok(Self(secret))
    }

    /// Encrypt a plaintext, producing `<ciphertext>?iv=<iv>`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, Nip04Error> {
        use rand::RngCore;
        let mut iv = [0u8; 16];
        rand::rng().fill_bytes(&mut iv);

        let cipher = Aes256CbcEnc::new(&self.0.into(), &iv.into());
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        Ok(format!(
            "{}?iv={}",
            BASE64_STANDARD.encode(&ciphertext),
            BASE64_STANDARD.encode(iv)
        ))
    }

    /// Decrypt a `<ciphertext>?iv=<iv>` payload.
    pub fn decrypt(&self, payload: &str) -> Result<String, Nip04Error> {
        let (ciphertext_b64, iv_b64) = payload.split_once("?iv=").ok_or_else(|| {
            Nip04Error::InvalidFormat("expected <ciphertext>?iv=<iv>".to_string())
        })?;

        let ciphertext = BASE64_STANDARD.decode(ciphertext_b64)?;
        let iv_bytes = BASE64_STANDARD.decode(iv_b64)?;
        let iv: [u8; 16] = iv_bytes
            .try_into()
            .map_err(|_| Nip04Error::InvalidFormat("IV must be 16 bytes".to_string()))?;

        let cipher = Aes256CbcDec::new(&self.0.into(), &iv.into());
        let plaintext = cipher
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|e| Nip04Error::Decryption(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|e| Nip04Error::Decryption(e.to_string()))
    }
}
