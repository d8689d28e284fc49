//! `nostr+walletconnect://` connection URI parsing and construction.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;
use url::form_urlencoded;

const SCHEME: &str = "nostr+walletconnect";

/// Errors from connection URI handling.
#[derive(Debug, Error)]
pub enum UriError {
    #[error("invalid URI: {0}")]
    Malformed(#[from] url::ParseError),

    #[error("expected scheme '{SCHEME}', got '{0}'")]
    InvalidScheme(String),

    #[error("invalid wallet pubkey: expected 64 hex characters")]
    InvalidPubkey,

    #[error("missing or invalid 'secret' parameter")]
    InvalidSecret,

    #[error("at least one relay is required")]
    MissingRelay,
}

/// A parsed wallet connection: wallet pubkey, relay list, client secret, and
/// an optional lightning address. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletConnectUri {
    /// Wallet service pubkey, lowercase hex.
    pub wallet_pubkey: String,
    /// Relay URLs in declaration order, trimmed and deduplicated.
    pub relays: Vec<String>,
    /// Client secret key.
    pub secret: [u8; 32],
    /// Optional lightning address (`lud16`).
    pub lud16: Option<String>,
}

impl WalletConnectUri {
    pub fn new(
        wallet_pubkey: impl Into<String>,
        relays: Vec<String>,
        secret: [u8; 32],
    ) -> Result<Self, UriError> {
        let wallet_pubkey = normalize_pubkey(&wallet_pubkey.into())?;
        let relays = normalize_relays(relays)?;
        Ok(Self {
            wallet_pubkey,
            relays,
            secret,
            lud16: None,
        })
    }

    pub fn with_lud16(mut self, lud16: impl Into<String>) -> Self {
        self.lud16 = Some(lud16.into());
        self
    }

    /// Parse a connection URI. The scheme is case-insensitive, `relay` is
    /// repeatable with order preserved, `secret` is required.
    pub fn parse(input: &str) -> Result<Self, UriError> {
        let url = Url::parse(input)?;
        if url.scheme() != SCHEME {
            return Err(UriError::InvalidScheme(url.scheme().to_string()));
        }

        // `scheme://pubkey?...` puts the pubkey in the host position;
        // `scheme:pubkey?...` leaves it in the path.
        let raw_pubkey = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => url.path().trim_start_matches('/').to_string(),
        };
        let wallet_pubkey = normalize_pubkey(&raw_pubkey)?;

        let mut relays = Vec::new();
        let mut secret = None;
        let mut lud16 = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "relay" => relays.push(value.into_owned()),
                "secret" => secret = Some(value.into_owned()),
                "lud16" => lud16 = Some(value.into_owned()),
                _ => {}
            }
        }

        let secret_hex = secret.ok_or(UriError::InvalidSecret)?;
        let secret_bytes: [u8; 32] = hex::decode(&secret_hex)
            .map_err(|_| UriError::InvalidSecret)?
            .try_into()
            .map_err(|_| UriError::InvalidSecret)?;

        let relays = normalize_relays(relays)?;

        Ok(Self {
            wallet_pubkey,
            relays,
            secret: secret_bytes,
            lud16,
        })
    }
}

impl FromStr for WalletConnectUri {
    type Err = UriError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

impl fmt::Display for WalletConnectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut query = form_urlencoded::Serializer::new(String::new());
        for relay in &self.relays {
            query.append_pair("relay", relay);
        }
        query.append_pair("secret", &hex::encode(self.secret));
        if let Some(lud16) = &self.lud16 {
            query.append_pair("lud16", lud16);
        }
        write!(f, "{SCHEME}://{}?{}", self.wallet_pubkey, query.finish())
    }
}

fn normalize_pubkey(raw: &str) -> Result<String, UriError> {
    let pubkey = raw.to_lowercase();
    if pubkey.len() != 64 || !pubkey.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(UriError::InvalidPubkey);
    }
    Ok(pubkey)
}

/// Trim, drop empties, and deduplicate while preserving declaration order.
fn normalize_relays(relays: Vec<String>) -> Result<Vec<String>, UriError> {
    let mut seen = Vec::new();
    for relay in relays {
        let trimmed = relay.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !seen.iter().any(|existing: &String| existing == trimmed) {
            seen.push(trimmed.to_string());
        }
    }
    if seen.is_empty() {
        return Err(UriError::MissingRelay);
    }
    Ok(seen)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUBKEY: &str = "b889ff5b1513b641e2a139f661a661364979c5beee91842f8f0ef42ab558e9d4";
    const SECRET: &str = "71a8c14c1407c113601079c4302dab36460f0ccd0ad506f1f2dc73b5100e4f3c";

    #[test]
    fn test_parse_full_uri() {
        // mixed percent-encoded and literal relay values
        let uri = WalletConnectUri::parse(&format!(
            "nostr+walletconnect://{PUBKEY}?relay=wss%3A%2F%2Frelay.damus.io&relay=wss://example.com&secret={SECRET}&lud16=alice@example.com"
        ))
        .unwrap();

        assert_eq!(uri.wallet_pubkey, PUBKEY);
        assert_eq!(uri.relays, vec!["wss://relay.damus.io", "wss://example.com"]);
        assert_eq!(hex::encode(uri.secret), SECRET);
        assert_eq!(uri.lud16.as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        let uri = WalletConnectUri::parse(&format!(
            "NOSTR+WALLETCONNECT://{}?relay=wss://r.example&secret={SECRET}",
            PUBKEY.to_uppercase()
        ))
        .unwrap();
        assert_eq!(uri.wallet_pubkey, PUBKEY);
    }

    #[test]
    fn test_parse_without_authority_slashes() {
        let uri = WalletConnectUri::parse(&format!(
            "nostr+walletconnect:{PUBKEY}?relay=wss://r.example&secret={SECRET}"
        ))
        .unwrap();
        assert_eq!(uri.wallet_pubkey, PUBKEY);
    }

    #[test]
    fn test_relays_trimmed_and_deduped() {
        let uri = WalletConnectUri::parse(&format!(
            "nostr+walletconnect://{PUBKEY}?relay=%20wss://a.example%20&relay=wss://b.example&relay=wss://a.example&secret={SECRET}"
        ))
        .unwrap();
        assert_eq!(uri.relays, vec!["wss://a.example", "wss://b.example"]);
    }

    #[test]
    fn test_missing_secret_rejected() {
        let err = WalletConnectUri::parse(&format!(
            "nostr+walletconnect://{PUBKEY}?relay=wss://r.example"
        ))
        .unwrap_err();
        assert!(matches!(err, UriError::InvalidSecret));
    }

    #[test]
    fn test_missing_relay_rejected() {
        let err =
            WalletConnectUri::parse(&format!("nostr+walletconnect://{PUBKEY}?secret={SECRET}"))
                .unwrap_err();
        assert!(matches!(err, UriError::MissingRelay));
    }

    #[test]
    fn test_invalid_pubkey_rejected() {
        let err = WalletConnectUri::parse(&format!(
            "nostr+walletconnect://nothex?relay=wss://r.example&secret={SECRET}"
        ))
        .unwrap_err();
        assert!(matches!(err, UriError::InvalidPubkey));
    }

    #[test]
    fn test_wrong_scheme_rejected() {
        let err = WalletConnectUri::parse(&format!(
            "nostr://{PUBKEY}?relay=wss://r.example&secret={SECRET}"
        ))
        .unwrap_err();
        assert!(matches!(err, UriError::InvalidScheme(_)));
    }

    #[test]
    fn test_build_parse_roundtrip() {
        let secret: [u8; 32] = hex::decode(SECRET).unwrap().try_into().unwrap();
        let original = WalletConnectUri::new(
            PUBKEY,
            vec![
                " wss://relay.damus.io ".to_string(),
                "wss://example.com".to_string(),
                "wss://relay.damus.io".to_string(),
            ],
            secret,
        )
        .unwrap()
        .with_lud16("alice@example.com");

        let rendered = original.to_string();
        let reparsed = WalletConnectUri::parse(&rendered).unwrap();
        assert_eq!(reparsed, original);
        assert_eq!(
            reparsed.relays,
            vec!["wss://relay.damus.io", "wss://example.com"]
        );
    }
}
