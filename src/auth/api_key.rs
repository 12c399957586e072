//! Opaque API keys
//!
//! A key reads `gk_<key id>_<secret>`. The key id is public: it names the key
//! on revocation and in logs, and selects the stored row on lookup. Only a
//! SHA-256 derivation of the secret, salted with its key id, is persisted.

use rand::distributions::{Alphanumeric, DistString};
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};
use std::fmt;

const PREFIX: &str = "gk_";
const KEY_ID_LEN: usize = 12;
const SECRET_LEN: usize = 32;
const KEY_ID_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A raw key, as handed to its owner exactly once
#[derive(Clone, PartialEq, Eq)]
pub struct RawApiKey {
    key_id: String,
    secret: String,
}

impl RawApiKey {
    pub fn generate() -> Self {
        let mut rng = thread_rng();
        let key_id = (0..KEY_ID_LEN)
            .map(|_| KEY_ID_CHARS[rng.gen_range(0..KEY_ID_CHARS.len())] as char)
            .collect();
        let secret = Alphanumeric.sample_string(&mut rng, SECRET_LEN);

        Self { key_id, secret }
    }

    /// Split a presented key; anything not shaped like a generated key is `None`
    pub fn parse(raw: &str) -> Option<Self> {
        let (key_id, secret) = raw.strip_prefix(PREFIX)?.split_once('_')?;

        let key_id_ok = key_id.len() == KEY_ID_LEN
            && key_id.bytes().all(|b| KEY_ID_CHARS.contains(&b));
        let secret_ok =
            secret.len() == SECRET_LEN && secret.bytes().all(|b| b.is_ascii_alphanumeric());
        if !key_id_ok || !secret_ok {
            return None;
        }

        Some(Self {
            key_id: key_id.to_string(),
            secret: secret.to_string(),
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Value stored in place of the secret
    pub fn derive(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.key_id.as_bytes());
        hasher.update(b":");
        hasher.update(self.secret.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Full key text
    pub fn expose(&self) -> String {
        format!("{}{}_{}", PREFIX, self.key_id, self.secret)
    }
}

impl fmt::Debug for RawApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawApiKey")
            .field("key_id", &self.key_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}
