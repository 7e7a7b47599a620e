use anyhow::{Context, Result};
use keyring::Entry;
use tracing::warn;

use super::TokenStore;
use crate::models::TokenPair;

const SERVICE_NAME: &str = "qalam";

/// Keychain account holding the serialized pair.
const SESSION_ACCOUNT: &str = "session";

/// Token storage in the OS keychain.
///
/// Both tokens live in one keychain secret so they are replaced together.
/// The entry is resolved once and reused for every read and write.
pub struct KeyringTokenStore {
    entry: Entry,
}

impl KeyringTokenStore {
    /// Open the store under the default `qalam` service.
    pub fn open() -> Result<Self> {
        Self::new(SERVICE_NAME)
    }

    pub fn new(service: &str) -> Result<Self> {
        let entry = Entry::new(service, SESSION_ACCOUNT).context("Failed to create keyring entry")?;
        Ok(Self { entry })
    }

    fn load(&self) -> Option<TokenPair> {
        let secret = match self.entry.get_password() {
            Ok(secret) => secret,
            // NoEntry is the normal logged-out case; only log real failures.
            Err(keyring::Error::NoEntry) => return None,
            Err(e) => {
                warn!(error = %e, "Keychain read failed");
                return None;
            }
        };
        match serde_json::from_str::<TokenPair>(&secret) {
            Ok(pair) if pair.is_complete() => Some(pair),
            _ => {
                warn!("Keychain holds an unreadable token pair, ignoring it");
                None
            }
        }
    }
}

impl TokenStore for KeyringTokenStore {
    fn access_token(&self) -> Option<String> {
        self.load().map(|p| p.access_token)
    }

    fn refresh_token(&self) -> Option<String> {
        self.load().map(|p| p.refresh_token)
    }

    fn set_tokens(&self, pair: &TokenPair) -> Result<()> {
        if !pair.is_complete() {
            anyhow::bail!("Refusing to store an incomplete token pair");
        }
        let secret = serde_json::to_string(pair)?;
        self.entry
            .set_password(&secret)
            .context("Failed to store tokens in keychain")?;
        Ok(())
    }

    fn clear_tokens(&self) -> Result<()> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete tokens from keychain"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Store backed by keyring's in-process mock, so tests never touch the
    /// real keychain.
    fn mock_store() -> KeyringTokenStore {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        KeyringTokenStore::new("qalam-test").expect("mock entry")
    }

    #[test]
    fn test_pair_round_trips_through_keychain() {
        let store = mock_store();
        assert!(!store.is_logged_in());

        store
            .set_tokens(&TokenPair::new("acc-1", "ref-1"))
            .expect("set tokens");
        assert_eq!(store.access_token().as_deref(), Some("acc-1"));
        assert_eq!(store.refresh_token().as_deref(), Some("ref-1"));

        store
            .set_tokens(&TokenPair::new("acc-2", "ref-2"))
            .expect("swap tokens");
        assert_eq!(store.access_token().as_deref(), Some("acc-2"));
        assert_eq!(store.refresh_token().as_deref(), Some("ref-2"));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let store = mock_store();
        store
            .set_tokens(&TokenPair::new("acc", "ref"))
            .expect("set tokens");

        store.clear_tokens().expect("clear tokens");
        assert!(!store.is_logged_in());
        store.clear_tokens().expect("clear when already empty");
    }

    #[test]
    fn test_incomplete_pair_is_refused() {
        let store = mock_store();
        store
            .set_tokens(&TokenPair::new("acc", "ref"))
            .expect("set tokens");

        assert!(store.set_tokens(&TokenPair::new("", "ref-2")).is_err());
        assert_eq!(store.access_token().as_deref(), Some("acc"));
    }
}
