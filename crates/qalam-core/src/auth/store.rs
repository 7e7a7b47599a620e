use anyhow::Result;
use parking_lot::RwLock;

use crate::models::TokenPair;

/// Where the access/refresh pair lives between requests.
///
/// Implementations make each call atomic: a reader sees the old pair or the
/// new pair, never one half of each. Everything else (who may write and
/// when) is the refresh flow's business.
pub trait TokenStore: Send + Sync {
    fn access_token(&self) -> Option<String>;

    fn refresh_token(&self) -> Option<String>;

    /// Replace both tokens at once.
    fn set_tokens(&self, pair: &TokenPair) -> Result<()>;

    /// Remove both tokens at once, leaving the logged-out state.
    fn clear_tokens(&self) -> Result<()>;

    fn is_logged_in(&self) -> bool {
        self.access_token().is_some() && self.refresh_token().is_some()
    }
}

/// Keeps the pair in memory for the life of the process.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    pair: RwLock<Option<TokenPair>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start logged in with `pair`. An incomplete pair starts logged out.
    pub fn with_tokens(pair: TokenPair) -> Self {
        Self {
            pair: RwLock::new(pair.is_complete().then_some(pair)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn access_token(&self) -> Option<String> {
        self.pair
            .read()
            .as_ref()
            .map(|p| p.access_token.clone())
            .filter(|t| !t.is_empty())
    }

    fn refresh_token(&self) -> Option<String> {
        self.pair
            .read()
            .as_ref()
            .map(|p| p.refresh_token.clone())
            .filter(|t| !t.is_empty())
    }

    fn set_tokens(&self, pair: &TokenPair) -> Result<()> {
        if !pair.is_complete() {
            anyhow::bail!("Refusing to store an incomplete token pair");
        }
        *self.pair.write() = Some(pair.clone());
        Ok(())
    }

    fn clear_tokens(&self) -> Result<()> {
        *self.pair.write() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_get_returns_exact_pair() {
        let store = MemoryTokenStore::with_tokens(TokenPair::new("old-a", "old-r"));
        store
            .set_tokens(&TokenPair::new("new-a", "new-r"))
            .expect("set tokens");

        assert_eq!(store.access_token().as_deref(), Some("new-a"));
        assert_eq!(store.refresh_token().as_deref(), Some("new-r"));
        assert!(store.is_logged_in());
    }

    #[test]
    fn test_incomplete_pair_is_refused() {
        let store = MemoryTokenStore::with_tokens(TokenPair::new("a", "r"));
        assert!(store.set_tokens(&TokenPair::new("new-a", "")).is_err());
        assert!(store.set_tokens(&TokenPair::new("", "new-r")).is_err());

        // The old pair survives whole.
        assert_eq!(store.access_token().as_deref(), Some("a"));
        assert_eq!(store.refresh_token().as_deref(), Some("r"));

        let half = MemoryTokenStore::with_tokens(TokenPair::new("a", ""));
        assert_eq!(half.access_token(), None);
        assert!(!half.is_logged_in());
    }

    #[test]
    fn test_clear_removes_both() {
        let store = MemoryTokenStore::with_tokens(TokenPair::new("a", "r"));
        store.clear_tokens().expect("clear tokens");

        assert_eq!(store.access_token(), None);
        assert_eq!(store.refresh_token(), None);
        assert!(!store.is_logged_in());
    }
}
