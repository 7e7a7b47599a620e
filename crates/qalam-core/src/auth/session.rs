//! Disk-backed token storage.
//!
//! The pair is kept in `tokens.json` in the cache directory so a session
//! survives restarts. Writes go through a temporary file and a rename, which
//! keeps the two tokens in step on disk as well as in memory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::TokenStore;
use crate::models::TokenPair;

/// Token file name in cache directory
const TOKENS_FILE: &str = "tokens.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub saved_at: DateTime<Utc>,
}

impl SessionData {
    pub fn new(tokens: TokenPair) -> Self {
        Self {
            tokens,
            saved_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.saved_at).num_minutes()
    }

    /// How long ago the pair was last written, for status output.
    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}

pub struct FileTokenStore {
    cache_dir: PathBuf,
    data: RwLock<Option<SessionData>>,
}

impl FileTokenStore {
    /// Open the store, loading any pair already on disk.
    ///
    /// An unreadable or half-filled file is treated as logged out.
    pub fn open(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        let data = Self::load(&cache_dir.join(TOKENS_FILE))?;
        debug!(path = %cache_dir.display(), has_tokens = data.is_some(), "Token store opened");
        Ok(Self {
            cache_dir,
            data: RwLock::new(data),
        })
    }

    fn load(path: &Path) -> Result<Option<SessionData>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path).context("Failed to read token file")?;
        match serde_json::from_str::<SessionData>(&contents) {
            Ok(data) if data.tokens.is_complete() => Ok(Some(data)),
            Ok(_) => {
                warn!("Token file holds an incomplete pair, ignoring it");
                Ok(None)
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse token file, ignoring it");
                Ok(None)
            }
        }
    }

    /// Snapshot of the stored session, if any.
    pub fn session(&self) -> Option<SessionData> {
        self.data.read().clone()
    }

    pub fn path(&self) -> PathBuf {
        self.cache_dir.join(TOKENS_FILE)
    }

    fn write_file(&self, data: &SessionData) -> Result<()> {
        std::fs::create_dir_all(&self.cache_dir).context("Failed to create cache directory")?;
        let contents = serde_json::to_string_pretty(data)?;
        let tmp = self.cache_dir.join(format!("{}.tmp", TOKENS_FILE));
        std::fs::write(&tmp, contents).context("Failed to write token file")?;
        std::fs::rename(&tmp, self.path()).context("Failed to replace token file")?;
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn access_token(&self) -> Option<String> {
        self.data
            .read()
            .as_ref()
            .map(|d| d.tokens.access_token.clone())
    }

    fn refresh_token(&self) -> Option<String> {
        self.data
            .read()
            .as_ref()
            .map(|d| d.tokens.refresh_token.clone())
    }

    fn set_tokens(&self, pair: &TokenPair) -> Result<()> {
        if !pair.is_complete() {
            anyhow::bail!("Refusing to store an incomplete token pair");
        }
        let data = SessionData::new(pair.clone());
        // Hold the write lock across the file swap so memory and disk agree.
        let mut current = self.data.write();
        self.write_file(&data)?;
        *current = Some(data);
        Ok(())
    }

    fn clear_tokens(&self) -> Result<()> {
        // Disk first: if the file stays, memory must keep matching it.
        let mut current = self.data.write();
        let path = self.path();
        if path.exists() {
            std::fs::remove_file(path).context("Failed to remove token file")?;
        }
        *current = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_tokens_survive_reopen() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileTokenStore::open(dir.path()).expect("open store");
        assert!(!store.is_logged_in());

        store
            .set_tokens(&TokenPair::new("acc-1", "ref-1"))
            .expect("set tokens");

        let reopened = FileTokenStore::open(dir.path()).expect("reopen store");
        assert_eq!(reopened.access_token().as_deref(), Some("acc-1"));
        assert_eq!(reopened.refresh_token().as_deref(), Some("ref-1"));
    }

    #[test]
    fn test_failed_clear_keeps_memory_and_disk_in_step() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileTokenStore::open(dir.path()).expect("open store");
        store
            .set_tokens(&TokenPair::new("acc", "ref"))
            .expect("set tokens");

        // A directory in place of the file makes the removal fail.
        std::fs::remove_file(store.path()).expect("remove file");
        std::fs::create_dir(store.path()).expect("create blocking dir");
        std::fs::write(store.path().join("keep"), "x").expect("fill dir");

        assert!(store.clear_tokens().is_err());
        assert_eq!(store.access_token().as_deref(), Some("acc"));
        assert_eq!(store.refresh_token().as_deref(), Some("ref"));
    }

    #[test]
    fn test_file_uses_fixed_key_names() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileTokenStore::open(dir.path()).expect("open store");
        store
            .set_tokens(&TokenPair::new("acc", "ref"))
            .expect("set tokens");

        let raw = std::fs::read_to_string(store.path()).expect("read token file");
        let json: serde_json::Value = serde_json::from_str(&raw).expect("parse token file");
        assert_eq!(json["accessToken"], "acc");
        assert_eq!(json["refreshToken"], "ref");
        assert!(json.get("savedAt").is_some());
    }

    #[test]
    fn test_swap_replaces_both_tokens() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileTokenStore::open(dir.path()).expect("open store");
        store.set_tokens(&TokenPair::new("a1", "r1")).expect("first");
        store.set_tokens(&TokenPair::new("a2", "r2")).expect("second");

        assert_eq!(store.access_token().as_deref(), Some("a2"));
        assert_eq!(store.refresh_token().as_deref(), Some("r2"));
        assert!(!dir.path().join("tokens.json.tmp").exists());
    }

    #[test]
    fn test_clear_removes_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileTokenStore::open(dir.path()).expect("open store");
        store.set_tokens(&TokenPair::new("a", "r")).expect("set tokens");
        store.clear_tokens().expect("clear tokens");

        assert!(!store.path().exists());
        assert_eq!(store.access_token(), None);
        assert_eq!(store.refresh_token(), None);

        // Clearing an already empty store is fine.
        store.clear_tokens().expect("clear again");
    }

    #[test]
    fn test_incomplete_pair_is_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileTokenStore::open(dir.path()).expect("open store");
        assert!(store.set_tokens(&TokenPair::new("a", "")).is_err());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_corrupt_file_reads_as_logged_out() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(dir.path().join(TOKENS_FILE), "{not json").expect("write junk");

        let store = FileTokenStore::open(dir.path()).expect("open store");
        assert_eq!(store.access_token(), None);

        std::fs::write(
            dir.path().join(TOKENS_FILE),
            r#"{"accessToken":"a","refreshToken":"","savedAt":"2026-01-01T00:00:00Z"}"#,
        )
        .expect("write half pair");
        let store = FileTokenStore::open(dir.path()).expect("open store");
        assert!(store.session().is_none());
    }

    #[test]
    fn test_age_display() {
        let mut data = SessionData::new(TokenPair::new("a", "r"));
        assert_eq!(data.age_display(), "just now");

        data.saved_at = Utc::now() - Duration::minutes(61);
        assert_eq!(data.age_display(), "1h ago");

        data.saved_at = Utc::now() - Duration::days(3);
        assert_eq!(data.age_display(), "3d ago");
    }
}
