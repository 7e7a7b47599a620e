//! Authentication state for the API client.
//!
//! This module provides:
//! - `TokenStore`: the access/refresh pair, with memory, file and keychain backends
//! - `RefreshCoordinator`: single-flight control over token refreshes
//! - `AuthNavigator`: where the user is sent when a session cannot be recovered

pub mod credentials;
pub mod navigator;
pub mod refresh;
pub mod session;
pub mod store;

pub use credentials::KeyringTokenStore;
pub use navigator::{AuthNavigator, LogNavigator};
pub use refresh::{RefreshCoordinator, RefreshError, RefreshOutcome};
pub use session::{FileTokenStore, SessionData};
pub use store::{MemoryTokenStore, TokenStore};
