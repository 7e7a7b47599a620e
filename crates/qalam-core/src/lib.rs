//! Core library for the Qalam content platform client.
//!
//! The interesting part is [`ApiClient`]: a shared HTTP client that attaches
//! the stored access token to every call and, when the backend answers 401,
//! refreshes the token pair exactly once for all requests failing in the same
//! window before replaying them.

pub mod api;
pub mod auth;
pub mod config;
pub mod locale;
pub mod models;

pub use api::{error_message, ApiClient, ApiError, ApiRequest};
pub use auth::{
    AuthNavigator, FileTokenStore, KeyringTokenStore, MemoryTokenStore, TokenStore,
};
pub use config::{ClientConfig, Config, TokenBackend};
pub use locale::Locale;
pub use models::{TokenPair, UserProfile};
