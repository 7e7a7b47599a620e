//! Data models shared with the backend.
//!
//! - `TokenPair`: the access/refresh credential pair
//! - Auth DTOs: `RefreshRequest`, `LoginRequest`, `LoginResponse`
//! - `UserProfile`: the signed-in account

pub mod auth;

pub use auth::{LoginRequest, LoginResponse, RefreshRequest, TokenPair, UserProfile};
