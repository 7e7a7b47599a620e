//! REST API client module for the Qalam backend.
//!
//! This module provides the `ApiClient` for talking to the backend, the
//! `ApiRequest` shape it sends, and `ApiError` with the helpers that turn
//! failures into messages for the user.
//!
//! The API uses JWT bearer tokens; an expired access token is exchanged for
//! a new pair through the refresh endpoint without the caller noticing.

pub mod client;
pub mod error;
pub mod request;

pub use client::ApiClient;
pub use error::{error_message, ApiError, ErrorBody};
pub use request::{authorize, ApiRequest};
