//! API client for the Qalam REST backend.
//!
//! Every call goes out with the stored access token attached. A 401 is
//! answered by refreshing the token pair once (shared across all requests
//! that fail in the same window) and replaying the request with the new
//! access token. If the session cannot be refreshed the stored tokens are
//! purged and the navigator is pointed at the sign-in entry.

use std::sync::Arc;

use reqwest::{header, Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use crate::auth::{
    AuthNavigator, LogNavigator, RefreshCoordinator, RefreshError, RefreshOutcome, TokenStore,
};
use crate::config::ClientConfig;
use crate::models::{LoginRequest, LoginResponse, RefreshRequest, TokenPair, UserProfile};

use super::error::ErrorBody;
use super::request::{authorize, ApiRequest};
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "/auth/login";
const LOGOUT_PATH: &str = "/auth/logout";
const PROFILE_PATH: &str = "/users/me";

/// API client for the Qalam backend.
/// Clone is cheap, and clones share the token store and the refresh flight.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    config: Arc<ClientConfig>,
    store: Arc<dyn TokenStore>,
    navigator: Arc<dyn AuthNavigator>,
    refresh: Arc<RefreshCoordinator>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(config: ClientConfig, store: Arc<dyn TokenStore>) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        let refresh = Arc::new(RefreshCoordinator::new(config.refresh_wait));

        Ok(Self {
            client,
            config: Arc::new(config),
            store,
            navigator: Arc::new(LogNavigator),
            refresh,
        })
    }

    /// Replace the navigator used when a session cannot be recovered.
    pub fn with_navigator(mut self, navigator: Arc<dyn AuthNavigator>) -> Self {
        self.navigator = navigator;
        self
    }

    /// The token store, for login/logout flows that live outside the client.
    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh.is_refreshing()
    }

    // ===== Request Pipeline =====

    /// Send a request, recovering once from an expired access token.
    pub async fn execute(&self, request: ApiRequest) -> Result<Response, ApiError> {
        let sent_with = self.store.access_token();
        let sent_epoch = self.refresh.purge_epoch();
        let result = self.dispatch(&request, sent_with.as_deref()).await;
        match result {
            Err(err) if err.is_unauthorized() && !request.is_retried() => {
                self.recover(request, sent_with, sent_epoch, err).await
            }
            other => other,
        }
    }

    async fn dispatch(&self, request: &ApiRequest, token: Option<&str>) -> Result<Response, ApiError> {
        let mut headers = request.headers.clone();
        authorize(&mut headers, token)?;

        let url = self.config.url(&request.path);
        debug!(method = %request.method, url = %url, retried = request.is_retried(), "Sending request");

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(headers);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        Self::check_response(response).await
    }

    /// Handle a first 401 for `request`.
    ///
    /// Joins or starts the refresh flight, then replays the request once with
    /// whatever access token the flight produced.
    async fn recover(
        &self,
        mut request: ApiRequest,
        sent_with: Option<String>,
        sent_epoch: u64,
        original: ApiError,
    ) -> Result<Response, ApiError> {
        request.mark_retried();

        let token = match self.store.access_token() {
            // Another flight already rotated the token after this request
            // went out; no need to refresh again.
            Some(current)
                if sent_with.as_deref() != Some(current.as_str()) && !self.refresh.is_refreshing() =>
            {
                debug!(path = %request.path, "Token rotated since send, replaying with current token");
                current
            }
            _ => match self.refresh.run_exclusive(|| self.refresh_session(sent_epoch)).await {
                Ok(token) => token,
                Err(RefreshError::MissingRefreshToken) => return Err(original),
                Err(e) => return Err(ApiError::RefreshFailed(e)),
            },
        };

        self.dispatch(&request, Some(&token)).await
    }

    /// Leader side of a refresh flight: exchange the refresh token for a new
    /// pair and store it, or end the session.
    ///
    /// `sent_epoch` is the purge count the failing request was sent under.
    /// When the session has been purged since then, the purge and redirect
    /// already happened for this burst of 401s and are not repeated.
    async fn refresh_session(&self, sent_epoch: u64) -> RefreshOutcome {
        let Some(refresh_token) = self.store.refresh_token() else {
            if self.refresh.purge_epoch() == sent_epoch {
                warn!("Received 401 with no refresh token stored");
                self.end_session();
            } else {
                debug!("Session already ended since this request was sent");
            }
            return Err(RefreshError::MissingRefreshToken);
        };

        let result = match self.request_token_pair(&refresh_token).await {
            Ok(pair) => self
                .store
                .set_tokens(&pair)
                .map(|()| pair.access_token)
                .map_err(|e| RefreshError::Store(format!("{:#}", e))),
            Err(e) => Err(e),
        };

        match result {
            Ok(token) => {
                info!("Access token refreshed");
                Ok(token)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                self.end_session();
                Err(e)
            }
        }
    }

    /// The refresh call. Sent straight through reqwest so it never passes
    /// the bearer attachment or the 401 recovery above.
    async fn request_token_pair(&self, refresh_token: &str) -> Result<TokenPair, RefreshError> {
        let url = self.config.url(&self.config.refresh_path);
        let response = self
            .client
            .post(&url)
            .timeout(self.config.refresh_timeout)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        if !status.is_success() {
            let body = ErrorBody::new(&body);
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                body: body.text,
                message: body.message,
            });
        }

        let pair: TokenPair =
            serde_json::from_str(&body).map_err(|e| RefreshError::Malformed(e.to_string()))?;
        if !pair.is_complete() {
            return Err(RefreshError::Malformed(
                "response is missing a token".to_string(),
            ));
        }
        Ok(pair)
    }

    fn end_session(&self) {
        if let Err(e) = self.store.clear_tokens() {
            warn!(error = %e, "Failed to clear stored tokens");
        }
        self.refresh.record_purge();
        self.navigator.navigate(&self.config.auth_entry_path);
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    // ===== HTTP Verbs =====

    /// Send `request` and decode its JSON body. An empty body decodes as
    /// `null`, so `()` and `Option<T>` work for bodiless replies.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let path = request.path.clone();
        let response = self.execute(request).await?;
        let text = response.text().await?;
        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON from {}: {}", path, e)))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(ApiRequest::get(path)).await
    }

    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let request = query
            .iter()
            .fold(ApiRequest::get(path), |req, (k, v)| req.query(*k, *v));
        self.send_json(request).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_json(ApiRequest::post(path).json(body)?).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_json(ApiRequest::put(path).json(body)?).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_json(ApiRequest::patch(path).json(body)?).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.execute(ApiRequest::delete(path)).await.map(|_| ())
    }

    // ===== Session Methods =====

    /// Sign in with email and password and store the issued pair.
    ///
    /// Goes around the 401 recovery: wrong credentials are a plain
    /// `Unauthorized`, not an expired session.
    pub async fn login(&self, email: &str, password: &str) -> Result<Option<UserProfile>, ApiError> {
        let url = self.config.url(LOGIN_PATH);
        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(&LoginRequest { email, password })
            .send()
            .await?;
        let response = Self::check_response(response).await?;

        let text = response.text().await?;
        let login: LoginResponse = serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse login response: {}", e)))?;
        if !login.tokens.is_complete() {
            return Err(ApiError::InvalidResponse(
                "Login response is missing a token".to_string(),
            ));
        }

        self.store
            .set_tokens(&login.tokens)
            .map_err(|e| ApiError::Storage(format!("{:#}", e)))?;
        info!("Signed in");
        Ok(login.user)
    }

    /// Sign out. The server is told first on a best-effort basis; the local
    /// tokens are cleared whatever it answers.
    pub async fn logout(&self) -> Result<(), ApiError> {
        if let Some(refresh_token) = self.store.refresh_token() {
            let mut headers = header::HeaderMap::new();
            authorize(&mut headers, self.store.access_token().as_deref())?;
            let result = self
                .client
                .post(self.config.url(LOGOUT_PATH))
                .headers(headers)
                .json(&RefreshRequest {
                    refresh_token: &refresh_token,
                })
                .send()
                .await;
            match result {
                Ok(r) if r.status().is_success() => debug!("Server session revoked"),
                Ok(r) => warn!(status = %r.status(), "Logout request rejected"),
                Err(e) => warn!(error = %e, "Logout request failed"),
            }
        }

        self.store
            .clear_tokens()
            .map_err(|e| ApiError::Storage(format!("{:#}", e)))
    }

    /// Fetch the signed-in user's profile.
    pub async fn profile(&self) -> Result<UserProfile, ApiError> {
        self.get(PROFILE_PATH).await
    }
}
