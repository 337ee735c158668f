use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::cache::ResponseCache;
use crate::error::ApiError;
use crate::session::types::{LoginRequest, LoginResponse, UserIdentity};

/// Login endpoint; must never carry a bearer token
pub const LOGIN_ENDPOINT: &str = "/api/auth/login";

/// Current-profile endpoint, used for bootstrap validation and refresh alike
pub const PROFILE_ENDPOINT: &str = "/api/auth/profile";

/// Best-effort server-side invalidation endpoint
pub const LOGOUT_ENDPOINT: &str = "/api/auth/logout";

/// Machine fingerprint for the User-Agent, hashed hostname
static MACHINE_FINGERPRINT: Lazy<String> = Lazy::new(|| {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    let mut hasher = DefaultHasher::new();
    hostname.hash(&mut hasher);
    format!("{:x}", hasher.finish())
});

/// Shared slot holding the current bearer token.
///
/// Written only by the `SessionController`; the gateway reads it at call
/// time and injects the header per request. There is no client-global
/// default header anywhere.
#[derive(Clone, Default)]
pub struct TokenCell {
    inner: Arc<RwLock<Option<String>>>,
}

impl TokenCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current token, if any
    pub fn current(&self) -> Option<String> {
        self.inner.read().expect("token cell lock poisoned").clone()
    }

    /// Install a new token. Controller-only.
    pub fn set(&self, token: String) {
        *self.inner.write().expect("token cell lock poisoned") = Some(token);
    }

    /// Drop the token. Controller-only, synchronous so logout can clear it
    /// before any asynchronous cleanup runs.
    pub fn clear(&self) {
        *self.inner.write().expect("token cell lock poisoned") = None;
    }
}

/// Signal sent to the Session Controller when a non-login call comes back 401
#[derive(Debug, Clone)]
pub struct ForcedInvalidation {
    pub message: String,
}

pub type InvalidationSender = mpsc::UnboundedSender<ForcedInvalidation>;
pub type InvalidationReceiver = mpsc::UnboundedReceiver<ForcedInvalidation>;

/// The single HTTP client every back-office call goes through.
///
/// Attaches credentials, classifies failures into the closed [`ApiError`]
/// taxonomy, and reports authentication-invalidating 401s upward. It never
/// writes the token cell or the credential store itself.
pub struct RequestGateway {
    client: Client,
    base_url: String,
    token: TokenCell,
    invalidation_tx: InvalidationSender,
    response_cache: ResponseCache,
}

impl RequestGateway {
    pub fn new(
        base_url: &str,
        token: TokenCell,
        invalidation_tx: InvalidationSender,
        response_cache: ResponseCache,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .user_agent(format!(
                "BackofficeSession/{}-{}",
                env!("CARGO_PKG_VERSION"),
                *MACHINE_FINGERPRINT
            ))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            invalidation_tx,
            response_cache,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attach the current bearer token, read from the cell at call time
    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.token.current() {
            Some(token) => builder.header("Authorization", format!("Bearer {}", token)),
            None => builder,
        }
    }

    /// Exchange credentials for a token.
    ///
    /// Never sends a stale bearer token: a 401 here must mean "wrong
    /// credentials", not "expired session". Failures never touch the
    /// forced-logout machinery.
    pub async fn login(
        &self,
        identifier: &str,
        secret: &str,
    ) -> std::result::Result<LoginResponse, ApiError> {
        let request_id = new_request_id();
        tracing::debug!(request_id = %request_id, identifier, "Sending login request");

        let response = self
            .client
            .post(self.url(LOGIN_ENDPOINT))
            .json(&LoginRequest { identifier, secret })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return response.json::<LoginResponse>().await.map_err(|e| {
                tracing::error!(request_id = %request_id, error = %e, "Malformed login response");
                malformed_body(status)
            });
        }

        let message = read_error_message(response).await;
        tracing::warn!(
            request_id = %request_id,
            status = status.as_u16(),
            message = %message,
            "Login rejected"
        );

        if status.is_client_error() {
            Err(ApiError::Credentials(message))
        } else {
            Err(ApiError::Server {
                status: status.as_u16(),
                message,
            })
        }
    }

    /// Fetch the current profile with the stored token.
    /// Used identically for bootstrap validation and periodic refresh.
    pub async fn fetch_profile(&self) -> std::result::Result<UserIdentity, ApiError> {
        let response = self
            .send_authenticated(reqwest::Method::GET, PROFILE_ENDPOINT)
            .await?;
        let status = response.status();
        response
            .json::<UserIdentity>()
            .await
            .map_err(|_| malformed_body(status))
    }

    /// Best-effort server-side token invalidation.
    ///
    /// Takes the token explicitly because the controller clears the cell
    /// before this call runs. Errors are logged and swallowed; local
    /// cleanup never depends on this call.
    pub async fn invalidate_session(&self, token: String) {
        let result = self
            .client
            .post(self.url(LOGOUT_ENDPOINT))
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!("Server-side session invalidation acknowledged");
            }
            Ok(response) => {
                tracing::warn!(
                    status = response.status().as_u16(),
                    "Server-side session invalidation rejected"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "Server-side session invalidation unreachable");
            }
        }
    }

    /// Generic authenticated GET returning the response body as JSON.
    /// The resource modules consume the API exclusively through this surface.
    pub async fn get_json(&self, path: &str) -> std::result::Result<serde_json::Value, ApiError> {
        let response = self.send_authenticated(reqwest::Method::GET, path).await?;
        let status = response.status();
        response
            .json::<serde_json::Value>()
            .await
            .map_err(|_| malformed_body(status))
    }

    /// Cached variant of [`get_json`]. Entries live until their TTL lapses
    /// or the controller clears the cache on logout.
    pub async fn get_json_cached(
        &self,
        path: &str,
    ) -> std::result::Result<serde_json::Value, ApiError> {
        if let Some(value) = self.response_cache.get(path) {
            tracing::debug!(path, "Response cache hit");
            return Ok(value);
        }

        let value = self.get_json(path).await?;
        self.response_cache.insert(path, value.clone());
        Ok(value)
    }

    async fn send_authenticated(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> std::result::Result<Response, ApiError> {
        let request_id = new_request_id();
        tracing::debug!(request_id = %request_id, method = %method, path, "Sending authenticated request");

        let builder = self.client.request(method, self.url(path));

        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(request_id = %request_id, status = status.as_u16(), "Request successful");
            return Ok(response);
        }

        let message = read_error_message(response).await;
        tracing::warn!(
            request_id = %request_id,
            status = status.as_u16(),
            message = %message,
            "Authenticated request failed"
        );

        if status == StatusCode::UNAUTHORIZED {
            // The server no longer trusts our token. Report upward; the
            // controller decides (and its logout is idempotent).
            let _ = self.invalidation_tx.send(ForcedInvalidation {
                message: message.clone(),
            });
            return Err(ApiError::SessionInvalid(message));
        }

        Err(ApiError::Server {
            status: status.as_u16(),
            message,
        })
    }
}

fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}

/// Normalize a transport-level failure into the `Unreachable` kind
fn transport_error(e: reqwest::Error) -> ApiError {
    let error_kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection_failed"
    } else if e.is_request() {
        "request_error"
    } else {
        "unknown"
    };

    tracing::warn!(error_kind, error = %e, "HTTP transport error");
    ApiError::Unreachable(e.to_string())
}

fn malformed_body(status: StatusCode) -> ApiError {
    ApiError::Server {
        status: status.as_u16(),
        message: "malformed response body".to_string(),
    }
}

/// Pull a human-readable message out of an error response.
/// The API sends `{"message": "..."}`; fall back to the raw body or the
/// canonical status text.
async fn read_error_message(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(&body) {
        if let Some(message) = json.get("message").and_then(|v| v.as_str()) {
            return message.to_string();
        }
    }

    if !body.trim().is_empty() {
        return body;
    }

    status
        .canonical_reason()
        .unwrap_or("unknown error")
        .to_string()
}
