//! Authentication endpoints of the gateway.

use crate::classifier::classify_status;
use crate::client::{GatewayClient, Transport};
use crate::error::{ApiError, Result};
use crate::interceptor::{RequestBody, RequestDescriptor};
use crate::refresh::TokenRefresher;
use crate::types::{
    LoginCredentials, LoginResponse, RefreshTokenRequest, RefreshTokenResponse, RequestOptions,
};
use async_trait::async_trait;
use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const LOGIN_PATH: &str = "/auth/login";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";

impl GatewayClient {
    /// Login with email and password.
    ///
    /// On success, the returned tokens become the current session.
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<LoginResponse> {
        debug!(email = %credentials.email, "Attempting login");

        let response: LoginResponse = self
            .post(LOGIN_PATH, Some(credentials), RequestOptions::default())
            .await?;

        self.coordinator
            .establish_session(&response.access_token, Some(&response.refresh_token));

        info!(
            user_id = %response.user.id,
            role = %response.user.role,
            "Login successful"
        );

        Ok(response)
    }

    /// Logout from the gateway.
    ///
    /// The local session is cleared even if the gateway call fails.
    pub async fn logout(&self) {
        let result: Result<serde_json::Value> = self
            .post::<_, ()>(LOGOUT_PATH, None, RequestOptions::default())
            .await;

        if let Err(e) = result {
            warn!(error = %e, "Logout request failed, clearing session anyway");
        }

        self.coordinator.end_session();
        info!("Logged out");
    }
}

/// Refreshes tokens through the gateway's refresh endpoint.
///
/// Calls go through the interceptor but never through recovery or the
/// notification sink; the coordinator decides what the caller sees.
pub(crate) struct GatewayRefresher {
    transport: Arc<Transport>,
}

impl GatewayRefresher {
    pub(crate) fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl TokenRefresher for GatewayRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshTokenResponse> {
        let body = serde_json::to_value(RefreshTokenRequest {
            refresh_token: refresh_token.to_string(),
        })
        .map_err(|e| ApiError::unknown(format!("Failed to encode refresh request: {}", e)))?;

        let mut request =
            RequestDescriptor::new(Method::POST, REFRESH_PATH).with_body(RequestBody::Json(body));
        let response = self.transport.send(&mut request).await?;
        let status = response.status();

        if status.is_success() {
            response.json().await.map_err(|e| ApiError::Unknown {
                status: Some(status.as_u16()),
                message: format!("Failed to parse refresh response: {}", e),
            })
        } else {
            let body = response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .unwrap_or_default();
            Err(classify_status(status.as_u16(), &body))
        }
    }
}
