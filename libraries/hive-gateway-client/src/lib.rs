//! HiveSpace Gateway Client
//!
//! Authenticated HTTP client for the HiveSpace API gateway, used by the
//! admin portal for every backend call.
//!
//! # Features
//!
//! - **Identity**: attaches the session's bearer token to every request
//! - **Tracing**: tags each request with a correlation ID and issue timestamp
//! - **Token refresh**: single-flight refresh on 401, with one replay per request
//! - **Classification**: maps failures onto a closed set of outcomes and
//!   reports each one to a notification sink
//! - **Files**: multipart upload with progress reporting, streamed downloads
//!
//! # Example
//!
//! ```ignore
//! use hive_gateway_client::{GatewayClient, GatewayConfig, LoginCredentials, RequestOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = GatewayClient::new(GatewayConfig::new("https://gateway.example.com/api"))?;
//!
//!     client
//!         .login(&LoginCredentials::new("admin@example.com", "secret"))
//!         .await?;
//!
//!     let users: serde_json::Value = client
//!         .get("/users", RequestOptions::new().query("page", "1"))
//!         .await?;
//!     println!("{users:#}");
//!
//!     Ok(())
//! }
//! ```

mod auth;
mod classifier;
mod client;
mod config;
mod correlation;
mod download;
mod error;
mod interceptor;
mod notify;
mod refresh;
mod session;
mod types;
mod upload;

// Re-export main types
pub use auth::{LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH};
pub use classifier::{classify_status, classify_transport, ResponseClassifier};
pub use client::{GatewayClient, GatewayClientBuilder};
pub use config::{join_url, GatewayConfig};
pub use correlation::{correlation_tag, correlation_tag_with, request_timestamp, CorrelationTag};
pub use download::DEFAULT_DOWNLOAD_NAME;
pub use error::{ApiError, ConfigError, OutcomeKind, Result, SessionError};
pub use interceptor::{
    FilePart, RequestBody, RequestDescriptor, RequestInterceptor, CORRELATION_ID_HEADER,
    REQUEST_TIMESTAMP_HEADER,
};
pub use notify::{Notification, NotificationSink, NullSink, RecordingSink, TracingSink};
pub use refresh::{Recovery, RefreshCoordinator, RefreshState, TokenRefresher};
pub use session::{
    AuthSession, FileSessionStore, MemorySessionStore, SessionStore, ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
};
pub use types::{
    LoginCredentials, LoginResponse, ProgressCallback, RefreshTokenRequest, RefreshTokenResponse,
    RequestOptions, UploadProgress, UserProfile,
};
