//! Main gateway client.

use crate::auth::{GatewayRefresher, REFRESH_PATH};
use crate::classifier::{classify_status, classify_transport, ResponseClassifier};
use crate::config::GatewayConfig;
use crate::error::{ApiError, ConfigError, Result};
use crate::interceptor::{RequestBody, RequestDescriptor, RequestInterceptor};
use crate::notify::{NotificationSink, TracingSink};
use crate::refresh::{Recovery, RefreshCoordinator, RefreshState, TokenRefresher};
use crate::session::{AuthSession, MemorySessionStore, SessionStore};
use crate::types::RequestOptions;
use crate::upload;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Sends requests to the gateway after the interceptor has decorated them.
pub(crate) struct Transport {
    http: Client,
    pub(crate) config: GatewayConfig,
    interceptor: RequestInterceptor,
}

impl Transport {
    /// Issue one network call for `request`.
    ///
    /// Only transport-level failures are errors here; any HTTP status is
    /// returned as a response.
    pub(crate) async fn send(&self, request: &mut RequestDescriptor) -> Result<Response> {
        self.interceptor.apply(request);

        let url = self.config.build_api_url(&request.path);
        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .headers(request.headers.clone());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::File(part) => builder.multipart(upload::multipart_form(part).await?),
        };

        let response = builder.send().await.map_err(|e| {
            debug!(url = %url, error = %e, "Request failed without a response");
            classify_transport(&e)
        })?;

        debug!(
            retried = request.is_retried(),
            "API Response: {} {}",
            response.status().as_u16(),
            request.path
        );

        Ok(response)
    }
}

/// Client for the HiveSpace API gateway.
///
/// Every call goes through the same pipeline: the interceptor attaches the
/// session token and tracing headers, a 401 is offered to the refresh
/// coordinator (which may replay the call once), and any other failure is
/// classified and reported to the notification sink before it is returned.
///
/// # Example
///
/// ```ignore
/// use hive_gateway_client::{GatewayClient, GatewayConfig, RequestOptions};
///
/// let client = GatewayClient::new(GatewayConfig::new("https://gateway.example.com/api"))?;
/// let users: serde_json::Value = client
///     .get("/users", RequestOptions::new().query("page", "1"))
///     .await?;
/// ```
#[derive(Clone)]
pub struct GatewayClient {
    transport: Arc<Transport>,
    pub(crate) coordinator: Arc<RefreshCoordinator>,
    classifier: ResponseClassifier,
    session: Arc<dyn SessionStore>,
}

impl GatewayClient {
    /// Create a client with an in-memory session and tracing notifications.
    pub fn new(config: GatewayConfig) -> std::result::Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    pub fn builder(config: GatewayConfig) -> GatewayClientBuilder {
        GatewayClientBuilder::new(config)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.transport.config
    }

    /// Check if the session holds an access token.
    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    /// Snapshot of the current tokens.
    pub fn session(&self) -> AuthSession {
        self.session.snapshot()
    }

    /// Set tokens directly (e.g., from stored credentials).
    pub fn set_tokens(&self, access_token: &str, refresh_token: Option<&str>) {
        self.coordinator
            .establish_session(access_token, refresh_token);
    }

    /// Forget the current session without calling the gateway.
    pub fn clear_session(&self) {
        self.coordinator.end_session();
    }

    pub fn refresh_state(&self) -> RefreshState {
        self.coordinator.state()
    }

    /// Number of token refresh calls issued by this client.
    pub fn refresh_count(&self) -> u64 {
        self.coordinator.refresh_count()
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, options: RequestOptions) -> Result<T> {
        self.request(Method::GET, path, RequestBody::Empty, options)
            .await
    }

    pub async fn post<T, B>(&self, path: &str, body: Option<&B>, options: RequestOptions) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = json_body(body).map_err(|e| self.surface(e))?;
        self.request(Method::POST, path, body, options).await
    }

    pub async fn put<T, B>(&self, path: &str, body: Option<&B>, options: RequestOptions) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = json_body(body).map_err(|e| self.surface(e))?;
        self.request(Method::PUT, path, body, options).await
    }

    pub async fn patch<T, B>(
        &self,
        path: &str,
        body: Option<&B>,
        options: RequestOptions,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = json_body(body).map_err(|e| self.surface(e))?;
        self.request(Method::PATCH, path, body, options).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T> {
        self.request(Method::DELETE, path, RequestBody::Empty, options)
            .await
    }

    /// Send a request and decode its JSON body.
    pub(crate) async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> Result<T> {
        let request = self.describe(method, path, body, &options)?;
        self.cancellable(options.cancellation, async {
            let response = self.dispatch(request).await?;
            self.decode(response).await
        })
        .await
    }

    pub(crate) fn describe(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
        options: &RequestOptions,
    ) -> Result<RequestDescriptor> {
        RequestDescriptor::new(method, path)
            .with_body(body)
            .with_options(options)
            .map_err(|e| self.surface(e))
    }

    /// Run `work` unless `token` is cancelled first.
    pub(crate) async fn cancellable<R, F>(&self, token: Option<CancellationToken>, work: F) -> Result<R>
    where
        F: Future<Output = Result<R>>,
    {
        match token {
            Some(token) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        debug!("Request cancelled by caller");
                        Err(ApiError::cancelled())
                    }
                    result = work => result,
                }
            }
            None => work.await,
        }
    }

    /// Send `request`, replaying it once if the coordinator renews the token.
    ///
    /// Returns only 2xx responses; every failure is already surfaced.
    pub(crate) async fn dispatch(&self, mut request: RequestDescriptor) -> Result<Response> {
        loop {
            let response = self
                .transport
                .send(&mut request)
                .await
                .map_err(|e| self.surface(e))?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            if status == StatusCode::UNAUTHORIZED {
                let recovery = self.coordinator.recover(&request).await;
                let session_expired = match recovery {
                    Recovery::Replay => {
                        if request.mark_retried() {
                            debug!(path = %request.path, "Replaying request with renewed token");
                            continue;
                        }
                        false
                    }
                    Recovery::Reject { session_expired } => session_expired,
                };
                return Err(self.surface(ApiError::unauthorized(session_expired)));
            }

            let body = response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .unwrap_or_default();
            return Err(self.surface(classify_status(status.as_u16(), &body)));
        }
    }

    async fn decode<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.surface(classify_transport(&e)))?;

        // An empty body decodes like JSON null, so `()` and `Option<_>` work.
        let payload: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &bytes
        };

        serde_json::from_slice(payload).map_err(|e| {
            self.surface(ApiError::Unknown {
                status: Some(status),
                message: format!("Failed to parse response: {}", e),
            })
        })
    }

    pub(crate) fn surface(&self, err: ApiError) -> ApiError {
        self.classifier.surface(err)
    }
}

fn json_body<B: Serialize + ?Sized>(body: Option<&B>) -> Result<RequestBody> {
    match body {
        None => Ok(RequestBody::Empty),
        Some(body) => serde_json::to_value(body)
            .map(RequestBody::Json)
            .map_err(|e| ApiError::unknown(format!("Failed to encode request body: {}", e))),
    }
}

/// Builder for [`GatewayClient`].
pub struct GatewayClientBuilder {
    config: GatewayConfig,
    session: Option<Arc<dyn SessionStore>>,
    sink: Option<Arc<dyn NotificationSink>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
}

impl GatewayClientBuilder {
    fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            session: None,
            sink: None,
            refresher: None,
        }
    }

    pub fn session_store(mut self, session: Arc<dyn SessionStore>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replace the default refresher, which calls the gateway's refresh endpoint.
    pub fn token_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn build(self) -> std::result::Result<GatewayClient, ConfigError> {
        let config = self.config.validate()?;

        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| format!("HiveSpaceAdmin/{}", env!("CARGO_PKG_VERSION")));

        // Create HTTP client with reasonable defaults
        let http = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(user_agent)
            .build()?;

        let session: Arc<dyn SessionStore> = match self.session {
            Some(session) => session,
            None => Arc::new(MemorySessionStore::new()),
        };
        let sink: Arc<dyn NotificationSink> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(TracingSink),
        };

        let transport = Arc::new(Transport {
            http,
            config,
            interceptor: RequestInterceptor::new(Arc::clone(&session)),
        });
        let refresher: Arc<dyn TokenRefresher> = match self.refresher {
            Some(refresher) => refresher,
            None => Arc::new(GatewayRefresher::new(Arc::clone(&transport))),
        };
        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&session),
            refresher,
            REFRESH_PATH,
        ));

        debug!(
            base_url = %transport.config.base_url,
            version = %transport.config.version,
            "Gateway client ready"
        );

        Ok(GatewayClient {
            transport,
            coordinator,
            classifier: ResponseClassifier::new(sink),
            session,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_validation() {
        // Valid URLs
        assert!(GatewayClient::new(GatewayConfig::new("https://example.com")).is_ok());
        assert!(GatewayClient::new(GatewayConfig::new("http://localhost:8080")).is_ok());

        // Invalid URLs
        assert!(GatewayClient::new(GatewayConfig::new("")).is_err());
        assert!(GatewayClient::new(GatewayConfig::new("not-a-url")).is_err());
        assert!(GatewayClient::new(GatewayConfig::new("ftp://example.com")).is_err());
    }

    #[test]
    fn test_url_normalization() {
        let client =
            GatewayClient::new(GatewayConfig::new("https://example.com/")).expect("valid url");
        assert_eq!(client.config().base_url, "https://example.com");
    }

    #[test]
    fn test_session_helpers() {
        let client = GatewayClient::new(GatewayConfig::new("https://example.com")).unwrap();
        assert!(!client.is_authenticated());

        client.set_tokens("access", Some("refresh"));
        assert!(client.is_authenticated());
        assert_eq!(client.session().refresh_token.as_deref(), Some("refresh"));

        client.clear_session();
        assert!(!client.is_authenticated());
        assert_eq!(client.refresh_state(), RefreshState::Idle);
    }

    #[test]
    fn test_json_body_encoding() {
        assert!(matches!(json_body::<()>(None), Ok(RequestBody::Empty)));
        match json_body(Some(&serde_json::json!({ "name": "x" }))) {
            Ok(RequestBody::Json(value)) => assert_eq!(value["name"], "x"),
            other => panic!("Expected JSON body, got: {:?}", other),
        }
    }
}
