//! Request descriptors and the outgoing request interceptor.

use crate::correlation::{correlation_tag, request_timestamp};
use crate::error::{ApiError, Result};
use crate::session::SessionStore;
use crate::types::{ProgressCallback, RequestOptions};
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Trace header carrying the request's correlation tag.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Header carrying the time the request was issued.
pub const REQUEST_TIMESTAMP_HEADER: &str = "x-request-timestamp";

/// A file sent as a multipart `file` field.
///
/// The file is re-opened for every attempt so the body can be replayed.
#[derive(Clone)]
pub struct FilePart {
    pub path: PathBuf,
    pub file_name: String,
    pub mime_type: String,
    pub len: u64,
    pub on_progress: Option<ProgressCallback>,
}

impl fmt::Debug for FilePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilePart")
            .field("path", &self.path)
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.len)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Body of an outgoing request.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    File(FilePart),
}

/// Everything needed to (re)issue one logical request.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub body: RequestBody,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub timeout: Option<Duration>,
    retried: bool,
    sent_token: Option<String>,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: RequestBody::Empty,
            query: Vec::new(),
            headers: HeaderMap::new(),
            timeout: None,
            retried: false,
            sent_token: None,
        }
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Apply per-call headers, query and timeout.
    pub fn with_options(mut self, options: &RequestOptions) -> Result<Self> {
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ApiError::unknown(format!("Invalid header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ApiError::unknown(format!("Invalid value for header {name}: {e}")))?;
            self.headers.insert(name, value);
        }
        self.query.extend(options.query.iter().cloned());
        self.timeout = options.timeout.or(self.timeout);
        Ok(self)
    }

    /// Whether this request has already been replayed after a token refresh.
    pub fn is_retried(&self) -> bool {
        self.retried
    }

    /// Flag the request as replayed. Returns `false` if it already was.
    pub fn mark_retried(&mut self) -> bool {
        !std::mem::replace(&mut self.retried, true)
    }

    /// Access token attached by the last interceptor pass.
    pub fn sent_token(&self) -> Option<&str> {
        self.sent_token.as_deref()
    }
}

/// Attaches identity and tracing headers to outgoing requests.
#[derive(Clone)]
pub struct RequestInterceptor {
    session: Arc<dyn SessionStore>,
}

impl RequestInterceptor {
    pub fn new(session: Arc<dyn SessionStore>) -> Self {
        Self { session }
    }

    /// Set the `Authorization`, correlation and timestamp headers.
    ///
    /// Headers are overwritten on every pass, never appended.
    pub fn apply(&self, request: &mut RequestDescriptor) {
        let token = self.session.access_token();

        match token.as_deref().map(bearer) {
            Some(Ok(value)) => {
                request.headers.insert(AUTHORIZATION, value);
            }
            Some(Err(e)) => {
                warn!(error = %e, "Access token is not a valid header value, sending request unauthenticated");
                request.headers.remove(AUTHORIZATION);
            }
            None => {
                request.headers.remove(AUTHORIZATION);
            }
        }
        request.sent_token = token;

        let tag = correlation_tag();
        if let Ok(value) = HeaderValue::from_str(tag.as_str()) {
            request
                .headers
                .insert(HeaderName::from_static(CORRELATION_ID_HEADER), value);
        }

        if let Ok(value) = HeaderValue::from_str(&request_timestamp(Utc::now())) {
            request
                .headers
                .insert(HeaderName::from_static(REQUEST_TIMESTAMP_HEADER), value);
        }

        debug!(correlation_id = %tag, "API Request: {} {}", request.method, request.path);
    }
}

fn bearer(token: &str) -> std::result::Result<HeaderValue, reqwest::header::InvalidHeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token))?;
    value.set_sensitive(true);
    Ok(value)
}
