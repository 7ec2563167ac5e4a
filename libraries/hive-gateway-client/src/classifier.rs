//! Maps failed calls onto [`ApiError`] and reports them to the notification sink.

use crate::error::ApiError;
use crate::notify::NotificationSink;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

const TRANSPORT_MESSAGE: &str = "Unable to connect to the server";
const TIMEOUT_MESSAGE: &str = "The request timed out";
const VALIDATION_FALLBACK: &str = "Invalid data provided";
const UNKNOWN_FALLBACK: &str = "An unexpected error occurred";

/// Classify a completed response with a non-2xx status.
///
/// A 401 reaching this point was not recovered by a token refresh.
pub fn classify_status(status: u16, body: &[u8]) -> ApiError {
    match status {
        401 => ApiError::unauthorized(false),
        403 => ApiError::Forbidden("You do not have permission to perform this action".into()),
        404 => ApiError::NotFound("The requested resource was not found".into()),
        422 => classify_validation(body),
        500 => ApiError::ServerFault("Internal server error occurred".into()),
        502..=504 => ApiError::Unavailable {
            status,
            message: "Service is temporarily unavailable".into(),
        },
        _ => ApiError::Unknown {
            status: Some(status),
            message: body_message(body).unwrap_or_else(|| UNKNOWN_FALLBACK.to_string()),
        },
    }
}

/// Classify an error raised by the HTTP transport.
pub fn classify_transport(err: &reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Transport(TIMEOUT_MESSAGE.into())
    } else if err.is_builder() || err.is_decode() {
        ApiError::unknown(err.to_string())
    } else if err.is_connect() || err.is_request() || err.is_body() {
        ApiError::Transport(TRANSPORT_MESSAGE.into())
    } else if let Some(status) = err.status() {
        classify_status(status.as_u16(), &[])
    } else {
        ApiError::Transport(TRANSPORT_MESSAGE.into())
    }
}

fn classify_validation(body: &[u8]) -> ApiError {
    let parsed: Option<Value> = serde_json::from_slice(body).ok();

    let fields = parsed
        .as_ref()
        .and_then(|v| v.get("errors"))
        .and_then(Value::as_object)
        .map(|errors| {
            errors
                .iter()
                .filter_map(|(field, messages)| {
                    let messages = field_messages(messages);
                    (!messages.is_empty()).then(|| (field.clone(), messages))
                })
                .collect::<Vec<_>>()
        });

    let message = match &fields {
        Some(fields) if !fields.is_empty() => fields
            .iter()
            .flat_map(|(_, messages)| messages.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(", "),
        _ => parsed
            .as_ref()
            .and_then(top_level_message)
            .unwrap_or_else(|| VALIDATION_FALLBACK.to_string()),
    };

    ApiError::Validation {
        message,
        fields: fields.unwrap_or_default(),
    }
}

/// A field's messages may be a single string or an array of strings.
fn field_messages(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
            .collect(),
        Value::Null => Vec::new(),
        other => vec![other.to_string()],
    }
}

fn top_level_message(body: &Value) -> Option<String> {
    body.get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

fn body_message(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<Value>(body)
        .ok()
        .as_ref()
        .and_then(top_level_message)
}

/// Forwards surfaced errors to the notification sink.
#[derive(Clone)]
pub struct ResponseClassifier {
    sink: Arc<dyn NotificationSink>,
}

impl ResponseClassifier {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    /// Notify the sink about `err` and hand it back for the caller.
    ///
    /// Cancelled requests are returned without a notification.
    pub fn surface(&self, err: ApiError) -> ApiError {
        if err.is_cancelled() {
            return err;
        }
        warn!(
            kind = %err.kind(),
            status = ?err.status(),
            "Response Error: {}",
            err
        );
        self.sink.notify(err.kind(), err.title(), err.message());
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OutcomeKind;
    use crate::notify::RecordingSink;

    #[test]
    fn test_status_table() {
        assert_eq!(classify_status(401, b"").kind(), OutcomeKind::Unauthorized);
        assert_eq!(classify_status(403, b"").kind(), OutcomeKind::Forbidden);
        assert_eq!(classify_status(404, b"").kind(), OutcomeKind::NotFound);
        assert_eq!(classify_status(422, b"").kind(), OutcomeKind::Validation);
        assert_eq!(classify_status(500, b"").kind(), OutcomeKind::ServerFault);
        for status in [502, 503, 504] {
            assert_eq!(classify_status(status, b"").kind(), OutcomeKind::Unavailable);
        }
        assert_eq!(classify_status(418, b"").kind(), OutcomeKind::Unknown);
        assert_eq!(classify_status(501, b"").kind(), OutcomeKind::Unknown);
    }

    #[test]
    fn test_validation_flattens_field_messages() {
        let body = br#"{"errors":{"email":["invalid"],"name":["required"]}}"#;
        match classify_status(422, body) {
            ApiError::Validation { message, fields } => {
                assert_eq!(message, "invalid, required");
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].0, "email");
            }
            e => panic!("Expected Validation, got: {:?}", e),
        }
    }

    #[test]
    fn test_validation_keeps_body_order_and_skips_nulls() {
        let body = br#"{"errors":{"zip":"bad zip","age":[null,"too young","negative"],"x":null}}"#;
        let err = classify_status(422, body);
        assert_eq!(err.message(), "bad zip, too young, negative");
    }

    #[test]
    fn test_validation_falls_back_to_message() {
        let err = classify_status(422, br#"{"message":"Email already taken"}"#);
        assert_eq!(err.message(), "Email already taken");

        let err = classify_status(422, br#"{"errors":{}}"#);
        assert_eq!(err.message(), "Invalid data provided");

        let err = classify_status(422, b"<html>");
        assert_eq!(err.message(), "Invalid data provided");
    }

    #[test]
    fn test_unknown_status_uses_body_message() {
        let err = classify_status(409, br#"{"message":"Role in use"}"#);
        assert_eq!(err.message(), "Role in use");
        assert_eq!(err.status(), Some(409));

        let err = classify_status(409, b"");
        assert_eq!(err.message(), "An unexpected error occurred");
    }

    #[test]
    fn test_surface_notifies_once() {
        let sink = Arc::new(RecordingSink::new());
        let classifier = ResponseClassifier::new(sink.clone());

        let err = classifier.surface(classify_status(403, b""));
        assert_eq!(err.kind(), OutcomeKind::Forbidden);

        let events = sink.notifications();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Forbidden");
        assert_eq!(
            events[0].message,
            "You do not have permission to perform this action"
        );
    }

    #[test]
    fn test_surface_skips_cancelled() {
        let sink = Arc::new(RecordingSink::new());
        let classifier = ResponseClassifier::new(sink.clone());

        let err = classifier.surface(ApiError::cancelled());
        assert!(err.is_cancelled());
        assert!(sink.notifications().is_empty());
    }
}
