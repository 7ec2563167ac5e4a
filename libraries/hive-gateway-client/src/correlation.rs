//! Correlation tags for tracing requests across gateway services.

use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use std::fmt;

const SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 9;

/// Opaque per-request trace identifier: `<unix millis>-<random base36>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationTag(String);

impl CorrelationTag {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generate a tag from the system clock and the thread-local RNG.
pub fn correlation_tag() -> CorrelationTag {
    correlation_tag_with(Utc::now(), &mut rand::thread_rng())
}

/// Generate a tag from an explicit time and random source.
pub fn correlation_tag_with<R: Rng + ?Sized>(now: DateTime<Utc>, rng: &mut R) -> CorrelationTag {
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| char::from(SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())]))
        .collect();
    CorrelationTag(format!("{}-{}", now.timestamp_millis(), suffix))
}

/// Format the request-issued-at timestamp (RFC 3339, UTC, milliseconds).
pub fn request_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}
