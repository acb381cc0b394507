use std::time::Duration;

use vendra_core::ProviderErrorKind;
use vendra_shared::truncate_message;

/// Per-operation timeouts. A synchronous balance check gets a short bound;
/// catalog listing and submission tolerate slower upstreams.
pub const BALANCE_TIMEOUT: Duration = Duration::from_secs(8);
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(10);
pub const CATALOG_TIMEOUT: Duration = Duration::from_secs(20);
pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on the response-body excerpt kept for operator diagnosis.
pub const BODY_SNIPPET_CHARS: usize = 300;

/// Shared client for one driver. Per-request timeouts are applied at the
/// call site since operations carry different bounds.
pub fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()
        .expect("HTTP client construction failed")
}

/// Bounded, diagnostic-only excerpt of an upstream body. Never fed back into
/// parsing, never logged alongside credentials.
pub fn body_snippet(body: &str) -> String {
    truncate_message(body.trim(), BODY_SNIPPET_CHARS)
}

/// Classify a transport-level reqwest failure.
pub fn classify_transport_error(err: &reqwest::Error) -> ProviderErrorKind {
    if err.is_timeout() {
        ProviderErrorKind::Timeout
    } else {
        ProviderErrorKind::FetchFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_is_bounded() {
        let body = "e".repeat(2000);
        assert_eq!(body_snippet(&body).chars().count(), BODY_SNIPPET_CHARS);
    }

    #[test]
    fn test_snippet_trims_whitespace() {
        assert_eq!(body_snippet("  not found \n"), "not found");
    }
}
