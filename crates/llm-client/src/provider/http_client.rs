use reqwest::Client;
use reqwest::header::{CONNECTION, HeaderMap, HeaderValue};

use super::{POOL_IDLE_TIMEOUT, REQUEST_TIMEOUT};

/// One pooled, keep-alive `reqwest::Client` per adapter. Each adapter builds its own
/// rather than sharing a single process-wide singleton, since per-provider default
/// headers (e.g. Anthropic's beta headers) differ.
pub(super) fn build(extra_headers: HeaderMap) -> Client {
    let mut headers = extra_headers;
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        // Hyper's connection pool only exposes idle-count and idle-timeout knobs, no TTL
        // to force a refresh when DNS changes. A short pool idle timeout is the cheapest
        // way to pick up DNS changes without disabling keep-alive outright.
        .pool_idle_timeout(Some(POOL_IDLE_TIMEOUT))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(std::time::Duration::from_secs(60)))
        .default_headers(headers)
        .build()
        .expect("static client configuration is always valid")
}
