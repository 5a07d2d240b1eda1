use std::time::Duration;

use reqwest::Client;

/// Shared HTTP client defaults for every REST/SSE adapter.
///
/// A short pool idle timeout forces connection refresh so upstream DNS
/// changes are picked up between requests.
pub(crate) fn default_http_client_builder(mut headers: http::HeaderMap) -> reqwest::ClientBuilder {
    headers.insert(http::header::CONNECTION, http::HeaderValue::from_static("keep-alive"));

    Client::builder()
        .timeout(Duration::from_secs(60))
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .default_headers(headers)
}
