//! Shared HTTP client construction.

use std::time::Duration;

/// HTTPS client with both a connect timeout and a total request timeout.
pub fn build_client(
    connect_timeout: Duration,
    timeout: Duration,
) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(timeout)
        .user_agent(concat!("orderpush-worker/", env!("CARGO_PKG_VERSION")))
        .build()
}
