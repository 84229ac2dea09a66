//! Shared HTTP session
//!
//! One `reqwest::Client` is shared by every stage. Its idle pool is sized to
//! the largest stage so that workers do not stall waiting for connections.

use std::time::Duration;

use reqwest::{Client, Response};
use tracing::debug;

use crate::config::ApiConfig;

/// Idle connections kept per host on top of the largest stage size.
const POOL_HEADROOM: usize = 8;

/// Connect timeout applied below the per-request timeout.
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client,
    transport_retries: u32,
}

impl HttpClient {
    /// Build the shared client for `pool_size` concurrent workers
    pub fn new(config: &ApiConfig, pool_size: usize) -> reqwest::Result<Self> {
        let timeout = config.request_timeout();
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(MAX_CONNECT_TIMEOUT))
            .user_agent(config.user_agent.as_str())
            .pool_max_idle_per_host(pool_size + POOL_HEADROOM)
            .build()?;

        Ok(Self {
            client,
            transport_retries: config.transport_retries,
        })
    }

    /// GET `url`, retrying only failures to establish a connection.
    ///
    /// Status codes are not inspected here; callers decide what a non-2xx
    /// response means for them.
    pub async fn get(&self, url: &str) -> reqwest::Result<Response> {
        let mut attempt = 0;
        loop {
            match self.client.get(url).send().await {
                Err(e) if e.is_connect() && attempt < self.transport_retries => {
                    attempt += 1;
                    debug!(url = %url, attempt, error = %e, "Connection failed, retrying");
                },
                result => return result,
            }
        }
    }
}
