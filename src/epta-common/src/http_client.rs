//! HTTP clients.
//!
//! Manifests are small and get a whole-request deadline. Payload downloads
//! only bound connecting and each read, so a slow but live transfer of a large
//! archive is never cut off.

use reqwest::{Client, ClientBuilder};
use std::time::Duration;

/// User-Agent sent with every request
pub const USER_AGENT: &str = concat!("epta/", env!("CARGO_PKG_VERSION"));

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

fn base_builder() -> ClientBuilder {
    Client::builder()
        .user_agent(USER_AGENT)
        .tcp_nodelay(true)
        // Recycle idle connections so a moved mirror is re-resolved
        .pool_idle_timeout(Duration::from_secs(60))
}

/// Client for manifest requests that must complete within `timeout`.
pub fn manifest_client(timeout: Duration) -> reqwest::Result<Client> {
    base_builder().timeout(timeout).build()
}

/// Client for streaming payloads to disk.
pub fn download_client(connect_timeout: Duration, read_timeout: Duration) -> reqwest::Result<Client> {
    base_builder()
        .connect_timeout(connect_timeout)
        .read_timeout(read_timeout)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_carries_version() {
        assert_eq!(
            USER_AGENT.strip_prefix("epta/"),
            Some(env!("CARGO_PKG_VERSION"))
        );
    }

    #[test]
    fn test_clients_build() {
        assert!(manifest_client(DEFAULT_TIMEOUT).is_ok());
        assert!(download_client(DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).is_ok());
    }
}
