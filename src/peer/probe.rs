//! Peer health probes

use std::future::Future;

use reqwest::{Client, StatusCode};
use thiserror::Error;

use super::config::PeerConfig;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// One health check against the peer. `true` means healthy.
///
/// Implementations should not enforce their own deadline; the monitor
/// wraps every probe in the configured timeout.
pub trait HealthProbe: Send + Sync + 'static {
    fn probe(&self) -> impl Future<Output = bool> + Send;
}

/// GET `/health` on the peer; only `200 OK` is healthy.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: Client,
    url: String,
}

impl HttpHealthProbe {
    pub fn new(config: &PeerConfig) -> Result<Self, PeerError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            url: config.health_url(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl HealthProbe for HttpHealthProbe {
    fn probe(&self) -> impl Future<Output = bool> + Send {
        async move {
            match self.client.get(&self.url).send().await {
                Ok(response) => response.status() == StatusCode::OK,
                Err(_) => false,
            }
        }
    }
}
