//! [`DirectFetcher`] over HTTP.

use std::time::Duration;

use artimirror_torrent_core::{Credentials, DirectFetcher, FetchError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use url::Url;

use crate::error::{TransportError, TransportResult};

/// Fetches manifests and metadata files from the artifact store.
///
/// Credentials are sent preemptively as basic auth.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Client with the given connection timeout.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Client`] when the HTTP client cannot be built.
    pub fn new(connect_timeout: Duration) -> TransportResult<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|source| TransportError::Client { source })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DirectFetcher for HttpFetcher {
    async fn get_bytes(
        &self,
        url: &Url,
        credentials: Option<&Credentials>,
    ) -> Result<Vec<u8>, FetchError> {
        let transport = |source: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            source: Box::new(source),
        };
        let mut request = self.client.get(url.as_str());
        if let Some(credentials) = credentials {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }
        let response = request.send().await.map_err(transport)?;
        if response.status() != StatusCode::OK {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        let body = response.bytes().await.map_err(transport)?;
        Ok(body.to_vec())
    }
}
