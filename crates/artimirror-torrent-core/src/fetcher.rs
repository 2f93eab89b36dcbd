//! Direct (non-peer) retrieval of small files such as manifests and metadata.

use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Basic-auth credentials forwarded to the artifact store.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Account name.
    pub username: String,
    /// Account secret.
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Failure fetching a URL directly.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Server answered with a non-success status.
    #[error("direct fetch returned unexpected status")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code received.
        status: u16,
    },
    /// Request could not be completed.
    #[error("direct fetch failed")]
    Transport {
        /// Requested URL.
        url: String,
        /// Underlying client failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl FetchError {
    /// URL the failed request targeted.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Status { url, .. } | Self::Transport { url, .. } => url,
        }
    }
}

/// Plain download of a URL's full body.
#[async_trait]
pub trait DirectFetcher: Send + Sync {
    /// Fetch the full body of `url`.
    async fn get_bytes(
        &self,
        url: &Url,
        credentials: Option<&Credentials>,
    ) -> Result<Vec<u8>, FetchError>;
}
