#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rowgate_storage::StorageError;
use serde::Deserialize;
use tracing::debug;

const METADATA_TOKEN_PATH: &str =
    "/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are refreshed this long before the server-reported expiry.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub enum CredentialSource {
    /// A pre-minted OAuth access token.
    StaticToken(String),
    /// The GCE/GKE/Cloud Run metadata server of the host.
    MetadataServer,
    /// No `Authorization` header (local emulators and auth proxies).
    Anonymous,
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::StaticToken(_) => f.write_str("StaticToken(<redacted>)"),
            CredentialSource::MetadataServer => f.write_str("MetadataServer"),
            CredentialSource::Anonymous => f.write_str("Anonymous"),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct MetadataTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    refresh_at: Instant,
}

pub struct TokenProvider {
    source: CredentialSource,
    agent: ureq::Agent,
    metadata_endpoint: String,
    cached: Mutex<Option<CachedToken>>,
}

impl fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenProvider")
            .field("source", &self.source)
            .field("metadata_endpoint", &self.metadata_endpoint)
            .finish()
    }
}

impl TokenProvider {
    pub fn new(source: CredentialSource, agent: ureq::Agent, metadata_endpoint: &str) -> Self {
        Self {
            source,
            agent,
            metadata_endpoint: metadata_endpoint.trim_end_matches('/').to_string(),
            cached: Mutex::new(None),
        }
    }

    /// Bearer token for the next call, or `None` for anonymous access.
    pub fn bearer(&self) -> Result<Option<String>, StorageError> {
        match &self.source {
            CredentialSource::Anonymous => Ok(None),
            CredentialSource::StaticToken(token) => Ok(Some(token.clone())),
            CredentialSource::MetadataServer => self.metadata_token().map(Some),
        }
    }

    fn metadata_token(&self) -> Result<String, StorageError> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|_| StorageError::Unauthorized("token cache lock poisoned".to_string()))?;
        if let Some(c) = cached.as_ref() {
            if Instant::now() < c.refresh_at {
                return Ok(c.token.clone());
            }
        }

        let url = format!("{}{}", self.metadata_endpoint, METADATA_TOKEN_PATH);
        let response = self
            .agent
            .get(&url)
            .set("Metadata-Flavor", "Google")
            .call()
            .map_err(|e| match e {
                ureq::Error::Status(status, _) => StorageError::Unauthorized(format!(
                    "metadata server returned status {status}"
                )),
                ureq::Error::Transport(t) => {
                    StorageError::Unauthorized(format!("metadata server unreachable: {t}"))
                }
            })?;
        let body: MetadataTokenResponse = response
            .into_json()
            .map_err(|e| StorageError::decode(format!("metadata token response: {e}")))?;

        let fresh = cache_entry(body, Instant::now());
        debug!("refreshed access token from metadata server");
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

fn cache_entry(body: MetadataTokenResponse, now: Instant) -> CachedToken {
    let lifetime = Duration::from_secs(body.expires_in).saturating_sub(REFRESH_MARGIN);
    CachedToken {
        token: body.access_token,
        refresh_at: now + lifetime,
    }
}
