//! Talking to the sync server.
//!
//! The server exposes two endpoints under the configured base URL:
//! `ajax/read.php` and `ajax/write.php`. Both take a form-encoded POST
//! with HTTP Basic credentials and answer with a JSON object whose
//! `status` is `"ok"` on success; `read` puts the stored blob in
//! `result`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;
use zeroize::Zeroizing;

use crate::errors::{Result, SesamError};
use crate::trust::{client_config, ChainRecorder, PinnedCertVerifier};

const READ_PATH: &str = "ajax/read.php";
const WRITE_PATH: &str = "ajax/write.php";

/// Reads and writes the remote blob.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// The stored blob, or `None` if the server holds nothing yet.
    async fn read(&self) -> Result<Option<String>>;

    /// Replace the stored blob.
    async fn write(&self, data: &str) -> Result<()>;
}

/// Where and as whom to sync.
#[derive(Clone)]
pub struct SyncEndpoint {
    pub url: String,
    pub username: String,
    pub password: Zeroizing<String>,
    pub timeout: Duration,
}

impl fmt::Debug for SyncEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEndpoint")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ServerReply {
    status: String,
    #[serde(default)]
    result: Option<String>,
}

/// HTTPS transport that trusts exactly one pinned certificate.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: Zeroizing<String>,
}

impl HttpTransport {
    /// Build a client that trusts only `pinned_der`: the server's own
    /// certificate or the CA that signed it.
    pub fn new(endpoint: &SyncEndpoint, pinned_der: &[u8]) -> Result<Self> {
        let verifier = PinnedCertVerifier::new(pinned_der)?;
        let client = reqwest::Client::builder()
            .timeout(endpoint.timeout)
            .use_preconfigured_tls(client_config(Arc::new(verifier))?)
            .build()
            .map_err(|e| SesamError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: endpoint.url.trim_end_matches('/').to_string(),
            username: endpoint.username.clone(),
            password: endpoint.password.clone(),
        })
    }

    /// Authenticate against the server without touching the blob.
    pub async fn test_connection(&self) -> Result<()> {
        self.post(READ_PATH, None).await.map(|_| ())
    }

    async fn post(&self, path: &str, data: Option<&str>) -> Result<ServerReply> {
        let url = format!("{}/{path}", self.base_url);
        debug!(%url, "sync request");

        let request = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(self.password.as_str()));
        let request = match data {
            Some(data) => request.form(&[("data", data)]),
            None => request.form(&[] as &[(&str, &str)]),
        };

        let resp = request
            .send()
            .await
            .map_err(|e| SesamError::Transport(e.to_string()))?;

        match resp.status() {
            StatusCode::UNAUTHORIZED => {
                return Err(SesamError::Authentication(
                    "username or password rejected".into(),
                ));
            }
            status if !status.is_success() => {
                return Err(SesamError::Transport(format!("server returned {status}")));
            }
            _ => {}
        }

        let reply: ServerReply = resp
            .json()
            .await
            .map_err(|e| SesamError::Transport(format!("invalid server reply: {e}")))?;
        if reply.status != "ok" {
            return Err(SesamError::Transport(format!(
                "server replied with status '{}'",
                reply.status
            )));
        }
        Ok(reply)
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn read(&self) -> Result<Option<String>> {
        let reply = self.post(READ_PATH, None).await?;
        Ok(reply.result.filter(|data| !data.trim().is_empty()))
    }

    async fn write(&self, data: &str) -> Result<()> {
        self.post(WRITE_PATH, Some(data)).await.map(|_| ())
    }
}

/// Host part of a sync URL.
pub fn host_of(url: &str) -> Result<String> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| SesamError::InvalidInput(format!("invalid server URL '{url}': {e}")))?;
    parsed
        .host_str()
        .map(str::to_string)
        .ok_or_else(|| SesamError::InvalidInput(format!("server URL '{url}' has no host")))
}

/// Fetch the certificate chain a server presents (leaf first), without
/// trusting it.
///
/// Only used to show the user a fingerprint before pinning; no
/// credentials are sent on this connection.
pub async fn probe_certificate_chain(url: &str, timeout: Duration) -> Result<Vec<Vec<u8>>> {
    let recorder = Arc::new(ChainRecorder::default());
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .use_preconfigured_tls(client_config(recorder.clone())?)
        .build()
        .map_err(|e| SesamError::Transport(e.to_string()))?;

    // The HTTP answer does not matter once the handshake has been seen.
    let sent = client
        .post(format!("{}/{READ_PATH}", url.trim_end_matches('/')))
        .send()
        .await;
    let chain = recorder.take();
    match sent {
        _ if !chain.is_empty() => Ok(chain),
        Err(e) => Err(SesamError::Transport(e.to_string())),
        Ok(_) => Err(SesamError::Transport("server presented no certificate".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_is_extracted() {
        assert_eq!(
            host_of("https://sync.example.org/sesam/").unwrap(),
            "sync.example.org"
        );
        assert!(host_of("not a url").is_err());
    }

    #[tokio::test]
    async fn transport_builds_for_a_pinned_ca() {
        let endpoint = SyncEndpoint {
            url: "https://sync.example.org/sesam/".into(),
            username: "alice".into(),
            password: Zeroizing::new("pw".into()),
            timeout: Duration::from_secs(5),
        };
        let ca = include_bytes!("../../tests/fixtures/private_ca.der");
        let transport = HttpTransport::new(&endpoint, ca).unwrap();
        assert_eq!(transport.base_url, "https://sync.example.org/sesam");
        assert!(matches!(
            HttpTransport::new(&endpoint, b"not a certificate"),
            Err(SesamError::TrustViolation(_))
        ));
    }

    #[test]
    fn reply_parses_with_and_without_result() {
        let with: ServerReply = serde_json::from_str(r#"{"status":"ok","result":"abc"}"#).unwrap();
        assert_eq!(with.result.as_deref(), Some("abc"));
        let without: ServerReply = serde_json::from_str(r#"{"status":"ok"}"#).unwrap();
        assert!(without.result.is_none());
    }
}
