//! Client for a remote Widevine CDM.
//!
//! The service performs the license exchange a local CDM would do. One [RemoteCdm] holds at
//! most one session at a time:
//!
//! ```text
//! Closed ─open─► Opening ─► Open ─get_challenge─► ChallengeRequested ─► ChallengeReady
//!                                                                            │
//!   Closed ◄─close── KeysReady ◄─get_keys── LicenseSubmitted ◄─submit_license┘
//! ```
//!
//! [RemoteCdm::close] is valid from every state. [negotiate_keys] runs the whole sequence and
//! closes the session on every exit path.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{Client, Method, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    config::RemoteCdmConfig,
    error::{DrmdlError, DrmdlResult},
    license,
    model::{DecryptionKey, Pssh, StreamInfo},
    util::http::{format_upstream, HttpClient},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening,
    Open,
    ChallengeRequested,
    ChallengeReady,
    LicenseSubmitted,
    KeysReady,
}

const CONTENT_KEY_TYPE: &str = "CONTENT";

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct OpenData {
    session_id: String,
}

#[derive(Serialize)]
struct ChallengeRequest<'a> {
    session_id: &'a str,
    init_data: &'a str,
}

#[derive(Deserialize)]
struct ChallengeData {
    challenge_b64: String,
}

#[derive(Serialize)]
struct LicenseRequest<'a> {
    session_id: &'a str,
    license_message: String,
}

#[derive(Serialize)]
struct KeysRequest<'a> {
    session_id: &'a str,
}

#[derive(Deserialize)]
struct KeysData {
    #[serde(default)]
    keys: Vec<ServiceKey>,
}

#[derive(Deserialize)]
struct ServiceKey {
    #[serde(rename = "type")]
    r#type: String,
    key_id: String,
    key: String,
}

/// Failure of one request to the key service.
#[derive(Debug)]
enum CallError {
    /// The service could not be reached or the response was cut off.
    Transport(reqwest::Error),
    /// Non-success status, with the bounded upstream diagnostic.
    Rejected(String),
    Malformed(String),
}

impl CallError {
    /// Only an answer from the service counts as a refusal; anything else is a service fault.
    fn into_key_error(self, context: &str) -> DrmdlError {
        match self {
            Self::Rejected(diagnostic) => {
                DrmdlError::KeyRetrieval(format!("{context}: {diagnostic}"))
            }
            Self::Transport(e) => DrmdlError::KeyService(e.to_string()),
            Self::Malformed(message) => DrmdlError::KeyService(message),
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{e}"),
            Self::Rejected(message) | Self::Malformed(message) => f.write_str(message),
        }
    }
}

pub struct RemoteCdm {
    client: Client,
    config: RemoteCdmConfig,
    diagnostic_limit: usize,

    session_id: Option<String>,
    state: SessionState,
}

impl RemoteCdm {
    pub fn new(config: RemoteCdmConfig) -> DrmdlResult<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self::with_client(client, config))
    }

    /// `client` should carry a timeout; a stuck service must not hang the unit.
    pub fn with_client(client: Client, config: RemoteCdmConfig) -> Self {
        Self {
            client,
            config,
            diagnostic_limit: 300,
            session_id: None,
            state: SessionState::Closed,
        }
    }

    pub fn with_diagnostic_limit(mut self, limit: usize) -> Self {
        self.diagnostic_limit = limit;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.host.trim_end_matches('/'),
            self.config.device,
            path
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header(self.config.secret_header.as_str(), &self.config.secret)
    }

    fn expect_state(&self, expected: SessionState, name: &'static str) -> DrmdlResult<&str> {
        match self.session_id.as_deref() {
            Some(session_id) if self.state == expected => Ok(session_id),
            _ => Err(DrmdlError::IllegalState {
                expected: name,
                found: self.state,
            }),
        }
    }

    /// Send a request and decode the `data` member of the response envelope.
    async fn call<T>(&self, request: RequestBuilder) -> Result<T, CallError>
    where
        T: DeserializeOwned,
    {
        let response = request.send().await.map_err(CallError::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(CallError::Transport)?;
        if !status.is_success() {
            let diagnostic = format_upstream(status, &body, self.diagnostic_limit);
            tracing::warn!("Remote CDM request failed: {diagnostic}");
            return Err(CallError::Rejected(diagnostic));
        }

        let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|e| {
            CallError::Malformed(format!(
                "malformed response ({e}): {}",
                format_upstream(status, &body, self.diagnostic_limit)
            ))
        })?;
        Ok(envelope.data)
    }

    pub async fn open(&mut self) -> DrmdlResult<()> {
        if self.state != SessionState::Closed {
            return Err(DrmdlError::IllegalState {
                expected: "Closed",
                found: self.state,
            });
        }

        self.state = SessionState::Opening;
        let request = self.request(Method::GET, "open");
        match self.call::<OpenData>(request).await {
            Ok(data) => {
                tracing::debug!("Opened CDM session {}", data.session_id);
                self.session_id = Some(data.session_id);
                self.state = SessionState::Open;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Closed;
                Err(DrmdlError::SessionOpen(e.to_string()))
            }
        }
    }

    pub async fn get_challenge(&mut self, pssh: &Pssh) -> DrmdlResult<Vec<u8>> {
        let session_id = self.expect_state(SessionState::Open, "Open")?;
        let request = self
            .request(Method::POST, "get_license_challenge/STREAMING")
            .json(&ChallengeRequest {
                session_id,
                init_data: pssh.as_base64(),
            });

        self.state = SessionState::ChallengeRequested;
        let result = self
            .call::<ChallengeData>(request)
            .await
            .map_err(|e| DrmdlError::Challenge(e.to_string()))
            .and_then(|data| {
                STANDARD
                    .decode(data.challenge_b64.trim())
                    .map_err(|e| DrmdlError::Challenge(format!("malformed challenge: {e}")))
            })
            .and_then(|challenge| {
                if challenge.is_empty() {
                    Err(DrmdlError::Challenge("empty challenge".to_string()))
                } else {
                    Ok(challenge)
                }
            });

        match result {
            Ok(challenge) => {
                self.state = SessionState::ChallengeReady;
                Ok(challenge)
            }
            Err(e) => {
                self.state = SessionState::Open;
                Err(e)
            }
        }
    }

    /// Hand the license server response to the key service.
    ///
    /// A rejected license surfaces as [DrmdlError::KeyRetrieval]; an unreachable service as
    /// [DrmdlError::KeyService].
    pub async fn submit_license(&mut self, license: &[u8]) -> DrmdlResult<()> {
        let session_id = self.expect_state(SessionState::ChallengeReady, "ChallengeReady")?;
        let request = self
            .request(Method::POST, "parse_license")
            .json(&LicenseRequest {
                session_id,
                license_message: STANDARD.encode(license),
            });

        self.call::<serde_json::Value>(request)
            .await
            .map_err(|e| e.into_key_error("license rejected"))?;
        self.state = SessionState::LicenseSubmitted;
        Ok(())
    }

    /// Content keys of the parsed license. Signing keys are dropped.
    pub async fn get_keys(&mut self) -> DrmdlResult<Vec<DecryptionKey>> {
        let session_id = self.expect_state(SessionState::LicenseSubmitted, "LicenseSubmitted")?;
        let request = self
            .request(Method::POST, "get_keys/ALL")
            .json(&KeysRequest { session_id });

        let data = self
            .call::<KeysData>(request)
            .await
            .map_err(|e| e.into_key_error("keys refused"))?;

        let total = data.keys.len();
        let keys: Vec<_> = data
            .keys
            .into_iter()
            .filter(|key| key.r#type == CONTENT_KEY_TYPE)
            .map(|key| DecryptionKey {
                key_id: key.key_id,
                key: key.key,
            })
            .collect();

        if keys.is_empty() {
            return Err(DrmdlError::KeyRetrieval(format!(
                "no content keys in license ({total} key(s) of other types); \
                 the license may have been refused or the account is not entitled"
            )));
        }

        self.state = SessionState::KeysReady;
        Ok(keys)
    }

    /// Release the remote session. Safe to call in any state, any number of times.
    pub async fn close(&mut self) {
        self.state = SessionState::Closed;
        let Some(session_id) = self.session_id.take() else {
            return;
        };

        let result = self
            .request(Method::GET, &format!("close/{session_id}"))
            .timeout(self.config.close_timeout())
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!("Closed CDM session {session_id}");
            }
            Ok(response) => {
                tracing::debug!(
                    "Closing CDM session {session_id} returned {}",
                    response.status()
                );
            }
            Err(e) => tracing::debug!("Failed to close CDM session {session_id}: {e}"),
        }
    }
}

impl Drop for RemoteCdm {
    fn drop(&mut self) {
        let Some(session_id) = self.session_id.take() else {
            return;
        };

        // dropped mid-negotiation, most likely cancelled
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let request = self
                    .request(Method::GET, &format!("close/{session_id}"))
                    .timeout(self.config.close_timeout());
                handle.spawn(async move {
                    _ = request.send().await;
                });
                tracing::debug!("Scheduled close of abandoned CDM session {session_id}");
            }
            Err(_) => {
                tracing::warn!("CDM session {session_id} dropped outside a runtime, not closed")
            }
        }
    }
}

/// Run the complete key exchange for one unit.
///
/// The session is closed on success and on every error.
pub async fn negotiate_keys(
    cdm: &mut RemoteCdm,
    client: &HttpClient,
    stream: &StreamInfo,
    pssh: &Pssh,
    diagnostic_limit: usize,
) -> DrmdlResult<Vec<DecryptionKey>> {
    let result = async {
        cdm.open().await?;
        let challenge = cdm.get_challenge(pssh).await?;
        tracing::debug!("Challenge: {} bytes", challenge.len());

        let license = license::acquire_license(client, stream, &challenge, diagnostic_limit).await?;
        tracing::debug!("License: {} bytes", license.len());

        cdm.submit_license(&license).await?;
        cdm.get_keys().await
    }
    .await;

    cdm.close().await;
    result
}
