use std::{ops::Deref, time::Duration};

use fake_user_agent::get_chrome_rua;
use reqwest::{Client, ClientBuilder, Response, StatusCode};

use crate::{config::HttpConfig, error::DrmdlResult, util::truncate_diagnostic};

/// Client used for manifests, licenses and subtitles.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> DrmdlResult<Self> {
        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| get_chrome_rua().to_string());

        let client = ClientBuilder::new()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

/// Status line and the tail of the body of an unsuccessful response.
pub(crate) async fn upstream_diagnostic(response: Response, limit: usize) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    format_upstream(status, &body, limit)
}

pub(crate) fn format_upstream(status: StatusCode, body: &str, limit: usize) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {}", truncate_diagnostic(body, limit))
    }
}
