// src/ingest/transport.rs
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{PulseError, Result};
use crate::ingest::providers::documents::{DocumentService, HttpDocumentService};

const USER_AGENT: &str = "pulse-aggregator/0.1";

pub fn default_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(20))
        .build()
        .map_err(|e| PulseError::Config(format!("http client: {e}")))
}

/// Where feed documents come from.
#[derive(Clone)]
pub enum FeedTransport {
    Http(reqwest::Client),
    /// URL → document body. Unknown URLs fail like a 404 would.
    Fixtures(Arc<HashMap<String, String>>),
}

impl FeedTransport {
    pub fn fixtures<I, K, V>(docs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        FeedTransport::Fixtures(Arc::new(
            docs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        ))
    }

    pub async fn get(&self, url: &str) -> Result<String> {
        match self {
            FeedTransport::Fixtures(docs) => docs
                .get(url)
                .cloned()
                .ok_or_else(|| PulseError::Config(format!("no feed at {url}"))),
            FeedTransport::Http(client) => {
                let resp = match client.get(url).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = ?e, url, "feed http error");
                        return Err(e.into());
                    }
                };
                let status = resp.status();
                if status.is_server_error() {
                    return Err(PulseError::Transient(format!("{url} returned {status}")));
                }
                if !status.is_success() {
                    return Err(PulseError::Config(format!("{url} returned {status}")));
                }
                resp.text()
                    .await
                    .map_err(|e| PulseError::Transient(format!("reading {url}: {e}")))
            }
        }
    }
}

/// Where document-service clients come from.
#[derive(Clone)]
pub enum DocumentBackend {
    Http(reqwest::Client),
    /// One service answers for every `api_base`.
    Fixed(Arc<dyn DocumentService>),
}

impl DocumentBackend {
    pub fn service_for(&self, api_base: &str) -> Arc<dyn DocumentService> {
        match self {
            DocumentBackend::Http(client) => Arc::new(HttpDocumentService::new(client.clone(), api_base)),
            DocumentBackend::Fixed(svc) => Arc::clone(svc),
        }
    }
}

/// External dependencies the adapters read from.
#[derive(Clone)]
pub struct Sources {
    pub feeds: FeedTransport,
    pub documents: DocumentBackend,
}

impl Sources {
    pub fn http() -> Result<Self> {
        let client = default_http_client()?;
        Ok(Self {
            feeds: FeedTransport::Http(client.clone()),
            documents: DocumentBackend::Http(client),
        })
    }
}
