use color_eyre::eyre::eyre;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{EntryId, Timestamp};
use crate::config::Config;

use super::api_types::{
  bulk_entries, manifest_entries, ApiBulkResponse, ApiManifest, ApiPutRequest, ApiPutResponse,
  ApiStateResponse,
};
use super::error::TransportError;
use super::types::{Credential, PushOptions, RemoteState};

/// The four state endpoints the sync engine consumes.
pub trait StateTransport: Send + Sync + 'static {
  /// `GET /state/{feature}?key={sub_key}`; `None` when the server has no entry.
  fn fetch_state(
    &self,
    id: &EntryId,
    credential: &Credential,
  ) -> impl Future<Output = Result<Option<RemoteState>, TransportError>> + Send;

  /// `PUT /state/{feature}?key={sub_key}`; returns the server's `updated_at`.
  fn put_state(
    &self,
    id: &EntryId,
    state: &Value,
    credential: &Credential,
    options: PushOptions,
  ) -> impl Future<Output = Result<Timestamp, TransportError>> + Send;

  /// `GET /state/meta`
  fn fetch_manifest(
    &self,
    credential: &Credential,
  ) -> impl Future<Output = Result<Vec<(EntryId, Timestamp)>, TransportError>> + Send;

  /// `GET /state/all`
  fn fetch_all(
    &self,
    credential: &Credential,
  ) -> impl Future<Output = Result<Vec<(EntryId, RemoteState)>, TransportError>> + Send;
}

/// HTTP implementation of [`StateTransport`].
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base: Url,
  /// Upper bound for keepalive pushes issued while the host shuts down
  flush_timeout: Duration,
}

impl HttpTransport {
  pub fn new(config: &Config) -> color_eyre::Result<Self> {
    let base = Url::parse(&config.server.url)
      .map_err(|e| eyre!("Invalid server url '{}': {}", config.server.url, e))?;

    let client = reqwest::Client::builder()
      .user_agent(concat!("statesync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base,
      flush_timeout: config.sync.flush_timeout(),
    })
  }

  /// Build `{base}/state/{segments...}`, keeping any path prefix on the base.
  fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
    let mut url = self.base.clone();
    url
      .path_segments_mut()
      .map_err(|_| TransportError::InvalidUrl(self.base.to_string()))?
      .pop_if_empty()
      .push("state")
      .extend(segments);
    Ok(url)
  }

  fn entry_url(&self, id: &EntryId) -> Result<Url, TransportError> {
    let mut url = self.endpoint(&[id.feature()])?;
    url.query_pairs_mut().append_pair("key", id.sub_key());
    Ok(url)
  }

  async fn send(
    &self,
    request: RequestBuilder,
    credential: &Credential,
  ) -> Result<Response, TransportError> {
    let response = request.bearer_auth(credential.token()).send().await?;
    let status = response.status();

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
      return Err(TransportError::Unauthorized(status.as_u16()));
    }
    if status == StatusCode::NOT_FOUND || status.is_success() {
      return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status {
      status: status.as_u16(),
      body,
    })
  }

  async fn get_json<T: DeserializeOwned>(
    &self,
    url: Url,
    credential: &Credential,
  ) -> Result<T, TransportError> {
    let response = self.send(self.client.get(url), credential).await?;
    if response.status() == StatusCode::NOT_FOUND {
      return Err(TransportError::Status {
        status: StatusCode::NOT_FOUND.as_u16(),
        body: String::new(),
      });
    }
    decode(response).await
  }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, TransportError> {
  let bytes = response.bytes().await?;
  serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))
}

impl StateTransport for HttpTransport {
  async fn fetch_state(
    &self,
    id: &EntryId,
    credential: &Credential,
  ) -> Result<Option<RemoteState>, TransportError> {
    let url = self.entry_url(id)?;
    let response = self.send(self.client.get(url), credential).await?;

    if response.status() == StatusCode::NOT_FOUND {
      debug!(entry = %id, "Server has no state for entry");
      return Ok(None);
    }

    let body: ApiStateResponse = decode(response).await?;
    Ok(Some(body.into()))
  }

  async fn put_state(
    &self,
    id: &EntryId,
    state: &Value,
    credential: &Credential,
    options: PushOptions,
  ) -> Result<Timestamp, TransportError> {
    let url = self.entry_url(id)?;
    let mut request = self.client.put(url).json(&ApiPutRequest { state });
    if options.keepalive {
      request = request.timeout(self.flush_timeout);
    }

    let response = self.send(request, credential).await?;
    if response.status() == StatusCode::NOT_FOUND {
      return Err(TransportError::Status {
        status: StatusCode::NOT_FOUND.as_u16(),
        body: String::new(),
      });
    }

    let body: ApiPutResponse = decode(response).await?;
    if !body.success {
      warn!(entry = %id, "Server acknowledged push without success flag");
    }
    Ok(body.updated_at)
  }

  async fn fetch_manifest(
    &self,
    credential: &Credential,
  ) -> Result<Vec<(EntryId, Timestamp)>, TransportError> {
    let manifest: ApiManifest = self.get_json(self.endpoint(&["meta"])?, credential).await?;
    Ok(manifest_entries(manifest))
  }

  async fn fetch_all(
    &self,
    credential: &Credential,
  ) -> Result<Vec<(EntryId, RemoteState)>, TransportError> {
    let bulk: ApiBulkResponse = self.get_json(self.endpoint(&["all"])?, credential).await?;
    Ok(bulk_entries(bulk))
  }
}
