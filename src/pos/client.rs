use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::cache::{BusinessId, ListParams, Page, RemoteAccessor};
use crate::config::Config;
use crate::queue::OrderSubmitter;

use super::api_types::{ApiData, ApiRecordResponse};
use super::cache::RemoteEntity;

/// Longest slice of an error body kept in error messages.
const MAX_ERROR_BODY_CHARS: usize = 300;

const BUSINESS_HEADER: &str = "x-business-id";

/// POS REST API client
#[derive(Clone)]
pub struct PosClient {
  client: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl PosClient {
  pub fn new(config: &Config) -> Result<Self> {
    Self::with_base_url(
      config.api_url()?,
      Config::get_api_token(),
      config.request_timeout(),
    )
  }

  pub fn with_base_url(base_url: Url, token: Option<String>, timeout: Duration) -> Result<Self> {
    if base_url.cannot_be_a_base() {
      return Err(eyre!("API URL {} cannot be used as a base URL", base_url));
    }

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .gzip(true)
      .deflate(true)
      .build()
      .map_err(|e| eyre!("Failed to create POS API client: {}", e))?;

    Ok(Self {
      client,
      base_url,
      token,
    })
  }

  /// Submit one order
  pub async fn create_order(&self, business_id: BusinessId, order: &Value) -> Result<Value> {
    let url = self.endpoint(&["v1", "orders"])?;

    let response = self
      .client
      .post(url)
      .headers(self.headers(business_id)?)
      .json(order)
      .send()
      .await
      .map_err(|e| eyre!("Failed to submit order: {}", e))?;

    let body: ApiRecordResponse = parse_response(response).await?;
    body.into_data()
  }

  async fn list<T: RemoteEntity>(
    &self,
    business_id: BusinessId,
    segments: &[&str],
    params: &ListParams,
  ) -> Result<Page<T>> {
    let url = self.endpoint(segments)?;
    debug!(%url, business_id, "Fetching {}", T::entity_type());

    let response = self
      .client
      .get(url)
      .headers(self.headers(business_id)?)
      .query(&params.query_pairs())
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", T::entity_type(), e))?;

    let body: ApiData<T> = parse_response(response).await?;
    body.into_page()
  }

  /// Base URL with `segments` appended, each percent-encoded.
  fn endpoint(&self, segments: &[&str]) -> Result<Url> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|_| eyre!("API URL {} cannot be used as a base URL", self.base_url))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  fn headers(&self, business_id: BusinessId) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(BUSINESS_HEADER, HeaderValue::from(business_id));

    if let Some(token) = &self.token {
      let auth = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| eyre!("Invalid API token format"))?;
      headers.insert(AUTHORIZATION, auth);
    }

    Ok(headers)
  }
}

/// Decode a JSON body, turning non-2xx statuses into errors.
async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
  let status = response.status();
  let url = response.url().clone();
  let body = response
    .text()
    .await
    .map_err(|e| eyre!("Failed to read response from {}: {}", url, e))?;

  if !status.is_success() {
    let mut preview: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    if body.chars().count() > MAX_ERROR_BODY_CHARS {
      preview.push_str("...");
    }
    return Err(eyre!("{} returned {}: {}", url.path(), status, preview));
  }

  serde_json::from_str(&body)
    .map_err(|e| eyre!("Failed to parse response from {}: {}", url.path(), e))
}

#[async_trait]
impl<T: RemoteEntity + 'static> RemoteAccessor<T> for PosClient {
  async fn get_all(&self, business_id: BusinessId, params: &ListParams) -> Result<Page<T>> {
    self.list(business_id, T::LIST_PATH, params).await
  }

  async fn search(&self, business_id: BusinessId, term: &str) -> Result<Vec<T>> {
    match T::SEARCH_PATH {
      Some(base) => {
        let segments: Vec<&str> = base.iter().copied().chain(std::iter::once(term)).collect();
        let page: Page<T> = self
          .list(business_id, &segments, &ListParams::default())
          .await?;
        Ok(page.data)
      }
      None => {
        let params = ListParams {
          search: Some(term.to_string()),
          ..ListParams::default()
        };
        let page: Page<T> = self.list(business_id, T::LIST_PATH, &params).await?;
        Ok(page.data)
      }
    }
  }
}

#[async_trait]
impl OrderSubmitter for PosClient {
  async fn submit_order(&self, business_id: BusinessId, order: &Value) -> Result<Value> {
    self.create_order(business_id, order).await
  }
}
