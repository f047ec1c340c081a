//! Core traits and types for the caching system.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::filter::{ListParams, Page};

/// Tenant identifier partitioning every cached record.
pub type BusinessId = i64;

/// Kinds of records kept in the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
  Product,
  Category,
  Customer,
}

impl EntityType {
  pub const ALL: [EntityType; 3] = [EntityType::Product, EntityType::Category, EntityType::Customer];

  /// Storage name, also used as the sync metadata key.
  pub fn as_str(&self) -> &'static str {
    match self {
      EntityType::Product => "products",
      EntityType::Category => "categories",
      EntityType::Customer => "customers",
    }
  }
}

impl fmt::Display for EntityType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for EntityType {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    EntityType::ALL
      .into_iter()
      .find(|t| t.as_str() == s)
      .ok_or_else(|| eyre!("Unknown entity type '{}'", s))
  }
}

/// Trait for entities that can be cached.
///
/// Implementors provide a key unique within a business scope, the text
/// fields covered by local search, and optionally a category reference for
/// category filtering.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Unique identifier for this entity within its business scope
  fn cache_key(&self) -> String;

  /// Entity type for storage partitioning
  fn entity_type() -> EntityType;

  /// Text fields matched case-insensitively by search
  fn search_fields(&self) -> Vec<&str>;

  /// Category this entity belongs to, if the type is categorised
  fn category_key(&self) -> Option<String> {
    None
  }

  /// Tag the entity with the scope it was fetched for.
  fn set_business_id(&mut self, business_id: BusinessId);
}

/// Read access to the authoritative server for one entity type.
///
/// Implementations normalize whatever envelope the server returns into a
/// [`Page`] before handing it to the cache.
#[async_trait]
pub trait RemoteAccessor<T: Cacheable>: Send + Sync {
  /// Fetch a list, applying `params` server-side.
  async fn get_all(&self, business_id: BusinessId, params: &ListParams) -> Result<Page<T>>;

  /// Server-side text search. Defaults to a filtered list fetch.
  async fn search(&self, business_id: BusinessId, term: &str) -> Result<Vec<T>> {
    let params = ListParams {
      search: Some(term.to_string()),
      ..ListParams::default()
    };
    Ok(self.get_all(business_id, &params).await?.data)
  }
}

/// Result of a cache operation, including data and metadata about the source.
///
/// This is the whole caller contract: operations never return `Err`, a
/// failure is reported through `success` and `error`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheResult<T> {
  pub success: bool,
  /// The actual data
  pub data: T,
  /// True when `data` came from the local store
  pub cached: bool,
  /// Where the data came from
  pub source: CacheSource,
  /// True when the cached data is older than the staleness limit
  pub stale: bool,
  /// Last full refresh of this entity type, for cached data
  #[serde(skip_serializing_if = "Option::is_none")]
  pub synced_at: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      success: true,
      data,
      cached: false,
      source: CacheSource::Network,
      stale: false,
      synced_at: None,
      error: None,
    }
  }

  /// Create a new cache result from locally stored data.
  pub fn from_cache(
    data: T,
    source: CacheSource,
    synced_at: Option<DateTime<Utc>>,
    stale: bool,
  ) -> Self {
    Self {
      success: true,
      data,
      cached: true,
      source,
      stale,
      synced_at,
      error: None,
    }
  }

  /// Result of a purely local operation (clearing, reporting).
  pub fn local(data: T) -> Self {
    Self {
      success: true,
      data,
      cached: false,
      source: CacheSource::Local,
      stale: false,
      synced_at: None,
      error: None,
    }
  }

  /// Nothing usable could be produced.
  pub fn failure(error: impl Into<String>) -> Self
  where
    T: Default,
  {
    Self {
      success: false,
      data: T::default(),
      cached: false,
      source: CacheSource::Unavailable,
      stale: false,
      synced_at: None,
      error: Some(error.into()),
    }
  }

  /// Attach an error message without changing `success`.
  pub fn with_error(mut self, error: Option<String>) -> Self {
    self.error = error;
    self
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Served from the local store (offline, or a local-first lookup)
  Local,
  /// Network attempted and failed, serving the local store
  Fallback,
  /// Neither network nor local store could answer
  Unavailable,
}
