//! Sync metadata and the staleness policy built on it.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::traits::{Cacheable, EntityType};

/// When an entity type was last fully refreshed from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMetadataEntry {
  pub entity_type: EntityType,
  pub last_sync: DateTime<Utc>,
  /// SHA-256 of the refreshed batch
  pub data_hash: Option<String>,
  pub record_count: usize,
}

impl SyncMetadataEntry {
  /// Describe a batch that was just persisted.
  pub fn for_batch<T: Cacheable>(records: &[T], last_sync: DateTime<Utc>) -> Result<Self> {
    Ok(Self {
      entity_type: T::entity_type(),
      last_sync,
      data_hash: Some(data_hash(records)?),
      record_count: records.len(),
    })
  }
}

/// Hex SHA-256 over the JSON encoding of `records`.
pub fn data_hash<T: Cacheable>(records: &[T]) -> Result<String> {
  let bytes =
    serde_json::to_vec(records).map_err(|e| eyre!("Failed to serialize batch: {}", e))?;
  let mut hasher = Sha256::new();
  hasher.update(&bytes);
  Ok(hex::encode(hasher.finalize()))
}

/// Bookkeeping of full refreshes, one entry per entity type.
pub trait SyncMetadataStore: Send + Sync {
  /// Record a successful full refresh, replacing the previous entry.
  fn update_last_sync(&self, entry: &SyncMetadataEntry) -> Result<()>;

  fn get_last_sync(&self, entity_type: EntityType) -> Result<Option<SyncMetadataEntry>>;

  fn list_sync(&self) -> Result<Vec<SyncMetadataEntry>>;
}

/// How old cached data may get before it is flagged, and whether stale data
/// is still served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
  /// None disables staleness tracking entirely
  pub max_staleness: Option<Duration>,
  /// Serve stale data (flagged) rather than refusing
  pub serve_stale: bool,
}

impl StalenessPolicy {
  pub const DEFAULT_MAX_STALENESS_SECS: i64 = 86_400;

  /// Never-synced data counts as stale whenever a limit is set.
  pub fn is_stale(&self, last_sync: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match (self.max_staleness, last_sync) {
      (None, _) => false,
      (Some(_), None) => true,
      (Some(max), Some(at)) => now - at > max,
    }
  }
}

impl Default for StalenessPolicy {
  fn default() -> Self {
    Self {
      max_staleness: Some(Duration::seconds(Self::DEFAULT_MAX_STALENESS_SECS)),
      serve_stale: true,
    }
  }
}
