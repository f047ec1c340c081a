//! Offline-aware POS data access wrapping the REST client with the cache.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::{
  require_scope, BusinessId, CacheLayer, CacheResult, CacheSource, CacheStorage, EntityType,
  ListParams, Page, RemoteAccessor, SyncMetadataStore,
};

use super::client::PosClient;
use super::types::{Category, Customer, Product};

/// Page size used when warming the cache.
pub const PRELOAD_PAGE_SIZE: u32 = 100;

/// What one entity type contributed to a preload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreloadOutcome {
  pub success: bool,
  pub source: CacheSource,
  /// Records the fetch returned
  pub count: usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl PreloadOutcome {
  fn of<T>(result: &CacheResult<T>, count: usize) -> Self {
    Self {
      success: result.success,
      source: result.source,
      count,
      error: result.error.clone(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PreloadReport {
  pub entities: BTreeMap<EntityType, PreloadOutcome>,
}

/// Cache state of one entity type for a scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySyncStatus {
  pub entity_type: EntityType,
  /// Records cached for the requested scope
  pub cached: usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub last_sync: Option<DateTime<Utc>>,
  /// Records in the last full refresh
  pub last_sync_count: usize,
  pub stale: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStatus {
  pub online: bool,
  pub entities: Vec<EntitySyncStatus>,
}

/// POS data access with transparent caching and offline fallback.
///
/// Every method returns a [`CacheResult`]; none of them fail with `Err`.
pub struct OfflineService<S: CacheStorage> {
  cache: CacheLayer<S>,
  products: Arc<dyn RemoteAccessor<Product>>,
  categories: Arc<dyn RemoteAccessor<Category>>,
  customers: Arc<dyn RemoteAccessor<Customer>>,
}

impl<S: CacheStorage> OfflineService<S> {
  pub fn new(
    cache: CacheLayer<S>,
    products: Arc<dyn RemoteAccessor<Product>>,
    categories: Arc<dyn RemoteAccessor<Category>>,
    customers: Arc<dyn RemoteAccessor<Customer>>,
  ) -> Self {
    Self {
      cache,
      products,
      categories,
      customers,
    }
  }

  /// Use one REST client for every entity type.
  pub fn with_client(cache: CacheLayer<S>, client: PosClient) -> Self {
    let client = Arc::new(client);
    Self::new(cache, client.clone(), client.clone(), client)
  }

  pub fn is_online(&self) -> bool {
    self.cache.is_online()
  }

  pub fn cache(&self) -> &CacheLayer<S> {
    &self.cache
  }

  /// Product list, filtered, sorted and paginated
  pub async fn get_products(
    &self,
    business_id: BusinessId,
    params: &ListParams,
  ) -> CacheResult<Page<Product>> {
    let remote = Arc::clone(&self.products);
    self
      .cache
      .fetch_page(business_id, params, || async move {
        remote.get_all(business_id, params).await
      })
      .await
  }

  /// Every category of the business
  pub async fn get_categories(&self, business_id: BusinessId) -> CacheResult<Vec<Category>> {
    let remote = Arc::clone(&self.categories);
    self
      .cache
      .fetch_list(business_id, || async move {
        let page = remote.get_all(business_id, &ListParams::default()).await?;
        Ok(page.data)
      })
      .await
  }

  /// Customer list, filtered, sorted and paginated
  pub async fn get_customers(
    &self,
    business_id: BusinessId,
    params: &ListParams,
  ) -> CacheResult<Page<Customer>> {
    let remote = Arc::clone(&self.customers);
    self
      .cache
      .fetch_page(business_id, params, || async move {
        remote.get_all(business_id, params).await
      })
      .await
  }

  /// Search products by name or SKU, local store first
  pub async fn search_products(
    &self,
    business_id: BusinessId,
    term: &str,
  ) -> CacheResult<Vec<Product>> {
    let remote = Arc::clone(&self.products);
    self
      .cache
      .search(business_id, term, || async move {
        remote.search(business_id, term).await
      })
      .await
  }

  /// Search customers by name, phone or email, local store first
  pub async fn search_customers(
    &self,
    business_id: BusinessId,
    term: &str,
  ) -> CacheResult<Vec<Customer>> {
    let remote = Arc::clone(&self.customers);
    self
      .cache
      .search(business_id, term, || async move {
        remote.search(business_id, term).await
      })
      .await
  }

  /// One cached product. Never calls the server.
  pub fn get_product(&self, business_id: BusinessId, id: i64) -> CacheResult<Option<Product>> {
    self.cache.get_cached(business_id, &id.to_string())
  }

  /// Warm the cache with every entity type at once.
  ///
  /// The fetches are independent; one failing doesn't stop the others and
  /// the preload itself still succeeds.
  pub async fn preload_data(&self, business_id: BusinessId) -> CacheResult<PreloadReport> {
    info!(business_id, "Preloading data");

    let params = ListParams {
      page: Some(1),
      per_page: Some(PRELOAD_PAGE_SIZE),
      ..ListParams::default()
    };

    let (products, categories, customers) = futures::join!(
      self.get_products(business_id, &params),
      self.get_categories(business_id),
      self.get_customers(business_id, &params),
    );

    let mut report = PreloadReport::default();
    report.entities.insert(
      EntityType::Product,
      PreloadOutcome::of(&products, products.data.data.len()),
    );
    report.entities.insert(
      EntityType::Category,
      PreloadOutcome::of(&categories, categories.data.len()),
    );
    report.entities.insert(
      EntityType::Customer,
      PreloadOutcome::of(&customers, customers.data.data.len()),
    );

    for (entity_type, outcome) in &report.entities {
      match (&outcome.error, outcome.source) {
        (None, CacheSource::Network) => {
          info!(%entity_type, count = outcome.count, "Preloaded")
        }
        (None, _) => info!(%entity_type, source = ?outcome.source, "Not refreshed, offline"),
        (Some(error), _) => warn!(%entity_type, "Preload failed: {}", error),
      }
    }

    CacheResult::local(report)
  }

  /// Drop every cached record of the business. Other businesses are untouched.
  pub fn clear_cache(&self, business_id: BusinessId) -> CacheResult<BTreeMap<EntityType, usize>> {
    let mut cleared = BTreeMap::new();

    for entity_type in EntityType::ALL {
      match self.cache.clear(entity_type, business_id) {
        Ok(count) => {
          cleared.insert(entity_type, count);
        }
        Err(e) => {
          warn!(%entity_type, business_id, "Failed to clear cache: {:#}", e);
          return CacheResult::failure(format!("{:#}", e));
        }
      }
    }

    info!(business_id, ?cleared, "Cleared cache");
    CacheResult::local(cleared)
  }

  /// Last refresh and cached counts of every entity type.
  pub fn sync_status(&self, business_id: BusinessId) -> CacheResult<SyncStatus> {
    if let Err(e) = require_scope(business_id) {
      return CacheResult::failure(e.to_string());
    }

    let storage = self.cache.storage();

    let synced = match storage.list_sync() {
      Ok(entries) => entries,
      Err(e) => return CacheResult::failure(format!("{:#}", e)),
    };

    let mut entities = Vec::with_capacity(EntityType::ALL.len());
    for entity_type in EntityType::ALL {
      let cached = match storage.count(entity_type, business_id) {
        Ok(count) => count,
        Err(e) => return CacheResult::failure(format!("{:#}", e)),
      };
      let entry = synced.iter().find(|e| e.entity_type == entity_type);
      let last_sync = entry.map(|e| e.last_sync);

      entities.push(EntitySyncStatus {
        entity_type,
        cached,
        last_sync,
        last_sync_count: entry.map(|e| e.record_count).unwrap_or(0),
        stale: self.cache.is_stale(last_sync),
      });
    }

    CacheResult::local(SyncStatus {
      online: self.is_online(),
      entities,
    })
  }
}
