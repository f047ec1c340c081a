//! Cache layer that orchestrates caching logic with network fetching.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::filter::{self, ListParams, Page};
use super::storage::CacheStorage;
use super::sync::{StalenessPolicy, SyncMetadataEntry};
use super::traits::{BusinessId, CacheResult, CacheSource, Cacheable, EntityType};
use crate::connectivity::Connectivity;

/// Default bound on a single remote call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote payloads whose records get persisted.
pub trait Records<T> {
  fn records(&self) -> &[T];
}

impl<T> Records<T> for Page<T> {
  fn records(&self) -> &[T] {
    &self.data
  }
}

impl<T> Records<T> for Vec<T> {
  fn records(&self) -> &[T] {
    self
  }
}

/// Outcome of the remote half of a request.
enum Attempt<R> {
  Fresh(CacheResult<R>),
  Skipped,
  Failed(String),
}

/// Freshness of the cached copy of one entity type.
struct Freshness {
  synced_at: Option<DateTime<Utc>>,
  stale: bool,
}

/// Cache layer that manages caching logic and network fetching.
///
/// Every request resolves to either a fresh network result (persisted before
/// returning) or a result served from the local store. Nothing here runs in
/// the background.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  connectivity: Arc<dyn Connectivity>,
  request_timeout: Duration,
  staleness: StalenessPolicy,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S, connectivity: Arc<dyn Connectivity>) -> Self {
    Self {
      storage: Arc::new(storage),
      connectivity,
      request_timeout: DEFAULT_REQUEST_TIMEOUT,
      staleness: StalenessPolicy::default(),
    }
  }

  pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
    self.request_timeout = timeout;
    self
  }

  pub fn with_staleness(mut self, staleness: StalenessPolicy) -> Self {
    self.staleness = staleness;
    self
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn is_online(&self) -> bool {
    self.connectivity.is_online()
  }

  /// Fetch a paginated list.
  ///
  /// 1. If online, fetch from network, persist and return it verbatim
  /// 2. If offline or the fetch fails, filter/sort/paginate the local store
  /// 3. If the store can't be queried, report failure with whatever
  ///    unfiltered data a second read produces
  pub async fn fetch_page<T, F, Fut>(
    &self,
    business_id: BusinessId,
    params: &ListParams,
    fetcher: F,
  ) -> CacheResult<Page<T>>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
  {
    if let Err(e) = require_scope(business_id) {
      return CacheResult::failure(e.to_string());
    }

    let remote_error = match self
      .try_remote::<T, _, _, _>(business_id, params.is_full_fetch(), fetcher)
      .await
    {
      Attempt::Fresh(result) => return result,
      Attempt::Skipped => None,
      Attempt::Failed(e) => Some(e),
    };

    self.serve_from_store::<T, _, _, _>(
      business_id,
      remote_error,
      |records| filter::apply(records, params),
      Page::from_list,
    )
  }

  /// Fetch an unpaginated list. Same flow as [`CacheLayer::fetch_page`].
  pub async fn fetch_list<T, F, Fut>(
    &self,
    business_id: BusinessId,
    fetcher: F,
  ) -> CacheResult<Vec<T>>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
  {
    if let Err(e) = require_scope(business_id) {
      return CacheResult::failure(e.to_string());
    }

    let remote_error = match self
      .try_remote::<T, _, _, _>(business_id, true, fetcher)
      .await
    {
      Attempt::Fresh(result) => return result,
      Attempt::Skipped => None,
      Attempt::Failed(e) => Some(e),
    };

    self.serve_from_store::<T, _, _, _>(business_id, remote_error, |records| records, |records| {
      records
    })
  }

  /// Local-first search.
  ///
  /// The store is searched first. Only when that yields nothing (or the
  /// cached copy is too stale to serve) and the server is reachable is one
  /// remote search made; its results are persisted without touching sync
  /// metadata. Stale matches that can't be replaced by a remote answer are
  /// refused, never reported as "no matches".
  pub async fn search<T, F, Fut>(
    &self,
    business_id: BusinessId,
    term: &str,
    fetcher: F,
  ) -> CacheResult<Vec<T>>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
  {
    if let Err(e) = require_scope(business_id) {
      return CacheResult::failure(e.to_string());
    }

    let freshness = self.freshness::<T>();
    let refuse_stale = freshness.stale && !self.staleness.serve_stale;

    // `withheld`: matches exist locally but are too stale to serve
    let (local_error, withheld) = match self.storage.search::<T>(business_id, term) {
      Ok(hits) if hits.is_empty() => (None, false),
      Ok(hits) if !refuse_stale => {
        debug!(entity_type = %T::entity_type(), count = hits.len(), "Serving search from cache");
        return CacheResult::from_cache(
          hits,
          CacheSource::Local,
          freshness.synced_at,
          freshness.stale,
        );
      }
      Ok(_) => (None, true),
      Err(e) => {
        warn!(entity_type = %T::entity_type(), "Local search failed: {:#}", e);
        (Some(format!("{:#}", e)), false)
      }
    };

    if !self.is_online() {
      if withheld {
        return CacheResult::failure(too_stale::<T>(None));
      }
      return match local_error {
        Some(e) => CacheResult::failure(e),
        None => CacheResult::from_cache(
          Vec::new(),
          CacheSource::Local,
          freshness.synced_at,
          freshness.stale,
        ),
      };
    }

    match self.fetch_remote(fetcher).await {
      Ok(results) => {
        if let Err(e) = self.storage.upsert_many(business_id, &results) {
          warn!(entity_type = %T::entity_type(), "Failed to cache search results: {:#}", e);
        }
        CacheResult::from_network(results)
      }
      Err(e) => {
        warn!(entity_type = %T::entity_type(), "Remote search failed: {:#}", e);
        let remote = format!("{:#}", e);
        if withheld {
          return CacheResult::failure(too_stale::<T>(Some(remote)));
        }
        match local_error {
          Some(local) => CacheResult::failure(format!("{}; {}", local, remote)),
          None => CacheResult::from_cache(
            Vec::new(),
            CacheSource::Fallback,
            freshness.synced_at,
            freshness.stale,
          )
          .with_error(Some(remote)),
        }
      }
    }
  }

  /// Read one record from the store. Never calls the server.
  pub fn get_cached<T: Cacheable>(
    &self,
    business_id: BusinessId,
    key: &str,
  ) -> CacheResult<Option<T>> {
    if let Err(e) = require_scope(business_id) {
      return CacheResult::failure(e.to_string());
    }

    match self.storage.get::<T>(business_id, key) {
      Ok(entity) => {
        let freshness = self.freshness::<T>();
        if entity.is_some() && freshness.stale && !self.staleness.serve_stale {
          return CacheResult::failure(too_stale::<T>(None));
        }
        CacheResult::from_cache(
          entity.map(|cached| cached.entity),
          CacheSource::Local,
          freshness.synced_at,
          freshness.stale,
        )
      }
      Err(e) => {
        warn!(entity_type = %T::entity_type(), key, "Cached lookup failed: {:#}", e);
        CacheResult::failure(format!("{:#}", e))
      }
    }
  }

  /// Drop every record of one type for a scope.
  pub fn clear(&self, entity_type: EntityType, business_id: BusinessId) -> Result<usize> {
    require_scope(business_id)?;
    self.storage.clear(entity_type, business_id)
  }

  /// Whether cached data of this type is past the staleness limit.
  pub fn is_stale(&self, synced_at: Option<DateTime<Utc>>) -> bool {
    self.staleness.is_stale(synced_at, Utc::now())
  }

  async fn try_remote<T, R, F, Fut>(
    &self,
    business_id: BusinessId,
    full_fetch: bool,
    fetcher: F,
  ) -> Attempt<R>
  where
    T: Cacheable,
    R: Records<T>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R>>,
  {
    if !self.is_online() {
      debug!(entity_type = %T::entity_type(), business_id, "Offline, serving from cache");
      return Attempt::Skipped;
    }

    match self.fetch_remote(fetcher).await {
      Ok(data) => {
        let persisted = self.persist(business_id, data.records(), full_fetch);
        let result = match persisted {
          Ok(()) => CacheResult::from_network(data),
          Err(e) => {
            warn!(entity_type = %T::entity_type(), business_id, "Failed to cache fetched records: {:#}", e);
            CacheResult::from_network(data).with_error(Some(format!("{:#}", e)))
          }
        };
        Attempt::Fresh(result)
      }
      Err(e) => {
        warn!(entity_type = %T::entity_type(), business_id, "Remote fetch failed, falling back to cache: {:#}", e);
        Attempt::Failed(format!("{:#}", e))
      }
    }
  }

  /// Run a fetcher under the request timeout.
  async fn fetch_remote<R, F, Fut>(&self, fetcher: F) -> Result<R>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R>>,
  {
    tokio::time::timeout(self.request_timeout, fetcher())
      .await
      .map_err(|_| eyre!("Request timed out after {:?}", self.request_timeout))?
  }

  /// Write a fetched batch; sync metadata only follows a persisted full fetch.
  fn persist<T: Cacheable>(
    &self,
    business_id: BusinessId,
    records: &[T],
    full_fetch: bool,
  ) -> Result<()> {
    self.storage.upsert_many(business_id, records)?;

    if full_fetch {
      let entry = SyncMetadataEntry::for_batch(records, Utc::now())?;
      self.storage.update_last_sync(&entry)?;
    }

    Ok(())
  }

  fn freshness<T: Cacheable>(&self) -> Freshness {
    let synced_at = match self.storage.get_last_sync(T::entity_type()) {
      Ok(entry) => entry.map(|e| e.last_sync),
      Err(e) => {
        warn!(entity_type = %T::entity_type(), "Failed to read sync metadata: {:#}", e);
        None
      }
    };

    Freshness {
      synced_at,
      stale: self.is_stale(synced_at),
    }
  }

  fn serve_from_store<T, R, Q, L>(
    &self,
    business_id: BusinessId,
    remote_error: Option<String>,
    query: Q,
    last_known: L,
  ) -> CacheResult<R>
  where
    T: Cacheable,
    R: Default,
    Q: FnOnce(Vec<T>) -> R,
    L: FnOnce(Vec<T>) -> R,
  {
    let source = if remote_error.is_some() {
      CacheSource::Fallback
    } else {
      CacheSource::Local
    };
    let freshness = self.freshness::<T>();

    if freshness.stale && !self.staleness.serve_stale {
      return CacheResult::failure(too_stale::<T>(remote_error));
    }

    match self.storage.get_all::<T>(business_id) {
      Ok(records) => {
        debug!(entity_type = %T::entity_type(), business_id, count = records.len(), "Serving from cache");
        CacheResult::from_cache(query(records), source, freshness.synced_at, freshness.stale)
          .with_error(remote_error)
      }
      Err(e) => {
        warn!(entity_type = %T::entity_type(), business_id, "Cache read failed: {:#}", e);
        let error = match remote_error {
          Some(remote) => format!("{}; {:#}", remote, e),
          None => format!("{:#}", e),
        };

        match self.storage.get_all::<T>(business_id) {
          Ok(records) => CacheResult {
            success: false,
            data: last_known(records),
            cached: true,
            source,
            stale: freshness.stale,
            synced_at: freshness.synced_at,
            error: Some(error),
          },
          Err(_) => CacheResult::failure(error),
        }
      }
    }
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      connectivity: Arc::clone(&self.connectivity),
      request_timeout: self.request_timeout,
      staleness: self.staleness,
    }
  }
}

/// Error for a cached copy withheld under `serve_stale: false`, after the
/// remote failure that forced the fallback, if any.
fn too_stale<T: Cacheable>(remote_error: Option<String>) -> String {
  let error = format!("Cached {} are too stale to serve", T::entity_type());
  match remote_error {
    Some(remote) => format!("{}; {}", remote, error),
    None => error,
  }
}

/// Refuse unscoped requests instead of reading every tenant's data.
pub fn require_scope(business_id: BusinessId) -> Result<()> {
  if business_id <= 0 {
    return Err(eyre!("Missing business scope (got business id {})", business_id));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::{CachedEntity, SqliteStorage};
  use crate::cache::sync::SyncMetadataStore;
  use crate::db::Database;
  use crate::pos::types::{Category, Product};
  use chrono::SubsecRound;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

  fn test_layer(online: bool) -> (Database, CacheLayer<SqliteStorage>) {
    let db = Database::open_in_memory().unwrap();
    let connectivity: Arc<dyn Connectivity> = Arc::new(move || online);
    let layer = CacheLayer::new(SqliteStorage::new(&db), connectivity);
    (db, layer)
  }

  fn seed(layer: &CacheLayer<SqliteStorage>, business_id: BusinessId, records: &[Product]) {
    layer.storage().upsert_many(business_id, records).unwrap();
  }

  fn kopi_scenario() -> Vec<Product> {
    vec![
      Product::new(1, "Kopi Hitam"),
      Product::new(2, "Kopi Susu"),
      Product::new(3, "Teh Manis"),
    ]
  }

  fn kopi_params() -> ListParams {
    ListParams {
      search: Some("kopi".to_string()),
      page: Some(1),
      per_page: Some(10),
      ..ListParams::default()
    }
  }

  #[tokio::test]
  async fn test_offline_serves_filtered_page_from_store() {
    let (_db, layer) = test_layer(false);
    seed(&layer, 7, &kopi_scenario());

    let called = AtomicBool::new(false);
    let result = layer
      .fetch_page(7, &kopi_params(), || async {
        called.store(true, Ordering::SeqCst);
        Ok(Page::<Product>::default())
      })
      .await;

    assert!(!called.load(Ordering::SeqCst));
    assert!(result.success);
    assert!(result.cached);
    assert_eq!(result.source, CacheSource::Local);
    let mut ids: Vec<i64> = result.data.data.iter().map(|p| p.id).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(result.data.pagination.total, 2);
    assert!(result.error.is_none());
  }

  #[tokio::test]
  async fn test_online_fetch_persists_and_returns_verbatim() {
    let (_db, layer) = test_layer(true);

    let remote = Page {
      data: kopi_scenario(),
      pagination: crate::cache::filter::Pagination {
        current_page: 1,
        last_page: 4,
        per_page: 3,
        total: 12,
      },
    };
    let expected = remote.clone();

    let result = layer
      .fetch_page(7, &ListParams::default(), || async move { Ok(remote) })
      .await;

    assert!(result.success);
    assert!(!result.cached);
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data, expected);

    let stored: Vec<Product> = layer.storage().get_all(7).unwrap();
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().all(|p| p.business_id == Some(7)));

    let sync = layer.storage().get_last_sync(EntityType::Product).unwrap().unwrap();
    assert_eq!(sync.record_count, 3);
  }

  #[tokio::test]
  async fn test_filtered_fetch_does_not_touch_sync_metadata() {
    let (_db, layer) = test_layer(true);

    let result = layer
      .fetch_page(7, &kopi_params(), || async {
        Ok(Page::from_list(vec![Product::new(1, "Kopi Hitam")]))
      })
      .await;

    assert!(result.success);
    assert_eq!(layer.storage().count(EntityType::Product, 7).unwrap(), 1);
    assert!(layer.storage().get_last_sync(EntityType::Product).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_remote_error_falls_back_to_cache() {
    let (_db, layer) = test_layer(true);
    seed(&layer, 7, &kopi_scenario());

    let result = layer
      .fetch_page::<Product, _, _>(7, &kopi_params(), || async {
        Err(eyre!("connection reset"))
      })
      .await;

    assert!(result.success);
    assert!(result.cached);
    assert_eq!(result.source, CacheSource::Fallback);
    assert_eq!(result.data.pagination.total, 2);
    assert!(result.error.unwrap().contains("connection reset"));
  }

  #[tokio::test]
  async fn test_remote_timeout_falls_back_to_cache() {
    let (_db, layer) = test_layer(true);
    let layer = layer.with_request_timeout(Duration::from_millis(20));
    seed(&layer, 7, &kopi_scenario());

    let result = layer
      .fetch_page(7, &ListParams::default(), || async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Page::<Product>::default())
      })
      .await;

    assert!(result.success);
    assert_eq!(result.source, CacheSource::Fallback);
    assert_eq!(result.data.data.len(), 3);
    assert!(result.error.unwrap().contains("timed out"));
  }

  #[tokio::test]
  async fn test_missing_scope_is_refused() {
    let (_db, layer) = test_layer(true);

    let called = AtomicBool::new(false);
    let result = layer
      .fetch_list(0, || async {
        called.store(true, Ordering::SeqCst);
        Ok(Vec::<Category>::new())
      })
      .await;

    assert!(!called.load(Ordering::SeqCst));
    assert!(!result.success);
    assert_eq!(result.source, CacheSource::Unavailable);
    assert!(result.error.unwrap().contains("business scope"));
  }

  #[tokio::test]
  async fn test_stale_cache_is_flagged_or_refused() {
    let (_db, layer) = test_layer(false);
    seed(&layer, 7, &kopi_scenario());

    let flagged = layer
      .fetch_page(7, &ListParams::default(), || async { Ok(Page::<Product>::default()) })
      .await;
    assert!(flagged.success);
    assert!(flagged.stale);
    assert!(flagged.synced_at.is_none());

    let strict = layer.clone().with_staleness(StalenessPolicy {
      max_staleness: Some(chrono::Duration::hours(1)),
      serve_stale: false,
    });
    let refused = strict
      .fetch_page(7, &ListParams::default(), || async { Ok(Page::<Product>::default()) })
      .await;
    assert!(!refused.success);
    assert!(refused.data.data.is_empty());
    assert!(refused.error.unwrap().contains("too stale"));

    let now = Utc::now().trunc_subsecs(6);
    let entry = SyncMetadataEntry::for_batch(&kopi_scenario(), now).unwrap();
    strict.storage().update_last_sync(&entry).unwrap();
    let fresh = strict
      .fetch_page(7, &ListParams::default(), || async { Ok(Page::<Product>::default()) })
      .await;
    assert!(fresh.success);
    assert!(!fresh.stale);
    assert_eq!(fresh.synced_at, Some(entry.last_sync));
  }

  fn strict(layer: &CacheLayer<SqliteStorage>) -> CacheLayer<SqliteStorage> {
    layer.clone().with_staleness(StalenessPolicy {
      max_staleness: Some(chrono::Duration::hours(1)),
      serve_stale: false,
    })
  }

  #[tokio::test]
  async fn test_stale_search_hits_are_refused_not_hidden() {
    let (db, layer) = test_layer(false);
    seed(&layer, 7, &kopi_scenario());
    let offline_layer = strict(&layer);

    let offline = offline_layer
      .search(7, "kopi", || async { Ok(Vec::<Product>::new()) })
      .await;
    assert!(!offline.success);
    assert!(offline.data.is_empty());
    assert!(offline.error.unwrap().contains("too stale"));

    let connectivity: Arc<dyn Connectivity> = Arc::new(|| true);
    let online = strict(&CacheLayer::new(SqliteStorage::new(&db), connectivity));
    let failed = online
      .search::<Product, _, _>(7, "kopi", || async { Err(eyre!("connection reset")) })
      .await;
    assert!(!failed.success);
    let error = failed.error.unwrap();
    assert!(error.starts_with("connection reset"));
    assert!(error.contains("too stale"));

    let replaced = online
      .search(7, "kopi", || async { Ok(vec![Product::new(1, "Kopi Hitam")]) })
      .await;
    assert!(replaced.success);
    assert_eq!(replaced.source, CacheSource::Network);

    let miss = offline_layer
      .search(7, "roti", || async { Ok(Vec::<Product>::new()) })
      .await;
    assert!(miss.success);
    assert!(miss.data.is_empty());
  }

  #[tokio::test]
  async fn test_stale_cached_record_is_refused() {
    let (_db, layer) = test_layer(false);
    seed(&layer, 7, &kopi_scenario());

    let flagged = layer.get_cached::<Product>(7, "2");
    assert!(flagged.success);
    assert!(flagged.stale);
    assert_eq!(flagged.data.unwrap().name, "Kopi Susu");

    let refused = strict(&layer).get_cached::<Product>(7, "2");
    assert!(!refused.success);
    assert!(refused.data.is_none());
    assert!(refused.error.unwrap().contains("too stale"));
  }

  #[tokio::test]
  async fn test_search_prefers_local_hits() {
    let (_db, layer) = test_layer(true);
    seed(&layer, 7, &kopi_scenario());

    let called = AtomicBool::new(false);
    let result = layer
      .search(7, "susu", || async {
        called.store(true, Ordering::SeqCst);
        Ok(Vec::<Product>::new())
      })
      .await;

    assert!(!called.load(Ordering::SeqCst));
    assert!(result.cached);
    assert_eq!(result.data.len(), 1);
    assert_eq!(result.data[0].id, 2);
  }

  #[tokio::test]
  async fn test_search_goes_remote_on_local_miss_and_caches() {
    let (_db, layer) = test_layer(true);

    let result = layer
      .search(7, "roti", || async { Ok(vec![Product::new(9, "Roti Bakar")]) })
      .await;

    assert!(result.success);
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(layer.storage().count(EntityType::Product, 7).unwrap(), 1);
    assert!(layer.storage().get_last_sync(EntityType::Product).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_search_offline_miss_is_empty_not_error() {
    let (_db, layer) = test_layer(false);

    let result = layer
      .search(7, "roti", || async { Ok(vec![Product::new(9, "Roti Bakar")]) })
      .await;

    assert!(result.success);
    assert!(result.cached);
    assert!(result.data.is_empty());
  }

  /// Storage whose first `get_all` reads fail.
  struct FlakyStorage {
    inner: SqliteStorage,
    failures_left: AtomicUsize,
  }

  impl SyncMetadataStore for FlakyStorage {
    fn update_last_sync(&self, entry: &SyncMetadataEntry) -> Result<()> {
      self.inner.update_last_sync(entry)
    }

    fn get_last_sync(&self, entity_type: EntityType) -> Result<Option<SyncMetadataEntry>> {
      self.inner.get_last_sync(entity_type)
    }

    fn list_sync(&self) -> Result<Vec<SyncMetadataEntry>> {
      self.inner.list_sync()
    }
  }

  impl CacheStorage for FlakyStorage {
    fn upsert_many<T: Cacheable>(&self, business_id: BusinessId, records: &[T]) -> Result<usize> {
      self.inner.upsert_many(business_id, records)
    }

    fn get_all<T: Cacheable>(&self, business_id: BusinessId) -> Result<Vec<T>> {
      let left = self.failures_left.load(Ordering::SeqCst);
      if left > 0 {
        self.failures_left.store(left - 1, Ordering::SeqCst);
        return Err(eyre!("disk I/O error"));
      }
      self.inner.get_all(business_id)
    }

    fn get<T: Cacheable>(
      &self,
      business_id: BusinessId,
      key: &str,
    ) -> Result<Option<CachedEntity<T>>> {
      self.inner.get(business_id, key)
    }

    fn search<T: Cacheable>(&self, business_id: BusinessId, term: &str) -> Result<Vec<T>> {
      self.inner.search(business_id, term)
    }

    fn count(&self, entity_type: EntityType, business_id: BusinessId) -> Result<usize> {
      self.inner.count(entity_type, business_id)
    }

    fn clear(&self, entity_type: EntityType, business_id: BusinessId) -> Result<usize> {
      self.inner.clear(entity_type, business_id)
    }
  }

  fn flaky_layer(failures: usize) -> (Database, CacheLayer<FlakyStorage>) {
    let db = Database::open_in_memory().unwrap();
    let storage = FlakyStorage {
      inner: SqliteStorage::new(&db),
      failures_left: AtomicUsize::new(failures),
    };
    storage.inner.upsert_many(7, &kopi_scenario()).unwrap();
    let connectivity: Arc<dyn Connectivity> = Arc::new(|| false);
    (db, CacheLayer::new(storage, connectivity))
  }

  #[tokio::test]
  async fn test_store_failure_returns_last_known_data() {
    let (_db, layer) = flaky_layer(1);

    let result = layer
      .fetch_page(7, &kopi_params(), || async { Ok(Page::<Product>::default()) })
      .await;

    assert!(!result.success);
    assert!(result.cached);
    assert_eq!(result.data.data.len(), 3);
    assert!(result.error.unwrap().contains("disk I/O error"));
  }

  #[tokio::test]
  async fn test_total_store_failure_is_empty_error() {
    let (_db, layer) = flaky_layer(2);

    let result = layer
      .fetch_page(7, &kopi_params(), || async { Ok(Page::<Product>::default()) })
      .await;

    assert!(!result.success);
    assert!(result.data.data.is_empty());
    assert_eq!(result.source, CacheSource::Unavailable);
  }
}
