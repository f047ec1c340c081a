//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use tracing::{debug, warn};

use super::sync::{SyncMetadataEntry, SyncMetadataStore};
use super::traits::{BusinessId, Cacheable, EntityType};
use crate::db::{format_datetime, lock, parse_datetime, Database, SharedConnection};

/// A single cached entity.
#[derive(Debug, Clone)]
pub struct CachedEntity<T> {
  /// The cached entity
  pub entity: T,
  /// When the entity was cached
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Every operation is scoped by business id; records of one scope are never
/// visible through another. Reads return owned copies.
pub trait CacheStorage: SyncMetadataStore {
  /// Write a batch in one transaction, replacing records with the same key.
  fn upsert_many<T: Cacheable>(&self, business_id: BusinessId, records: &[T]) -> Result<usize>;

  /// All records of one type for a scope, in no particular order.
  fn get_all<T: Cacheable>(&self, business_id: BusinessId) -> Result<Vec<T>>;

  /// Get a single entity by key.
  fn get<T: Cacheable>(&self, business_id: BusinessId, key: &str)
    -> Result<Option<CachedEntity<T>>>;

  /// Records whose search fields contain `term`, ignoring case.
  fn search<T: Cacheable>(&self, business_id: BusinessId, term: &str) -> Result<Vec<T>>;

  fn count(&self, entity_type: EntityType, business_id: BusinessId) -> Result<usize>;

  /// Delete every record of one type for a scope.
  fn clear(&self, entity_type: EntityType, business_id: BusinessId) -> Result<usize>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: SharedConnection,
}

impl SqliteStorage {
  /// Create storage on top of an opened database.
  pub fn new(db: &Database) -> Self {
    Self { conn: db.conn() }
  }
}

/// Lowercased search fields, one per line, matched with `instr`.
fn search_text<T: Cacheable>(record: &T) -> String {
  record.search_fields().join("\n").to_lowercase()
}

/// Decode stored rows, skipping any that no longer deserialize.
fn decode_rows<T: Cacheable>(rows: Vec<(String, Vec<u8>)>) -> Vec<T> {
  rows
    .into_iter()
    .filter_map(|(key, data)| match serde_json::from_slice(&data) {
      Ok(entity) => Some(entity),
      Err(e) => {
        warn!(entity_type = %T::entity_type(), key = %key, "Skipping unreadable cached record: {}", e);
        None
      }
    })
    .collect()
}

impl CacheStorage for SqliteStorage {
  fn upsert_many<T: Cacheable>(&self, business_id: BusinessId, records: &[T]) -> Result<usize> {
    let mut conn = lock(&self.conn)?;
    let entity_type = T::entity_type();
    let cached_at = format_datetime(&Utc::now());

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    {
      let mut stmt = tx
        .prepare_cached(
          "INSERT OR REPLACE INTO cached_records
             (entity_type, business_id, record_id, data, search_text, cached_at)
           VALUES (?, ?, ?, ?, ?, ?)",
        )
        .map_err(|e| eyre!("Failed to prepare upsert: {}", e))?;

      for record in records {
        let mut record = record.clone();
        record.set_business_id(business_id);

        let data =
          serde_json::to_vec(&record).map_err(|e| eyre!("Failed to serialize entity: {}", e))?;

        stmt
          .execute(params![
            entity_type.as_str(),
            business_id,
            record.cache_key(),
            data,
            search_text(&record),
            cached_at,
          ])
          .map_err(|e| eyre!("Failed to store entity: {}", e))?;
      }
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    debug!(%entity_type, business_id, count = records.len(), "Cached records");
    Ok(records.len())
  }

  fn get_all<T: Cacheable>(&self, business_id: BusinessId) -> Result<Vec<T>> {
    let conn = lock(&self.conn)?;

    let mut stmt = conn
      .prepare(
        "SELECT record_id, data FROM cached_records
         WHERE entity_type = ? AND business_id = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![T::entity_type().as_str(), business_id], |row| {
        Ok((row.get(0)?, row.get(1)?))
      })
      .map_err(|e| eyre!("Failed to query entities: {}", e))?
      .collect::<rusqlite::Result<Vec<(String, Vec<u8>)>>>()
      .map_err(|e| eyre!("Failed to read entities: {}", e))?;

    Ok(decode_rows(rows))
  }

  fn get<T: Cacheable>(
    &self,
    business_id: BusinessId,
    key: &str,
  ) -> Result<Option<CachedEntity<T>>> {
    let conn = lock(&self.conn)?;

    let row: Option<(Vec<u8>, String)> = conn
      .query_row(
        "SELECT data, cached_at FROM cached_records
         WHERE entity_type = ? AND business_id = ? AND record_id = ?",
        params![T::entity_type().as_str(), business_id, key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query entity: {}", e))?;

    match row {
      Some((data, cached_at_str)) => {
        let entity: T = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize entity: {}", e))?;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(CachedEntity { entity, cached_at }))
      }
      None => Ok(None),
    }
  }

  fn search<T: Cacheable>(&self, business_id: BusinessId, term: &str) -> Result<Vec<T>> {
    let conn = lock(&self.conn)?;

    let mut stmt = conn
      .prepare(
        "SELECT record_id, data FROM cached_records
         WHERE entity_type = ? AND business_id = ? AND instr(search_text, ?) > 0",
      )
      .map_err(|e| eyre!("Failed to prepare search: {}", e))?;

    let rows = stmt
      .query_map(
        params![
          T::entity_type().as_str(),
          business_id,
          term.trim().to_lowercase()
        ],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .map_err(|e| eyre!("Failed to search entities: {}", e))?
      .collect::<rusqlite::Result<Vec<(String, Vec<u8>)>>>()
      .map_err(|e| eyre!("Failed to read entities: {}", e))?;

    Ok(decode_rows(rows))
  }

  fn count(&self, entity_type: EntityType, business_id: BusinessId) -> Result<usize> {
    let conn = lock(&self.conn)?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cached_records WHERE entity_type = ? AND business_id = ?",
        params![entity_type.as_str(), business_id],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entities: {}", e))?;

    Ok(count as usize)
  }

  fn clear(&self, entity_type: EntityType, business_id: BusinessId) -> Result<usize> {
    let conn = lock(&self.conn)?;

    let removed = conn
      .execute(
        "DELETE FROM cached_records WHERE entity_type = ? AND business_id = ?",
        params![entity_type.as_str(), business_id],
      )
      .map_err(|e| eyre!("Failed to clear {}: {}", entity_type, e))?;

    debug!(%entity_type, business_id, removed, "Cleared cached records");
    Ok(removed)
  }
}

impl SyncMetadataStore for SqliteStorage {
  fn update_last_sync(&self, entry: &SyncMetadataEntry) -> Result<()> {
    let conn = lock(&self.conn)?;

    conn
      .execute(
        "INSERT OR REPLACE INTO sync_metadata (entity_type, last_sync, data_hash, record_count)
         VALUES (?, ?, ?, ?)",
        params![
          entry.entity_type.as_str(),
          format_datetime(&entry.last_sync),
          entry.data_hash,
          entry.record_count as i64,
        ],
      )
      .map_err(|e| eyre!("Failed to update sync metadata: {}", e))?;

    Ok(())
  }

  fn get_last_sync(&self, entity_type: EntityType) -> Result<Option<SyncMetadataEntry>> {
    let conn = lock(&self.conn)?;

    let row: Option<(String, Option<String>, i64)> = conn
      .query_row(
        "SELECT last_sync, data_hash, record_count FROM sync_metadata WHERE entity_type = ?",
        params![entity_type.as_str()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query sync metadata: {}", e))?;

    row
      .map(|(last_sync, data_hash, record_count)| {
        Ok(SyncMetadataEntry {
          entity_type,
          last_sync: parse_datetime(&last_sync)?,
          data_hash,
          record_count: record_count as usize,
        })
      })
      .transpose()
  }

  fn list_sync(&self) -> Result<Vec<SyncMetadataEntry>> {
    EntityType::ALL
      .into_iter()
      .filter_map(|t| self.get_last_sync(t).transpose())
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::pos::types::{Category, Customer, Product};
  use tempfile::TempDir;

  fn create_test_storage() -> (Database, SqliteStorage) {
    let db = Database::open_in_memory().unwrap();
    let storage = SqliteStorage::new(&db);
    (db, storage)
  }

  #[test]
  fn test_upsert_is_idempotent_last_write_wins() {
    let (_db, storage) = create_test_storage();

    storage
      .upsert_many(7, &[Product::new(1, "Kopi Hitam")])
      .unwrap();
    storage
      .upsert_many(7, &[Product::new(1, "Kopi Hitam Besar")])
      .unwrap();

    let all: Vec<Product> = storage.get_all(7).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].name, "Kopi Hitam Besar");
    assert_eq!(all[0].business_id, Some(7));
  }

  #[test]
  fn test_scope_isolation_with_overlapping_ids() {
    let (_db, storage) = create_test_storage();

    storage.upsert_many(7, &[Product::new(1, "Kopi")]).unwrap();
    storage.upsert_many(8, &[Product::new(1, "Teh")]).unwrap();

    let seven: Vec<Product> = storage.get_all(7).unwrap();
    let eight: Vec<Product> = storage.get_all(8).unwrap();

    assert_eq!(seven.len(), 1);
    assert_eq!(seven[0].name, "Kopi");
    assert_eq!(eight.len(), 1);
    assert_eq!(eight[0].name, "Teh");
    assert!(storage.get::<Product>(9, "1").unwrap().is_none());
  }

  #[test]
  fn test_entity_types_do_not_collide() {
    let (_db, storage) = create_test_storage();

    storage.upsert_many(7, &[Product::new(1, "Kopi")]).unwrap();
    storage.upsert_many(7, &[Category::new(1, "Minuman")]).unwrap();

    assert_eq!(storage.count(EntityType::Product, 7).unwrap(), 1);
    assert_eq!(storage.count(EntityType::Category, 7).unwrap(), 1);
    let category = storage.get::<Category>(7, "1").unwrap().unwrap();
    assert_eq!(category.entity.name, "Minuman");
  }

  #[test]
  fn test_search_over_indexed_fields() {
    let (_db, storage) = create_test_storage();

    let mut budi = Customer::new(1, "Budi Santoso");
    budi.phone = Some("0812-555".to_string());
    let mut sari = Customer::new(2, "Sari");
    sari.email = Some("SARI@Example.com".to_string());
    storage.upsert_many(7, &[budi, sari]).unwrap();

    let by_phone: Vec<Customer> = storage.search(7, "555").unwrap();
    assert_eq!(by_phone.len(), 1);
    assert_eq!(by_phone[0].id, 1);

    let by_email: Vec<Customer> = storage.search(7, "sari@example").unwrap();
    assert_eq!(by_email.len(), 1);
    assert_eq!(by_email[0].id, 2);

    let other_scope: Vec<Customer> = storage.search(8, "sari").unwrap();
    assert!(other_scope.is_empty());
  }

  #[test]
  fn test_clear_only_touches_one_scope_and_type() {
    let (_db, storage) = create_test_storage();

    storage
      .upsert_many(7, &[Product::new(1, "Kopi"), Product::new(2, "Teh")])
      .unwrap();
    storage.upsert_many(8, &[Product::new(1, "Kopi")]).unwrap();
    storage.upsert_many(7, &[Category::new(1, "Minuman")]).unwrap();

    assert_eq!(storage.clear(EntityType::Product, 7).unwrap(), 2);

    assert_eq!(storage.count(EntityType::Product, 7).unwrap(), 0);
    assert_eq!(storage.count(EntityType::Product, 8).unwrap(), 1);
    assert_eq!(storage.count(EntityType::Category, 7).unwrap(), 1);
  }

  #[test]
  fn test_unreadable_rows_are_skipped() {
    let (db, storage) = create_test_storage();

    storage.upsert_many(7, &[Product::new(1, "Kopi")]).unwrap();
    lock(&db.conn())
      .unwrap()
      .execute(
        "INSERT INTO cached_records (entity_type, business_id, record_id, data, cached_at)
         VALUES ('products', 7, '2', X'00FF', '2024-01-01T00:00:00.000000Z')",
        [],
      )
      .unwrap();

    let all: Vec<Product> = storage.get_all(7).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, 1);
  }

  #[test]
  fn test_sync_metadata_roundtrip() {
    let (_db, storage) = create_test_storage();
    assert!(storage.get_last_sync(EntityType::Product).unwrap().is_none());

    let records = vec![Product::new(1, "Kopi")];
    let synced_at = parse_datetime("2024-05-01T08:00:00.000000Z").unwrap();
    let entry = SyncMetadataEntry::for_batch(&records, synced_at).unwrap();
    storage.update_last_sync(&entry).unwrap();

    assert_eq!(
      storage.get_last_sync(EntityType::Product).unwrap(),
      Some(entry.clone())
    );
    assert_eq!(storage.list_sync().unwrap(), vec![entry]);
  }

  #[test]
  fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache.db");

    {
      let db = Database::open(Some(&path)).unwrap();
      SqliteStorage::new(&db)
        .upsert_many(7, &[Product::new(1, "Kopi")])
        .unwrap();
    }

    let db = Database::open(Some(&path)).unwrap();
    let all: Vec<Product> = SqliteStorage::new(&db).get_all(7).unwrap();
    assert_eq!(all.len(), 1);
  }
}
