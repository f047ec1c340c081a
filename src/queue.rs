//! Durable outbox for orders taken while offline.
//!
//! Orders are written locally first and submitted later by an explicit
//! [`TransactionQueue::sync_pending`] call. Nothing drains the queue in the
//! background.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::cache::BusinessId;
use crate::connectivity::Connectivity;
use crate::db::{format_datetime, lock, parse_datetime, Database, SharedConnection};

/// Pause between two submissions of one drain.
pub const DEFAULT_SUBMIT_SPACING: Duration = Duration::from_millis(100);

/// Synced rows older than this are pruned by default.
pub const DEFAULT_PRUNE_AFTER_DAYS: i64 = 7;

const INTERRUPTED_ERROR: &str = "interrupted while syncing";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
  Pending,
  Syncing,
  Synced,
  Failed,
}

impl TransactionStatus {
  pub const ALL: [TransactionStatus; 4] = [
    TransactionStatus::Pending,
    TransactionStatus::Syncing,
    TransactionStatus::Synced,
    TransactionStatus::Failed,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      TransactionStatus::Pending => "pending",
      TransactionStatus::Syncing => "syncing",
      TransactionStatus::Synced => "synced",
      TransactionStatus::Failed => "failed",
    }
  }
}

impl fmt::Display for TransactionStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TransactionStatus {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    TransactionStatus::ALL
      .into_iter()
      .find(|status| status.as_str() == s)
      .ok_or_else(|| eyre!("Unknown transaction status '{}'", s))
  }
}

/// One queued order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingTransaction {
  pub id: i64,
  pub business_id: BusinessId,
  pub order_data: Value,
  pub status: TransactionStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  pub created_at: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub synced_at: Option<DateTime<Utc>>,
}

/// Outcome of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
  pub synced: usize,
  pub failed: usize,
  /// The drain was skipped or cut short because the terminal is offline
  pub offline: bool,
  /// Orders the server accepted whose `synced` status could not be written.
  /// They must not be retried.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub unrecorded: Vec<i64>,
}

/// Capability to submit one order to the server.
#[async_trait]
pub trait OrderSubmitter: Send + Sync {
  async fn submit_order(&self, business_id: BusinessId, order: &Value) -> Result<Value>;
}

type RawRow = (i64, i64, String, String, Option<String>, String, Option<String>);

const SELECT_COLUMNS: &str =
  "SELECT id, business_id, order_data, status, error, created_at, synced_at FROM pending_transactions";

/// SQLite-backed queue of orders awaiting submission.
pub struct TransactionQueue {
  conn: SharedConnection,
  spacing: Duration,
}

impl TransactionQueue {
  pub fn new(db: &Database) -> Self {
    Self {
      conn: db.conn(),
      spacing: DEFAULT_SUBMIT_SPACING,
    }
  }

  pub fn with_spacing(mut self, spacing: Duration) -> Self {
    self.spacing = spacing;
    self
  }

  /// Store an order for later submission and return its queue id.
  pub fn enqueue(&self, business_id: BusinessId, order: &Value) -> Result<i64> {
    if business_id <= 0 {
      return Err(eyre!("Missing business scope (got business id {})", business_id));
    }

    let data =
      serde_json::to_string(order).map_err(|e| eyre!("Failed to serialize order: {}", e))?;
    let conn = lock(&self.conn)?;

    conn
      .execute(
        "INSERT INTO pending_transactions (business_id, order_data, status, created_at)
         VALUES (?, ?, ?, ?)",
        params![
          business_id,
          data,
          TransactionStatus::Pending.as_str(),
          format_datetime(&Utc::now())
        ],
      )
      .map_err(|e| eyre!("Failed to queue order: {}", e))?;

    let id = conn.last_insert_rowid();
    info!(id, business_id, "Queued order for later submission");
    Ok(id)
  }

  pub fn get(&self, id: i64) -> Result<Option<PendingTransaction>> {
    let conn = lock(&self.conn)?;

    let row: Option<RawRow> = conn
      .query_row(
        &format!("{} WHERE id = ?", SELECT_COLUMNS),
        params![id],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to query transaction {}: {}", id, e))?;

    row.map(decode_row).transpose()
  }

  /// Orders waiting to be submitted, oldest first.
  pub fn pending(&self) -> Result<Vec<PendingTransaction>> {
    self.list(TransactionStatus::Pending)
  }

  /// Orders whose last submission failed, oldest first.
  pub fn failed(&self) -> Result<Vec<PendingTransaction>> {
    self.list(TransactionStatus::Failed)
  }

  pub fn list(&self, status: TransactionStatus) -> Result<Vec<PendingTransaction>> {
    let conn = lock(&self.conn)?;

    let mut stmt = conn
      .prepare(&format!(
        "{} WHERE status = ? ORDER BY created_at ASC, id ASC",
        SELECT_COLUMNS
      ))
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![status.as_str()], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
          row.get(6)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query transactions: {}", e))?
      .collect::<rusqlite::Result<Vec<RawRow>>>()
      .map_err(|e| eyre!("Failed to read transactions: {}", e))?;

    rows.into_iter().map(decode_row).collect()
  }

  pub fn mark_syncing(&self, id: i64) -> Result<()> {
    self.set_status(id, TransactionStatus::Syncing, None, None)
  }

  pub fn mark_synced(&self, id: i64) -> Result<()> {
    self.set_status(id, TransactionStatus::Synced, None, Some(Utc::now()))
  }

  pub fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
    self.set_status(id, TransactionStatus::Failed, Some(error), None)
  }

  /// Move a failed order back to pending. Returns false if it wasn't failed.
  pub fn retry(&self, id: i64) -> Result<bool> {
    let conn = lock(&self.conn)?;

    let changed = conn
      .execute(
        "UPDATE pending_transactions SET status = ?, error = NULL
         WHERE id = ? AND status = ?",
        params![
          TransactionStatus::Pending.as_str(),
          id,
          TransactionStatus::Failed.as_str()
        ],
      )
      .map_err(|e| eyre!("Failed to retry transaction {}: {}", id, e))?;

    Ok(changed > 0)
  }

  /// Delete synced orders whose submission is older than `older_than`.
  pub fn prune_synced(&self, older_than: ChronoDuration) -> Result<usize> {
    let cutoff = format_datetime(&(Utc::now() - older_than));
    let conn = lock(&self.conn)?;

    let deleted = conn
      .execute(
        "DELETE FROM pending_transactions WHERE status = ? AND synced_at < ?",
        params![TransactionStatus::Synced.as_str(), cutoff],
      )
      .map_err(|e| eyre!("Failed to prune synced transactions: {}", e))?;

    if deleted > 0 {
      info!(deleted, "Pruned synced transactions");
    }
    Ok(deleted)
  }

  pub fn count(&self) -> Result<usize> {
    let conn = lock(&self.conn)?;

    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM pending_transactions", [], |row| {
        row.get(0)
      })
      .map_err(|e| eyre!("Failed to count transactions: {}", e))?;

    Ok(count as usize)
  }

  /// Row count per status. Every status is present, zero when empty.
  pub fn count_by_status(&self) -> Result<BTreeMap<TransactionStatus, usize>> {
    let conn = lock(&self.conn)?;

    let mut stmt = conn
      .prepare("SELECT status, COUNT(*) FROM pending_transactions GROUP BY status")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
      .map_err(|e| eyre!("Failed to count transactions: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read transaction counts: {}", e))?;

    let mut counts: BTreeMap<TransactionStatus, usize> =
      TransactionStatus::ALL.into_iter().map(|s| (s, 0)).collect();
    for (status, count) in rows {
      counts.insert(status.parse()?, count as usize);
    }
    Ok(counts)
  }

  /// Fail rows left in `syncing` by a drain that never finished.
  ///
  /// Whether the server received such an order is unknown, so it is not
  /// resubmitted automatically; it waits for an explicit retry.
  pub fn recover_interrupted(&self) -> Result<usize> {
    let conn = lock(&self.conn)?;

    let recovered = conn
      .execute(
        "UPDATE pending_transactions SET status = ?, error = ? WHERE status = ?",
        params![
          TransactionStatus::Failed.as_str(),
          INTERRUPTED_ERROR,
          TransactionStatus::Syncing.as_str()
        ],
      )
      .map_err(|e| eyre!("Failed to recover interrupted transactions: {}", e))?;

    if recovered > 0 {
      warn!(recovered, "Marked interrupted submissions as failed");
    }
    Ok(recovered)
  }

  /// Submit every pending order, oldest first.
  ///
  /// Does nothing while offline. A lost connection mid-drain stops the drain
  /// and leaves the remaining orders pending.
  pub async fn sync_pending(
    &self,
    connectivity: &dyn Connectivity,
    submitter: &dyn OrderSubmitter,
  ) -> Result<SyncReport> {
    let mut report = SyncReport::default();

    if !connectivity.is_online() {
      debug!("Offline, not submitting queued orders");
      report.offline = true;
      return Ok(report);
    }

    self.recover_interrupted()?;
    let pending = self.pending()?;
    if pending.is_empty() {
      return Ok(report);
    }

    info!(count = pending.len(), "Submitting queued orders");

    for (i, transaction) in pending.iter().enumerate() {
      if i > 0 && !self.spacing.is_zero() {
        tokio::time::sleep(self.spacing).await;
      }

      if !connectivity.is_online() {
        warn!("Connection lost, stopping order submission");
        report.offline = true;
        break;
      }

      self.mark_syncing(transaction.id)?;

      match submitter
        .submit_order(transaction.business_id, &transaction.order_data)
        .await
      {
        Ok(_) => {
          report.synced += 1;
          if let Err(e) = self.mark_synced(transaction.id) {
            error!(id = transaction.id, "Order accepted by the server but not marked synced: {:#}", e);
            report.unrecorded.push(transaction.id);
          }
        }
        Err(e) => {
          warn!(id = transaction.id, "Order submission failed: {:#}", e);
          self.mark_failed(transaction.id, &format!("{:#}", e))?;
          report.failed += 1;
        }
      }
    }

    info!(
      synced = report.synced,
      failed = report.failed,
      unrecorded = report.unrecorded.len(),
      "Order submission finished"
    );
    Ok(report)
  }

  fn set_status(
    &self,
    id: i64,
    status: TransactionStatus,
    error: Option<&str>,
    synced_at: Option<DateTime<Utc>>,
  ) -> Result<()> {
    let conn = lock(&self.conn)?;

    let changed = conn
      .execute(
        "UPDATE pending_transactions SET status = ?, error = ?, synced_at = ? WHERE id = ?",
        params![
          status.as_str(),
          error,
          synced_at.as_ref().map(format_datetime),
          id
        ],
      )
      .map_err(|e| eyre!("Failed to update transaction {}: {}", id, e))?;

    if changed == 0 {
      return Err(eyre!("No queued transaction with id {}", id));
    }

    debug!(id, %status, "Transaction status changed");
    Ok(())
  }
}

fn decode_row(row: RawRow) -> Result<PendingTransaction> {
  let (id, business_id, data, status, error, created_at, synced_at) = row;

  Ok(PendingTransaction {
    id,
    business_id,
    order_data: serde_json::from_str(&data)
      .map_err(|e| eyre!("Failed to parse queued order {}: {}", id, e))?,
    status: status.parse()?,
    error,
    created_at: parse_datetime(&created_at)?,
    synced_at: synced_at.as_deref().map(parse_datetime).transpose()?,
  })
}
