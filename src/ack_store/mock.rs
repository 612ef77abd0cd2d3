//! In-Memory ACK Store
//!
//! A manually-driven test double standing in for the Shared Store's ack and
//! invalidation tables, following the same `new_mock()` / `is_mock` shape
//! `MariaDbExecutor` uses for its own in-memory double: rows live in a plain
//! `HashMap` guarded by a single `tokio::sync::Mutex` per table, so the Write
//! Coordinator can be driven end-to-end in a test without a live `MySqlPool`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{AckRow, AckStoreApi, InvalidationRow};
use crate::error::{Error, Result};

#[derive(Default)]
struct Tables {
    acks: HashMap<u32, Vec<AckRow>>,
    invalidations: HashMap<u32, Vec<InvalidationRow>>,
}

/// In-memory stand-in for [`super::AckStore`]. `fail_insert_invalidations`
/// lets a test force the INSERT_INVS step to fail so the CLEANUP path that
/// runs regardless of `run_consistency_protocol`'s outcome can be observed.
pub struct InMemoryAckStore {
    tables: Mutex<Tables>,
    fail_insert_invalidations: AtomicBool,
}

impl Default for InMemoryAckStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAckStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            fail_insert_invalidations: AtomicBool::new(false),
        }
    }

    /// Make the next `insert_invalidations` call (and every one after it,
    /// until cleared) return a `StoreWrite` error.
    pub fn set_fail_insert_invalidations(&self, fail: bool) {
        self.fail_insert_invalidations.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of the ack rows currently live for `deployment`, for test
    /// assertions.
    pub async fn ack_rows(&self, deployment: u32) -> Vec<AckRow> {
        self.tables
            .lock()
            .await
            .acks
            .get(&deployment)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of the invalidation rows currently recorded for
    /// `deployment`, for test assertions.
    pub async fn invalidation_rows(&self, deployment: u32) -> Vec<InvalidationRow> {
        self.tables
            .lock()
            .await
            .invalidations
            .get(&deployment)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl AckStoreApi for InMemoryAckStore {
    async fn ensure_schema(&self, _deployment: u32) -> Result<()> {
        Ok(())
    }

    async fn insert_acks(&self, rows: &[AckRow], deployment: u32) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.acks.entry(deployment).or_default().extend(rows.iter().cloned());
        Ok(())
    }

    async fn delete_acks(&self, rows: &[AckRow], deployment: u32) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.acks.get_mut(&deployment) {
            existing.retain(|row| {
                !rows
                    .iter()
                    .any(|deleted| deleted.target_node_id == row.target_node_id && deleted.op_id == row.op_id)
            });
        }
        Ok(())
    }

    async fn update_ack(&self, target_id: u64, op_id: u64, deployment: u32) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.acks.get_mut(&deployment) {
            for row in existing.iter_mut() {
                if row.target_node_id == target_id && row.op_id == op_id {
                    row.acknowledged = true;
                }
            }
        }
        Ok(())
    }

    async fn insert_invalidations(&self, rows: &[InvalidationRow], deployment: u32) -> Result<()> {
        if self.fail_insert_invalidations.load(Ordering::SeqCst) {
            return Err(Error::Internal("insert_invalidations forced failure".into()));
        }
        let mut tables = self.tables.lock().await;
        tables
            .invalidations
            .entry(deployment)
            .or_default()
            .extend(rows.iter().cloned());
        Ok(())
    }

    async fn get_pending_acks(&self, leader_id: u64, since_time: i64, deployment: u32) -> Result<Vec<AckRow>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .acks
            .get(&deployment)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.leader_id == leader_id && row.timestamp >= since_time && !row.acknowledged)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack_row(target: u64, op_id: u64) -> AckRow {
        AckRow {
            target_node_id: target,
            deployment_number: 0,
            acknowledged: false,
            op_id,
            timestamp: 100,
            leader_id: 7,
        }
    }

    #[tokio::test]
    async fn insert_then_delete_round_trips() {
        let store = InMemoryAckStore::new();
        let rows = vec![ack_row(8, 42), ack_row(9, 42)];
        store.insert_acks(&rows, 0).await.unwrap();
        assert_eq!(store.ack_rows(0).await.len(), 2);

        store.delete_acks(&rows[..1], 0).await.unwrap();
        let remaining = store.ack_rows(0).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].target_node_id, 9);
    }

    #[tokio::test]
    async fn update_ack_flips_only_the_matching_row() {
        let store = InMemoryAckStore::new();
        store.insert_acks(&[ack_row(8, 42), ack_row(9, 42)], 0).await.unwrap();
        store.update_ack(8, 42, 0).await.unwrap();

        let rows = store.ack_rows(0).await;
        let row_8 = rows.iter().find(|r| r.target_node_id == 8).unwrap();
        let row_9 = rows.iter().find(|r| r.target_node_id == 9).unwrap();
        assert!(row_8.acknowledged);
        assert!(!row_9.acknowledged);
    }

    #[tokio::test]
    async fn forced_failure_rejects_insert_invalidations_until_cleared() {
        let store = InMemoryAckStore::new();
        store.set_fail_insert_invalidations(true);
        assert!(store.insert_invalidations(&[], 0).await.is_err());

        store.set_fail_insert_invalidations(false);
        assert!(store.insert_invalidations(&[], 0).await.is_ok());
    }

    #[tokio::test]
    async fn get_pending_acks_excludes_acknowledged_rows() {
        let store = InMemoryAckStore::new();
        store.insert_acks(&[ack_row(8, 42), ack_row(9, 42)], 0).await.unwrap();
        store.update_ack(8, 42, 0).await.unwrap();

        let pending = store.get_pending_acks(7, 0, 0).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].target_node_id, 9);
    }
}
