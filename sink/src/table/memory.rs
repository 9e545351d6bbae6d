use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::error::SinkResult;
use crate::table::{TableCommit, TableCommitter};
use crate::types::{DataFile, TableName, TopicPartition};

/// One batch committed to a [`MemoryTable`].
#[derive(Debug, Clone)]
pub struct CommittedBatch {
    pub snapshot_id: i64,
    pub table: TableName,
    pub data_files: Vec<DataFile>,
    pub offsets: BTreeMap<TopicPartition, i64>,
}

#[derive(Debug)]
struct Inner {
    batches: Vec<CommittedBatch>,
    next_snapshot_id: i64,
}

/// In-memory table committer for tests and development.
///
/// Records every committed batch and assigns monotonically increasing snapshot ids.
/// All data is held in memory and lost when the process terminates.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTable {
    /// Creates a new empty memory table.
    pub fn new() -> Self {
        let inner = Inner {
            batches: Vec::new(),
            next_snapshot_id: 1,
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Returns a copy of every committed batch, in commit order.
    pub async fn batches(&self) -> Vec<CommittedBatch> {
        let inner = self.inner.lock().await;
        inner.batches.clone()
    }

    /// Returns the highest committed offset per partition across all batches.
    pub async fn current_offsets(&self) -> BTreeMap<TopicPartition, i64> {
        let inner = self.inner.lock().await;

        let mut current = BTreeMap::new();
        for batch in &inner.batches {
            for (partition, offset) in &batch.offsets {
                let entry = current.entry(partition.clone()).or_insert(*offset);
                *entry = (*entry).max(*offset);
            }
        }
        current
    }
}

impl Default for MemoryTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TableCommitter for MemoryTable {
    async fn commit(
        &self,
        table: &TableName,
        data_files: Vec<DataFile>,
        offsets: BTreeMap<TopicPartition, i64>,
    ) -> SinkResult<TableCommit> {
        let mut inner = self.inner.lock().await;

        let snapshot_id = inner.next_snapshot_id;
        inner.next_snapshot_id += 1;

        info!(
            table = %table,
            snapshot_id,
            data_files = data_files.len(),
            "appending data files to memory table"
        );

        inner.batches.push(CommittedBatch {
            snapshot_id,
            table: table.clone(),
            data_files,
            offsets,
        });

        Ok(TableCommit { snapshot_id })
    }
}
