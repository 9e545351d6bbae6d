use std::collections::BTreeMap;
use std::future::Future;

use crate::error::SinkResult;
use crate::types::{DataFile, TableName, TopicPartition};

/// Outcome of one atomic table append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCommit {
    /// Snapshot produced by the commit.
    pub snapshot_id: i64,
}

/// Trait for the storage collaborator performing atomic appends of data-file
/// manifests.
///
/// Implementations must be all-or-nothing: either every data file becomes visible
/// together with the recorded offsets, or nothing does. The error kind distinguishes
/// why an append was rejected, and the coordinator dispatches on it:
///
/// - [`ErrorKind::CommitConflict`] — the table changed concurrently and the append's
///   precondition is stale; retried on the next cycle.
/// - [`ErrorKind::StorageIo`] — transient storage failure; also retried on the next
///   cycle.
/// - anything else is treated as fatal to the coordinator.
///
/// [`ErrorKind::CommitConflict`]: crate::error::ErrorKind::CommitConflict
/// [`ErrorKind::StorageIo`]: crate::error::ErrorKind::StorageIo
pub trait TableCommitter {
    /// Atomically appends `data_files` to `table`, recording `offsets` as the consumed
    /// position the commit corresponds to.
    fn commit(
        &self,
        table: &TableName,
        data_files: Vec<DataFile>,
        offsets: BTreeMap<TopicPartition, i64>,
    ) -> impl Future<Output = SinkResult<TableCommit>> + Send;
}
