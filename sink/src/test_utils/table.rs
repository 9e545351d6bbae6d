use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Notify, RwLock};

use crate::error::{ErrorKind, SinkResult};
use crate::sink_error;
use crate::table::{TableCommit, TableCommitter};
use crate::test_utils::notify::TimedNotify;
use crate::types::{DataFile, TableName, TopicPartition};

type CommitCondition = Box<dyn Fn(&[RecordedCommit]) -> bool + Send + Sync>;

/// One successful commit observed by [`TestCommitterWrapper`].
#[derive(Debug, Clone)]
pub struct RecordedCommit {
    pub snapshot_id: i64,
    pub table: TableName,
    pub data_files: Vec<DataFile>,
    pub offsets: BTreeMap<TopicPartition, i64>,
}

struct Inner<T> {
    wrapped: T,
    commits: Vec<RecordedCommit>,
    commit_attempts: u64,
    scripted_failures: VecDeque<ErrorKind>,
    commit_conditions: Vec<(CommitCondition, Arc<Notify>)>,
}

impl<T> Inner<T> {
    fn check_conditions(&mut self) {
        let commits = self.commits.clone();
        self.commit_conditions.retain(|(condition, notify)| {
            let should_retain = !condition(&commits);
            if !should_retain {
                notify.notify_one();
            }
            should_retain
        });
    }
}

/// Test wrapper for [`TableCommitter`] implementations that tracks every commit.
///
/// Records successful commits and counts attempts, supports waiting for conditions on
/// the recorded commits, and can fail upcoming commits with a scripted error kind to
/// exercise the coordinator's retry path.
#[derive(Clone)]
pub struct TestCommitterWrapper<T> {
    inner: Arc<RwLock<Inner<T>>>,
}

impl<T> TestCommitterWrapper<T> {
    /// Creates a new test wrapper around any committer implementation.
    pub fn wrap(committer: T) -> Self {
        let inner = Inner {
            wrapped: committer,
            commits: Vec::new(),
            commit_attempts: 0,
            scripted_failures: VecDeque::new(),
            commit_conditions: Vec::new(),
        };

        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    /// Returns every successful commit recorded so far, in commit order.
    pub async fn commits(&self) -> Vec<RecordedCommit> {
        self.inner.read().await.commits.clone()
    }

    /// Returns how many commits were attempted, including failed ones.
    pub async fn commit_attempts(&self) -> u64 {
        self.inner.read().await.commit_attempts
    }

    /// Makes the next commit attempt fail with the given error kind.
    ///
    /// Scripted failures queue up: calling this twice fails the next two attempts.
    pub async fn fail_next_commit(&self, kind: ErrorKind) {
        self.inner.write().await.scripted_failures.push_back(kind);
    }

    /// Registers a notification that fires when the recorded commits match a
    /// condition.
    ///
    /// Returns a [`TimedNotify`] so a test that waits on a condition that is never
    /// reached fails fast instead of hanging.
    pub async fn notify_on_commits<F>(&self, condition: F) -> TimedNotify
    where
        F: Fn(&[RecordedCommit]) -> bool + Send + Sync + 'static,
    {
        let notify = Arc::new(Notify::new());
        let mut inner = self.inner.write().await;
        inner
            .commit_conditions
            .push((Box::new(condition), notify.clone()));
        inner.check_conditions();

        TimedNotify::new(notify)
    }
}

impl<T> TableCommitter for TestCommitterWrapper<T>
where
    T: TableCommitter + Send + Sync,
{
    async fn commit(
        &self,
        table: &TableName,
        data_files: Vec<DataFile>,
        offsets: BTreeMap<TopicPartition, i64>,
    ) -> SinkResult<TableCommit> {
        let mut inner = self.inner.write().await;
        inner.commit_attempts += 1;

        if let Some(kind) = inner.scripted_failures.pop_front() {
            return Err(sink_error!(kind, "Scripted commit failure"));
        }

        let commit = inner
            .wrapped
            .commit(table, data_files.clone(), offsets.clone())
            .await?;

        inner.commits.push(RecordedCommit {
            snapshot_id: commit.snapshot_id,
            table: table.clone(),
            data_files,
            offsets,
        });
        inner.check_conditions();

        Ok(commit)
    }
}
