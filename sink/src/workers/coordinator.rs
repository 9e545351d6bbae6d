use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use config::shared::ConnectorConfig;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{Instrument, debug, error, info, warn};

use crate::bail;
use crate::channel::{ChannelMessage, ChannelSubscription, ControlChannel};
use crate::concurrency::shutdown::ShutdownRx;
use crate::concurrency::timer::Deadline;
use crate::error::{ErrorKind, SinkResult};
use crate::events::{CommitComplete, CommitRequest, CommitResponse, Event, Payload};
use crate::sink_error;
use crate::table::TableCommitter;
use crate::types::{CommitId, DataFile, OffsetEntry, TableName, TopicPartition};
use crate::workers::base::{Worker, WorkerHandle};

/// Handle for monitoring the coordinator worker.
#[derive(Debug)]
pub struct CoordinatorWorkerHandle {
    handle: Option<JoinHandle<SinkResult<()>>>,
}

impl WorkerHandle for CoordinatorWorkerHandle {
    /// Waits for the coordinator worker to complete execution.
    ///
    /// Blocks until the worker finishes due to shutdown or error, mapping panics and
    /// cancellations of the underlying task to classified errors.
    async fn wait(mut self) -> SinkResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle.await.map_err(|err| {
            if err.is_cancelled() {
                sink_error!(
                    ErrorKind::CoordinatorCancelled,
                    "Coordinator worker was cancelled",
                    source: err
                )
            } else {
                sink_error!(
                    ErrorKind::CoordinatorPanic,
                    "Coordinator worker panicked",
                    source: err
                )
            }
        })??;

        Ok(())
    }
}

/// Singleton-per-generation coordinator of the commit protocol.
///
/// [`CoordinatorWorker`] periodically broadcasts a commit request, collects the
/// responses workers send back within a bounded window, merges them into one batch and
/// performs a single atomic table commit per cycle. Cycles are strictly sequential: a
/// new request is never issued while a previous cycle is still committing.
///
/// The expected assignments are the group-wide partition assignment as of worker
/// start; a rebalance starts a new connector generation with a fresh coordinator.
#[derive(Debug)]
pub struct CoordinatorWorker<C, T> {
    config: Arc<ConnectorConfig>,
    table_name: TableName,
    expected_assignments: Vec<TopicPartition>,
    channel: C,
    committer: T,
    shutdown_rx: ShutdownRx,
}

impl<C, T> CoordinatorWorker<C, T> {
    pub fn new(
        config: Arc<ConnectorConfig>,
        table_name: TableName,
        expected_assignments: Vec<TopicPartition>,
        channel: C,
        committer: T,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            config,
            table_name,
            expected_assignments,
            channel,
            committer,
            shutdown_rx,
        }
    }
}

impl<C, T> Worker<CoordinatorWorkerHandle> for CoordinatorWorker<C, T>
where
    C: ControlChannel + Send + Sync + 'static,
    T: TableCommitter + Send + Sync + 'static,
{
    /// Spawns the coordinator worker and returns a handle for monitoring.
    async fn start(self) -> SinkResult<CoordinatorWorkerHandle> {
        info!("starting coordinator worker");

        let span = tracing::info_span!(
            "coordinator_worker",
            table = %self.table_name,
            txn_suffix = self.config.transactional_suffix
        );
        let coordinator = async move {
            let subscription = self.channel.subscribe().await?;

            let cycles = CycleDriver {
                config: self.config,
                table_name: self.table_name,
                expected_assignments: self.expected_assignments.into_iter().collect(),
                channel: self.channel,
                committer: self.committer,
                state: CycleState::Idle,
                carryover: Vec::new(),
            };
            cycles.run(subscription, self.shutdown_rx).await?;

            info!("coordinator worker completed successfully");

            Ok(())
        }
        .instrument(span.or_current());

        let handle = tokio::spawn(coordinator);

        Ok(CoordinatorWorkerHandle {
            handle: Some(handle),
        })
    }
}

/// Explicit commit-cycle state machine value, owned by the coordinator task.
#[derive(Debug)]
enum CycleState {
    /// No cycle open; waiting for the commit interval to elapse.
    Idle,
    /// A commit request is out and responses are being collected.
    Soliciting(OpenCycle),
}

/// A commit cycle between the request broadcast and its resolution.
#[derive(Debug)]
struct OpenCycle {
    commit_id: CommitId,
    /// Which partitions are covered, and the channel offset of the claiming response.
    covered: BTreeMap<TopicPartition, i64>,
    contributions: Vec<Contribution>,
}

/// One worker response merged into a cycle.
#[derive(Debug)]
struct Contribution {
    log_offset: i64,
    assignments: Vec<TopicPartition>,
    data_files: Vec<DataFile>,
    offsets: Vec<OffsetEntry>,
}

/// The coordinator main loop and its cycle state.
#[derive(Debug)]
struct CycleDriver<C, T> {
    config: Arc<ConnectorConfig>,
    table_name: TableName,
    expected_assignments: BTreeSet<TopicPartition>,
    channel: C,
    committer: T,
    state: CycleState,
    /// Contributions merged in an earlier cycle whose table commit failed. Folded into
    /// the next commit so descriptors are never dropped.
    carryover: Vec<Contribution>,
}

impl<C, T> CycleDriver<C, T>
where
    C: ControlChannel + Send + Sync + 'static,
    T: TableCommitter + Send + Sync + 'static,
{
    async fn run(
        mut self,
        mut subscription: C::Subscription,
        mut shutdown_rx: ShutdownRx,
    ) -> SinkResult<()> {
        let period = self.config.commit_interval();
        let mut tick = interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut deadline = Deadline::new(self.config.commit_timeout());

        loop {
            // Shutdown first; responses already delivered are merged before the
            // deadline declares the window closed.
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("shutting down coordinator worker");
                    break;
                }
                _ = tick.tick() => {
                    self.on_interval(&mut deadline).await?;
                }
                message = subscription.next_message() => {
                    let Some(message) = message else {
                        bail!(
                            ErrorKind::InvalidState,
                            "Control channel subscription ended while the coordinator was running"
                        );
                    };
                    self.on_message(message, &mut deadline).await?;
                }
                _ = &mut deadline => {
                    self.on_deadline(&mut deadline).await?;
                }
            }
        }

        Ok(())
    }

    /// Opens a new commit cycle, unless one is still in flight.
    async fn on_interval(&mut self, deadline: &mut Deadline) -> SinkResult<()> {
        if let CycleState::Soliciting(cycle) = &self.state {
            // Cycles are strictly sequential; the open one resolves via coverage or
            // its deadline before another request goes out.
            warn!(
                commit_id = %cycle.commit_id,
                "commit interval elapsed with a cycle still open, skipping this tick"
            );
            return Ok(());
        }

        let commit_id = CommitId::generate(self.config.transactional_suffix.as_str());
        info!(commit_id = %commit_id, "opening commit cycle");

        let request = Event::new(Payload::CommitRequest(CommitRequest {
            commit_id: commit_id.clone(),
        }));
        self.channel
            .publish(&self.config.control.group_id, &request)
            .await?;

        self.state = CycleState::Soliciting(OpenCycle {
            commit_id,
            covered: BTreeMap::new(),
            contributions: Vec::new(),
        });
        deadline.arm();

        Ok(())
    }

    /// Commits whatever coverage the open cycle reached when its deadline fires.
    async fn on_deadline(&mut self, deadline: &mut Deadline) -> SinkResult<()> {
        let CycleState::Soliciting(cycle) = &self.state else {
            return Ok(());
        };

        info!(
            commit_id = %cycle.commit_id,
            covered = cycle.covered.len(),
            expected = self.expected_assignments.len(),
            "commit timeout elapsed, committing partial coverage"
        );

        self.finish_cycle(deadline).await
    }

    async fn on_message(
        &mut self,
        message: ChannelMessage,
        deadline: &mut Deadline,
    ) -> SinkResult<()> {
        let Payload::CommitResponse(response) = message.event.payload() else {
            // Our own requests and completions come back through the broadcast log.
            return Ok(());
        };

        let CycleState::Soliciting(cycle) = &mut self.state else {
            debug!(
                commit_id = %response.commit_id,
                "discarding commit response, no cycle is open"
            );
            return Ok(());
        };

        if response.commit_id != cycle.commit_id {
            // Stale cycle or superseded generation; either way the response is not
            // addressed to the open cycle.
            debug!(
                received = %response.commit_id,
                open = %cycle.commit_id,
                "discarding stale commit response"
            );
            return Ok(());
        }

        merge_response(cycle, message.offset, response);

        let complete = self
            .expected_assignments
            .iter()
            .all(|partition| cycle.covered.contains_key(partition));
        if complete {
            info!(
                commit_id = %cycle.commit_id,
                "all expected assignments covered, committing early"
            );
            self.finish_cycle(deadline).await?;
        }

        Ok(())
    }

    /// Resolves the open cycle: merges contributions, performs the table commit and
    /// broadcasts the completion.
    async fn finish_cycle(&mut self, deadline: &mut Deadline) -> SinkResult<()> {
        deadline.clear();

        let CycleState::Soliciting(cycle) = std::mem::replace(&mut self.state, CycleState::Idle)
        else {
            return Ok(());
        };

        let mut pending: Vec<Contribution> = self.carryover.drain(..).collect();
        pending.extend(cycle.contributions);

        let data_files: Vec<DataFile> = pending
            .iter()
            .flat_map(|contribution| contribution.data_files.iter().cloned())
            .collect();
        if data_files.is_empty() {
            info!(commit_id = %cycle.commit_id, "no data files to commit, skipping table commit");
            return Ok(());
        }

        let mut offsets: BTreeMap<TopicPartition, i64> = BTreeMap::new();
        for contribution in &pending {
            for entry in &contribution.offsets {
                let slot = offsets.entry(entry.topic_partition()).or_insert(entry.offset);
                *slot = (*slot).max(entry.offset);
            }
        }

        info!(
            commit_id = %cycle.commit_id,
            data_files = data_files.len(),
            partitions = offsets.len(),
            "committing data files"
        );

        match self
            .committer
            .commit(&self.table_name, data_files, offsets.clone())
            .await
        {
            Ok(commit) => {
                info!(
                    commit_id = %cycle.commit_id,
                    snapshot_id = commit.snapshot_id,
                    "table commit succeeded"
                );

                let complete = Event::new(Payload::CommitComplete(CommitComplete {
                    commit_id: cycle.commit_id,
                    snapshot_id: Some(commit.snapshot_id),
                    offsets: offsets
                        .into_iter()
                        .map(|(partition, offset)| {
                            OffsetEntry::new(partition.topic, partition.partition, offset)
                        })
                        .collect(),
                }));
                self.channel
                    .publish(&self.config.control.group_id, &complete)
                    .await?;
            }
            Err(err)
                if matches!(err.kind(), ErrorKind::CommitConflict | ErrorKind::StorageIo) =>
            {
                // Offsets do not advance and no completion is broadcast; the merged
                // files are re-offered on the next cycle.
                error!(
                    commit_id = %cycle.commit_id,
                    error = %err,
                    "table commit failed, retrying on the next cycle"
                );
                self.carryover = pending;
            }
            Err(err) => return Err(err),
        }

        Ok(())
    }
}

/// Merges a response into the open cycle.
///
/// Overlapping assignments signal a rebalance race between workers; the claim made at
/// the later channel offset wins. A response's files are one indivisible claim over
/// its assignment set, so a losing contribution is evicted wholesale.
fn merge_response(cycle: &mut OpenCycle, log_offset: i64, response: &CommitResponse) {
    let overlapping: Vec<TopicPartition> = response
        .assignments
        .iter()
        .filter(|partition| cycle.covered.contains_key(*partition))
        .cloned()
        .collect();

    if !overlapping.is_empty() {
        let lost_to_earlier = overlapping
            .iter()
            .any(|partition| cycle.covered[partition] > log_offset);
        if lost_to_earlier {
            warn!(
                commit_id = %cycle.commit_id,
                partitions = ?overlapping,
                "overlapping assignments in commit responses, keeping the earlier claim \
                 made at a later log offset"
            );
            return;
        }

        warn!(
            commit_id = %cycle.commit_id,
            partitions = ?overlapping,
            "overlapping assignments in commit responses, keeping the later response"
        );

        cycle.contributions.retain(|contribution| {
            !contribution
                .assignments
                .iter()
                .any(|partition| overlapping.contains(partition))
        });

        // Evicted contributions may have covered partitions outside the overlap;
        // rebuild coverage from what survived.
        cycle.covered.clear();
        for contribution in &cycle.contributions {
            for partition in &contribution.assignments {
                cycle
                    .covered
                    .insert(partition.clone(), contribution.log_offset);
            }
        }
    }

    for partition in &response.assignments {
        cycle.covered.insert(partition.clone(), log_offset);
    }
    cycle.contributions.push(Contribution {
        log_offset,
        assignments: response.assignments.clone(),
        data_files: response.data_files.clone(),
        offsets: response.offsets.clone().unwrap_or_default(),
    });

    info!(
        commit_id = %cycle.commit_id,
        data_files = cycle
            .contributions
            .iter()
            .map(|contribution| contribution.data_files.len())
            .sum::<usize>(),
        covered = cycle.covered.len(),
        "merged commit response"
    );
}
