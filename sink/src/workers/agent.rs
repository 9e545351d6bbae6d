use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use config::shared::ConnectorConfig;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use crate::bail;
use crate::channel::{ChannelMessage, ChannelSubscription, ControlChannel};
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, SinkResult};
use crate::events::{CommitResponse, Event, Payload};
use crate::sink_error;
use crate::types::{DataFile, OffsetEntry, TableName, TopicPartition};
use crate::workers::base::{Worker, WorkerHandle};

/// How many answered commit ids the agent remembers for deduplicating re-delivered
/// requests.
const ANSWERED_WINDOW: usize = 16;

/// Commands the record-writing layer sends into the agent.
#[derive(Debug)]
enum AgentCommand {
    FilesWritten {
        partition: TopicPartition,
        files: Vec<DataFile>,
        last_offset: i64,
    },
    AssignmentsChanged {
        assignments: Vec<TopicPartition>,
    },
}

/// Cloneable handle for feeding the agent from the record-writing layer.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    command_tx: mpsc::Sender<AgentCommand>,
}

impl AgentHandle {
    /// Reports data files written for one owned partition, together with the highest
    /// source offset they cover.
    pub async fn files_written(
        &self,
        partition: TopicPartition,
        files: Vec<DataFile>,
        last_offset: i64,
    ) -> SinkResult<()> {
        self.send(AgentCommand::FilesWritten {
            partition,
            files,
            last_offset,
        })
        .await
    }

    /// Replaces the agent's partition assignment after a rebalance.
    pub async fn assignments_changed(
        &self,
        assignments: Vec<TopicPartition>,
    ) -> SinkResult<()> {
        self.send(AgentCommand::AssignmentsChanged { assignments })
            .await
    }

    async fn send(&self, command: AgentCommand) -> SinkResult<()> {
        self.command_tx.send(command).await.map_err(|_| {
            sink_error!(
                ErrorKind::InvalidState,
                "Agent worker is no longer running"
            )
        })
    }
}

/// Handle for monitoring the agent worker.
#[derive(Debug)]
pub struct AgentWorkerHandle {
    handle: Option<JoinHandle<SinkResult<()>>>,
}

impl WorkerHandle for AgentWorkerHandle {
    /// Waits for the agent worker to complete execution, mapping panics and
    /// cancellations of the underlying task to classified errors.
    async fn wait(mut self) -> SinkResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle.await.map_err(|err| {
            if err.is_cancelled() {
                sink_error!(
                    ErrorKind::AgentCancelled,
                    "Agent worker was cancelled",
                    source: err
                )
            } else {
                sink_error!(ErrorKind::AgentPanic, "Agent worker panicked", source: err)
            }
        })??;

        Ok(())
    }
}

/// Per-instance participant of the commit protocol.
///
/// [`AgentWorker`] buffers locally produced data-file descriptors per owned partition,
/// tracks consumed-offset watermarks and answers every new commit request with the
/// full pending state. Buffers are cleared speculatively on hand-off: from that moment
/// the descriptors are the coordinator's responsibility until a completion or a failed
/// cycle re-offers them. The agent never waits for a completion; it keeps consuming
/// input immediately after responding.
#[derive(Debug)]
pub struct AgentWorker<C> {
    config: Arc<ConnectorConfig>,
    table_name: TableName,
    channel: C,
    shutdown_rx: ShutdownRx,
    command_tx: mpsc::Sender<AgentCommand>,
    command_rx: mpsc::Receiver<AgentCommand>,
    state: AgentState,
}

#[derive(Debug)]
struct AgentState {
    assignments: BTreeSet<TopicPartition>,
    pending: BTreeMap<TopicPartition, Vec<DataFile>>,
    offsets: BTreeMap<TopicPartition, i64>,
    answered: VecDeque<Uuid>,
}

impl<C> AgentWorker<C> {
    pub fn new(
        config: Arc<ConnectorConfig>,
        table_name: TableName,
        assignments: Vec<TopicPartition>,
        channel: C,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(128);

        let assignments: BTreeSet<TopicPartition> = assignments.into_iter().collect();
        let pending = assignments
            .iter()
            .map(|partition| (partition.clone(), Vec::new()))
            .collect();

        Self {
            config,
            table_name,
            channel,
            shutdown_rx,
            command_tx,
            command_rx,
            state: AgentState {
                assignments,
                pending,
                offsets: BTreeMap::new(),
                answered: VecDeque::new(),
            },
        }
    }

    /// Returns a handle for feeding the agent. Valid before and after start.
    pub fn handle(&self) -> AgentHandle {
        AgentHandle {
            command_tx: self.command_tx.clone(),
        }
    }
}

impl<C> Worker<AgentWorkerHandle> for AgentWorker<C>
where
    C: ControlChannel + Send + Sync + 'static,
{
    /// Spawns the agent worker and returns a handle for monitoring.
    async fn start(self) -> SinkResult<AgentWorkerHandle> {
        info!("starting agent worker");

        let span = tracing::info_span!(
            "agent_worker",
            table = %self.table_name,
            txn_suffix = self.config.transactional_suffix
        );
        let agent = async move {
            let subscription = self.channel.subscribe().await?;
            run_agent_loop(
                self.config,
                self.table_name,
                self.channel,
                self.command_rx,
                self.shutdown_rx,
                self.state,
                subscription,
            )
            .await?;

            info!("agent worker completed successfully");

            Ok(())
        }
        .instrument(span.or_current());

        let handle = tokio::spawn(agent);

        Ok(AgentWorkerHandle {
            handle: Some(handle),
        })
    }
}

async fn run_agent_loop<C, S>(
    config: Arc<ConnectorConfig>,
    table_name: TableName,
    channel: C,
    mut command_rx: mpsc::Receiver<AgentCommand>,
    mut shutdown_rx: ShutdownRx,
    mut state: AgentState,
    mut subscription: S,
) -> SinkResult<()>
where
    C: ControlChannel + Send + Sync + 'static,
    S: ChannelSubscription + Send + 'static,
{
    let mut commands_open = true;

    loop {
        // Shutdown first; locally produced files are ingested before a commit
        // request is answered, so a request never misses files written before it.
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                info!("shutting down agent worker");
                break;
            }
            command = command_rx.recv(), if commands_open => {
                match command {
                    Some(command) => on_command(&mut state, command),
                    // All handles dropped; the agent keeps serving the protocol.
                    None => commands_open = false,
                }
            }
            message = subscription.next_message() => {
                let Some(message) = message else {
                    bail!(
                        ErrorKind::InvalidState,
                        "Control channel subscription ended while the agent was running"
                    );
                };
                on_message(&config, &table_name, &channel, &mut state, message).await?;
            }
        }
    }

    Ok(())
}

fn on_command(state: &mut AgentState, command: AgentCommand) {
    match command {
        AgentCommand::FilesWritten {
            partition,
            files,
            last_offset,
        } => {
            if !state.assignments.contains(&partition) {
                warn!(
                    partition = %partition,
                    files = files.len(),
                    "dropping data files for unowned partition"
                );
                return;
            }

            state.pending.entry(partition.clone()).or_default().extend(files);

            let watermark = state.offsets.entry(partition).or_insert(last_offset);
            *watermark = (*watermark).max(last_offset);
        }
        AgentCommand::AssignmentsChanged { assignments } => {
            let next: BTreeSet<TopicPartition> = assignments.into_iter().collect();

            for partition in state.assignments.difference(&next) {
                let buffered = state
                    .pending
                    .get(partition)
                    .map(Vec::len)
                    .unwrap_or_default();
                if buffered > 0 {
                    warn!(
                        partition = %partition,
                        buffered,
                        "dropping pending data files for revoked partition"
                    );
                }
            }
            state.pending.retain(|partition, _| next.contains(partition));
            state.offsets.retain(|partition, _| next.contains(partition));
            for partition in &next {
                state.pending.entry(partition.clone()).or_default();
            }

            info!(owned = next.len(), "partition assignments updated");
            state.assignments = next;
        }
    }
}

async fn on_message<C>(
    config: &ConnectorConfig,
    table_name: &TableName,
    channel: &C,
    state: &mut AgentState,
    message: ChannelMessage,
) -> SinkResult<()>
where
    C: ControlChannel,
{
    match message.event.payload() {
        Payload::CommitRequest(request) => {
            if !request
                .commit_id
                .same_generation(&config.transactional_suffix)
            {
                debug!(
                    commit_id = %request.commit_id,
                    "ignoring commit request from another generation"
                );
                return Ok(());
            }
            if state.answered.contains(&request.commit_id.id) {
                debug!(
                    commit_id = %request.commit_id,
                    "ignoring re-delivered commit request"
                );
                return Ok(());
            }

            let data_files: Vec<DataFile> = state
                .pending
                .values_mut()
                .flat_map(std::mem::take)
                .collect();
            let assignments: Vec<TopicPartition> =
                state.assignments.iter().cloned().collect();
            let offsets: Vec<OffsetEntry> = state
                .offsets
                .iter()
                .map(|(partition, offset)| {
                    OffsetEntry::new(partition.topic.clone(), partition.partition, *offset)
                })
                .collect();

            info!(
                commit_id = %request.commit_id,
                data_files = data_files.len(),
                partitions = assignments.len(),
                "answering commit request"
            );

            let response = Event::new(Payload::CommitResponse(CommitResponse {
                commit_id: request.commit_id.clone(),
                table_name: table_name.clone(),
                data_files,
                assignments,
                offsets: Some(offsets),
            }));
            channel
                .publish(&config.control.group_id, &response)
                .await?;

            state.answered.push_back(request.commit_id.id);
            while state.answered.len() > ANSWERED_WINDOW {
                state.answered.pop_front();
            }
        }
        Payload::CommitComplete(complete) => {
            if !complete
                .commit_id
                .same_generation(&config.transactional_suffix)
            {
                debug!(
                    commit_id = %complete.commit_id,
                    "ignoring commit completion from another generation"
                );
                return Ok(());
            }

            info!(
                commit_id = %complete.commit_id,
                snapshot_id = complete.snapshot_id,
                offsets = complete.offsets.len(),
                "commit cycle completed, offsets are durable"
            );
            state
                .answered
                .retain(|answered| *answered != complete.commit_id.id);
        }
        // Responses from other workers are not the agent's concern.
        Payload::CommitResponse(_) => {}
    }

    Ok(())
}
