use std::sync::Arc;

use config::shared::ConnectorConfig;
use tracing::{error, info};

use crate::bail;
use crate::channel::ControlChannel;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::error::{ErrorKind, SinkResult};
use crate::sink_error;
use crate::table::TableCommitter;
use crate::types::{TableName, TopicPartition};
use crate::workers::agent::{AgentHandle, AgentWorker, AgentWorkerHandle};
use crate::workers::base::{Worker, WorkerHandle};
use crate::workers::coordinator::{CoordinatorWorker, CoordinatorWorkerHandle};

#[derive(Debug)]
enum ConnectorState {
    NotStarted,
    Started {
        agent: AgentWorkerHandle,
        coordinator: Option<CoordinatorWorkerHandle>,
    },
}

/// One instance of the table sink connector.
///
/// A connector always runs an agent worker for its own partition slice. The instance
/// owning the lowest partition of the first source topic additionally runs the commit
/// coordinator, so exactly one coordinator is live per connector generation.
#[derive(Debug)]
pub struct Connector<C, T> {
    config: Arc<ConnectorConfig>,
    /// Partitions assigned to this instance.
    own_assignments: Vec<TopicPartition>,
    /// The full assignment across the connector group, as of this generation.
    group_assignments: Vec<TopicPartition>,
    channel: C,
    committer: T,
    state: ConnectorState,
    shutdown_tx: ShutdownTx,
    writer: Option<AgentHandle>,
}

impl<C, T> Connector<C, T>
where
    C: ControlChannel + Clone + Send + Sync + 'static,
    T: TableCommitter + Clone + Send + Sync + 'static,
{
    pub fn new(
        config: ConnectorConfig,
        own_assignments: Vec<TopicPartition>,
        group_assignments: Vec<TopicPartition>,
        channel: C,
        committer: T,
    ) -> Self {
        // The receiver is not kept; workers subscribe through the transmitter.
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            config: Arc::new(config),
            own_assignments,
            group_assignments,
            channel,
            committer,
            state: ConnectorState::NotStarted,
            shutdown_tx,
            writer: None,
        }
    }

    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Starts the connector workers.
    ///
    /// Validates the configuration, spawns the agent worker, and spawns the
    /// coordinator when this instance leads the group.
    pub async fn start(&mut self) -> SinkResult<()> {
        if let ConnectorState::Started { .. } = self.state {
            return Ok(());
        }

        self.config.validate().map_err(|err| {
            sink_error!(
                ErrorKind::ConfigError,
                "Invalid connector configuration",
                source: err
            )
        })?;
        let table_name = TableName::parse(&self.config.table)?;

        for partition in self.own_assignments.iter().chain(&self.group_assignments) {
            if !self.config.topics.contains(&partition.topic) {
                bail!(
                    ErrorKind::ConfigError,
                    "Assignment references a topic outside the configured source topics",
                    partition.to_string()
                );
            }
        }

        info!(
            table = %table_name,
            owned_partitions = self.own_assignments.len(),
            "starting connector"
        );

        let agent = AgentWorker::new(
            self.config.clone(),
            table_name.clone(),
            self.own_assignments.clone(),
            self.channel.clone(),
            self.shutdown_tx.subscribe(),
        );
        let writer = agent.handle();
        let agent = agent.start().await?;

        let coordinator = if leads_group(&self.own_assignments, &self.group_assignments) {
            info!("this instance leads the group, starting the commit coordinator");

            let coordinator = CoordinatorWorker::new(
                self.config.clone(),
                table_name,
                self.group_assignments.clone(),
                self.channel.clone(),
                self.committer.clone(),
                self.shutdown_tx.subscribe(),
            );
            Some(coordinator.start().await?)
        } else {
            None
        };

        self.writer = Some(writer);
        self.state = ConnectorState::Started { agent, coordinator };

        Ok(())
    }

    /// Returns the handle the record-writing layer uses to feed the agent.
    ///
    /// Available once the connector has started.
    pub fn writer(&self) -> Option<AgentHandle> {
        self.writer.clone()
    }

    /// Waits for all workers to complete, aggregating their failures.
    pub async fn wait(self) -> SinkResult<()> {
        let ConnectorState::Started { agent, coordinator } = self.state else {
            info!("connector was not started, nothing to wait for");

            return Ok(());
        };

        let mut errors = vec![];

        info!("waiting for agent worker to complete");
        if let Err(err) = agent.wait().await {
            errors.push(err);
        }

        if let Some(coordinator) = coordinator {
            info!("waiting for coordinator worker to complete");
            if let Err(err) = coordinator.wait().await {
                errors.push(err);
            }
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        Ok(())
    }

    /// Signals every worker of this connector to shut down.
    pub fn shutdown(&self) {
        info!("trying to shut down the connector");

        if let Err(err) = self.shutdown_tx.shutdown() {
            error!("failed to send shutdown signal to the connector: {}", err);
            return;
        }

        info!("shutdown signal successfully sent to all workers");
    }

    /// Shuts the connector down and waits for every worker to finish.
    pub async fn shutdown_and_wait(self) -> SinkResult<()> {
        self.shutdown();
        self.wait().await
    }
}

/// Returns whether the instance owning `own` leads the connector group.
///
/// The leader is the instance owning the lowest partition of the first source topic,
/// which is well defined because assignments order by topic, then partition.
fn leads_group(own: &[TopicPartition], group: &[TopicPartition]) -> bool {
    let Some(first) = group.iter().min() else {
        return false;
    };
    own.contains(first)
}
