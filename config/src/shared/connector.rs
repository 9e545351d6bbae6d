use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

const fn default_control_partitions() -> u16 {
    1
}

const fn default_control_replication() -> u16 {
    1
}

const fn default_auto_create() -> bool {
    false
}

const fn default_commit_interval_ms() -> u64 {
    60_000
}

const fn default_commit_timeout_ms() -> u64 {
    30_000
}

/// Settings for the control channel carrying coordinator and worker messages.
///
/// The control channel is separate from the source topics that carry business data. It
/// only transports coordination events, so a single partition is enough for most
/// deployments and is the default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ControlChannelConfig {
    /// Name of the control channel.
    pub name: String,
    /// Number of partitions to use when automatically creating the control channel.
    #[serde(default = "default_control_partitions")]
    pub partitions: u16,
    /// Replication factor to use when automatically creating the control channel.
    #[serde(default = "default_control_replication")]
    pub replication: u16,
    /// Name of the consumer group under which control channel offsets are tracked.
    pub group_id: String,
    /// Whether to automatically create the control channel when it is missing.
    #[serde(default = "default_auto_create")]
    pub auto_create: bool,
}

/// Configuration for a table sink connector.
///
/// Contains all settings required to run the commit coordination protocol: the target
/// table, the source topics covered by the connector group, the control channel, and
/// the commit cycle timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConnectorConfig {
    /// Qualified identifier of the target table, e.g. `db.events`.
    pub table: String,
    /// Source topics whose records are written into the target table.
    pub topics: Vec<String>,
    /// Control channel settings.
    pub control: ControlChannelConfig,
    /// Coordinator interval for performing table commits, in millis.
    #[serde(default = "default_commit_interval_ms")]
    pub commit_interval_ms: u64,
    /// Coordinator time to wait for worker responses before committing, in millis.
    #[serde(default = "default_commit_timeout_ms")]
    pub commit_timeout_ms: u64,
    /// Per-deployment suffix embedded in coordination identifiers.
    ///
    /// Messages from a previous connector generation carry a different suffix and are
    /// discarded, so a coordinator that survived a redeploy cannot finalize a commit
    /// against the new generation's workers.
    #[serde(default)]
    pub transactional_suffix: String,
}

impl ConnectorConfig {
    /// Returns the commit interval as a [`Duration`].
    pub fn commit_interval(&self) -> Duration {
        Duration::from_millis(self.commit_interval_ms)
    }

    /// Returns the commit timeout as a [`Duration`].
    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }

    /// Validates the configuration, returning the first offending value.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.table.is_empty() {
            return Err(ValidationError::MissingTable);
        }
        if self.table.split('.').any(|segment| segment.is_empty()) {
            return Err(ValidationError::MalformedTable(self.table.clone()));
        }
        if self.topics.is_empty() {
            return Err(ValidationError::MissingTopics);
        }
        if self.control.name.is_empty() {
            return Err(ValidationError::MissingControlChannel);
        }
        if self.control.group_id.is_empty() {
            return Err(ValidationError::MissingControlGroup);
        }
        if self.control.partitions == 0 {
            return Err(ValidationError::NoControlPartitions);
        }
        if self.commit_interval_ms == 0 {
            return Err(ValidationError::ZeroCommitInterval);
        }
        if self.commit_timeout_ms == 0 {
            return Err(ValidationError::ZeroCommitTimeout);
        }

        Ok(())
    }
}
