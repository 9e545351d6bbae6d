use crate::events::EventType;
use crate::types::{CommitId, DataFile, OffsetEntry, TableName, TopicPartition};

/// Closed tagged union of control-channel message bodies.
///
/// Each variant is independently schema-versioned on the wire; see the field-id tables
/// in the codec. Matching on the union is exhaustive, so adding a variant forces every
/// consumer site to decide how to handle it.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    CommitRequest(CommitRequest),
    CommitResponse(CommitResponse),
    CommitComplete(CommitComplete),
}

impl Payload {
    /// Returns the event type tag of this variant.
    pub fn event_type(&self) -> EventType {
        match self {
            Payload::CommitRequest(_) => EventType::CommitRequest,
            Payload::CommitResponse(_) => EventType::CommitResponse,
            Payload::CommitComplete(_) => EventType::CommitComplete,
        }
    }

    /// Returns the commit cycle this message belongs to. Every variant carries one.
    pub fn commit_id(&self) -> &CommitId {
        match self {
            Payload::CommitRequest(request) => &request.commit_id,
            Payload::CommitResponse(response) => &response.commit_id,
            Payload::CommitComplete(complete) => &complete.commit_id,
        }
    }
}

/// Coordinator broadcast opening a commit cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitRequest {
    pub commit_id: CommitId,
}

/// Worker reply carrying everything accumulated since the last hand-off.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitResponse {
    pub commit_id: CommitId,
    pub table_name: TableName,
    /// Data files produced for the partitions in `assignments`.
    pub data_files: Vec<DataFile>,
    /// Source partitions this response covers. Disjoint across the responses the
    /// coordinator merges into one cycle; an overlap signals a rebalance race.
    pub assignments: Vec<TopicPartition>,
    /// Consumed offsets per covered partition.
    ///
    /// Added in a later format revision; `None` means the response was produced by an
    /// older worker that does not report offsets.
    pub offsets: Option<Vec<OffsetEntry>>,
}

/// Coordinator broadcast closing a cycle after a successful table commit.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitComplete {
    pub commit_id: CommitId,
    /// Snapshot produced by the table commit, when the storage target reports one.
    pub snapshot_id: Option<i64>,
    /// Offsets made durable by the commit; workers and downstream readers can advance
    /// past these safely.
    pub offsets: Vec<OffsetEntry>,
}
