use std::fmt;

use uuid::Uuid;

/// Identifier of one commit cycle.
///
/// The per-generation transactional suffix travels next to the random id, so every
/// message referencing a cycle carries its own validity context: a coordinator that
/// survived a redeploy produces identifiers the new generation's workers will not
/// answer, and its leftover completions are discarded on sight.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitId {
    pub id: Uuid,
    pub txn_suffix: String,
}

impl CommitId {
    /// Generates a fresh identifier for the given generation.
    pub fn generate(txn_suffix: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            txn_suffix: txn_suffix.into(),
        }
    }

    /// Returns whether this identifier belongs to the generation with `txn_suffix`.
    pub fn same_generation(&self, txn_suffix: &str) -> bool {
        self.txn_suffix == txn_suffix
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)?;
        if !self.txn_suffix.is_empty() {
            write!(f, "-{}", self.txn_suffix)?;
        }
        Ok(())
    }
}
