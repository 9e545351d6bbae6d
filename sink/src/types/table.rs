use std::fmt;

use crate::bail;
use crate::error::{ErrorKind, SinkResult};

/// Qualified reference to the target table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub namespace: Vec<String>,
    pub name: String,
}

impl TableName {
    pub fn new(namespace: Vec<String>, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }

    /// Parses a dotted identifier, e.g. `db.events` or `warehouse.db.events`.
    ///
    /// The last segment is the table name, everything before it the namespace.
    pub fn parse(ident: &str) -> SinkResult<TableName> {
        let mut segments: Vec<String> = ident.split('.').map(str::to_string).collect();
        if segments.iter().any(|segment| segment.is_empty()) {
            bail!(
                ErrorKind::ConfigError,
                "Malformed table identifier",
                format!("'{ident}' contains an empty segment")
            );
        }

        let Some(name) = segments.pop() else {
            bail!(
                ErrorKind::ConfigError,
                "Malformed table identifier",
                format!("'{ident}' has no segments")
            );
        };

        Ok(TableName {
            namespace: segments,
            name,
        })
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.namespace {
            write!(f, "{segment}.")?;
        }
        write!(f, "{}", self.name)
    }
}
