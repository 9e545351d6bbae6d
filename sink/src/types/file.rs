/// Reference to one unit of written data, handed from a worker to the coordinator.
///
/// Beyond the fields needed for logging and bookkeeping the descriptor is opaque to the
/// coordination layer: it is carried through the protocol and into the table commit
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    /// Storage path of the written file.
    pub path: String,
    /// File format, e.g. `parquet`.
    pub format: String,
    /// Number of records in the file.
    pub record_count: i64,
    /// File size in bytes.
    pub file_size_bytes: i64,
    /// Rendered partition values of the file.
    pub partition: Vec<String>,
}
