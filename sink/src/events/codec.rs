//! Wire codec for control-channel events.
//!
//! Each event is a length-prefixed record: a `u32` big-endian body length followed by
//! the body. A record body is a sequence of fields, each tagged with a stable numeric
//! identifier (`u16`) and a `u32` value length. Identifiers are assigned once and never
//! reused, which is what makes adding a field always compatible in both directions:
//!
//! - a decoder encountering an unrecognized field identifier skips it via the length,
//! - a decoder encountering a record lacking a newer field identifier treats the field
//!   as absent, never as an error.
//!
//! Value encodings: uuid = 16 bytes, `i32`/`i64` = 4/8 bytes big-endian, string =
//! UTF-8, nested record = its own field sequence, list = `u32` element count followed
//! by length-prefixed elements.
//!
//! Undecodable bytes and unknown top-level type tags surface as
//! [`ErrorKind::MalformedEnvelope`]; the channel adapter owns the skip-and-log policy,
//! so a bad frame never aborts the consuming stream.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::bail;
use crate::error::{ErrorKind, SinkResult};
use crate::events::{CommitComplete, CommitRequest, CommitResponse, Event, EventType, Payload};
use crate::types::{CommitId, DataFile, OffsetEntry, TableName, TopicPartition};

/// Stable field identifiers, assigned once and never reused.
mod field {
    pub const EVENT_ID: u16 = 1;
    pub const EVENT_TYPE: u16 = 2;
    pub const EVENT_TIMESTAMP: u16 = 3;
    pub const EVENT_PAYLOAD: u16 = 4;

    pub const COMMIT_ID_ID: u16 = 1;
    pub const COMMIT_ID_TXN_SUFFIX: u16 = 2;

    pub const REQUEST_COMMIT_ID: u16 = 50;

    pub const RESPONSE_COMMIT_ID: u16 = 60;
    pub const RESPONSE_TABLE_NAME: u16 = 61;
    pub const RESPONSE_DATA_FILES: u16 = 62;
    pub const RESPONSE_ASSIGNMENTS: u16 = 63;
    // Added in format revision 2; older producers do not write it.
    pub const RESPONSE_OFFSETS: u16 = 64;

    pub const COMPLETE_COMMIT_ID: u16 = 80;
    pub const COMPLETE_SNAPSHOT_ID: u16 = 81;
    pub const COMPLETE_OFFSETS: u16 = 82;

    pub const TABLE_NAMESPACE: u16 = 1;
    pub const TABLE_NAME: u16 = 2;

    pub const FILE_PATH: u16 = 1;
    pub const FILE_FORMAT: u16 = 2;
    pub const FILE_RECORD_COUNT: u16 = 3;
    pub const FILE_SIZE_BYTES: u16 = 4;
    pub const FILE_PARTITION: u16 = 5;

    pub const PARTITION_TOPIC: u16 = 1;
    pub const PARTITION_INDEX: u16 = 2;

    pub const OFFSET_TOPIC: u16 = 1;
    pub const OFFSET_PARTITION: u16 = 2;
    pub const OFFSET_VALUE: u16 = 3;
}

/// Function decoding one payload record body into its [`Payload`] variant.
pub type PayloadDecoder = fn(&[u8]) -> SinkResult<Payload>;

/// Resolves a top-level event type tag to the decoder for that payload's schema.
///
/// The registry ships with every payload schema this crate knows about. A tag without
/// a registered decoder comes from a newer producer; resolution failure surfaces as
/// [`ErrorKind::MalformedEnvelope`] so the channel adapter can skip the message
/// without tearing down the stream.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    decoders: HashMap<i32, PayloadDecoder>,
}

impl SchemaRegistry {
    /// Creates a registry with the built-in payload schemas.
    pub fn new() -> Self {
        let mut decoders: HashMap<i32, PayloadDecoder> = HashMap::new();
        decoders.insert(EventType::CommitRequest.tag(), decode_commit_request);
        decoders.insert(EventType::CommitResponse.tag(), decode_commit_response);
        decoders.insert(EventType::CommitComplete.tag(), decode_commit_complete);

        Self { decoders }
    }

    /// Registers or replaces the decoder for `tag`.
    pub fn register(&mut self, tag: i32, decoder: PayloadDecoder) {
        self.decoders.insert(tag, decoder);
    }

    fn resolve(&self, tag: i32) -> Option<PayloadDecoder> {
        self.decoders.get(&tag).copied()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Event {
    /// Encodes this event as a length-prefixed record.
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::new();
        put_uuid_field(&mut body, field::EVENT_ID, &self.id());
        put_i32_field(&mut body, field::EVENT_TYPE, self.event_type().tag());
        put_i64_field(&mut body, field::EVENT_TIMESTAMP, self.timestamp_ms());
        put_field(&mut body, field::EVENT_PAYLOAD, &encode_payload(self.payload()));

        let mut framed = BytesMut::with_capacity(4 + body.len());
        framed.put_u32(body.len() as u32);
        framed.put_slice(&body);
        framed.freeze()
    }

    /// Decodes a length-prefixed frame into an event.
    ///
    /// The registry resolves the top-level type tag to the payload decoder. All
    /// failures, including an unknown tag, surface as
    /// [`ErrorKind::MalformedEnvelope`]; the caller decides between skip-and-log and
    /// fatal.
    pub fn decode(mut frame: &[u8], registry: &SchemaRegistry) -> SinkResult<Event> {
        if frame.len() < 4 {
            bail!(ErrorKind::MalformedEnvelope, "Truncated event frame");
        }
        let body_len = frame.get_u32() as usize;
        if frame.len() != body_len {
            bail!(
                ErrorKind::MalformedEnvelope,
                "Event frame length mismatch",
                format!("length prefix {body_len}, body {}", frame.len())
            );
        }

        let mut id = None;
        let mut type_tag = None;
        let mut timestamp_ms = None;
        let mut payload_body = None;

        let mut fields = FieldReader::new(frame);
        while let Some((fid, value)) = fields.next()? {
            match fid {
                field::EVENT_ID => id = Some(read_uuid(value)?),
                field::EVENT_TYPE => type_tag = Some(read_i32(value)?),
                field::EVENT_TIMESTAMP => timestamp_ms = Some(read_i64(value)?),
                field::EVENT_PAYLOAD => payload_body = Some(value),
                // A field from a newer format revision, ignore it.
                _ => {}
            }
        }

        let (Some(id), Some(type_tag), Some(timestamp_ms), Some(payload_body)) =
            (id, type_tag, timestamp_ms, payload_body)
        else {
            bail!(
                ErrorKind::MalformedEnvelope,
                "Event is missing a required field"
            );
        };

        let Some(decoder) = registry.resolve(type_tag) else {
            bail!(
                ErrorKind::MalformedEnvelope,
                "Unknown event type tag",
                type_tag
            );
        };
        let payload = decoder(payload_body)?;

        Ok(Event::from_parts(id, timestamp_ms, payload))
    }
}

fn encode_payload(payload: &Payload) -> BytesMut {
    let mut body = BytesMut::new();
    match payload {
        Payload::CommitRequest(request) => {
            put_field(
                &mut body,
                field::REQUEST_COMMIT_ID,
                &encode_commit_id(&request.commit_id),
            );
        }
        Payload::CommitResponse(response) => {
            put_field(
                &mut body,
                field::RESPONSE_COMMIT_ID,
                &encode_commit_id(&response.commit_id),
            );
            put_field(
                &mut body,
                field::RESPONSE_TABLE_NAME,
                &encode_table_name(&response.table_name),
            );
            put_list_field(
                &mut body,
                field::RESPONSE_DATA_FILES,
                response.data_files.iter().map(encode_data_file),
            );
            put_list_field(
                &mut body,
                field::RESPONSE_ASSIGNMENTS,
                response.assignments.iter().map(encode_topic_partition),
            );
            if let Some(offsets) = &response.offsets {
                put_list_field(
                    &mut body,
                    field::RESPONSE_OFFSETS,
                    offsets.iter().map(encode_offset_entry),
                );
            }
        }
        Payload::CommitComplete(complete) => {
            put_field(
                &mut body,
                field::COMPLETE_COMMIT_ID,
                &encode_commit_id(&complete.commit_id),
            );
            if let Some(snapshot_id) = complete.snapshot_id {
                put_i64_field(&mut body, field::COMPLETE_SNAPSHOT_ID, snapshot_id);
            }
            put_list_field(
                &mut body,
                field::COMPLETE_OFFSETS,
                complete.offsets.iter().map(encode_offset_entry),
            );
        }
    }
    body
}

fn decode_commit_request(body: &[u8]) -> SinkResult<Payload> {
    let mut commit_id = None;

    let mut fields = FieldReader::new(body);
    while let Some((fid, value)) = fields.next()? {
        match fid {
            field::REQUEST_COMMIT_ID => commit_id = Some(decode_commit_id(value)?),
            _ => {}
        }
    }

    let Some(commit_id) = commit_id else {
        bail!(
            ErrorKind::MalformedEnvelope,
            "Commit request is missing its commit id"
        );
    };

    Ok(Payload::CommitRequest(CommitRequest { commit_id }))
}

fn decode_commit_response(body: &[u8]) -> SinkResult<Payload> {
    let mut commit_id = None;
    let mut table_name = None;
    let mut data_files = None;
    let mut assignments = None;
    let mut offsets = None;

    let mut fields = FieldReader::new(body);
    while let Some((fid, value)) = fields.next()? {
        match fid {
            field::RESPONSE_COMMIT_ID => commit_id = Some(decode_commit_id(value)?),
            field::RESPONSE_TABLE_NAME => table_name = Some(decode_table_name(value)?),
            field::RESPONSE_DATA_FILES => {
                data_files = Some(decode_record_list(value, decode_data_file)?)
            }
            field::RESPONSE_ASSIGNMENTS => {
                assignments = Some(decode_record_list(value, decode_topic_partition)?)
            }
            field::RESPONSE_OFFSETS => {
                offsets = Some(decode_record_list(value, decode_offset_entry)?)
            }
            _ => {}
        }
    }

    let (Some(commit_id), Some(table_name)) = (commit_id, table_name) else {
        bail!(
            ErrorKind::MalformedEnvelope,
            "Commit response is missing a required field"
        );
    };

    Ok(Payload::CommitResponse(CommitResponse {
        commit_id,
        table_name,
        data_files: data_files.unwrap_or_default(),
        assignments: assignments.unwrap_or_default(),
        // Absence is meaningful here: the producer predates offset reporting.
        offsets,
    }))
}

fn decode_commit_complete(body: &[u8]) -> SinkResult<Payload> {
    let mut commit_id = None;
    let mut snapshot_id = None;
    let mut offsets = None;

    let mut fields = FieldReader::new(body);
    while let Some((fid, value)) = fields.next()? {
        match fid {
            field::COMPLETE_COMMIT_ID => commit_id = Some(decode_commit_id(value)?),
            field::COMPLETE_SNAPSHOT_ID => snapshot_id = Some(read_i64(value)?),
            field::COMPLETE_OFFSETS => {
                offsets = Some(decode_record_list(value, decode_offset_entry)?)
            }
            _ => {}
        }
    }

    let Some(commit_id) = commit_id else {
        bail!(
            ErrorKind::MalformedEnvelope,
            "Commit completion is missing its commit id"
        );
    };

    Ok(Payload::CommitComplete(CommitComplete {
        commit_id,
        snapshot_id,
        offsets: offsets.unwrap_or_default(),
    }))
}

fn encode_commit_id(commit_id: &CommitId) -> BytesMut {
    let mut body = BytesMut::new();
    put_uuid_field(&mut body, field::COMMIT_ID_ID, &commit_id.id);
    put_str_field(&mut body, field::COMMIT_ID_TXN_SUFFIX, &commit_id.txn_suffix);
    body
}

fn decode_commit_id(body: &[u8]) -> SinkResult<CommitId> {
    let mut id = None;
    let mut txn_suffix = None;

    let mut fields = FieldReader::new(body);
    while let Some((fid, value)) = fields.next()? {
        match fid {
            field::COMMIT_ID_ID => id = Some(read_uuid(value)?),
            field::COMMIT_ID_TXN_SUFFIX => txn_suffix = Some(read_str(value)?),
            _ => {}
        }
    }

    let Some(id) = id else {
        bail!(ErrorKind::MalformedEnvelope, "Commit id is missing its id");
    };

    Ok(CommitId {
        id,
        txn_suffix: txn_suffix.unwrap_or_default(),
    })
}

fn encode_table_name(table_name: &TableName) -> BytesMut {
    let mut body = BytesMut::new();
    put_str_list_field(&mut body, field::TABLE_NAMESPACE, &table_name.namespace);
    put_str_field(&mut body, field::TABLE_NAME, &table_name.name);
    body
}

fn decode_table_name(body: &[u8]) -> SinkResult<TableName> {
    let mut namespace = None;
    let mut name = None;

    let mut fields = FieldReader::new(body);
    while let Some((fid, value)) = fields.next()? {
        match fid {
            field::TABLE_NAMESPACE => namespace = Some(read_str_list(value)?),
            field::TABLE_NAME => name = Some(read_str(value)?),
            _ => {}
        }
    }

    let Some(name) = name else {
        bail!(
            ErrorKind::MalformedEnvelope,
            "Table reference is missing its name"
        );
    };

    Ok(TableName {
        namespace: namespace.unwrap_or_default(),
        name,
    })
}

fn encode_data_file(data_file: &DataFile) -> BytesMut {
    let mut body = BytesMut::new();
    put_str_field(&mut body, field::FILE_PATH, &data_file.path);
    put_str_field(&mut body, field::FILE_FORMAT, &data_file.format);
    put_i64_field(&mut body, field::FILE_RECORD_COUNT, data_file.record_count);
    put_i64_field(&mut body, field::FILE_SIZE_BYTES, data_file.file_size_bytes);
    put_str_list_field(&mut body, field::FILE_PARTITION, &data_file.partition);
    body
}

fn decode_data_file(body: &[u8]) -> SinkResult<DataFile> {
    let mut path = None;
    let mut format = None;
    let mut record_count = None;
    let mut file_size_bytes = None;
    let mut partition = None;

    let mut fields = FieldReader::new(body);
    while let Some((fid, value)) = fields.next()? {
        match fid {
            field::FILE_PATH => path = Some(read_str(value)?),
            field::FILE_FORMAT => format = Some(read_str(value)?),
            field::FILE_RECORD_COUNT => record_count = Some(read_i64(value)?),
            field::FILE_SIZE_BYTES => file_size_bytes = Some(read_i64(value)?),
            field::FILE_PARTITION => partition = Some(read_str_list(value)?),
            _ => {}
        }
    }

    let Some(path) = path else {
        bail!(
            ErrorKind::MalformedEnvelope,
            "Data file descriptor is missing its path"
        );
    };

    Ok(DataFile {
        path,
        format: format.unwrap_or_default(),
        record_count: record_count.unwrap_or_default(),
        file_size_bytes: file_size_bytes.unwrap_or_default(),
        partition: partition.unwrap_or_default(),
    })
}

fn encode_topic_partition(topic_partition: &TopicPartition) -> BytesMut {
    let mut body = BytesMut::new();
    put_str_field(&mut body, field::PARTITION_TOPIC, &topic_partition.topic);
    put_i32_field(&mut body, field::PARTITION_INDEX, topic_partition.partition);
    body
}

fn decode_topic_partition(body: &[u8]) -> SinkResult<TopicPartition> {
    let mut topic = None;
    let mut partition = None;

    let mut fields = FieldReader::new(body);
    while let Some((fid, value)) = fields.next()? {
        match fid {
            field::PARTITION_TOPIC => topic = Some(read_str(value)?),
            field::PARTITION_INDEX => partition = Some(read_i32(value)?),
            _ => {}
        }
    }

    let (Some(topic), Some(partition)) = (topic, partition) else {
        bail!(
            ErrorKind::MalformedEnvelope,
            "Partition reference is missing a required field"
        );
    };

    Ok(TopicPartition { topic, partition })
}

fn encode_offset_entry(entry: &OffsetEntry) -> BytesMut {
    let mut body = BytesMut::new();
    put_str_field(&mut body, field::OFFSET_TOPIC, &entry.topic);
    put_i32_field(&mut body, field::OFFSET_PARTITION, entry.partition);
    put_i64_field(&mut body, field::OFFSET_VALUE, entry.offset);
    body
}

fn decode_offset_entry(body: &[u8]) -> SinkResult<OffsetEntry> {
    let mut topic = None;
    let mut partition = None;
    let mut offset = None;

    let mut fields = FieldReader::new(body);
    while let Some((fid, value)) = fields.next()? {
        match fid {
            field::OFFSET_TOPIC => topic = Some(read_str(value)?),
            field::OFFSET_PARTITION => partition = Some(read_i32(value)?),
            field::OFFSET_VALUE => offset = Some(read_i64(value)?),
            _ => {}
        }
    }

    let (Some(topic), Some(partition), Some(offset)) = (topic, partition, offset) else {
        bail!(
            ErrorKind::MalformedEnvelope,
            "Offset entry is missing a required field"
        );
    };

    Ok(OffsetEntry {
        topic,
        partition,
        offset,
    })
}

/// Iterates the `(field id, value)` pairs of one record body.
struct FieldReader<'a> {
    buf: &'a [u8],
}

impl<'a> FieldReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn next(&mut self) -> SinkResult<Option<(u16, &'a [u8])>> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        if self.buf.len() < 6 {
            bail!(ErrorKind::MalformedEnvelope, "Truncated field header");
        }

        let mut header = self.buf;
        let id = header.get_u16();
        let len = header.get_u32() as usize;
        if header.len() < len {
            bail!(
                ErrorKind::MalformedEnvelope,
                "Field value exceeds record body",
                format!("field {id}, length {len}")
            );
        }

        let value = &header[..len];
        self.buf = &header[len..];

        Ok(Some((id, value)))
    }
}

fn put_field(buf: &mut BytesMut, id: u16, value: &[u8]) {
    buf.put_u16(id);
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
}

fn put_uuid_field(buf: &mut BytesMut, id: u16, value: &Uuid) {
    put_field(buf, id, value.as_bytes());
}

fn put_str_field(buf: &mut BytesMut, id: u16, value: &str) {
    put_field(buf, id, value.as_bytes());
}

fn put_i32_field(buf: &mut BytesMut, id: u16, value: i32) {
    buf.put_u16(id);
    buf.put_u32(4);
    buf.put_i32(value);
}

fn put_i64_field(buf: &mut BytesMut, id: u16, value: i64) {
    buf.put_u16(id);
    buf.put_u32(8);
    buf.put_i64(value);
}

fn put_list_field<I>(buf: &mut BytesMut, id: u16, elements: I)
where
    I: ExactSizeIterator<Item = BytesMut>,
{
    let mut body = BytesMut::new();
    body.put_u32(elements.len() as u32);
    for element in elements {
        body.put_u32(element.len() as u32);
        body.put_slice(&element);
    }
    put_field(buf, id, &body);
}

fn put_str_list_field(buf: &mut BytesMut, id: u16, items: &[String]) {
    let mut body = BytesMut::new();
    body.put_u32(items.len() as u32);
    for item in items {
        body.put_u32(item.len() as u32);
        body.put_slice(item.as_bytes());
    }
    put_field(buf, id, &body);
}

fn read_uuid(value: &[u8]) -> SinkResult<Uuid> {
    Uuid::from_slice(value).map_err(|_| {
        crate::sink_error!(
            ErrorKind::MalformedEnvelope,
            "Invalid uuid value",
            format!("{} bytes", value.len())
        )
    })
}

fn read_i32(mut value: &[u8]) -> SinkResult<i32> {
    if value.len() != 4 {
        bail!(
            ErrorKind::MalformedEnvelope,
            "Invalid i32 value",
            format!("{} bytes", value.len())
        );
    }
    Ok(value.get_i32())
}

fn read_i64(mut value: &[u8]) -> SinkResult<i64> {
    if value.len() != 8 {
        bail!(
            ErrorKind::MalformedEnvelope,
            "Invalid i64 value",
            format!("{} bytes", value.len())
        );
    }
    Ok(value.get_i64())
}

fn read_str(value: &[u8]) -> SinkResult<String> {
    String::from_utf8(value.to_vec())
        .map_err(|err| crate::sink_error!(ErrorKind::MalformedEnvelope, "Invalid string value", source: err))
}

fn read_elements(mut value: &[u8]) -> SinkResult<Vec<&[u8]>> {
    if value.len() < 4 {
        bail!(ErrorKind::MalformedEnvelope, "Truncated list header");
    }
    let count = value.get_u32() as usize;

    let mut elements = Vec::new();
    for _ in 0..count {
        if value.len() < 4 {
            bail!(ErrorKind::MalformedEnvelope, "Truncated list element");
        }
        let len = value.get_u32() as usize;
        if value.len() < len {
            bail!(ErrorKind::MalformedEnvelope, "List element exceeds body");
        }
        elements.push(&value[..len]);
        value = &value[len..];
    }

    Ok(elements)
}

fn decode_record_list<T>(value: &[u8], decode: fn(&[u8]) -> SinkResult<T>) -> SinkResult<Vec<T>> {
    read_elements(value)?.into_iter().map(decode).collect()
}

fn read_str_list(value: &[u8]) -> SinkResult<Vec<String>> {
    read_elements(value)?.into_iter().map(read_str).collect()
}
