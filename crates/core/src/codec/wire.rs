//! Framed Avro encoding of ticket events.
//!
//! Frame layout: `[0x00][schema id: u32 big-endian][avro datum]`.
//!
//! Every body field is optional. Encoding walks the record fields of the
//! registry schema and, for each one, picks the union branch matching the
//! value (string or long), falling back to `null` for empty values. Decoding
//! extracts each known field explicitly and defaults anything missing, so
//! schema revisions that add or drop fields do not break the bridge.

use std::collections::HashMap;

use apache_avro::schema::Schema;
use apache_avro::types::Value;
use thiserror::Error;
use tracing::warn;

use crate::ticket::{Attachment, EventTime, MessageKind, Ticket};

/// Leading byte of every frame.
pub const MAGIC_BYTE: u8 = 0;

/// Magic byte plus schema id.
pub const HEADER_LEN: usize = 5;

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame too short: {0} bytes, need at least {HEADER_LEN}")]
    Truncated(usize),

    #[error("unexpected magic byte {0:#04x}")]
    BadMagic(u8),

    #[error("invalid schema: {0}")]
    Schema(String),

    #[error("schema has no usable branch for field {field}")]
    UnsupportedField { field: String },

    #[error("avro encode failed: {0}")]
    Encode(String),

    #[error("avro decode failed: {0}")]
    Decode(String),

    #[error("decoded body is not a record")]
    NotARecord,
}

/// Body field names, in the order the backends define them.
pub mod fields {
    pub const REQUEST: &str = "tt_request";
    pub const FOR_BILLING: &str = "tt_for_billing";
    pub const CLIENT: &str = "tt_client";
    pub const CHANNEL_OPERATOR: &str = "tt_id_channel_operator";
    pub const DESCRIPTION: &str = "tt_description";
    pub const TS_START: &str = "tt_ts_start";
    pub const DATE_IN_STRING: &str = "date_in_string";
    pub const PROBLEM_TYPE: &str = "tt_problem_type";
    pub const FILE_NAME: &str = "tt_file_name";
    pub const FILE: &str = "tt_file";
    pub const ERTH: &str = "tt_erth";
    pub const TS: &str = "tt_ts";
    pub const STATUS: &str = "tt_status";
    pub const COMMENT: &str = "tt_comment";
    pub const USER: &str = "tt_user";
    /// Optional; only encoded when the schema declares it.
    pub const TS_STRING: &str = "tt_ts_string";
}

/// A scalar body value before it is fitted to the schema.
#[derive(Debug, Clone, PartialEq)]
enum Scalar {
    Text(String),
    Long(i64),
}

impl Scalar {
    fn is_empty(&self) -> bool {
        match self {
            Scalar::Text(s) => s.is_empty(),
            Scalar::Long(v) => *v == 0,
        }
    }
}

/// Encoder/decoder bound to one registry schema.
#[derive(Debug, Clone)]
pub struct TicketCodec {
    schema_id: u32,
    schema: Schema,
}

impl TicketCodec {
    /// Builds a codec from the schema text returned by the registry.
    pub fn new(schema_id: u32, schema_text: &str) -> Result<Self, CodecError> {
        let schema =
            Schema::parse_str(schema_text).map_err(|e| CodecError::Schema(e.to_string()))?;
        if !matches!(schema, Schema::Record(_)) {
            return Err(CodecError::Schema("top level schema must be a record".to_string()));
        }
        Ok(Self { schema_id, schema })
    }

    pub fn schema_id(&self) -> u32 {
        self.schema_id
    }

    /// Encodes a ticket into a framed message.
    pub fn encode(&self, ticket: &Ticket) -> Result<Vec<u8>, CodecError> {
        let values = body_values(ticket);
        let Schema::Record(record) = &self.schema else {
            return Err(CodecError::Schema("top level schema must be a record".to_string()));
        };

        let mut body = Vec::with_capacity(record.fields.len());
        for field in &record.fields {
            let value = fit_to_schema(&field.name, values.get(field.name.as_str()), &field.schema)?;
            body.push((field.name.clone(), value));
        }

        let datum = apache_avro::to_avro_datum(&self.schema, Value::Record(body))
            .map_err(|e| CodecError::Encode(e.to_string()))?;

        let mut frame = Vec::with_capacity(HEADER_LEN + datum.len());
        frame.push(MAGIC_BYTE);
        frame.extend_from_slice(&self.schema_id.to_be_bytes());
        frame.extend_from_slice(&datum);
        Ok(frame)
    }

    /// Decodes a framed message into a ticket.
    pub fn decode(&self, frame: &[u8]) -> Result<Ticket, CodecError> {
        if frame.len() < HEADER_LEN {
            return Err(CodecError::Truncated(frame.len()));
        }
        if frame[0] != MAGIC_BYTE {
            return Err(CodecError::BadMagic(frame[0]));
        }
        let frame_schema = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        if frame_schema != self.schema_id {
            warn!(
                frame_schema,
                expected = self.schema_id,
                "Frame schema id differs from configured schema, decoding anyway"
            );
        }

        let mut body = &frame[HEADER_LEN..];
        let value = apache_avro::from_avro_datum(&self.schema, &mut body, None)
            .map_err(|e| CodecError::Decode(e.to_string()))?;

        let Value::Record(record) = value else {
            return Err(CodecError::NotARecord);
        };
        let mut values: HashMap<String, Scalar> = HashMap::with_capacity(record.len());
        for (name, value) in record {
            if let Some(scalar) = scalar_of(value) {
                values.insert(name, scalar);
            }
        }

        Ok(ticket_from_values(&values))
    }
}

fn body_values(ticket: &Ticket) -> HashMap<&'static str, Scalar> {
    let text = |s: &str| Scalar::Text(s.to_string());
    let (file_name, file) = ticket
        .attachment
        .as_ref()
        .map(|a| (a.name.as_str(), a.payload.as_str()))
        .unwrap_or(("", ""));

    HashMap::from([
        (fields::REQUEST, text(ticket.kind.as_keyword())),
        (fields::FOR_BILLING, text(&ticket.billing_channel)),
        (fields::CLIENT, text(&ticket.customer_id)),
        (fields::CHANNEL_OPERATOR, text(&ticket.operator_channel)),
        (fields::DESCRIPTION, text(&ticket.description)),
        (fields::TS_START, Scalar::Long(ticket.start.epoch)),
        (fields::DATE_IN_STRING, text(&ticket.start.display)),
        (fields::PROBLEM_TYPE, text(&ticket.classification)),
        (fields::FILE_NAME, text(file_name)),
        (fields::FILE, text(file)),
        (fields::ERTH, text(&ticket.operator_ticket_id)),
        (fields::TS, Scalar::Long(ticket.event.epoch)),
        (fields::STATUS, text(&ticket.status)),
        (fields::COMMENT, text(&ticket.comment)),
        (fields::USER, text(&ticket.user)),
        (fields::TS_STRING, text(&ticket.event.display)),
    ])
}

/// Converts one scalar into an avro value accepted by `schema`.
fn fit_to_schema(name: &str, scalar: Option<&Scalar>, schema: &Schema) -> Result<Value, CodecError> {
    let unsupported = || CodecError::UnsupportedField {
        field: name.to_string(),
    };

    match schema {
        Schema::Union(union) => {
            let variants = union.variants();
            let null_idx = variants.iter().position(|s| matches!(s, Schema::Null));

            match scalar {
                Some(s) if !s.is_empty() || null_idx.is_none() => {
                    for (idx, variant) in variants.iter().enumerate() {
                        if let Some(value) = plain_value(s, variant) {
                            return Ok(Value::Union(idx as u32, Box::new(value)));
                        }
                    }
                    Err(unsupported())
                }
                _ => null_idx
                    .map(|idx| Value::Union(idx as u32, Box::new(Value::Null)))
                    .ok_or_else(unsupported),
            }
        }
        Schema::Null => Ok(Value::Null),
        other => {
            let fallback = Scalar::Text(String::new());
            plain_value(scalar.unwrap_or(&fallback), other).ok_or_else(unsupported)
        }
    }
}

fn plain_value(scalar: &Scalar, schema: &Schema) -> Option<Value> {
    match (scalar, schema) {
        (Scalar::Text(s), Schema::String) => Some(Value::String(s.clone())),
        (Scalar::Long(v), Schema::Long) => Some(Value::Long(*v)),
        (Scalar::Long(v), Schema::Int) => i32::try_from(*v).ok().map(Value::Int),
        (Scalar::Long(v), Schema::String) => Some(Value::String(v.to_string())),
        (Scalar::Text(s), Schema::Long) => s.parse().ok().map(Value::Long),
        _ => None,
    }
}

fn scalar_of(value: Value) -> Option<Scalar> {
    match value {
        Value::Union(_, inner) => scalar_of(*inner),
        Value::String(s) => Some(Scalar::Text(s)),
        Value::Long(v) => Some(Scalar::Long(v)),
        Value::Int(v) => Some(Scalar::Long(v.into())),
        _ => None,
    }
}

fn ticket_from_values(values: &HashMap<String, Scalar>) -> Ticket {
    let text = |name: &str| match values.get(name) {
        Some(Scalar::Text(s)) => s.clone(),
        Some(Scalar::Long(v)) => v.to_string(),
        None => String::new(),
    };
    let long = |name: &str| match values.get(name) {
        Some(Scalar::Long(v)) => *v,
        Some(Scalar::Text(s)) => s.trim().parse().unwrap_or(0),
        None => 0,
    };

    let event_epoch = long(fields::TS);
    let event = match values.get(fields::TS_STRING) {
        Some(_) => EventTime::new(event_epoch, text(fields::TS_STRING)),
        None if event_epoch != 0 => EventTime::from_epoch(event_epoch),
        None => EventTime::default(),
    };

    Ticket {
        kind: MessageKind::from_keyword(&text(fields::REQUEST)),
        customer_id: text(fields::CLIENT),
        operator_channel: text(fields::CHANNEL_OPERATOR),
        billing_channel: text(fields::FOR_BILLING),
        description: text(fields::DESCRIPTION),
        classification: text(fields::PROBLEM_TYPE),
        attachment: Attachment::from_parts(text(fields::FILE_NAME), text(fields::FILE)),
        operator_ticket_id: text(fields::ERTH),
        status: text(fields::STATUS),
        comment: text(fields::COMMENT),
        user: text(fields::USER),
        start: EventTime::new(long(fields::TS_START), text(fields::DATE_IN_STRING)),
        event,
    }
}
