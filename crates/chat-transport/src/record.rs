//! Wire records.
//!
//! Every frame carries one UTF-8 JSON object with a `type` discriminator.
//! Three kinds exist: `ping` (liveness probe), `ack` (acknowledges a
//! previously received `message` by id) and `message` (a chat message with
//! text and/or base64-encoded images).
//!
//! Decoding is split in two stages: the framing layer parses bytes into a
//! [`serde_json::Value`] (failure there is fatal for the connection), and
//! [`Record::from_value`] validates the object into a typed record (failure
//! there discards the one record and keeps the connection).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::{Error, Result};

/// String fields longer than this are truncated in log output.
pub const LOG_FIELD_LIMIT: usize = 64;

/// One typed unit of application protocol data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    /// Liveness probe, no payload.
    Ping,
    /// Acknowledges receipt of the `message` with this id.
    Ack { message_id: i64 },
    /// An application chat message. Carries at least one of `text`
    /// (non-empty) or `image_list` (non-empty list of non-empty
    /// base64-encoded images).
    Message {
        id: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        image_list: Option<Vec<String>>,
    },
}

/// Why a parsed JSON object failed to validate as a [`Record`].
///
/// `MessagePayload` carries the already-parsed message id so the receiver
/// can still acknowledge the record before discarding it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("record is not an object")]
    NotAnObject,

    #[error("record has no usable type field")]
    MissingType,

    #[error("unknown record type {0:?}")]
    UnknownType(String),

    #[error("ack record rejected: {0}")]
    AckBadId(String),

    #[error("message record rejected: {0}")]
    MessageBadId(String),

    #[error("message {id} payload rejected: {reason}")]
    MessagePayload { id: i64, reason: String },
}

impl Record {
    /// Serializes the record to its wire payload (the JSON object bytes,
    /// without the length prefix).
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::ParseError(e.to_string()))
    }

    /// The record as a JSON value, mainly for logging.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Parses payload bytes all the way to a typed record. Unknown extra
    /// fields are dropped; callers that need them use [`Record::from_value`].
    pub fn decode(bytes: &[u8]) -> Result<Record> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| Error::ParseError(e.to_string()))?;
        let (record, _extra) =
            Record::from_value(&value).map_err(|e| Error::ParseError(e.to_string()))?;
        Ok(record)
    }

    /// Validates a parsed JSON object into a typed record.
    ///
    /// Returns the record together with the names of any unrecognized
    /// fields, which are tolerated but worth a log line. Normalizes empty
    /// content: an empty `text` string or empty `image_list` counts as
    /// absent.
    pub fn from_value(value: &Value) -> std::result::Result<(Record, Vec<String>), RecordError> {
        let map = value.as_object().ok_or(RecordError::NotAnObject)?;

        let kind = match map.get("type") {
            Some(Value::String(s)) => s.as_str(),
            Some(_) | None => return Err(RecordError::MissingType),
        };

        match kind {
            "ping" => Ok((Record::Ping, Vec::new())),

            "ack" => {
                let message_id = match map.get("message_id") {
                    None => return Err(RecordError::AckBadId("message_id is missing".into())),
                    Some(v) => v.as_i64().ok_or_else(|| {
                        RecordError::AckBadId("message_id is not an integer".into())
                    })?,
                };
                Ok((Record::Ack { message_id }, Vec::new()))
            }

            "message" => {
                let id = match map.get("id") {
                    None => return Err(RecordError::MessageBadId("id is missing".into())),
                    Some(v) => v.as_i64().ok_or_else(|| {
                        RecordError::MessageBadId("id is not an integer".into())
                    })?,
                };

                let payload_err = |reason: &str| RecordError::MessagePayload {
                    id,
                    reason: reason.into(),
                };

                let image_list = match map.get("image_list") {
                    None => None,
                    Some(Value::Array(items)) if items.is_empty() => None,
                    Some(Value::Array(items)) => {
                        let mut images = Vec::with_capacity(items.len());
                        for item in items {
                            match item.as_str() {
                                Some("") => {
                                    return Err(payload_err("image_list contains an empty entry"))
                                }
                                Some(s) => images.push(s.to_owned()),
                                None => {
                                    return Err(payload_err(
                                        "image_list contains a non-string entry",
                                    ))
                                }
                            }
                        }
                        Some(images)
                    }
                    Some(_) => return Err(payload_err("image_list is not a list")),
                };

                let text = match map.get("text") {
                    None => None,
                    Some(Value::String(s)) if s.is_empty() => None,
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(_) => return Err(payload_err("text is not a string")),
                };

                if text.is_none() && image_list.is_none() {
                    return Err(payload_err("no content"));
                }

                let extra = map
                    .keys()
                    .filter(|k| !matches!(k.as_str(), "type" | "id" | "text" | "image_list"))
                    .cloned()
                    .collect();

                Ok((
                    Record::Message {
                        id,
                        text,
                        image_list,
                    },
                    extra,
                ))
            }

            other => Err(RecordError::UnknownType(other.to_owned())),
        }
    }
}

/// Copy of a JSON value with long string fields truncated for log output.
pub fn trimmed_for_log(value: &Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > LOG_FIELD_LIMIT => {
            let head: String = s.chars().take(LOG_FIELD_LIMIT).collect();
            Value::String(format!("{head}..."))
        }
        Value::Array(items) => Value::Array(items.iter().map(trimmed_for_log).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), trimmed_for_log(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}
