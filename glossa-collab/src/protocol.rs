//! Push-channel message envelope.
//!
//! JSON wire format, discriminated by `"type"`:
//!
//! ```text
//! { "type": "created" | "updated" | "deleted" |
//!           "connection_established" | "heartbeat" | "heartbeat_ack" | "error",
//!   "record"?:  AnnotationRecord,      // created / updated
//!   "id"?:      string,                // deleted
//!   "scopeId"?: string,
//!   "timestamp"?: string,
//!   "message"?: string }               // connection_established / error
//! ```
//!
//! `created`/`updated` carry the full record; `deleted` carries only the id.
//! A frame that fails to parse or whose record fails validation is discarded
//! by the caller — one bad message never tears down the connection.

use chrono::Utc;
use glossa_core::{AnnotationId, AnnotationRecord, ModelError, RemoteEvent};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed channel message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("channel record failed validation: {0}")]
    InvalidRecord(#[from] ModelError),
}

/// One frame on the push channel, either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelMessage {
    Created {
        record: AnnotationRecord,
        #[serde(
            default,
            rename = "scopeId",
            skip_serializing_if = "Option::is_none"
        )]
        scope_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    Updated {
        record: AnnotationRecord,
        #[serde(
            default,
            rename = "scopeId",
            skip_serializing_if = "Option::is_none"
        )]
        scope_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    Deleted {
        id: AnnotationId,
        #[serde(
            default,
            rename = "scopeId",
            skip_serializing_if = "Option::is_none"
        )]
        scope_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    /// Informational greeting after the socket opens.
    ConnectionEstablished {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Outbound liveness probe.
    Heartbeat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    /// Informational reply to a heartbeat.
    HeartbeatAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    /// Server-side error report; logged, non-fatal to the connection.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl ChannelMessage {
    pub fn created(record: AnnotationRecord) -> Self {
        Self::Created {
            record,
            scope_id: None,
            timestamp: None,
        }
    }

    pub fn updated(record: AnnotationRecord) -> Self {
        Self::Updated {
            record,
            scope_id: None,
            timestamp: None,
        }
    }

    pub fn deleted(id: AnnotationId) -> Self {
        Self::Deleted {
            id,
            scope_id: None,
            timestamp: None,
        }
    }

    pub fn connection_established(message: impl Into<String>) -> Self {
        Self::ConnectionEstablished {
            message: Some(message.into()),
        }
    }

    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: Some(Utc::now().to_rfc3339()),
        }
    }

    pub fn heartbeat_ack() -> Self {
        Self::HeartbeatAck {
            timestamp: Some(Utc::now().to_rfc3339()),
        }
    }

    /// The envelope's scope routing hint, when the server attached one.
    pub fn scope_id(&self) -> Option<&str> {
        match self {
            Self::Created { scope_id, .. }
            | Self::Updated { scope_id, .. }
            | Self::Deleted { scope_id, .. } => scope_id.as_deref(),
            _ => None,
        }
    }

    /// Serialize to the JSON wire form.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and validate one frame. Records embedded in `created`/`updated`
    /// must satisfy the model invariants, otherwise the frame is malformed.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let message: Self = serde_json::from_str(text)?;
        match &message {
            Self::Created { record, .. } | Self::Updated { record, .. } => record.validate()?,
            _ => {}
        }
        Ok(message)
    }

    /// Convert a data-bearing frame into a store event plus its routing
    /// hint. Informational frames return `None`.
    pub fn into_remote_event(self) -> Option<(RemoteEvent, Option<String>)> {
        match self {
            Self::Created {
                record, scope_id, ..
            } => Some((RemoteEvent::Created(record), scope_id)),
            Self::Updated {
                record, scope_id, ..
            } => Some((RemoteEvent::Updated(record), scope_id)),
            Self::Deleted { id, scope_id, .. } => Some((RemoteEvent::Deleted(id), scope_id)),
            _ => None,
        }
    }
}
