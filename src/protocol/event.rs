//! Inbound events.
//!
//! # Event Types
//!
//! | Event | Fields | Routed to |
//! |-------|--------|-----------|
//! | `SerialPorts` | `data` (descriptors) | every pending `requestPorts` caller |
//! | `PortOpen` | `devicePath`, `id`, `data` | pending `connect` for that path |
//! | `data` | `id`, `data` (base64) | open port's data callback |
//! | `PortClosed` | `id` | open port's close callback |
//! | `Error` | `error`, `inResponseTo`, `id` | pending request or port error callback |
//! | `AppExited` | none | everything (helper is gone) |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::{DETACHED, PortId};

use super::PortDescriptor;

// ============================================================================
// Event
// ============================================================================

/// An event sent by the native helper (or the relay) to the dispatcher.
///
/// # Format
///
/// ```json
/// { "event": "PortOpen", "devicePath": "/dev/ttyUSB0", "id": 0 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Event {
    /// Port enumeration result.
    SerialPorts {
        /// Enumerated ports. The helper sends `null` when there are none.
        #[serde(default)]
        data: Option<Vec<PortDescriptor>>,
    },

    /// A port was opened.
    PortOpen {
        /// Device path that was opened.
        #[serde(rename = "devicePath")]
        device_path: String,
        /// Id assigned by the helper.
        id: PortId,
        /// Opaque payload handed to the `connect` caller.
        #[serde(default)]
        data: Value,
    },

    /// Bytes read from an open port.
    #[serde(rename = "data")]
    Data {
        /// Port the bytes came from.
        id: PortId,
        /// Base64-encoded payload.
        data: String,
    },

    /// An open port was closed.
    PortClosed {
        /// Port that closed.
        id: PortId,
    },

    /// A command failed or an open port hit a runtime error.
    Error {
        /// Opaque error description.
        #[serde(default)]
        error: Value,
        /// Serialized copy of the failed command, or empty.
        #[serde(rename = "inResponseTo", default)]
        in_response_to: String,
        /// Port the error concerns; negative or absent means none.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<i64>,
    },

    /// The native helper disconnected.
    AppExited,
}

impl Event {
    /// Wire names of every event this crate understands.
    pub const NAMES: [&'static str; 6] = [
        "SerialPorts",
        "PortOpen",
        "data",
        "PortClosed",
        "Error",
        "AppExited",
    ];

    /// Parses an event from a raw message object.
    ///
    /// Returns `Ok(None)` for messages without an `event` field or with an
    /// event name this crate does not know; other code may share the channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if a known event has malformed fields.
    pub fn from_message(message: &Value) -> Result<Option<Self>> {
        let Some(name) = message.get("event").and_then(Value::as_str) else {
            return Ok(None);
        };

        if !Self::NAMES.contains(&name) {
            return Ok(None);
        }

        Ok(Some(Event::deserialize(message).map_err(Error::Json)?))
    }

    /// Returns the wire name of the event.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SerialPorts { .. } => "SerialPorts",
            Self::PortOpen { .. } => "PortOpen",
            Self::Data { .. } => "data",
            Self::PortClosed { .. } => "PortClosed",
            Self::Error { .. } => "Error",
            Self::AppExited => "AppExited",
        }
    }

    /// Creates an `Error` event.
    #[must_use]
    pub fn error(error: impl Into<String>, in_response_to: impl Into<String>, id: Option<PortId>) -> Self {
        Self::Error {
            error: Value::String(error.into()),
            in_response_to: in_response_to.into(),
            id: Some(id.map_or(DETACHED, PortId::to_wire)),
        }
    }
}

/// Renders an opaque error description as text.
#[must_use]
pub fn error_text(error: &Value) -> String {
    match error {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
