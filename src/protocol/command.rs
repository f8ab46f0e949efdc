//! Outbound commands.
//!
//! # Commands
//!
//! | Command | Fields | Reply |
//! |---------|--------|-------|
//! | `listPorts` | none | `SerialPorts` |
//! | `open` | `devicePath`, `baudRate` | `PortOpen` |
//! | `close` | `id` | `PortClosed` (untracked) |
//! | `write` | `id`, `data` (base64) | none |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::PortId;

// ============================================================================
// Command
// ============================================================================

/// A command sent to the native helper.
///
/// # Format
///
/// ```json
/// { "command": "open", "devicePath": "/dev/ttyUSB0", "baudRate": 57600 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum Command {
    /// Enumerate serial ports.
    #[serde(rename = "listPorts")]
    ListPorts,

    /// Open a serial port.
    #[serde(rename = "open")]
    Open {
        /// Device path to open.
        #[serde(rename = "devicePath")]
        device_path: String,
        /// Line speed.
        #[serde(rename = "baudRate")]
        baud_rate: u32,
    },

    /// Close an open port.
    #[serde(rename = "close")]
    Close {
        /// Helper-assigned port id.
        id: PortId,
    },

    /// Write bytes to an open port.
    #[serde(rename = "write")]
    Write {
        /// Helper-assigned port id.
        id: PortId,
        /// Base64-encoded payload.
        data: String,
    },
}

impl Command {
    /// Returns the wire name of the command.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ListPorts => "listPorts",
            Self::Open { .. } => "open",
            Self::Close { .. } => "close",
            Self::Write { .. } => "write",
        }
    }
}

// ============================================================================
// EchoedCommand
// ============================================================================

/// The fields of a failed command that an `Error` event echoes back.
///
/// Used only to correlate the error with the request that caused it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EchoedCommand {
    /// Command name, if the echoed object had a string `command` field.
    pub command: Option<String>,
    /// Device path, if the echoed object had a string `devicePath` field.
    pub device_path: Option<String>,
}

impl EchoedCommand {
    /// Parses the `inResponseTo` text of an `Error` event.
    ///
    /// Empty text means the helper raised the error on its own (for example a
    /// failed serial read) and yields `Ok(None)`. Valid JSON that is not an
    /// object yields an `EchoedCommand` with no fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Desync`] if the text is not valid JSON.
    pub fn parse(text: &str) -> Result<Option<Self>> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let value: Value = serde_json::from_str(text).map_err(|_| Error::desync(text))?;

        let field = |name: &str| {
            value
                .get(name)
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
        };

        Ok(Some(Self {
            command: field("command"),
            device_path: field("devicePath"),
        }))
    }
}

// ============================================================================
// Tests
// ============================================================================
