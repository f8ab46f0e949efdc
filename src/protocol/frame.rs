//! Tagged frames.
//!
//! The page-side channel is shared: anything may post on it. Frames carry a
//! `type` tag naming the direction, and inbound frames are only accepted from
//! the trusted relay with the agreed tag.
//!
//! ```json
//! { "type": "togws",   "message": { "command": "listPorts" } }
//! { "type": "fromgws", "message": { "event": "SerialPorts", "data": [] } }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde_json::Value;

use super::Command;

// ============================================================================
// Origin
// ============================================================================

/// Where an inbound frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The relay this dispatcher is bound to.
    Trusted,
    /// Any other sender on the shared channel.
    Foreign,
}

// ============================================================================
// InboundFrame
// ============================================================================

/// A frame arriving at the dispatcher.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    /// Sender of the frame.
    pub origin: Origin,
    /// Direction tag.
    pub tag: String,
    /// Untyped payload; parsed into an [`Event`](super::Event) on acceptance.
    pub message: Value,
}

impl InboundFrame {
    /// Creates a frame from the trusted relay.
    #[inline]
    #[must_use]
    pub fn trusted(tag: impl Into<String>, message: Value) -> Self {
        Self {
            origin: Origin::Trusted,
            tag: tag.into(),
            message,
        }
    }

    /// Creates a frame from some other sender.
    #[inline]
    #[must_use]
    pub fn foreign(tag: impl Into<String>, message: Value) -> Self {
        Self {
            origin: Origin::Foreign,
            tag: tag.into(),
            message,
        }
    }

    /// Returns `true` if the frame is from the trusted relay with `tag`.
    #[inline]
    #[must_use]
    pub fn is_accepted(&self, tag: &str) -> bool {
        self.origin == Origin::Trusted && self.tag == tag
    }
}

// ============================================================================
// OutboundFrame
// ============================================================================

/// A command on its way to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundFrame {
    /// Direction tag.
    #[serde(rename = "type")]
    pub tag: String,
    /// The command.
    pub message: Command,
}

impl OutboundFrame {
    /// Creates a frame.
    #[inline]
    #[must_use]
    pub fn new(tag: impl Into<String>, message: Command) -> Self {
        Self {
            tag: tag.into(),
            message,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_acceptance_requires_origin_and_tag() {
        let message = json!({ "event": "AppExited" });
        assert!(InboundFrame::trusted("fromgws", message.clone()).is_accepted("fromgws"));
        assert!(!InboundFrame::trusted("togws", message.clone()).is_accepted("fromgws"));
        assert!(!InboundFrame::foreign("fromgws", message).is_accepted("fromgws"));
    }

    #[test]
    fn test_outbound_frame_format() {
        let frame = OutboundFrame::new("togws", Command::ListPorts);
        assert_eq!(
            serde_json::to_value(frame).unwrap(),
            json!({ "type": "togws", "message": { "command": "listPorts" } })
        );
    }
}
