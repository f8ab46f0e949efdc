//! Bridge configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use webserial_bridge::{BridgeOptions, DesyncPolicy};
//!
//! let options = BridgeOptions::new()
//!     .with_baud_rate(115_200)
//!     .with_request_timeout(Duration::from_secs(10))
//!     .with_desync_policy(DesyncPolicy::TearDown);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Tag on frames travelling from the relay to the page.
pub const DEFAULT_INBOUND_TAG: &str = "fromgws";

/// Tag on frames travelling from the page to the relay.
pub const DEFAULT_OUTBOUND_TAG: &str = "togws";

/// Line speed sent with every `open`.
pub const DEFAULT_BAUD_RATE: u32 = 57_600;

// ============================================================================
// DesyncPolicy
// ============================================================================

/// What to do when an `Error` event's correlation data cannot be parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DesyncPolicy {
    /// Log the event and leave all state untouched.
    #[default]
    LogOnly,
    /// Fail every pending request and detach every open port.
    TearDown,
}

// ============================================================================
// BridgeOptions
// ============================================================================

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeOptions {
    /// Tag an inbound frame must carry to be accepted.
    pub inbound_tag: String,

    /// Tag put on every outbound frame.
    pub outbound_tag: String,

    /// Baud rate sent with `open`.
    pub baud_rate: u32,

    /// Reaction to unparsable error correlation data.
    pub desync_policy: DesyncPolicy,

    /// How long a request waits for its reply. `None` waits forever.
    pub request_timeout: Option<Duration>,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl BridgeOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            inbound_tag: DEFAULT_INBOUND_TAG.to_string(),
            outbound_tag: DEFAULT_OUTBOUND_TAG.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            desync_policy: DesyncPolicy::LogOnly,
            request_timeout: None,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl BridgeOptions {
    /// Sets the accepted inbound tag.
    #[inline]
    #[must_use]
    pub fn with_inbound_tag(mut self, tag: impl Into<String>) -> Self {
        self.inbound_tag = tag.into();
        self
    }

    /// Sets the outbound tag.
    #[inline]
    #[must_use]
    pub fn with_outbound_tag(mut self, tag: impl Into<String>) -> Self {
        self.outbound_tag = tag.into();
        self
    }

    /// Sets the baud rate used by `connect`.
    #[inline]
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Sets the desync policy.
    #[inline]
    #[must_use]
    pub fn with_desync_policy(mut self, policy: DesyncPolicy) -> Self {
        self.desync_policy = policy;
        self
    }

    /// Expires requests that get no reply within `timeout`.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = BridgeOptions::default();
        assert_eq!(options.inbound_tag, "fromgws");
        assert_eq!(options.outbound_tag, "togws");
        assert_eq!(options.baud_rate, 57_600);
        assert_eq!(options.desync_policy, DesyncPolicy::LogOnly);
        assert!(options.request_timeout.is_none());
    }

    #[test]
    fn test_builder_chain() {
        let options = BridgeOptions::new()
            .with_inbound_tag("in")
            .with_outbound_tag("out")
            .with_baud_rate(9600)
            .with_desync_policy(DesyncPolicy::TearDown)
            .with_request_timeout(Duration::from_millis(250));

        assert_eq!(options.inbound_tag, "in");
        assert_eq!(options.outbound_tag, "out");
        assert_eq!(options.baud_rate, 9600);
        assert_eq!(options.desync_policy, DesyncPolicy::TearDown);
        assert_eq!(options.request_timeout, Some(Duration::from_millis(250)));
    }
}
