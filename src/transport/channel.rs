//! In-process channel transport.

// ============================================================================
// Imports
// ============================================================================

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::OutboundFrame;

use super::Transport;

// ============================================================================
// ChannelTransport
// ============================================================================

/// Transport backed by an unbounded tokio channel.
///
/// Frames are delivered in posting order.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl ChannelTransport {
    /// Creates a transport and the receiver its frames arrive on.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns `true` once the receiver has been dropped.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl Transport for ChannelTransport {
    fn post(&self, frame: OutboundFrame) -> Result<()> {
        self.tx.send(frame).map_err(|_| Error::ConnectionClosed)
    }
}

// ============================================================================
// Tests
// ============================================================================
