//! Transport layer.
//!
//! The dispatcher posts outbound frames through a [`Transport`]; inbound
//! frames are pushed into [`Dispatcher::on_inbound_message`] by whoever owns
//! the receiving side.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐   OutboundFrame    ┌─────────────────┐   stdin   ┌──────────────┐
//! │   Dispatcher    │──────────────────► │     Relay       │─────────► │ Native helper│
//! │                 │  ChannelTransport  │  (two tasks)    │           │  (process)   │
//! │                 │◄────────────────── │                 │◄───────── │              │
//! └─────────────────┘   InboundFrame     └─────────────────┘   stdout  └──────────────┘
//! ```
//!
//! Native-messaging frames are a 4-byte little-endian length followed by
//! that many bytes of UTF-8 JSON.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | In-process [`ChannelTransport`] |
//! | `framing` | Native-messaging frame codec |
//! | `native` | [`Relay`] tasks and [`NativeHost`] process |
//!
//! [`Dispatcher::on_inbound_message`]: crate::Dispatcher::on_inbound_message

// ============================================================================
// Imports
// ============================================================================

use crate::error::Result;
use crate::protocol::OutboundFrame;

// ============================================================================
// Submodules
// ============================================================================

/// In-process channel transport.
pub mod channel;

/// Native-messaging frame codec.
pub mod framing;

/// Native helper relay and process management.
pub mod native;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::ChannelTransport;
pub use native::{NativeHost, NativeHostBuilder, Relay};

// ============================================================================
// Transport
// ============================================================================

/// Outbound half of the message channel.
///
/// `post` must not block: it enqueues the frame and returns.
pub trait Transport: Send + Sync {
    /// Enqueues one frame for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`](crate::Error::ConnectionClosed) if
    /// the receiving side is gone.
    fn post(&self, frame: OutboundFrame) -> Result<()>;
}
