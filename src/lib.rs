//! WebSerial bridge - serial port access through a native-messaging helper.
//!
//! This library talks to a native helper process that owns the real serial
//! devices. Commands go out as tagged JSON frames, events come back on the
//! same channel, and a [`Dispatcher`] correlates the two.
//!
//! # Architecture
//!
//! The bridge follows a request/event model:
//!
//! - **Local End (Rust)**: Posts commands, routes events to waiting callers
//! - **Remote End (Helper)**: Opens devices, streams data, reports errors
//!
//! Key design principles:
//!
//! - Replies are matched by kind and device path, not by request id
//! - Port data and closures are routed by helper-assigned [`PortId`]
//! - Helper errors echo the failed command, which selects who is told
//! - Malformed or foreign frames are logged and dropped, never fatal
//!
//! # Quick Start
//!
//! ```no_run
//! use webserial_bridge::{ModeOptions, NativeHost, PortFilter, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut host = NativeHost::builder()
//!         .program("/usr/local/bin/gowebserial")
//!         .spawn()?;
//!     let dispatcher = host.dispatcher().clone();
//!
//!     // Find an FTDI adapter
//!     let ports = dispatcher
//!         .request_ports(PortFilter::new().with("vendorId", "0403"))
//!         .await?;
//!     println!("Found {} ports", ports.len());
//!
//!     // Open it and say hello
//!     let port = dispatcher.port("/dev/ttyUSB0", ModeOptions::new().with("baud", 9600));
//!     port.connect(|bytes| println!("read {:?}", bytes)).await?;
//!     port.write(b"AT\r\n")?;
//!
//!     host.shutdown().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`codec`] | Base64 payload encoding |
//! | [`dispatcher`] | Request correlation and event routing |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Port and request identifiers |
//! | [`options`] | Dispatcher configuration |
//! | [`port`] | [`SerialPort`] handle |
//! | [`protocol`] | Wire message types |
//! | [`transport`] | Command delivery and the native relay |

// ============================================================================
// Modules
// ============================================================================

/// Base64 payload encoding.
pub mod codec;

/// Request correlation and event routing.
///
/// Use [`Dispatcher::channel()`] for an in-process dispatcher, or
/// [`NativeHost`] for one bound to a helper process.
pub mod dispatcher;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Port and request identifiers.
pub mod identifiers;

/// Dispatcher configuration.
pub mod options;

/// Serial port handle.
pub mod port;

/// Wire message types.
///
/// Commands, events, port descriptors and the frames that carry them.
pub mod protocol;

/// Transport layer.
///
/// Command delivery, native-messaging framing and the helper relay.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Dispatcher types
pub use dispatcher::{Dispatcher, PendingKey, Reply};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::PortId;

// Configuration
pub use options::{BridgeOptions, DesyncPolicy};

// Port types
pub use port::{CloseCallback, DataCallback, ErrorCallback, ModeOptions, SerialPort};

// Protocol types
pub use protocol::{
    Command, Event, InboundFrame, Origin, OutboundFrame, PortDescriptor, PortFilter, PortFilters,
    filter_ports,
};

// Transport types
pub use transport::{ChannelTransport, NativeHost, NativeHostBuilder, Relay, Transport};
