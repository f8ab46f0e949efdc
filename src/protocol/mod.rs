//! Message types exchanged with the native helper.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Discriminator | Purpose |
//! |--------------|-----------|---------------|---------|
//! | [`Command`] | Local → Helper | `command` | Request or fire-and-forget action |
//! | [`Event`] | Helper → Local | `event` | Reply, data, or out-of-band notice |
//! | [`OutboundFrame`] | Local → Relay | `type` | Tagged wrapper around a command |
//! | [`InboundFrame`] | Relay → Local | `type` + origin | Tagged wrapper around an event |
//!
//! Errors from the helper echo the failed command back as serialized text in
//! `inResponseTo`; see [`EchoedCommand`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Outbound commands and echoed command parsing |
//! | `descriptor` | Port descriptors and filters |
//! | `event` | Inbound events |
//! | `frame` | Tagged frames and origin checks |

// ============================================================================
// Submodules
// ============================================================================

/// Outbound commands.
pub mod command;

/// Port descriptors and filter matching.
pub mod descriptor;

/// Inbound events.
pub mod event;

/// Tagged frames.
pub mod frame;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{Command, EchoedCommand};
pub use descriptor::{PortDescriptor, PortFilter, PortFilters, filter_ports};
pub use event::Event;
pub use frame::{InboundFrame, Origin, OutboundFrame};
