//! Request correlation and port routing.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  Command   ┌───────────┐        ┌──────────────┐
//! │  SerialPort  │──────────► │ Transport │──────► │ Native helper│
//! │  / caller    │            └───────────┘        └──────┬───────┘
//! │      ▲       │                                        │ Event
//! │      │ Reply │   ┌────────────────────────────┐       │
//! │      └───────┼───┤ Dispatcher                 │◄──────┘
//! └──────────────┘   │  PendingTable  (by kind)   │
//!                    │  PortRegistry  (by PortId) │
//!                    └────────────────────────────┘
//! ```
//!
//! Replies are correlated by kind, not by request id: all pending port
//! listings share one `SerialPorts` reply, and opens are told apart by
//! device path. Helper errors echo the failed command, which is how they
//! find their caller.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | [`Dispatcher`] and event routing |
//! | `pending` | Pending-request table |
//! | `registry` | Open-port registry |
//! | `reply` | [`Reply`] future |

// ============================================================================
// Submodules
// ============================================================================

mod core;
mod pending;
mod registry;
mod reply;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::Dispatcher;
pub use pending::PendingKey;
pub use reply::Reply;
