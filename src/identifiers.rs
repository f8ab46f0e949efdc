//! Type-safe identifiers.
//!
//! Newtype wrappers keep helper-assigned port ids apart from the crate's own
//! pending-request ids.
//!
//! | Type | Assigned by | Purpose |
//! |------|-------------|---------|
//! | [`PortId`] | Native helper | Addresses an open serial port |
//! | [`PendingId`] | Dispatcher | Addresses one pending request entry |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Wire value meaning "no port" / "not open".
pub const DETACHED: i64 = -1;

// ============================================================================
// PortId
// ============================================================================

/// Server-assigned handle of an open serial port.
///
/// Unique among currently open ports. The helper recycles ids once a port
/// closes, so an id alone never identifies a port across its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortId(u32);

impl PortId {
    /// Creates a port id.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Converts a signed wire value, mapping negatives to `None`.
    #[inline]
    #[must_use]
    pub fn from_wire(raw: i64) -> Option<Self> {
        u32::try_from(raw).ok().map(Self)
    }

    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns the id as a signed wire value.
    #[inline]
    #[must_use]
    pub const fn to_wire(self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// PendingId
// ============================================================================

/// Global counter for pending-request ids.
static NEXT_PENDING_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one pending request entry.
///
/// Used to remove a single entry when its reply times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingId(u64);

impl PendingId {
    /// Allocates the next id.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_PENDING_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PendingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
