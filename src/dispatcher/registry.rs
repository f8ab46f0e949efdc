//! Registry of open ports.
//!
//! Holds only handles with a helper-assigned id. A handful of ports is the
//! expected size, so lookups scan linearly.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tracing::warn;

use crate::identifiers::PortId;
use crate::port::PortShared;

// ============================================================================
// PortRegistry
// ============================================================================

/// The live set of open ports.
#[derive(Default)]
pub(crate) struct PortRegistry {
    open: Vec<Arc<PortShared>>,
}

impl PortRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds an attached port. Detached ports are refused.
    pub(crate) fn register(&mut self, port: Arc<PortShared>) -> bool {
        if port.id().is_none() {
            warn!(device_path = %port.device_path(), "Refusing to register detached port");
            return false;
        }
        self.open.push(port);
        true
    }

    /// Finds the open port with `id`.
    pub(crate) fn find_by_id(&self, id: PortId) -> Option<&Arc<PortShared>> {
        self.open.iter().find(|port| port.id() == Some(id))
    }

    /// Removes the first port with `id`.
    pub(crate) fn unregister(&mut self, id: PortId) -> Option<Arc<PortShared>> {
        let index = self.open.iter().position(|port| port.id() == Some(id))?;
        Some(self.open.remove(index))
    }

    /// Removes every port.
    pub(crate) fn drain(&mut self) -> Vec<Arc<PortShared>> {
        std::mem::take(&mut self.open)
    }

    pub(crate) fn len(&self) -> usize {
        self.open.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
