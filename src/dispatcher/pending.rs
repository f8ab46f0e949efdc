//! Pending-request table.
//!
//! Callers waiting for a reply are grouped under the event name of the reply
//! they expect. Several callers may wait under one key; each is settled on
//! its own. A key whose list becomes empty is removed at once.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::identifiers::PendingId;
use crate::port::PortShared;
use crate::protocol::{PortDescriptor, PortFilters, filter_ports};

// ============================================================================
// PendingKey
// ============================================================================

/// Reply kind a pending request waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingKey {
    /// Port enumeration.
    SerialPorts,
    /// Port open.
    PortOpen,
}

impl PendingKey {
    /// Returns the event name of the awaited reply.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SerialPorts => "SerialPorts",
            Self::PortOpen => "PortOpen",
        }
    }
}

impl fmt::Display for PendingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// PendingRequest
// ============================================================================

/// What a pending caller is waiting for and how to answer it.
pub(crate) enum Waiter {
    /// A `requestPorts` caller and its own filters.
    Ports {
        filters: PortFilters,
        tx: oneshot::Sender<Result<Vec<PortDescriptor>>>,
    },
    /// A `connect` caller and the handle to attach.
    Open {
        port: Arc<PortShared>,
        tx: oneshot::Sender<Result<Value>>,
    },
}

/// One caller awaiting a correlated reply.
pub(crate) struct PendingRequest {
    pub(crate) id: PendingId,
    pub(crate) waiter: Waiter,
}

impl PendingRequest {
    pub(crate) fn ports(
        id: PendingId,
        filters: PortFilters,
        tx: oneshot::Sender<Result<Vec<PortDescriptor>>>,
    ) -> Self {
        Self {
            id,
            waiter: Waiter::Ports { filters, tx },
        }
    }

    pub(crate) fn open(
        id: PendingId,
        port: Arc<PortShared>,
        tx: oneshot::Sender<Result<Value>>,
    ) -> Self {
        Self {
            id,
            waiter: Waiter::Open { port, tx },
        }
    }

    #[inline]
    pub(crate) fn key(&self) -> PendingKey {
        match self.waiter {
            Waiter::Ports { .. } => PendingKey::SerialPorts,
            Waiter::Open { .. } => PendingKey::PortOpen,
        }
    }

    /// Device path an open is waiting on.
    #[inline]
    pub(crate) fn device_path(&self) -> Option<&str> {
        match &self.waiter {
            Waiter::Open { port, .. } => Some(port.device_path()),
            Waiter::Ports { .. } => None,
        }
    }

    /// Fails the caller. The receiver may already be gone; that is fine.
    pub(crate) fn reject(self, error: Error) {
        match self.waiter {
            Waiter::Ports { tx, .. } => {
                let _ = tx.send(Err(error));
            }
            Waiter::Open { port, tx } => {
                port.end_opening();
                let _ = tx.send(Err(error));
            }
        }
    }

    /// Drops the entry without answering.
    pub(crate) fn abandon(self) {
        if let Waiter::Open { port, .. } = self.waiter {
            port.end_opening();
        }
    }
}

// ============================================================================
// PendingTable
// ============================================================================

/// Pending requests grouped by awaited reply kind, FIFO within a key.
#[derive(Default)]
pub(crate) struct PendingTable {
    entries: FxHashMap<PendingKey, Vec<PendingRequest>>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends an entry under its key.
    pub(crate) fn add(&mut self, entry: PendingRequest) {
        self.entries.entry(entry.key()).or_default().push(entry);
    }

    /// Removes and returns every entry under `key`.
    pub(crate) fn take_all(&mut self, key: PendingKey) -> Vec<PendingRequest> {
        self.entries.remove(&key).unwrap_or_default()
    }

    /// Removes and returns the entries under `key` matching `predicate`.
    pub(crate) fn take_matching<P>(&mut self, key: PendingKey, predicate: P) -> Vec<PendingRequest>
    where
        P: Fn(&PendingRequest) -> bool,
    {
        let Some(list) = self.entries.get_mut(&key) else {
            return Vec::new();
        };

        let (taken, kept): (Vec<_>, Vec<_>) = list.drain(..).partition(|entry| predicate(entry));
        *list = kept;
        self.prune(key);
        taken
    }

    /// Removes and returns the oldest entry under `key` matching `predicate`.
    pub(crate) fn take_first_matching<P>(&mut self, key: PendingKey, predicate: P) -> Option<PendingRequest>
    where
        P: Fn(&PendingRequest) -> bool,
    {
        let list = self.entries.get_mut(&key)?;
        let index = list.iter().position(predicate)?;
        let entry = list.remove(index);
        self.prune(key);
        Some(entry)
    }

    /// Removes one entry by id.
    pub(crate) fn remove(&mut self, id: PendingId) -> Option<PendingRequest> {
        let key = self
            .entries
            .iter()
            .find(|(_, list)| list.iter().any(|entry| entry.id == id))
            .map(|(key, _)| *key)?;
        self.take_first_matching(key, |entry| entry.id == id)
    }

    /// Answers every port-enumeration caller, each with its own filtered
    /// view of `ports`, and clears the key. Returns how many were answered.
    pub(crate) fn resolve_all(&mut self, ports: &[PortDescriptor]) -> usize {
        let entries = self.take_all(PendingKey::SerialPorts);
        let count = entries.len();

        for entry in entries {
            if let Waiter::Ports { filters, tx } = entry.waiter {
                let _ = tx.send(Ok(filter_ports(ports, &filters)));
            }
        }

        count
    }

    /// Fails every caller under `key` and clears it.
    pub(crate) fn reject_all<E>(&mut self, key: PendingKey, make_error: E) -> usize
    where
        E: Fn() -> Error,
    {
        let entries = self.take_all(key);
        let count = entries.len();
        entries.into_iter().for_each(|entry| entry.reject(make_error()));
        count
    }

    /// Fails the callers under `key` matching `predicate`.
    pub(crate) fn reject_matching<P, E>(&mut self, key: PendingKey, predicate: P, make_error: E) -> usize
    where
        P: Fn(&PendingRequest) -> bool,
        E: Fn() -> Error,
    {
        let entries = self.take_matching(key, predicate);
        let count = entries.len();
        entries.into_iter().for_each(|entry| entry.reject(make_error()));
        count
    }

    /// Removes every entry.
    pub(crate) fn drain(&mut self) -> Vec<PendingRequest> {
        self.entries.drain().flat_map(|(_, list)| list).collect()
    }

    /// Total number of pending entries.
    pub(crate) fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Number of entries under `key`.
    pub(crate) fn len_of(&self, key: PendingKey) -> usize {
        self.entries.get(&key).map_or(0, Vec::len)
    }

    /// Returns `true` if `key` has a list.
    pub(crate) fn contains_key(&self, key: PendingKey) -> bool {
        self.entries.contains_key(&key)
    }

    fn prune(&mut self, key: PendingKey) {
        if self.entries.get(&key).is_some_and(Vec::is_empty) {
            self.entries.remove(&key);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
