//! Serial port handle.
//!
//! A [`SerialPort`] starts detached, holding only a device path and its mode
//! options. [`SerialPort::connect`] asks the helper to open it; once the
//! matching `PortOpen` event arrives the handle carries a helper-assigned
//! [`PortId`] and sits in the dispatcher's registry until `PortClosed`.
//!
//! # Example
//!
//! ```ignore
//! use webserial_bridge::{Dispatcher, ModeOptions, SerialPort};
//!
//! # async fn example(dispatcher: Dispatcher) -> webserial_bridge::Result<()> {
//! let port = SerialPort::new(&dispatcher, "/dev/ttyUSB0", ModeOptions::new());
//! port.set_on_close(|| println!("closed"));
//! port.connect(|bytes| println!("read {} bytes", bytes.len())).await?;
//! port.write(b"AT\r\n")?;
//! port.disconnect()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace};

use crate::codec;
use crate::dispatcher::{Dispatcher, Reply};
use crate::error::Result;
use crate::identifiers::{DETACHED, PortId};
use crate::protocol::{Command, PortDescriptor, PortFilters, filter_ports};

// ============================================================================
// Types
// ============================================================================

/// Called with each chunk of bytes read from the port.
pub type DataCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Called once when the port closes.
pub type CloseCallback = Arc<dyn Fn() + Send + Sync>;

/// Called with the helper's description of a runtime port error.
pub type ErrorCallback = Arc<dyn Fn(String) + Send + Sync>;

// ============================================================================
// ModeOptions
// ============================================================================

/// Open options, flattened into a query-like mode string.
///
/// Insertion order is kept. Keys and values are percent-encoded, so a value
/// containing `&` or `=` cannot split into extra options. Plain ASCII
/// options produce the same `&key=value` text as unencoded concatenation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeOptions(Vec<(String, String)>);

impl ModeOptions {
    /// Creates empty options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an option.
    #[inline]
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.0.push((key.into(), value.to_string()));
        self
    }

    /// Returns `&key=value` for every option, concatenated.
    #[must_use]
    pub fn to_query(&self) -> String {
        self.0
            .iter()
            .map(|(key, value)| {
                format!(
                    "&{}={}",
                    urlencoding::encode(key),
                    urlencoding::encode(value)
                )
            })
            .collect()
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for ModeOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.to_string()))
                .collect(),
        )
    }
}

// ============================================================================
// PortShared
// ============================================================================

/// Callback slots of one handle.
#[derive(Default, Clone)]
struct PortCallbacks {
    data: Option<DataCallback>,
    close: Option<CloseCallback>,
    error: Option<ErrorCallback>,
}

/// State shared between a handle, its clones and the registry.
pub(crate) struct PortShared {
    device_path: String,
    mode_string: String,
    /// Helper-assigned id, or [`DETACHED`].
    id: AtomicI64,
    /// Set while an `open` for this handle is pending.
    opening: AtomicBool,
    callbacks: Mutex<PortCallbacks>,
}

impl PortShared {
    fn new(device_path: String, mode_string: String) -> Self {
        Self {
            device_path,
            mode_string,
            id: AtomicI64::new(DETACHED),
            opening: AtomicBool::new(false),
            callbacks: Mutex::new(PortCallbacks::default()),
        }
    }

    #[cfg(test)]
    pub(crate) fn new_detached(device_path: &str) -> Self {
        Self::new(device_path.to_string(), String::new())
    }

    #[inline]
    pub(crate) fn device_path(&self) -> &str {
        &self.device_path
    }

    #[inline]
    pub(crate) fn id(&self) -> Option<PortId> {
        PortId::from_wire(self.id.load(Ordering::Acquire))
    }

    /// Records the helper-assigned id and ends the opening phase.
    pub(crate) fn attach(&self, id: PortId) {
        self.id.store(id.to_wire(), Ordering::Release);
        self.opening.store(false, Ordering::Release);
    }

    /// Resets the id, returning the one it held.
    pub(crate) fn detach(&self) -> Option<PortId> {
        PortId::from_wire(self.id.swap(DETACHED, Ordering::AcqRel))
    }

    /// Marks an open as in flight. Returns `false` if one already was.
    pub(crate) fn begin_opening(&self) -> bool {
        !self.opening.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn end_opening(&self) {
        self.opening.store(false, Ordering::Release);
    }

    pub(crate) fn set_data_callback(&self, callback: DataCallback) {
        self.callbacks.lock().data = Some(callback);
    }

    pub(crate) fn data_callback(&self) -> Option<DataCallback> {
        self.callbacks.lock().data.clone()
    }

    pub(crate) fn close_callback(&self) -> Option<CloseCallback> {
        self.callbacks.lock().close.clone()
    }

    pub(crate) fn error_callback(&self) -> Option<ErrorCallback> {
        self.callbacks.lock().error.clone()
    }
}

// ============================================================================
// SerialPort
// ============================================================================

/// Handle to one serial connection attempt or session.
///
/// Clones share state: an id assigned through one clone is visible through
/// all of them.
#[derive(Clone)]
pub struct SerialPort {
    shared: Arc<PortShared>,
    dispatcher: Dispatcher,
}

impl SerialPort {
    /// Creates a detached handle.
    #[must_use]
    pub fn new(dispatcher: &Dispatcher, device_path: impl Into<String>, mode: ModeOptions) -> Self {
        let device_path = device_path.into();
        debug!(device_path = %device_path, "Creating serial port handle");

        Self {
            shared: Arc::new(PortShared::new(device_path, mode.to_query())),
            dispatcher: dispatcher.clone(),
        }
    }

    pub(crate) fn from_shared(dispatcher: &Dispatcher, shared: Arc<PortShared>) -> Self {
        Self {
            shared,
            dispatcher: dispatcher.clone(),
        }
    }

    /// Enumerates ports; see [`Dispatcher::request_ports`].
    #[inline]
    pub fn request_ports(
        dispatcher: &Dispatcher,
        filters: impl Into<PortFilters>,
    ) -> Reply<Vec<PortDescriptor>> {
        dispatcher.request_ports(filters)
    }

    /// Returns the ports matching every filter.
    #[inline]
    #[must_use]
    pub fn filter_ports(
        ports: &[PortDescriptor],
        filters: impl Into<PortFilters>,
    ) -> Vec<PortDescriptor> {
        filter_ports(ports, &filters.into())
    }

    /// Returns the device path.
    #[inline]
    #[must_use]
    pub fn device_path(&self) -> &str {
        &self.shared.device_path
    }

    /// Returns the flattened mode options.
    #[inline]
    #[must_use]
    pub fn mode_string(&self) -> &str {
        &self.shared.mode_string
    }

    /// Returns the helper-assigned id while open.
    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<PortId> {
        self.shared.id()
    }

    /// Returns `true` while the port is open.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.id().is_some()
    }

    /// Opens the port, delivering every chunk read from it to `on_data`.
    ///
    /// The returned reply settles with the `PortOpen` payload, or fails with
    /// the helper's error for this device path. Fails at once with
    /// [`Error::AlreadyOpen`] or [`Error::OpenInProgress`] if the handle is
    /// open or opening.
    ///
    /// [`Error::AlreadyOpen`]: crate::Error::AlreadyOpen
    /// [`Error::OpenInProgress`]: crate::Error::OpenInProgress
    pub fn connect<F>(&self, on_data: F) -> Reply<Value>
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        self.dispatcher.open(&self.shared, Arc::new(on_data))
    }

    /// Asks the helper to close the port.
    ///
    /// Returns without waiting. The id stays set until the `PortClosed`
    /// event arrives. Does nothing on a detached handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`](crate::Error::ConnectionClosed) if
    /// the transport is gone.
    pub fn disconnect(&self) -> Result<()> {
        match self.id() {
            Some(id) => {
                debug!(id = %id, device_path = %self.device_path(), "Closing serial port");
                self.dispatcher.post(Command::Close { id })
            }
            None => Ok(()),
        }
    }

    /// Writes bytes to the port. Does nothing on a detached handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`](crate::Error::ConnectionClosed) if
    /// the transport is gone.
    pub fn write(&self, bytes: impl AsRef<[u8]>) -> Result<()> {
        let Some(id) = self.id() else {
            trace!(device_path = %self.device_path(), "Write on detached port ignored");
            return Ok(());
        };

        let data = codec::encode(bytes.as_ref());
        self.dispatcher.post(Command::Write { id, data })
    }

    /// Sets the close callback.
    pub fn set_on_close<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.callbacks.lock().close = Some(Arc::new(callback));
    }

    /// Returns the close callback.
    #[must_use]
    pub fn on_close(&self) -> Option<CloseCallback> {
        self.shared.close_callback()
    }

    /// Sets the error callback.
    pub fn set_on_error<F>(&self, callback: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.shared.callbacks.lock().error = Some(Arc::new(callback));
    }

    /// Returns the error callback.
    #[must_use]
    pub fn on_error(&self) -> Option<ErrorCallback> {
        self.shared.error_callback()
    }

    /// Returns `true` if both handles share state.
    #[inline]
    #[must_use]
    pub fn same_port(&self, other: &SerialPort) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl fmt::Debug for SerialPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialPort")
            .field("device_path", &self.device_path())
            .field("mode_string", &self.mode_string())
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
