//! Event router.
//!
//! Every inbound frame passes through [`Dispatcher::on_inbound_message`].
//! Each event is handled under one lock over the pending table and port
//! registry, so routing sees a consistent view. User callbacks run after the
//! lock is released and may call back into the dispatcher.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace, warn};

use crate::codec;
use crate::error::{Error, Result};
use crate::identifiers::{PendingId, PortId};
use crate::options::{BridgeOptions, DesyncPolicy};
use crate::port::{CloseCallback, DataCallback, ErrorCallback, ModeOptions, PortShared, SerialPort};
use crate::protocol::event::error_text;
use crate::protocol::{
    Command, EchoedCommand, Event, InboundFrame, OutboundFrame, PortDescriptor, PortFilters,
};
use crate::transport::{ChannelTransport, Transport};

use super::pending::{PendingKey, PendingRequest, PendingTable, Waiter};
use super::registry::PortRegistry;
use super::reply::{Expiry, Reply};

// ============================================================================
// DispatchState
// ============================================================================

/// Everything the router mutates, behind a single lock.
#[derive(Default)]
pub(crate) struct DispatchState {
    pub(crate) pending: PendingTable,
    pub(crate) registry: PortRegistry,
}

impl DispatchState {
    fn new() -> Self {
        Self {
            pending: PendingTable::new(),
            registry: PortRegistry::new(),
        }
    }
}

// ============================================================================
// Notice
// ============================================================================

/// A callback to run once the state lock is released.
enum Notice {
    Data(DataCallback, Vec<u8>),
    Closed(CloseCallback),
    Failed(ErrorCallback, String),
}

impl Notice {
    fn deliver(self) {
        match self {
            Self::Data(callback, bytes) => callback(bytes),
            Self::Closed(callback) => callback(),
            Self::Failed(callback, message) => callback(message),
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

struct DispatcherInner {
    state: Arc<Mutex<DispatchState>>,
    transport: Box<dyn Transport>,
    options: BridgeOptions,
}

/// Correlates requests with replies and routes port events.
///
/// Cheap to clone; clones share one pending table and one registry.
/// Independent dispatchers share nothing.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    /// Creates a dispatcher posting commands through `transport`.
    #[must_use]
    pub fn new(transport: impl Transport + 'static, options: BridgeOptions) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                state: Arc::new(Mutex::new(DispatchState::new())),
                transport: Box::new(transport),
                options,
            }),
        }
    }

    /// Creates a dispatcher over an in-process channel.
    ///
    /// Outbound frames appear on the returned receiver.
    #[must_use]
    pub fn channel(options: BridgeOptions) -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (transport, rx) = ChannelTransport::new();
        (Self::new(transport, options), rx)
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &BridgeOptions {
        &self.inner.options
    }

    /// Creates a detached port handle bound to this dispatcher.
    #[inline]
    #[must_use]
    pub fn port(&self, device_path: impl Into<String>, mode: ModeOptions) -> SerialPort {
        SerialPort::new(self, device_path, mode)
    }

    /// Returns the open port with `id`.
    #[must_use]
    pub fn find_port(&self, id: PortId) -> Option<SerialPort> {
        let state = self.inner.state.lock();
        state
            .registry
            .find_by_id(id)
            .map(|shared| SerialPort::from_shared(self, Arc::clone(shared)))
    }

    /// Returns the number of open ports.
    #[inline]
    #[must_use]
    pub fn open_port_count(&self) -> usize {
        self.inner.state.lock().registry.len()
    }

    /// Returns the number of requests awaiting a reply.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Returns the number of requests awaiting a reply of `key`.
    #[inline]
    #[must_use]
    pub fn pending_count_of(&self, key: PendingKey) -> usize {
        self.inner.state.lock().pending.len_of(key)
    }

    /// Returns `true` if any list exists under `key`.
    #[inline]
    #[must_use]
    pub fn has_pending_key(&self, key: PendingKey) -> bool {
        self.inner.state.lock().pending.contains_key(key)
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Asks the helper for its port list.
    ///
    /// Every caller waiting when the `SerialPorts` event arrives receives the
    /// same list, narrowed by its own `filters`.
    pub fn request_ports(&self, filters: impl Into<PortFilters>) -> Reply<Vec<PortDescriptor>> {
        let (tx, rx) = oneshot::channel();
        let id = PendingId::next();

        self.inner
            .state
            .lock()
            .pending
            .add(PendingRequest::ports(id, filters.into(), tx));

        if let Err(e) = self.post(Command::ListPorts) {
            self.inner.state.lock().pending.remove(id);
            return Reply::failed(e);
        }

        Reply::waiting(rx, self.expiry(id, PendingKey::SerialPorts))
    }

    /// Asks the helper to open `port`.
    pub(crate) fn open(&self, port: &Arc<PortShared>, on_data: DataCallback) -> Reply<Value> {
        let (tx, rx) = oneshot::channel();
        let id = PendingId::next();

        {
            // Attach happens under this lock, so the id check cannot go stale.
            let mut state = self.inner.state.lock();

            if let Some(open_id) = port.id() {
                return Reply::failed(Error::already_open(port.device_path(), open_id));
            }
            if !port.begin_opening() {
                return Reply::failed(Error::open_in_progress(port.device_path()));
            }

            port.set_data_callback(on_data);
            state.pending.add(PendingRequest::open(id, Arc::clone(port), tx));
        }

        debug!(device_path = %port.device_path(), "Opening serial port");

        let command = Command::Open {
            device_path: port.device_path().to_string(),
            baud_rate: self.inner.options.baud_rate,
        };

        if let Err(e) = self.post(command) {
            if let Some(entry) = self.inner.state.lock().pending.remove(id) {
                entry.abandon();
            }
            return Reply::failed(e);
        }

        Reply::waiting(rx, self.expiry(id, PendingKey::PortOpen))
    }

    /// Posts `close` for every open port without waiting.
    ///
    /// Each port is detached and dropped from the registry immediately, so
    /// later `PortClosed` events for them are ignored.
    pub fn close_all(&self) {
        let ports = self.inner.state.lock().registry.drain();

        for port in ports {
            if let Some(id) = port.detach() {
                debug!(id = %id, device_path = %port.device_path(), "Closing port");
                if let Err(e) = self.post(Command::Close { id }) {
                    warn!(id = %id, error = %e, "Failed to post close");
                }
            }
        }
    }

    /// Sends one command through the transport.
    pub(crate) fn post(&self, command: Command) -> Result<()> {
        trace!(command = command.name(), "Posting command");
        let frame = OutboundFrame::new(self.inner.options.outbound_tag.clone(), command);
        self.inner.transport.post(frame)
    }

    fn expiry(&self, id: PendingId, key: PendingKey) -> Option<Expiry> {
        self.inner
            .options
            .request_timeout
            .map(|timeout| Expiry::new(id, key, timeout, Arc::clone(&self.inner.state)))
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Entry point for every frame seen on the shared channel.
    ///
    /// Frames from other senders or with another tag are ignored, as are
    /// messages that are not events this crate knows. Never fails.
    pub fn on_inbound_message(&self, frame: &InboundFrame) {
        if !frame.is_accepted(&self.inner.options.inbound_tag) {
            trace!(origin = ?frame.origin, tag = %frame.tag, "Ignoring frame");
            return;
        }

        match Event::from_message(&frame.message) {
            Ok(Some(event)) => self.dispatch(event),
            Ok(None) => trace!("Ignoring message without known event"),
            Err(e) => warn!(error = %e, "Malformed event dropped"),
        }
    }

    /// Routes one parsed event.
    pub fn dispatch(&self, event: Event) {
        trace!(event = event.name(), "Dispatching event");

        let notices = {
            let mut state = self.inner.state.lock();

            match event {
                Event::SerialPorts { data } => {
                    Self::handle_serial_ports(&mut state, data.unwrap_or_default())
                }
                Event::PortOpen {
                    device_path,
                    id,
                    data,
                } => self.handle_port_open(&mut state, &device_path, id, data),
                Event::Data { id, data } => Self::handle_data(&state, id, &data),
                Event::PortClosed { id } => Self::handle_port_closed(&mut state, id),
                Event::Error {
                    error,
                    in_response_to,
                    id,
                } => self.handle_error(&mut state, &error, &in_response_to, id),
                Event::AppExited => {
                    warn!("Native helper exited");
                    Self::tear_down(&mut state, || Error::HelperExited)
                }
            }
        };

        for notice in notices {
            notice.deliver();
        }
    }

    fn handle_serial_ports(state: &mut DispatchState, ports: Vec<PortDescriptor>) -> Vec<Notice> {
        let answered = state.pending.resolve_all(&ports);
        debug!(ports = ports.len(), answered, "Port list received");
        Vec::new()
    }

    fn handle_port_open(
        &self,
        state: &mut DispatchState,
        device_path: &str,
        id: PortId,
        data: Value,
    ) -> Vec<Notice> {
        let entry = state.pending.take_first_matching(PendingKey::PortOpen, |entry| {
            entry.device_path() == Some(device_path)
        });

        let Some(entry) = entry else {
            warn!(device_path, id = %id, "PortOpen with no pending caller; closing it");
            if let Err(e) = self.post(Command::Close { id }) {
                warn!(id = %id, error = %e, "Failed to post close");
            }
            return Vec::new();
        };

        if let Waiter::Open { port, tx } = entry.waiter {
            port.attach(id);
            state.registry.register(Arc::clone(&port));
            debug!(device_path, id = %id, "Port opened");
            let _ = tx.send(Ok(data));
        }

        Vec::new()
    }

    fn handle_data(state: &DispatchState, id: PortId, data: &str) -> Vec<Notice> {
        let bytes = match codec::decode(data) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(id = %id, error = %e, "Undecodable data dropped");
                return Vec::new();
            }
        };

        let callback = state.registry.find_by_id(id).and_then(|port| port.data_callback());

        match callback {
            Some(callback) => vec![Notice::Data(callback, bytes)],
            None => {
                trace!(id = %id, len = bytes.len(), "Data for unknown port dropped");
                Vec::new()
            }
        }
    }

    fn handle_port_closed(state: &mut DispatchState, id: PortId) -> Vec<Notice> {
        let Some(port) = state.registry.unregister(id) else {
            trace!(id = %id, "PortClosed for unknown port");
            return Vec::new();
        };

        port.detach();
        debug!(id = %id, device_path = %port.device_path(), "Port closed");

        port.close_callback().map(Notice::Closed).into_iter().collect()
    }

    fn handle_error(
        &self,
        state: &mut DispatchState,
        error: &Value,
        in_response_to: &str,
        id: Option<i64>,
    ) -> Vec<Notice> {
        let message = error_text(error);
        warn!(error = %message, "Error event received");

        let echoed = match EchoedCommand::parse(in_response_to) {
            Ok(echoed) => echoed,
            Err(_) => {
                error!(
                    in_response_to,
                    "Unparsable error correlation; channel between page and helper is desynchronized"
                );
                return match self.inner.options.desync_policy {
                    DesyncPolicy::LogOnly => Vec::new(),
                    DesyncPolicy::TearDown => {
                        Self::tear_down(state, || Error::desync(in_response_to))
                    }
                };
            }
        };

        let command = echoed.as_ref().and_then(|echoed| echoed.command.as_deref());

        match command {
            Some("listPorts") => {
                let rejected = state
                    .pending
                    .reject_all(PendingKey::SerialPorts, || Error::remote(&message));
                debug!(rejected, "Port list request failed");
                Vec::new()
            }
            Some("open") => {
                let device_path = echoed.as_ref().and_then(|echoed| echoed.device_path.as_deref());
                let rejected = state.pending.reject_matching(
                    PendingKey::PortOpen,
                    |entry| device_path.is_some() && entry.device_path() == device_path,
                    || Error::remote(&message),
                );
                debug!(device_path = ?device_path, rejected, "Open request failed");
                Vec::new()
            }
            _ => match id.and_then(PortId::from_wire) {
                Some(id) => Self::port_error(state, id, message),
                None => {
                    debug!(error = %message, "Unaddressed error dropped");
                    Vec::new()
                }
            },
        }
    }

    fn port_error(state: &DispatchState, id: PortId, message: String) -> Vec<Notice> {
        let callback = state
            .registry
            .find_by_id(id)
            .and_then(|port| port.error_callback());

        match callback {
            Some(callback) => vec![Notice::Failed(callback, message)],
            None => {
                debug!(id = %id, error = %message, "Port error with no handler dropped");
                Vec::new()
            }
        }
    }

    /// Fails every pending request and detaches every open port.
    fn tear_down<E>(state: &mut DispatchState, make_error: E) -> Vec<Notice>
    where
        E: Fn() -> Error,
    {
        let pending = state.pending.drain();
        let ports = state.registry.drain();
        debug!(pending = pending.len(), ports = ports.len(), "Tearing down");

        for entry in pending {
            entry.reject(make_error());
        }

        ports
            .into_iter()
            .filter_map(|port| {
                port.detach();
                port.close_callback().map(Notice::Closed)
            })
            .collect()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("options", &self.inner.options)
            .field("pending", &self.pending_count())
            .field("open_ports", &self.open_port_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio_test::{assert_pending, assert_ready_err, assert_ready_ok, task};

    use crate::protocol::PortFilter;

    fn setup() -> (Dispatcher, UnboundedReceiver<OutboundFrame>) {
        Dispatcher::channel(BridgeOptions::default())
    }

    fn inbound(message: Value) -> InboundFrame {
        InboundFrame::trusted("fromgws", message)
    }

    fn sent(rx: &mut UnboundedReceiver<OutboundFrame>) -> Command {
        rx.try_recv().expect("expected an outbound command").message
    }

    fn opened(dispatcher: &Dispatcher, path: &str, id: u32) -> SerialPort {
        let port = dispatcher.port(path, ModeOptions::new());
        let mut reply = task::spawn(port.connect(|_| {}));
        dispatcher.on_inbound_message(&inbound(json!({
            "event": "PortOpen", "devicePath": path, "id": id
        })));
        assert_ready_ok!(reply.poll());
        port
    }

    fn arduino_list() -> Value {
        json!({
            "event": "SerialPorts",
            "data": [
                { "path": "/dev/ttyACM0", "vendorId": "2341" },
                { "path": "/dev/ttyUSB0", "vendorId": "0403" }
            ]
        })
    }

    #[test]
    fn test_request_ports_posts_list_command() {
        let (dispatcher, mut rx) = setup();
        let _reply = dispatcher.request_ports(PortFilters::none());

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.tag, "togws");
        assert_eq!(frame.message, Command::ListPorts);
        assert_eq!(dispatcher.pending_count_of(PendingKey::SerialPorts), 1);
    }

    #[test]
    fn test_concurrent_port_requests_share_one_reply() {
        let (dispatcher, _rx) = setup();
        let mut all = task::spawn(dispatcher.request_ports(PortFilters::none()));
        let mut ftdi = task::spawn(
            dispatcher.request_ports(PortFilter::new().with("vendorId", "0403")),
        );
        assert_pending!(all.poll());
        assert_pending!(ftdi.poll());

        dispatcher.on_inbound_message(&inbound(arduino_list()));

        assert_eq!(assert_ready_ok!(all.poll()).len(), 2);
        let filtered = assert_ready_ok!(ftdi.poll());
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].get_str("path"), Some("/dev/ttyUSB0"));
        assert!(!dispatcher.has_pending_key(PendingKey::SerialPorts));

        // A later list finds nobody waiting.
        dispatcher.on_inbound_message(&inbound(arduino_list()));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[test]
    fn test_opens_resolve_to_matching_handles_in_any_order() {
        let (dispatcher, mut rx) = setup();
        let x = dispatcher.port("/dev/x", ModeOptions::new());
        let y = dispatcher.port("/dev/y", ModeOptions::new());

        let mut x_reply = task::spawn(x.connect(|_| {}));
        let mut y_reply = task::spawn(y.connect(|_| {}));
        assert_eq!(
            sent(&mut rx),
            Command::Open { device_path: "/dev/x".into(), baud_rate: 57_600 }
        );
        assert_eq!(
            sent(&mut rx),
            Command::Open { device_path: "/dev/y".into(), baud_rate: 57_600 }
        );

        dispatcher.on_inbound_message(&inbound(json!({
            "event": "PortOpen", "devicePath": "/dev/y", "id": 1, "data": "y-info"
        })));
        assert_pending!(x_reply.poll());
        assert_eq!(assert_ready_ok!(y_reply.poll()), json!("y-info"));

        dispatcher.on_inbound_message(&inbound(json!({
            "event": "PortOpen", "devicePath": "/dev/x", "id": 0
        })));
        assert_eq!(assert_ready_ok!(x_reply.poll()), Value::Null);

        assert_eq!(x.id(), Some(PortId::new(0)));
        assert_eq!(y.id(), Some(PortId::new(1)));
        assert!(dispatcher.find_port(PortId::new(0)).unwrap().same_port(&x));
        assert!(dispatcher.find_port(PortId::new(1)).unwrap().same_port(&y));
    }

    #[test]
    fn test_port_closed_detaches_and_unregisters() {
        let (dispatcher, _rx) = setup();
        let port = opened(&dispatcher, "/dev/x", 4);
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closes);
        port.set_on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(dispatcher.find_port(PortId::new(4)).is_some());

        dispatcher.on_inbound_message(&inbound(json!({ "event": "PortClosed", "id": 4 })));

        assert_eq!(port.id(), None);
        assert!(dispatcher.find_port(PortId::new(4)).is_none());
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        // Repeated close is a no-op.
        dispatcher.on_inbound_message(&inbound(json!({ "event": "PortClosed", "id": 4 })));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_data_reaches_matching_port_only() {
        let (dispatcher, _rx) = setup();
        let received = Arc::new(Mutex::new(Vec::new()));

        let port = dispatcher.port("/dev/x", ModeOptions::new());
        let sink = Arc::clone(&received);
        let mut reply = task::spawn(port.connect(move |bytes| sink.lock().push(bytes)));
        dispatcher.dispatch(Event::PortOpen {
            device_path: "/dev/x".into(),
            id: PortId::new(2),
            data: Value::Null,
        });
        assert_ready_ok!(reply.poll());

        dispatcher.on_inbound_message(&inbound(json!({ "event": "data", "id": 2, "data": "AQID" })));
        dispatcher.on_inbound_message(&inbound(json!({ "event": "data", "id": 3, "data": "BAU=" })));
        dispatcher.on_inbound_message(&inbound(json!({ "event": "data", "id": 2, "data": "%%%" })));

        assert_eq!(*received.lock(), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_open_error_rejects_only_that_path() {
        let (dispatcher, _rx) = setup();
        let x = dispatcher.port("/dev/x", ModeOptions::new());
        let y = dispatcher.port("/dev/y", ModeOptions::new());
        let mut x_reply = task::spawn(x.connect(|_| {}));
        let mut y_reply = task::spawn(y.connect(|_| {}));

        dispatcher.on_inbound_message(&inbound(json!({
            "event": "Error",
            "inResponseTo": "{\"command\":\"open\",\"devicePath\":\"/dev/x\"}",
            "id": -1,
            "error": "Could not open serial port"
        })));

        let err = assert_ready_err!(x_reply.poll());
        assert_eq!(err.to_string(), "Remote error: Could not open serial port");
        assert_pending!(y_reply.poll());
        assert_eq!(dispatcher.pending_count_of(PendingKey::PortOpen), 1);

        // The rejected handle may try again.
        let mut retry = task::spawn(x.connect(|_| {}));
        assert_pending!(retry.poll());
    }

    #[test]
    fn test_list_error_rejects_every_list_request() {
        let (dispatcher, _rx) = setup();
        let mut a = task::spawn(dispatcher.request_ports(PortFilters::none()));
        let mut b = task::spawn(dispatcher.request_ports(PortFilters::none()));
        let mut open = task::spawn(dispatcher.port("/dev/x", ModeOptions::new()).connect(|_| {}));

        dispatcher.dispatch(Event::error("enumeration failed", r#"{"command":"listPorts"}"#, None));

        assert!(assert_ready_err!(a.poll()).is_remote());
        assert!(assert_ready_err!(b.poll()).is_remote());
        assert_pending!(open.poll());
        assert!(!dispatcher.has_pending_key(PendingKey::SerialPorts));
    }

    #[test]
    fn test_unparsable_correlation_settles_nothing() {
        let (dispatcher, _rx) = setup();
        let mut list = task::spawn(dispatcher.request_ports(PortFilters::none()));
        let mut open = task::spawn(dispatcher.port("/dev/x", ModeOptions::new()).connect(|_| {}));

        dispatcher.on_inbound_message(&inbound(json!({
            "event": "Error", "inResponseTo": "{not json", "id": -1, "error": "Command not valid JSON"
        })));

        assert_pending!(list.poll());
        assert_pending!(open.poll());
        assert_eq!(dispatcher.pending_count(), 2);
    }

    #[test]
    fn test_tear_down_policy_fails_everything_on_desync() {
        let (dispatcher, _rx) =
            Dispatcher::channel(BridgeOptions::new().with_desync_policy(DesyncPolicy::TearDown));
        let port = opened(&dispatcher, "/dev/a", 0);
        let mut list = task::spawn(dispatcher.request_ports(PortFilters::none()));

        dispatcher.dispatch(Event::error("garbage", "{", None));

        assert!(matches!(assert_ready_err!(list.poll()), Error::Desync { .. }));
        assert_eq!(port.id(), None);
        assert_eq!(dispatcher.open_port_count(), 0);
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[test]
    fn test_runtime_error_goes_to_port_error_callback() {
        let (dispatcher, _rx) = setup();
        let port = opened(&dispatcher, "/dev/a", 0);
        let other = opened(&dispatcher, "/dev/b", 1);
        let errors = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&errors);
        port.set_on_error(move |message| sink.lock().push(message));
        let sink = Arc::clone(&errors);
        other.set_on_error(move |message| sink.lock().push(format!("wrong port: {message}")));

        // Helper-originated read error: empty correlation, id 0.
        dispatcher.dispatch(Event::error(
            "Error reading from serial port",
            "",
            Some(PortId::new(0)),
        ));
        // Failed write: echoed command, port id.
        dispatcher.dispatch(Event::error(
            "No open port with that id",
            r#"{"command":"write","id":0,"data":""}"#,
            Some(PortId::new(0)),
        ));

        assert_eq!(
            *errors.lock(),
            vec![
                "Error reading from serial port".to_string(),
                "No open port with that id".to_string()
            ]
        );
        assert!(port.is_open());
    }

    #[test]
    fn test_unaddressed_error_is_dropped() {
        let (dispatcher, _rx) = setup();
        let mut list = task::spawn(dispatcher.request_ports(PortFilters::none()));

        dispatcher.dispatch(Event::error("Command not recognized", r#"{"command":"reset"}"#, None));

        assert_pending!(list.poll());
    }

    #[test]
    fn test_untrusted_frames_are_ignored() {
        let (dispatcher, _rx) = setup();
        let mut list = task::spawn(dispatcher.request_ports(PortFilters::none()));

        dispatcher.on_inbound_message(&InboundFrame::foreign("fromgws", arduino_list()));
        dispatcher.on_inbound_message(&InboundFrame::trusted("togws", arduino_list()));
        dispatcher.on_inbound_message(&inbound(json!({ "debug": "hello" })));
        dispatcher.on_inbound_message(&inbound(json!("not an object")));

        assert_pending!(list.poll());
    }

    #[test]
    fn test_app_exited_fails_pending_and_detaches_ports() {
        let (dispatcher, _rx) = setup();
        let port = opened(&dispatcher, "/dev/a", 0);
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closed);
        port.set_on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut list = task::spawn(dispatcher.request_ports(PortFilters::none()));

        dispatcher.on_inbound_message(&inbound(json!({ "event": "AppExited" })));

        assert!(matches!(assert_ready_err!(list.poll()), Error::HelperExited));
        assert_eq!(port.id(), None);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.open_port_count(), 0);
    }

    #[test]
    fn test_close_all_posts_close_for_open_ports() {
        let (dispatcher, mut rx) = setup();
        let a = opened(&dispatcher, "/dev/a", 0);
        let b = opened(&dispatcher, "/dev/b", 1);
        let _detached = dispatcher.port("/dev/c", ModeOptions::new());
        while rx.try_recv().is_ok() {}

        dispatcher.close_all();

        assert_eq!(sent(&mut rx), Command::Close { id: PortId::new(0) });
        assert_eq!(sent(&mut rx), Command::Close { id: PortId::new(1) });
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert!(!a.is_open());
        assert!(!b.is_open());
        assert_eq!(dispatcher.open_port_count(), 0);
    }

    #[test]
    fn test_connect_guards() {
        let (dispatcher, _rx) = setup();
        let port = dispatcher.port("/dev/a", ModeOptions::new());

        let mut first = task::spawn(port.connect(|_| {}));
        let mut second = task::spawn(port.connect(|_| {}));
        assert_pending!(first.poll());
        assert!(matches!(assert_ready_err!(second.poll()), Error::OpenInProgress { .. }));

        dispatcher.dispatch(Event::PortOpen {
            device_path: "/dev/a".into(),
            id: PortId::new(0),
            data: Value::Null,
        });
        assert_ready_ok!(first.poll());

        let mut third = task::spawn(port.connect(|_| {}));
        assert!(matches!(assert_ready_err!(third.poll()), Error::AlreadyOpen { .. }));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[test]
    fn test_unanswered_requests_stay_pending() {
        let (dispatcher, _rx) = setup();
        let mut list = task::spawn(dispatcher.request_ports(PortFilters::none()));

        dispatcher.dispatch(Event::PortClosed { id: PortId::new(9) });
        dispatcher.dispatch(Event::Data { id: PortId::new(9), data: String::new() });

        assert_pending!(list.poll());
        assert_eq!(dispatcher.pending_count(), 1);
    }

    #[test]
    fn test_closed_transport_fails_request_immediately() {
        let (dispatcher, rx) = setup();
        drop(rx);

        let mut list = task::spawn(dispatcher.request_ports(PortFilters::none()));
        let mut open = task::spawn(dispatcher.port("/dev/a", ModeOptions::new()).connect(|_| {}));

        assert!(matches!(assert_ready_err!(list.poll()), Error::ConnectionClosed));
        assert!(matches!(assert_ready_err!(open.poll()), Error::ConnectionClosed));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[test]
    fn test_callbacks_may_reenter_dispatcher() {
        let (dispatcher, mut rx) = setup();
        let port = opened(&dispatcher, "/dev/a", 0);
        while rx.try_recv().is_ok() {}

        let inner = dispatcher.clone();
        let seen = Arc::new(AtomicUsize::new(usize::MAX));
        let slot = Arc::clone(&seen);
        port.set_on_close(move || {
            slot.store(inner.open_port_count(), Ordering::SeqCst);
            let _ = inner.request_ports(PortFilters::none());
        });

        dispatcher.dispatch(Event::PortClosed { id: PortId::new(0) });

        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(sent(&mut rx), Command::ListPorts);
    }

    #[tokio::test]
    async fn test_request_timeout_removes_entry() {
        let (dispatcher, _rx) = Dispatcher::channel(
            BridgeOptions::new().with_request_timeout(Duration::from_millis(20)),
        );
        let port = dispatcher.port("/dev/a", ModeOptions::new());

        let err = port.connect(|_| {}).await.unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(dispatcher.pending_count(), 0);

        // The handle is free to try again.
        let mut retry = task::spawn(port.connect(|_| {}));
        assert_pending!(retry.poll());
    }

    #[tokio::test]
    async fn test_late_port_open_after_timeout_is_closed() {
        let (dispatcher, mut rx) = Dispatcher::channel(
            BridgeOptions::new().with_request_timeout(Duration::from_millis(10)),
        );
        let port = dispatcher.port("/dev/a", ModeOptions::new());

        let err = port.connect(|_| {}).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(matches!(sent(&mut rx), Command::Open { .. }));

        dispatcher.on_inbound_message(&inbound(json!({
            "event": "PortOpen", "devicePath": "/dev/a", "id": 7
        })));

        assert_eq!(sent(&mut rx), Command::Close { id: PortId::new(7) });
        assert_eq!(port.id(), None);
        assert_eq!(dispatcher.open_port_count(), 0);
    }

    #[test]
    fn test_connect_racing_port_open_posts_one_open() {
        for _ in 0..200 {
            let (dispatcher, mut rx) = setup();
            let port = dispatcher.port("/dev/a", ModeOptions::new());
            let _first = port.connect(|_| {});

            let attacher = {
                let dispatcher = dispatcher.clone();
                std::thread::spawn(move || {
                    dispatcher.dispatch(Event::PortOpen {
                        device_path: "/dev/a".into(),
                        id: PortId::new(0),
                        data: Value::Null,
                    });
                })
            };
            let second = {
                let port = port.clone();
                std::thread::spawn(move || drop(port.connect(|_| {})))
            };
            attacher.join().unwrap();
            second.join().unwrap();

            let mut opens = 0;
            while let Ok(frame) = rx.try_recv() {
                if matches!(frame.message, Command::Open { .. }) {
                    opens += 1;
                }
            }
            assert_eq!(opens, 1);
            assert_eq!(port.id(), Some(PortId::new(0)));
            assert_eq!(dispatcher.pending_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_reply_before_timeout_wins() {
        let (dispatcher, _rx) = Dispatcher::channel(
            BridgeOptions::new().with_request_timeout(Duration::from_secs(5)),
        );
        let reply = dispatcher.request_ports(PortFilters::none());
        dispatcher.on_inbound_message(&inbound(arduino_list()));

        let ports = reply.await.unwrap();
        assert_eq!(ports.len(), 2);
    }

    #[test]
    fn test_independent_dispatchers_share_nothing() {
        let (one, _rx1) = setup();
        let (two, _rx2) = setup();
        let mut list = task::spawn(one.request_ports(PortFilters::none()));

        two.on_inbound_message(&inbound(arduino_list()));

        assert_pending!(list.poll());
        assert_eq!(two.pending_count(), 0);
    }
}
