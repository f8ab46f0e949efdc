//! Native helper relay and process management.
//!
//! A [`Relay`] joins a [`Dispatcher`] to a byte stream pair speaking
//! native-messaging frames. It runs two tasks:
//!
//! - **inbound**: reads frames, dispatches objects carrying `event`, logs
//!   objects carrying `debug`, and dispatches `AppExited` when the stream ends
//! - **outbound**: writes every outbound frame with the configured tag
//!
//! [`NativeHost`] spawns the helper process and runs a relay over its
//! stdin/stdout.
//!
//! # Example
//!
//! ```no_run
//! use webserial_bridge::{ModeOptions, NativeHost, PortFilters};
//!
//! # async fn example() -> webserial_bridge::Result<()> {
//! let mut host = NativeHost::builder()
//!     .program("/usr/local/bin/gowebserial")
//!     .spawn()?;
//!
//! let ports = host.dispatcher().request_ports(PortFilters::none()).await?;
//! println!("{} ports", ports.len());
//!
//! host.shutdown().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command as ProcessCommand};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::options::BridgeOptions;
use crate::protocol::{InboundFrame, OutboundFrame};

use super::framing::{read_frame, write_frame};

// ============================================================================
// Constants
// ============================================================================

/// How long shutdown waits for queued commands to be written.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Relay
// ============================================================================

/// Pumps frames between a dispatcher and a native-messaging stream pair.
///
/// Dropping the relay aborts both tasks.
pub struct Relay {
    dispatcher: Dispatcher,
    stop_tx: Option<oneshot::Sender<()>>,
    inbound: JoinHandle<()>,
    outbound: JoinHandle<()>,
}

impl Relay {
    /// Starts relaying over `reader`/`writer` with a fresh dispatcher.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start<R, W>(reader: R, writer: W, options: BridgeOptions) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let outbound_tag = options.outbound_tag.clone();
        let (dispatcher, outbound_rx) = Dispatcher::channel(options);
        let (stop_tx, stop_rx) = oneshot::channel();

        let inbound = tokio::spawn(pump_inbound(reader, dispatcher.clone()));
        let outbound = tokio::spawn(pump_outbound(writer, outbound_rx, stop_rx, outbound_tag));

        debug!("Relay started");

        Self {
            dispatcher,
            stop_tx: Some(stop_tx),
            inbound,
            outbound,
        }
    }

    /// Returns the dispatcher fed by this relay.
    #[inline]
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Closes every open port, flushes queued commands, and stops.
    ///
    /// Later calls do nothing.
    pub async fn shutdown(&mut self) {
        self.dispatcher.close_all();

        let Some(stop_tx) = self.stop_tx.take() else {
            return;
        };
        let _ = stop_tx.send(());

        if timeout(FLUSH_TIMEOUT, &mut self.outbound).await.is_err() {
            warn!("Timed out flushing outbound frames");
        }

        self.inbound.abort();
        debug!("Relay stopped");
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.inbound.abort();
        self.outbound.abort();
    }
}

/// Reads frames until the stream ends, then reports the helper gone.
async fn pump_inbound<R>(mut reader: R, dispatcher: Dispatcher)
where
    R: AsyncRead + Unpin,
{
    let tag = dispatcher.options().inbound_tag.clone();

    loop {
        match read_frame(&mut reader).await {
            Ok(Some(message)) => route_inbound(&dispatcher, &tag, message),
            Ok(None) => {
                debug!("Native helper closed its output");
                break;
            }
            Err(e) => {
                error!(error = %e, "Failed to read from native helper");
                break;
            }
        }
    }

    dispatcher.on_inbound_message(&InboundFrame::trusted(tag, json!({ "event": "AppExited" })));
}

/// Forwards events to the dispatcher and logs helper debug output.
fn route_inbound(dispatcher: &Dispatcher, tag: &str, message: Value) {
    if message.get("event").is_some() {
        dispatcher.on_inbound_message(&InboundFrame::trusted(tag, message));
    } else if let Some(text) = message.get("debug") {
        debug!(target: "webserial_bridge::helper", message = %text, "Helper debug output");
    } else {
        trace!(%message, "Ignoring helper message");
    }
}

/// Writes outbound frames until stopped or the channel closes.
async fn pump_outbound<W>(
    mut writer: W,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundFrame>,
    mut stop_rx: oneshot::Receiver<()>,
    tag: String,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else {
                    debug!("Outbound channel closed");
                    break;
                };
                if !forward(&mut writer, &tag, frame).await {
                    return;
                }
            }

            _ = &mut stop_rx => {
                while let Ok(frame) = outbound_rx.try_recv() {
                    if !forward(&mut writer, &tag, frame).await {
                        return;
                    }
                }
                break;
            }
        }
    }
}

/// Writes one frame's command. Returns `false` if the stream is broken.
async fn forward<W>(writer: &mut W, tag: &str, frame: OutboundFrame) -> bool
where
    W: AsyncWrite + Unpin,
{
    if frame.tag != tag {
        trace!(tag = %frame.tag, "Dropping frame with foreign tag");
        return true;
    }

    match write_frame(writer, &frame.message).await {
        Ok(()) => {
            trace!(command = frame.message.name(), "Command written");
            true
        }
        Err(e) => {
            error!(error = %e, "Failed to write to native helper");
            false
        }
    }
}

// ============================================================================
// ProcessGuard
// ============================================================================

/// Guards a child process and ensures it is killed when dropped.
struct ProcessGuard {
    /// The child process handle.
    child: Option<Child>,
    /// Process ID for logging.
    pid: u32,
}

impl ProcessGuard {
    fn new(child: Child) -> Self {
        let pid = child.id().unwrap_or(0);
        debug!(pid, "Process guard created");
        Self {
            child: Some(child),
            pid,
        }
    }

    /// Kills the process and waits for it to exit.
    async fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            debug!(pid = self.pid, "Killing native helper");
            if let Err(e) = child.kill().await {
                debug!(pid = self.pid, error = %e, "Failed to kill process");
            }
            info!(pid = self.pid, "Native helper terminated");
        }
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take()
            && let Err(e) = child.start_kill()
        {
            debug!(pid = self.pid, error = %e, "Failed to send kill signal in Drop");
        }
    }
}

// ============================================================================
// NativeHost
// ============================================================================

/// A running native helper process and its relay.
pub struct NativeHost {
    relay: Relay,
    process: ProcessGuard,
}

impl NativeHost {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> NativeHostBuilder {
        NativeHostBuilder::new()
    }

    /// Returns the dispatcher bound to the helper.
    #[inline]
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        self.relay.dispatcher()
    }

    /// Returns the helper's process id.
    #[inline]
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.process.pid
    }

    /// Closes every open port, flushes, and terminates the helper.
    ///
    /// # Errors
    ///
    /// Currently infallible; kill failures are logged.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.relay.shutdown().await;
        self.process.kill().await;
        Ok(())
    }
}

// ============================================================================
// NativeHostBuilder
// ============================================================================

/// Builder for [`NativeHost`].
#[derive(Debug, Default, Clone)]
pub struct NativeHostBuilder {
    program: Option<PathBuf>,
    args: Vec<String>,
    options: BridgeOptions,
}

impl NativeHostBuilder {
    /// Creates a builder with no program set.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the helper executable.
    #[inline]
    #[must_use]
    pub fn program(mut self, path: impl Into<PathBuf>) -> Self {
        self.program = Some(path.into());
        self
    }

    /// Adds a command-line argument.
    #[inline]
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds several command-line arguments.
    #[inline]
    #[must_use]
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the dispatcher options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: BridgeOptions) -> Self {
        self.options = options;
        self
    }

    /// Spawns the helper and starts relaying.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no program was set
    /// - [`Error::Io`] if the process cannot be spawned
    /// - [`Error::Connection`] if its pipes cannot be captured
    pub fn spawn(self) -> Result<NativeHost> {
        let program = self
            .program
            .filter(|path| !path.as_os_str().is_empty())
            .ok_or_else(|| Error::config("Native helper program not set"))?;

        let mut child = ProcessCommand::new(&program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::connection("Native helper stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::connection("Native helper stdout not captured"))?;

        let process = ProcessGuard::new(child);
        info!(pid = process.pid, program = %program.display(), "Native helper started");

        Ok(NativeHost {
            relay: Relay::start(stdout, stdin, self.options),
            process,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
