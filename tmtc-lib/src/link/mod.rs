//! Data links.
//!
//! A link owns one transport (a TCP connection, a UDP socket, ...) and one worker thread that
//! moves data between the transport and the processing pipelines. Links share their lifecycle
//! handling through [LinkCore]:
//!
//! ```text
//!            enable()                connected
//! DISABLED ----------> UNAVAIL <-----------------> OK
//!    ^                    |      connection lost
//!    |   disable()        | internal error
//!    +--------------------+----------------------> FAILED
//! ```
//!
//! `enable()` on a failed link restarts the worker. Transient transport errors never fail a
//! link; the worker closes the transport and retries after the reconnect delay.
//!
//! Links are usually created from a [LinkConfig] with [build_link].
pub mod action;
mod config;
mod frame;
mod multicast;
mod rate;
mod tc_runner;
mod tcp;
mod tm_runner;
mod udp;

use std::{
    io,
    net::{Shutdown, TcpStream},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, trace};

pub use action::ActionRegistry;
pub use config::{build_link, LinkConfig, LinkContext, LinkHandle, LinkType};
pub use frame::{FrameOptions, FramePacketExtractor, FrameTmTransport, VcduHeader};
pub use multicast::MulticastTmTransport;
pub use rate::{DataRateMeter, RateLimiter};
pub use tc_runner::{TcDataLink, TcLinkOptions, QUEUE_FULL};
pub use tcp::{TcpTcTransport, TcpTmTransport};
pub use tm_runner::{TmDataLink, TmLinkOptions};
pub use udp::{UdpTcTransport, UdpTmTransport};

use crate::{Error, Result};

/// Delay between connection attempts unless configured otherwise.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(10_000);

/// Read timeout of datagram transports, bounding how long a stop request can go unnoticed.
pub const DATAGRAM_READ_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkStatus {
    /// Connected and moving data.
    Ok,
    /// Enabled, but the transport is not connected.
    Unavail,
    Disabled,
    /// Stopped by an unexpected error; stays failed until enabled again.
    Failed,
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LinkStatus::Ok => "OK",
            LinkStatus::Unavail => "UNAVAIL",
            LinkStatus::Disabled => "DISABLED",
            LinkStatus::Failed => "FAILED",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Default)]
struct CoreState {
    enabled: bool,
    connected: bool,
    failure: Option<String>,
    detail: String,
}

/// State shared by every link: lifecycle, counters, rate meters and actions.
#[derive(Debug)]
pub struct LinkCore {
    name: String,
    state: Mutex<CoreState>,
    // serializes enable/disable so transport start and stop never overlap
    transition: Mutex<()>,
    data_in: AtomicU64,
    data_out: AtomicU64,
    in_rate: DataRateMeter,
    out_rate: DataRateMeter,
    actions: ActionRegistry,
}

impl LinkCore {
    /// Create a disabled link core with the `reset-counters` action registered.
    #[must_use]
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new_cyclic(|core: &std::sync::Weak<LinkCore>| {
            let weak = core.clone();
            let actions = ActionRegistry::with_action(action::RESET_COUNTERS, move |_| {
                if let Some(core) = weak.upgrade() {
                    core.reset_counters();
                }
                Ok(Value::Null)
            });
            LinkCore {
                name: name.to_string(),
                state: Mutex::new(CoreState::default()),
                transition: Mutex::new(()),
                data_in: AtomicU64::default(),
                data_out: AtomicU64::default(),
                in_rate: DataRateMeter::new(),
                out_rate: DataRateMeter::new(),
                actions,
            }
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn status(&self) -> LinkStatus {
        let state = self.state.lock();
        if !state.enabled {
            LinkStatus::Disabled
        } else if state.failure.is_some() {
            LinkStatus::Failed
        } else if state.connected {
            LinkStatus::Ok
        } else {
            LinkStatus::Unavail
        }
    }

    #[must_use]
    pub fn detailed_status(&self) -> String {
        let state = self.state.lock();
        match &state.failure {
            Some(failure) => failure.clone(),
            None => state.detail.clone(),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Run `start` if the link is disabled or failed and mark it enabled.
    ///
    /// Returns `Ok(false)` without running `start` if the link is already enabled. If `start`
    /// fails the link stays disabled.
    ///
    /// # Errors
    /// Whatever `start` returns.
    pub fn enable<F>(&self, start: F) -> Result<bool>
    where
        F: FnOnce() -> Result<()>,
    {
        let _transition = self.transition.lock();
        {
            let mut state = self.state.lock();
            if state.enabled && state.failure.is_none() {
                return Ok(false);
            }
            state.enabled = true;
            state.connected = false;
            state.failure = None;
        }
        info!(link = %self.name, "enabling link");
        if let Err(err) = start() {
            error!(link = %self.name, "failed to enable link: {err}");
            let mut state = self.state.lock();
            state.enabled = false;
            state.detail = format!("enable failed: {err}");
            return Err(err);
        }
        Ok(true)
    }

    /// Run `stop` if the link is enabled and mark it disabled. Returns `false` if the link
    /// was already disabled.
    pub fn disable<F: FnOnce()>(&self, stop: F) -> bool {
        let _transition = self.transition.lock();
        {
            let mut state = self.state.lock();
            if !state.enabled {
                return false;
            }
            state.enabled = false;
        }
        info!(link = %self.name, "disabling link");
        stop();
        let mut state = self.state.lock();
        state.connected = false;
        state.failure = None;
        state.detail.clear();
        true
    }

    /// Record the transport connection state along with a description for the detailed
    /// status.
    pub fn set_connected(&self, connected: bool, detail: impl Into<String>) {
        let mut state = self.state.lock();
        state.connected = connected;
        state.detail = detail.into();
    }

    pub fn set_detail(&self, detail: impl Into<String>) {
        self.state.lock().detail = detail.into();
    }

    /// Put an enabled link into [LinkStatus::Failed].
    pub fn set_failed(&self, reason: impl Into<String>) {
        let mut state = self.state.lock();
        if state.enabled {
            state.connected = false;
            state.failure = Some(reason.into());
        }
    }

    /// Count one inbound packet of `len` bytes.
    pub fn data_in(&self, len: usize) {
        self.data_in.fetch_add(1, Ordering::Relaxed);
        self.in_rate.mark(len as u64);
    }

    /// Count one outbound command of `len` bytes.
    pub fn data_out(&self, len: usize) {
        self.data_out.fetch_add(1, Ordering::Relaxed);
        self.out_rate.mark(len as u64);
    }

    #[must_use]
    pub fn data_in_count(&self) -> u64 {
        self.data_in.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn data_out_count(&self) -> u64 {
        self.data_out.load(Ordering::Relaxed)
    }

    /// Inbound bytes per second.
    #[must_use]
    pub fn data_in_rate(&self) -> f64 {
        self.in_rate.rate()
    }

    /// Outbound bytes per second.
    #[must_use]
    pub fn data_out_rate(&self) -> f64 {
        self.out_rate.rate()
    }

    /// Zero the counters. The rate meters keep their history.
    pub fn reset_counters(&self) {
        self.data_in.store(0, Ordering::Relaxed);
        self.data_out.store(0, Ordering::Relaxed);
        info!(link = %self.name, "counters reset");
    }

    #[must_use]
    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    /// Status snapshot suitable for reporting.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        json!({
            "name": self.name,
            "status": self.status(),
            "detailedStatus": self.detailed_status(),
            "dataInCount": self.data_in_count(),
            "dataOutCount": self.data_out_count(),
            "dataInRate": self.data_in_rate(),
            "dataOutRate": self.data_out_rate(),
        })
    }
}

/// Operations common to all links.
pub trait Link: Send + Sync {
    fn core(&self) -> &LinkCore;

    /// Start the link if it is disabled or failed; a no-op otherwise.
    ///
    /// # Errors
    /// If the worker cannot be started. The link stays disabled.
    fn enable(&self) -> Result<()>;

    /// Stop the link and wait for its worker to exit; a no-op if already disabled.
    fn disable(&self);

    fn name(&self) -> &str {
        self.core().name()
    }

    fn status(&self) -> LinkStatus {
        self.core().status()
    }

    fn detailed_status(&self) -> String {
        self.core().detailed_status()
    }

    fn reset_counters(&self) {
        self.core().reset_counters();
    }

    /// # Errors
    /// See [ActionRegistry::execute].
    fn execute_action(&self, id: &str, request: &Value) -> Result<Value> {
        self.core().actions().execute(id, request)
    }
}

/// Inbound transport used by [TmDataLink].
pub trait TmTransport: Send + 'static {
    /// Open the transport. The returned [Interrupt] must unblock a pending
    /// [TmTransport::read_packet] from another thread.
    ///
    /// # Errors
    /// Any error opening the transport; the link retries after the reconnect delay.
    fn connect(&mut self) -> Result<Interrupt>;

    /// Read the next packet. `Ok(None)` means nothing arrived within the read timeout.
    ///
    /// # Errors
    /// Transient errors ([Error::is_transient]) close and re-open the transport, any other
    /// error fails the link.
    fn read_packet(&mut self) -> Result<Option<Vec<u8>>>;

    fn disconnect(&mut self);

    /// Short description of the transport endpoint for status messages.
    fn describe(&self) -> String;

    /// True for connection oriented transports, which get a `reconnect` action.
    fn is_stream(&self) -> bool {
        false
    }
}

/// Outbound transport used by [TcDataLink].
pub trait TcTransport: Send + 'static {
    /// # Errors
    /// Any error opening the transport; the link retries after the reconnect delay.
    fn connect(&mut self) -> Result<Interrupt>;

    fn is_connected(&self) -> bool;

    /// Write one command.
    ///
    /// # Errors
    /// Transient errors close the transport, which is re-opened before the next command.
    fn send(&mut self, data: &[u8]) -> Result<()>;

    fn disconnect(&mut self);

    fn describe(&self) -> String;

    fn is_stream(&self) -> bool {
        false
    }
}

/// Receiving side of a worker stop request. The request is made by dropping the paired
/// sender.
#[derive(Debug, Clone)]
pub struct StopSignal(Receiver<()>);

impl StopSignal {
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        !matches!(self.0.try_recv(), Err(TryRecvError::Empty))
    }

    /// Sleep for `timeout` or until stopped. Returns `true` if stopped.
    #[must_use]
    pub fn wait(&self, timeout: Duration) -> bool {
        !matches!(self.0.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
    }

    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.0
    }
}

/// Unblocks a thread waiting in a transport read.
#[derive(Debug, Default)]
pub struct Interrupt(Option<TcpStream>);

impl Interrupt {
    /// For transports that observe stop requests through a read timeout.
    #[must_use]
    pub fn none() -> Self {
        Interrupt(None)
    }

    /// Shut down `stream` when fired.
    ///
    /// # Errors
    /// If the stream handle cannot be cloned.
    pub fn tcp(stream: &TcpStream) -> io::Result<Self> {
        Ok(Interrupt(Some(stream.try_clone()?)))
    }

    pub fn fire(&self) {
        if let Some(stream) = &self.0 {
            if let Err(err) = stream.shutdown(Shutdown::Both) {
                trace!("shutdown on interrupt: {err}");
            }
        }
    }
}

/// Interrupt of the currently open transport, shared between a link and its worker.
pub(crate) type InterruptSlot = Arc<Mutex<Option<Interrupt>>>;

/// A running link worker thread.
///
/// The thread hands its transport back when it exits so the link can be enabled again.
pub(crate) struct Worker<T> {
    stop: Sender<()>,
    interrupt: InterruptSlot,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> Worker<T> {
    pub(crate) fn spawn<F>(name: String, interrupt: InterruptSlot, body: F) -> Result<Self>
    where
        F: FnOnce(StopSignal) -> T + Send + 'static,
    {
        let (stop, signal) = bounded(0);
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || body(StopSignal(signal)))?;
        Ok(Worker {
            stop,
            interrupt,
            handle,
        })
    }

    /// Signal the worker, unblock its transport and wait for it to exit. Returns `None` if
    /// the worker panicked.
    pub(crate) fn stop(self) -> Option<T> {
        drop(self.stop);
        if let Some(interrupt) = self.interrupt.lock().as_ref() {
            interrupt.fire();
        }
        match self.handle.join() {
            Ok(transport) => Some(transport),
            Err(_) => {
                error!("link worker panicked");
                None
            }
        }
    }
}

/// Best effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Restart state of a link: the idle transport, or the worker currently owning it.
pub(crate) struct Runner<T> {
    transport: Option<T>,
    worker: Option<Worker<T>>,
}

impl<T: Send + 'static> Runner<T> {
    pub(crate) fn new(transport: T) -> Self {
        Runner {
            transport: Some(transport),
            worker: None,
        }
    }

    /// Stop the worker, if any, and recover its transport.
    pub(crate) fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            if let Some(transport) = worker.stop() {
                self.transport = Some(transport);
            }
        }
    }

    /// Spawn a worker running `body` on the idle transport, stopping a previous (failed)
    /// worker first.
    pub(crate) fn start<F>(&mut self, name: String, interrupt: InterruptSlot, body: F) -> Result<()>
    where
        F: FnOnce(T, StopSignal) -> T + Send + 'static,
    {
        self.stop();
        let Some(transport) = self.transport.take() else {
            return Err(Error::Internal(
                "transport was lost when a previous worker panicked".to_string(),
            ));
        };
        self.worker = Some(Worker::spawn(name, interrupt, move |stop| {
            body(transport, stop)
        })?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn enable_and_disable_run_only_on_transition() {
        let core = LinkCore::new("test");
        let starts = AtomicUsize::new(0);
        let stops = AtomicUsize::new(0);
        assert_eq!(core.status(), LinkStatus::Disabled);

        let start = || {
            starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        assert!(core.enable(start).unwrap());
        assert!(!core.enable(start).unwrap());
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(core.status(), LinkStatus::Unavail);

        let stop = || {
            stops.fetch_add(1, Ordering::SeqCst);
        };
        assert!(core.disable(stop));
        assert!(!core.disable(stop));
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(core.status(), LinkStatus::Disabled);
    }

    #[test]
    fn failed_enable_stays_disabled() {
        let core = LinkCore::new("test");
        let err = core
            .enable(|| Err(Error::Config("no port".to_string())))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(core.status(), LinkStatus::Disabled);
        assert!(core.detailed_status().contains("no port"));
    }

    #[test]
    fn status_precedence() {
        let core = LinkCore::new("test");
        core.set_failed("ignored while disabled");
        assert_eq!(core.status(), LinkStatus::Disabled);

        core.enable(|| Ok(())).unwrap();
        core.set_connected(true, "connected to somewhere");
        assert_eq!(core.status(), LinkStatus::Ok);
        assert_eq!(core.detailed_status(), "connected to somewhere");

        core.set_failed("boom");
        assert_eq!(core.status(), LinkStatus::Failed);
        assert_eq!(core.detailed_status(), "boom");

        // enabling a failed link restarts it
        let mut restarted = false;
        assert!(core
            .enable(|| {
                restarted = true;
                Ok(())
            })
            .unwrap());
        assert!(restarted);
        assert_eq!(core.status(), LinkStatus::Unavail);
    }

    #[test]
    fn reset_counters_action() {
        let core = LinkCore::new("test");
        core.data_in(100);
        core.data_in(100);
        core.data_out(10);
        assert_eq!(core.data_in_count(), 2);
        assert_eq!(core.data_out_count(), 1);

        core.actions()
            .execute(action::RESET_COUNTERS, &Value::Null)
            .unwrap();
        assert_eq!(core.data_in_count(), 0);
        assert_eq!(core.data_out_count(), 0);
    }

    #[test]
    fn stop_signal() {
        let (tx, rx) = bounded::<()>(0);
        let signal = StopSignal(rx);
        assert!(!signal.is_stopped());
        assert!(!signal.wait(Duration::from_millis(1)));

        drop(tx);
        assert!(signal.is_stopped());
        assert!(signal.wait(Duration::from_secs(10)));
    }

    #[test]
    fn worker_returns_transport() {
        let slot = InterruptSlot::default();
        let worker = Worker::spawn("test-worker".to_string(), slot, |stop| {
            while !stop.wait(Duration::from_secs(10)) {}
            42
        })
        .unwrap();
        assert_eq!(worker.stop(), Some(42));
    }

    #[test]
    fn status_display() {
        assert_eq!(LinkStatus::Unavail.to_string(), "UNAVAIL");
        assert_eq!(
            serde_json::to_value(LinkStatus::Failed).unwrap(),
            json!("FAILED")
        );
    }
}
