use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use crossbeam::channel::{
    bounded, select, unbounded, Receiver, SendTimeoutError, Sender, TrySendError,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;

use super::{
    action, panic_message, InterruptSlot, Link, LinkCore, LinkStatus, RateLimiter, Runner,
    StopSignal, TcTransport, DEFAULT_RECONNECT_DELAY,
};
use crate::{
    tc::{
        AckStatus, CommandHistoryPublisher, CommandPostprocessor, PreparedCommand, TcLink,
        ACK_SENT,
    },
    timecode::{TimeService, WallClock},
    Error, Result,
};

/// Failure reason for commands rejected because the queue is full.
pub const QUEUE_FULL: &str = "queue full";
const LINK_DISABLED: &str = "link disabled";
const LINK_FAILED: &str = "link failed";
const POSTPROCESSING_FAILED: &str = "postprocessing failed";

/// How long a sender blocked on a full queue holds the queue open before checking again.
const BLOCKED_SEND_RETRY: Duration = Duration::from_millis(50);

/// Settings of a [TcDataLink].
#[derive(TypedBuilder)]
pub struct TcLinkOptions {
    #[builder(setter(into))]
    name: String,
    postprocessor: Box<dyn CommandPostprocessor>,
    history: Arc<dyn CommandHistoryPublisher>,
    #[builder(default = Arc::new(WallClock) as Arc<dyn TimeService>)]
    time_service: Arc<dyn TimeService>,
    #[builder(default)]
    initial_delay: Duration,
    #[builder(default = DEFAULT_RECONNECT_DELAY)]
    reconnect_delay: Duration,
    /// Command queue capacity; unbounded when `None`.
    #[builder(default)]
    queue_size: Option<usize>,
    /// Maximum commands per second.
    #[builder(default)]
    max_rate: Option<f64>,
    /// Block [TcLink::send_command] while the queue is full instead of failing the command.
    #[builder(default)]
    block_sender_on_queue_full: bool,
}

struct TcContext {
    core: Arc<LinkCore>,
    postprocessor: Box<dyn CommandPostprocessor>,
    history: Arc<dyn CommandHistoryPublisher>,
    time_service: Arc<dyn TimeService>,
    initial_delay: Duration,
    reconnect_delay: Duration,
    /// Open while a worker takes commands. Senders enqueue under the read lock; the worker
    /// closes it under the write lock before draining, so nothing is enqueued after the drain.
    queue: RwLock<Option<Sender<PreparedCommand>>>,
}

/// Telecommand link: queues commands and transmits them in order from a dedicated thread.
///
/// Every command taken by [TcLink::send_command] gets exactly one `Acknowledge_Sent`
/// history entry, `OK` once written to the transport or `NOK` with a reason otherwise.
pub struct TcDataLink<T: TcTransport> {
    ctx: Arc<TcContext>,
    queue_size: Option<usize>,
    max_rate: Option<f64>,
    block_sender_on_queue_full: bool,
    runner: Mutex<Runner<T>>,
    interrupt: InterruptSlot,
}

impl<T: TcTransport> TcDataLink<T> {
    /// Create a disabled link.
    ///
    /// # Errors
    /// [Error::Config] for a zero queue size or a non-positive rate.
    pub fn new(transport: T, options: TcLinkOptions) -> Result<Self> {
        if options.queue_size == Some(0) {
            return Err(Error::Config("tcQueueSize must be at least 1".to_string()));
        }
        if let Some(rate) = options.max_rate {
            RateLimiter::new(rate)?;
        }
        let core = LinkCore::new(&options.name);
        let interrupt = InterruptSlot::default();
        if transport.is_stream() {
            let interrupt = interrupt.clone();
            core.actions().register(action::RECONNECT, move |_| {
                // the next command re-opens the connection
                if let Some(current) = interrupt.lock().as_ref() {
                    current.fire();
                }
                Ok(Value::Null)
            })?;
        }
        Ok(TcDataLink {
            ctx: Arc::new(TcContext {
                core,
                postprocessor: options.postprocessor,
                history: options.history,
                time_service: options.time_service,
                initial_delay: options.initial_delay,
                reconnect_delay: options.reconnect_delay,
                queue: RwLock::new(None),
            }),
            queue_size: options.queue_size,
            max_rate: options.max_rate,
            block_sender_on_queue_full: options.block_sender_on_queue_full,
            runner: Mutex::new(Runner::new(transport)),
            interrupt,
        })
    }

    fn start(&self) -> Result<()> {
        let limiter = self.max_rate.map(RateLimiter::new).transpose()?;
        let (tx, rx) = match self.queue_size {
            Some(size) => bounded(size),
            None => unbounded(),
        };
        let ctx = self.ctx.clone();
        let interrupt = self.interrupt.clone();
        // open before spawning so a worker failing right away closes this queue
        *self.ctx.queue.write() = Some(tx);
        let started = self.runner.lock().start(
            format!("tc-{}", self.ctx.core.name()),
            self.interrupt.clone(),
            move |transport, stop| ctx.run(transport, &rx, limiter, &stop, &interrupt),
        );
        if started.is_err() {
            self.ctx.queue.write().take();
        }
        started
    }

    fn stop(&self) {
        self.runner.lock().stop();
        // a panicked worker never closed its queue
        self.ctx.queue.write().take();
    }
}

impl<T: TcTransport> Link for TcDataLink<T> {
    fn core(&self) -> &LinkCore {
        &self.ctx.core
    }

    fn enable(&self) -> Result<()> {
        self.ctx
            .core
            .enable(|| {
                // drop the queue of a failed worker before starting over
                self.stop();
                self.start()
            })
            .map(|_| ())
    }

    fn disable(&self) {
        self.ctx.core.disable(|| self.stop());
    }
}

impl<T: TcTransport> TcLink for TcDataLink<T> {
    fn send_command(&self, command: PreparedCommand) -> bool {
        if matches!(
            self.ctx.core.status(),
            LinkStatus::Disabled | LinkStatus::Failed
        ) {
            return false;
        }
        let mut command = command;
        loop {
            let queue = self.ctx.queue.read();
            let Some(sender) = queue.as_ref() else {
                return false;
            };
            if !self.block_sender_on_queue_full {
                return match sender.try_send(command) {
                    Ok(()) => true,
                    Err(TrySendError::Full(command)) => {
                        self.ctx.fail(&command, QUEUE_FULL);
                        true
                    }
                    Err(TrySendError::Disconnected(_)) => false,
                };
            }
            // release the read lock now and then so a stopping worker can close the queue
            match sender.send_timeout(command, BLOCKED_SEND_RETRY) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(pending)) => command = pending,
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }
}

impl<T: TcTransport> Drop for TcDataLink<T> {
    fn drop(&mut self) {
        self.disable();
    }
}

impl TcContext {
    fn run<T: TcTransport>(
        &self,
        mut transport: T,
        queue: &Receiver<PreparedCommand>,
        mut limiter: Option<RateLimiter>,
        stop: &StopSignal,
        interrupt: &InterruptSlot,
    ) -> T {
        let link = self.core.name();
        let mut reason = LINK_DISABLED;
        if !self.initial_delay.is_zero() && stop.wait(self.initial_delay) {
            self.close(queue, reason);
            return transport;
        }

        while !stop.is_stopped() {
            if !transport.is_connected() {
                match transport.connect() {
                    Ok(current) => {
                        *interrupt.lock() = Some(current);
                        info!(link = %link, "connected to {}", transport.describe());
                        self.core
                            .set_connected(true, format!("connected to {}", transport.describe()));
                    }
                    Err(err) => {
                        warn!(link = %link, "cannot connect to {}: {err}", transport.describe());
                        self.core.set_detail(format!(
                            "cannot connect to {}: {err}",
                            transport.describe()
                        ));
                        if stop.wait(self.reconnect_delay) {
                            break;
                        }
                        continue;
                    }
                }
            }

            let next = select! {
                recv(stop.receiver()) -> _ => None,
                recv(queue) -> command => command.ok(),
            };
            let Some(command) = next else {
                break;
            };
            if let Some(limiter) = limiter.as_mut() {
                if !limiter.acquire(stop) {
                    self.fail(&command, LINK_DISABLED);
                    break;
                }
            }

            match self.transmit(&mut transport, &command) {
                Ok(()) => {}
                Err(err) if err.is_transient() => {
                    warn!(link = %link, "connection to {} lost: {err}", transport.describe());
                    interrupt.lock().take();
                    transport.disconnect();
                    self.core.set_connected(false, format!("connection lost: {err}"));
                }
                Err(err) => {
                    error!(link = %link, "link failed: {err}");
                    self.core.set_failed(err.to_string());
                    reason = LINK_FAILED;
                    break;
                }
            }
        }

        interrupt.lock().take();
        transport.disconnect();
        self.close(queue, reason);
        debug!(link = %link, "tc worker exit");
        transport
    }

    /// Stop taking commands and fail every command still queued.
    fn close(&self, queue: &Receiver<PreparedCommand>, reason: &str) {
        self.queue.write().take();
        for command in queue.try_iter() {
            self.fail(&command, reason);
        }
    }

    /// Postprocess and write one command, publishing the outcome to command history.
    fn transmit<T: TcTransport>(&self, transport: &mut T, command: &PreparedCommand) -> Result<()> {
        let binary = if command.disable_postprocessing {
            Some(command.binary.clone())
        } else {
            match panic::catch_unwind(AssertUnwindSafe(|| self.postprocessor.process(command))) {
                Ok(binary) => binary,
                Err(payload) => {
                    self.fail(command, POSTPROCESSING_FAILED);
                    return Err(Error::Internal(format!(
                        "panic while postprocessing command: {}",
                        panic_message(payload.as_ref())
                    )));
                }
            }
        };
        let Some(binary) = binary else {
            self.fail(command, POSTPROCESSING_FAILED);
            return Ok(());
        };

        match transport.send(&binary) {
            Ok(()) => {
                self.core.data_out(binary.len());
                debug!(link = %self.core.name(), cmd = %command.id, len = binary.len(), "command sent");
                self.history.publish_ack(
                    &command.id,
                    ACK_SENT,
                    self.time_service.now(),
                    AckStatus::Ok,
                    None,
                );
                Ok(())
            }
            Err(err) => {
                self.fail(command, &err.to_string());
                Err(err)
            }
        }
    }

    fn fail(&self, command: &PreparedCommand, reason: &str) {
        info!(link = %self.core.name(), cmd = %command.id, reason, "failing command");
        let now = self.time_service.now();
        self.history
            .publish_ack(&command.id, ACK_SENT, now, AckStatus::Nok, Some(reason));
        self.history.command_failed(&command.id, now, reason);
    }
}
