use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};
use typed_builder::TypedBuilder;

use super::{
    action, panic_message, InterruptSlot, Link, LinkCore, Runner, StopSignal, TmTransport,
    DEFAULT_RECONNECT_DELAY,
};
use crate::{
    timecode::{TimeService, WallClock},
    tm::{PacketPreprocessor, Preprocessed, TmPacket, TmSink},
    Error, Result,
};

/// Settings of a [TmDataLink].
#[derive(TypedBuilder)]
pub struct TmLinkOptions {
    #[builder(setter(into))]
    name: String,
    preprocessor: Box<dyn PacketPreprocessor>,
    /// Receives every packet the preprocessor does not drop.
    sink: Arc<dyn TmSink>,
    #[builder(default = Arc::new(WallClock) as Arc<dyn TimeService>)]
    time_service: Arc<dyn TimeService>,
    /// Delay before the first connection attempt.
    #[builder(default)]
    initial_delay: Duration,
    #[builder(default = DEFAULT_RECONNECT_DELAY)]
    reconnect_delay: Duration,
}

/// State used by the worker thread.
struct TmContext {
    core: Arc<LinkCore>,
    preprocessor: Box<dyn PacketPreprocessor>,
    sink: Arc<dyn TmSink>,
    time_service: Arc<dyn TimeService>,
    initial_delay: Duration,
    reconnect_delay: Duration,
    reconnect: Arc<AtomicBool>,
}

/// Telemetry link: reads packets from a [TmTransport] on a dedicated thread, preprocesses
/// them and hands them to a [TmSink] in arrival order.
pub struct TmDataLink<T: TmTransport> {
    ctx: Arc<TmContext>,
    runner: Mutex<Runner<T>>,
    interrupt: InterruptSlot,
}

impl<T: TmTransport> TmDataLink<T> {
    /// Create a disabled link. Stream transports get a `reconnect` action.
    ///
    /// # Errors
    /// [Error::DuplicateAction] if action registration fails.
    pub fn new(transport: T, options: TmLinkOptions) -> Result<Self> {
        let core = LinkCore::new(&options.name);
        let interrupt = InterruptSlot::default();
        let reconnect = Arc::new(AtomicBool::new(false));
        if transport.is_stream() {
            let interrupt = interrupt.clone();
            let reconnect = reconnect.clone();
            core.actions().register(action::RECONNECT, move |_| {
                if let Some(current) = interrupt.lock().as_ref() {
                    reconnect.store(true, Ordering::SeqCst);
                    current.fire();
                }
                Ok(Value::Null)
            })?;
        }
        Ok(TmDataLink {
            ctx: Arc::new(TmContext {
                core,
                preprocessor: options.preprocessor,
                sink: options.sink,
                time_service: options.time_service,
                initial_delay: options.initial_delay,
                reconnect_delay: options.reconnect_delay,
                reconnect,
            }),
            runner: Mutex::new(Runner::new(transport)),
            interrupt,
        })
    }

    fn start(&self) -> Result<()> {
        let ctx = self.ctx.clone();
        let interrupt = self.interrupt.clone();
        self.runner.lock().start(
            format!("tm-{}", self.ctx.core.name()),
            self.interrupt.clone(),
            move |transport, stop| ctx.run(transport, &stop, &interrupt),
        )
    }
}

impl<T: TmTransport> Link for TmDataLink<T> {
    fn core(&self) -> &LinkCore {
        &self.ctx.core
    }

    fn enable(&self) -> Result<()> {
        self.ctx.core.enable(|| self.start()).map(|_| ())
    }

    fn disable(&self) {
        self.ctx.core.disable(|| self.runner.lock().stop());
    }
}

impl<T: TmTransport> Drop for TmDataLink<T> {
    fn drop(&mut self) {
        self.disable();
    }
}

impl TmContext {
    fn run<T: TmTransport>(&self, mut transport: T, stop: &StopSignal, interrupt: &InterruptSlot) -> T {
        let link = self.core.name();
        if !self.initial_delay.is_zero() && stop.wait(self.initial_delay) {
            return transport;
        }

        while !stop.is_stopped() {
            match transport.connect() {
                Ok(current) => *interrupt.lock() = Some(current),
                Err(err) => {
                    warn!(link = %link, "cannot connect to {}: {err}", transport.describe());
                    self.core
                        .set_detail(format!("cannot connect to {}: {err}", transport.describe()));
                    if stop.wait(self.reconnect_delay) {
                        break;
                    }
                    continue;
                }
            }
            info!(link = %link, "connected to {}", transport.describe());
            self.core
                .set_connected(true, format!("connected to {}", transport.describe()));

            // a stop request may have fired before the interrupt was in place
            let outcome = if stop.is_stopped() {
                Ok(())
            } else {
                self.receive(&mut transport, stop)
            };

            interrupt.lock().take();
            transport.disconnect();
            self.core.set_connected(false, "disconnected");

            match outcome {
                Ok(()) => break,
                Err(_) if stop.is_stopped() => break,
                Err(err) if err.is_transient() => {
                    if self.reconnect.swap(false, Ordering::SeqCst) {
                        info!(link = %link, "reconnecting on request");
                        continue;
                    }
                    warn!(link = %link, "connection to {} lost: {err}", transport.describe());
                    self.core.set_detail(format!("connection lost: {err}"));
                    if stop.wait(self.reconnect_delay) {
                        break;
                    }
                }
                Err(err) => {
                    error!(link = %link, "link failed: {err}");
                    self.core.set_failed(err.to_string());
                    break;
                }
            }
        }
        debug!(link = %link, "tm worker exit");
        transport
    }

    fn receive<T: TmTransport>(&self, transport: &mut T, stop: &StopSignal) -> Result<()> {
        while !stop.is_stopped() {
            if let Some(bytes) = transport.read_packet()? {
                self.handle(bytes)?;
            }
        }
        Ok(())
    }

    /// Preprocess and deliver one packet. Any error or panic from the collaborators is
    /// reported as [Error::Internal].
    fn handle(&self, bytes: Vec<u8>) -> Result<()> {
        self.core.data_in(bytes.len());
        let packet = TmPacket::new(bytes, self.time_service.now());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<()> {
            match self.preprocessor.process(packet)? {
                Preprocessed::Packet(packet) => self.sink.process_packet(packet),
                Preprocessed::Dropped(reason) => {
                    trace!(link = %self.core.name(), "packet dropped: {reason}");
                }
            }
            Ok(())
        }));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(Error::Internal(format!("packet processing failed: {err}"))),
            Err(payload) => Err(Error::Internal(format!(
                "panic while processing packet: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }
}
