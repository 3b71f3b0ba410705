//! Operator events raised while processing link data.
use std::{
    collections::HashMap,
    fmt::Debug,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};

/// A packet failed its checksum.
pub const CORRUPTED_PACKET: &str = "CORRUPTED_PACKET";
/// A sequence count did not follow the previous one.
pub const SEQ_COUNT_JUMP: &str = "SEQ_COUNT_JUMP";
/// A packet was too short to be processed.
pub const SHORT_PACKET: &str = "SHORT_PACKET";
/// The time code of a packet could not be decoded.
pub const INVALID_TIME: &str = "INVALID_TIME";

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Component raising the event, usually the link name.
    pub source: String,
    /// Event type, e.g., [CORRUPTED_PACKET].
    pub kind: String,
    pub severity: EventSeverity,
    pub message: String,
}

impl Event {
    pub fn warning(source: &str, kind: &str, message: impl Into<String>) -> Self {
        Self {
            source: source.to_string(),
            kind: kind.to_string(),
            severity: EventSeverity::Warning,
            message: message.into(),
        }
    }
}

/// Receives operator events.
pub trait EventProducer: Send + Sync + Debug {
    fn send(&self, event: Event);
}

impl<P: EventProducer + ?Sized> EventProducer for Arc<P> {
    fn send(&self, event: Event) {
        (**self).send(event);
    }
}

/// Writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventProducer;

impl EventProducer for LogEventProducer {
    fn send(&self, event: Event) {
        let Event {
            source,
            kind,
            severity,
            message,
        } = event;
        match severity {
            EventSeverity::Info => info!(source = %source, kind = %kind, "{message}"),
            EventSeverity::Warning => warn!(source = %source, kind = %kind, "{message}"),
            EventSeverity::Error => error!(source = %source, kind = %kind, "{message}"),
        }
    }
}

#[derive(Debug)]
struct Window {
    last_sent: Instant,
    suppressed: u32,
}

/// Forwards at most one event of each type per interval. The next event forwarded after a
/// quiet period reports how many were suppressed.
#[derive(Debug)]
pub struct RateLimitedEventProducer<P> {
    inner: P,
    interval: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl<P: EventProducer> RateLimitedEventProducer<P> {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

    pub fn new(inner: P, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            windows: Mutex::default(),
        }
    }
}

impl<P: EventProducer> EventProducer for RateLimitedEventProducer<P> {
    fn send(&self, mut event: Event) {
        let now = Instant::now();
        {
            let mut windows = self.windows.lock();
            match windows.get_mut(&event.kind) {
                Some(w) if now.duration_since(w.last_sent) < self.interval => {
                    w.suppressed += 1;
                    return;
                }
                Some(w) => {
                    if w.suppressed > 0 {
                        event.message = format!(
                            "{} ({} similar events suppressed)",
                            event.message, w.suppressed
                        );
                    }
                    w.last_sent = now;
                    w.suppressed = 0;
                }
                None => {
                    windows.insert(
                        event.kind.clone(),
                        Window {
                            last_sent: now,
                            suppressed: 0,
                        },
                    );
                }
            }
        }
        self.inner.send(event);
    }
}
