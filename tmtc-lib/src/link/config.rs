use std::{net::Ipv4Addr, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::warn;
use typed_builder::TypedBuilder;

use super::{
    FrameOptions, FrameTmTransport, Link, MulticastTmTransport, TcDataLink, TcLinkOptions,
    TcTransport, TcpTcTransport, TcpTmTransport, TmDataLink, TmLinkOptions, TmTransport,
    UdpTcTransport, UdpTmTransport,
};
use crate::{
    events::{EventProducer, LogEventProducer, RateLimitedEventProducer},
    spacepacket::SequenceCounters,
    stream::{PacketInputConfig, DEFAULT_MAX_PACKET_LENGTH},
    tc::{CommandHistoryPublisher, LogCommandHistory, PostprocessorConfig, TcLink},
    timecode::{TimeService, WallClock},
    tm::{InvalidPacketFilter, InvalidPacketPolicy, PreprocessorConfig, TmSink},
    Error, Result,
};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkType {
    /// TCP client receiving a packet stream.
    TcpTm,
    /// UDP server, one packet per datagram.
    UdpTm,
    /// UDP multicast group member, one packet per datagram.
    MulticastTm,
    /// UDP server, one AOS transfer frame per datagram.
    UdpFrameTm,
    /// TCP client sending commands.
    TcpTc,
    /// UDP client, one command per datagram.
    UdpTc,
}

impl LinkType {
    #[must_use]
    pub fn is_tm(self) -> bool {
        !matches!(self, LinkType::TcpTc | LinkType::UdpTc)
    }
}

fn default_true() -> bool {
    true
}

fn default_reconnect_delay() -> u64 {
    10_000
}

fn default_max_length() -> usize {
    DEFAULT_MAX_PACKET_LENGTH
}

/// Configuration of one link, usually read from a JSON list:
///
/// ```json
/// [
///   {"name": "tm", "type": "TCP_TM", "host": "localhost", "port": 10015},
///   {"name": "tc", "type": "TCP_TC", "host": "localhost", "port": 10025, "tcQueueSize": 100}
/// ]
/// ```
///
/// Options that do not apply to the link type are ignored.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LinkConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: LinkType,
    #[serde(default = "default_true")]
    pub enabled_at_startup: bool,
    /// Remote host for clients, bind address for servers (default all interfaces).
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Multicast group to join.
    pub group: Option<Ipv4Addr>,
    /// Interface used to join the multicast group.
    pub interface: Option<Ipv4Addr>,
    /// Milliseconds before the first connection attempt.
    #[serde(default)]
    pub initial_delay: i64,
    /// Milliseconds between connection attempts.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: u64,
    /// Largest datagram accepted by datagram links.
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default)]
    pub packet_input: PacketInputConfig,
    #[serde(default)]
    pub preprocessor: PreprocessorConfig,
    #[serde(default)]
    pub invalid_packets: InvalidPacketPolicy,
    #[serde(default)]
    pub frame: FrameOptions,
    #[serde(default)]
    pub postprocessor: PostprocessorConfig,
    pub tc_queue_size: Option<usize>,
    /// Maximum commands per second.
    pub tc_max_rate: Option<f64>,
    #[serde(default)]
    pub block_sender_on_queue_full: bool,
}

impl LinkConfig {
    fn port(&self) -> Result<u16> {
        self.port
            .ok_or_else(|| Error::Config(format!("link {}: port is required", self.name)))
    }

    fn remote_host(&self) -> Result<&str> {
        self.host
            .as_deref()
            .ok_or_else(|| Error::Config(format!("link {}: host is required", self.name)))
    }

    fn bind_host(&self) -> &str {
        self.host.as_deref().unwrap_or("0.0.0.0")
    }

    fn initial_delay(&self) -> Result<Duration> {
        u64::try_from(self.initial_delay)
            .map(Duration::from_millis)
            .map_err(|_| {
                Error::Config(format!(
                    "link {}: initialDelay must not be negative, got {}",
                    self.name, self.initial_delay
                ))
            })
    }
}

/// Collaborators shared by the links built from configuration.
#[derive(TypedBuilder, Clone)]
pub struct LinkContext {
    /// Receives processed telemetry.
    pub sink: Arc<dyn TmSink>,
    /// Receives corrupted packets under [InvalidPacketPolicy::Divert].
    #[builder(default, setter(strip_option))]
    pub invalid_sink: Option<Arc<dyn TmSink>>,
    #[builder(default = Arc::new(LogCommandHistory) as Arc<dyn CommandHistoryPublisher>)]
    pub history: Arc<dyn CommandHistoryPublisher>,
    #[builder(default = Arc::new(RateLimitedEventProducer::new(
        LogEventProducer,
        RateLimitedEventProducer::<LogEventProducer>::DEFAULT_INTERVAL,
    )) as Arc<dyn EventProducer>)]
    pub events: Arc<dyn EventProducer>,
    #[builder(default = Arc::new(WallClock) as Arc<dyn TimeService>)]
    pub time_service: Arc<dyn TimeService>,
    /// Last sequence counts seen, shared between TM links receiving the same packet
    /// streams. Each TM link tracks continuity on its own when unset.
    #[builder(default, setter(strip_option))]
    pub tm_counters: Option<SequenceCounters>,
    /// Sequence counts assigned to outgoing commands, shared between TC links. Each TC link
    /// assigns its own counts when unset. Never mixed with `tm_counters`.
    #[builder(default, setter(strip_option))]
    pub tc_counters: Option<SequenceCounters>,
}

/// A link built from configuration. `commands` is set for telecommand links and refers to
/// the same link as `link`.
#[derive(Clone)]
pub struct LinkHandle {
    pub link: Arc<dyn Link>,
    pub commands: Option<Arc<dyn TcLink>>,
}

/// Build the link described by `config` and enable it if `enabledAtStartup` is set. A link
/// that fails to enable is returned disabled.
///
/// # Errors
/// [Error::Config] for missing or invalid options; nothing is started in that case.
pub fn build_link(config: &LinkConfig, ctx: &LinkContext) -> Result<LinkHandle> {
    let tm_counters = || ctx.tm_counters.clone().unwrap_or_default();
    let tc_counters = || ctx.tc_counters.clone().unwrap_or_default();
    let handle = match config.kind {
        LinkType::TcpTm => {
            let transport = TcpTmTransport::new(
                config.remote_host()?,
                config.port()?,
                config.packet_input.clone(),
            )?;
            tm_link(config, ctx, tm_counters(), transport)?
        }
        LinkType::UdpTm => {
            let transport = UdpTmTransport::new(config.bind_host(), config.port()?, config.max_length);
            tm_link(config, ctx, tm_counters(), transport)?
        }
        LinkType::MulticastTm => {
            let group = config.group.ok_or_else(|| {
                Error::Config(format!("link {}: group is required", config.name))
            })?;
            let transport =
                MulticastTmTransport::new(group, config.port()?, config.interface, config.max_length)?;
            tm_link(config, ctx, tm_counters(), transport)?
        }
        LinkType::UdpFrameTm => {
            let transport =
                FrameTmTransport::new(config.bind_host(), config.port()?, config.frame.clone());
            tm_link(config, ctx, tm_counters(), transport)?
        }
        LinkType::TcpTc => {
            let transport = TcpTcTransport::new(config.remote_host()?, config.port()?);
            tc_link(config, ctx, tc_counters(), transport)?
        }
        LinkType::UdpTc => {
            let transport = UdpTcTransport::new(config.remote_host()?, config.port()?);
            tc_link(config, ctx, tc_counters(), transport)?
        }
    };

    if config.enabled_at_startup {
        if let Err(err) = handle.link.enable() {
            warn!(link = %config.name, "link left disabled: {err}");
        }
    }
    Ok(handle)
}

fn tm_link<T: TmTransport>(
    config: &LinkConfig,
    ctx: &LinkContext,
    counters: SequenceCounters,
    transport: T,
) -> Result<LinkHandle> {
    let preprocessor = config
        .preprocessor
        .build(&config.name, ctx.events.clone(), counters)?;
    let sink = InvalidPacketFilter::new(
        config.invalid_packets,
        ctx.sink.clone(),
        ctx.invalid_sink.clone(),
    )?;
    let options = TmLinkOptions::builder()
        .name(config.name.as_str())
        .preprocessor(preprocessor)
        .sink(Arc::new(sink) as Arc<dyn TmSink>)
        .time_service(ctx.time_service.clone())
        .initial_delay(config.initial_delay()?)
        .reconnect_delay(Duration::from_millis(config.reconnect_delay))
        .build();
    Ok(LinkHandle {
        link: Arc::new(TmDataLink::new(transport, options)?),
        commands: None,
    })
}

fn tc_link<T: TcTransport>(
    config: &LinkConfig,
    ctx: &LinkContext,
    counters: SequenceCounters,
    transport: T,
) -> Result<LinkHandle> {
    let postprocessor = config
        .postprocessor
        .build(&config.name, ctx.history.clone(), counters)?;
    let options = TcLinkOptions::builder()
        .name(config.name.as_str())
        .postprocessor(postprocessor)
        .history(ctx.history.clone())
        .time_service(ctx.time_service.clone())
        .initial_delay(config.initial_delay()?)
        .reconnect_delay(Duration::from_millis(config.reconnect_delay))
        .queue_size(config.tc_queue_size)
        .max_rate(config.tc_max_rate)
        .block_sender_on_queue_full(config.block_sender_on_queue_full)
        .build();
    let link = Arc::new(TcDataLink::new(transport, options)?);
    Ok(LinkHandle {
        link: link.clone(),
        commands: Some(link),
    })
}
