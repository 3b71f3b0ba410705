use std::{
    io::{BufReader, ErrorKind, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};

use tracing::trace;

use super::{Interrupt, TcTransport, TmTransport};
use crate::{
    stream::{PacketInputConfig, PacketInputStream},
    Error, Result,
};

/// Timeout for a single connection attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect to the first address `host:port` resolves to that accepts.
fn connect(host: &str, port: u16) -> Result<TcpStream> {
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                trace!("connect to {addr} failed: {err}");
                last_err = Some(err);
            }
        }
    }
    Err(last_err
        .unwrap_or_else(|| {
            std::io::Error::new(ErrorKind::NotFound, format!("{host} resolved to no address"))
        })
        .into())
}

/// TCP client receiving a packet stream, framed according to a [PacketInputConfig].
pub struct TcpTmTransport {
    host: String,
    port: u16,
    framing: PacketInputConfig,
    input: Option<Box<dyn PacketInputStream>>,
}

impl TcpTmTransport {
    /// # Errors
    /// [Error::Config] if the framing configuration is invalid.
    pub fn new(host: &str, port: u16, framing: PacketInputConfig) -> Result<Self> {
        framing.validate()?;
        Ok(Self {
            host: host.to_string(),
            port,
            framing,
            input: None,
        })
    }
}

impl TmTransport for TcpTmTransport {
    fn connect(&mut self) -> Result<Interrupt> {
        let stream = connect(&self.host, self.port)?;
        let interrupt = Interrupt::tcp(&stream)?;
        self.input = Some(self.framing.build(BufReader::new(stream))?);
        Ok(interrupt)
    }

    fn read_packet(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(input) = self.input.as_mut() else {
            return Err(std::io::Error::from(ErrorKind::NotConnected).into());
        };
        match input.read_packet()? {
            Some(packet) => Ok(Some(packet)),
            None => Err(std::io::Error::new(
                ErrorKind::ConnectionAborted,
                "connection closed by peer",
            )
            .into()),
        }
    }

    fn disconnect(&mut self) {
        self.input = None;
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn is_stream(&self) -> bool {
        true
    }
}

/// TCP client writing each command as-is.
pub struct TcpTcTransport {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
}

impl TcpTcTransport {
    #[must_use]
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            stream: None,
        }
    }

    /// Address of the open connection, if any.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.peer_addr().ok())
    }
}

impl TcTransport for TcpTcTransport {
    fn connect(&mut self) -> Result<Interrupt> {
        let stream = connect(&self.host, self.port)?;
        stream.set_nodelay(true)?;
        let interrupt = Interrupt::tcp(&stream)?;
        self.stream = Some(stream);
        Ok(interrupt)
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::Io(ErrorKind::NotConnected.into()));
        };
        stream.write_all(data)?;
        stream.flush()?;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.stream = None;
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn is_stream(&self) -> bool {
        true
    }
}
