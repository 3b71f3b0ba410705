use std::{
    io::ErrorKind,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket},
};

use tracing::warn;

use super::{Interrupt, TcTransport, TmTransport, DATAGRAM_READ_TIMEOUT};
use crate::{Error, Result};

/// Receive one datagram into `buf`. Returns `Ok(None)` on read timeout and for datagrams
/// that fill `buf` completely, which are assumed truncated and dropped.
pub(crate) fn receive_datagram(socket: &UdpSocket, buf: &mut [u8]) -> Result<Option<Vec<u8>>> {
    match socket.recv_from(buf) {
        Ok((len, from)) if len == buf.len() => {
            warn!(%from, "dropping datagram longer than {} bytes", len - 1);
            Ok(None)
        }
        Ok((len, _)) => Ok(Some(buf[..len].to_vec())),
        Err(err)
            if matches!(
                err.kind(),
                ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
            ) =>
        {
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

/// Bind a socket with the datagram read timeout set.
pub(crate) fn bind(addr: (&str, u16)) -> Result<UdpSocket> {
    let socket = UdpSocket::bind(addr)?;
    socket.set_read_timeout(Some(DATAGRAM_READ_TIMEOUT))?;
    Ok(socket)
}

/// UDP server receiving one packet per datagram.
pub struct UdpTmTransport {
    host: String,
    port: u16,
    socket: Option<UdpSocket>,
    buf: Vec<u8>,
}

impl UdpTmTransport {
    /// Listen on `host:port`, accepting datagrams of up to `max_length` bytes.
    #[must_use]
    pub fn new(host: &str, port: u16, max_length: usize) -> Self {
        Self {
            host: host.to_string(),
            port,
            socket: None,
            // one spare byte detects oversized datagrams
            buf: vec![0u8; max_length + 1],
        }
    }

    /// Address of the bound socket, if connected.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }
}

impl TmTransport for UdpTmTransport {
    fn connect(&mut self) -> Result<Interrupt> {
        self.socket = Some(bind((self.host.as_str(), self.port))?);
        Ok(Interrupt::none())
    }

    fn read_packet(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(socket) = self.socket.as_ref() else {
            return Err(Error::Io(ErrorKind::NotConnected.into()));
        };
        receive_datagram(socket, &mut self.buf)
    }

    fn disconnect(&mut self) {
        self.socket = None;
    }

    fn describe(&self) -> String {
        format!("udp {}:{}", self.host, self.port)
    }
}

/// UDP client sending one command per datagram.
pub struct UdpTcTransport {
    host: String,
    port: u16,
    socket: Option<UdpSocket>,
}

impl UdpTcTransport {
    #[must_use]
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            socket: None,
        }
    }
}

impl TcTransport for UdpTcTransport {
    fn connect(&mut self) -> Result<Interrupt> {
        let Some(target) = (self.host.as_str(), self.port).to_socket_addrs()?.next() else {
            return Err(Error::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("{} resolved to no address", self.host),
            )));
        };
        let local: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(target)?;
        self.socket = Some(socket);
        Ok(Interrupt::none())
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let Some(socket) = self.socket.as_ref() else {
            return Err(Error::Io(ErrorKind::NotConnected.into()));
        };
        let sent = socket.send(data)?;
        if sent != data.len() {
            return Err(Error::Io(std::io::Error::new(
                ErrorKind::WriteZero,
                format!("sent {sent} of {} bytes", data.len()),
            )));
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.socket = None;
    }

    fn describe(&self) -> String {
        format!("udp {}:{}", self.host, self.port)
    }
}
