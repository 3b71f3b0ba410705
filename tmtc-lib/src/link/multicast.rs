use std::{
    io::ErrorKind,
    net::{Ipv4Addr, SocketAddr, UdpSocket},
};

use socket2::{Domain, Protocol, Socket, Type};

use super::{udp::receive_datagram, Interrupt, TmTransport, DATAGRAM_READ_TIMEOUT};
use crate::{Error, Result};

/// Receives one packet per datagram sent to an IPv4 multicast group.
pub struct MulticastTmTransport {
    group: Ipv4Addr,
    port: u16,
    interface: Ipv4Addr,
    socket: Option<UdpSocket>,
    buf: Vec<u8>,
}

impl MulticastTmTransport {
    /// Join `group` on `interface` (any interface when unspecified).
    ///
    /// # Errors
    /// [Error::Config] if `group` is not a multicast address.
    pub fn new(
        group: Ipv4Addr,
        port: u16,
        interface: Option<Ipv4Addr>,
        max_length: usize,
    ) -> Result<Self> {
        if !group.is_multicast() {
            return Err(Error::Config(format!("{group} is not a multicast address")));
        }
        Ok(Self {
            group,
            port,
            interface: interface.unwrap_or(Ipv4Addr::UNSPECIFIED),
            socket: None,
            buf: vec![0u8; max_length + 1],
        })
    }
}

/// Bind the wildcard address on `port` allowing other receivers of the same group, on
/// this host, to bind it too.
fn bind_shared(port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;
    socket.set_read_timeout(Some(DATAGRAM_READ_TIMEOUT))?;
    Ok(socket.into())
}

impl TmTransport for MulticastTmTransport {
    fn connect(&mut self) -> Result<Interrupt> {
        let socket = bind_shared(self.port)?;
        socket.join_multicast_v4(&self.group, &self.interface)?;
        self.socket = Some(socket);
        Ok(Interrupt::none())
    }

    fn read_packet(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(socket) = self.socket.as_ref() else {
            return Err(Error::Io(ErrorKind::NotConnected.into()));
        };
        receive_datagram(socket, &mut self.buf)
    }

    fn disconnect(&mut self) {
        if let Some(socket) = self.socket.take() {
            if let Err(err) = socket.leave_multicast_v4(&self.group, &self.interface) {
                tracing::debug!("leaving {}: {err}", self.group);
            }
        }
    }

    fn describe(&self) -> String {
        format!("multicast {}:{}", self.group, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unicast_group() {
        assert!(MulticastTmTransport::new(Ipv4Addr::LOCALHOST, 10_000, None, 1500).is_err());
        assert!(
            MulticastTmTransport::new(Ipv4Addr::new(239, 1, 2, 3), 10_000, None, 1500).is_ok()
        );
    }

    #[test]
    fn receivers_share_port() {
        let first = bind_shared(0).unwrap();
        let port = first.local_addr().unwrap().port();
        let second = bind_shared(port).unwrap();
        assert_eq!(second.local_addr().unwrap().port(), port);
        assert_eq!(second.read_timeout().unwrap(), Some(DATAGRAM_READ_TIMEOUT));
    }

    #[test]
    fn describe_names_group() {
        let transport =
            MulticastTmTransport::new(Ipv4Addr::new(239, 1, 2, 3), 10_015, None, 1500).unwrap();
        assert_eq!(transport.describe(), "multicast 239.1.2.3:10015");
    }
}
