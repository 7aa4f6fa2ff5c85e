//! Byte channels the dispatcher and codec talk through.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::error::{Result, TransportError};
use crate::osc::codec;
use crate::osc::timetag::TimeTag;
use crate::osc::types::{Bundle, Packet};

/// A datagram-style byte transport.
///
/// Implementors only move bytes; the provided methods add OSC encoding on top.
pub trait Transport {
    fn send(&self, bytes: &[u8], destination: SocketAddr) -> std::result::Result<(), TransportError>;

    /// Blocks for the next datagram of at most `max_size` bytes.
    fn receive(&self, max_size: usize) -> std::result::Result<(Vec<u8>, SocketAddr), TransportError>;

    /// Encodes and sends `packet`. Packets that would not decode on the other
    /// side are refused with `MalformedPacket` and nothing is sent.
    fn send_packet(&self, packet: &Packet, destination: SocketAddr) -> Result<()> {
        codec::validate(packet)?;
        self.send(&codec::encode(packet), destination)?;
        Ok(())
    }

    /// Sends `packet` wrapped in a bundle carrying `timetag`.
    fn send_timestamped(
        &self,
        packet: impl Into<Packet>,
        timetag: TimeTag,
        destination: SocketAddr,
    ) -> Result<()>
    where
        Self: Sized,
    {
        let bundle = Bundle::new(timetag).with_element(packet);
        self.send_packet(&bundle.into(), destination)
    }

    /// Receives and decodes one packet, stamping it with its sender.
    fn receive_packet(&self, max_size: usize) -> Result<(Packet, SocketAddr)> {
        let (bytes, sender) = self.receive(max_size)?;
        let mut packet = codec::decode(&bytes)?;
        packet.set_source(Some(sender));
        Ok((packet, sender))
    }
}

/// UDP transport over a bound `std::net::UdpSocket`.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub fn bind(addr: impl ToSocketAddrs) -> std::result::Result<Self, TransportError> {
        Ok(UdpTransport {
            socket: UdpSocket::bind(addr)?,
        })
    }

    pub fn from_socket(socket: UdpSocket) -> Self {
        UdpTransport { socket }
    }

    pub fn local_addr(&self) -> std::result::Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> std::result::Result<(), TransportError> {
        Ok(self.socket.set_read_timeout(timeout)?)
    }
}

impl Transport for UdpTransport {
    fn send(&self, bytes: &[u8], destination: SocketAddr) -> std::result::Result<(), TransportError> {
        self.socket.send_to(bytes, destination)?;
        Ok(())
    }

    fn receive(&self, max_size: usize) -> std::result::Result<(Vec<u8>, SocketAddr), TransportError> {
        let mut buf = vec![0u8; max_size];
        let (len, sender) = self.socket.recv_from(&mut buf)?;
        buf.truncate(len);
        Ok((buf, sender))
    }
}

/// In-memory transport; one end of a [`ChannelTransport::pair`].
///
/// Every datagram is delivered to the peer regardless of `destination`.
pub struct ChannelTransport {
    local: SocketAddr,
    tx: Sender<(Vec<u8>, SocketAddr)>,
    rx: Receiver<(Vec<u8>, SocketAddr)>,
}

impl ChannelTransport {
    /// Two connected ends that identify themselves as `a` and `b`.
    pub fn pair(a: SocketAddr, b: SocketAddr) -> (ChannelTransport, ChannelTransport) {
        let (a_tx, b_rx) = unbounded();
        let (b_tx, a_rx) = unbounded();
        (
            ChannelTransport {
                local: a,
                tx: a_tx,
                rx: a_rx,
            },
            ChannelTransport {
                local: b,
                tx: b_tx,
                rx: b_rx,
            },
        )
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

impl Transport for ChannelTransport {
    fn send(&self, bytes: &[u8], _destination: SocketAddr) -> std::result::Result<(), TransportError> {
        self.tx
            .send((bytes.to_vec(), self.local))
            .map_err(|_| TransportError::Disconnected)
    }

    fn receive(&self, max_size: usize) -> std::result::Result<(Vec<u8>, SocketAddr), TransportError> {
        let (bytes, sender) = self.rx.recv().map_err(|_| TransportError::Disconnected)?;
        if bytes.len() > max_size {
            return Err(TransportError::PacketTooLarge {
                size: bytes.len(),
                max: max_size,
            });
        }
        Ok((bytes, sender))
    }
}
