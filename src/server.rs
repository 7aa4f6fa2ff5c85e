use log::{info, trace, warn};

use crate::dispatch::Dispatcher;
use crate::error::{OscError, Result, TransportError};
use crate::osc::types::{Message, Packet};
use crate::transport::Transport;

/// Largest datagram accepted unless configured otherwise.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 32768;

/// Receives packets from a transport and feeds them to a [`Dispatcher`].
pub struct Server<T: Transport> {
    transport: T,
    dispatcher: Dispatcher,
    max_packet_size: usize,
}

impl<T: Transport> Server<T> {
    pub fn new(transport: T) -> Self {
        Self::with_dispatcher(transport, Dispatcher::new())
    }

    pub fn with_dispatcher(transport: T, dispatcher: Dispatcher) -> Self {
        Server {
            transport,
            dispatcher,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Blocks for one packet and dispatches it.
    pub fn serve_once(&self) -> Result<usize> {
        let (packet, sender) = self.transport.receive_packet(self.max_packet_size)?;
        trace!("received packet from {sender}");
        self.dispatcher.dispatch(packet)
    }

    /// Serves until the transport fails. Malformed or oversized packets and
    /// failing callbacks are logged and skipped.
    pub fn serve(&self) -> Result<()> {
        info!(
            "serving {} method(s), max packet size {} bytes",
            self.dispatcher.len(),
            self.max_packet_size
        );
        loop {
            match self.serve_once() {
                Ok(invoked) => trace!("{invoked} method(s) invoked"),
                Err(OscError::Transport(err @ TransportError::PacketTooLarge { .. })) => {
                    warn!("dropping packet: {err}")
                }
                Err(OscError::Transport(err)) => return Err(err.into()),
                Err(err @ OscError::MalformedPacket(_)) => warn!("dropping packet: {err}"),
                Err(err) => warn!("{err}"),
            }
        }
    }

    /// Sends `packet` back to wherever `to` came from.
    pub fn reply(&self, to: &Message, packet: &Packet) -> Result<()> {
        let destination = to.source().ok_or(TransportError::NoDestination)?;
        self.transport.send_packet(packet, destination)
    }
}
