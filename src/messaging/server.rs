// OSC over UDP, inbound side
// Non-blocking socket polled from the worker thread; decoded messages go to the hub

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use thiserror::Error;

use super::codec::{self, ProtocolError};
use super::hub::OscHub;

/// Largest datagram accepted
pub const MAX_PACKET_SIZE: usize = 65_507;

/// Errors from the UDP transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub packets: u64,
    pub messages: u64,
    pub protocol_errors: u64,
}

pub struct OscServer {
    socket: Option<UdpSocket>,
    buffer: Vec<u8>,
    max_packets_per_poll: usize,
    stats: ServerStats,
}

impl OscServer {
    /// Bind a non-blocking UDP socket
    pub fn bind(addr: impl ToSocketAddrs, max_packets_per_poll: usize) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        log::info!("OSC server listening on {}", socket.local_addr()?);

        Ok(OscServer {
            socket: Some(socket),
            buffer: vec![0; MAX_PACKET_SIZE],
            max_packets_per_poll: max_packets_per_poll.max(1),
            stats: ServerStats::default(),
        })
    }

    /// Server without a socket; packets are fed through `handle_packet`
    pub fn detached() -> Self {
        OscServer {
            socket: None,
            buffer: Vec::new(),
            max_packets_per_poll: 1,
            stats: ServerStats::default(),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Read whatever datagrams are waiting (up to the per-poll bound) and
    /// dispatch them. Returns the number of packets read.
    pub fn poll(&mut self, hub: &mut OscHub) -> Result<usize, TransportError> {
        let Some(socket) = self.socket.as_ref() else {
            return Ok(0);
        };

        let mut packets = Vec::new();
        for _ in 0..self.max_packets_per_poll {
            match socket.recv_from(&mut self.buffer) {
                Ok((len, from)) => packets.push((self.buffer[..len].to_vec(), from)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let count = packets.len();
        for (packet, from) in packets {
            log::trace!("{} byte packet from {}", packet.len(), from);
            self.handle_packet(&packet, hub);
        }
        Ok(count)
    }

    /// Decode one packet and dispatch its messages.
    /// Malformed packets are counted and logged, never fatal.
    pub fn handle_packet(&mut self, packet: &[u8], hub: &mut OscHub) -> usize {
        self.stats.packets += 1;

        match codec::decode_packet(packet) {
            Ok(messages) => {
                for message in &messages {
                    hub.dispatch(message);
                }
                self.stats.messages += messages.len() as u64;
                messages.len()
            }
            Err(e) => {
                self.stats.protocol_errors += 1;
                log::warn!("Rejected OSC packet ({} bytes): {}", packet.len(), e);
                0
            }
        }
    }

    pub fn stats(&self) -> ServerStats {
        self.stats
    }
}
