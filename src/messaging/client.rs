// OSC over UDP, outbound side

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use super::codec;
use super::message::Message;
use super::server::TransportError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub sent: u64,
    pub failed: u64,
}

/// Sends each message as a single-message bundle to one target
pub struct OscClient {
    socket: UdpSocket,
    target: SocketAddr,
    buffer: Vec<u8>,
    stats: ClientStats,
}

impl OscClient {
    pub fn connect(bind: impl ToSocketAddrs, target: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(bind)?;
        let target = target.to_socket_addrs()?.next().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "no target address")
        })?;

        Ok(OscClient {
            socket,
            target,
            buffer: Vec::with_capacity(512),
            stats: ClientStats::default(),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Encode into the reusable buffer and send
    pub fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        let result = codec::encode_into(message, &mut self.buffer)
            .map_err(TransportError::from)
            .and_then(|()| {
                self.socket
                    .send_to(&self.buffer, self.target)
                    .map_err(TransportError::from)
            });

        match result {
            Ok(_) => {
                self.stats.sent += 1;
                Ok(())
            }
            Err(e) => {
                self.stats.failed += 1;
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> ClientStats {
        self.stats
    }
}
