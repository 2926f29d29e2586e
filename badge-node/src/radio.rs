//! Emulated broadcast radio over UDP
//!
//! Each channel owns a window of [`CHANNEL_PORTS`] UDP ports starting at
//! `BASE_PORT + channel * CHANNEL_PORTS`. A node binds the first free port of
//! its window; a broadcast is one datagram to every port of the window.
//!
//! ```text
//! ┌──────────────┬─────────┬────────────┬──────────────────┐
//! │ identity (6) │ chan(1) │ signal (1) │ payload (≤ 250)  │
//! └──────────────┴─────────┴────────────┴──────────────────┘
//! ```

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use badge_protocol::{Identity, InboundFrame, SendError, Transport, IDENTITY_LEN, MAX_MESSAGE_LEN};
use mio::net::UdpSocket;
use mio::{Interest, Registry, Token};

// ============================================================================
// Constants
// ============================================================================

const BASE_PORT: u16 = 46_000;

/// Ports (and therefore nodes) per channel
pub const CHANNEL_PORTS: u16 = 16;

const HEADER_LEN: usize = IDENTITY_LEN + 2;

const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_MESSAGE_LEN;

/// First port of a channel's window
pub fn channel_base_port(channel: u8) -> u16 {
    BASE_PORT + channel as u16 * CHANNEL_PORTS
}

// ============================================================================
// Framing
// ============================================================================

pub fn encode_frame(identity: Identity, channel: u8, signal_dbm: i8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(identity.as_bytes());
    frame.push(channel);
    frame.push(signal_dbm as u8);
    frame.extend_from_slice(payload);
    frame
}

/// Parse a frame heard on `channel`; `None` if it does not belong there
pub fn decode_frame(data: &[u8], channel: u8) -> Option<InboundFrame> {
    if data.len() < HEADER_LEN || data.len() > MAX_FRAME_LEN {
        log::trace!("Discarding {} byte frame", data.len());
        return None;
    }

    let mut id = [0u8; IDENTITY_LEN];
    id.copy_from_slice(&data[..IDENTITY_LEN]);

    if data[IDENTITY_LEN] != channel {
        log::trace!("Discarding frame for channel {}", data[IDENTITY_LEN]);
        return None;
    }

    Some(InboundFrame {
        sender: Identity::new(id),
        rssi: data[IDENTITY_LEN + 1] as i8 as i16,
        payload: data[HEADER_LEN..].to_vec(),
    })
}

// ============================================================================
// UDP Radio
// ============================================================================

pub struct UdpRadio {
    socket: UdpSocket,
    identity: Identity,
    channel: u8,
    signal_dbm: i8,
    /// Every port of the channel window
    targets: Vec<SocketAddr>,
    recv_buf: Vec<u8>,
}

impl UdpRadio {
    /// Bind the first free port of the channel window
    pub fn open(
        identity: Identity,
        channel: u8,
        signal_dbm: i8,
        broadcast_ip: IpAddr,
    ) -> io::Result<Self> {
        let base = channel_base_port(channel);
        let socket = bind_in_window(base)?;
        if let IpAddr::V4(ip) = broadcast_ip {
            if ip.is_broadcast() {
                socket.set_broadcast(true)?;
            }
        }

        let targets = (base..base + CHANNEL_PORTS)
            .map(|port| SocketAddr::new(broadcast_ip, port))
            .collect();

        log::info!(
            "Radio on channel {} at {} (window {}-{})",
            channel,
            socket.local_addr()?,
            base,
            base + CHANNEL_PORTS - 1
        );

        Ok(UdpRadio {
            socket,
            identity,
            channel,
            signal_dbm,
            targets,
            recv_buf: vec![0u8; 2048],
        })
    }

    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        registry.register(&mut self.socket, token, Interest::READABLE)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

fn bind_in_window(base: u16) -> io::Result<UdpSocket> {
    for port in base..base + CHANNEL_PORTS {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        match UdpSocket::bind(addr) {
            Ok(socket) => return Ok(socket),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AddrInUse,
        format!("all {} ports from {} are taken", CHANNEL_PORTS, base),
    ))
}

impl Transport for UdpRadio {
    fn send(&mut self, payload: &[u8]) -> Result<(), SendError> {
        if payload.len() > MAX_MESSAGE_LEN {
            return Err(SendError::TooLarge(payload.len()));
        }

        let frame = encode_frame(self.identity, self.channel, self.signal_dbm, payload);
        let mut last_err = None;
        let mut delivered = 0;

        for target in &self.targets {
            match self.socket.send_to(&frame, *target) {
                Ok(_) => delivered += 1,
                Err(e) => last_err = Some(e),
            }
        }

        match last_err {
            Some(e) if delivered == 0 => Err(match e.kind() {
                io::ErrorKind::WouldBlock => SendError::Busy,
                _ => SendError::Io(e),
            }),
            _ => Ok(()),
        }
    }

    fn receive(&mut self) -> Option<InboundFrame> {
        loop {
            let (len, from) = match self.socket.recv_from(&mut self.recv_buf) {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(e) => {
                    log::debug!("Radio receive error: {}", e);
                    return None;
                }
            };

            let frame = match decode_frame(&self.recv_buf[..len], self.channel) {
                Some(f) => f,
                None => continue,
            };
            if frame.sender == self.identity {
                continue;
            }

            log::trace!("Received {} bytes from {} via {}", len, frame.sender, from);
            return Some(frame);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
