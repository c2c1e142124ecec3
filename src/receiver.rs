//! Where telegrams come from.
//!
//! The energy meter broadcasts one telegram about every second to a UDP
//! multicast group. The control loop only cares about the newest one, so the
//! receiver drops whatever queued up while the loop was busy actuating and
//! then waits for a fresh frame.

use crate::error::ReceiveError;
use crate::telegram::{Telegram, MAX_TELEGRAM_SIZE};
use serde::{Deserialize, Serialize};
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::time::Duration;
use tracing::{debug, info, trace};

pub trait TelegramSource: Send {
    /// Block until the next telegram arrives or the receive timeout expires.
    fn receive(&mut self) -> Result<Telegram, ReceiveError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MulticastConfig {
    pub group: Ipv4Addr,
    pub port: u16,
    pub interface: Ipv4Addr,
    pub timeout_ms: u64,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            group: Ipv4Addr::new(239, 12, 255, 254),
            port: 9522,
            interface: Ipv4Addr::UNSPECIFIED,
            timeout_ms: 5000,
        }
    }
}

impl MulticastConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

pub struct MulticastReceiver {
    socket: UdpSocket,
    // One spare byte to tell an exactly-full datagram from an oversized one.
    buffer: [u8; MAX_TELEGRAM_SIZE + 1],
}

impl MulticastReceiver {
    /// Bind and join the group. Failure here is a startup failure.
    pub fn bind(config: &MulticastConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port))?;
        socket.join_multicast_v4(&config.group, &config.interface)?;
        socket.set_read_timeout(Some(config.timeout()))?;
        info!(
            group = %config.group,
            port = config.port,
            timeout_ms = config.timeout_ms,
            "joined telegram multicast group"
        );

        Ok(Self {
            socket,
            buffer: [0; MAX_TELEGRAM_SIZE + 1],
        })
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.socket.local_addr()
    }

    fn discard_backlog(&mut self) -> io::Result<usize> {
        self.socket.set_nonblocking(true)?;
        let mut dropped = 0;
        let result = loop {
            match self.socket.recv_from(&mut self.buffer) {
                Ok(_) => dropped += 1,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(dropped),
                Err(e) => break Err(e),
            }
        };
        self.socket.set_nonblocking(false)?;
        result
    }
}

impl TelegramSource for MulticastReceiver {
    fn receive(&mut self) -> Result<Telegram, ReceiveError> {
        let dropped = self.discard_backlog()?;
        if dropped > 0 {
            trace!(dropped, "discarded queued telegrams");
        }

        let (len, from) = self.socket.recv_from(&mut self.buffer).map_err(|e| match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ReceiveError::Timeout,
            _ => ReceiveError::Io(e),
        })?;
        if len > MAX_TELEGRAM_SIZE {
            return Err(ReceiveError::Oversized(len));
        }
        debug!(len, %from, "telegram received");

        Telegram::from_slice(&self.buffer[..len]).ok_or(ReceiveError::Oversized(len))
    }
}
