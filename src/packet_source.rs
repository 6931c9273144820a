// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Packet source abstraction for the ingestion pipeline.
//!
//! This module provides a [`PacketSource`] trait that abstracts where Velodyne
//! data packets come from, enabling:
//!
//! - **Live operation**: Reading from a UDP socket
//! - **Testing**: Replaying in-memory packets
//! - **Simulation**: Synthesising a spinning sensor ([`crate::simulator`])
//! - **Pcap replay**: Reading from capture files (with feature flag)
//!
//! # Example
//!
//! ```ignore
//! use edgefirst_velodyne::packet_source::{PacketSource, TestSource};
//!
//! let mut source = TestSource::from_payloads(payloads, 1_000_000);
//! while let Some(packet) = source.next_packet().await? {
//!     // Decode packet.data()
//! }
//! ```

use crate::lidar::{Error, RawPacket, timestamp};
use bytes::Bytes;
use std::{collections::VecDeque, future::Future, pin::Pin};
use tracing::debug;

/// Largest datagram accepted from the network.
const MAX_DATAGRAM: usize = 2048;

/// Trait for packet sources.
///
/// Implementations provide packets from various sources (UDP, pcap, test data).
pub trait PacketSource: Send {
    /// Receive the next packet.
    ///
    /// # Returns
    /// - `Ok(Some(packet))` - Next packet with its arrival timestamp
    /// - `Ok(None)` - End of stream, no further packets will be produced
    /// - `Err` - I/O or source error
    fn next_packet<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<RawPacket>, Error>> + Send + 'a>>;

    /// Check if more packets are available.
    ///
    /// For infinite sources (like UDP), always returns `true`.
    /// For finite sources (test, pcap), returns `false` when exhausted.
    fn has_more(&self) -> bool;
}

impl<S: PacketSource + ?Sized> PacketSource for Box<S> {
    fn next_packet<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<RawPacket>, Error>> + Send + 'a>> {
        (**self).next_packet()
    }

    fn has_more(&self) -> bool {
        (**self).has_more()
    }
}

/// UDP socket packet source for live sensor operation.
///
/// Packets are stamped with the monotonic arrival time.
pub struct UdpSource {
    socket: Option<tokio::net::UdpSocket>,
    /// Bound socket not yet registered with a runtime
    pending: Option<std::net::UdpSocket>,
    buf: Box<[u8; MAX_DATAGRAM]>,
}

impl UdpSource {
    /// Create a new UDP source from an existing socket.
    pub fn new(socket: tokio::net::UdpSocket) -> Self {
        Self {
            socket: Some(socket),
            pending: None,
            buf: Box::new([0u8; MAX_DATAGRAM]),
        }
    }

    /// Bind to an address and create a UDP source.
    pub async fn bind(addr: &str) -> Result<Self, Error> {
        let socket = tokio::net::UdpSocket::bind(addr).await?;
        debug!(addr, "listening for packets");
        Ok(Self::new(socket))
    }

    /// Bind now but register with the runtime on the first receive.
    ///
    /// Lets the socket be bound on one thread and polled by a runtime
    /// running on another.
    pub fn bind_deferred(addr: &str) -> Result<Self, Error> {
        let socket = std::net::UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        debug!(addr, "listening for packets");
        Ok(Self {
            socket: None,
            pending: Some(socket),
            buf: Box::new([0u8; MAX_DATAGRAM]),
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, Error> {
        match (&self.socket, &self.pending) {
            (Some(socket), _) => Ok(socket.local_addr()?),
            (None, Some(socket)) => Ok(socket.local_addr()?),
            (None, None) => Err(Error::Config("UDP source has no socket".to_string())),
        }
    }

    fn registered(&mut self) -> Result<&tokio::net::UdpSocket, Error> {
        if let Some(socket) = self.pending.take() {
            self.socket = Some(tokio::net::UdpSocket::from_std(socket)?);
        }
        self.socket
            .as_ref()
            .ok_or_else(|| Error::Config("UDP source has no socket".to_string()))
    }
}

impl PacketSource for UdpSource {
    fn next_packet<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<RawPacket>, Error>> + Send + 'a>> {
        Box::pin(async move {
            self.registered()?;
            let Self { socket, buf, .. } = self;
            let Some(socket) = socket.as_ref() else {
                return Ok(None);
            };
            let len = socket.recv(&mut buf[..]).await?;
            let data = Bytes::copy_from_slice(&buf[..len]);
            Ok(Some(RawPacket::new(data, timestamp()?)))
        })
    }

    fn has_more(&self) -> bool {
        true // UDP sources are infinite
    }
}

/// Test packet source for unit testing.
///
/// Provides a sequence of pre-defined packets for testing pipeline logic
/// without hardware.
pub struct TestSource {
    packets: VecDeque<RawPacket>,
    total: usize,
}

impl TestSource {
    /// Create a new test source with the given packets.
    pub fn new(packets: Vec<RawPacket>) -> Self {
        Self {
            total: packets.len(),
            packets: packets.into(),
        }
    }

    /// Create a source from payloads, stamped `interval_ns` apart.
    pub fn from_payloads(payloads: Vec<Vec<u8>>, interval_ns: u64) -> Self {
        let packets = payloads
            .into_iter()
            .enumerate()
            .map(|(i, data)| RawPacket::new(data, i as u64 * interval_ns))
            .collect();
        Self::new(packets)
    }

    /// Create an empty test source.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Get the number of packets.
    pub fn len(&self) -> usize {
        self.total
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Number of packets already delivered.
    pub fn current_index(&self) -> usize {
        self.total - self.packets.len()
    }
}

impl PacketSource for TestSource {
    fn next_packet<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<RawPacket>, Error>> + Send + 'a>> {
        Box::pin(async move { Ok(self.packets.pop_front()) })
    }

    fn has_more(&self) -> bool {
        !self.packets.is_empty()
    }
}
