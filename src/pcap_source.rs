// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! PCAP file packet source for testing and offline replay.
//!
//! This module provides [`PcapSource`], a [`PacketSource`] implementation that
//! reads UDP packets from PCAP/PCAPNG captures of a Velodyne sensor. Packets
//! carry their capture timestamps and can optionally be paced to replay at
//! (a multiple of) the recorded rate.
//!
//! # Example
//!
//! ```ignore
//! use edgefirst_velodyne::PcapSource;
//! use edgefirst_velodyne::packet_source::PacketSource;
//!
//! // Load data packets, replaying in real time
//! let mut source = PcapSource::from_file("hdl32.pcap", Some(2368))?
//!     .with_payload_len(edgefirst_velodyne::velodyne::PACKET_SIZE)
//!     .with_replay_speed(1.0);
//!
//! while let Some(packet) = source.next_packet().await? {
//!     // Decode packet.data()
//! }
//! ```

use crate::{
    lidar::{Error, RawPacket},
    packet_source::PacketSource,
};
use pcap_parser::traits::PcapReaderIterator;
use std::{future::Future, path::Path, pin::Pin, time::Duration};
use tokio::time::Instant;
use tracing::{debug, info};

/// PCAP file packet source for testing and offline replay.
///
/// Loads entire PCAP file into memory and provides packets via the
/// [`PacketSource`] trait. Supports both legacy PCAP and PCAPNG formats.
pub struct PcapSource {
    /// Pre-extracted UDP payloads stamped with capture time
    packets: Vec<RawPacket>,
    /// Current packet index
    index: usize,
    /// Replay rate relative to capture time, unpaced when `None`
    replay_speed: Option<f64>,
    /// Wall clock and capture time of the first paced packet
    pacing_origin: Option<(Instant, u64)>,
}

impl PcapSource {
    /// Load PCAP file from disk, optionally filtering by port.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to PCAP or PCAPNG file
    /// * `port` - Optional port filter (matches source OR destination)
    pub fn from_file<P: AsRef<Path>>(path: P, port: Option<u16>) -> Result<Self, Error> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(Error::Io)?;
        let source = Self::from_bytes(&data, port)?;
        info!(path = %path.display(), packets = source.len(), "loaded capture");
        Ok(source)
    }

    /// Load PCAP from bytes, optionally filtering by port.
    ///
    /// # Arguments
    ///
    /// * `data` - Raw PCAP/PCAPNG file contents
    /// * `port` - Optional port filter (matches source OR destination)
    pub fn from_bytes(data: &[u8], port: Option<u16>) -> Result<Self, Error> {
        let packets = Self::extract_packets(data, port)?;
        Ok(Self {
            packets,
            index: 0,
            replay_speed: None,
            pacing_origin: None,
        })
    }

    /// Keep only payloads of exactly `len` bytes.
    ///
    /// Drops position packets and other traffic sharing the capture.
    pub fn with_payload_len(mut self, len: usize) -> Self {
        let before = self.packets.len();
        self.packets.retain(|packet| packet.len() == len);
        debug!(
            kept = self.packets.len(),
            dropped = before - self.packets.len(),
            "filtered capture by payload length"
        );
        self
    }

    /// Pace delivery to the capture timestamps, scaled by `speed`.
    ///
    /// Non-positive or non-finite speeds disable pacing.
    pub fn with_replay_speed(mut self, speed: f64) -> Self {
        self.replay_speed = (speed.is_finite() && speed > 0.0).then_some(speed);
        self
    }

    /// Payload of the first packet, used to auto-detect the sensor model.
    pub fn first_payload(&self) -> Option<&[u8]> {
        self.packets.first().map(RawPacket::data)
    }

    /// Extract UDP packets from PCAP data.
    fn extract_packets(data: &[u8], port: Option<u16>) -> Result<Vec<RawPacket>, Error> {
        let mut packets = Vec::new();

        // Try PCAPNG first, then legacy PCAP
        if data.len() >= 4 && data[0..4] == [0x0a, 0x0d, 0x0d, 0x0a] {
            // PCAPNG format (Section Header Block magic)
            Self::extract_pcapng(data, port, &mut packets)?;
        } else {
            Self::extract_legacy_pcap(data, port, &mut packets)?;
        }

        Ok(packets)
    }

    /// Extract packets from legacy PCAP format.
    fn extract_legacy_pcap(
        data: &[u8],
        port: Option<u16>,
        packets: &mut Vec<RawPacket>,
    ) -> Result<(), Error> {
        use pcap_parser::*;

        // Buffer size must be at least as large as the data to avoid Incomplete errors
        let mut reader = LegacyPcapReader::new(data.len(), data)
            .map_err(|e| Error::InvalidCapture(format!("Failed to create PCAP reader: {:?}", e)))?;
        let mut nanosecond = false;

        loop {
            match reader.next() {
                Ok((offset, block)) => {
                    match block {
                        PcapBlockOwned::Legacy(packet) => {
                            let fraction = if nanosecond {
                                packet.ts_usec as u64
                            } else {
                                packet.ts_usec as u64 * 1_000
                            };
                            let timestamp = packet.ts_sec as u64 * 1_000_000_000 + fraction;
                            if let Some(extracted) =
                                Self::extract_udp_payload(packet.data, port, timestamp)
                            {
                                packets.push(extracted);
                            }
                        }
                        PcapBlockOwned::LegacyHeader(header) => {
                            nanosecond = header.is_nanosecond_precision();
                        }
                        _ => {}
                    }
                    reader.consume(offset);
                }
                Err(PcapError::Eof) => break,
                Err(PcapError::Incomplete(_)) => {
                    // Need more data but we loaded everything, so just break
                    break;
                }
                Err(e) => {
                    return Err(Error::InvalidCapture(format!("PCAP parse error: {:?}", e)));
                }
            }
        }

        Ok(())
    }

    /// Extract packets from PCAPNG format.
    ///
    /// Enhanced packet timestamps are read at the default microsecond
    /// resolution. Simple packets carry no timestamp and reuse the previous
    /// packet's.
    fn extract_pcapng(
        data: &[u8],
        port: Option<u16>,
        packets: &mut Vec<RawPacket>,
    ) -> Result<(), Error> {
        use pcap_parser::*;

        // Buffer size must be at least as large as the data to avoid Incomplete errors
        let mut reader = PcapNGReader::new(data.len(), data).map_err(|e| {
            Error::InvalidCapture(format!("Failed to create PCAPNG reader: {:?}", e))
        })?;
        let mut last_timestamp = 0;

        loop {
            match reader.next() {
                Ok((offset, block)) => {
                    match block {
                        PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                            let micros = ((epb.ts_high as u64) << 32) | epb.ts_low as u64;
                            last_timestamp = micros * 1_000;
                            if let Some(extracted) =
                                Self::extract_udp_payload(epb.data, port, last_timestamp)
                            {
                                packets.push(extracted);
                            }
                        }
                        PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
                            if let Some(extracted) =
                                Self::extract_udp_payload(spb.data, port, last_timestamp)
                            {
                                packets.push(extracted);
                            }
                        }
                        _ => {
                            // Skip other block types (SHB, IDB, etc.)
                        }
                    }
                    reader.consume(offset);
                }
                Err(PcapError::Eof) => break,
                Err(PcapError::Incomplete(_)) => {
                    // Need more data but we loaded everything
                    break;
                }
                Err(e) => {
                    return Err(Error::InvalidCapture(format!(
                        "PCAPNG parse error: {:?}",
                        e
                    )));
                }
            }
        }

        Ok(())
    }

    /// Extract UDP payload from raw packet data.
    ///
    /// Uses etherparse to handle Ethernet/IP/UDP headers.
    fn extract_udp_payload(data: &[u8], port: Option<u16>, timestamp: u64) -> Option<RawPacket> {
        use etherparse::SlicedPacket;

        let packet = SlicedPacket::from_ethernet(data).ok()?;

        // Check if this is a UDP packet and get the UDP slice
        let udp = match packet.transport {
            Some(etherparse::TransportSlice::Udp(udp)) => udp,
            _ => return None,
        };

        // Apply port filter if specified
        if let Some(filter_port) = port {
            let src_port = udp.source_port();
            let dst_port = udp.destination_port();
            if src_port != filter_port && dst_port != filter_port {
                return None;
            }
        }

        let payload = udp.payload();
        if payload.is_empty() {
            return None;
        }

        Some(RawPacket::new(payload.to_vec(), timestamp))
    }

    /// Reset source to beginning for replay.
    pub fn reset(&mut self) {
        self.index = 0;
        self.pacing_origin = None;
    }

    /// Get the total number of packets.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Check if the source contains no packets.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Get the current packet index.
    pub fn current_index(&self) -> usize {
        self.index
    }

    /// Get remaining packet count.
    pub fn remaining(&self) -> usize {
        self.packets.len().saturating_sub(self.index)
    }

    /// Wall-clock deadline for a packet captured at `timestamp`.
    fn deadline(&mut self, timestamp: u64, speed: f64) -> Instant {
        let (start, origin) = *self
            .pacing_origin
            .get_or_insert_with(|| (Instant::now(), timestamp));
        let elapsed = timestamp.saturating_sub(origin) as f64 / speed;
        start + Duration::from_nanos(elapsed as u64)
    }
}

impl PacketSource for PcapSource {
    fn next_packet<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<RawPacket>, Error>> + Send + 'a>> {
        Box::pin(async move {
            let Some(packet) = self.packets.get(self.index).cloned() else {
                return Ok(None);
            };

            // Advance only once delivered so a cancelled wait loses nothing
            if let Some(speed) = self.replay_speed {
                let deadline = self.deadline(packet.timestamp(), speed);
                tokio::time::sleep_until(deadline).await;
            }

            self.index += 1;
            Ok(Some(packet))
        })
    }

    fn has_more(&self) -> bool {
        self.index < self.packets.len()
    }
}
