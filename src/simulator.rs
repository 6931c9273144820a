// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Synthetic Velodyne packets.
//!
//! [`PacketBuilder`] assembles individual data packets byte by byte, and
//! [`SimulatedSensor`] strings them together into the stream a spinning
//! sensor inside a cylindrical room would produce. Both are used by the test
//! suite, the benchmarks and the `--simulate` mode of the binary.

use crate::{
    lidar::{AZIMUTH_UNITS, Error, RawPacket, SensorModel},
    packet_source::PacketSource,
    velodyne::{BLOCK_SIZE, BLOCKS_PER_PACKET, CHANNELS_PER_BLOCK, PACKET_SIZE, PacketFormat},
};
use std::{future::Future, pin::Pin, time::Duration};
use tokio::time::Instant;

/// Byte-level builder for a single data packet.
///
/// A new builder has every block flag set, all azimuths at zero, all
/// distances zero (no return), strongest return mode and the model's product
/// ID.
#[derive(Clone, Debug)]
pub struct PacketBuilder {
    data: Vec<u8>,
}

impl PacketBuilder {
    pub fn new(model: SensorModel) -> Self {
        let mut data = vec![0u8; PACKET_SIZE];
        for block in 0..BLOCKS_PER_PACKET {
            data[block * BLOCK_SIZE] = 0xFF;
            data[block * BLOCK_SIZE + 1] = 0xEE;
        }
        data[1204] = 0x37;
        data[1205] = model.format().product_id;
        Self { data }
    }

    /// Set a block's azimuth and its 32 channel records.
    ///
    /// `channel` maps a channel index to `(distance, reflectivity)`.
    pub fn set_block(
        &mut self,
        block: usize,
        azimuth: u16,
        mut channel: impl FnMut(usize) -> (u16, u8),
    ) -> &mut Self {
        let start = block * BLOCK_SIZE;
        self.data[start + 2..start + 4].copy_from_slice(&azimuth.to_le_bytes());
        for index in 0..CHANNELS_PER_BLOCK {
            let (distance, reflectivity) = channel(index);
            let offset = start + 4 + index * 3;
            self.data[offset..offset + 2].copy_from_slice(&distance.to_le_bytes());
            self.data[offset + 2] = reflectivity;
        }
        self
    }

    /// Set the raw return mode byte.
    pub fn return_mode(mut self, mode: u8) -> Self {
        self.data[1204] = mode;
        self
    }

    /// Set the trailer timestamp (microseconds past the hour).
    pub fn timestamp(mut self, micros: u32) -> Self {
        self.data[1200..1204].copy_from_slice(&micros.to_le_bytes());
        self
    }

    pub fn build(&self) -> Vec<u8> {
        self.data.clone()
    }
}

/// A spinning sensor in a cylindrical room.
///
/// Every laser sees the wall at `radius` meters (plus a small per-laser
/// step), so each revolution yields a full ring of returns. Packet
/// timestamps advance by the exact packet duration of the model.
pub struct SimulatedSensor {
    format: &'static PacketFormat,
    /// Azimuth advance per data block, hundredths of a degree
    step: f64,
    azimuth: f64,
    radius: f32,
    timestamp: u64,
    remaining: Option<u64>,
    realtime: Option<Instant>,
    emitted: u64,
}

impl SimulatedSensor {
    /// Sensor spinning at `rpm` revolutions per minute.
    pub fn new(model: SensorModel, rpm: f64) -> Self {
        let format = model.format();
        let units_per_us = rpm * AZIMUTH_UNITS as f64 / 60e6;
        Self {
            format,
            step: units_per_us * format.block_us() as f64,
            azimuth: 0.0,
            radius: 10.0,
            timestamp: 0,
            remaining: None,
            realtime: None,
            emitted: 0,
        }
    }

    /// Azimuth of the first block, hundredths of a degree.
    pub fn with_start_azimuth(mut self, azimuth: u16) -> Self {
        self.azimuth = (azimuth % AZIMUTH_UNITS) as f64;
        self
    }

    /// Wall distance in meters.
    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }

    /// Stop after the packets covering `revolutions` turns.
    pub fn with_revolutions(mut self, revolutions: f64) -> Self {
        let packets = (revolutions * self.packets_per_revolution()).ceil() as u64;
        self.remaining = Some(packets);
        self
    }

    /// Stop after `packets` packets.
    pub fn with_packet_limit(mut self, packets: u64) -> Self {
        self.remaining = Some(packets);
        self
    }

    /// Deliver packets at the rate the real sensor would.
    pub fn with_realtime(mut self) -> Self {
        self.realtime = Some(Instant::now());
        self
    }

    pub fn packets_per_revolution(&self) -> f64 {
        AZIMUTH_UNITS as f64 / (self.step * BLOCKS_PER_PACKET as f64)
    }

    /// Packet duration in nanoseconds.
    pub fn packet_ns(&self) -> u64 {
        (self.format.block_us() as f64 * BLOCKS_PER_PACKET as f64 * 1_000.0) as u64
    }

    /// Build the next packet of the stream.
    pub fn next_raw(&mut self) -> RawPacket {
        let mut builder = PacketBuilder::new(self.format.model)
            .timestamp(((self.timestamp / 1_000) % 3_600_000_000) as u32);
        let lasers = self.format.lasers;
        let resolution = self.format.distance_resolution;

        for block in 0..BLOCKS_PER_PACKET {
            let azimuth = (self.azimuth.round() as u32 % AZIMUTH_UNITS as u32) as u16;
            builder.set_block(block, azimuth, |channel| {
                let laser = channel % lasers;
                let meters = self.radius + laser as f32 * 0.05;
                ((meters / resolution).round() as u16, (laser * 4) as u8)
            });
            self.azimuth = (self.azimuth + self.step) % AZIMUTH_UNITS as f64;
        }

        let packet = RawPacket::new(builder.build(), self.timestamp);
        self.timestamp += self.packet_ns();
        self.emitted += 1;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
        packet
    }
}

impl PacketSource for SimulatedSensor {
    fn next_packet<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<RawPacket>, Error>> + Send + 'a>> {
        Box::pin(async move {
            if !self.has_more() {
                return Ok(None);
            }
            if let Some(start) = self.realtime {
                let due = start + Duration::from_nanos(self.emitted * self.packet_ns());
                tokio::time::sleep_until(due).await;
            }
            Ok(Some(self.next_raw()))
        })
    }

    fn has_more(&self) -> bool {
        self.remaining != Some(0)
    }
}
