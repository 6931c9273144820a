// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Velodyne data packet decoder.
//!
//! Supports the HDL-32E, VLP-16 and VLP-32C, which share the same 1206 byte
//! data packet and differ only in how the 32 channel records of a block map
//! onto lasers and firing times.
//!
//! # Packet Structure
//!
//! Data packet (UDP payload) - 1206 bytes, port 2368, little-endian
//! - Data: 12 blocks × 100 bytes = 1200 bytes
//!   - Flag: 2 bytes (`0xFF 0xEE`)
//!   - Azimuth: 2 bytes, hundredths of a degree
//!   - Channels: 32 × (distance u16 + reflectivity u8)
//! - Timestamp: 4 bytes, microseconds past the hour
//! - Return mode: 1 byte (`0x37` strongest, `0x38` last, `0x39` dual)
//! - Product ID: 1 byte (`0x21` HDL-32E, `0x22` VLP-16, `0x28` VLP-32C)
//!
//! # Azimuth interpolation
//!
//! Only the first firing of each block carries an azimuth. Every return is
//! given the azimuth the head had at its firing time by interpolating across
//! the gap from the previous block. The previous azimuth of the first block
//! comes from the preceding packet through an explicit
//! [`InterpolationContext`], so decoding stays a pure function of its inputs.

use crate::lidar::{AZIMUTH_UNITS, LaserReturn, RawPacket, SensorModel};
use tracing::trace;

/// Data packet size in bytes (UDP payload)
pub const PACKET_SIZE: usize = 1206;

/// Number of data blocks per packet
pub const BLOCKS_PER_PACKET: usize = 12;

/// Size of each data block in bytes
pub const BLOCK_SIZE: usize = 100;

/// Channel records per data block
pub const CHANNELS_PER_BLOCK: usize = 32;

/// Upper bound on returns decoded from one packet
pub const MAX_RETURNS_PER_PACKET: usize = BLOCKS_PER_PACKET * CHANNELS_PER_BLOCK;

/// Default UDP port for data packets
pub const DATA_PORT: u16 = 2368;

/// Block flag bytes `0xFF 0xEE` read little-endian
const BLOCK_FLAG: u16 = 0xEEFF;

/// Size of one channel record (distance + reflectivity)
const CHANNEL_SIZE: usize = 3;

/// Offset of the block azimuth within a block
const AZIMUTH_OFFSET: usize = 2;

/// Offset of the first channel record within a block
const CHANNELS_OFFSET: usize = 4;

const TIMESTAMP_OFFSET: usize = 1200;
const RETURN_MODE_OFFSET: usize = 1204;
const PRODUCT_ID_OFFSET: usize = 1205;

/// Largest plausible azimuth advance between consecutive firing groups, in
/// hundredths of a degree. Larger gaps mean packets were lost in between.
pub const MAX_BLOCK_GAP: u32 = 200;

/// Largest accepted ratio, as `(numerator, denominator)`, between the gap
/// from the previous packet and the gap to the next group of the same packet.
/// A larger carried-over gap spans at least one lost packet.
pub const MAX_GAP_RATIO: (u32, u32) = (3, 2);

/// Errors raised while decoding a single packet.
///
/// All variants are recoverable: the packet is dropped as a whole and
/// decoding continues with the next one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Packet is not exactly [`PACKET_SIZE`] bytes
    #[error("malformed packet length: {len} bytes, expected {expected}")]
    MalformedLength { len: usize, expected: usize },
    /// Block does not start with the `0xFFEE` flag
    #[error("invalid flag {flag:#06x} in block {block}")]
    InvalidBlockFlag { block: usize, flag: u16 },
    /// Block azimuth outside `[0, 36000)`
    #[error("invalid azimuth {azimuth} in block {block}")]
    InvalidAzimuth { block: usize, azimuth: u16 },
    /// Return mode byte not recognised
    #[error("unknown return mode {0:#04x}")]
    UnknownReturnMode(u8),
    /// Packet comes from a different sensor model than configured
    #[error("product id {found:#04x} does not match expected {expected:#04x}")]
    ProductMismatch { expected: u8, found: u8 },
}

/// Return mode reported in the packet trailer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReturnMode {
    /// Strongest return only
    #[default]
    Strongest,
    /// Last return only
    Last,
    /// Strongest and last returns in consecutive block pairs
    Dual,
}

impl ReturnMode {
    pub fn from_byte(value: u8) -> Result<Self, DecodeError> {
        match value {
            // Early HDL-32E firmware leaves the byte blank
            0x00 | 0x37 => Ok(ReturnMode::Strongest),
            0x38 => Ok(ReturnMode::Last),
            0x39 => Ok(ReturnMode::Dual),
            other => Err(DecodeError::UnknownReturnMode(other)),
        }
    }

    /// Number of consecutive blocks that share one azimuth.
    #[inline]
    fn blocks_per_group(self) -> usize {
        match self {
            ReturnMode::Dual => 2,
            _ => 1,
        }
    }
}

/// Packet layout descriptor for one sensor model.
///
/// Resolved once from the [`SensorModel`] at startup; the decoder never
/// branches on the model per packet.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PacketFormat {
    pub model: SensorModel,
    /// Product ID byte reported by the sensor
    pub product_id: u8,
    /// Number of physical lasers
    pub lasers: usize,
    /// Firing sequences packed into one data block
    pub firings_per_block: usize,
    /// Lasers fired simultaneously in one slot
    pub lasers_per_slot: usize,
    /// Time between consecutive firing slots, microseconds
    pub slot_interval_us: f32,
    /// Duration of one full firing sequence, microseconds
    pub sequence_us: f32,
    /// Meters per distance unit
    pub distance_resolution: f32,
}

const VLP16_FORMAT: PacketFormat = PacketFormat {
    model: SensorModel::Vlp16,
    product_id: 0x22,
    lasers: 16,
    firings_per_block: 2,
    lasers_per_slot: 1,
    slot_interval_us: 2.304,
    sequence_us: 55.296,
    distance_resolution: 0.002,
};

const HDL32_FORMAT: PacketFormat = PacketFormat {
    model: SensorModel::Hdl32,
    product_id: 0x21,
    lasers: 32,
    firings_per_block: 1,
    lasers_per_slot: 1,
    slot_interval_us: 1.152,
    sequence_us: 46.08,
    distance_resolution: 0.002,
};

const VLP32C_FORMAT: PacketFormat = PacketFormat {
    model: SensorModel::Vlp32c,
    product_id: 0x28,
    lasers: 32,
    firings_per_block: 1,
    lasers_per_slot: 2,
    slot_interval_us: 2.304,
    sequence_us: 55.296,
    distance_resolution: 0.004,
};

impl PacketFormat {
    /// Duration covered by one data block in microseconds.
    #[inline]
    pub fn block_us(&self) -> f32 {
        self.sequence_us * self.firings_per_block as f32
    }

    /// Firing time of a channel relative to the start of its block.
    #[inline]
    fn channel_offset_us(&self, channel: usize) -> f32 {
        let sequence = channel / self.lasers;
        let slot = (channel % self.lasers) / self.lasers_per_slot;
        sequence as f32 * self.sequence_us + slot as f32 * self.slot_interval_us
    }
}

impl SensorModel {
    /// Packet layout for this model.
    pub fn format(self) -> &'static PacketFormat {
        match self {
            SensorModel::Vlp16 => &VLP16_FORMAT,
            SensorModel::Hdl32 => &HDL32_FORMAT,
            SensorModel::Vlp32c => &VLP32C_FORMAT,
        }
    }

    /// Model for a product ID byte, if supported.
    pub fn from_product_id(product_id: u8) -> Option<Self> {
        match product_id {
            0x21 => Some(SensorModel::Hdl32),
            0x22 => Some(SensorModel::Vlp16),
            0x28 => Some(SensorModel::Vlp32c),
            _ => None,
        }
    }

    /// Detect the sensor model from a data packet's product ID.
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.len() != PACKET_SIZE {
            return None;
        }
        Self::from_product_id(data[PRODUCT_ID_OFFSET])
    }
}

/// Packet trailer fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketTrailer {
    /// Sensor clock, microseconds past the top of the hour
    pub timestamp_us: u32,
    pub return_mode: ReturnMode,
    pub product_id: u8,
}

impl PacketTrailer {
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() != PACKET_SIZE {
            return Err(DecodeError::MalformedLength {
                len: data.len(),
                expected: PACKET_SIZE,
            });
        }

        let timestamp_us = u32::from_le_bytes([
            data[TIMESTAMP_OFFSET],
            data[TIMESTAMP_OFFSET + 1],
            data[TIMESTAMP_OFFSET + 2],
            data[TIMESTAMP_OFFSET + 3],
        ]);

        Ok(PacketTrailer {
            timestamp_us,
            return_mode: ReturnMode::from_byte(data[RETURN_MODE_OFFSET])?,
            product_id: data[PRODUCT_ID_OFFSET],
        })
    }
}

/// Azimuth continuity carried from one packet to the next.
///
/// Holds the azimuth of the last firing group of the previously decoded
/// packet. A fresh context (no previous packet) makes the decoder estimate
/// the first gap from within the packet instead.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InterpolationContext {
    last_azimuth: Option<u16>,
}

impl InterpolationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_last_azimuth(azimuth: u16) -> Self {
        Self {
            last_azimuth: Some(azimuth % AZIMUTH_UNITS),
        }
    }

    #[inline]
    pub fn last_azimuth(&self) -> Option<u16> {
        self.last_azimuth
    }
}

/// Output of [`Decoder::decode`].
#[derive(Clone, Debug)]
pub struct DecodedPacket {
    pub returns: Vec<LaserReturn>,
    pub trailer: PacketTrailer,
    /// Context to pass when decoding the next packet
    pub context: InterpolationContext,
}

/// Stateless Velodyne packet decoder for one sensor model.
#[derive(Clone, Copy, Debug)]
pub struct Decoder {
    format: &'static PacketFormat,
}

impl Decoder {
    pub fn new(model: SensorModel) -> Self {
        Self {
            format: model.format(),
        }
    }

    #[inline]
    pub fn format(&self) -> &'static PacketFormat {
        self.format
    }

    #[inline]
    pub fn model(&self) -> SensorModel {
        self.format.model
    }

    /// Decode one packet into a freshly allocated vector of returns.
    pub fn decode(
        &self,
        packet: &RawPacket,
        context: InterpolationContext,
    ) -> Result<DecodedPacket, DecodeError> {
        let mut returns = Vec::with_capacity(MAX_RETURNS_PER_PACKET);
        let (trailer, context) = self.decode_into(packet.data(), context, &mut returns)?;
        Ok(DecodedPacket {
            returns,
            trailer,
            context,
        })
    }

    /// Decode one packet, appending returns to `out`.
    ///
    /// The whole packet is validated before anything is appended, so on error
    /// `out` is left untouched. Returns the trailer and the context for the
    /// next packet.
    pub fn decode_into(
        &self,
        data: &[u8],
        context: InterpolationContext,
        out: &mut Vec<LaserReturn>,
    ) -> Result<(PacketTrailer, InterpolationContext), DecodeError> {
        let trailer = PacketTrailer::parse(data)?;
        if trailer.product_id != 0 && trailer.product_id != self.format.product_id {
            return Err(DecodeError::ProductMismatch {
                expected: self.format.product_id,
                found: trailer.product_id,
            });
        }

        let mut azimuths = [0u16; BLOCKS_PER_PACKET];
        for (block, azimuth) in azimuths.iter_mut().enumerate() {
            let start = block * BLOCK_SIZE;
            let flag = u16::from_le_bytes([data[start], data[start + 1]]);
            if flag != BLOCK_FLAG {
                return Err(DecodeError::InvalidBlockFlag { block, flag });
            }

            let value = u16::from_le_bytes([
                data[start + AZIMUTH_OFFSET],
                data[start + AZIMUTH_OFFSET + 1],
            ]);
            if value >= AZIMUTH_UNITS {
                return Err(DecodeError::InvalidAzimuth {
                    block,
                    azimuth: value,
                });
            }
            *azimuth = value;
        }

        let group_size = trailer.return_mode.blocks_per_group();
        let groups = BLOCKS_PER_PACKET / group_size;
        let mut group_azimuths = [0u16; BLOCKS_PER_PACKET];
        for (group, azimuth) in group_azimuths.iter_mut().take(groups).enumerate() {
            *azimuth = azimuths[group * group_size];
        }
        let group_azimuths = &group_azimuths[..groups];
        let block_us = self.format.block_us();

        for group in 0..groups {
            let base = group_azimuths[group];
            let gap = group_gap(group_azimuths, group, context);
            let group_start_us = group as f32 * block_us;

            for member in 0..group_size {
                let block = group * group_size + member;
                let start = block * BLOCK_SIZE + CHANNELS_OFFSET;
                let records = &data[start..start + CHANNELS_PER_BLOCK * CHANNEL_SIZE];
                // In dual mode the second block repeats the first return when
                // strongest and last coincide
                let first = (member == 1).then(|| {
                    let prev = start - BLOCK_SIZE;
                    &data[prev..prev + CHANNELS_PER_BLOCK * CHANNEL_SIZE]
                });

                for channel in 0..CHANNELS_PER_BLOCK {
                    let record = &records[channel * CHANNEL_SIZE..(channel + 1) * CHANNEL_SIZE];
                    let distance = u16::from_le_bytes([record[0], record[1]]);
                    if distance == 0 {
                        continue;
                    }
                    if let Some(first) = first
                        && &first[channel * CHANNEL_SIZE..(channel + 1) * CHANNEL_SIZE] == record
                    {
                        continue;
                    }

                    let offset_us = self.format.channel_offset_us(channel);
                    out.push(LaserReturn {
                        laser_id: (channel % self.format.lasers) as u8,
                        azimuth: interpolate(base, gap, offset_us / block_us),
                        distance,
                        reflectivity: record[2],
                        time_offset_us: group_start_us + offset_us,
                    });
                }
            }
        }

        let context = InterpolationContext::with_last_azimuth(group_azimuths[groups - 1]);
        trace!(
            first_azimuth = group_azimuths[0],
            last_azimuth = group_azimuths[groups - 1],
            "decoded packet"
        );

        Ok((trailer, context))
    }
}

/// Forward azimuth advance from `from` to `to`, accounting for wraparound.
#[inline]
pub fn azimuth_gap(from: u16, to: u16) -> u32 {
    let (from, to) = (from as u32, to as u32);
    if to < from {
        to + AZIMUTH_UNITS as u32 - from
    } else {
        to - from
    }
}

/// Azimuth advance covered by one firing group.
///
/// Uses the gap from the previous group (or previous packet), falling back
/// to the gap to the next group when the previous one is unknown or spans
/// lost packets. A gap carried over from the previous packet must also stay
/// within [`MAX_GAP_RATIO`] of the gap to the next group.
fn group_gap(azimuths: &[u16], group: usize, context: InterpolationContext) -> u32 {
    let forward = azimuths
        .get(group + 1)
        .map(|next| azimuth_gap(azimuths[group], *next))
        .filter(|gap| *gap <= MAX_BLOCK_GAP);

    let backward = if group > 0 {
        Some(azimuth_gap(azimuths[group - 1], azimuths[group]))
    } else {
        context
            .last_azimuth()
            .map(|last| azimuth_gap(last, azimuths[0]))
            .filter(|gap| {
                forward.is_none_or(|forward| *gap * MAX_GAP_RATIO.1 <= forward * MAX_GAP_RATIO.0)
            })
    };

    backward
        .filter(|gap| *gap <= MAX_BLOCK_GAP)
        .or(forward)
        .unwrap_or(0)
}

/// Azimuth at `fraction` of a group's gap past its base, wrapped into
/// `[0, 36000)`.
#[inline]
fn interpolate(base: u16, gap: u32, fraction: f32) -> u16 {
    let advance = (gap as f32 * fraction).round() as u32;
    ((base as u32 + advance) % AZIMUTH_UNITS as u32) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{PacketBuilder, SimulatedSensor};

    fn hdl32_packet(azimuths: [u16; BLOCKS_PER_PACKET]) -> Vec<u8> {
        let mut builder = PacketBuilder::new(SensorModel::Hdl32);
        for (block, azimuth) in azimuths.iter().enumerate() {
            builder.set_block(block, *azimuth, |_| (500, 10));
        }
        builder.build()
    }

    fn ramp(start: u16, step: u16) -> [u16; BLOCKS_PER_PACKET] {
        let mut azimuths = [0u16; BLOCKS_PER_PACKET];
        for (i, azimuth) in azimuths.iter_mut().enumerate() {
            *azimuth = ((start as u32 + i as u32 * step as u32) % AZIMUTH_UNITS as u32) as u16;
        }
        azimuths
    }

    #[test]
    fn test_malformed_length() {
        let decoder = Decoder::new(SensorModel::Hdl32);
        let mut out = Vec::new();
        let result = decoder.decode_into(&[0u8; 1000], InterpolationContext::new(), &mut out);
        assert_eq!(
            result.unwrap_err(),
            DecodeError::MalformedLength {
                len: 1000,
                expected: PACKET_SIZE
            }
        );
        assert!(out.is_empty());

        let mut long = hdl32_packet(ramp(0, 20));
        long.push(0);
        let result = decoder.decode_into(&long, InterpolationContext::new(), &mut out);
        assert!(matches!(result, Err(DecodeError::MalformedLength { .. })));
    }

    #[test]
    fn test_invalid_block_flag_leaves_output_untouched() {
        let decoder = Decoder::new(SensorModel::Hdl32);
        let mut packet = hdl32_packet(ramp(1000, 20));
        packet[7 * BLOCK_SIZE] = 0x00;

        let mut out = vec![LaserReturn {
            laser_id: 0,
            azimuth: 0,
            distance: 1,
            reflectivity: 0,
            time_offset_us: 0.0,
        }];
        let result = decoder.decode_into(&packet, InterpolationContext::new(), &mut out);
        assert!(matches!(
            result,
            Err(DecodeError::InvalidBlockFlag { block: 7, .. })
        ));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_invalid_azimuth() {
        let decoder = Decoder::new(SensorModel::Hdl32);
        let mut packet = hdl32_packet(ramp(1000, 20));
        packet[3 * BLOCK_SIZE + 2..3 * BLOCK_SIZE + 4].copy_from_slice(&36_500u16.to_le_bytes());
        let result = decoder.decode(&RawPacket::new(packet, 0), InterpolationContext::new());
        assert!(matches!(
            result,
            Err(DecodeError::InvalidAzimuth {
                block: 3,
                azimuth: 36_500
            })
        ));
    }

    #[test]
    fn test_product_mismatch() {
        let decoder = Decoder::new(SensorModel::Vlp16);
        let packet = hdl32_packet(ramp(0, 20));
        let result = decoder.decode(&RawPacket::new(packet, 0), InterpolationContext::new());
        assert_eq!(
            result.unwrap_err(),
            DecodeError::ProductMismatch {
                expected: 0x22,
                found: 0x21
            }
        );
    }

    #[test]
    fn test_unknown_return_mode() {
        let decoder = Decoder::new(SensorModel::Hdl32);
        let mut packet = hdl32_packet(ramp(0, 20));
        packet[RETURN_MODE_OFFSET] = 0x42;
        let result = decoder.decode(&RawPacket::new(packet, 0), InterpolationContext::new());
        assert_eq!(result.unwrap_err(), DecodeError::UnknownReturnMode(0x42));
    }

    #[test]
    fn test_zero_distance_filtered() {
        let decoder = Decoder::new(SensorModel::Hdl32);
        let mut builder = PacketBuilder::new(SensorModel::Hdl32);
        for block in 0..BLOCKS_PER_PACKET {
            builder.set_block(block, (block * 20) as u16, |channel| {
                if channel % 2 == 0 { (0, 0) } else { (1000, 50) }
            });
        }
        let decoded = decoder
            .decode(&RawPacket::new(builder.build(), 0), InterpolationContext::new())
            .unwrap();
        assert_eq!(decoded.returns.len(), BLOCKS_PER_PACKET * 16);
        assert!(decoded.returns.iter().all(|r| r.distance == 1000));
        assert!(decoded.returns.iter().all(|r| r.laser_id % 2 == 1));
    }

    #[test]
    fn test_full_packet_return_count() {
        let decoder = Decoder::new(SensorModel::Hdl32);
        let decoded = decoder
            .decode(
                &RawPacket::new(hdl32_packet(ramp(0, 20)), 0),
                InterpolationContext::new(),
            )
            .unwrap();
        assert_eq!(decoded.returns.len(), MAX_RETURNS_PER_PACKET);
        assert_eq!(decoded.trailer.product_id, 0x21);
        assert_eq!(decoded.context.last_azimuth(), Some(220));
    }

    #[test]
    fn test_hdl32_interpolation_uses_previous_packet() {
        let decoder = Decoder::new(SensorModel::Hdl32);
        let packet = RawPacket::new(hdl32_packet(ramp(1000, 40)), 0);
        let decoded = decoder
            .decode(&packet, InterpolationContext::with_last_azimuth(960))
            .unwrap();

        // Block 0: gap 40 from previous packet, laser 16 fires 18.432 of 46.08 us in
        let laser16 = decoded.returns[16];
        assert_eq!(laser16.laser_id, 16);
        assert_eq!(laser16.azimuth, 1000 + 16);
        assert!((laser16.time_offset_us - 16.0 * 1.152).abs() < 1e-4);

        // First laser of each block carries the block azimuth
        assert_eq!(decoded.returns[0].azimuth, 1000);
        assert_eq!(decoded.returns[32].azimuth, 1040);
        assert!((decoded.returns[32].time_offset_us - 46.08).abs() < 1e-4);
    }

    #[test]
    fn test_first_packet_uses_forward_gap() {
        let decoder = Decoder::new(SensorModel::Hdl32);
        let packet = RawPacket::new(hdl32_packet(ramp(1000, 40)), 0);
        let decoded = decoder.decode(&packet, InterpolationContext::new()).unwrap();
        assert_eq!(decoded.returns[16].azimuth, 1016);
    }

    #[test]
    fn test_lost_packet_gap_falls_back() {
        let decoder = Decoder::new(SensorModel::Hdl32);
        let packet = RawPacket::new(hdl32_packet(ramp(5000, 40)), 0);
        // Previous packet is far behind: use the in-packet gap instead
        let decoded = decoder
            .decode(&packet, InterpolationContext::with_last_azimuth(1000))
            .unwrap();
        assert_eq!(decoded.returns[16].azimuth, 5016);
    }

    /// Every return of block 0 lies between its base and block 1's base.
    fn assert_first_block_contained(returns: &[LaserReturn]) {
        let base = returns[0].azimuth;
        let next = returns[CHANNELS_PER_BLOCK].azimuth;
        for ret in &returns[..CHANNELS_PER_BLOCK] {
            assert!(
                ret.azimuth >= base && ret.azimuth < next,
                "laser {} at {} outside {}..{}",
                ret.laser_id,
                ret.azimuth,
                base,
                next
            );
        }
    }

    #[test]
    fn test_lost_packet_at_slow_rotation() {
        for model in [SensorModel::Hdl32, SensorModel::Vlp16, SensorModel::Vlp32c] {
            for rpm in [300.0, 600.0] {
                let decoder = Decoder::new(model);
                let mut sensor = SimulatedSensor::new(model, rpm).with_start_azimuth(1000);
                let first = decoder
                    .decode(&sensor.next_raw(), InterpolationContext::new())
                    .unwrap();
                let second = sensor.next_raw();
                let third = sensor.next_raw();

                // Second packet lost: block 0 must not stretch across the hole
                let after_loss = decoder.decode(&third, first.context).unwrap();
                assert_first_block_contained(&after_loss.returns);

                let in_order = decoder.decode(&second, first.context).unwrap();
                assert_first_block_contained(&in_order.returns);
                let following = decoder.decode(&third, in_order.context).unwrap();
                assert_first_block_contained(&following.returns);
            }
        }
    }

    #[test]
    fn test_interpolation_wraps_mid_block() {
        let decoder = Decoder::new(SensorModel::Hdl32);
        let packet = RawPacket::new(hdl32_packet(ramp(35_980, 40)), 0);
        let decoded = decoder
            .decode(&packet, InterpolationContext::with_last_azimuth(35_940))
            .unwrap();

        assert!(decoded.returns.iter().all(|r| r.azimuth < AZIMUTH_UNITS));
        // Block 0 spans 35980..36020, so its second half lands past zero
        let last_of_block0 = decoded.returns[31];
        assert!(last_of_block0.azimuth < 100, "{}", last_of_block0.azimuth);
        // Block 1 starts at 20
        assert_eq!(decoded.returns[32].azimuth, 20);
    }

    #[test]
    fn test_azimuth_always_in_range() {
        let decoder = Decoder::new(SensorModel::Hdl32);
        for start in (35_000..36_000).step_by(7) {
            for step in [0u16, 1, 17, 40, 199] {
                let packet = RawPacket::new(hdl32_packet(ramp(start, step)), 0);
                for context in [
                    InterpolationContext::new(),
                    InterpolationContext::with_last_azimuth(35_999),
                    InterpolationContext::with_last_azimuth(start.saturating_sub(step)),
                ] {
                    let decoded = decoder.decode(&packet, context).unwrap();
                    assert!(decoded.returns.len() <= MAX_RETURNS_PER_PACKET);
                    assert!(decoded.returns.iter().all(|r| r.azimuth < AZIMUTH_UNITS));
                }
            }
        }
    }

    #[test]
    fn test_arbitrary_bytes_never_panic() {
        let decoder = Decoder::new(SensorModel::Vlp16);
        let mut seed = 0x1234_5678u32;
        let mut packet = vec![0u8; PACKET_SIZE];
        for _ in 0..200 {
            for byte in packet.iter_mut() {
                seed ^= seed << 13;
                seed ^= seed >> 17;
                seed ^= seed << 5;
                *byte = seed as u8;
            }
            // Make every other packet structurally valid
            if seed % 2 == 0 {
                for block in 0..BLOCKS_PER_PACKET {
                    packet[block * BLOCK_SIZE] = 0xFF;
                    packet[block * BLOCK_SIZE + 1] = 0xEE;
                    let azimuth = (packet[block * BLOCK_SIZE + 2] as u16) * 100;
                    packet[block * BLOCK_SIZE + 2..block * BLOCK_SIZE + 4]
                        .copy_from_slice(&azimuth.to_le_bytes());
                }
                packet[RETURN_MODE_OFFSET] = 0x37;
                packet[PRODUCT_ID_OFFSET] = 0x22;
            }
            let mut out = Vec::new();
            if decoder
                .decode_into(&packet, InterpolationContext::new(), &mut out)
                .is_ok()
            {
                assert!(out.len() <= MAX_RETURNS_PER_PACKET);
                assert!(out.iter().all(|r| r.azimuth < AZIMUTH_UNITS));
            }
        }
    }

    #[test]
    fn test_vlp16_two_firings_per_block() {
        let decoder = Decoder::new(SensorModel::Vlp16);
        let mut builder = PacketBuilder::new(SensorModel::Vlp16);
        for block in 0..BLOCKS_PER_PACKET {
            builder.set_block(block, 2000 + block as u16 * 40, |_| (750, 20));
        }
        let decoded = decoder
            .decode(
                &RawPacket::new(builder.build(), 0),
                InterpolationContext::with_last_azimuth(1960),
            )
            .unwrap();

        assert_eq!(decoded.returns.len(), MAX_RETURNS_PER_PACKET);
        // Channel 16 is laser 0 of the second firing sequence
        let second = decoded.returns[16];
        assert_eq!(second.laser_id, 0);
        assert!((second.time_offset_us - 55.296).abs() < 1e-4);
        assert_eq!(second.azimuth, 2020);
        assert!(decoded.returns.iter().all(|r| r.laser_id < 16));
    }

    #[test]
    fn test_vlp32c_fires_in_pairs() {
        let decoder = Decoder::new(SensorModel::Vlp32c);
        let mut builder = PacketBuilder::new(SensorModel::Vlp32c);
        for block in 0..BLOCKS_PER_PACKET {
            builder.set_block(block, 100 + block as u16 * 20, |_| (300, 5));
        }
        let decoded = decoder
            .decode(&RawPacket::new(builder.build(), 0), InterpolationContext::new())
            .unwrap();
        assert_eq!(
            decoded.returns[0].time_offset_us,
            decoded.returns[1].time_offset_us
        );
        assert!((decoded.returns[2].time_offset_us - 2.304).abs() < 1e-4);
    }

    #[test]
    fn test_dual_return_pairs() {
        let decoder = Decoder::new(SensorModel::Hdl32);
        let mut builder = PacketBuilder::new(SensorModel::Hdl32).return_mode(0x39);
        for pair in 0..BLOCKS_PER_PACKET / 2 {
            let azimuth = 3000 + pair as u16 * 40;
            builder.set_block(pair * 2, azimuth, |_| (1000, 30));
            // Last return differs only on even channels
            builder.set_block(pair * 2 + 1, azimuth, |channel| {
                if channel % 2 == 0 { (1500, 10) } else { (1000, 30) }
            });
        }
        let decoded = decoder
            .decode(&RawPacket::new(builder.build(), 0), InterpolationContext::new())
            .unwrap();

        assert_eq!(decoded.trailer.return_mode, ReturnMode::Dual);
        assert_eq!(decoded.returns.len(), 6 * (32 + 16));
        // Both returns of the pair share firing time and azimuth
        let strongest = decoded.returns[2];
        let last = decoded.returns[32 + 1];
        assert_eq!(strongest.laser_id, 2);
        assert_eq!(last.laser_id, 2);
        assert_eq!(last.distance, 1500);
        assert_eq!(strongest.azimuth, last.azimuth);
        assert_eq!(strongest.time_offset_us, last.time_offset_us);
        assert_eq!(decoded.context.last_azimuth(), Some(3200));
    }

    #[test]
    fn test_detect_model() {
        let packet = hdl32_packet(ramp(0, 20));
        assert_eq!(SensorModel::detect(&packet), Some(SensorModel::Hdl32));
        assert_eq!(SensorModel::detect(&packet[..100]), None);
        assert_eq!(
            SensorModel::detect(&PacketBuilder::new(SensorModel::Vlp32c).build()),
            Some(SensorModel::Vlp32c)
        );
    }

    #[test]
    fn test_azimuth_gap_wraps() {
        assert_eq!(azimuth_gap(100, 140), 40);
        assert_eq!(azimuth_gap(35_990, 10), 20);
        assert_eq!(azimuth_gap(500, 500), 0);
    }
}
