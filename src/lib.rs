// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! EdgeFirst Velodyne Library
//!
//! Decoding, calibration and frame assembly for Velodyne HDL-32E, VLP-16 and
//! VLP-32C sensors.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌───────────┐     ┌──────────────────┐
//! │  PacketSource   │ ──► │  Decoder  │ ──► │ FrameAccumulator │
//! │ (UDP/pcap/sim)  │     │ (1206 B)  │     │ (calibrated xyz) │
//! └─────────────────┘     └───────────┘     └──────────────────┘
//!                                                    │ publish
//!                                                    ▼
//!                         ┌────────┐        ┌──────────────────┐
//!                         │ Viewer │ ◄───── │   FrameBuffer    │
//!                         └────────┘  take  │  (latest wins)   │
//!                                           └──────────────────┘
//! ```
//!
//! The decoder turns each data packet into per-laser returns with an
//! interpolated azimuth and firing time. The accumulator projects returns
//! through the [`calibration::CalibrationTable`] and closes a frame each time
//! the azimuth wraps. Completed frames are handed to the consumer through a
//! [`buffer::FrameBuffer`] which only keeps the newest one, so a slow viewer
//! never stalls ingestion.
//!
//! # Modules
//!
//! - [`velodyne`]: Packet layout, model formats and the decoder
//! - [`calibration`]: Per-laser angle and offset tables
//! - [`accumulator`]: Frame assembly from decoded returns
//! - [`buffer`]: Latest-wins frame hand-off
//! - [`pipeline`]: Ingest thread and consumer loop
//! - [`packet_source`]: Packet source abstraction for testing
//! - [`simulator`]: Synthetic packets for a spinning sensor
//!
//! # Example
//!
//! ```ignore
//! use edgefirst_velodyne::{
//!     velodyne::{Decoder, InterpolationContext},
//!     SensorModel,
//! };
//!
//! let decoder = Decoder::new(SensorModel::Vlp16);
//! let mut context = InterpolationContext::new();
//!
//! while let Some(packet) = source.next_packet().await? {
//!     let decoded = decoder.decode(&packet, context)?;
//!     context = decoded.context;
//!     for ret in &decoded.returns {
//!         // ret.laser_id, ret.azimuth, ret.distance
//!     }
//! }
//! ```

pub mod accumulator;
pub mod args;
pub mod buffer;
pub mod calibration;
pub mod lidar;
pub mod packet_source;
#[cfg(feature = "pcap")]
pub mod pcap_source;
pub mod pipeline;
pub mod simulator;
pub mod stats;
pub mod velodyne;
pub mod viewer;

// Re-exports for convenience
pub use accumulator::{AccumulatorConfig, FrameAccumulator};
pub use buffer::FrameBuffer;
pub use calibration::{CalibrationError, CalibrationTable};
pub use lidar::{Error, Frame, LaserReturn, Point3D, RawPacket, SensorModel};
pub use packet_source::PacketSource;
#[cfg(feature = "pcap")]
pub use pcap_source::PcapSource;
pub use velodyne::{DecodeError, Decoder};
