// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Common LiDAR types shared by the decoder, accumulator and hand-off.
//!
//! The types here follow the life of a measurement through the pipeline:
//! a [`RawPacket`] captured by a packet source is decoded into transient
//! [`LaserReturn`]s, which the accumulator projects into [`Point3D`]s and
//! gathers into an immutable [`Frame`].

use crate::{calibration::CalibrationError, velodyne::DecodeError};
use bytes::Bytes;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Azimuth units per revolution (hundredths of a degree).
pub const AZIMUTH_UNITS: u16 = 36_000;

/// Crate-level error type.
///
/// Per-packet [`DecodeError`]s are normally handled inside the pipeline and
/// only counted; they appear here when a caller decodes packets directly.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error (socket, file operations)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Packet could not be decoded
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    /// Calibration is missing or invalid
    #[error("calibration error: {0}")]
    Calibration(#[from] CalibrationError),
    /// Capture file could not be parsed
    #[error("invalid capture: {0}")]
    InvalidCapture(String),
    /// System time error
    #[error("system time error: {0}")]
    SystemTime(#[from] std::time::SystemTimeError),
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
    /// Visualizer failed to render a frame
    #[error("viewer error: {0}")]
    Viewer(String),
    /// A pipeline thread panicked
    #[error("{0} thread panicked")]
    ThreadPanic(&'static str),
}

/// Supported Velodyne sensor models.
///
/// The model is resolved once at startup and selects the packet layout used
/// by the decoder for the rest of the session.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SensorModel {
    /// VLP-16 (Puck), two 16-laser firing sequences per block
    Vlp16,
    /// HDL-32E, one 32-laser firing sequence per block
    #[default]
    Hdl32,
    /// VLP-32C, 32 lasers fired in pairs
    Vlp32c,
}

impl fmt::Display for SensorModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SensorModel::Vlp16 => write!(f, "VLP-16"),
            SensorModel::Hdl32 => write!(f, "HDL-32E"),
            SensorModel::Vlp32c => write!(f, "VLP-32C"),
        }
    }
}

/// One packet as captured by a packet source.
///
/// The payload is immutable once captured. `timestamp` is the arrival (or
/// capture) time in nanoseconds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawPacket {
    data: Bytes,
    timestamp: u64,
}

impl RawPacket {
    pub fn new(data: impl Into<Bytes>, timestamp: u64) -> Self {
        Self {
            data: data.into(),
            timestamp,
        }
    }

    /// Packet payload bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Arrival timestamp in nanoseconds.
    #[inline]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A single decoded laser return.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LaserReturn {
    /// Physical laser index within the sensor
    pub laser_id: u8,
    /// Interpolated azimuth in hundredths of a degree, `[0, 36000)`
    pub azimuth: u16,
    /// Raw distance in sensor distance units (never zero)
    pub distance: u16,
    /// Calibrated reflectivity
    pub reflectivity: u8,
    /// Firing time relative to the start of the packet, in microseconds
    pub time_offset_us: f32,
}

/// A calibrated point in the sensor frame.
///
/// Axes follow the Velodyne convention: `y` points forward (azimuth 0),
/// `x` to the right and `z` up. Coordinates are in meters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point3D {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub intensity: u8,
    pub laser_id: u8,
    pub azimuth: u16,
    /// Firing time in nanoseconds
    pub timestamp: u64,
}

impl Point3D {
    /// Euclidean distance from the sensor origin.
    #[inline]
    pub fn range(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// One assembled sensor revolution.
///
/// Frames are created by the [`crate::accumulator::FrameAccumulator`] and
/// handed off by value. The public API is read-only so a published frame
/// cannot be modified by its consumer.
#[derive(Clone, Debug)]
pub struct Frame {
    frame_id: u64,
    start_timestamp: u64,
    end_timestamp: u64,
    points: Vec<Point3D>,
}

impl Frame {
    pub(crate) fn new(
        frame_id: u64,
        start_timestamp: u64,
        end_timestamp: u64,
        points: Vec<Point3D>,
    ) -> Self {
        Self {
            frame_id,
            start_timestamp,
            end_timestamp,
            points,
        }
    }

    /// Sequence number, strictly increasing over delivered frames.
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// Timestamp of the first point in nanoseconds.
    #[inline]
    pub fn start_timestamp(&self) -> u64 {
        self.start_timestamp
    }

    /// Timestamp of the last point in nanoseconds.
    #[inline]
    pub fn end_timestamp(&self) -> u64 {
        self.end_timestamp
    }

    #[inline]
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points in firing order.
    #[inline]
    pub fn points(&self) -> &[Point3D] {
        &self.points
    }

    /// Release the point storage, e.g. to hand it back for reuse.
    pub fn into_points(self) -> Vec<Point3D> {
        self.points
    }
}

/// Get current timestamp in nanoseconds.
///
/// On Linux, uses `CLOCK_MONOTONIC_RAW` for best accuracy.
/// On other platforms, falls back to `SystemTime`.
#[cfg(target_os = "linux")]
pub fn timestamp() -> Result<u64, Error> {
    let mut tp = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let err = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut tp) };
    if err != 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    Ok(tp.tv_sec as u64 * 1_000_000_000 + tp.tv_nsec as u64)
}

#[cfg(not(target_os = "linux"))]
pub fn timestamp() -> Result<u64, Error> {
    let now = std::time::SystemTime::now();
    let duration = now.duration_since(std::time::UNIX_EPOCH)?;
    Ok(duration.as_nanos() as u64)
}
