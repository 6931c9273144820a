// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Frame assembly.
//!
//! The [`FrameAccumulator`] projects decoded returns into calibrated
//! [`Point3D`]s and cuts the stream into frames at each azimuth wraparound.
//!
//! ```text
//!            push (no wrap)
//!               ┌───┐
//!               ▼   │
//! ┌───────┐  ┌──────────────┐  wrap   ┌────────────┐
//! │ Empty │─►│ Accumulating │────────►│ FrameReady │
//! └───────┘  └──────────────┘◄────────└────────────┘
//!                               take_frame
//! ```
//!
//! At most one frame is in flight and one is ready. A frame that closes
//! while the previous ready frame is still untaken replaces it.

use crate::{
    calibration::{CalibrationError, CalibrationTable, UnknownLaserPolicy},
    lidar::{AZIMUTH_UNITS, Frame, LaserReturn, Point3D},
    stats::PipelineStats,
};
use std::{mem, sync::Arc};
use tracing::{debug, trace};

/// Spare point buffers kept for reuse.
const MAX_SPARE_BUFFERS: usize = 2;

/// Frame accumulator tuning.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AccumulatorConfig {
    /// Frames with fewer points are discarded
    pub min_points: usize,
    /// Backward azimuth motion tolerated as jitter, hundredths of a degree
    pub backward_tolerance: u16,
    /// Points beyond this corrected distance are dropped, meters
    pub max_range: f32,
    pub unknown_laser: UnknownLaserPolicy,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            min_points: 1000,
            backward_tolerance: 100,
            max_range: 120.0,
            unknown_laser: UnknownLaserPolicy::Fail,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccumulatorState {
    /// No return seen since creation or the last `finish`
    Empty,
    /// Collecting returns into the current frame
    Accumulating,
    /// A completed frame waits for `take_frame`
    FrameReady,
}

/// Sine and cosine for every azimuth unit.
struct AzimuthTable {
    entries: Box<[(f32, f32)]>,
}

impl AzimuthTable {
    fn new() -> Self {
        let entries = (0..AZIMUTH_UNITS)
            .map(|azimuth| (azimuth as f32 / 100.0).to_radians().sin_cos())
            .collect();
        Self { entries }
    }

    #[inline]
    fn sin_cos(&self, azimuth: u16) -> (f32, f32) {
        self.entries[(azimuth % AZIMUTH_UNITS) as usize]
    }
}

/// Accumulates calibrated points into frames.
pub struct FrameAccumulator {
    calibration: Arc<CalibrationTable>,
    distance_resolution: f32,
    config: AccumulatorConfig,
    azimuths: AzimuthTable,
    stats: Option<Arc<PipelineStats>>,

    points: Vec<Point3D>,
    reference_azimuth: Option<u16>,
    last_timestamp: u64,
    ready: Option<Frame>,
    next_frame_id: u64,
    spare: Vec<Vec<Point3D>>,
    capacity_hint: usize,
}

impl FrameAccumulator {
    /// Create an accumulator using `calibration` and the packet format's
    /// distance resolution in meters per unit.
    pub fn new(
        calibration: Arc<CalibrationTable>,
        distance_resolution: f32,
        config: AccumulatorConfig,
    ) -> Self {
        Self {
            calibration,
            distance_resolution,
            config,
            azimuths: AzimuthTable::new(),
            stats: None,
            points: Vec::new(),
            reference_azimuth: None,
            last_timestamp: 0,
            ready: None,
            next_frame_id: 0,
            spare: Vec::with_capacity(MAX_SPARE_BUFFERS),
            capacity_hint: 0,
        }
    }

    pub fn with_stats(mut self, stats: Arc<PipelineStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn config(&self) -> &AccumulatorConfig {
        &self.config
    }

    pub fn state(&self) -> AccumulatorState {
        if self.ready.is_some() {
            AccumulatorState::FrameReady
        } else if self.reference_azimuth.is_some() {
            AccumulatorState::Accumulating
        } else {
            AccumulatorState::Empty
        }
    }

    /// Points collected so far in the in-flight frame.
    pub fn pending_points(&self) -> usize {
        self.points.len()
    }

    /// Add one decoded return.
    ///
    /// `packet_timestamp` is the arrival time of the packet the return came
    /// from, in nanoseconds. Returns `true` when a frame became ready.
    ///
    /// Fails only for a return from an uncalibrated laser under
    /// [`UnknownLaserPolicy::Fail`]; in that case nothing is changed.
    pub fn push(
        &mut self,
        ret: &LaserReturn,
        packet_timestamp: u64,
    ) -> Result<bool, CalibrationError> {
        if self.calibration.get(ret.laser_id).is_none()
            && self.config.unknown_laser == UnknownLaserPolicy::Fail
        {
            return Err(CalibrationError::MissingLaser {
                laser_id: ret.laser_id,
            });
        }

        let closed = self.wrapped(ret.azimuth) && self.close_frame();

        let laser = self.calibration.get(ret.laser_id);
        let Some(laser) = laser.filter(|laser| laser.entry().enabled) else {
            self.record(PipelineStats::record_return_skipped);
            return Ok(closed);
        };
        let entry = laser.entry();

        let distance = ret.distance as f32 * self.distance_resolution + entry.distance_correction;
        if distance <= 0.0 || distance > self.config.max_range {
            self.record(PipelineStats::record_out_of_range);
            return Ok(closed);
        }

        // Rotate by the per-laser correction: alpha = azimuth - rotation
        let (sin_az, cos_az) = self.azimuths.sin_cos(ret.azimuth);
        let sin_alpha = sin_az * laser.cos_rotation() - cos_az * laser.sin_rotation();
        let cos_alpha = cos_az * laser.cos_rotation() + sin_az * laser.sin_rotation();

        let horizontal = distance * laser.cos_vertical();
        let offset = entry.horizontal_offset;

        let timestamp =
            (packet_timestamp + (ret.time_offset_us * 1_000.0) as u64).max(self.last_timestamp);
        self.last_timestamp = timestamp;

        self.points.push(Point3D {
            x: horizontal * sin_alpha + offset * cos_alpha,
            y: horizontal * cos_alpha - offset * sin_alpha,
            z: distance * laser.sin_vertical() + entry.vertical_offset,
            intensity: ret.reflectivity,
            laser_id: ret.laser_id,
            azimuth: ret.azimuth,
            timestamp,
        });

        Ok(closed)
    }

    /// Take the ready frame, if any.
    pub fn take_frame(&mut self) -> Option<Frame> {
        self.ready.take()
    }

    /// Close the trailing partial frame at end of stream.
    ///
    /// The frame is subject to the minimum-size policy. Returns `true` when a
    /// frame became ready. The next push starts a fresh revolution.
    pub fn finish(&mut self) -> bool {
        let closed = self.reference_azimuth.is_some() && self.close_frame();
        self.reference_azimuth = None;
        closed
    }

    /// Return a consumed frame's point storage for reuse.
    pub fn recycle(&mut self, frame: Frame) {
        self.recycle_points(frame.into_points());
    }

    fn recycle_points(&mut self, mut points: Vec<Point3D>) {
        if self.spare.len() < MAX_SPARE_BUFFERS {
            points.clear();
            self.spare.push(points);
        }
    }

    /// Track the reference azimuth, reporting a wraparound.
    ///
    /// Backward motion within the tolerance (measured circularly) is jitter
    /// and leaves the reference untouched.
    fn wrapped(&mut self, azimuth: u16) -> bool {
        let Some(reference) = self.reference_azimuth else {
            self.reference_azimuth = Some(azimuth);
            return false;
        };

        let backward = (reference as i32 - azimuth as i32).rem_euclid(AZIMUTH_UNITS as i32) as u16;
        if backward <= self.config.backward_tolerance {
            return false;
        }

        self.reference_azimuth = Some(azimuth);
        azimuth < reference
    }

    /// Close the in-flight frame. Returns `true` if it became the ready frame.
    fn close_frame(&mut self) -> bool {
        let storage = self
            .spare
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.capacity_hint));
        let points = mem::replace(&mut self.points, storage);

        if points.is_empty() || points.len() < self.config.min_points {
            debug!(
                points = points.len(),
                min_points = self.config.min_points,
                "discarding undersized frame"
            );
            self.record(PipelineStats::record_frame_undersized);
            self.recycle_points(points);
            return false;
        }

        self.capacity_hint = self.capacity_hint.max(points.len());
        let start = points.first().map_or(0, |p| p.timestamp);
        let end = points.last().map_or(0, |p| p.timestamp);
        let frame = Frame::new(self.next_frame_id, start, end, points);
        self.next_frame_id += 1;

        trace!(
            frame_id = frame.frame_id(),
            points = frame.point_count(),
            "frame complete"
        );
        self.record(PipelineStats::record_frame_completed);

        if let Some(stale) = self.ready.replace(frame) {
            debug!(frame_id = stale.frame_id(), "replacing untaken frame");
            self.record(PipelineStats::record_frame_overwritten);
            self.recycle(stale);
        }

        true
    }

    #[inline]
    fn record(&self, counter: fn(&PipelineStats)) {
        if let Some(stats) = &self.stats {
            counter(stats);
        }
    }
}
