// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Pipeline drop and throughput counters.
//!
//! Counters are shared between the ingestion and consumer threads and are
//! mirrored to the `metrics` facade so an installed recorder can export them.

use metrics::counter;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared pipeline counters.
#[derive(Debug, Default)]
pub struct PipelineStats {
    packets_received: AtomicU64,
    packets_dropped: AtomicU64,
    returns_skipped: AtomicU64,
    points_out_of_range: AtomicU64,
    frames_completed: AtomicU64,
    frames_undersized: AtomicU64,
    frames_overwritten: AtomicU64,
    frames_delivered: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub returns_skipped: u64,
    pub points_out_of_range: u64,
    pub frames_completed: u64,
    pub frames_undersized: u64,
    pub frames_overwritten: u64,
    pub frames_delivered: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_packet(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        counter!("velodyne_packets_received_total").increment(1);
    }

    /// Packet rejected by the decoder.
    pub fn record_packet_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
        counter!("velodyne_packets_dropped_total").increment(1);
    }

    /// Return from an uncalibrated or disabled laser.
    pub fn record_return_skipped(&self) {
        self.returns_skipped.fetch_add(1, Ordering::Relaxed);
        counter!("velodyne_returns_skipped_total").increment(1);
    }

    pub fn record_out_of_range(&self) {
        self.points_out_of_range.fetch_add(1, Ordering::Relaxed);
        counter!("velodyne_points_out_of_range_total").increment(1);
    }

    pub fn record_frame_completed(&self) {
        self.frames_completed.fetch_add(1, Ordering::Relaxed);
        counter!("velodyne_frames_completed_total").increment(1);
    }

    /// Frame discarded by the minimum-size policy.
    pub fn record_frame_undersized(&self) {
        self.frames_undersized.fetch_add(1, Ordering::Relaxed);
        counter!("velodyne_frames_undersized_total").increment(1);
    }

    /// Ready frame replaced before anyone took it.
    pub fn record_frame_overwritten(&self) {
        self.frames_overwritten.fetch_add(1, Ordering::Relaxed);
        counter!("velodyne_frames_overwritten_total").increment(1);
    }

    pub fn record_frame_delivered(&self) {
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
        counter!("velodyne_frames_delivered_total").increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            returns_skipped: self.returns_skipped.load(Ordering::Relaxed),
            points_out_of_range: self.points_out_of_range.load(Ordering::Relaxed),
            frames_completed: self.frames_completed.load(Ordering::Relaxed),
            frames_undersized: self.frames_undersized.load(Ordering::Relaxed),
            frames_overwritten: self.frames_overwritten.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
        }
    }
}
