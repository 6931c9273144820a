// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Frame visualizers.
//!
//! A [`Viewer`] owns all rendering state and only ever sees complete frames
//! taken from the [`crate::buffer::FrameBuffer`].

use crate::lidar::{Error, Frame};
use tracing::info;

pub trait Viewer {
    fn render(&mut self, frame: &Frame) -> Result<(), Error>;
}

/// Logs a summary of each frame.
#[derive(Debug, Default)]
pub struct LogViewer {
    frames: u64,
    points: u64,
}

impl LogViewer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames rendered so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Points rendered so far.
    pub fn points(&self) -> u64 {
        self.points
    }
}

impl Viewer for LogViewer {
    fn render(&mut self, frame: &Frame) -> Result<(), Error> {
        self.frames += 1;
        self.points += frame.point_count() as u64;

        let span_ms =
            frame.end_timestamp().saturating_sub(frame.start_timestamp()) as f64 / 1e6;
        info!(
            frame_id = frame.frame_id(),
            points = frame.point_count(),
            span_ms,
            "frame"
        );
        Ok(())
    }
}

/// Streams frames to a Rerun viewer as coloured point clouds.
#[cfg(feature = "rerun")]
pub struct RerunViewer {
    rec: rerun::RecordingStream,
}

#[cfg(feature = "rerun")]
impl RerunViewer {
    pub fn new(rec: rerun::RecordingStream) -> Self {
        Self { rec }
    }
}

#[cfg(feature = "rerun")]
impl Viewer for RerunViewer {
    fn render(&mut self, frame: &Frame) -> Result<(), Error> {
        let points = frame
            .points()
            .iter()
            .map(|p| [p.x, p.y, p.z])
            .collect::<Vec<_>>();
        // Grayscale by intensity
        let colors = frame
            .points()
            .iter()
            .map(|p| rerun::Color::from_rgb(p.intensity, p.intensity, p.intensity))
            .collect::<Vec<_>>();

        self.rec
            .set_time_sequence("frame_id", frame.frame_id() as i64);
        self.rec
            .log(
                "lidar/points",
                &rerun::Points3D::new(points).with_colors(colors),
            )
            .map_err(|e| Error::Viewer(e.to_string()))
    }
}
