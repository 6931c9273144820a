// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Latest-wins frame hand-off between the ingestion and consumer threads.
//!
//! [`FrameBuffer`] is a single-slot mailbox built on two capacity-one
//! [`ArrayQueue`]s. The producer publishes completed frames without ever
//! blocking; the consumer takes whatever frame is newest when it is ready to
//! render. A frame that nobody took before the next one arrived is handed back
//! to the producer so its storage can be reused.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  publish   ┌──────────────────┐ take_latest ┌──────────┐
//! │ Accumulator  │ ─────────► │ latest: [Frame;1]│ ──────────► │  Viewer  │
//! │ (ingestion)  │ ◄───────── │                  │             │          │
//! │              │  displaced │ spare:  [Frame;1]│ ◄────────── │          │
//! └──────────────┘  / spare   └──────────────────┘   recycle   └──────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use edgefirst_velodyne::buffer::FrameBuffer;
//!
//! let buffer = FrameBuffer::new();
//! assert!(buffer.take_latest().is_none());
//! ```

use crate::{lidar::Frame, stats::PipelineStats};
use crossbeam_queue::ArrayQueue;
use std::sync::Arc;
use tracing::trace;

/// Single-slot latest-wins frame buffer.
///
/// `publish` and `take_latest` are lock-free and never block. Consumers only
/// ever see whole frames: a frame is moved into the slot before it becomes
/// visible and moved out by exactly one taker.
#[derive(Debug)]
pub struct FrameBuffer {
    latest: ArrayQueue<Frame>,
    spare: ArrayQueue<Frame>,
    stats: Option<Arc<PipelineStats>>,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            latest: ArrayQueue::new(1),
            spare: ArrayQueue::new(1),
            stats: None,
        }
    }

    /// Record overwritten and delivered frames in `stats`.
    pub fn with_stats(mut self, stats: Arc<PipelineStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Make `frame` the latest frame.
    ///
    /// Returns the frame it displaced, if the consumer never took it. The
    /// displaced frame is counted as overwritten.
    pub fn publish(&self, frame: Frame) -> Option<Frame> {
        let frame_id = frame.frame_id();
        let displaced = self.latest.force_push(frame);

        if let Some(stale) = &displaced {
            debug_assert!(
                stale.frame_id() < frame_id,
                "frame ids must increase: {} after {}",
                frame_id,
                stale.frame_id()
            );
            trace!(stale = stale.frame_id(), frame_id, "overwrote untaken frame");
            if let Some(stats) = &self.stats {
                stats.record_frame_overwritten();
            }
        }

        displaced
    }

    /// Take the most recent frame, leaving the buffer empty.
    pub fn take_latest(&self) -> Option<Frame> {
        let frame = self.latest.pop();
        if frame.is_some()
            && let Some(stats) = &self.stats
        {
            stats.record_frame_delivered();
        }
        frame
    }

    /// Hand a consumed frame back so its storage can be reused.
    pub fn recycle(&self, frame: Frame) {
        drop(self.spare.force_push(frame));
    }

    /// Take a frame previously returned through [`FrameBuffer::recycle`].
    pub fn take_spare(&self) -> Option<Frame> {
        self.spare.pop()
    }
}
