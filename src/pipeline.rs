// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Ingestion and consumer loops.
//!
//! ```text
//! ┌──────────── ingest thread ─────────────┐          ┌─── consumer ───┐
//! │ PacketSource → Decoder → Accumulator ──┼─publish─►│ FrameBuffer    │
//! │   (tokio current-thread runtime)       │          │  → Viewer      │
//! └────────────────────────────────────────┘          └────────────────┘
//! ```
//!
//! The ingest thread only waits on the packet source. The consumer takes the
//! newest frame at its own cadence and never blocks the producer. Both loops
//! observe a shared stop flag between packets or frames.

use crate::{
    accumulator::{AccumulatorConfig, FrameAccumulator},
    buffer::FrameBuffer,
    calibration::CalibrationTable,
    lidar::{Error, LaserReturn, RawPacket, SensorModel},
    packet_source::PacketSource,
    stats::PipelineStats,
    velodyne::{Decoder, InterpolationContext, MAX_RETURNS_PER_PACKET},
    viewer::Viewer,
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};
use tracing::{debug, info, instrument, trace, warn};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineConfig {
    pub accumulator: AccumulatorConfig,
    /// Upper bound on a single wait for the next packet
    pub poll_interval: Duration,
    /// Consumer cadence
    pub render_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            accumulator: AccumulatorConfig::default(),
            poll_interval: Duration::from_millis(100),
            render_interval: Duration::from_millis(33),
        }
    }
}

/// Per-packet processing: decode, accumulate and publish.
pub struct Ingestor {
    decoder: Decoder,
    accumulator: FrameAccumulator,
    context: InterpolationContext,
    returns: Vec<LaserReturn>,
    buffer: Arc<FrameBuffer>,
    stats: Arc<PipelineStats>,
}

impl Ingestor {
    /// Build the ingest stage for `model`.
    ///
    /// Fails if the calibration table does not fit the model under the
    /// configured unknown-laser policy.
    pub fn new(
        model: SensorModel,
        calibration: Arc<CalibrationTable>,
        config: AccumulatorConfig,
        buffer: Arc<FrameBuffer>,
        stats: Arc<PipelineStats>,
    ) -> Result<Self, Error> {
        let decoder = Decoder::new(model);
        calibration.validate_for(decoder.format(), config.unknown_laser)?;

        let accumulator = FrameAccumulator::new(
            calibration,
            decoder.format().distance_resolution,
            config,
        )
        .with_stats(stats.clone());

        Ok(Self {
            decoder,
            accumulator,
            context: InterpolationContext::new(),
            returns: Vec::with_capacity(MAX_RETURNS_PER_PACKET),
            buffer,
            stats,
        })
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    /// Process one packet.
    ///
    /// Undecodable packets are counted and dropped. The only error is a
    /// fatal calibration failure.
    pub fn process(&mut self, packet: &RawPacket) -> Result<(), Error> {
        self.stats.record_packet();
        self.returns.clear();

        match self
            .decoder
            .decode_into(packet.data(), self.context, &mut self.returns)
        {
            Ok((_, context)) => self.context = context,
            Err(err) => {
                self.stats.record_packet_dropped();
                debug!(error = %err, len = packet.len(), "dropping packet");
                return Ok(());
            }
        }

        for ret in &self.returns {
            if self.accumulator.push(ret, packet.timestamp())? {
                Self::hand_off(&mut self.accumulator, &self.buffer);
            }
        }

        Ok(())
    }

    /// Close the trailing frame at end of stream.
    pub fn finish(&mut self) {
        if self.accumulator.finish() {
            Self::hand_off(&mut self.accumulator, &self.buffer);
        }
        self.context = InterpolationContext::new();
    }

    fn hand_off(accumulator: &mut FrameAccumulator, buffer: &FrameBuffer) {
        let Some(frame) = accumulator.take_frame() else {
            return;
        };
        trace!(frame_id = frame.frame_id(), points = frame.point_count(), "publish");

        if let Some(stale) = buffer.publish(frame) {
            accumulator.recycle(stale);
        }
        if let Some(spare) = buffer.take_spare() {
            accumulator.recycle(spare);
        }
    }
}

/// Drive `source` through `ingestor` until end of stream or `stop`.
///
/// Each wait for a packet is bounded by `poll_interval` so a stop request is
/// noticed promptly even when no packets arrive.
#[instrument(skip_all)]
pub async fn run_ingest<S: PacketSource + ?Sized>(
    source: &mut S,
    ingestor: &mut Ingestor,
    poll_interval: Duration,
    stop: &AtomicBool,
) -> Result<(), Error> {
    while !stop.load(Ordering::Acquire) {
        match tokio::time::timeout(poll_interval, source.next_packet()).await {
            Err(_elapsed) => continue,
            Ok(Ok(Some(packet))) => ingestor.process(&packet)?,
            Ok(Ok(None)) => {
                info!("end of stream");
                ingestor.finish();
                return Ok(());
            }
            Ok(Err(err)) => return Err(err),
        }
    }

    debug!("ingest stopped");
    Ok(())
}

/// Handle to the ingest thread.
pub struct IngestHandle {
    handle: JoinHandle<Result<(), Error>>,
}

impl IngestHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> Result<(), Error> {
        self.handle
            .join()
            .map_err(|_| Error::ThreadPanic("ingest"))?
    }
}

/// Run [`run_ingest`] on a dedicated thread with its own runtime.
pub fn spawn_ingest<S>(
    mut source: S,
    mut ingestor: Ingestor,
    poll_interval: Duration,
    stop: Arc<AtomicBool>,
) -> Result<IngestHandle, Error>
where
    S: PacketSource + 'static,
{
    let handle = std::thread::Builder::new()
        .name("ingest".to_string())
        .spawn(move || -> Result<(), Error> {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            rt.block_on(run_ingest(&mut source, &mut ingestor, poll_interval, &stop))
        })?;

    Ok(IngestHandle { handle })
}

/// Render the latest frame every `render_interval` until `stop` is set or
/// the ingest thread exits.
///
/// Returns the number of frames rendered.
pub fn run_consumer<V: Viewer + ?Sized>(
    buffer: &FrameBuffer,
    viewer: &mut V,
    render_interval: Duration,
    stop: &AtomicBool,
    ingest: &IngestHandle,
) -> Result<u64, Error> {
    let mut rendered = 0;
    let mut last_frame_id = None;

    loop {
        let tick = Instant::now();
        // Sample before taking so a frame published just before exit is seen
        let finished = ingest.is_finished();

        if let Some(frame) = buffer.take_latest() {
            if let Some(last) = last_frame_id
                && frame.frame_id() <= last
            {
                warn!(frame_id = frame.frame_id(), last, "frame out of order");
            }
            last_frame_id = Some(frame.frame_id());

            viewer.render(&frame)?;
            rendered += 1;
            buffer.recycle(frame);
        }

        if finished || stop.load(Ordering::Acquire) {
            break;
        }

        if let Some(remaining) = render_interval.checked_sub(tick.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    Ok(rendered)
}
