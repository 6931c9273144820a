// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! End-to-end tests of the ingest pipeline using simulated sensors.

use edgefirst_velodyne::{
    AccumulatorConfig, CalibrationError, CalibrationTable, Error, Frame, FrameBuffer, RawPacket,
    SensorModel,
    calibration::UnknownLaserPolicy,
    packet_source::PacketSource,
    pipeline::{Ingestor, run_consumer, spawn_ingest},
    simulator::SimulatedSensor,
    stats::PipelineStats,
    viewer::Viewer,
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

const RPM: f64 = 600.0;

fn pipeline(
    model: SensorModel,
    calibration: CalibrationTable,
    config: AccumulatorConfig,
) -> Result<(Ingestor, Arc<FrameBuffer>, Arc<PipelineStats>), Error> {
    let stats = Arc::new(PipelineStats::new());
    let buffer = Arc::new(FrameBuffer::new().with_stats(stats.clone()));
    let ingestor = Ingestor::new(
        model,
        Arc::new(calibration),
        config,
        buffer.clone(),
        stats.clone(),
    )?;
    Ok((ingestor, buffer, stats))
}

fn packets(sensor: &mut SimulatedSensor, count: usize) -> Vec<RawPacket> {
    (0..count).map(|_| sensor.next_raw()).collect()
}

/// Calibration for `model` with one laser removed.
fn calibration_without(model: SensorModel, missing: u8) -> CalibrationTable {
    let factory = CalibrationTable::factory(model);
    let entries = (0..model.format().lasers as u8)
        .filter(|id| *id != missing)
        .filter_map(|id| factory.get(id).map(|laser| laser.entry().clone()))
        .collect::<Vec<_>>();
    CalibrationTable::from_entries(Some(model), entries).unwrap()
}

/// Records the id of every rendered frame.
#[derive(Default)]
struct RecordingViewer {
    frame_ids: Vec<u64>,
    delay: Duration,
}

impl Viewer for RecordingViewer {
    fn render(&mut self, frame: &Frame) -> Result<(), Error> {
        self.frame_ids.push(frame.frame_id());
        std::thread::sleep(self.delay);
        Ok(())
    }
}

#[test]
fn test_truncated_packet_loses_only_its_points() {
    let mut sensor = SimulatedSensor::new(SensorModel::Hdl32, RPM);
    let stream = packets(&mut sensor, 200);

    let (mut ingestor, buffer, _) = pipeline(
        SensorModel::Hdl32,
        CalibrationTable::factory(SensorModel::Hdl32),
        AccumulatorConfig::default(),
    )
    .unwrap();
    for packet in &stream {
        ingestor.process(packet).unwrap();
    }
    let complete = buffer.take_latest().expect("first revolution");

    let (mut ingestor, buffer, stats) = pipeline(
        SensorModel::Hdl32,
        CalibrationTable::factory(SensorModel::Hdl32),
        AccumulatorConfig::default(),
    )
    .unwrap();
    for (i, packet) in stream.iter().enumerate() {
        if i == 50 {
            let truncated = RawPacket::new(packet.data()[..1000].to_vec(), packet.timestamp());
            ingestor.process(&truncated).unwrap();
        } else {
            ingestor.process(packet).unwrap();
        }
    }
    let damaged = buffer.take_latest().expect("first revolution");

    assert_eq!(stats.snapshot().packets_dropped, 1);
    assert_eq!(damaged.frame_id(), complete.frame_id());
    assert_eq!(damaged.point_count(), complete.point_count() - 384);

    // The frame still spans the whole revolution
    let points = damaged.points();
    assert!(points[0].azimuth < 100);
    assert!(points[points.len() - 1].azimuth > 35_500);
}

#[test]
fn test_frame_ids_follow_revolutions() {
    let mut sensor = SimulatedSensor::new(SensorModel::Hdl32, RPM).with_revolutions(3.5);
    let (mut ingestor, buffer, stats) = pipeline(
        SensorModel::Hdl32,
        CalibrationTable::factory(SensorModel::Hdl32),
        AccumulatorConfig::default(),
    )
    .unwrap();

    let mut frame_ids = Vec::new();
    while sensor.has_more() {
        ingestor.process(&sensor.next_raw()).unwrap();
        if let Some(frame) = buffer.take_latest() {
            assert!(frame.point_count() > 60_000, "full revolution expected");
            frame_ids.push(frame.frame_id());
            buffer.recycle(frame);
        }
    }
    assert_eq!(frame_ids, vec![0, 1, 2]);

    // The trailing half revolution is closed at end of stream
    ingestor.finish();
    let last = buffer.take_latest().unwrap();
    assert_eq!(last.frame_id(), 3);
    assert!(last.point_count() < 40_000);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.frames_completed, 4);
    assert_eq!(snapshot.frames_delivered, 4);
    assert_eq!(snapshot.frames_overwritten, 0);
}

#[test]
fn test_undersized_frames_are_discarded() {
    let mut sensor = SimulatedSensor::new(SensorModel::Hdl32, RPM).with_revolutions(2.5);
    let config = AccumulatorConfig {
        min_points: 100_000,
        ..Default::default()
    };
    let (mut ingestor, buffer, stats) = pipeline(
        SensorModel::Hdl32,
        CalibrationTable::factory(SensorModel::Hdl32),
        config,
    )
    .unwrap();

    while sensor.has_more() {
        ingestor.process(&sensor.next_raw()).unwrap();
    }
    ingestor.finish();

    assert!(buffer.take_latest().is_none());
    let snapshot = stats.snapshot();
    assert_eq!(snapshot.frames_completed, 0);
    assert_eq!(snapshot.frames_undersized, 3);
}

#[test]
fn test_undersized_frames_do_not_consume_ids() {
    let mut sensor = SimulatedSensor::new(SensorModel::Hdl32, RPM)
        .with_start_azimuth(30_000)
        .with_revolutions(1.5);
    let config = AccumulatorConfig {
        min_points: 20_000,
        ..Default::default()
    };
    let (mut ingestor, buffer, stats) = pipeline(
        SensorModel::Hdl32,
        CalibrationTable::factory(SensorModel::Hdl32),
        config,
    )
    .unwrap();

    while sensor.has_more() {
        ingestor.process(&sensor.next_raw()).unwrap();
    }

    // The partial sixth of a revolution before the first wrap is dropped
    let frame = buffer.take_latest().unwrap();
    assert_eq!(frame.frame_id(), 0);
    assert_eq!(stats.snapshot().frames_undersized, 1);
}

#[test]
fn test_missing_laser_fails_by_default() {
    let result = pipeline(
        SensorModel::Hdl32,
        calibration_without(SensorModel::Hdl32, 5),
        AccumulatorConfig::default(),
    );
    assert!(matches!(
        result,
        Err(Error::Calibration(CalibrationError::MissingLaser { laser_id: 5 }))
    ));
}

#[test]
fn test_missing_laser_skipped_on_request() {
    let config = AccumulatorConfig {
        unknown_laser: UnknownLaserPolicy::Skip,
        ..Default::default()
    };
    let (mut ingestor, buffer, stats) = pipeline(
        SensorModel::Hdl32,
        calibration_without(SensorModel::Hdl32, 5),
        config,
    )
    .unwrap();

    let mut sensor = SimulatedSensor::new(SensorModel::Hdl32, RPM);
    for packet in packets(&mut sensor, 200) {
        ingestor.process(&packet).unwrap();
    }

    // One return per block comes from laser 5
    assert_eq!(stats.snapshot().returns_skipped, 200 * 12);

    let frame = buffer.take_latest().unwrap();
    assert!(frame.point_count() > 60_000);
    assert!(frame.points().iter().all(|p| p.laser_id != 5));
}

#[test]
fn test_slow_consumer_sees_latest_frames_in_order() {
    let sensor = SimulatedSensor::new(SensorModel::Vlp16, RPM).with_revolutions(12.0);
    let (ingestor, buffer, stats) = pipeline(
        SensorModel::Vlp16,
        CalibrationTable::factory(SensorModel::Vlp16),
        AccumulatorConfig::default(),
    )
    .unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let ingest = spawn_ingest(sensor, ingestor, Duration::from_millis(20), stop.clone()).unwrap();

    let mut viewer = RecordingViewer {
        delay: Duration::from_millis(5),
        ..Default::default()
    };
    let rendered = run_consumer(
        &buffer,
        &mut viewer,
        Duration::from_millis(2),
        &stop,
        &ingest,
    )
    .unwrap();
    ingest.join().unwrap();

    assert_eq!(rendered, viewer.frame_ids.len() as u64);
    assert!(viewer.frame_ids.windows(2).all(|w| w[0] < w[1]));

    // Every frame was either shown or replaced by a newer one
    let snapshot = stats.snapshot();
    assert_eq!(
        snapshot.frames_delivered + snapshot.frames_overwritten,
        snapshot.frames_completed
    );
    assert_eq!(
        viewer.frame_ids.last().copied(),
        Some(snapshot.frames_completed - 1)
    );
}

#[test]
fn test_stop_flag_ends_live_stream() {
    let sensor = SimulatedSensor::new(SensorModel::Hdl32, RPM).with_realtime();
    let (ingestor, buffer, stats) = pipeline(
        SensorModel::Hdl32,
        CalibrationTable::factory(SensorModel::Hdl32),
        AccumulatorConfig::default(),
    )
    .unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let ingest = spawn_ingest(sensor, ingestor, Duration::from_millis(20), stop.clone()).unwrap();

    let timer = {
        let stop = stop.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(500));
            stop.store(true, Ordering::Release);
        })
    };

    let mut viewer = RecordingViewer::default();
    run_consumer(
        &buffer,
        &mut viewer,
        Duration::from_millis(10),
        &stop,
        &ingest,
    )
    .unwrap();
    ingest.join().unwrap();
    timer.join().unwrap();

    assert!(stats.snapshot().packets_received > 0);
    assert!(viewer.frame_ids.windows(2).all(|w| w[0] < w[1]));
}
