// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_velodyne::{
    args::Args,
    buffer::FrameBuffer,
    calibration::CalibrationTable,
    lidar::{Error, SensorModel},
    packet_source::{PacketSource, UdpSource},
    pipeline::{Ingestor, PipelineConfig, run_consumer, spawn_ingest},
    simulator::SimulatedSensor,
    stats::PipelineStats,
    viewer::Viewer,
};
use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(args.rust_log.into())
                .from_env_lossy(),
        )
        .with_thread_names(true)
        .init();

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::Release);
        })?;
    }

    let config = PipelineConfig::from(&args);
    let (model, source) = open_source(&args)?;
    info!(%model, "sensor model");

    let calibration = match &args.calibration {
        Some(path) => CalibrationTable::load(path).inspect_err(|err| {
            error!(path = %path.display(), error = %err, "failed to load calibration")
        })?,
        None => {
            debug!("using factory calibration");
            CalibrationTable::factory(model)
        }
    };

    let stats = Arc::new(PipelineStats::new());
    let buffer = Arc::new(FrameBuffer::new().with_stats(stats.clone()));
    let ingestor = Ingestor::new(
        model,
        Arc::new(calibration),
        config.accumulator,
        buffer.clone(),
        stats.clone(),
    )
    .inspect_err(|err| error!(error = %err, "calibration rejected"))?;

    #[cfg(feature = "rerun")]
    let (mut viewer, _serve_guard): (Box<dyn Viewer>, _) = {
        let (rec, guard) = args
            .rerun
            .init("edgefirst-velodyne")
            .map_err(|e| Error::Viewer(e.to_string()))?;
        let viewer = edgefirst_velodyne::viewer::RerunViewer::new(rec);
        (Box::new(viewer) as Box<dyn Viewer>, guard)
    };
    #[cfg(not(feature = "rerun"))]
    let mut viewer: Box<dyn Viewer> = Box::new(edgefirst_velodyne::viewer::LogViewer::new());

    let ingest = spawn_ingest(source, ingestor, config.poll_interval, stop.clone())?;
    let rendered = run_consumer(
        &buffer,
        viewer.as_mut(),
        config.render_interval,
        &stop,
        &ingest,
    );

    stop.store(true, Ordering::Release);
    let ingested = ingest.join();

    let snapshot = stats.snapshot();
    info!(
        packets = snapshot.packets_received,
        dropped = snapshot.packets_dropped,
        frames = snapshot.frames_completed,
        overwritten = snapshot.frames_overwritten,
        delivered = snapshot.frames_delivered,
        "pipeline stopped"
    );

    if let Err(err) = &ingested {
        error!(error = %err, "ingest failed");
    }
    let rendered = rendered?;
    ingested?;
    debug!(rendered, "consumer finished");

    Ok(())
}

/// Pick the packet source from the command line and resolve the sensor model.
fn open_source(args: &Args) -> Result<(SensorModel, Box<dyn PacketSource>), Error> {
    if let Some(rpm) = args.simulate {
        let model = args.sensor.unwrap_or_default();
        info!(rpm, "simulating sensor");
        let sensor = SimulatedSensor::new(model, rpm).with_realtime();
        return Ok((model, Box::new(sensor)));
    }

    if Path::new(&args.target).is_file() {
        return open_pcap(args);
    }

    let model = args.sensor.unwrap_or_default();
    let addr = format!("{}:{}", args.target, args.port);
    let source = UdpSource::bind_deferred(&addr)?;
    info!(%addr, "listening");
    Ok((model, Box::new(source)))
}

#[cfg(feature = "pcap")]
fn open_pcap(args: &Args) -> Result<(SensorModel, Box<dyn PacketSource>), Error> {
    use edgefirst_velodyne::{pcap_source::PcapSource, velodyne::PACKET_SIZE};
    use tracing::warn;

    let source = PcapSource::from_file(&args.target, Some(args.port))?
        .with_payload_len(PACKET_SIZE)
        .with_replay_speed(args.replay_speed);
    info!(path = %args.target, packets = source.len(), "replaying capture");

    let detected = source.first_payload().and_then(SensorModel::detect);
    let model = match (args.sensor, detected) {
        (Some(model), Some(found)) if model != found => {
            warn!(%model, %found, "capture does not match requested sensor");
            model
        }
        (Some(model), _) => model,
        (None, Some(found)) => found,
        (None, None) => SensorModel::default(),
    };

    Ok((model, Box::new(source)))
}

#[cfg(not(feature = "pcap"))]
fn open_pcap(args: &Args) -> Result<(SensorModel, Box<dyn PacketSource>), Error> {
    Err(Error::Config(format!(
        "{} is a file but pcap support is not enabled",
        args.target
    )))
}
