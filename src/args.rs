// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    accumulator::AccumulatorConfig, calibration::UnknownLaserPolicy, lidar::SensorModel,
    pipeline::PipelineConfig, velodyne::DATA_PORT,
};
use clap::Parser;
use std::{path::PathBuf, time::Duration};
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Replay a pcap file or listen on a local address.  If target is an
    /// existing file it is replayed, otherwise it is used as the bind address
    /// for live UDP packets.  Ignored with --simulate.
    #[arg(env, default_value = "0.0.0.0")]
    pub target: String,

    /// Sensor model.  Detected from the first packet of a pcap when omitted,
    /// otherwise defaults to the HDL-32E.
    #[arg(long, env, value_enum)]
    pub sensor: Option<SensorModel>,

    /// UDP data port
    #[arg(long, env, default_value_t = DATA_PORT)]
    pub port: u16,

    /// Calibration JSON file.  The nominal factory table is used when omitted.
    #[arg(long, env)]
    pub calibration: Option<PathBuf>,

    /// Behaviour for returns from lasers missing in the calibration
    #[arg(long, env, value_enum, default_value = "fail")]
    pub unknown_laser: UnknownLaserPolicy,

    /// Frames with fewer points are discarded
    #[arg(long, env, default_value = "1000")]
    pub min_points: usize,

    /// Backward azimuth motion tolerated as jitter, in hundredths of a degree
    #[arg(long, env, default_value = "100")]
    pub backward_tolerance: u16,

    /// Maximum point range in meters
    #[arg(long, env, default_value = "120.0")]
    pub max_range: f32,

    /// Viewer refresh rate in Hz
    #[arg(long, env, default_value = "30")]
    pub render_hz: u32,

    /// Pcap replay speed relative to capture time, 0 replays unpaced
    #[arg(long, env, default_value = "1.0")]
    pub replay_speed: f64,

    /// Generate packets from a simulated sensor spinning at this rpm
    #[arg(long, env)]
    pub simulate: Option<f64>,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    pub rust_log: LevelFilter,

    #[cfg(feature = "rerun")]
    #[command(flatten)]
    pub rerun: rerun::clap::RerunArgs,
}

impl From<&Args> for PipelineConfig {
    fn from(args: &Args) -> Self {
        let render_interval = Duration::from_secs_f64(1.0 / args.render_hz.max(1) as f64);
        PipelineConfig {
            accumulator: AccumulatorConfig {
                min_points: args.min_points,
                backward_tolerance: args.backward_tolerance,
                max_range: args.max_range,
                unknown_laser: args.unknown_laser,
            },
            render_interval,
            ..Default::default()
        }
    }
}
