// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Per-laser calibration.
//!
//! A [`CalibrationTable`] is built once before any packet is processed,
//! validated against the sensor's [`PacketFormat`], and then shared read-only
//! (behind an `Arc`) with the frame accumulator.
//!
//! Tables are loaded from a JSON document:
//!
//! ```json
//! {
//!   "model": "vlp16",
//!   "lasers": [
//!     { "laser_id": 0, "vertical_angle": -0.261799 },
//!     { "laser_id": 1, "vertical_angle": 0.0174533, "rotation_correction": 0.01 }
//!   ]
//! }
//! ```
//!
//! Angles are in radians and offsets in meters. Every field other than
//! `laser_id` and `vertical_angle` is optional.

use crate::{lidar::SensorModel, velodyne::PacketFormat};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::{f32::consts::FRAC_PI_2, path::Path};
use tracing::{debug, info};

/// Errors raised while building or querying a calibration table.
///
/// These are fatal for the session: the pipeline refuses to start with an
/// invalid table.
#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("no calibration for laser {laser_id}")]
    MissingLaser { laser_id: u8 },
    #[error("laser {laser_id} calibrated more than once")]
    DuplicateLaser { laser_id: u8 },
    #[error("laser {laser_id} vertical angle {angle} rad outside [-pi/2, pi/2]")]
    AngleOutOfRange { laser_id: u8, angle: f32 },
    #[error("laser {laser_id} has a non-finite correction")]
    NonFinite { laser_id: u8 },
    #[error("calibration table is empty")]
    Empty,
    #[error("calibration is for {found}, sensor is {expected}")]
    ModelMismatch {
        expected: SensorModel,
        found: SensorModel,
    },
    #[error("failed to read calibration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse calibration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// How to treat returns from lasers without a calibration entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum UnknownLaserPolicy {
    /// Require an entry for every laser of the sensor
    #[default]
    Fail,
    /// Drop returns from uncalibrated lasers
    Skip,
}

/// Calibration of a single laser.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    pub laser_id: u8,
    /// Elevation angle in radians, positive up
    pub vertical_angle: f32,
    /// Horizontal offset of the emitter from the rotation axis, meters
    #[serde(default)]
    pub horizontal_offset: f32,
    /// Vertical offset of the emitter, meters
    #[serde(default)]
    pub vertical_offset: f32,
    /// Added to the measured distance, meters
    #[serde(default)]
    pub distance_correction: f32,
    /// Subtracted from the firing azimuth, radians
    #[serde(default)]
    pub rotation_correction: f32,
    /// Returns from a disabled laser are dropped and counted as skipped, like
    /// those from an uncalibrated laser under the skip policy
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl CalibrationEntry {
    /// Entry with only a vertical angle, all corrections zero.
    pub fn new(laser_id: u8, vertical_angle: f32) -> Self {
        Self {
            laser_id,
            vertical_angle,
            horizontal_offset: 0.0,
            vertical_offset: 0.0,
            distance_correction: 0.0,
            rotation_correction: 0.0,
            enabled: true,
        }
    }

    fn validate(&self) -> Result<(), CalibrationError> {
        let values = [
            self.vertical_angle,
            self.horizontal_offset,
            self.vertical_offset,
            self.distance_correction,
            self.rotation_correction,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(CalibrationError::NonFinite {
                laser_id: self.laser_id,
            });
        }
        if self.vertical_angle.abs() > FRAC_PI_2 {
            return Err(CalibrationError::AngleOutOfRange {
                laser_id: self.laser_id,
                angle: self.vertical_angle,
            });
        }
        Ok(())
    }
}

/// A calibration entry with its trigonometry precomputed.
#[derive(Clone, Debug)]
pub struct CalibratedLaser {
    entry: CalibrationEntry,
    cos_vertical: f32,
    sin_vertical: f32,
    cos_rotation: f32,
    sin_rotation: f32,
}

impl CalibratedLaser {
    fn new(entry: CalibrationEntry) -> Self {
        let (sin_vertical, cos_vertical) = entry.vertical_angle.sin_cos();
        let (sin_rotation, cos_rotation) = entry.rotation_correction.sin_cos();
        Self {
            entry,
            cos_vertical,
            sin_vertical,
            cos_rotation,
            sin_rotation,
        }
    }

    #[inline]
    pub fn entry(&self) -> &CalibrationEntry {
        &self.entry
    }

    #[inline]
    pub fn cos_vertical(&self) -> f32 {
        self.cos_vertical
    }

    #[inline]
    pub fn sin_vertical(&self) -> f32 {
        self.sin_vertical
    }

    #[inline]
    pub fn cos_rotation(&self) -> f32 {
        self.cos_rotation
    }

    #[inline]
    pub fn sin_rotation(&self) -> f32 {
        self.sin_rotation
    }
}

#[derive(Deserialize)]
struct CalibrationFile {
    #[serde(default)]
    model: Option<SensorModel>,
    lasers: Vec<CalibrationEntry>,
}

/// Immutable per-laser calibration lookup.
#[derive(Clone, Debug)]
pub struct CalibrationTable {
    model: Option<SensorModel>,
    lasers: Vec<Option<CalibratedLaser>>,
    count: usize,
}

impl CalibrationTable {
    /// Build a table from entries, rejecting duplicates and invalid values.
    pub fn from_entries(
        model: Option<SensorModel>,
        entries: impl IntoIterator<Item = CalibrationEntry>,
    ) -> Result<Self, CalibrationError> {
        let mut lasers: Vec<Option<CalibratedLaser>> = Vec::new();
        let mut count = 0;

        for entry in entries {
            entry.validate()?;
            let index = entry.laser_id as usize;
            if lasers.len() <= index {
                lasers.resize(index + 1, None);
            }
            if lasers[index].is_some() {
                return Err(CalibrationError::DuplicateLaser {
                    laser_id: entry.laser_id,
                });
            }
            lasers[index] = Some(CalibratedLaser::new(entry));
            count += 1;
        }

        if count == 0 {
            return Err(CalibrationError::Empty);
        }

        Ok(Self {
            model,
            lasers,
            count,
        })
    }

    /// Parse a table from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, CalibrationError> {
        let file: CalibrationFile = serde_json::from_str(json)?;
        Self::from_entries(file.model, file.lasers)
    }

    /// Load a table from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let table = Self::from_json_str(&json)?;
        info!(path = %path.display(), lasers = table.len(), "loaded calibration");
        Ok(table)
    }

    /// Nominal factory calibration (vertical angles only).
    pub fn factory(model: SensorModel) -> Self {
        let angles: &[f32] = match model {
            SensorModel::Hdl32 => &HDL32_VERTICAL_ANGLES,
            SensorModel::Vlp16 => &VLP16_VERTICAL_ANGLES,
            SensorModel::Vlp32c => &VLP32C_VERTICAL_ANGLES,
        };
        let scale = match model {
            SensorModel::Vlp32c => std::f32::consts::PI / 180.0,
            _ => 1.0,
        };

        let lasers = angles
            .iter()
            .enumerate()
            .map(|(id, angle)| Some(CalibratedLaser::new(CalibrationEntry::new(id as u8, angle * scale))))
            .collect::<Vec<_>>();

        Self {
            model: Some(model),
            count: lasers.len(),
            lasers,
        }
    }

    /// Sensor model the table was declared for, if any.
    pub fn model(&self) -> Option<SensorModel> {
        self.model
    }

    /// Number of calibrated lasers.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Calibrated laser for the hot path, `None` when uncalibrated.
    #[inline]
    pub fn get(&self, laser_id: u8) -> Option<&CalibratedLaser> {
        self.lasers.get(laser_id as usize).and_then(Option::as_ref)
    }

    /// Calibration entry for a laser.
    pub fn lookup(&self, laser_id: u8) -> Result<&CalibrationEntry, CalibrationError> {
        self.get(laser_id)
            .map(CalibratedLaser::entry)
            .ok_or(CalibrationError::MissingLaser { laser_id })
    }

    /// Ensure lasers `0..lasers` are all present.
    pub fn require_lasers(&self, lasers: usize) -> Result<(), CalibrationError> {
        for laser_id in 0..lasers.min(u8::MAX as usize + 1) {
            self.lookup(laser_id as u8)?;
        }
        Ok(())
    }

    /// Check the table is usable with a packet format.
    ///
    /// Under [`UnknownLaserPolicy::Fail`] every laser the format can emit must
    /// be calibrated. Under [`UnknownLaserPolicy::Skip`] only the declared
    /// entries are checked.
    pub fn validate_for(
        &self,
        format: &PacketFormat,
        policy: UnknownLaserPolicy,
    ) -> Result<(), CalibrationError> {
        if let Some(found) = self.model
            && found != format.model
        {
            return Err(CalibrationError::ModelMismatch {
                expected: format.model,
                found,
            });
        }

        match policy {
            UnknownLaserPolicy::Fail => self.require_lasers(format.lasers)?,
            UnknownLaserPolicy::Skip => {
                let missing = (0..format.lasers)
                    .filter(|id| self.get(*id as u8).is_none())
                    .count();
                if missing > 0 {
                    debug!(missing, "returns from uncalibrated lasers will be skipped");
                }
            }
        }

        Ok(())
    }
}

/// HDL-32E nominal vertical angles in radians, by laser id.
const HDL32_VERTICAL_ANGLES: [f32; 32] = [
    -0.535293, -0.162839, -0.511905, -0.139626, -0.488692, -0.116239, -0.465305, -0.093026,
    -0.442092, -0.069813, -0.418879, -0.046600, -0.395666, -0.023213, -0.372279, 0.0, -0.349066,
    0.023213, -0.325853, 0.046600, -0.302466, 0.069813, -0.279253, 0.093026, -0.256040, 0.116413,
    -0.232652, 0.139626, -0.209440, 0.162839, -0.186227, 0.186227,
];

/// VLP-16 nominal vertical angles in radians, by laser id.
const VLP16_VERTICAL_ANGLES: [f32; 16] = [
    -0.261799, 0.0174533, -0.226893, 0.0523599, -0.191986, 0.0872665, -0.15708, 0.122173,
    -0.122173, 0.15708, -0.0872665, 0.191986, -0.0523599, 0.226893, -0.0174533, 0.261799,
];

/// VLP-32C nominal vertical angles in degrees, by laser id.
const VLP32C_VERTICAL_ANGLES: [f32; 32] = [
    -25.0, -1.0, -1.667, -15.639, -11.31, 0.0, -0.667, -8.843, -7.254, 0.333, -0.333, -6.148,
    -5.333, 1.333, 0.667, -4.0, -4.667, 1.667, 1.0, -3.667, -3.333, 3.333, 2.333, -2.667, -3.0,
    7.0, 4.667, -2.333, -2.0, 15.0, 10.333, -1.333,
];
