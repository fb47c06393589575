// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Device configuration loaded from a JSON file.
//!
//! ```json
//! {
//!     "device": { "uuids": ["0b5d2a1e-8f3c-4b6e-9a7d-1c2e3f405162"] },
//!     "device_config": {
//!         "fmcw_single_shape": {
//!             "rx_antennas": [1, 2, 3],
//!             "tx_antennas": [1],
//!             "tx_power_level": 31,
//!             "if_gain_dB": 33,
//!             "lower_frequency_Hz": 60500000000,
//!             "upper_frequency_Hz": 61500000000,
//!             "num_chirps_per_frame": 32,
//!             "num_samples_per_chirp": 128,
//!             "sample_rate_Hz": 1000000,
//!             "chirp_repetition_time_s": 0.0005014928,
//!             "frame_repetition_time_s": 0.1
//!         }
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::{fmt, fs, io, path::Path};
use tracing::debug;
use uuid::Uuid;

/// Number of receive antennas on the BGT60 transceivers.
pub const MAX_RX_ANTENNAS: u32 = 3;
/// Number of transmit antennas on the BGT60 transceivers.
pub const MAX_TX_ANTENNAS: u32 = 1;

/// Device configuration errors.
#[derive(Debug)]
pub enum Error {
    /// The file could not be read.
    Io(io::Error),
    /// The file is not valid JSON or misses fields.
    Json(serde_json::Error),
    /// A device uuid could not be parsed.
    InvalidUuid(String),
    /// The file only describes the scene metrics, which need the vendor SDK
    /// to be translated into chirp parameters.
    SceneUnsupported,
    /// Neither a single shape nor a scene is given.
    NoConfiguration,
    /// A parameter is out of range.
    Invalid(String),
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::Json(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {}", err),
            Error::Json(err) => write!(f, "json error: {}", err),
            Error::InvalidUuid(uuid) => write!(f, "invalid device uuid: {}", uuid),
            Error::SceneUnsupported => write!(f, "fmcw_scene configuration is not supported"),
            Error::NoConfiguration => write!(f, "no device configuration"),
            Error::Invalid(reason) => write!(f, "invalid device configuration: {}", reason),
        }
    }
}

/// FMCW chirp parameters shared by every chirp of a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleShape {
    /// Bit n enables receive antenna n + 1.
    pub rx_mask: u32,
    /// Bit n enables transmit antenna n + 1.
    pub tx_mask: u32,
    /// Abstract transmit power, 1 to 31.
    pub tx_power_level: u32,
    /// IF gain in dB.
    pub if_gain_db: u32,
    /// Chirp start frequency.
    pub lower_frequency_hz: u64,
    /// Chirp end frequency.
    pub upper_frequency_hz: u64,
    /// Chirps per frame.
    pub num_chirps_per_frame: u32,
    /// ADC samples per chirp.
    pub num_samples_per_chirp: u32,
    /// ADC sample rate.
    pub sample_rate_hz: u32,
    /// Time between the starts of two chirps.
    pub chirp_repetition_time_s: f32,
    /// Time between the starts of two frames.
    pub frame_repetition_time_s: f32,
}

impl Default for SingleShape {
    fn default() -> Self {
        SingleShape {
            rx_mask: 0b100,
            tx_mask: 0b1,
            tx_power_level: 31,
            if_gain_db: 33,
            lower_frequency_hz: 60_500_000_000,
            upper_frequency_hz: 61_500_000_000,
            num_chirps_per_frame: 32,
            num_samples_per_chirp: 128,
            sample_rate_hz: 1_000_000,
            chirp_repetition_time_s: 5.014928e-4,
            frame_repetition_time_s: 1.0,
        }
    }
}

impl SingleShape {
    /// Number of enabled receive antennas.
    pub fn num_rx(&self) -> usize {
        self.rx_mask.count_ones() as usize
    }

    /// Swept bandwidth of one chirp in Hz.
    pub fn bandwidth_hz(&self) -> u64 {
        self.upper_frequency_hz - self.lower_frequency_hz
    }

    /// Duration of the sampled part of a chirp in seconds.
    pub fn chirp_time_s(&self) -> f32 {
        self.num_samples_per_chirp as f32 / self.sample_rate_hz as f32
    }

    /// Checks every parameter against the transceiver limits.
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |reason: String| -> Result<(), Error> { Err(Error::Invalid(reason)) };

        if self.rx_mask == 0 || self.rx_mask >> MAX_RX_ANTENNAS != 0 {
            return invalid(format!("rx_mask 0x{:X}", self.rx_mask));
        }
        if self.tx_mask == 0 || self.tx_mask >> MAX_TX_ANTENNAS != 0 {
            return invalid(format!("tx_mask 0x{:X}", self.tx_mask));
        }
        if !(1..=31).contains(&self.tx_power_level) {
            return invalid(format!("tx_power_level {}", self.tx_power_level));
        }
        if !(18..=60).contains(&self.if_gain_db) {
            return invalid(format!("if_gain_dB {}", self.if_gain_db));
        }
        if self.lower_frequency_hz >= self.upper_frequency_hz {
            return invalid(format!(
                "frequency range {}..{}",
                self.lower_frequency_hz, self.upper_frequency_hz
            ));
        }
        if self.num_chirps_per_frame == 0 || self.num_samples_per_chirp == 0 {
            return invalid(format!(
                "frame shape {}x{}",
                self.num_chirps_per_frame, self.num_samples_per_chirp
            ));
        }
        if !(100_000..=2_000_000).contains(&self.sample_rate_hz) {
            return invalid(format!("sample_rate_Hz {}", self.sample_rate_hz));
        }
        if self.chirp_repetition_time_s <= 0.0 || self.chirp_time_s() > self.chirp_repetition_time_s
        {
            return invalid(format!(
                "chirp_repetition_time_s {}",
                self.chirp_repetition_time_s
            ));
        }
        // Frame rate between 0.016 and 100 Hz.
        let frame_time = self.chirp_repetition_time_s * self.num_chirps_per_frame as f32;
        if !(0.01..=62.5).contains(&self.frame_repetition_time_s)
            || self.frame_repetition_time_s < frame_time
        {
            return invalid(format!(
                "frame_repetition_time_s {}",
                self.frame_repetition_time_s
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct FileSingleShape {
    rx_antennas: Vec<u32>,
    tx_antennas: Vec<u32>,
    tx_power_level: u32,
    #[serde(rename = "if_gain_dB")]
    if_gain_db: u32,
    #[serde(rename = "lower_frequency_Hz")]
    lower_frequency_hz: u64,
    #[serde(rename = "upper_frequency_Hz")]
    upper_frequency_hz: u64,
    num_chirps_per_frame: u32,
    num_samples_per_chirp: u32,
    #[serde(rename = "sample_rate_Hz")]
    sample_rate_hz: u32,
    chirp_repetition_time_s: f32,
    frame_repetition_time_s: f32,
}

#[derive(Debug, Default, Deserialize)]
struct FileDevice {
    #[serde(default)]
    uuids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileDeviceConfig {
    fmcw_single_shape: Option<FileSingleShape>,
    fmcw_scene: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct File {
    #[serde(default)]
    device: FileDevice,
    #[serde(default)]
    device_config: FileDeviceConfig,
}

fn antenna_mask(name: &str, antennas: &[u32], max: u32) -> Result<u32, Error> {
    antennas.iter().try_fold(0u32, |mask, &antenna| {
        if antenna == 0 || antenna > max {
            Err(Error::Invalid(format!("{} antenna {}", name, antenna)))
        } else {
            Ok(mask | 1 << (antenna - 1))
        }
    })
}

impl TryFrom<FileSingleShape> for SingleShape {
    type Error = Error;

    fn try_from(file: FileSingleShape) -> Result<Self, Self::Error> {
        let shape = SingleShape {
            rx_mask: antenna_mask("rx", &file.rx_antennas, MAX_RX_ANTENNAS)?,
            tx_mask: antenna_mask("tx", &file.tx_antennas, MAX_TX_ANTENNAS)?,
            tx_power_level: file.tx_power_level,
            if_gain_db: file.if_gain_db,
            lower_frequency_hz: file.lower_frequency_hz,
            upper_frequency_hz: file.upper_frequency_hz,
            num_chirps_per_frame: file.num_chirps_per_frame,
            num_samples_per_chirp: file.num_samples_per_chirp,
            sample_rate_hz: file.sample_rate_hz,
            chirp_repetition_time_s: file.chirp_repetition_time_s,
            frame_repetition_time_s: file.frame_repetition_time_s,
        };
        shape.validate()?;
        Ok(shape)
    }
}

/// Which device to open and how to configure it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configuration {
    /// Acceptable devices, in order of preference.  Empty means any device.
    pub uuids: Vec<Uuid>,
    /// Chirp configuration.
    pub single_shape: SingleShape,
}

impl Configuration {
    /// Reads and parses a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        debug!("loading device configuration from {}", path.display());
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Parses a configuration document.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let file: File = serde_json::from_str(json)?;

        let uuids = file
            .device
            .uuids
            .iter()
            .map(|uuid| Uuid::parse_str(uuid).map_err(|_| Error::InvalidUuid(uuid.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        let single_shape = match file.device_config {
            FileDeviceConfig {
                fmcw_single_shape: Some(shape),
                ..
            } => SingleShape::try_from(shape)?,
            FileDeviceConfig {
                fmcw_scene: Some(_),
                ..
            } => return Err(Error::SceneUnsupported),
            _ => return Err(Error::NoConfiguration),
        };

        Ok(Configuration {
            uuids,
            single_shape,
        })
    }
}
