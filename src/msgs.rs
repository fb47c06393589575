// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::config::SingleShape;
use cdr::{CdrLe, Infinite};
use edgefirst_schemas::{builtin_interfaces::Time, std_msgs::Header};
use ndarray::{Array3, ArrayView3, ShapeError};
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// A message which can be published as a CDR encoded payload.
pub trait Message: Serialize + Sized + Send + 'static {
    /// ROS2 type name carried in the Zenoh encoding.
    const SCHEMA: &'static str;

    /// Encodes the message as little endian CDR.
    fn to_cdr(&self) -> Result<Vec<u8>, cdr::Error> {
        cdr::serialize::<_, _, CdrLe>(self, Infinite)
    }
}

/// Builds a header for `frame_id` stamped with `stamp`.
pub fn header(stamp: &Time, frame_id: &str) -> Header {
    Header {
        stamp: Time {
            sec: stamp.sec,
            nanosec: stamp.nanosec,
        },
        frame_id: frame_id.to_string(),
    }
}

/// One frame of ADC samples.
///
/// `data` is laid out receive antenna first, then chirp, then sample.
#[derive(Debug, Serialize, Deserialize)]
pub struct RawData {
    /// Capture time and radar frame id.
    pub header: Header,
    /// ADC samples per chirp.
    pub num_samples_per_chirp: u32,
    /// Chirps per frame.
    pub num_chirps_per_frame: u32,
    /// Enabled receive antennas.
    pub num_rx: u32,
    /// Normalized ADC samples.
    pub data: Vec<f32>,
}

impl RawData {
    /// Flattens a `[rx, chirp, sample]` frame.
    #[instrument(skip_all, fields(shape = ?frame.shape()))]
    pub fn from_frame(header: Header, frame: &Array3<f32>) -> Self {
        let (num_rx, num_chirps, num_samples) = frame.dim();
        let data = match frame.as_slice() {
            Some(data) => data.to_vec(),
            None => frame.iter().copied().collect(),
        };

        RawData {
            header,
            num_samples_per_chirp: num_samples as u32,
            num_chirps_per_frame: num_chirps as u32,
            num_rx: num_rx as u32,
            data,
        }
    }

    /// Views the samples as a `[rx, chirp, sample]` array.
    pub fn view(&self) -> Result<ArrayView3<'_, f32>, ShapeError> {
        ArrayView3::from_shape(
            (
                self.num_rx as usize,
                self.num_chirps_per_frame as usize,
                self.num_samples_per_chirp as usize,
            ),
            &self.data,
        )
    }
}

impl Message for RawData {
    const SCHEMA: &'static str = "bgt60_msgs/msg/RawData";
}

/// The chirp configuration the device was started with.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Time the device was configured.
    pub header: Header,
    /// Device identity.
    pub device_uuid: String,
    /// Chirp configuration.
    pub single_shape: SingleShape,
}

impl Message for DeviceConfig {
    const SCHEMA: &'static str = "bgt60_msgs/msg/DeviceConfig";
}

/// Register values read back from the transceiver after a frame.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterDump {
    /// Capture time of the frame the registers were read after.
    pub header: Header,
    /// Register words, address in the upper 7 bits.
    pub values: Vec<u32>,
}

impl Message for RegisterDump {
    const SCHEMA: &'static str = "bgt60_msgs/msg/RegisterDump";
}
