// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! BGT60Pub Library
//!
//! This library streams raw frames from Infineon BGT60 FMCW radar
//! transceivers to the EdgeFirst Perception Middleware via Zenoh.
//!
//! # Features
//!
//! - **Transfer Ring Buffer** - Bounded single-producer single-consumer
//!   hand-off which moves frames between threads without copying
//! - **Stream Publisher** - Dedicated thread draining a buffer into a sink
//! - **Device Handle** - Frame acquisition thread and its output buffers
//! - **Configuration** - JSON device configuration files
//! - **Zenoh Publishing** - ROS2-compatible CDR message publishing

#![deny(missing_docs)]

/// Bounded transfer buffer between the acquisition and publisher threads
pub mod ring;

/// Publisher thread draining a transfer buffer into a sink
pub mod publisher;

/// Published message types
pub mod msgs;

/// Device configuration files
pub mod config;

/// Frame sources and the acquisition thread
pub mod device;

/// Zenoh sink
#[cfg(feature = "zenoh")]
pub mod sink;

/// Common types and utilities
pub mod common;

/// Version of this library.
pub fn sdk_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
