// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use std::path::PathBuf;

use bgt60pub::ring::OverflowPolicy;
use clap::Parser;
use serde_json::json;
use tracing::level_filters::LevelFilter;
use zenoh::config::{Config, WhatAmI};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSON device configuration, the default chirp configuration is used
    /// when not provided.
    #[arg(long, env)]
    pub device_config: Option<PathBuf>,

    /// The name of the radar frame
    #[arg(long, env, default_value = "radar")]
    pub frame_id: String,

    /// Capacity of each transfer buffer in frames.
    #[arg(long, env, default_value = "64")]
    pub buffer_capacity: usize,

    /// What the acquisition thread does when a transfer buffer is full.
    #[arg(long, env, default_value = "block")]
    pub overflow: OverflowPolicy,

    /// Read back and publish the transceiver registers after every frame.
    #[arg(long, env)]
    pub dump_register: bool,

    /// raw data topic name
    #[arg(long, default_value = "rt/radar/raw")]
    pub raw_topic: String,

    /// device configuration topic name
    #[arg(long, default_value = "rt/radar/config")]
    pub config_topic: String,

    /// register dump topic name
    #[arg(long, default_value = "rt/radar/registers")]
    pub register_topic: String,

    /// Range in meters of the target synthesized by the simulated device.
    #[arg(long, env, default_value = "1.5")]
    pub target_range: f32,

    /// Radial speed in m/s of the simulated target.
    #[arg(long, env, default_value = "0")]
    pub target_speed: f32,

    /// Run the acquisition thread with the real-time scheduler.
    #[arg(long, env)]
    pub realtime: bool,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    pub rust_log: LevelFilter,

    /// Enable Tracy profiler broadcast
    #[arg(long, env)]
    pub tracy: bool,

    /// zenoh connection mode
    #[arg(long, env, default_value = "peer")]
    mode: WhatAmI,

    /// connect to zenoh endpoints
    #[arg(long, env)]
    connect: Vec<String>,

    /// listen to zenoh endpoints
    #[arg(long, env)]
    listen: Vec<String>,

    /// disable zenoh multicast scouting
    #[arg(long, env)]
    no_multicast_scouting: bool,
}

impl TryFrom<Args> for Config {
    type Error = Box<dyn std::error::Error + Send + Sync>;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let mut config = Config::default();

        config.insert_json5("mode", &json!(args.mode).to_string())?;

        if !args.connect.is_empty() {
            config.insert_json5("connect/endpoints", &json!(args.connect).to_string())?;
        }

        if !args.listen.is_empty() {
            config.insert_json5("listen/endpoints", &json!(args.listen).to_string())?;
        }

        if args.no_multicast_scouting {
            config.insert_json5("scouting/multicast/enabled", &json!(false).to_string())?;
        }

        config.insert_json5("scouting/multicast/interface", &json!("lo").to_string())?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["bgt60pub"]);
        assert_eq!(args.frame_id, "radar");
        assert_eq!(args.buffer_capacity, 64);
        assert_eq!(args.overflow, OverflowPolicy::Block);
        assert!(!args.dump_register);
        assert_eq!(args.raw_topic, "rt/radar/raw");
        assert_eq!(args.config_topic, "rt/radar/config");
        assert_eq!(args.register_topic, "rt/radar/registers");
        assert!(args.device_config.is_none());
    }

    #[test]
    fn test_overflow_policy() {
        let args = Args::parse_from(["bgt60pub", "--overflow", "drop-oldest", "--dump-register"]);
        assert_eq!(args.overflow, OverflowPolicy::DropOldest);
        assert!(args.dump_register);
        assert!(Args::try_parse_from(["bgt60pub", "--overflow", "newest"]).is_err());
    }

    #[test]
    fn test_zenoh_config() {
        let args = Args::parse_from([
            "bgt60pub",
            "--connect",
            "tcp/127.0.0.1:7447",
            "--no-multicast-scouting",
        ]);
        assert!(Config::try_from(args).is_ok());
    }
}
