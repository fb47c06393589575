// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::Args;
use bgt60pub::{
    common::timestamp,
    config::Configuration,
    device::{DeviceHandle, FrameSource, Settings, SimulatedSource, SimulatedTarget},
    msgs::{header, DeviceConfig, Message, RawData, RegisterDump},
    publisher::StreamPublisher,
    sdk_version,
    sink::ZenohSink,
};
use clap::Parser;
use edgefirst_schemas::builtin_interfaces::Time;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};
use tracing_subscriber::{layer::SubscriberExt as _, Layer as _, Registry};
use zenoh::{
    bytes::{Encoding, ZBytes},
    Session,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[cfg(feature = "profiling")]
#[global_allocator]
static GLOBAL: tracy_client::ProfiledAllocator<std::alloc::System> =
    tracy_client::ProfiledAllocator::new(std::alloc::System, 100);

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    args.tracy.then(tracy_client::Client::start);

    let stdout_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_filter(args.rust_log);

    let journald = match tracing_journald::layer() {
        Ok(journald) => Some(journald.with_filter(args.rust_log)),
        Err(_) => None,
    };

    let tracy = match args.tracy {
        true => Some(tracing_tracy::TracyLayer::default().with_filter(args.rust_log)),
        false => None,
    };

    let subscriber = Registry::default()
        .with(stdout_log)
        .with(journald)
        .with(tracy);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;

    info!("bgt60pub {}", sdk_version());

    let configuration = match &args.device_config {
        Some(path) => Configuration::load(path)?,
        None => {
            info!("no device configuration given, using the default single shape");
            Configuration::default()
        }
    };

    let target = SimulatedTarget {
        range: args.target_range,
        speed: args.target_speed,
        ..Default::default()
    };
    let mut source = SimulatedSource::new(configuration.single_shape.clone(), target)?;
    if let Some(uuid) = configuration.uuids.first() {
        source = source.with_uuid(*uuid);
    }
    let device_uuid = source.uuid();

    let session = zenoh::open(args.clone()).await?;

    let settings = Settings {
        frame_id: args.frame_id.clone(),
        dump_register: args.dump_register,
        capacity: args.buffer_capacity,
        policy: args.overflow,
        realtime: args.realtime,
        tracy: args.tracy,
    };
    let mut handle = DeviceHandle::init(source, &settings)?;

    let mut config_publisher = StreamPublisher::new("config");
    config_publisher.init(
        ZenohSink::<DeviceConfig>::new(&session, &args.config_topic)?,
        handle.config_buffer(),
    )?;

    let mut raw_publisher = StreamPublisher::new("raw_data");
    raw_publisher.init(
        ZenohSink::<RawData>::new(&session, &args.raw_topic)?,
        handle.raw_buffer(),
    )?;

    let mut register_publisher = match handle.register_buffer() {
        Some(buffer) => {
            let mut publisher = StreamPublisher::new("register_dump");
            publisher.init(
                ZenohSink::<RegisterDump>::new(&session, &args.register_topic)?,
                buffer,
            )?;
            Some(publisher)
        }
        None => None,
    };

    let stamp = timestamp().unwrap_or(Time { sec: 0, nanosec: 0 });
    let config_msg = DeviceConfig {
        header: header(&stamp, &args.frame_id),
        device_uuid: device_uuid.to_string(),
        single_shape: configuration.single_shape.clone(),
    };
    let config_session = session.clone();
    let config_topic = args.config_topic.clone();
    let config_task = tokio::spawn(async move {
        if let Err(err) = device_config(config_session, config_topic, config_msg).await {
            error!("device config publish error: {}", err);
        }
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interval = tokio::time::interval(Duration::from_millis(100));

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                if let Err(err) = res {
                    error!("unable to listen for shutdown signal: {}", err);
                }
                info!("shutting down");
                break;
            }
            _ = interval.tick() => {
                if !handle.is_running() {
                    warn!("acquisition stopped");
                    break;
                }
            }
        }
    }

    config_task.abort();
    handle.stop();
    info!(
        "captured {} frames, {} lost to device FIFO overflows, {} dropped by transfer buffer",
        handle.frames(),
        handle.overflows(),
        handle.raw_buffer().dropped()
    );

    raw_publisher.stop();
    config_publisher.stop();
    if let Some(publisher) = &mut register_publisher {
        publisher.stop();
    }

    report(&raw_publisher);
    report(&config_publisher);
    if let Some(publisher) = &register_publisher {
        report(publisher);
    }

    Ok(())
}

fn report<T: Send + 'static>(publisher: &StreamPublisher<T>) {
    info!(
        "{}: published {} failed {}",
        publisher.name(),
        publisher.published(),
        publisher.failed()
    );
}

/// Republishes the device configuration every second for late subscribers.
async fn device_config(
    session: Session,
    topic: String,
    mut msg: DeviceConfig,
) -> Result<(), BoxError> {
    let enc = Encoding::APPLICATION_CDR.with_schema(DeviceConfig::SCHEMA);
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    // The first configuration goes out through the transfer buffer.
    interval.tick().await;

    loop {
        interval.tick().await;
        msg.header.stamp = timestamp()?;
        let payload = ZBytes::from(msg.to_cdr()?);
        let span = info_span!("device_config_publish");
        async { session.put(&topic, payload).encoding(enc.clone()).await }
            .instrument(span)
            .await?;
    }
}
