// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    common::{set_thread_priority, timestamp},
    config::{self, SingleShape},
    msgs::{header, DeviceConfig, RawData, RegisterDump},
    ring::{self, OverflowPolicy, TransferRingBuffer},
};
use edgefirst_schemas::builtin_interfaces::Time;
use ndarray::Array3;
use std::{
    f32::consts::PI,
    fmt, io,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tracing::{debug, error, info, info_span, warn};
use tracy_client::{frame_mark, plot};
use uuid::Uuid;

const SPEED_OF_LIGHT: f32 = 299_792_458.0;

/// Errors reported by a [`FrameSource`].
#[derive(Debug, Clone, PartialEq)]
pub enum SourceError {
    /// The device FIFO overflowed and the frame was lost.  Acquisition
    /// continues with the next frame.
    FifoOverflow,
    /// Any other device failure.  Acquisition stops.
    Device(String),
}

impl std::error::Error for SourceError {}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::fmt::Result {
        match self {
            SourceError::FifoOverflow => write!(f, "fifo overflow"),
            SourceError::Device(err) => write!(f, "device error: {}", err),
        }
    }
}

/// Device handle initialization errors.
#[derive(Debug)]
pub enum Error {
    /// The chirp configuration is invalid.
    Config(config::Error),
    /// A transfer buffer could not be created.
    Ring(ring::Error),
    /// The acquisition thread could not be spawned.
    Spawn(io::Error),
}

impl std::error::Error for Error {}

impl From<config::Error> for Error {
    fn from(err: config::Error) -> Error {
        Error::Config(err)
    }
}

impl From<ring::Error> for Error {
    fn from(err: ring::Error) -> Error {
        Error::Ring(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Spawn(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Config(err) => write!(f, "{}", err),
            Error::Ring(err) => write!(f, "transfer buffer: {}", err),
            Error::Spawn(err) => write!(f, "spawn acquisition thread: {}", err),
        }
    }
}

/// A radar transceiver delivering frames of ADC samples.
pub trait FrameSource: Send {
    /// Identity of the opened device.
    fn uuid(&self) -> Uuid;

    /// The chirp configuration the device was started with.
    fn single_shape(&self) -> &SingleShape;

    /// Blocks until the next frame is captured.  The frame is shaped
    /// `[rx, chirp, sample]`.
    fn next_frame(&mut self) -> Result<Array3<f32>, SourceError>;

    /// Reads back the transceiver registers.
    fn dump_registers(&mut self) -> Result<Vec<u32>, SourceError>;
}

/// A point target seen by [`SimulatedSource`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedTarget {
    /// Distance in meters.
    pub range: f32,
    /// Radial speed in m/s, positive when moving away.
    pub speed: f32,
    /// Azimuth in radians.
    pub azimuth: f32,
}

impl Default for SimulatedTarget {
    fn default() -> Self {
        SimulatedTarget {
            range: 1.5,
            speed: 0.0,
            azimuth: 0.0,
        }
    }
}

/// Synthesizes the IF signal of a single point target, paced at the frame
/// repetition time.  Used when no transceiver is attached.
#[derive(Debug)]
pub struct SimulatedSource {
    uuid: Uuid,
    single_shape: SingleShape,
    target: SimulatedTarget,
    paced: bool,
    frame: u64,
    deadline: Option<Instant>,
}

impl SimulatedSource {
    /// Creates a paced source.  Fails when `single_shape` does not validate.
    pub fn new(
        single_shape: SingleShape,
        target: SimulatedTarget,
    ) -> Result<Self, config::Error> {
        single_shape.validate()?;

        Ok(SimulatedSource {
            uuid: Uuid::new_v4(),
            single_shape,
            target,
            paced: true,
            frame: 0,
            deadline: None,
        })
    }

    /// Overrides the randomly generated identity.
    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = uuid;
        self
    }

    /// Disables frame pacing; frames are generated as fast as requested.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    fn wait_for_frame(&mut self) -> Result<(), SourceError> {
        let period = Duration::from_secs_f32(self.single_shape.frame_repetition_time_s);
        let now = Instant::now();
        let deadline = *self.deadline.get_or_insert(now);

        if now > deadline + period {
            // The previous frame was not collected in time, the device FIFO
            // would have overflowed.
            self.deadline = Some(now + period);
            return Err(SourceError::FifoOverflow);
        }

        if deadline > now {
            thread::sleep(deadline - now);
        }
        self.deadline = Some(deadline + period);
        Ok(())
    }
}

impl FrameSource for SimulatedSource {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn single_shape(&self) -> &SingleShape {
        &self.single_shape
    }

    fn next_frame(&mut self) -> Result<Array3<f32>, SourceError> {
        if self.paced {
            self.wait_for_frame()?;
        }

        let shape = &self.single_shape;
        let center = (shape.lower_frequency_hz + shape.upper_frequency_hz) as f32 / 2.0;
        let wavelength = SPEED_OF_LIGHT / center;
        let slope = shape.bandwidth_hz() as f32 / shape.chirp_time_s();
        let beat = 2.0 * self.target.range * slope / SPEED_OF_LIGHT;
        let doppler = 4.0 * PI * self.target.speed * shape.chirp_repetition_time_s / wavelength;
        // Half wavelength antenna spacing.
        let angle = PI * self.target.azimuth.sin();
        let frame_time = self.frame as f32 * shape.num_chirps_per_frame as f32;
        let fs = shape.sample_rate_hz as f32;

        let dim = (
            shape.num_rx(),
            shape.num_chirps_per_frame as usize,
            shape.num_samples_per_chirp as usize,
        );
        let frame = Array3::from_shape_fn(dim, |(rx, chirp, sample)| {
            let phase = 2.0 * PI * beat * sample as f32 / fs
                + doppler * (frame_time + chirp as f32)
                + angle * rx as f32;
            0.5 + 0.25 * phase.cos()
        });

        self.frame += 1;
        Ok(frame)
    }

    fn dump_registers(&mut self) -> Result<Vec<u32>, SourceError> {
        let shape = &self.single_shape;
        let registers = [
            shape.rx_mask,
            shape.tx_mask,
            shape.tx_power_level,
            shape.if_gain_db,
            shape.num_samples_per_chirp,
            shape.num_chirps_per_frame,
            self.frame as u32,
        ];

        // Address in the upper 7 bits, 24 bits of data.
        Ok(registers
            .iter()
            .enumerate()
            .map(|(addr, value)| (addr as u32) << 25 | (value & 0x00FF_FFFF))
            .collect())
    }
}

/// Acquisition settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Frame id carried in every published header.
    pub frame_id: String,
    /// Also read back the registers after every frame.
    pub dump_register: bool,
    /// Capacity of each transfer buffer.
    pub capacity: usize,
    /// What the acquisition thread does when a buffer is full.
    pub policy: OverflowPolicy,
    /// Run the acquisition thread under the real-time scheduler.
    pub realtime: bool,
    /// Emit Tracy frame marks and plots.  Requires a running Tracy client.
    pub tracy: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            frame_id: "radar".to_string(),
            dump_register: false,
            capacity: 64,
            policy: OverflowPolicy::Block,
            realtime: false,
            tracy: false,
        }
    }
}

type RawBuffer = Arc<TransferRingBuffer<Box<RawData>>>;
type ConfigBuffer = Arc<TransferRingBuffer<Box<DeviceConfig>>>;
type RegisterBuffer = Arc<TransferRingBuffer<Box<RegisterDump>>>;

#[derive(Debug, Default)]
struct Counters {
    frames: AtomicU64,
    overflows: AtomicU64,
}

/// Owns the acquisition thread and the transfer buffers it fills.
///
/// The configuration frame is queued once at startup.  Raw data (and
/// register dumps if enabled) are queued for every captured frame.  When
/// acquisition ends, for whatever reason, every buffer is closed so the
/// publishers drain and exit.
pub struct DeviceHandle {
    raw: RawBuffer,
    config: ConfigBuffer,
    registers: Option<RegisterBuffer>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceHandle {
    /// Validates the configuration, queues it and starts acquisition.
    pub fn init<S>(source: S, settings: &Settings) -> Result<Self, Error>
    where
        S: FrameSource + 'static,
    {
        source.single_shape().validate()?;

        let raw = Arc::new(TransferRingBuffer::with_policy(
            settings.capacity,
            settings.policy,
        )?);
        let config = Arc::new(TransferRingBuffer::new(settings.capacity)?);
        let registers = match settings.dump_register {
            true => Some(Arc::new(TransferRingBuffer::with_policy(
                settings.capacity,
                settings.policy,
            )?)),
            false => None,
        };

        let stamp = timestamp().unwrap_or(Time { sec: 0, nanosec: 0 });
        let device_config = DeviceConfig {
            header: header(&stamp, &settings.frame_id),
            device_uuid: source.uuid().to_string(),
            single_shape: source.single_shape().clone(),
        };
        config
            .try_push(Box::new(device_config))
            .map_err(|_| Error::Ring(ring::Error::Closed))?;

        info!(
            "radar device {} configured: rx_mask=0x{:X} chirps={} samples={} frame_time={}s",
            source.uuid(),
            source.single_shape().rx_mask,
            source.single_shape().num_chirps_per_frame,
            source.single_shape().num_samples_per_chirp,
            source.single_shape().frame_repetition_time_s
        );

        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(Counters::default());
        let acquisition = Acquisition {
            source,
            frame_id: settings.frame_id.clone(),
            realtime: settings.realtime,
            tracy: settings.tracy,
            raw: raw.clone(),
            config: config.clone(),
            registers: registers.clone(),
            running: running.clone(),
            counters: counters.clone(),
        };

        let thread = thread::Builder::new()
            .name("acquire".to_string())
            .spawn(move || acquisition.run())?;

        debug!("DeviceHandle::init succeed");

        Ok(DeviceHandle {
            raw,
            config,
            registers,
            running,
            counters,
            thread: Some(thread),
        })
    }

    /// Buffer receiving one raw data frame per capture.
    pub fn raw_buffer(&self) -> RawBuffer {
        self.raw.clone()
    }

    /// Buffer holding the startup configuration.
    pub fn config_buffer(&self) -> ConfigBuffer {
        self.config.clone()
    }

    /// Present only when register dumps were requested.
    pub fn register_buffer(&self) -> Option<RegisterBuffer> {
        self.registers.clone()
    }

    /// Whether the acquisition thread is still capturing.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Frames captured and queued.
    pub fn frames(&self) -> u64 {
        self.counters.frames.load(Ordering::Relaxed)
    }

    /// Frames lost to device FIFO overflows.
    pub fn overflows(&self) -> u64 {
        self.counters.overflows.load(Ordering::Relaxed)
    }

    /// Stops acquisition, closes the buffers and joins the acquisition
    /// thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.close_buffers();

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("acquisition thread panicked");
            }
        }
    }

    fn close_buffers(&self) {
        self.raw.close();
        self.config.close();
        if let Some(registers) = &self.registers {
            registers.close();
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Acquisition<S> {
    source: S,
    frame_id: String,
    realtime: bool,
    tracy: bool,
    raw: RawBuffer,
    config: ConfigBuffer,
    registers: Option<RegisterBuffer>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl<S: FrameSource> Acquisition<S> {
    fn run(mut self) {
        debug!("acquisition start");
        if self.realtime {
            set_thread_priority(10);
        }

        while self.running.load(Ordering::SeqCst) {
            if !self.capture() {
                break;
            }
        }

        self.running.store(false, Ordering::SeqCst);
        self.raw.close();
        self.config.close();
        if let Some(registers) = &self.registers {
            registers.close();
        }
        debug!("acquisition stopped");
    }

    /// Captures one frame.  Returns false when acquisition must stop.
    fn capture(&mut self) -> bool {
        let frame = match self.source.next_frame() {
            Ok(frame) => frame,
            Err(SourceError::FifoOverflow) => {
                self.counters.overflows.fetch_add(1, Ordering::Relaxed);
                warn!("radar device FIFO overflow");
                return true;
            }
            Err(err) => {
                error!("radar device {}", err);
                return false;
            }
        };

        let stamp = timestamp().unwrap_or(Time { sec: 0, nanosec: 0 });
        let raw = info_span!("raw_data").in_scope(|| {
            Box::new(RawData::from_frame(header(&stamp, &self.frame_id), &frame))
        });

        if self.raw.push(raw).is_err() {
            debug!("raw data buffer closed");
            return false;
        }
        self.counters.frames.fetch_add(1, Ordering::Relaxed);

        if self.tracy {
            frame_mark();
            plot!("raw data buffer", self.raw.len() as f64);
        }

        if let Some(registers) = &self.registers {
            match self.source.dump_registers() {
                Ok(values) => {
                    let dump = Box::new(RegisterDump {
                        header: header(&stamp, &self.frame_id),
                        values,
                    });
                    if registers.push(dump).is_err() {
                        debug!("register dump buffer closed");
                        return false;
                    }
                }
                Err(err) => warn!("register dump failed: {}", err),
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Scripted {
        uuid: Uuid,
        single_shape: SingleShape,
        script: VecDeque<Result<f32, SourceError>>,
    }

    impl Scripted {
        fn new(script: Vec<Result<f32, SourceError>>) -> Self {
            let single_shape = SingleShape {
                rx_mask: 0b011,
                num_chirps_per_frame: 2,
                num_samples_per_chirp: 4,
                ..Default::default()
            };
            Scripted {
                uuid: Uuid::new_v4(),
                single_shape,
                script: script.into(),
            }
        }
    }

    impl FrameSource for Scripted {
        fn uuid(&self) -> Uuid {
            self.uuid
        }

        fn single_shape(&self) -> &SingleShape {
            &self.single_shape
        }

        fn next_frame(&mut self) -> Result<Array3<f32>, SourceError> {
            match self.script.pop_front() {
                Some(Ok(value)) => Ok(Array3::from_elem((2, 2, 4), value)),
                Some(Err(err)) => Err(err),
                None => Err(SourceError::Device("end of script".to_string())),
            }
        }

        fn dump_registers(&mut self) -> Result<Vec<u32>, SourceError> {
            Ok(vec![0xA5, self.script.len() as u32])
        }
    }

    fn drain<T>(buffer: &TransferRingBuffer<T>) -> Vec<T> {
        let mut items = Vec::new();
        while let Ok(item) = buffer.pop() {
            items.push(item);
        }
        items
    }

    #[test]
    fn test_acquisition() {
        let source = Scripted::new(vec![
            Ok(1.0),
            Err(SourceError::FifoOverflow),
            Ok(2.0),
            Ok(3.0),
        ]);
        let uuid = source.uuid;
        let handle = DeviceHandle::init(source, &Settings::default()).unwrap();
        assert!(handle.register_buffer().is_none());

        // The script ends with a device error which closes the buffers.
        let frames = drain(&handle.raw_buffer());
        assert_eq!(frames.len(), 3);
        for (frame, value) in frames.iter().zip([1.0, 2.0, 3.0]) {
            assert_eq!(frame.header.frame_id, "radar");
            assert_eq!(frame.num_rx, 2);
            assert_eq!(frame.num_chirps_per_frame, 2);
            assert_eq!(frame.num_samples_per_chirp, 4);
            assert!(frame.data.iter().all(|v| *v == value));
        }

        let configs = drain(&handle.config_buffer());
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].device_uuid, uuid.to_string());
        assert_eq!(configs[0].single_shape.rx_mask, 0b011);

        assert_eq!(handle.frames(), 3);
        assert_eq!(handle.overflows(), 1);
        assert!(!handle.is_running());
    }

    #[test]
    fn test_register_dump() {
        let source = Scripted::new(vec![Ok(1.0), Ok(2.0)]);
        let settings = Settings {
            dump_register: true,
            frame_id: "bgt60".to_string(),
            ..Default::default()
        };
        let handle = DeviceHandle::init(source, &settings).unwrap();

        let dumps = drain(&handle.register_buffer().unwrap());
        assert_eq!(dumps.len(), 2);
        assert_eq!(dumps[0].header.frame_id, "bgt60");
        assert_eq!(dumps[0].values, vec![0xA5, 1]);
        assert_eq!(dumps[1].values, vec![0xA5, 0]);
        assert_eq!(drain(&handle.raw_buffer()).len(), 2);
    }

    #[test]
    fn test_invalid_settings() {
        let settings = Settings {
            capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            DeviceHandle::init(Scripted::new(vec![]), &settings),
            Err(Error::Ring(ring::Error::InvalidCapacity(0)))
        ));

        let mut source = Scripted::new(vec![]);
        source.single_shape.rx_mask = 0;
        assert!(matches!(
            DeviceHandle::init(source, &Settings::default()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_stop_unblocks_producer() {
        let source = SimulatedSource::new(SingleShape::default(), SimulatedTarget::default())
            .unwrap()
            .unpaced();
        let settings = Settings {
            capacity: 2,
            ..Default::default()
        };
        let mut handle = DeviceHandle::init(source, &settings).unwrap();
        let raw = handle.raw_buffer();

        let start = Instant::now();
        while !raw.is_full() && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(raw.is_full());
        assert!(handle.is_running());

        handle.stop();
        assert!(!handle.is_running());
        assert!(raw.is_closed());
        // The resident frames are still delivered after close.
        assert_eq!(drain(&raw).len(), 2);
    }

    #[test]
    fn test_simulated_source() {
        let single_shape = SingleShape {
            rx_mask: 0b111,
            ..Default::default()
        };
        let uuid = Uuid::new_v4();
        let mut source = SimulatedSource::new(single_shape, SimulatedTarget::default())
            .unwrap()
            .with_uuid(uuid)
            .unpaced();
        assert_eq!(source.uuid(), uuid);

        let frame = source.next_frame().unwrap();
        assert_eq!(frame.dim(), (3, 32, 128));
        assert!(frame.iter().all(|v| (0.25..=0.75).contains(v)));

        let registers = source.dump_registers().unwrap();
        assert_eq!(registers.len(), 7);
        assert_eq!(registers[0], 0b111);
        assert_eq!(registers[6], 6 << 25 | 1);
    }

    #[test]
    fn test_simulated_overflow() {
        let single_shape = SingleShape {
            num_chirps_per_frame: 2,
            frame_repetition_time_s: 0.01,
            ..Default::default()
        };
        let mut source = SimulatedSource::new(single_shape, SimulatedTarget::default()).unwrap();
        source.next_frame().unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(source.next_frame().unwrap_err(), SourceError::FifoOverflow);
        source.next_frame().unwrap();
    }

    #[test]
    fn test_simulated_rejects_invalid_shape() {
        let inverted = SingleShape {
            lower_frequency_hz: 61_500_000_000,
            upper_frequency_hz: 60_500_000_000,
            ..Default::default()
        };
        assert!(matches!(
            SimulatedSource::new(inverted, SimulatedTarget::default()),
            Err(config::Error::Invalid(_))
        ));

        for frame_repetition_time_s in [-1.0, f32::NAN] {
            let single_shape = SingleShape {
                frame_repetition_time_s,
                ..Default::default()
            };
            assert!(matches!(
                SimulatedSource::new(single_shape, SimulatedTarget::default()),
                Err(config::Error::Invalid(_))
            ));
        }
    }
}
