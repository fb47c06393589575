// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::ring::TransferRingBuffer;
use std::{
    fmt, io,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};
use tracing::{debug, error, info_span, trace};

/// Opaque error reported by a [`Sink`] for a single frame.
pub type PublishError = Box<dyn std::error::Error + Send + Sync>;

/// Messaging endpoint which receives the frames drained by a
/// [`StreamPublisher`].
///
/// `publish` is only ever called from the publisher thread and never while
/// the transfer buffer is locked, so a slow sink stalls delivery but not the
/// producer.
pub trait Sink<T>: Send {
    /// Deliver one frame.  A failure is reported and the frame discarded;
    /// delivery continues with the next frame.
    fn publish(&mut self, item: T) -> Result<(), PublishError>;

    /// Whether the endpoint is usable.  Checked once by
    /// [`StreamPublisher::init`].
    fn ready(&self) -> bool {
        true
    }

    /// Name of the endpoint (topic) used in log messages.
    fn target(&self) -> &str;
}

/// Publisher initialization errors.
#[derive(Debug)]
pub enum InitError {
    /// `init` already succeeded once on this publisher.
    AlreadyRunning,
    /// The sink reported it is not usable.
    InvalidSink(String),
    /// The publisher thread could not be spawned.
    Spawn(io::Error),
}

impl std::error::Error for InitError {}

impl From<io::Error> for InitError {
    fn from(err: io::Error) -> InitError {
        InitError::Spawn(err)
    }
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::fmt::Result {
        match self {
            InitError::AlreadyRunning => write!(f, "publisher already initialized"),
            InitError::InvalidSink(target) => write!(f, "invalid sink: {}", target),
            InitError::Spawn(err) => write!(f, "spawn publisher thread: {}", err),
        }
    }
}

/// Publisher lifecycle.  `Stopped` is terminal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// Created, `init` not called yet.
    Uninitialized,
    /// The publisher thread was spawned.
    Running,
    /// Stopped and joined.
    Stopped,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    failed: AtomicU64,
}

/// Drains a [`TransferRingBuffer`] on a dedicated thread and forwards each
/// frame to a [`Sink`].
///
/// Dropping the publisher closes the buffer and joins the thread.  Frames
/// still resident at that point are delivered before the thread exits.
pub struct StreamPublisher<T: Send + 'static> {
    name: String,
    state: State,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    buffer: Option<Arc<TransferRingBuffer<T>>>,
    thread: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> StreamPublisher<T> {
    /// Creates an idle publisher.  `name` also names the publisher thread.
    pub fn new(name: impl Into<String>) -> Self {
        StreamPublisher {
            name: name.into(),
            state: State::Uninitialized,
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            buffer: None,
            thread: None,
        }
    }

    /// Starts draining `buffer` into `sink`.
    ///
    /// Returns once the publisher thread is spawned, not once it has
    /// published anything.
    pub fn init<S>(&mut self, sink: S, buffer: Arc<TransferRingBuffer<T>>) -> Result<(), InitError>
    where
        S: Sink<T> + 'static,
    {
        if self.state != State::Uninitialized {
            return Err(InitError::AlreadyRunning);
        }

        if !sink.ready() {
            return Err(InitError::InvalidSink(sink.target().to_string()));
        }

        let target = sink.target().to_string();
        let consumer = PublishLoop {
            name: self.name.clone(),
            buffer: buffer.clone(),
            sink,
            running: self.running.clone(),
            counters: self.counters.clone(),
        };

        // Set before spawning so a consumer which finds the buffer already
        // closed can clear it without racing this store.
        self.running.store(true, Ordering::SeqCst);

        let thread = match thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || consumer.run())
        {
            Ok(thread) => thread,
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(err.into());
            }
        };

        self.buffer = Some(buffer);
        self.thread = Some(thread);
        self.state = State::Running;

        debug!(
            "initialized {} publisher with target {} and capacity {}",
            self.name,
            target,
            self.buffer.as_ref().map_or(0, |b| b.capacity())
        );

        Ok(())
    }

    /// Whether the publisher thread is alive and draining.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Name given at construction, also the thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Frames delivered successfully.
    pub fn published(&self) -> u64 {
        self.counters.published.load(Ordering::Relaxed)
    }

    /// Frames the sink failed to deliver.
    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }

    /// Closes the buffer, waits for the resident frames to be published and
    /// joins the publisher thread.
    pub fn stop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            buffer.close();
        }

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("{} publisher thread panicked", self.name);
            }
        }

        if self.state == State::Running {
            debug!(
                "{} publisher stopped: published={} failed={}",
                self.name,
                self.published(),
                self.failed()
            );
            self.state = State::Stopped;
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

impl<T: Send + 'static> Drop for StreamPublisher<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<T: Send + 'static> fmt::Debug for StreamPublisher<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("StreamPublisher")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("running", &self.is_running())
            .field("published", &self.published())
            .field("failed", &self.failed())
            .finish()
    }
}

struct PublishLoop<T, S> {
    name: String,
    buffer: Arc<TransferRingBuffer<T>>,
    sink: S,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

/// Clears the running flag however the publisher thread exits.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<T, S: Sink<T>> PublishLoop<T, S> {
    fn run(mut self) {
        let _guard = RunningGuard(self.running.clone());

        loop {
            trace!("{} waiting for frame", self.name);
            let item = match self.buffer.pop() {
                Ok(item) => item,
                Err(_) => break,
            };

            let span = info_span!("publish", publisher = %self.name);
            let _entered = span.enter();

            match self.sink.publish(item) {
                Ok(()) => {
                    self.counters.published.fetch_add(1, Ordering::Relaxed);
                    trace!("{} published one frame", self.name);
                }
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!("{} publish error: {}", self.sink.target(), e);
                }
            }
        }

        debug!("{} buffer closed, publisher exiting", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{mpsc, Mutex},
        time::{Duration, Instant},
    };

    struct Recorder {
        items: Arc<Mutex<Vec<u32>>>,
        fail_every: Option<usize>,
        calls: usize,
        ready: bool,
    }

    impl Recorder {
        fn new() -> (Self, Arc<Mutex<Vec<u32>>>) {
            let items = Arc::new(Mutex::new(Vec::new()));
            let recorder = Recorder {
                items: items.clone(),
                fail_every: None,
                calls: 0,
                ready: true,
            };
            (recorder, items)
        }
    }

    impl Sink<u32> for Recorder {
        fn publish(&mut self, item: u32) -> Result<(), PublishError> {
            self.calls += 1;
            if let Some(n) = self.fail_every {
                if self.calls % n == 0 {
                    return Err(format!("rejected frame {}", item).into());
                }
            }
            self.items.lock().unwrap().push(item);
            Ok(())
        }

        fn ready(&self) -> bool {
            self.ready
        }

        fn target(&self) -> &str {
            "test/recorder"
        }
    }

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    #[test]
    fn test_publishes_in_order() {
        let buffer = Arc::new(TransferRingBuffer::new(4).unwrap());
        let (sink, items) = Recorder::new();
        let mut publisher = StreamPublisher::new("ordered");
        assert_eq!(publisher.state(), State::Uninitialized);
        assert!(!publisher.is_running());

        publisher.init(sink, buffer.clone()).unwrap();
        assert_eq!(publisher.state(), State::Running);
        assert!(publisher.is_running());

        for i in 0..100 {
            buffer.push(i).unwrap();
        }
        assert!(wait_for(|| publisher.published() == 100));
        assert_eq!(*items.lock().unwrap(), (0..100).collect::<Vec<_>>());
    }

    /// Holds every frame inside `publish` until `release` is signaled or
    /// dropped.
    struct Gate {
        entered: mpsc::Sender<u32>,
        release: mpsc::Receiver<()>,
        items: Arc<Mutex<Vec<u32>>>,
    }

    impl Sink<u32> for Gate {
        fn publish(&mut self, item: u32) -> Result<(), PublishError> {
            let _ = self.entered.send(item);
            let _ = self.release.recv();
            self.items.lock().unwrap().push(item);
            Ok(())
        }

        fn target(&self) -> &str {
            "test/gate"
        }
    }

    #[test]
    fn test_slow_sink_does_not_block_producer() {
        let buffer = Arc::new(TransferRingBuffer::new(4).unwrap());
        let (entered_tx, entered) = mpsc::channel();
        let (release, release_rx) = mpsc::channel();
        let items = Arc::new(Mutex::new(Vec::new()));
        let sink = Gate {
            entered: entered_tx,
            release: release_rx,
            items: items.clone(),
        };

        let mut publisher = StreamPublisher::new("slow");
        publisher.init(sink, buffer.clone()).unwrap();

        buffer.push(0).unwrap();
        assert_eq!(entered.recv_timeout(Duration::from_secs(5)), Ok(0));

        // The sink holds frame 0, every slot is still available.
        for i in 1..=4 {
            assert!(buffer.try_push(i).is_ok());
        }
        assert!(buffer.is_full());
        assert_eq!(buffer.len(), 4);
        assert!(publisher.is_running());
        assert_eq!(publisher.published(), 0);

        drop(release);
        assert!(wait_for(|| publisher.published() == 5));
        assert_eq!(*items.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_failed_publish_does_not_stop_delivery() {
        let buffer = Arc::new(TransferRingBuffer::new(8).unwrap());
        let (mut sink, items) = Recorder::new();
        sink.fail_every = Some(3);

        let mut publisher = StreamPublisher::new("flaky");
        publisher.init(sink, buffer.clone()).unwrap();

        for i in 0..30 {
            buffer.push(i).unwrap();
        }
        assert!(wait_for(|| publisher.published() + publisher.failed() == 30));

        assert_eq!(publisher.published(), 20);
        assert_eq!(publisher.failed(), 10);
        assert_eq!(items.lock().unwrap().len(), 20);
        assert!(publisher.is_running());

        publisher.stop();
        assert!(!publisher.is_running());
        assert_eq!(publisher.state(), State::Stopped);
    }

    #[test]
    fn test_init_rejects_second_call() {
        let buffer = Arc::new(TransferRingBuffer::new(2).unwrap());
        let mut publisher = StreamPublisher::new("twice");

        publisher.init(Recorder::new().0, buffer.clone()).unwrap();
        assert!(matches!(
            publisher.init(Recorder::new().0, buffer.clone()),
            Err(InitError::AlreadyRunning)
        ));

        publisher.stop();
        assert!(matches!(
            publisher.init(Recorder::new().0, buffer),
            Err(InitError::AlreadyRunning)
        ));
    }

    #[test]
    fn test_init_rejects_unusable_sink() {
        let buffer = Arc::new(TransferRingBuffer::new(2).unwrap());
        let mut publisher = StreamPublisher::new("unusable");

        let (mut sink, _) = Recorder::new();
        sink.ready = false;
        match publisher.init(sink, buffer.clone()) {
            Err(InitError::InvalidSink(target)) => assert_eq!(target, "test/recorder"),
            other => panic!("unexpected init result: {:?}", other),
        }
        assert_eq!(publisher.state(), State::Uninitialized);
        assert!(!publisher.is_running());

        publisher.init(Recorder::new().0, buffer).unwrap();
        assert!(publisher.is_running());
    }

    #[test]
    fn test_stops_when_producer_closes() {
        let buffer = Arc::new(TransferRingBuffer::new(2).unwrap());
        let mut publisher = StreamPublisher::new("closed");
        publisher.init(Recorder::new().0, buffer.clone()).unwrap();

        buffer.close();
        assert!(wait_for(|| !publisher.is_running()));
        // Still Running from the lifecycle point of view until stopped.
        assert_eq!(publisher.state(), State::Running);
        publisher.stop();
        assert_eq!(publisher.state(), State::Stopped);
    }

    #[test]
    fn test_drop_drains_resident_frames() {
        let buffer = Arc::new(TransferRingBuffer::new(8).unwrap());
        for i in 0..5 {
            buffer.push(i).unwrap();
        }

        let (sink, items) = Recorder::new();
        let mut publisher = StreamPublisher::new("drain");
        publisher.init(sink, buffer.clone()).unwrap();
        drop(publisher);

        assert_eq!(*items.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert!(buffer.is_closed());
        assert!(buffer.push(5).is_err());
    }

    #[test]
    fn test_uninitialized_drop() {
        let publisher = StreamPublisher::<u32>::new("idle");
        assert_eq!(publisher.name(), "idle");
        drop(publisher);
    }
}
