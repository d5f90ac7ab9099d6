use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{io, thread};

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::buffer::Dequeued;
use crate::convert::{Converter, Source};
use crate::device::Driver;
use crate::format::{Format, FourCC};
use crate::i420::I420Buffer;
use crate::io::arena::Arena;

/// Consumer of converted frames
///
/// Runs on the capture thread. The buffer is reused for the next frame as soon as the callback
/// returns, so copy out whatever has to outlive the call. Errors are logged and counted, they
/// never stop the capture loop.
pub type FrameCallback = Box<dyn FnMut(&FrameInfo, &I420Buffer) -> anyhow::Result<()> + Send>;

/// Capture loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Buffers allocated, not streaming
    Idle,
    /// Worker running
    Streaming,
    /// Quit requested, waiting for the worker
    Draining,
    /// Worker joined and streaming turned off
    Stopped,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Metadata of a delivered frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Driver buffer the frame was captured into
    pub index: u32,
    pub sequence: u32,
    pub timestamp: Duration,
    /// Valid bytes of the source frame
    pub bytes_used: u32,
    /// Pixel format of the source frame
    pub fourcc: FourCC,
}

/// Counters of the capture loop
#[derive(Debug, Default)]
pub struct Stats {
    frames: AtomicU64,
    timeouts: AtomicU64,
    wait_errors: AtomicU64,
    dequeue_errors: AtomicU64,
    conversion_errors: AtomicU64,
    callback_errors: AtomicU64,
    requeue_errors: AtomicU64,
}

/// Point in time copy of [`Stats`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Frames converted and offered to the callback
    pub frames: u64,
    /// Readiness waits that elapsed without a frame
    pub timeouts: u64,
    pub wait_errors: u64,
    pub dequeue_errors: u64,
    pub conversion_errors: u64,
    pub callback_errors: u64,
    pub requeue_errors: u64,
}

impl Stats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            wait_errors: self.wait_errors.load(Ordering::Relaxed),
            dequeue_errors: self.dequeue_errors.load(Ordering::Relaxed),
            conversion_errors: self.conversion_errors.load(Ordering::Relaxed),
            callback_errors: self.callback_errors.load(Ordering::Relaxed),
            requeue_errors: self.requeue_errors.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames, {} timeouts, {} wait errors, {} dequeue errors, {} conversion errors, {} callback errors, {} requeue errors",
            self.frames,
            self.timeouts,
            self.wait_errors,
            self.dequeue_errors,
            self.conversion_errors,
            self.callback_errors,
            self.requeue_errors
        )
    }
}

/// What the worker hands back when it is joined
pub struct Parts {
    pub frame: I420Buffer,
    pub converter: Box<dyn Converter>,
}

/// The capture loop: wait, dequeue, convert, deliver, requeue
pub struct Worker<D: Driver + ?Sized> {
    pub(crate) dev: Arc<D>,
    pub(crate) arena: Arc<Arena<D>>,
    pub(crate) format: Format,
    pub(crate) timeout: Duration,
    pub(crate) quit: Arc<AtomicBool>,
    pub(crate) callback: Arc<Mutex<Option<FrameCallback>>>,
    pub(crate) stats: Arc<Stats>,
    pub(crate) converter: Box<dyn Converter>,
    pub(crate) frame: I420Buffer,
}

impl<D: Driver + ?Sized + 'static> Worker<D> {
    /// Runs the loop on a new thread
    pub fn spawn(self) -> io::Result<thread::JoinHandle<Parts>> {
        thread::Builder::new()
            .name("camss-capture".to_string())
            .spawn(move || self.run())
    }
}

impl<D: Driver + ?Sized> Worker<D> {
    /// Loops until the quit flag is raised
    ///
    /// Worst case latency of a quit request is one readiness wait.
    pub fn run(mut self) -> Parts {
        debug!("capture loop started");
        while !self.quit.load(Ordering::Acquire) {
            self.step();
        }
        debug!("capture loop stopped: {}", self.stats.snapshot());

        Parts {
            frame: self.frame,
            converter: self.converter,
        }
    }

    /// One iteration of the loop
    pub fn step(&mut self) {
        let started = Instant::now();
        match self.dev.wait_readable(self.timeout) {
            Ok(true) => {}
            Ok(false) => {
                Stats::bump(&self.stats.timeouts);
                warn!("could not grab image (timeout), trying again");
                return;
            }
            Err(e) => {
                Stats::bump(&self.stats.wait_errors);
                error!("readiness wait failed: {}", e);
                // poll fails immediately while nothing is queued, pace the retries
                if let Some(rest) = self.timeout.checked_sub(started.elapsed()) {
                    thread::sleep(rest);
                }
                return;
            }
        }

        let typ = self.arena.typ();
        let memory = match self.arena.memory() {
            Some(memory) => memory,
            None => return,
        };
        let buf = match self.dev.dequeue(typ, memory) {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                trace!("spurious wakeup");
                return;
            }
            Err(e) => {
                Stats::bump(&self.stats.dequeue_errors);
                error!("VIDIOC_DQBUF failed: {}", e);
                return;
            }
        };

        self.deliver(&buf);

        if let Err(e) = self.arena.queue(buf.index) {
            Stats::bump(&self.stats.requeue_errors);
            error!("VIDIOC_QBUF of buffer {} failed: {}", buf.index, e);
        }
    }

    fn deliver(&mut self, buf: &Dequeued) {
        let payload = match self.arena.record(buf) {
            Some(payload) => payload,
            None => {
                Stats::bump(&self.stats.dequeue_errors);
                error!("driver returned unknown buffer {}", buf.index);
                return;
            }
        };
        trace!(
            "index={} seq={} bytesused={}",
            buf.index,
            buf.sequence,
            buf.bytes_used
        );

        let src = Source::new(
            payload,
            self.format.fourcc,
            self.format.width,
            self.format.height,
            self.format.stride,
        );
        let converter = &mut self.converter;
        let frame = &mut self.frame;
        match panic::catch_unwind(AssertUnwindSafe(|| converter.convert(&src, frame))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                Stats::bump(&self.stats.conversion_errors);
                warn!("dropping frame {}: {}", buf.sequence, e);
                return;
            }
            Err(_) => {
                Stats::bump(&self.stats.conversion_errors);
                error!("converter panicked on frame {}", buf.sequence);
                return;
            }
        }
        Stats::bump(&self.stats.frames);

        let info = FrameInfo {
            index: buf.index,
            sequence: buf.sequence,
            timestamp: buf.timestamp,
            bytes_used: buf.bytes_used,
            fourcc: self.format.fourcc,
        };
        let frame = &self.frame;
        if let Some(callback) = self.callback.lock().as_mut() {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(&info, frame))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    Stats::bump(&self.stats.callback_errors);
                    warn!("frame callback failed: {:#}", e);
                }
                Err(_) => {
                    Stats::bump(&self.stats.callback_errors);
                    error!("frame callback panicked on frame {}", info.sequence);
                }
            }
        }
    }
}
