use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::buffer::Type;
use crate::capability::Capabilities;
use crate::config::SessionConfig;
use crate::context;
use crate::convert::{Converter, I420Converter};
use crate::device::{Device, Driver};
use crate::error::{Error, Result};
use crate::format::Format;
use crate::i420::I420Buffer;
use crate::io::arena::Arena;
use crate::io::stream::{Parts, State, Stats, StatsSnapshot, Worker};
use crate::memory::Memory;
use crate::negotiate::{self, Advisory};

pub use crate::io::stream::{FrameCallback, FrameInfo};

/// A capture session on one device
///
/// Opening a session negotiates the format and allocates the buffers, so a session that exists is
/// always ready to [`start`](Session::start). Dropping it stops the capture thread and releases
/// the buffers and the device handle.
///
/// # Example
///
/// ```no_run
/// use camss::Session;
///
/// let mut session = Session::open("/dev/video0", 640, 480, 30)?;
/// session.install_callback(|info, frame| {
///     println!("frame {} ({} bytes)", info.sequence, frame.data().len());
///     Ok(())
/// });
/// session.start()?;
/// std::thread::sleep(std::time::Duration::from_secs(1));
/// session.stop()?;
/// # Ok::<(), camss::Error>(())
/// ```
pub struct Session<D: Driver + ?Sized + 'static = Device> {
    dev: Arc<D>,
    config: SessionConfig,
    caps: Capabilities,
    typ: Type,
    format: Format,
    advisories: Vec<Advisory>,

    arena: Option<Arc<Arena<D>>>,
    /// I420 frame and converter, `None` while lent to the capture thread
    parts: Option<Parts>,
    callback: Arc<Mutex<Option<FrameCallback>>>,
    stats: Arc<Stats>,
    quit: Arc<AtomicBool>,
    worker: Option<JoinHandle<Parts>>,
    state: State,
    /// STREAMOFF hands every buffer back, they need queueing before the next STREAMON
    requeue: bool,
}

impl Session<Device> {
    /// Opens a device by name or path and prepares it for capture
    ///
    /// # Arguments
    ///
    /// * `name` - Card name prefix as reported by the driver, or a device node path
    /// * `width` - Requested frame width, the driver may adjust it
    /// * `height` - Requested frame height, the driver may adjust it
    /// * `fps` - Requested frame rate
    pub fn open(name: &str, width: u32, height: u32, fps: u32) -> Result<Self> {
        Self::open_with(SessionConfig::new(name, width, height, fps))
    }

    /// Opens the device named in `config` and prepares it for capture
    pub fn open_with(config: SessionConfig) -> Result<Self> {
        let path = context::find_by_name(&config.device).ok_or_else(|| {
            error!("no video device matches '{}'", config.device);
            Error::OpenFail {
                device: config.device.clone(),
                source: None,
            }
        })?;

        let dev = Device::with_path(&path).map_err(|e| {
            error!("failed to open {}: {}", path.display(), e);
            Error::OpenFail {
                device: config.device.clone(),
                source: Some(e),
            }
        })?;
        info!("opened {} for '{}'", path.display(), config.device);

        Self::with_driver(Arc::new(dev), config)
    }
}

impl<D: Driver + ?Sized + 'static> Session<D> {
    /// Prepares an already opened device for capture
    ///
    /// Negotiates the format, frame rate and controls, then allocates `config.buffer_count`
    /// buffers. On failure everything acquired so far is released before returning.
    pub fn with_driver(dev: Arc<D>, config: SessionConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(Error::BadParam(format!(
                "invalid frame size {}x{}",
                config.width, config.height
            )));
        }

        let (negotiated, advisories) = negotiate::configure(&*dev, &config)?;
        let format = negotiated.format;
        debug!(
            "{}: {} stride {} size {}",
            negotiated.typ, format, format.stride, format.size
        );

        let frame = I420Buffer::with_size(format.width, format.height)?;
        let arena = Arena::allocate(dev.clone(), negotiated.typ, config.buffer_count, format.size)?;

        Ok(Session {
            dev,
            config,
            caps: negotiated.caps,
            typ: negotiated.typ,
            format,
            advisories,
            arena: Some(Arc::new(arena)),
            parts: Some(Parts {
                frame,
                converter: Box::new(I420Converter::new()),
            }),
            callback: Arc::new(Mutex::new(None)),
            stats: Arc::new(Stats::default()),
            quit: Arc::new(AtomicBool::new(false)),
            worker: None,
            state: State::Idle,
            requeue: false,
        })
    }

    /// Sets the consumer of converted frames, replacing any previous one
    ///
    /// Takes effect with the next frame, also while streaming.
    pub fn install_callback<F>(&self, callback: F)
    where
        F: FnMut(&FrameInfo, &I420Buffer) -> anyhow::Result<()> + Send + 'static,
    {
        *self.callback.lock() = Some(Box::new(callback));
    }

    /// Removes the consumer, frames are still captured and converted
    pub fn clear_callback(&self) {
        *self.callback.lock() = None;
    }

    /// Replaces the conversion routine
    pub fn set_converter(&mut self, converter: Box<dyn Converter>) -> Result<()> {
        match self.parts.as_mut() {
            Some(parts) if self.worker.is_none() => {
                parts.converter = converter;
                Ok(())
            }
            _ => Err(Error::BadParam(
                "converter cannot change while streaming".to_string(),
            )),
        }
    }

    /// Turns streaming on and spawns the capture thread
    ///
    /// Does nothing if the session is already streaming.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            debug!("already streaming");
            return Ok(());
        }

        let arena = self.arena.clone().ok_or(Error::NoBuffers {
            requested: self.config.buffer_count,
            granted: 0,
        })?;
        if self.requeue {
            if let Err(e) = arena.queue_all() {
                // STREAMOFF dequeues whatever made it in, so the next start queues from scratch
                if let Err(e) = self.dev.stream_off(self.typ) {
                    warn!("VIDIOC_STREAMOFF failed: {}", e);
                }
                return Err(e);
            }
            self.requeue = false;
        }

        let parts = match self.parts.take() {
            Some(parts) => parts,
            None => Parts {
                frame: I420Buffer::with_size(self.format.width, self.format.height)?,
                converter: Box::new(I420Converter::new()),
            },
        };

        if let Err(e) = self.dev.stream_on(self.typ) {
            self.parts = Some(parts);
            return Err(Error::api("VIDIOC_STREAMON", e));
        }

        self.quit.store(false, Ordering::Release);
        let worker = Worker {
            dev: self.dev.clone(),
            arena,
            format: self.format,
            timeout: self.config.wait_timeout(),
            quit: self.quit.clone(),
            callback: self.callback.clone(),
            stats: self.stats.clone(),
            converter: parts.converter,
            frame: parts.frame,
        };

        match worker.spawn() {
            Ok(handle) => {
                self.worker = Some(handle);
                self.state = State::Streaming;
                info!(
                    "streaming {} at {}x{}",
                    self.format.fourcc, self.format.width, self.format.height
                );
                Ok(())
            }
            Err(e) => {
                error!("failed to spawn the capture thread: {}", e);
                if let Err(e) = self.dev.stream_off(self.typ) {
                    warn!("VIDIOC_STREAMOFF failed: {}", e);
                }
                self.requeue = true;
                Err(Error::api("thread spawn", e))
            }
        }
    }

    /// Stops the capture thread and turns streaming off
    ///
    /// Returns once the thread has exited; no buffer is touched by the session after that until the
    /// next start. Stopping a session that is not streaming is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        let handle = match self.worker.take() {
            Some(handle) => handle,
            None => return Ok(()),
        };

        self.state = State::Draining;
        self.quit.store(true, Ordering::Release);
        match handle.join() {
            Ok(parts) => self.parts = Some(parts),
            Err(_) => error!("capture thread panicked"),
        }

        self.requeue = true;
        self.state = State::Stopped;
        info!("stopped: {}", self.stats.snapshot());

        self.dev
            .stream_off(self.typ)
            .map_err(|e| Error::api("VIDIOC_STREAMOFF", e))
    }

    /// Replaces the current buffers with `count` new ones
    pub fn allocate(&mut self, count: u32) -> Result<()> {
        if self.worker.is_some() {
            return Err(Error::BadParam(
                "buffers cannot change while streaming".to_string(),
            ));
        }

        self.free()?;
        let arena = Arena::allocate(self.dev.clone(), self.typ, count, self.format.size)?;
        self.arena = Some(Arc::new(arena));
        self.config.buffer_count = count;
        self.requeue = false;
        self.state = State::Idle;
        Ok(())
    }

    /// Stops streaming if needed and releases all buffers
    ///
    /// Safe to call repeatedly.
    pub fn free(&mut self) -> Result<()> {
        self.stop()?;

        let arena = match self.arena.take() {
            Some(arena) => arena,
            None => return Ok(()),
        };
        match Arc::try_unwrap(arena) {
            Ok(mut arena) => arena.release(),
            // the last owner releases on drop
            Err(_) => Ok(()),
        }
    }

    /// Stops the session, releases all buffers and closes the device
    pub fn close(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        let stopped = self.stop();
        let freed = self.free();
        stopped.and(freed)
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn format(&self) -> &Format {
        &self.format
    }

    pub fn buffer_type(&self) -> Type {
        self.typ
    }

    /// Memory strategy of the current buffers
    pub fn memory(&self) -> Option<Memory> {
        self.arena.as_ref().and_then(|arena| arena.memory())
    }

    pub fn buffer_count(&self) -> usize {
        self.arena.as_ref().map_or(0, |arena| arena.len())
    }

    /// Setup steps that failed without aborting the session
    pub fn advisories(&self) -> &[Advisory] {
        &self.advisories
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.dev
    }
}

impl<D: Driver + ?Sized + 'static> Drop for Session<D> {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!("session teardown failed: {}", e);
        }
    }
}
