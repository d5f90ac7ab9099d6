//! Mock driver for testing without hardware.

use std::collections::{HashMap, HashSet, VecDeque};
use std::os::unix::io::RawFd;
use std::ptr::NonNull;
use std::time::Duration;
use std::{io, thread};

use parking_lot::Mutex;

use crate::buffer::{BufferInfo, Dequeued, Type};
use crate::capability::{Capabilities, Flags};
use crate::control::{self, Control};
use crate::device::Driver;
use crate::format::{Description, Format, FourCC};
use crate::fraction::Fraction;
use crate::memory::{MappedRegion, Memory, SlotMemory};
use crate::parameters::{self, Parameters};

/// Driver requests as seen by the mock, in call order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    RequestBuffers(Memory, u32),
    QueryBuffer(u32),
    Map(u32),
    Unmap(u32),
    Queue(u32),
    Dequeue(u32),
    StreamOn,
    StreamOff,
    Wait,
}

fn einval() -> io::Error {
    io::Error::from_raw_os_error(libc::EINVAL)
}

#[derive(Default)]
struct State {
    format: Option<Format>,
    params: Option<Parameters>,
    controls: HashMap<u32, i32>,

    memory: Option<Memory>,
    granted: u32,
    queued: VecDeque<u32>,
    /// buffer index -> (address, len) the mock may write frames to
    targets: HashMap<u32, (usize, usize)>,
    /// address -> (index, len) of live mappings
    mappings: HashMap<usize, (u32, usize)>,
    streaming: bool,

    frames: VecDeque<Vec<u8>>,
    sequence: u32,
    fail_next_dequeue: bool,
    fail_next_queue: Option<u32>,
    calls: Vec<Call>,
}

/// Mock device for testing without hardware.
pub struct MockDevice {
    caps: Flags,
    formats: Vec<FourCC>,
    rejected_trials: HashSet<FourCC>,
    max_size: Option<(u32, u32)>,
    time_per_frame: bool,
    missing_controls: HashSet<u32>,
    accept_input: bool,
    max_buffers: u32,
    rejected_memory: HashSet<Memory>,
    fail_map_at: Option<u32>,
    fail_queue_at: Option<u32>,
    fail_query_at: Option<u32>,
    fail_wait: bool,
    state: Mutex<State>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// A YUYV capture device that accepts every request
    pub fn new() -> Self {
        MockDevice {
            caps: Flags::VIDEO_CAPTURE | Flags::STREAMING,
            formats: vec![FourCC::YUYV],
            rejected_trials: HashSet::new(),
            max_size: None,
            time_per_frame: true,
            missing_controls: HashSet::new(),
            accept_input: true,
            max_buffers: 32,
            rejected_memory: HashSet::new(),
            fail_map_at: None,
            fail_queue_at: None,
            fail_query_at: None,
            fail_wait: false,
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_caps(mut self, caps: Flags) -> Self {
        self.caps = caps;
        self
    }

    pub fn with_formats(mut self, formats: &[FourCC]) -> Self {
        self.formats = formats.to_vec();
        self
    }

    pub fn reject_trial(mut self, fourcc: FourCC) -> Self {
        self.rejected_trials.insert(fourcc);
        self
    }

    pub fn with_max_size(mut self, width: u32, height: u32) -> Self {
        self.max_size = Some((width, height));
        self
    }

    pub fn without_time_per_frame(mut self) -> Self {
        self.time_per_frame = false;
        self
    }

    pub fn without_control(mut self, id: control::Id) -> Self {
        self.missing_controls.insert(id.0);
        self
    }

    pub fn reject_input(mut self) -> Self {
        self.accept_input = false;
        self
    }

    pub fn with_max_buffers(mut self, count: u32) -> Self {
        self.max_buffers = count;
        self
    }

    pub fn reject_memory(mut self, memory: Memory) -> Self {
        self.rejected_memory.insert(memory);
        self
    }

    pub fn fail_map_at(mut self, index: u32) -> Self {
        self.fail_map_at = Some(index);
        self
    }

    pub fn fail_queue_at(mut self, index: u32) -> Self {
        self.fail_queue_at = Some(index);
        self
    }

    pub fn fail_query_at(mut self, index: u32) -> Self {
        self.fail_query_at = Some(index);
        self
    }

    pub fn fail_wait(mut self) -> Self {
        self.fail_wait = true;
        self
    }

    /// Sets the active format without going through negotiation
    pub fn with_format(self, format: Format) -> Self {
        self.state.lock().format = Some(Self::adjust(format));
        self
    }

    /// Makes a frame available for the next dequeue
    pub fn push_frame(&self, data: Vec<u8>) {
        self.state.lock().frames.push_back(data);
    }

    /// Lets the next dequeue fail once
    pub fn fail_next_dequeue(&self) {
        self.state.lock().fail_next_dequeue = true;
    }

    /// Lets the next queue of `index` fail once
    pub fn fail_next_queue(&self, index: u32) {
        self.state.lock().fail_next_queue = Some(index);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn live_mappings(&self) -> usize {
        self.state.lock().mappings.len()
    }

    pub fn granted(&self) -> u32 {
        self.state.lock().granted
    }

    pub fn queued(&self) -> Vec<u32> {
        self.state.lock().queued.iter().copied().collect()
    }

    pub fn streaming(&self) -> bool {
        self.state.lock().streaming
    }

    pub fn pending_frames(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn last_params(&self) -> Option<Parameters> {
        self.state.lock().params
    }

    /// Fills in stride and size the way a driver does
    fn adjust(mut format: Format) -> Format {
        let canonical = format.fourcc.canonical();
        let packed = canonical == FourCC::YUY2 || canonical == FourCC::UYVY;
        format.stride = if packed { format.width * 2 } else { format.width };
        format.size = if packed {
            format.stride * format.height
        } else {
            format.width * format.height + 2 * ((format.width + 1) / 2) * ((format.height + 1) / 2)
        };
        format
    }

    fn trial(&self, fmt: &Format) -> io::Result<Format> {
        if !self.formats.contains(&fmt.fourcc) || self.rejected_trials.contains(&fmt.fourcc) {
            return Err(einval());
        }

        let mut fmt = *fmt;
        if let Some((width, height)) = self.max_size {
            fmt.width = fmt.width.min(width);
            fmt.height = fmt.height.min(height);
        }
        Ok(Self::adjust(fmt))
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for (addr, (_, len)) in state.mappings.drain() {
            unsafe { drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(addr as *mut u8, len))) };
        }
    }
}

impl Driver for MockDevice {
    fn query_caps(&self) -> io::Result<Capabilities> {
        Ok(Capabilities::new("Mock Camera", self.caps))
    }

    fn set_input(&self, _index: u32) -> io::Result<()> {
        if self.accept_input {
            Ok(())
        } else {
            Err(einval())
        }
    }

    fn enum_formats(&self, _typ: Type) -> io::Result<Vec<Description>> {
        Ok(self
            .formats
            .iter()
            .enumerate()
            .map(|(i, fourcc)| Description::new(i as u32, *fourcc, "mock"))
            .collect())
    }

    fn try_format(&self, _typ: Type, fmt: &Format) -> io::Result<Format> {
        self.trial(fmt)
    }

    fn format(&self, _typ: Type) -> io::Result<Format> {
        self.state.lock().format.ok_or_else(einval)
    }

    fn set_format(&self, _typ: Type, fmt: &Format) -> io::Result<Format> {
        let applied = self.trial(fmt)?;
        self.state.lock().format = Some(applied);
        Ok(applied)
    }

    fn params(&self, _typ: Type) -> io::Result<Parameters> {
        let mut params = self
            .state
            .lock()
            .params
            .unwrap_or_else(|| Parameters::new(Fraction::new(1, 30)));
        params.capabilities = if self.time_per_frame {
            parameters::Capabilities::TIME_PER_FRAME
        } else {
            parameters::Capabilities::empty()
        };
        Ok(params)
    }

    fn set_params(&self, typ: Type, params: &Parameters) -> io::Result<Parameters> {
        self.state.lock().params = Some(*params);
        self.params(typ)
    }

    fn control(&self, id: control::Id) -> io::Result<i32> {
        if self.missing_controls.contains(&id.0) {
            return Err(einval());
        }
        Ok(*self.state.lock().controls.get(&id.0).unwrap_or(&0))
    }

    fn set_control(&self, ctrl: Control) -> io::Result<()> {
        if self.missing_controls.contains(&ctrl.id.0) {
            return Err(einval());
        }
        self.state.lock().controls.insert(ctrl.id.0, ctrl.value);
        Ok(())
    }

    fn request_buffers(&self, _typ: Type, memory: Memory, count: u32) -> io::Result<u32> {
        let mut state = self.state.lock();
        state.calls.push(Call::RequestBuffers(memory, count));
        if self.rejected_memory.contains(&memory) {
            return Err(einval());
        }
        if state.streaming {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }

        state.granted = count.min(self.max_buffers);
        state.memory = if count == 0 { None } else { Some(memory) };
        state.queued.clear();
        state.targets.clear();
        Ok(state.granted)
    }

    fn query_buffer(&self, _typ: Type, _memory: Memory, index: u32) -> io::Result<BufferInfo> {
        let mut state = self.state.lock();
        state.calls.push(Call::QueryBuffer(index));
        if index >= state.granted || self.fail_query_at == Some(index) {
            return Err(einval());
        }
        let length = state.format.map_or(4096, |f| f.size);
        Ok(BufferInfo {
            index,
            length,
            offset: index * 0x1000,
        })
    }

    fn map(&self, info: &BufferInfo) -> io::Result<MappedRegion> {
        let mut state = self.state.lock();
        state.calls.push(Call::Map(info.index));
        if self.fail_map_at == Some(info.index) {
            return Err(io::Error::from_raw_os_error(libc::ENOMEM));
        }

        let len = info.length as usize;
        let raw = Box::into_raw(vec![0u8; len].into_boxed_slice()) as *mut u8;
        state.mappings.insert(raw as usize, (info.index, len));
        let ptr = NonNull::new(raw).ok_or_else(einval)?;
        Ok(unsafe { MappedRegion::from_raw(ptr, len) })
    }

    fn unmap(&self, region: MappedRegion) -> io::Result<()> {
        let mut state = self.state.lock();
        let addr = region.as_ptr() as usize;
        let (index, len) = state.mappings.remove(&addr).ok_or_else(einval)?;
        state.calls.push(Call::Unmap(index));
        unsafe { drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(addr as *mut u8, len))) };
        Ok(())
    }

    fn queue(&self, _typ: Type, index: u32, memory: &SlotMemory) -> io::Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Queue(index));
        if state.fail_next_queue == Some(index) {
            state.fail_next_queue = None;
            return Err(einval());
        }
        if self.fail_queue_at == Some(index)
            || index >= state.granted
            || state.memory != Some(memory.memory())
            || state.queued.contains(&index)
        {
            return Err(einval());
        }

        match memory {
            SlotMemory::Mapped(region) => {
                state.targets.insert(index, (region.as_ptr() as usize, region.len()));
            }
            SlotMemory::User(buf) => {
                state.targets.insert(index, (buf.as_ptr() as usize, buf.len()));
            }
            SlotMemory::Exported(_) => {}
        }
        state.queued.push_back(index);
        Ok(())
    }

    fn dequeue(&self, _typ: Type, _memory: Memory) -> io::Result<Dequeued> {
        let mut state = self.state.lock();
        if !state.streaming {
            return Err(einval());
        }
        if state.fail_next_dequeue {
            state.fail_next_dequeue = false;
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        if state.queued.is_empty() || state.frames.is_empty() {
            return Err(io::Error::from_raw_os_error(libc::EAGAIN));
        }

        let index = state.queued.pop_front().ok_or_else(einval)?;
        let frame = state.frames.pop_front().unwrap_or_default();
        state.calls.push(Call::Dequeue(index));

        let mut bytes_used = frame.len();
        if let Some(&(addr, len)) = state.targets.get(&index) {
            bytes_used = bytes_used.min(len);
            unsafe { std::ptr::copy_nonoverlapping(frame.as_ptr(), addr as *mut u8, bytes_used) };
        }

        let sequence = state.sequence;
        state.sequence += 1;
        Ok(Dequeued {
            index,
            bytes_used: bytes_used as u32,
            sequence,
            timestamp: Duration::from_millis(u64::from(sequence) * 33),
        })
    }

    fn stream_on(&self, _typ: Type) -> io::Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::StreamOn);
        if state.granted == 0 {
            return Err(einval());
        }
        state.streaming = true;
        Ok(())
    }

    fn stream_off(&self, _typ: Type) -> io::Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::StreamOff);
        state.streaming = false;
        state.queued.clear();
        Ok(())
    }

    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        {
            let mut state = self.state.lock();
            state.calls.push(Call::Wait);
            // fails at once, like poll reporting POLLERR with nothing queued
            if self.fail_wait {
                return Err(io::Error::new(io::ErrorKind::Other, "poll reported revents 0x8"));
            }
            if state.streaming && !state.queued.is_empty() && !state.frames.is_empty() {
                return Ok(true);
            }
        }

        thread::sleep(timeout);
        Ok(false)
    }

    fn export_buffer(&self, _typ: Type, _index: u32) -> io::Result<RawFd> {
        Err(io::Error::from_raw_os_error(libc::ENOTTY))
    }
}
