use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::time::Duration;
use std::{io, mem};

use tracing::{debug, warn};

use crate::buffer::{BufferInfo, Dequeued, Type};
use crate::capability::Capabilities;
use crate::control::{self, Control};
use crate::format::{Description, Format};
use crate::memory::{MappedRegion, Memory, SlotMemory};
use crate::parameters::Parameters;
use crate::v4l2;
use crate::v4l_sys::*;

/// Primitive operations a capture session needs from a video device
///
/// [`Device`] implements this over raw ioctls. Every call maps onto a single driver request and
/// reports failures as the errno the driver returned.
pub trait Driver: Send + Sync {
    /// Query for device capabilities
    fn query_caps(&self) -> io::Result<Capabilities>;

    /// Selects the video input
    fn set_input(&self, index: u32) -> io::Result<()>;

    /// Returns the pixel formats the driver can produce for a buffer type
    fn enum_formats(&self, typ: Type) -> io::Result<Vec<Description>>;

    /// Negotiates a format without changing driver state
    fn try_format(&self, typ: Type, fmt: &Format) -> io::Result<Format>;

    /// Returns the active format
    fn format(&self, typ: Type) -> io::Result<Format>;

    /// Commits a format, returning what the driver actually applied
    fn set_format(&self, typ: Type, fmt: &Format) -> io::Result<Format>;

    /// Returns the streaming parameters
    fn params(&self, typ: Type) -> io::Result<Parameters>;

    /// Modifies the streaming parameters, returning what the driver actually applied
    fn set_params(&self, typ: Type, params: &Parameters) -> io::Result<Parameters>;

    /// Returns the current value of a control
    fn control(&self, id: control::Id) -> io::Result<i32>;

    /// Writes a control value
    fn set_control(&self, ctrl: Control) -> io::Result<()>;

    /// Requests `count` buffers, returns the number the driver granted
    ///
    /// A count of zero releases all buffers of the given memory type.
    fn request_buffers(&self, typ: Type, memory: Memory, count: u32) -> io::Result<u32>;

    /// Returns length and mmap offset of a buffer
    fn query_buffer(&self, typ: Type, memory: Memory, index: u32) -> io::Result<BufferInfo>;

    /// Maps a buffer read/write shared
    fn map(&self, info: &BufferInfo) -> io::Result<MappedRegion>;

    /// Unmaps a region obtained from [`Driver::map`]
    fn unmap(&self, region: MappedRegion) -> io::Result<()>;

    /// Hands a buffer to the driver
    fn queue(&self, typ: Type, index: u32, memory: &SlotMemory) -> io::Result<()>;

    /// Takes a filled buffer from the driver
    fn dequeue(&self, typ: Type, memory: Memory) -> io::Result<Dequeued>;

    /// Starts streaming I/O
    fn stream_on(&self, typ: Type) -> io::Result<()>;

    /// Stops streaming I/O, all buffers are implicitly dequeued
    fn stream_off(&self, typ: Type) -> io::Result<()>;

    /// Waits until a buffer can be dequeued, returns `false` on timeout
    fn wait_readable(&self, timeout: Duration) -> io::Result<bool>;

    /// Exports a buffer as DMA-BUF file descriptor
    fn export_buffer(&self, typ: Type, index: u32) -> io::Result<RawFd>;
}

/// Device handle for low-level access.
///
/// Acquiring a handle facilitates (possibly mutating) interactions with the device.
pub struct Handle {
    fd: std::os::raw::c_int,
}

impl Handle {
    /// Returns the raw file descriptor
    pub fn fd(&self) -> std::os::raw::c_int {
        self.fd
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if let Err(e) = v4l2::close(self.fd) {
            warn!("failed to close fd {}: {}", self.fd, e);
        }
    }
}

/// Linux capture device abstraction
pub struct Device {
    /// Raw handle
    handle: Handle,
    /// Device node path
    path: PathBuf,
}

impl Device {
    /// Returns a capture device by node path
    ///
    /// The node is opened read/write and non-blocking.
    ///
    /// # Arguments
    ///
    /// * `path` - Path (e.g. "/dev/video0")
    ///
    /// # Example
    ///
    /// ```
    /// use camss::device::Device;
    /// let dev = Device::with_path("/dev/video0");
    /// ```
    pub fn with_path<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let fd = v4l2::open(path, libc::O_RDWR | libc::O_NONBLOCK)?;
        debug!("opened {} as fd {}", path.display(), fd);

        Ok(Device {
            handle: Handle { fd },
            path: PathBuf::from(path),
        })
    }

    /// Returns the absolute path of the device node
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the raw device handle
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// # Safety
    ///
    /// `arg` must be the argument type `request` expects.
    unsafe fn ioctl<T>(&self, request: v4l2::vidioc::_IOC_TYPE, arg: &mut T) -> io::Result<()> {
        v4l2::ioctl(
            self.handle.fd(),
            request,
            arg as *mut T as *mut std::os::raw::c_void,
        )
    }

    fn raw_buffer(typ: Type, memory: Memory, index: u32, plane: &mut v4l2_plane) -> v4l2_buffer {
        let mut buf = v4l2_buffer {
            index,
            type_: typ as u32,
            memory: memory as u32,
            ..unsafe { mem::zeroed() }
        };
        if typ.planar() {
            buf.length = 1;
            buf.m.planes = plane as *mut v4l2_plane;
        }
        buf
    }
}

impl Driver for Device {
    fn query_caps(&self) -> io::Result<Capabilities> {
        unsafe {
            let mut v4l2_caps: v4l2_capability = mem::zeroed();
            self.ioctl(v4l2::vidioc::VIDIOC_QUERYCAP, &mut v4l2_caps)?;
            Ok(Capabilities::from(v4l2_caps))
        }
    }

    fn set_input(&self, index: u32) -> io::Result<()> {
        let mut input = index as std::os::raw::c_int;
        unsafe { self.ioctl(v4l2::vidioc::VIDIOC_S_INPUT, &mut input) }
    }

    fn enum_formats(&self, typ: Type) -> io::Result<Vec<Description>> {
        let mut descriptions = Vec::new();
        let mut v4l2_fmt = v4l2_fmtdesc {
            index: 0,
            type_: typ as u32,
            ..unsafe { mem::zeroed() }
        };

        loop {
            let ret = unsafe { self.ioctl(v4l2::vidioc::VIDIOC_ENUM_FMT, &mut v4l2_fmt) };
            if let Err(e) = ret {
                // EINVAL marks the end of the list
                if v4l2_fmt.index == 0 || e.kind() != io::ErrorKind::InvalidInput {
                    return Err(e);
                }
                return Ok(descriptions);
            }

            descriptions.push(Description::from(v4l2_fmt));
            v4l2_fmt.index += 1;
        }
    }

    fn try_format(&self, typ: Type, fmt: &Format) -> io::Result<Format> {
        let mut raw = fmt.to_raw(typ);
        unsafe { self.ioctl(v4l2::vidioc::VIDIOC_TRY_FMT, &mut raw)? };
        Ok(Format::from_raw(typ, &raw))
    }

    fn format(&self, typ: Type) -> io::Result<Format> {
        let mut raw = v4l2_format {
            type_: typ as u32,
            ..unsafe { mem::zeroed() }
        };
        unsafe { self.ioctl(v4l2::vidioc::VIDIOC_G_FMT, &mut raw)? };
        Ok(Format::from_raw(typ, &raw))
    }

    fn set_format(&self, typ: Type, fmt: &Format) -> io::Result<Format> {
        let mut raw = fmt.to_raw(typ);
        unsafe { self.ioctl(v4l2::vidioc::VIDIOC_S_FMT, &mut raw)? };
        Ok(Format::from_raw(typ, &raw))
    }

    fn params(&self, typ: Type) -> io::Result<Parameters> {
        unsafe {
            let mut v4l2_params = v4l2_streamparm {
                type_: typ as u32,
                ..mem::zeroed()
            };
            self.ioctl(v4l2::vidioc::VIDIOC_G_PARM, &mut v4l2_params)?;

            // capture and output parameters share their leading layout
            Ok(Parameters::from(v4l2_params.parm.capture))
        }
    }

    fn set_params(&self, typ: Type, params: &Parameters) -> io::Result<Parameters> {
        unsafe {
            let mut v4l2_params = v4l2_streamparm {
                type_: typ as u32,
                parm: v4l2_streamparm__bindgen_ty_1 {
                    capture: (*params).into(),
                },
            };
            self.ioctl(v4l2::vidioc::VIDIOC_S_PARM, &mut v4l2_params)?;

            Ok(Parameters::from(v4l2_params.parm.capture))
        }
    }

    fn control(&self, id: control::Id) -> io::Result<i32> {
        let mut v4l2_ctrl = v4l2_control { id: id.0, value: 0 };
        unsafe { self.ioctl(v4l2::vidioc::VIDIOC_G_CTRL, &mut v4l2_ctrl)? };
        Ok(v4l2_ctrl.value)
    }

    fn set_control(&self, ctrl: Control) -> io::Result<()> {
        let mut v4l2_ctrl = v4l2_control {
            id: ctrl.id.0,
            value: ctrl.value,
        };
        unsafe { self.ioctl(v4l2::vidioc::VIDIOC_S_CTRL, &mut v4l2_ctrl) }
    }

    fn request_buffers(&self, typ: Type, memory: Memory, count: u32) -> io::Result<u32> {
        let mut v4l2_reqbufs = v4l2_requestbuffers {
            count,
            type_: typ as u32,
            memory: memory as u32,
            ..unsafe { mem::zeroed() }
        };
        unsafe { self.ioctl(v4l2::vidioc::VIDIOC_REQBUFS, &mut v4l2_reqbufs)? };
        Ok(v4l2_reqbufs.count)
    }

    fn query_buffer(&self, typ: Type, memory: Memory, index: u32) -> io::Result<BufferInfo> {
        let mut plane: v4l2_plane = unsafe { mem::zeroed() };
        let mut v4l2_buf = Self::raw_buffer(typ, memory, index, &mut plane);
        unsafe { self.ioctl(v4l2::vidioc::VIDIOC_QUERYBUF, &mut v4l2_buf)? };

        let (length, offset) = if typ.planar() {
            (plane.length, unsafe { plane.m.mem_offset })
        } else {
            (v4l2_buf.length, unsafe { v4l2_buf.m.offset })
        };
        Ok(BufferInfo {
            index,
            length,
            offset,
        })
    }

    fn map(&self, info: &BufferInfo) -> io::Result<MappedRegion> {
        let ptr = unsafe {
            v4l2::mmap(
                ptr::null_mut(),
                info.length as usize,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.handle.fd(),
                info.offset as libc::off_t,
            )?
        };

        let ptr = NonNull::new(ptr as *mut u8)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;
        Ok(unsafe { MappedRegion::from_raw(ptr, info.length as usize) })
    }

    fn unmap(&self, region: MappedRegion) -> io::Result<()> {
        unsafe { v4l2::munmap(region.as_ptr() as *mut std::os::raw::c_void, region.len()) }
    }

    fn queue(&self, typ: Type, index: u32, memory: &SlotMemory) -> io::Result<()> {
        let mut plane: v4l2_plane = unsafe { mem::zeroed() };
        let mut v4l2_buf = Self::raw_buffer(typ, memory.memory(), index, &mut plane);

        if let SlotMemory::User(buf) = memory {
            let addr = buf.as_ptr() as std::os::raw::c_ulong;
            let length = buf.len() as u32;
            if typ.planar() {
                plane.m.userptr = addr;
                plane.length = length;
            } else {
                v4l2_buf.m.userptr = addr;
                v4l2_buf.length = length;
            }
        }

        unsafe { self.ioctl(v4l2::vidioc::VIDIOC_QBUF, &mut v4l2_buf) }
    }

    fn dequeue(&self, typ: Type, memory: Memory) -> io::Result<Dequeued> {
        let mut plane: v4l2_plane = unsafe { mem::zeroed() };
        let mut v4l2_buf = Self::raw_buffer(typ, memory, 0, &mut plane);
        unsafe { self.ioctl(v4l2::vidioc::VIDIOC_DQBUF, &mut v4l2_buf)? };

        let bytes_used = if typ.planar() {
            plane.bytesused
        } else {
            v4l2_buf.bytesused
        };
        let tv = v4l2_buf.timestamp;
        Ok(Dequeued {
            index: v4l2_buf.index,
            bytes_used,
            sequence: v4l2_buf.sequence,
            timestamp: Duration::new(tv.tv_sec.max(0) as u64, 0)
                + Duration::from_micros(tv.tv_usec.max(0) as u64),
        })
    }

    fn stream_on(&self, typ: Type) -> io::Result<()> {
        let mut typ = typ as u32;
        unsafe { self.ioctl(v4l2::vidioc::VIDIOC_STREAMON, &mut typ) }
    }

    fn stream_off(&self, typ: Type) -> io::Result<()> {
        let mut typ = typ as u32;
        unsafe { self.ioctl(v4l2::vidioc::VIDIOC_STREAMOFF, &mut typ) }
    }

    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        v4l2::poll_readable(self.handle.fd(), timeout)
    }

    fn export_buffer(&self, typ: Type, index: u32) -> io::Result<RawFd> {
        let mut v4l2_exp = v4l2_exportbuffer {
            type_: typ as u32,
            index,
            plane: 0,
            flags: (libc::O_RDWR | libc::O_CLOEXEC) as u32,
            ..unsafe { mem::zeroed() }
        };
        unsafe { self.ioctl(v4l2::vidioc::VIDIOC_EXPBUF, &mut v4l2_exp)? };
        Ok(v4l2_exp.fd)
    }
}
