use std::{
    convert::TryFrom,
    fmt,
    ops::{Deref, DerefMut},
    os::unix::io::RawFd,
    ptr::NonNull,
    slice,
};

/// Memory used for buffer exchange
#[allow(clippy::unreadable_literal)]
#[rustfmt::skip]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Memory {
    Mmap        = 1,
    UserPtr     = 2,
    Overlay     = 3,
    DmaBuf      = 4,
}

/// Strategies tried when requesting buffers, in order
pub const STRATEGIES: [Memory; 3] = [Memory::Mmap, Memory::UserPtr, Memory::DmaBuf];

impl TryFrom<u32> for Memory {
    type Error = ();

    fn try_from(repr: u32) -> Result<Self, Self::Error> {
        match repr {
            1 => Ok(Memory::Mmap),
            2 => Ok(Memory::UserPtr),
            3 => Ok(Memory::Overlay),
            4 => Ok(Memory::DmaBuf),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Memory::Mmap => write!(f, "memory-mapped"),
            Memory::UserPtr => write!(f, "user pointer"),
            Memory::Overlay => write!(f, "overlay"),
            Memory::DmaBuf => write!(f, "DMA buffered"),
        }
    }
}

/// Memory-mapped region
///
/// The backing memory belongs to the driver and is mapped into the process. Unlike a slice it
/// does not unmap itself; ownership goes back to the [`crate::device::Driver`] that mapped it.
#[derive(Debug)]
pub struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// The region is plain memory. Concurrent access is serialized by the queue/dequeue protocol.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// # Safety
    ///
    /// `ptr` must point to `len` bytes that stay mapped until the region is handed back to
    /// whoever created it.
    pub unsafe fn from_raw(ptr: NonNull<u8>, len: usize) -> Self {
        MappedRegion { ptr, len }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Deref for MappedRegion {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

/// Userspace memory
///
/// This memory type can be used to directly make the camera hardware write its data into the
/// user-provided buffer (which lives in userspace).
#[derive(Debug)]
pub struct UserPtr(pub Vec<u8>);

impl UserPtr {
    /// Allocates a zeroed buffer, reporting allocation failure instead of aborting
    pub fn alloc(len: usize) -> Option<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len).ok()?;
        buf.resize(len, 0);
        Some(UserPtr(buf))
    }
}

impl Deref for UserPtr {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for UserPtr {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Memory backing one buffer slot
#[derive(Debug)]
pub enum SlotMemory {
    Mapped(MappedRegion),
    User(UserPtr),
    /// DMA buffer descriptor; allocation does not export one yet, so this is always `None`
    Exported(Option<RawFd>),
}

impl SlotMemory {
    pub fn memory(&self) -> Memory {
        match self {
            SlotMemory::Mapped(_) => Memory::Mmap,
            SlotMemory::User(_) => Memory::UserPtr,
            SlotMemory::Exported(_) => Memory::DmaBuf,
        }
    }

    /// Readable bytes of the slot, empty for unpopulated slots
    pub fn bytes(&self) -> &[u8] {
        match self {
            SlotMemory::Mapped(region) => &region[..],
            SlotMemory::User(buf) => &buf[..],
            SlotMemory::Exported(_) => &[],
        }
    }
}
