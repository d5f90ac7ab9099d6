use std::{fmt, time::Duration};

use crate::capability::Flags;

/// Buffer type
///
/// Specific types of devices require buffers of corresponding types.
#[allow(clippy::unreadable_literal)]
#[rustfmt::skip]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    VideoCapture        = 1,
    VideoOutput         = 2,
    VideoCaptureMplane  = 9,
    VideoOutputMplane   = 10,
}

impl Type {
    /// Buffer types a session may stream with, most preferred first
    pub const PRIORITY: [Type; 4] = [
        Type::VideoCaptureMplane,
        Type::VideoCapture,
        Type::VideoOutputMplane,
        Type::VideoOutput,
    ];

    /// Whether buffers of this type carry a plane array
    pub fn planar(self) -> bool {
        matches!(self, Type::VideoCaptureMplane | Type::VideoOutputMplane)
    }

    fn capability(self) -> Flags {
        match self {
            Type::VideoCapture => Flags::VIDEO_CAPTURE,
            Type::VideoOutput => Flags::VIDEO_OUTPUT,
            Type::VideoCaptureMplane => Flags::VIDEO_CAPTURE_MPLANE,
            Type::VideoOutputMplane => Flags::VIDEO_OUTPUT_MPLANE,
        }
    }

    /// Picks the buffer type for a device from its capability flags
    ///
    /// Returns `None` if the device advertises none of the supported types.
    pub fn select(caps: Flags) -> Option<Type> {
        Type::PRIORITY
            .iter()
            .copied()
            .find(|typ| caps.contains(typ.capability()))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::VideoCapture => "video capture",
            Type::VideoOutput => "video output",
            Type::VideoCaptureMplane => "video capture (multi-planar)",
            Type::VideoOutputMplane => "video output (multi-planar)",
        };
        write!(f, "{}", name)
    }
}

/// Driver-side description of one buffer, as reported by `VIDIOC_QUERYBUF`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub index: u32,
    /// Length of the buffer in bytes
    pub length: u32,
    /// Offset to pass to mmap
    pub offset: u32,
}

/// Buffer returned by the driver on dequeue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dequeued {
    pub index: u32,
    /// Number of valid bytes
    pub bytes_used: u32,
    /// Frame sequence counter, set by the driver
    pub sequence: u32,
    /// Capture time, monotonic clock
    pub timestamp: Duration,
}
