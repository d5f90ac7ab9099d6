use bitflags::bitflags;
use std::fmt;

use crate::v4l_sys::*;

bitflags! {
    #[allow(clippy::unreadable_literal)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u32 {
        const VIDEO_CAPTURE         = 0x00000001;
        const VIDEO_OUTPUT          = 0x00000002;
        const VIDEO_OVERLAY         = 0x00000004;
        const VIDEO_CAPTURE_MPLANE  = 0x00001000;
        const VIDEO_OUTPUT_MPLANE   = 0x00002000;
        const VIDEO_M2M_MPLANE      = 0x00004000;
        const VIDEO_M2M             = 0x00008000;
        const READ_WRITE            = 0x01000000;
        const STREAMING             = 0x04000000;
        const DEVICE_CAPS           = 0x80000000;
    }
}

impl From<u32> for Flags {
    fn from(flags: u32) -> Self {
        Self::from_bits_retain(flags)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Flags {
    /// Whether the device can capture or output video in any layout
    pub fn has_video_io(self) -> bool {
        self.intersects(
            Flags::VIDEO_CAPTURE
                | Flags::VIDEO_CAPTURE_MPLANE
                | Flags::VIDEO_OUTPUT
                | Flags::VIDEO_OUTPUT_MPLANE,
        )
    }
}

#[derive(Debug, Clone)]
/// Device capabilities
pub struct Capabilities {
    /// Driver name, e.g. uvc for usb video class devices
    pub driver: String,
    /// Card name
    pub card: String,
    /// Bus name, e.g. USB or PCI
    pub bus: String,
    /// Version number MAJOR.MINOR.PATCH
    pub version: (u8, u8, u8),

    /// Capability flags of the opened node
    pub capabilities: Flags,
}

impl Capabilities {
    pub fn new(card: &str, capabilities: Flags) -> Self {
        Capabilities {
            driver: String::new(),
            card: card.to_string(),
            bus: String::new(),
            version: (0, 0, 0),
            capabilities,
        }
    }
}

fn c_str(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

impl From<v4l2_capability> for Capabilities {
    fn from(cap: v4l2_capability) -> Self {
        // device_caps is only meaningful if the driver says so
        let flags = if cap.capabilities & Flags::DEVICE_CAPS.bits() != 0 {
            cap.device_caps
        } else {
            cap.capabilities
        };

        Capabilities {
            driver: c_str(&cap.driver),
            card: c_str(&cap.card),
            bus: c_str(&cap.bus_info),
            version: (
                ((cap.version >> 16) & 0xff) as u8,
                ((cap.version >> 8) & 0xff) as u8,
                (cap.version & 0xff) as u8,
            ),
            capabilities: Flags::from(flags),
        }
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Driver      : {}", self.driver)?;
        writeln!(f, "Card        : {}", self.card)?;
        writeln!(f, "Bus         : {}", self.bus)?;
        writeln!(
            f,
            "Version     : {}.{}.{}",
            self.version.0, self.version.1, self.version.2
        )?;
        writeln!(f, "Capabilites : {}", self.capabilities)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn prefers_device_caps() {
        let mut raw: v4l2_capability = unsafe { mem::zeroed() };
        raw.card[..4].copy_from_slice(b"cam0");
        raw.version = 0x0005_0a02;
        raw.capabilities = (Flags::DEVICE_CAPS | Flags::VIDEO_CAPTURE | Flags::VIDEO_OUTPUT).bits();
        raw.device_caps = (Flags::VIDEO_CAPTURE | Flags::STREAMING).bits();

        let caps = Capabilities::from(raw);
        assert_eq!(caps.card, "cam0");
        assert_eq!(caps.version, (5, 10, 2));
        assert_eq!(caps.capabilities, Flags::VIDEO_CAPTURE | Flags::STREAMING);
    }

    #[test]
    fn video_io() {
        assert!(Flags::VIDEO_OUTPUT_MPLANE.has_video_io());
        assert!(!(Flags::STREAMING | Flags::READ_WRITE).has_video_io());
    }
}
