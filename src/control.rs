//! Image controls applied during session setup

use std::fmt;

/// `V4L2_CID_BASE`, user class controls
const CID_BASE: u32 = 0x0098_0900;
/// `V4L2_CID_CAMERA_CLASS_BASE`
const CID_CAMERA_BASE: u32 = 0x009a_0900;

/// Control identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id(pub u32);

impl Id {
    pub const EXPOSURE: Id = Id(CID_BASE + 17);
    pub const HFLIP: Id = Id(CID_BASE + 20);
    pub const VFLIP: Id = Id(CID_BASE + 21);
    pub const FOCUS_ABSOLUTE: Id = Id(CID_CAMERA_BASE + 10);

    /// Human readable name of the well-known ids
    pub fn name(self) -> Option<&'static str> {
        match self {
            Id::EXPOSURE => Some("exposure"),
            Id::HFLIP => Some("horizontal flip"),
            Id::VFLIP => Some("vertical flip"),
            Id::FOCUS_ABSOLUTE => Some("focus (absolute)"),
            _ => None,
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "{:#010x}", self.0),
        }
    }
}

/// A control write: id and value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Control {
    pub id: Id,
    pub value: i32,
}

impl Control {
    pub fn new(id: Id, value: i32) -> Self {
        Control { id, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_ids() {
        assert_eq!(Id::EXPOSURE.0, 0x0098_0911);
        assert_eq!(Id::HFLIP.0, 0x0098_0914);
        assert_eq!(Id::VFLIP.0, 0x0098_0915);
        assert_eq!(Id::FOCUS_ABSOLUTE.0, 0x009a_090a);
    }

    #[test]
    fn display() {
        assert_eq!(Id::HFLIP.to_string(), "horizontal flip");
        assert_eq!(Id(0x1234).to_string(), "0x00001234");
    }
}
