use std::{fmt, str};

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
/// Four character code representing a pixelformat
pub struct FourCC {
    pub repr: [u8; 4],
}

impl FourCC {
    /// Packed YUV 4:2:2, Y0 U Y1 V
    pub const YUYV: FourCC = FourCC::new(b"YUYV");
    /// Packed YUV 4:2:2, same layout as YUYV
    pub const YUY2: FourCC = FourCC::new(b"YUY2");
    /// Packed YUV 4:2:2, U Y0 V Y1
    pub const UYVY: FourCC = FourCC::new(b"UYVY");
    /// Semi-planar YUV 4:2:0 with interleaved CbCr
    pub const NV12: FourCC = FourCC::new(b"NV12");
    /// Semi-planar YUV 4:2:0 with interleaved CrCb
    pub const NV21: FourCC = FourCC::new(b"NV21");
    /// Planar YUV 4:2:0, the canonical frame layout
    pub const I420: FourCC = FourCC::new(b"I420");
    /// Planar YUV 4:2:0, V4L2 name of I420
    pub const YU12: FourCC = FourCC::new(b"YU12");
    /// Planar YUV 4:2:0, another name of I420
    pub const IYUV: FourCC = FourCC::new(b"IYUV");
    /// Planar YVU 4:2:0 (V plane first)
    pub const YV12: FourCC = FourCC::new(b"YV12");
    /// Motion JPEG
    pub const MJPG: FourCC = FourCC::new(b"MJPG");
    /// JFIF JPEG
    pub const JPEG: FourCC = FourCC::new(b"JPEG");

    /// Returns a pixelformat as four character code
    ///
    /// # Arguments
    ///
    /// * `repr` - Four characters as raw bytes
    ///
    /// # Example
    ///
    /// ```
    /// use camss::format::FourCC;
    /// let fourcc = FourCC::new(b"YUYV");
    /// ```
    pub const fn new(repr: &[u8; 4]) -> FourCC {
        FourCC { repr: *repr }
    }

    /// Returns the string representation of a four character code
    pub fn str(&self) -> Result<&str, str::Utf8Error> {
        str::from_utf8(&self.repr)
    }

    /// Resolves aliases to the code the converter dispatches on
    ///
    /// Codes that are bit-for-bit identical layouts map to a single canonical code, e.g. `YU12`
    /// to `I420` and `YUYV` to `YUY2`. Anything else is returned as is.
    pub fn canonical(self) -> FourCC {
        ALIASES
            .iter()
            .find(|(alias, _)| *alias == self)
            .map_or(self, |(_, canonical)| *canonical)
    }
}

const ALIASES: [(FourCC, FourCC); 6] = [
    (FourCC::IYUV, FourCC::I420),
    (FourCC::YU12, FourCC::I420),
    (FourCC::YUYV, FourCC::YUY2),
    (FourCC::new(b"yuvs"), FourCC::YUY2),
    (FourCC::new(b"HDYC"), FourCC::UYVY),
    (FourCC::JPEG, FourCC::MJPG),
];

/// Source formats in negotiation order
///
/// Earlier entries win when the driver supports several of them.
pub const PREFERRED: [FourCC; 7] = [
    FourCC::YUYV,
    FourCC::NV21,
    FourCC::NV12,
    FourCC::YU12,
    FourCC::UYVY,
    FourCC::MJPG,
    FourCC::JPEG,
];

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match str::from_utf8(&self.repr) {
            Ok(string) => write!(f, "{}", string),
            Err(_) => write!(f, "{}", u32::from(*self)),
        }
    }
}

impl From<u32> for FourCC {
    fn from(code: u32) -> Self {
        FourCC::new(&code.to_le_bytes())
    }
}

impl From<FourCC> for u32 {
    fn from(fourcc: FourCC) -> Self {
        Self::from_le_bytes(fourcc.repr)
    }
}
