use std::{fmt, mem};

use crate::buffer::Type;
use crate::v4l_sys::*;

pub mod description;
pub use description::Description;

pub mod fourcc;
pub use fourcc::FourCC;

/// `V4L2_FIELD_ANY`, the driver picks interlaced or progressive
const FIELD_ANY: u32 = 0;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// Pixel format agreed on with the driver
///
/// Multi-planar devices are described through their first memory plane, which is the only one
/// the buffer allocator hands out.
pub struct Format {
    /// width in pixels
    pub width: u32,
    /// height in pixels
    pub height: u32,
    /// pixelformat code
    pub fourcc: FourCC,

    /// bytes per line of the first plane
    pub stride: u32,
    /// maximum number of bytes required to store an image
    pub size: u32,
}

impl Format {
    /// Returns a format request, stride and size are left to the driver
    ///
    /// # Example
    ///
    /// ```
    /// use camss::format::{Format, FourCC};
    /// let fmt = Format::new(640, 480, FourCC::YUYV);
    /// ```
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        Format {
            width,
            height,
            fourcc,
            stride: 0,
            size: 0,
        }
    }

    /// Returns the raw kernel struct for a buffer type
    pub fn to_raw(&self, typ: Type) -> v4l2_format {
        let mut raw = v4l2_format {
            type_: typ as u32,
            ..unsafe { mem::zeroed() }
        };

        if typ.planar() {
            let mut pix_mp: v4l2_pix_format_mplane = unsafe { mem::zeroed() };
            pix_mp.width = self.width;
            pix_mp.height = self.height;
            pix_mp.pixelformat = self.fourcc.into();
            pix_mp.field = FIELD_ANY;
            pix_mp.num_planes = 1;
            pix_mp.plane_fmt[0].bytesperline = self.stride;
            pix_mp.plane_fmt[0].sizeimage = self.size;
            raw.fmt.pix_mp = pix_mp;
        } else {
            raw.fmt.pix = v4l2_pix_format {
                width: self.width,
                height: self.height,
                pixelformat: self.fourcc.into(),
                field: FIELD_ANY,
                bytesperline: self.stride,
                sizeimage: self.size,
                ..unsafe { mem::zeroed() }
            };
        }

        raw
    }

    /// Reads back a kernel struct filled in by the driver
    pub fn from_raw(typ: Type, raw: &v4l2_format) -> Self {
        if typ.planar() {
            let pix_mp = unsafe { raw.fmt.pix_mp };
            Format {
                width: pix_mp.width,
                height: pix_mp.height,
                fourcc: FourCC::from(pix_mp.pixelformat),
                stride: pix_mp.plane_fmt[0].bytesperline,
                size: pix_mp.plane_fmt[0].sizeimage,
            }
        } else {
            let pix = unsafe { raw.fmt.pix };
            Format {
                width: pix.width,
                height: pix.height,
                fourcc: FourCC::from(pix.pixelformat),
                stride: pix.bytesperline,
                size: pix.sizeimage,
            }
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} '{}' stride {} size {}",
            self.width, self.height, self.fourcc, self.stride, self.size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_planar_raw_round_trip() {
        let fmt = Format {
            stride: 1280,
            size: 614_400,
            ..Format::new(640, 480, FourCC::YUYV)
        };

        let raw = fmt.to_raw(Type::VideoCapture);
        assert_eq!(raw.type_, Type::VideoCapture as u32);
        assert_eq!(Format::from_raw(Type::VideoCapture, &raw), fmt);
    }

    #[test]
    fn multi_planar_uses_first_plane() {
        let fmt = Format {
            stride: 1920,
            size: 3_110_400,
            ..Format::new(1920, 1080, FourCC::NV12)
        };

        let raw = fmt.to_raw(Type::VideoCaptureMplane);
        let pix_mp = unsafe { raw.fmt.pix_mp };
        assert_eq!(pix_mp.num_planes, 1);
        assert_eq!(pix_mp.plane_fmt[0].bytesperline, 1920);
        assert_eq!(Format::from_raw(Type::VideoCaptureMplane, &raw), fmt);
    }
}
