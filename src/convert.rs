//! Conversion of captured frames into the canonical I420 layout

use thiserror::Error;

use crate::format::FourCC;
use crate::i420::{chroma_height, I420Buffer};

/// A captured frame as it came out of the driver
#[derive(Debug, Clone, Copy)]
pub struct Source<'a> {
    /// Valid bytes of the frame
    pub data: &'a [u8],
    pub fourcc: FourCC,
    pub width: u32,
    pub height: u32,
    /// Bytes per line of the first plane, `0` for tightly packed
    pub stride: u32,
    /// Left edge of the region to convert
    pub crop_x: u32,
    /// Top edge of the region to convert
    pub crop_y: u32,
}

impl<'a> Source<'a> {
    pub fn new(data: &'a [u8], fourcc: FourCC, width: u32, height: u32, stride: u32) -> Self {
        Source {
            data,
            fourcc,
            width,
            height,
            stride,
            crop_x: 0,
            crop_y: 0,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConvertError {
    #[error("no conversion from {0} to I420")]
    Unsupported(FourCC),

    #[error("frame holds {got} bytes, {expected} needed")]
    Truncated { expected: usize, got: usize },

    #[error("{dst_width}x{dst_height} at ({crop_x}, {crop_y}) exceeds {src_width}x{src_height}")]
    Geometry {
        src_width: u32,
        src_height: u32,
        dst_width: u32,
        dst_height: u32,
        crop_x: u32,
        crop_y: u32,
    },
}

/// Turns a captured frame into I420
///
/// The destination decides the output size; the region starting at the source crop offsets is
/// converted.
pub trait Converter: Send {
    fn convert(&mut self, src: &Source<'_>, dst: &mut I420Buffer) -> Result<(), ConvertError>;
}

/// Byte positions of Y0, U, Y1 and V within a 4:2:2 macropixel
#[derive(Debug, Clone, Copy)]
struct Packed {
    y0: usize,
    u: usize,
    y1: usize,
    v: usize,
}

const YUY2: Packed = Packed { y0: 0, u: 1, y1: 2, v: 3 };
const UYVY: Packed = Packed { y0: 1, u: 0, y1: 3, v: 2 };

/// Converter for the uncompressed YUV layouts V4L2 devices commonly produce
#[derive(Debug, Default, Clone, Copy)]
pub struct I420Converter;

impl I420Converter {
    pub fn new() -> Self {
        I420Converter
    }
}

impl Converter for I420Converter {
    fn convert(&mut self, src: &Source<'_>, dst: &mut I420Buffer) -> Result<(), ConvertError> {
        if src.crop_x + dst.width() > src.width || src.crop_y + dst.height() > src.height {
            return Err(ConvertError::Geometry {
                src_width: src.width,
                src_height: src.height,
                dst_width: dst.width(),
                dst_height: dst.height(),
                crop_x: src.crop_x,
                crop_y: src.crop_y,
            });
        }

        let fourcc = src.fourcc.canonical();
        if fourcc == FourCC::YUY2 {
            packed_to_i420(src, YUY2, dst)
        } else if fourcc == FourCC::UYVY {
            packed_to_i420(src, UYVY, dst)
        } else if fourcc == FourCC::NV12 {
            semi_planar_to_i420(src, false, dst)
        } else if fourcc == FourCC::NV21 {
            semi_planar_to_i420(src, true, dst)
        } else if fourcc == FourCC::I420 {
            planar_to_i420(src, false, dst)
        } else if fourcc == FourCC::YV12 {
            planar_to_i420(src, true, dst)
        } else {
            Err(ConvertError::Unsupported(src.fourcc))
        }
    }
}

fn ensure_len(data: &[u8], expected: usize) -> Result<(), ConvertError> {
    if data.len() < expected {
        return Err(ConvertError::Truncated {
            expected,
            got: data.len(),
        });
    }
    Ok(())
}

fn copy_plane(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    width: usize,
    rows: usize,
) {
    for row in 0..rows {
        let s = row * src_stride;
        let d = row * dst_stride;
        dst[d..d + width].copy_from_slice(&src[s..s + width]);
    }
}

fn packed_to_i420(src: &Source<'_>, layout: Packed, dst: &mut I420Buffer) -> Result<(), ConvertError> {
    let (width, height) = (dst.width() as usize, dst.height() as usize);
    let stride = if src.stride == 0 {
        src.width as usize * 2
    } else {
        src.stride as usize
    };
    // crop to a macropixel boundary
    let x0 = (src.crop_x as usize / 2) * 4;
    let first = src.crop_y as usize * stride + x0;
    let pairs = (width + 1) / 2;
    ensure_len(src.data, first + (height - 1) * stride + pairs * 4)?;

    let [stride_y, stride_u, stride_v] = dst.strides();
    let (dst_y, dst_u, dst_v) = dst.planes_mut();
    let line_len = pairs * 4;
    let row = |r: usize| first + r * stride;

    for r in 0..height {
        let line = &src.data[row(r)..row(r) + line_len];
        let out = &mut dst_y[r * stride_y as usize..];
        for x in 0..width {
            let px = &line[(x / 2) * 4..];
            out[x] = if x % 2 == 0 { px[layout.y0] } else { px[layout.y1] };
        }
    }

    for r in 0..chroma_height(height as u32) as usize {
        let top = &src.data[row(2 * r)..];
        let bottom = &src.data[row((2 * r + 1).min(height - 1))..];
        let out_u = &mut dst_u[r * stride_u as usize..];
        let out_v = &mut dst_v[r * stride_v as usize..];
        for i in 0..pairs {
            let (a, b) = (&top[i * 4..], &bottom[i * 4..]);
            out_u[i] = avg(a[layout.u], b[layout.u]);
            out_v[i] = avg(a[layout.v], b[layout.v]);
        }
    }

    Ok(())
}

fn avg(a: u8, b: u8) -> u8 {
    ((u16::from(a) + u16::from(b) + 1) / 2) as u8
}

fn semi_planar_to_i420(src: &Source<'_>, swap_uv: bool, dst: &mut I420Buffer) -> Result<(), ConvertError> {
    let (width, height) = (dst.width() as usize, dst.height() as usize);
    let stride = if src.stride == 0 {
        src.width as usize
    } else {
        src.stride as usize
    };
    let (crop_x, crop_y) = (src.crop_x as usize, src.crop_y as usize);
    let chroma_w = (width + 1) / 2;
    let chroma_rows = chroma_height(height as u32) as usize;

    let y_first = crop_y * stride + crop_x;
    let uv_plane = stride * src.height as usize;
    let uv_first = uv_plane + (crop_y / 2) * stride + (crop_x / 2) * 2;
    ensure_len(src.data, y_first + (height - 1) * stride + width)?;
    ensure_len(src.data, uv_first + (chroma_rows - 1) * stride + chroma_w * 2)?;

    let [stride_y, stride_u, stride_v] = dst.strides();
    let (dst_y, dst_u, dst_v) = dst.planes_mut();
    copy_plane(&src.data[y_first..], stride, dst_y, stride_y as usize, width, height);

    let (first, second) = if swap_uv { (dst_v, dst_u) } else { (dst_u, dst_v) };
    let (first_stride, second_stride) = if swap_uv {
        (stride_v as usize, stride_u as usize)
    } else {
        (stride_u as usize, stride_v as usize)
    };
    for r in 0..chroma_rows {
        let line = &src.data[uv_first + r * stride..];
        for i in 0..chroma_w {
            first[r * first_stride + i] = line[i * 2];
            second[r * second_stride + i] = line[i * 2 + 1];
        }
    }

    Ok(())
}

fn planar_to_i420(src: &Source<'_>, swap_uv: bool, dst: &mut I420Buffer) -> Result<(), ConvertError> {
    let (width, height) = (dst.width() as usize, dst.height() as usize);
    let stride = if src.stride == 0 {
        src.width as usize
    } else {
        src.stride as usize
    };
    let chroma_stride = (stride + 1) / 2;
    let (crop_x, crop_y) = (src.crop_x as usize, src.crop_y as usize);
    let chroma_w = (width + 1) / 2;
    let chroma_rows = chroma_height(height as u32) as usize;

    let first_plane = stride * src.height as usize;
    let second_plane = first_plane + chroma_stride * chroma_height(src.height) as usize;
    let y_first = crop_y * stride + crop_x;
    let chroma_offset = (crop_y / 2) * chroma_stride + crop_x / 2;
    ensure_len(src.data, y_first + (height - 1) * stride + width)?;
    ensure_len(
        src.data,
        second_plane + chroma_offset + (chroma_rows - 1) * chroma_stride + chroma_w,
    )?;

    let (u_plane, v_plane) = if swap_uv {
        (second_plane, first_plane)
    } else {
        (first_plane, second_plane)
    };

    let [stride_y, stride_u, stride_v] = dst.strides();
    let (dst_y, dst_u, dst_v) = dst.planes_mut();
    copy_plane(&src.data[y_first..], stride, dst_y, stride_y as usize, width, height);
    copy_plane(
        &src.data[u_plane + chroma_offset..],
        chroma_stride,
        dst_u,
        stride_u as usize,
        chroma_w,
        chroma_rows,
    );
    copy_plane(
        &src.data[v_plane + chroma_offset..],
        chroma_stride,
        dst_v,
        stride_v as usize,
        chroma_w,
        chroma_rows,
    );

    Ok(())
}
