//! Canonical planar YUV 4:2:0 frame buffer

use std::io::{self, Write};

use crate::error::{Error, Result};

/// Rows of a chroma plane for a given luma height
pub fn chroma_height(height: u32) -> u32 {
    (height + 1) / 2
}

/// Bytes needed to hold all three planes
///
/// `stride_y * height + (stride_u + stride_v) * ceil(height / 2)`
pub fn data_size(height: u32, stride_y: u32, stride_u: u32, stride_v: u32) -> usize {
    stride_y as usize * height as usize
        + (stride_u as usize + stride_v as usize) * chroma_height(height) as usize
}

/// Planar I420 frame: a Y plane followed by the U and V planes in one allocation
///
/// A session reuses a single buffer for every frame, so its contents are only valid for the
/// duration of a frame callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I420Buffer {
    width: u32,
    height: u32,
    stride: [u32; 3],
    data: Vec<u8>,
}

impl I420Buffer {
    /// Allocates a zeroed buffer with explicit strides
    ///
    /// Fails with [`Error::BadParam`] if a stride is narrower than its plane and with
    /// [`Error::NoMem`] if the allocation fails.
    pub fn new(width: u32, height: u32, stride_y: u32, stride_u: u32, stride_v: u32) -> Result<Self> {
        let chroma_width = (width + 1) / 2;
        if width == 0 || height == 0 {
            return Err(Error::BadParam(format!("empty frame {}x{}", width, height)));
        }
        if stride_y < width || stride_u < chroma_width || stride_v < chroma_width {
            return Err(Error::BadParam(format!(
                "strides {}/{}/{} too small for width {}",
                stride_y, stride_u, stride_v, width
            )));
        }

        let size = data_size(height, stride_y, stride_u, stride_v);
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|e| Error::NoMem(format!("i420 buffer of {} bytes: {}", size, e)))?;
        data.resize(size, 0);

        Ok(I420Buffer {
            width,
            height,
            stride: [stride_y, stride_u, stride_v],
            data,
        })
    }

    /// Allocates a tightly packed buffer, luma stride equals the width
    pub fn with_size(width: u32, height: u32) -> Result<Self> {
        let stride_uv = (width + 1) / 2;
        Self::new(width, height, width, stride_uv, stride_uv)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Strides of the Y, U and V planes
    pub fn strides(&self) -> [u32; 3] {
        self.stride
    }

    /// The whole allocation, all three planes back to back
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn offsets(&self) -> (usize, usize) {
        let u = self.stride[0] as usize * self.height as usize;
        let v = u + self.stride[1] as usize * chroma_height(self.height) as usize;
        (u, v)
    }

    pub fn data_y(&self) -> &[u8] {
        let (u, _) = self.offsets();
        &self.data[..u]
    }

    pub fn data_u(&self) -> &[u8] {
        let (u, v) = self.offsets();
        &self.data[u..v]
    }

    pub fn data_v(&self) -> &[u8] {
        let (_, v) = self.offsets();
        &self.data[v..]
    }

    /// Mutable views of the Y, U and V planes
    pub fn planes_mut(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        let (u, v) = self.offsets();
        let (y, rest) = self.data.split_at_mut(u);
        let (u, v) = rest.split_at_mut(v - u);
        (y, u, v)
    }

    /// Writes the visible area of each plane, Y then U then V, skipping stride padding
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let chroma_width = ((self.width + 1) / 2) as usize;
        let chroma_rows = chroma_height(self.height) as usize;

        write_plane(
            writer,
            self.data_y(),
            self.width as usize,
            self.height as usize,
            self.stride[0] as usize,
        )?;
        write_plane(writer, self.data_u(), chroma_width, chroma_rows, self.stride[1] as usize)?;
        write_plane(writer, self.data_v(), chroma_width, chroma_rows, self.stride[2] as usize)
    }
}

fn write_plane<W: Write>(
    writer: &mut W,
    plane: &[u8],
    width: usize,
    rows: usize,
    stride: usize,
) -> io::Result<()> {
    for row in plane.chunks(stride).take(rows) {
        writer.write_all(&row[..width])?;
    }
    Ok(())
}
