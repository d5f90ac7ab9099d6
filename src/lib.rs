//! Capture sessions on V4L2 devices
//!
//! A [`Session`] opens a device, agrees on a pixel format and frame rate with the driver,
//! allocates the streaming buffers with the first memory strategy the driver accepts and runs a
//! capture thread that hands every frame to a callback as planar I420.
//!
//! The driver is reached through the [`Driver`] trait. [`Device`] implements it over raw ioctls.

pub use v4l2_sys as v4l_sys;

pub mod v4l2;

pub mod buffer;
pub mod capability;
pub mod config;
pub mod context;
pub mod control;
pub mod convert;
pub mod device;
pub mod error;
pub mod format;
pub mod fraction;
pub mod i420;
pub mod io;
pub mod memory;
pub mod negotiate;
pub mod parameters;
pub mod session;

#[cfg(test)]
mod mock;

pub use capability::Capabilities;
pub use config::SessionConfig;
pub use convert::{Converter, I420Converter};
pub use device::{Device, Driver};
pub use error::{Error, Result};
pub use format::{Format, FourCC};
pub use fraction::Fraction;
pub use i420::I420Buffer;
pub use io::stream::{State, StatsSnapshot};
pub use memory::Memory;
pub use session::{FrameCallback, FrameInfo, Session};
