//! Thin wrappers around the raw v4l2 system calls.
//!
//! Everything above this module talks to the kernel through these functions, which turn the
//! C-style `-1`/errno convention into `io::Result`.

mod api;
pub use api::*;

pub mod vidioc;
