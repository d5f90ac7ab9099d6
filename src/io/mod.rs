//! Buffer exchange with the driver and the capture loop built on top of it

pub mod arena;
pub mod stream;

pub use arena::{Arena, Slot};
pub use stream::{FrameCallback, FrameInfo, Parts, State, Stats, StatsSnapshot, Worker};
