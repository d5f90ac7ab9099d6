use std::io;

use thiserror::Error;

/// Errors surfaced by session setup and control calls.
///
/// Steady-state capture errors never reach the caller; they are logged by the capture loop and
/// counted in [`crate::io::stream::Stats`].
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or unsupported parameter or device capability
    #[error("bad parameter: {0}")]
    BadParam(String),

    /// The device node could not be resolved or opened
    #[error("failed to open device {device}")]
    OpenFail {
        device: String,
        #[source]
        source: Option<io::Error>,
    },

    /// A heap allocation failed
    #[error("out of memory: {0}")]
    NoMem(String),

    /// A primitive call to the device failed
    #[error("{call} failed")]
    ApiFail {
        call: &'static str,
        #[source]
        source: io::Error,
    },

    /// Mapping or allocating a capture buffer failed
    #[error("failed to map buffer {index}")]
    MapFail {
        index: u32,
        #[source]
        source: io::Error,
    },

    /// The driver accepted no memory strategy or granted a different buffer count
    #[error("asked for {requested} buffers, got {granted}")]
    NoBuffers { requested: u32, granted: u32 },

    /// Waiting for the device failed or timed out
    #[error("readiness wait failed")]
    Poll(#[source] io::Error),
}

impl Error {
    pub(crate) fn api(call: &'static str, source: io::Error) -> Self {
        Error::ApiFail { call, source }
    }

    /// Integer code of this error, matching the C camss API
    ///
    /// `0` is reserved for success and never returned here.
    pub fn code(&self) -> i32 {
        match self {
            Error::BadParam(_) => -1,
            Error::OpenFail { .. } => -2,
            Error::NoMem(_) => -3,
            Error::ApiFail { .. } => -4,
            Error::MapFail { .. } => -5,
            Error::NoBuffers { .. } => -6,
            Error::Poll(_) => -7,
        }
    }
}

/// Folds a unit result into the integer status convention (`0` on success).
pub fn status(res: &Result<()>) -> i32 {
    match res {
        Ok(()) => 0,
        Err(e) => e.code(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
