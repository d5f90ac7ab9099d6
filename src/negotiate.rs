//! Agreeing on buffer type, pixel format and frame rate with a driver

use std::{fmt, io};

use tracing::{debug, error, info, warn};

use crate::buffer::Type;
use crate::capability::{Capabilities, Flags};
use crate::config::SessionConfig;
use crate::control::{self, Control};
use crate::device::Driver;
use crate::error::{Error, Result};
use crate::format::{fourcc, Format};
use crate::fraction::Fraction;
use crate::parameters::{Capabilities as ParamCaps, Parameters};

/// A setup step that failed without aborting the session
#[derive(Debug)]
pub enum Advisory {
    /// Selecting the video input was rejected
    Input { index: u32, source: io::Error },
    /// The frame rate could not be applied
    FrameRate(Error),
    /// Reading or writing an image control failed
    Control { id: control::Id, source: io::Error },
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::Input { index, source } => write!(f, "input {}: {}", index, source),
            Advisory::FrameRate(e) => write!(f, "frame rate: {}", e),
            Advisory::Control { id, source } => write!(f, "{}: {}", id, source),
        }
    }
}

/// Outcome of a successful negotiation
#[derive(Debug, Clone)]
pub struct Negotiated {
    pub caps: Capabilities,
    pub typ: Type,
    pub format: Format,
}

/// Reads the device capabilities and checks the device can stream video
pub fn check_caps<D: Driver + ?Sized>(dev: &D) -> Result<Capabilities> {
    let caps = dev
        .query_caps()
        .map_err(|e| Error::api("VIDIOC_QUERYCAP", e))?;
    debug!("{}: {}", caps.card, caps.capabilities);

    if !caps.capabilities.has_video_io() {
        return Err(Error::BadParam(format!(
            "{} supports neither video capture nor output",
            caps.card
        )));
    }
    if !caps.capabilities.contains(Flags::STREAMING) {
        return Err(Error::BadParam(format!(
            "{} does not support streaming I/O",
            caps.card
        )));
    }
    Ok(caps)
}

/// Selects a video input
///
/// Many devices have a single input and reject the request, so a failure is only reported back.
pub fn select_input<D: Driver + ?Sized>(dev: &D, index: u32) -> Option<Advisory> {
    match dev.set_input(index) {
        Ok(()) => None,
        Err(source) => {
            warn!("failed to select input {}: {}", index, source);
            Some(Advisory::Input { index, source })
        }
    }
}

/// Picks the buffer type from the capability flags
pub fn select_type(caps: &Capabilities) -> Option<Type> {
    let typ = Type::select(caps.capabilities);
    match typ {
        Some(typ) => debug!("using {} buffers", typ),
        None => info!("neither video capture nor video output supported"),
    }
    typ
}

/// Finds the most preferred format the driver offers at the requested size and commits it
///
/// The driver may adjust the size during the trial; the adjusted size is what gets committed.
/// Returns the format as the driver reports it after the commit.
pub fn select_format<D: Driver + ?Sized>(dev: &D, typ: Type, width: u32, height: u32) -> Result<Format> {
    let offered = dev
        .enum_formats(typ)
        .map_err(|e| Error::api("VIDIOC_ENUM_FMT", e))?;

    let mut chosen = None;
    for candidate in fourcc::PREFERRED.iter() {
        if !offered.iter().any(|desc| desc.fourcc == *candidate) {
            continue;
        }

        match dev.try_format(typ, &Format::new(width, height, *candidate)) {
            Ok(tried) => {
                chosen = Some(Format::new(tried.width, tried.height, *candidate));
                break;
            }
            Err(e) => debug!("{} rejected at {}x{}: {}", candidate, width, height, e),
        }
    }

    let chosen = chosen.ok_or_else(|| {
        error!("no preferred format available at {}x{}", width, height);
        Error::api(
            "VIDIOC_TRY_FMT",
            io::Error::new(io::ErrorKind::InvalidInput, "no supported pixel format"),
        )
    })?;
    info!(
        "preferred camera fourcc '{}' for ({}x{})",
        chosen.fourcc, chosen.width, chosen.height
    );

    dev.set_format(typ, &chosen)
        .map_err(|e| Error::api("VIDIOC_S_FMT", e))?;
    dev.format(typ).map_err(|e| Error::api("VIDIOC_G_FMT", e))
}

/// Requests a frame interval of `1/fps` in preview mode
///
/// Returns the interval the driver actually applied.
pub fn set_frame_rate<D: Driver + ?Sized>(dev: &D, typ: Type, fps: u32) -> Result<Fraction> {
    if fps == 0 {
        return Err(Error::BadParam("frame rate must not be zero".to_string()));
    }

    let current = dev
        .params(typ)
        .map_err(|e| Error::api("VIDIOC_G_PARM", e))?;
    if !current.capabilities.contains(ParamCaps::TIME_PER_FRAME) {
        return Err(Error::BadParam(
            "device cannot set the time per frame".to_string(),
        ));
    }

    let applied = dev
        .set_params(typ, &Parameters::with_fps(fps))
        .map_err(|e| Error::BadParam(format!("frame rate {} rejected: {}", fps, e)))?;

    let interval = applied.interval;
    debug!(
        "framerate {}, {:.2} fps",
        interval,
        interval.fps().unwrap_or(0.0)
    );
    Ok(interval)
}

/// Reads a control and then writes the new value
pub fn set_control<D: Driver + ?Sized>(dev: &D, id: control::Id, value: i32) -> io::Result<()> {
    let previous = dev.control(id)?;
    dev.set_control(Control::new(id, value))?;
    debug!("{}: {} -> {}", id, previous, value);
    Ok(())
}

/// Applies flips and, when configured, exposure and focus
///
/// Failures never abort setup; each one is logged and returned.
pub fn apply_controls<D: Driver + ?Sized>(dev: &D, config: &SessionConfig) -> Vec<Advisory> {
    let mut writes = vec![
        (control::Id::HFLIP, i32::from(config.hflip)),
        (control::Id::VFLIP, i32::from(config.vflip)),
    ];
    if let Some(exposure) = config.exposure {
        writes.push((control::Id::EXPOSURE, exposure));
    }
    if let Some(focus) = config.focus {
        writes.push((control::Id::FOCUS_ABSOLUTE, focus));
    }

    writes
        .into_iter()
        .filter_map(|(id, value)| match set_control(dev, id, value) {
            Ok(()) => None,
            Err(source) => {
                warn!("could not set {}: {}", id, source);
                Some(Advisory::Control { id, source })
            }
        })
        .collect()
}

/// Runs the full negotiation for a freshly opened device
///
/// Capability, buffer type and format problems are fatal. Input selection, frame rate and
/// controls are best effort and come back as advisories.
pub fn configure<D: Driver + ?Sized>(
    dev: &D,
    config: &SessionConfig,
) -> Result<(Negotiated, Vec<Advisory>)> {
    let caps = check_caps(dev)?;
    let mut advisories = Vec::new();

    advisories.extend(select_input(dev, config.input));

    let typ = select_type(&caps).ok_or_else(|| {
        Error::api(
            "VIDIOC_S_FMT",
            io::Error::new(io::ErrorKind::InvalidInput, "no usable buffer type"),
        )
    })?;
    let format = select_format(dev, typ, config.width, config.height)?;

    if let Err(e) = set_frame_rate(dev, typ, config.fps) {
        warn!("failed to set {} fps: {}", config.fps, e);
        advisories.push(Advisory::FrameRate(e));
    }

    advisories.extend(apply_controls(dev, config));

    Ok((Negotiated { caps, typ, format }, advisories))
}
