use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info, warn};

use camss::context;
use camss::{FrameInfo, I420Buffer, Session, SessionConfig};

#[derive(Parser)]
#[command(name = "camss")]
#[command(about = "Capture frames from a V4L2 camera as I420")]
#[command(version)]
struct Cli {
    /// Card name prefix or device node path
    #[arg(short, long)]
    device: Option<String>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Frames per second to request
    #[arg(long)]
    fps: Option<u32>,

    /// Number of streaming buffers
    #[arg(short, long)]
    buffers: Option<u32>,

    /// Stop after this many frames, 0 runs until Ctrl-C
    #[arg(short = 'n', long, default_value = "0")]
    frames: u64,

    /// Append every frame as raw I420 to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Session settings as JSON, command line options take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List video devices and exit
    #[arg(short, long)]
    list: bool,
}

impl Cli {
    fn session_config(&self) -> anyhow::Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::from_json_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => SessionConfig::default(),
        };

        if let Some(device) = &self.device {
            config.device = device.clone();
        }
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        if let Some(buffers) = self.buffers {
            config.buffer_count = buffers;
        }
        Ok(config)
    }
}

fn list_devices() {
    for node in context::enum_devices() {
        println!(
            "{}: {}",
            node.path().display(),
            node.name().unwrap_or_else(|| "<unknown>".to_string())
        );
    }
}

fn main() -> anyhow::Result<()> {
    // RUST_LOG=debug shows negotiation details, RUST_LOG=trace every frame
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if cli.list {
        list_devices();
        return Ok(());
    }

    let config = cli.session_config()?;
    let mut session = Session::open_with(config.clone())
        .with_context(|| format!("failed to open '{}'", config.device))?;
    for advisory in session.advisories() {
        warn!("{}", advisory);
    }
    info!(
        "{} via {}, {} {} buffers",
        session.capabilities().card,
        session.format(),
        session.buffer_count(),
        session
            .memory()
            .map_or_else(|| "no".to_string(), |memory| memory.to_string())
    );

    let mut output = match &cli.output {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => None,
    };

    let (done, finished) = mpsc::channel();
    let interrupted = done.clone();
    ctrlc::set_handler(move || {
        let _ = interrupted.send(());
    })
    .context("failed to install the Ctrl-C handler")?;

    let limit = cli.frames;
    let mut count = 0u64;
    session.install_callback(move |info: &FrameInfo, frame: &I420Buffer| {
        if limit > 0 && count >= limit {
            return Ok(());
        }
        if let Some(out) = output.as_mut() {
            frame.write_to(out)?;
            out.flush()?;
        }

        count += 1;
        debug!(
            "frame {} seq {} at {:?}",
            count,
            info.sequence,
            info.timestamp
        );
        if count == limit {
            let _ = done.send(());
        }
        Ok(())
    });

    session.start()?;
    while let Err(RecvTimeoutError::Timeout) = finished.recv_timeout(Duration::from_secs(5)) {
        info!("{}", session.stats());
    }
    session.stop()?;

    println!("{}", session.stats());
    session.close()?;
    Ok(())
}
