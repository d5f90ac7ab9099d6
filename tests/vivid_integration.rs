//! Integration tests against the vivid virtual camera.
//!
//! These tests require:
//! - The `integration` feature flag: `cargo test --features integration`
//! - The vivid kernel module: `sudo modprobe vivid`
//! - Access to /dev/video* devices (video group membership)
//!
//! They fail rather than skip when vivid is missing.

#![cfg(feature = "integration")]

use std::sync::mpsc;
use std::time::Duration;

use serial_test::serial;

use camss::context;
use camss::{FourCC, FrameInfo, I420Buffer, Memory, Session, SessionConfig, State};

const TIMEOUT: Duration = Duration::from_secs(5);

macro_rules! require_vivid {
    () => {
        match context::find_by_name("vivid") {
            Some(path) => path.to_string_lossy().into_owned(),
            None => panic!(
                "vivid virtual camera not available.\n\
                 Load it with: sudo modprobe vivid\n\
                 Or run unit tests only: cargo test --lib"
            ),
        }
    };
}

#[test]
#[serial]
fn negotiates_yuyv_at_vga() {
    let device = require_vivid!();
    let session = Session::open(&device, 640, 480, 30).unwrap();

    let format = session.format();
    assert_eq!((format.width, format.height), (640, 480));
    assert_eq!(format.fourcc, FourCC::YUYV);
    assert!(format.stride >= 1280);
    assert_eq!(session.buffer_count(), 8);
    assert_eq!(session.memory(), Some(Memory::Mmap));
    session.close().unwrap();
}

#[test]
#[serial]
fn delivers_i420_frames() {
    let device = require_vivid!();
    let mut session = Session::open(&device, 640, 480, 30).unwrap();

    let (tx, rx) = mpsc::channel();
    session.install_callback(move |info: &FrameInfo, frame: &I420Buffer| {
        let _ = tx.send((info.sequence, frame.strides(), frame.data().len()));
        Ok(())
    });
    session.start().unwrap();

    let mut last = None;
    for _ in 0..5 {
        let (sequence, strides, len) = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(strides, [640, 320, 320]);
        assert_eq!(len, 640 * 480 * 3 / 2);
        if let Some(previous) = last {
            assert!(sequence > previous);
        }
        last = Some(sequence);
    }

    session.stop().unwrap();
    assert_eq!(session.state(), State::Stopped);
    assert!(session.stats().frames >= 5);
    session.close().unwrap();
}

#[test]
#[serial]
fn restarts_after_stop() {
    let device = require_vivid!();
    let config = SessionConfig::new(&device, 320, 240, 15).buffer_count(4);
    let mut session = Session::open_with(config).unwrap();

    for _ in 0..2 {
        let (tx, rx) = mpsc::channel();
        session.install_callback(move |_: &FrameInfo, _: &I420Buffer| {
            let _ = tx.send(());
            Ok(())
        });
        session.start().unwrap();
        rx.recv_timeout(TIMEOUT).unwrap();
        session.stop().unwrap();
    }
}

#[test]
#[serial]
fn unknown_name_does_not_open() {
    let err = Session::open("no-such-camera", 640, 480, 30).err().unwrap();
    assert_eq!(err.code(), -2);
}
