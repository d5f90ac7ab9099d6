use std::fs;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

/// Character device major number of video4linux nodes
const VIDEO_MAJOR: u64 = 81;
/// Highest `/dev/videoN` index that is scanned
const MINOR_MAX: usize = 63;

/// A video4linux device node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    index: usize,
    path: PathBuf,
}

impl Node {
    pub fn new(index: usize) -> Self {
        Node {
            index,
            path: PathBuf::from(format!("/dev/video{}", index)),
        }
    }

    /// Returns the absolute path of the device node
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the index of the device node
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns name of the device by parsing its sysfs entry
    pub fn name(&self) -> Option<String> {
        let path = format!("/sys/class/video4linux/video{}/name", self.index);
        match fs::read_to_string(path) {
            Ok(name) => Some(name.trim().to_string()),
            Err(e) => {
                warn!("failed to read sysfs name of {}: {}", self.path.display(), e);
                None
            }
        }
    }

    fn is_video_device(&self) -> bool {
        match fs::symlink_metadata(&self.path) {
            Ok(meta) => meta.file_type().is_char_device() && major(meta.rdev()) == VIDEO_MAJOR,
            Err(_) => false,
        }
    }
}

fn major(rdev: u64) -> u64 {
    ((rdev >> 8) & 0xfff) | ((rdev >> 32) & !0xfff)
}

/// Whether a sysfs device name satisfies a lookup
///
/// Names are prefix matched, so `"vivid"` finds `"vivid-000-vid-cap"`.
fn name_matches(node_name: &str, wanted: &str) -> bool {
    node_name.starts_with(wanted)
}

/// Returns a list of devices currently known to the system
///
/// Only character devices with the video4linux major number are reported.
///
/// # Example
///
/// ```
/// use camss::context;
/// for dev in context::enum_devices() {
///     println!("{} {:?}", dev.index(), dev.name());
/// }
/// ```
pub fn enum_devices() -> Vec<Node> {
    (0..=MINOR_MAX)
        .map(Node::new)
        .filter(Node::is_video_device)
        .collect()
}

/// Resolves a device name to its node path
///
/// Names starting with `/` are taken as paths and returned as is. Anything else is looked up
/// against the sysfs names of all video nodes; the first node whose name starts with `name`
/// wins.
pub fn find_by_name(name: &str) -> Option<PathBuf> {
    if name.starts_with('/') {
        return Some(PathBuf::from(name));
    }

    for node in enum_devices() {
        debug!("trying node {}", node.path().display());
        if let Some(node_name) = node.name() {
            if name_matches(&node_name, name) {
                info!("node found for device '{}': {}", name, node.path().display());
                return Some(node.path);
            }
        }
    }

    warn!("no video device found for '{}'", name);
    None
}
