use std::path::Path;
use std::time::Duration;
use std::{fs, io};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid session config")]
    Json(#[from] serde_json::Error),
}

/// Everything a session needs to know before it opens the device
///
/// # Example
///
/// ```
/// use camss::config::SessionConfig;
/// let config = SessionConfig::new("vivid", 640, 480, 30)
///     .buffer_count(4)
///     .hflip(true);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// sysfs name prefix, or a node path such as `/dev/video0`
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    #[serde(default = "default_buffer_count")]
    pub buffer_count: u32,
    /// Readiness wait timeout of the capture loop
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub input: u32,
    #[serde(default)]
    pub hflip: bool,
    #[serde(default)]
    pub vflip: bool,
    #[serde(default)]
    pub exposure: Option<i32>,
    #[serde(default)]
    pub focus: Option<i32>,
}

fn default_buffer_count() -> u32 {
    8
}

fn default_timeout_ms() -> u64 {
    1000
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig::new("/dev/video0", 640, 480, 30)
    }
}

impl SessionConfig {
    pub fn new(device: &str, width: u32, height: u32, fps: u32) -> Self {
        SessionConfig {
            device: device.to_string(),
            width,
            height,
            fps,
            buffer_count: default_buffer_count(),
            timeout_ms: default_timeout_ms(),
            input: 0,
            hflip: false,
            vflip: false,
            exposure: None,
            focus: None,
        }
    }

    pub fn buffer_count(mut self, count: u32) -> Self {
        self.buffer_count = count;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn input(mut self, index: u32) -> Self {
        self.input = index;
        self
    }

    pub fn hflip(mut self, enable: bool) -> Self {
        self.hflip = enable;
        self
    }

    pub fn vflip(mut self, enable: bool) -> Self {
        self.vflip = enable;
        self
    }

    pub fn exposure(mut self, value: i32) -> Self {
        self.exposure = Some(value);
        self
    }

    pub fn focus(mut self, value: i32) -> Self {
        self.focus = Some(value);
        self
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = SessionConfig::new("vivid", 1280, 720, 25);
        assert_eq!(config.buffer_count, 8);
        assert_eq!(config.wait_timeout(), Duration::from_secs(1));
        assert_eq!(config.input, 0);
        assert!(!config.hflip && !config.vflip);
        assert_eq!(config.exposure, None);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "device": "UVC Camera", "width": 640, "height": 480, "fps": 30, "vflip": true, "focus": 40 }}"#
        )
        .unwrap();

        let config = SessionConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.device, "UVC Camera");
        assert_eq!(config.buffer_count, 8);
        assert_eq!(config.timeout_ms, 1000);
        assert!(config.vflip);
        assert_eq!(config.focus, Some(40));
    }

    #[test]
    fn builder() {
        let config = SessionConfig::default()
            .buffer_count(4)
            .timeout(Duration::from_millis(250))
            .exposure(100);
        assert_eq!(config.buffer_count, 4);
        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.exposure, Some(100));
    }

    #[test]
    fn unreadable_file() {
        let err = SessionConfig::from_json_file("/nonexistent/camss.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn malformed_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ \"width\": 640 }}").unwrap();
        let err = SessionConfig::from_json_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }
}
