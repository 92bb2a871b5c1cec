//! Fixed driver configuration.
//!
//! Values are chosen once, when the [`Driver`](crate::driver::Driver) is
//! constructed. Nothing here is negotiated with the device at runtime.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transport::TransportParam;

/// Command byte that puts a generator into streaming mode.
pub const START_STREAMING_COMMAND: u8 = 0x96;

/// Command byte that takes a generator out of streaming mode.
pub const STOP_STREAMING_COMMAND: u8 = 0xE0;

/// USB transfer sizes must be a multiple of this many bytes.
pub const USB_PACKET_GRANULARITY: u32 = 64;

/// Driver configuration.
///
/// ```
/// use meterfeeder_core::DriverConfig;
///
/// let config = DriverConfig::from_json_str(r#"{ "serial_prefix": "QWR4" }"#).unwrap();
/// assert_eq!(config.serial_prefix, "QWR4");
/// assert_eq!(config.usb_packet_size, 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Only devices whose serial number starts with this prefix are opened.
    pub serial_prefix: String,
    /// Transport latency timer (milliseconds).
    pub latency_timer_ms: u8,
    /// In and out USB transfer size (bytes).
    pub usb_packet_size: u32,
    /// Read and write timeout (milliseconds).
    pub timeout_ms: u32,
    /// Largest length a single `read` may request.
    pub max_read_length: usize,
    /// Cap on the length of error reasons handed to foreign callers.
    pub error_reason_max_len: usize,
    /// Send the stop command after every composite `get_bytes`.
    pub stop_after_read: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            serial_prefix: "QWR".to_string(),
            latency_timer_ms: 2,
            usb_packet_size: 64,
            timeout_ms: 5000,
            max_read_length: 1024 * 1024,
            error_reason_max_len: 255,
            stop_after_read: false,
        }
    }
}

impl DriverConfig {
    /// Parse and validate a JSON document. Missing fields take their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| Error::Config(format!("failed to parse configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.serial_prefix.is_empty() {
            return Err(Error::Config("serial_prefix must not be empty".into()));
        }
        if self.usb_packet_size == 0 || self.usb_packet_size % USB_PACKET_GRANULARITY != 0 {
            return Err(Error::Config(format!(
                "usb_packet_size must be a non-zero multiple of {USB_PACKET_GRANULARITY}, got {}",
                self.usb_packet_size
            )));
        }
        if self.max_read_length == 0 {
            return Err(Error::Config("max_read_length must be at least 1".into()));
        }
        if self.error_reason_max_len == 0 {
            return Err(Error::Config("error_reason_max_len must be at least 1".into()));
        }
        Ok(())
    }

    /// Transport parameters applied to every device, in application order.
    pub fn transport_params(&self) -> [TransportParam; 3] {
        [
            TransportParam::LatencyTimer {
                ms: self.latency_timer_ms,
            },
            TransportParam::UsbParameters {
                in_size: self.usb_packet_size,
                out_size: self.usb_packet_size,
            },
            TransportParam::Timeouts {
                read_ms: self.timeout_ms,
                write_ms: self.timeout_ms,
            },
        ]
    }

    pub fn accepts(&self, serial_number: &str) -> bool {
        serial_number.starts_with(&self.serial_prefix)
    }
}
