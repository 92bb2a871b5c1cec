//! The USB transport seam.
//!
//! The vendor driver that talks to the FTDI bridge on each generator is not
//! part of this crate. Everything the driver needs from it is captured by the
//! [`Transport`] trait: enumerate devices, open by serial number, set transport
//! parameters, purge, write, read and close. A transport is shared between the
//! [`Driver`](crate::driver::Driver) and every
//! [`Generator`](crate::generator::Generator) it creates as an
//! `Arc<dyn Transport>`.
//!
//! All calls are blocking and may take up to the configured I/O timeout.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque token identifying one open device on the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceHandle(pub u64);

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// One entry of the device enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Serial number, e.g. `"QWR4A003"`.
    pub serial_number: String,
    /// Product description, e.g. `"MED100K 100 kHz v1.0"`.
    pub description: String,
}

impl DeviceInfo {
    pub fn new(serial_number: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            description: description.into(),
        }
    }
}

/// Non-success status reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportStatus {
    InvalidHandle,
    DeviceNotFound,
    DeviceNotOpened,
    IoError,
    InvalidParameter,
    DeviceListNotReady,
    /// Any other vendor status code.
    Other(i32),
}

impl TransportStatus {
    /// Vendor status code (`FT_STATUS` numbering).
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidHandle => 1,
            Self::DeviceNotFound => 2,
            Self::DeviceNotOpened => 3,
            Self::IoError => 4,
            Self::InvalidParameter => 6,
            Self::DeviceListNotReady => 16,
            Self::Other(code) => *code,
        }
    }
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidHandle => "invalid handle",
            Self::DeviceNotFound => "device not found",
            Self::DeviceNotOpened => "device not opened",
            Self::IoError => "I/O error",
            Self::InvalidParameter => "invalid parameter",
            Self::DeviceListNotReady => "device list not ready",
            Self::Other(_) => "transport error",
        };
        write!(f, "{name} [{}]", self.code())
    }
}

/// Kind of a transport configuration parameter, used in error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    LatencyTimer,
    UsbPacketSize,
    Timeouts,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LatencyTimer => write!(f, "latency timer"),
            Self::UsbPacketSize => write!(f, "in/out USB packet size"),
            Self::Timeouts => write!(f, "timeouts"),
        }
    }
}

/// A transport configuration parameter applied to an open device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportParam {
    /// Latency timer in milliseconds.
    LatencyTimer { ms: u8 },
    /// USB transfer sizes in bytes (multiples of 64).
    UsbParameters { in_size: u32, out_size: u32 },
    /// Read and write timeouts in milliseconds.
    Timeouts { read_ms: u32, write_ms: u32 },
}

impl TransportParam {
    pub fn kind(&self) -> ParamKind {
        match self {
            Self::LatencyTimer { .. } => ParamKind::LatencyTimer,
            Self::UsbParameters { .. } => ParamKind::UsbPacketSize,
            Self::Timeouts { .. } => ParamKind::Timeouts,
        }
    }
}

/// Result of a transport read.
///
/// A read reports how many bytes actually arrived independently of its
/// status: the vendor driver can time out after delivering part of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Bytes written into the caller's buffer.
    pub count: usize,
    /// `Err` when the transport reported a non-success status.
    pub status: Result<(), TransportStatus>,
}

impl ReadOutcome {
    pub fn complete(count: usize) -> Self {
        Self {
            count,
            status: Ok(()),
        }
    }

    pub fn failed(count: usize, status: TransportStatus) -> Self {
        Self {
            count,
            status: Err(status),
        }
    }
}

/// Vendor USB capability consumed by the driver.
pub trait Transport: Send + Sync {
    /// Enumerate all attached devices, in discovery order.
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, TransportStatus>;

    /// Open a device by serial number.
    fn open(&self, serial_number: &str) -> Result<DeviceHandle, TransportStatus>;

    /// Apply one transport parameter to an open device.
    fn configure(&self, handle: DeviceHandle, param: TransportParam) -> Result<(), TransportStatus>;

    /// Discard pending input and output.
    fn purge(&self, handle: DeviceHandle) -> Result<(), TransportStatus>;

    /// Write `bytes`, returning how many were transmitted.
    fn write(&self, handle: DeviceHandle, bytes: &[u8]) -> Result<usize, TransportStatus>;

    /// Read up to `buf.len()` bytes into `buf`.
    fn read(&self, handle: DeviceHandle, buf: &mut [u8]) -> ReadOutcome;

    /// Release the device.
    fn close(&self, handle: DeviceHandle) -> Result<(), TransportStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_carries_code() {
        assert_eq!(TransportStatus::IoError.to_string(), "I/O error [4]");
        assert_eq!(TransportStatus::Other(42).to_string(), "transport error [42]");
    }

    #[test]
    fn test_param_kind_names() {
        let p = TransportParam::UsbParameters {
            in_size: 64,
            out_size: 64,
        };
        assert_eq!(p.kind(), ParamKind::UsbPacketSize);
        assert_eq!(ParamKind::LatencyTimer.to_string(), "latency timer");
    }
}
