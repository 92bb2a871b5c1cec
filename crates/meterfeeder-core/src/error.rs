//! Error type shared by every layer of the driver.

use std::fmt;

use crate::transport::{DeviceHandle, ParamKind, TransportStatus};

pub type Result<T> = std::result::Result<T, Error>;

/// Protocol step a Generator was performing when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    StartStreaming,
    StopStreaming,
    Read,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartStreaming => write!(f, "start streaming"),
            Self::StopStreaming => write!(f, "stop streaming"),
            Self::Read => write!(f, "read"),
        }
    }
}

/// Broad category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Discovery,
    Open,
    Configuration,
    ClosedGenerator,
    InvalidArgument,
    ShortRead,
    Transport,
    NotFound,
    Config,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Enumeration succeeded but no device carried the vendor prefix.
    #[error("No generators connected")]
    NoGenerators,

    #[error("Error creating device info list. Check if generators are connected. [{0}]")]
    Enumeration(TransportStatus),

    #[error("Failed to connect to {serial} [{status}]")]
    Open {
        serial: String,
        status: TransportStatus,
    },

    #[error("Failed to set {param} for {serial} [{status}]")]
    Configuration {
        serial: String,
        param: ParamKind,
        status: TransportStatus,
    },

    #[error("Cannot {step} on {serial}: generator is closed")]
    Closed { serial: String, step: Step },

    #[error("Invalid read length {requested} for {serial} (must be 1..={max})")]
    InvalidLength {
        serial: String,
        requested: i64,
        max: usize,
    },

    /// The transport delivered a different number of bytes than requested.
    #[error("Error reading in entropy from {serial}: expected {expected} bytes, received {received}{}", status_suffix(.status))]
    ShortRead {
        serial: String,
        expected: usize,
        received: usize,
        status: Option<TransportStatus>,
    },

    /// A derivation was handed a buffer of the wrong size.
    #[error("Entropy buffer holds {received} bytes, {expected} required")]
    BufferLength { expected: usize, received: usize },

    #[error("Error instructing {serial} to {step} entropy [{status}]")]
    Transport {
        serial: String,
        step: Step,
        status: TransportStatus,
    },

    #[error("Error reading in entropy from {serial} [{status}]")]
    Read {
        serial: String,
        status: TransportStatus,
    },

    /// The transport accepted a command write but reported the wrong byte count.
    #[error("Error instructing {serial} to {step} entropy: wrote {written} of 1 command byte")]
    CommandWrite {
        serial: String,
        step: Step,
        written: usize,
    },

    #[error("Generator not found")]
    NotFound,

    #[error("Could not find a generator by the handle {0}")]
    UnknownHandle(DeviceHandle),

    #[error("Failed to close {serial} [{status}]")]
    Close {
        serial: String,
        status: TransportStatus,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

fn status_suffix(status: &Option<TransportStatus>) -> String {
    match status {
        Some(s) => format!(" [{s}]"),
        None => String::new(),
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoGenerators | Self::Enumeration(_) => ErrorKind::Discovery,
            Self::Open { .. } => ErrorKind::Open,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Closed { .. } => ErrorKind::ClosedGenerator,
            Self::InvalidLength { .. } => ErrorKind::InvalidArgument,
            Self::ShortRead { .. } | Self::BufferLength { .. } => ErrorKind::ShortRead,
            Self::Transport { .. }
            | Self::Read { .. }
            | Self::CommandWrite { .. }
            | Self::Close { .. } => ErrorKind::Transport,
            Self::NotFound | Self::UnknownHandle(_) => ErrorKind::NotFound,
            Self::Config(_) => ErrorKind::Config,
        }
    }
}

/// Render `err` as an error reason of at most `max_len` bytes.
///
/// Truncation never splits a UTF-8 character.
pub fn error_reason(err: &Error, max_len: usize) -> String {
    let mut reason = err.to_string();
    if reason.len() > max_len {
        let mut cut = max_len;
        while !reason.is_char_boundary(cut) {
            cut -= 1;
        }
        reason.truncate(cut);
    }
    reason
}
