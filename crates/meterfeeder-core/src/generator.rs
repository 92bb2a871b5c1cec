//! A single USB entropy generator.
//!
//! A [`Generator`] exclusively owns one open transport handle. Its protocol is
//! a small state machine:
//!
//! ```text
//!   Idle ──start_streaming──▶ Streaming ──stop_streaming──▶ Idle
//!     └──────────────┬──────────────┘
//!                  close
//!                    ▼
//!                 Closed (terminal)
//! ```
//!
//! Reading is only meaningful while the device is streaming. The generator
//! does not enforce that ordering; a read on an idle device simply comes back
//! short because the hardware sends nothing.
//!
//! Every operation is a fresh device transaction. Nothing is buffered here.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::{START_STREAMING_COMMAND, STOP_STREAMING_COMMAND};
use crate::error::{Error, Result, Step};
use crate::transport::{DeviceHandle, DeviceInfo, Transport};

/// Protocol state of a generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Idle,
    Streaming,
    Closed,
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Streaming => write!(f, "streaming"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Snapshot of one generator's counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratorHealth {
    pub serial_number: String,
    pub description: String,
    pub state: StreamState,
    /// Entropy bytes delivered so far.
    pub bytes: u64,
    /// Failed device transactions.
    pub failures: u64,
    /// Duration of the most recent successful read, in seconds.
    pub last_read_secs: f64,
}

/// Mutable per-device state, guarded by the generator's mutex.
struct Channel {
    state: StreamState,
    total_bytes: u64,
    failures: u64,
    last_read_time: Duration,
}

/// One physical generator and its transport handle.
pub struct Generator {
    serial_number: String,
    description: String,
    handle: DeviceHandle,
    transport: Arc<dyn Transport>,
    max_read_length: usize,
    channel: Mutex<Channel>,
}

impl Generator {
    /// Take ownership of an already opened and configured `handle`.
    pub fn new(
        info: DeviceInfo,
        handle: DeviceHandle,
        transport: Arc<dyn Transport>,
        max_read_length: usize,
    ) -> Self {
        Self {
            serial_number: info.serial_number,
            description: info.description,
            handle,
            transport,
            max_read_length,
            channel: Mutex::new(Channel {
                state: StreamState::Idle,
                total_bytes: 0,
                failures: 0,
                last_read_time: Duration::ZERO,
            }),
        }
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The transport handle this generator was opened with.
    ///
    /// After [`close`](Self::close) the handle has been released and the
    /// value only identifies the former device.
    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }

    /// `"<serial>|<description>"`, the listing format used by host applications.
    pub fn listing(&self) -> String {
        format!("{}|{}", self.serial_number, self.description)
    }

    pub fn max_read_length(&self) -> usize {
        self.max_read_length
    }

    pub fn state(&self) -> StreamState {
        self.channel().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == StreamState::Closed
    }

    fn channel(&self) -> MutexGuard<'_, Channel> {
        self.channel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the generator for a sequence of operations.
    ///
    /// Other threads block on this generator until the guard is dropped, so a
    /// start followed by a read cannot interleave with another caller.
    pub fn lock(&self) -> GeneratorLock<'_> {
        GeneratorLock {
            generator: self,
            channel: self.channel(),
        }
    }

    pub fn start_streaming(&self) -> Result<()> {
        self.lock().start_streaming()
    }

    pub fn stop_streaming(&self) -> Result<()> {
        self.lock().stop_streaming()
    }

    /// Read exactly `length` bytes.
    pub fn read(&self, length: usize) -> Result<Vec<u8>> {
        self.lock().read(length)
    }

    /// Release the transport handle. Calling this again is a no-op.
    pub fn close(&self) -> Result<()> {
        self.lock().close()
    }

    pub fn health(&self) -> GeneratorHealth {
        let ch = self.channel();
        GeneratorHealth {
            serial_number: self.serial_number.clone(),
            description: self.description.clone(),
            state: ch.state,
            bytes: ch.total_bytes,
            failures: ch.failures,
            last_read_secs: ch.last_read_time.as_secs_f64(),
        }
    }
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("serial_number", &self.serial_number)
            .field("description", &self.description)
            .field("handle", &self.handle)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        let channel = self
            .channel
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if channel.state == StreamState::Closed {
            return;
        }
        channel.state = StreamState::Closed;
        if let Err(status) = self.transport.close(self.handle) {
            log::warn!("failed to close {} on drop: {status}", self.serial_number);
        }
    }
}

/// Exclusive access to a [`Generator`], obtained from [`Generator::lock`].
pub struct GeneratorLock<'a> {
    generator: &'a Generator,
    channel: MutexGuard<'a, Channel>,
}

impl GeneratorLock<'_> {
    pub fn state(&self) -> StreamState {
        self.channel.state
    }

    fn ensure_open(&self, step: Step) -> Result<()> {
        if self.channel.state == StreamState::Closed {
            return Err(Error::Closed {
                serial: self.generator.serial_number.clone(),
                step,
            });
        }
        Ok(())
    }

    /// Purge pending I/O, then send a single command byte.
    fn command(&mut self, command: u8, step: Step) -> Result<()> {
        self.ensure_open(step)?;
        let g = self.generator;
        let result = g
            .transport
            .purge(g.handle)
            .and_then(|()| g.transport.write(g.handle, &[command]));
        match result {
            Ok(1) => Ok(()),
            Ok(written) => {
                self.channel.failures += 1;
                Err(Error::CommandWrite {
                    serial: g.serial_number.clone(),
                    step,
                    written,
                })
            }
            Err(status) => {
                self.channel.failures += 1;
                Err(Error::Transport {
                    serial: g.serial_number.clone(),
                    step,
                    status,
                })
            }
        }
    }

    pub fn start_streaming(&mut self) -> Result<()> {
        self.command(START_STREAMING_COMMAND, Step::StartStreaming)?;
        log::debug!("{}: streaming started", self.generator.serial_number);
        self.channel.state = StreamState::Streaming;
        Ok(())
    }

    pub fn stop_streaming(&mut self) -> Result<()> {
        self.command(STOP_STREAMING_COMMAND, Step::StopStreaming)?;
        log::debug!("{}: streaming stopped", self.generator.serial_number);
        self.channel.state = StreamState::Idle;
        Ok(())
    }

    /// Read exactly `length` bytes, `1..=max_read_length`.
    ///
    /// The length is validated before the device state is looked at. A byte
    /// count mismatch is reported as [`Error::ShortRead`] even when the
    /// transport also returned a failure status; the status is carried along.
    pub fn read(&mut self, length: usize) -> Result<Vec<u8>> {
        let g = self.generator;
        if length == 0 || length > g.max_read_length {
            return Err(Error::InvalidLength {
                serial: g.serial_number.clone(),
                requested: i64::try_from(length).unwrap_or(i64::MAX),
                max: g.max_read_length,
            });
        }
        self.ensure_open(Step::Read)?;

        let mut buf = vec![0u8; length];
        let t0 = Instant::now();
        let outcome = g.transport.read(g.handle, &mut buf);
        if outcome.count != length {
            self.channel.failures += 1;
            return Err(Error::ShortRead {
                serial: g.serial_number.clone(),
                expected: length,
                received: outcome.count,
                status: outcome.status.err(),
            });
        }
        if let Err(status) = outcome.status {
            self.channel.failures += 1;
            return Err(Error::Read {
                serial: g.serial_number.clone(),
                status,
            });
        }

        self.channel.last_read_time = t0.elapsed();
        self.channel.total_bytes += length as u64;
        log::debug!("{}: read {length} bytes", g.serial_number);
        Ok(buf)
    }

    pub fn close(&mut self) -> Result<()> {
        if self.channel.state == StreamState::Closed {
            return Ok(());
        }
        let g = self.generator;
        self.channel.state = StreamState::Closed;
        g.transport.close(g.handle).map_err(|status| {
            self.channel.failures += 1;
            Error::Close {
                serial: g.serial_number.clone(),
                status,
            }
        })
    }
}
