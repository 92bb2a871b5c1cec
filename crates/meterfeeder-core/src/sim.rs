//! In-memory transport for running the driver without hardware.
//!
//! [`SimulatedTransport`] behaves like a bus of generators: devices only emit
//! bytes after receiving the start command, stop after the stop command, and
//! each open handle must be closed exactly once. Bytes come from a scripted
//! queue when one is set, otherwise from a PRNG seeded from the serial number,
//! so runs are reproducible.
//!
//! Faults can be injected per device and every call is recorded in a journal
//! for inspection.
//!
//! ```
//! use std::sync::Arc;
//! use meterfeeder_core::sim::SimulatedTransport;
//! use meterfeeder_core::{Driver, DriverConfig};
//!
//! let sim = Arc::new(SimulatedTransport::new());
//! sim.add_device("QWR4A001", "MED100K 100 kHz v1.0");
//! sim.script_bytes("QWR4A001", &[0x01, 0x00, 0x00, 0x00]);
//!
//! let mut driver = Driver::new(sim.clone(), DriverConfig::default()).unwrap();
//! driver.initialize().unwrap();
//! let handle = driver.find_by_serial("QWR4A001").unwrap().handle();
//! assert_eq!(driver.rand_int32(handle).unwrap(), 1);
//! ```

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::config::{START_STREAMING_COMMAND, STOP_STREAMING_COMMAND};
use crate::transport::{
    DeviceHandle, DeviceInfo, ParamKind, ReadOutcome, Transport, TransportParam, TransportStatus,
};

/// Injected failure for one simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Open(TransportStatus),
    Configure(ParamKind, TransportStatus),
    Purge(TransportStatus),
    Write(TransportStatus),
    /// Write succeeds but reports zero bytes transmitted.
    PartialWrite,
    /// Read delivers every byte but reports a failure status.
    Read(TransportStatus),
    /// Read delivers `missing` fewer bytes than asked, optionally with a status.
    ShortRead {
        missing: usize,
        status: Option<TransportStatus>,
    },
    /// Read delivers `extra` more bytes than asked.
    OverRead { extra: usize },
    Close(TransportStatus),
}

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListDevices,
    Open(String),
    Configure(DeviceHandle, TransportParam),
    Purge(DeviceHandle),
    Write(DeviceHandle, Vec<u8>),
    Read(DeviceHandle, usize),
    Close(DeviceHandle),
}

struct SimDevice {
    info: DeviceInfo,
    rng: StdRng,
    script: VecDeque<u8>,
    faults: Vec<Fault>,
    streaming: bool,
    handle: Option<DeviceHandle>,
}

impl SimDevice {
    fn fault(&self, pred: impl Fn(&Fault) -> bool) -> Option<Fault> {
        self.faults.iter().copied().find(|f| pred(f))
    }

    fn next_bytes(&mut self, n: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            match self.script.pop_front() {
                Some(b) => out.push(b),
                None => break,
            }
        }
        if out.len() < n {
            let mut rest = vec![0u8; n - out.len()];
            self.rng.fill_bytes(&mut rest);
            out.extend_from_slice(&rest);
        }
        out
    }
}

#[derive(Default)]
struct SimState {
    devices: Vec<SimDevice>,
    enumeration_fault: Option<TransportStatus>,
    next_handle: u64,
    journal: Vec<Call>,
}

impl SimState {
    fn by_handle(&mut self, handle: DeviceHandle) -> Result<&mut SimDevice, TransportStatus> {
        self.devices
            .iter_mut()
            .find(|d| d.handle == Some(handle))
            .ok_or(TransportStatus::InvalidHandle)
    }

    fn by_serial(&mut self, serial: &str) -> Option<&mut SimDevice> {
        self.devices
            .iter_mut()
            .find(|d| d.info.serial_number == serial)
    }
}

/// Deterministic, fault-injectable [`Transport`].
pub struct SimulatedTransport {
    state: Mutex<SimState>,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                next_handle: 0x1000,
                ..SimState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a device. Enumeration reports devices in attachment order.
    pub fn add_device(&self, serial_number: &str, description: &str) {
        let seed = serial_number
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
                (h ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
            });
        self.state().devices.push(SimDevice {
            info: DeviceInfo::new(serial_number, description),
            rng: StdRng::seed_from_u64(seed),
            script: VecDeque::new(),
            faults: Vec::new(),
            streaming: false,
            handle: None,
        });
    }

    /// Detach every device with `serial_number`. Open handles become invalid.
    pub fn remove_device(&self, serial_number: &str) {
        self.state()
            .devices
            .retain(|d| d.info.serial_number != serial_number);
    }

    /// Queue bytes that the device emits before falling back to its PRNG.
    pub fn script_bytes(&self, serial_number: &str, bytes: &[u8]) {
        if let Some(dev) = self.state().by_serial(serial_number) {
            dev.script.extend(bytes.iter().copied());
        }
    }

    pub fn inject(&self, serial_number: &str, fault: Fault) {
        if let Some(dev) = self.state().by_serial(serial_number) {
            dev.faults.push(fault);
        }
    }

    pub fn clear_faults(&self, serial_number: &str) {
        if let Some(dev) = self.state().by_serial(serial_number) {
            dev.faults.clear();
        }
    }

    /// Make enumeration itself fail (`None` restores it).
    pub fn fail_enumeration(&self, status: Option<TransportStatus>) {
        self.state().enumeration_fault = status;
    }

    pub fn journal(&self) -> Vec<Call> {
        self.state().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.state().journal.clear();
    }

    /// Number of devices currently open.
    pub fn open_count(&self) -> usize {
        self.state()
            .devices
            .iter()
            .filter(|d| d.handle.is_some())
            .count()
    }

    pub fn is_open(&self, serial_number: &str) -> bool {
        self.state()
            .by_serial(serial_number)
            .is_some_and(|d| d.handle.is_some())
    }

    pub fn is_streaming(&self, serial_number: &str) -> bool {
        self.state()
            .by_serial(serial_number)
            .is_some_and(|d| d.streaming)
    }
}

impl Transport for SimulatedTransport {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, TransportStatus> {
        let mut st = self.state();
        st.journal.push(Call::ListDevices);
        if let Some(status) = st.enumeration_fault {
            return Err(status);
        }
        Ok(st.devices.iter().map(|d| d.info.clone()).collect())
    }

    fn open(&self, serial_number: &str) -> Result<DeviceHandle, TransportStatus> {
        let mut st = self.state();
        st.journal.push(Call::Open(serial_number.to_string()));
        let handle = DeviceHandle(st.next_handle);
        let dev = st
            .by_serial(serial_number)
            .ok_or(TransportStatus::DeviceNotFound)?;
        if let Some(Fault::Open(status)) = dev.fault(|f| matches!(f, Fault::Open(_))) {
            return Err(status);
        }
        if dev.handle.is_some() {
            return Err(TransportStatus::DeviceNotOpened);
        }
        dev.handle = Some(handle);
        dev.streaming = false;
        st.next_handle += 1;
        Ok(handle)
    }

    fn configure(&self, handle: DeviceHandle, param: TransportParam) -> Result<(), TransportStatus> {
        let mut st = self.state();
        st.journal.push(Call::Configure(handle, param));
        let dev = st.by_handle(handle)?;
        match dev.fault(|f| matches!(f, Fault::Configure(kind, _) if *kind == param.kind())) {
            Some(Fault::Configure(_, status)) => Err(status),
            _ => Ok(()),
        }
    }

    fn purge(&self, handle: DeviceHandle) -> Result<(), TransportStatus> {
        let mut st = self.state();
        st.journal.push(Call::Purge(handle));
        let dev = st.by_handle(handle)?;
        match dev.fault(|f| matches!(f, Fault::Purge(_))) {
            Some(Fault::Purge(status)) => Err(status),
            _ => Ok(()),
        }
    }

    fn write(&self, handle: DeviceHandle, bytes: &[u8]) -> Result<usize, TransportStatus> {
        let mut st = self.state();
        st.journal.push(Call::Write(handle, bytes.to_vec()));
        let dev = st.by_handle(handle)?;
        match dev.fault(|f| matches!(f, Fault::Write(_) | Fault::PartialWrite)) {
            Some(Fault::Write(status)) => return Err(status),
            Some(Fault::PartialWrite) => return Ok(0),
            _ => {}
        }
        for &b in bytes {
            match b {
                START_STREAMING_COMMAND => dev.streaming = true,
                STOP_STREAMING_COMMAND => dev.streaming = false,
                _ => {}
            }
        }
        Ok(bytes.len())
    }

    fn read(&self, handle: DeviceHandle, buf: &mut [u8]) -> ReadOutcome {
        let mut st = self.state();
        st.journal.push(Call::Read(handle, buf.len()));
        let dev = match st.by_handle(handle) {
            Ok(dev) => dev,
            Err(status) => return ReadOutcome::failed(0, status),
        };
        // A device that is not streaming sends nothing; the read times out.
        if !dev.streaming {
            return ReadOutcome::complete(0);
        }
        let fault = dev.fault(|f| {
            matches!(
                f,
                Fault::Read(_) | Fault::ShortRead { .. } | Fault::OverRead { .. }
            )
        });
        match fault {
            Some(Fault::ShortRead { missing, status }) => {
                let count = buf.len().saturating_sub(missing);
                let bytes = dev.next_bytes(count);
                buf[..count].copy_from_slice(&bytes);
                ReadOutcome { count, status: status.map_or(Ok(()), Err) }
            }
            Some(Fault::OverRead { extra }) => {
                let bytes = dev.next_bytes(buf.len());
                buf.copy_from_slice(&bytes);
                ReadOutcome::complete(buf.len() + extra)
            }
            Some(Fault::Read(status)) => {
                let bytes = dev.next_bytes(buf.len());
                buf.copy_from_slice(&bytes);
                ReadOutcome::failed(buf.len(), status)
            }
            _ => {
                let bytes = dev.next_bytes(buf.len());
                buf.copy_from_slice(&bytes);
                ReadOutcome::complete(buf.len())
            }
        }
    }

    fn close(&self, handle: DeviceHandle) -> Result<(), TransportStatus> {
        let mut st = self.state();
        st.journal.push(Call::Close(handle));
        let dev = st.by_handle(handle)?;
        // The handle is released even when the vendor call reports a failure.
        dev.handle = None;
        dev.streaming = false;
        match dev.fault(|f| matches!(f, Fault::Close(_))) {
            Some(Fault::Close(status)) => Err(status),
            _ => Ok(()),
        }
    }
}
