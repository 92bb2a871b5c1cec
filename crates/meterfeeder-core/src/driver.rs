//! Registry of attached generators.
//!
//! Architecture:
//! 1. Enumerate devices on the transport
//! 2. Keep only serials carrying the vendor prefix
//! 3. Open each accepted device and apply latency, packet size and timeouts
//! 4. Replace the collection only if every accepted device came up
//! 5. Dispatch entropy requests to the generator named by handle or serial
//!
//! A [`Driver`] is not internally locked: `initialize` and `shutdown` need
//! `&mut self`, everything else works through `&self`. Wrap it in a lock to
//! share it between threads (see [`MeterFeeder`](crate::MeterFeeder)).

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::config::DriverConfig;
use crate::error::{Error, Result};
use crate::generator::{Generator, GeneratorHealth, StreamState};
use crate::numeric;
use crate::transport::{DeviceHandle, DeviceInfo, Transport};

/// Health of every generator in the collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub total: usize,
    /// Generators that have not been closed.
    pub open: usize,
    pub generators: Vec<GeneratorHealth>,
}

/// Owns the generators found by the most recent [`initialize`](Driver::initialize).
pub struct Driver {
    transport: Arc<dyn Transport>,
    config: DriverConfig,
    generators: Vec<Generator>,
}

impl Driver {
    /// Create an empty driver. Fails if `config` does not validate.
    pub fn new(transport: Arc<dyn Transport>, config: DriverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            config,
            generators: Vec::new(),
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Discover, open and configure every generator.
    ///
    /// Any generators from a previous cycle are closed first. On failure the
    /// collection is left empty and every device opened during this call has
    /// been closed again. Returns the number of generators.
    pub fn initialize(&mut self) -> Result<usize> {
        self.shutdown();

        let devices = self.transport.list_devices().map_err(Error::Enumeration)?;

        let mut seen = HashSet::new();
        let mut opened = Vec::new();
        for info in devices {
            if !self.config.accepts(&info.serial_number) {
                log::debug!("skipping {} ({})", info.serial_number, info.description);
                continue;
            }
            if !seen.insert(info.serial_number.clone()) {
                log::warn!("duplicate serial number {} ignored", info.serial_number);
                continue;
            }
            // Dropping `opened` on the error path closes what was already opened.
            opened.push(self.open_generator(info)?);
        }

        if opened.is_empty() {
            return Err(Error::NoGenerators);
        }

        self.generators = opened;
        log::info!("initialized {} generator(s)", self.generators.len());
        Ok(self.generators.len())
    }

    fn open_generator(&self, info: DeviceInfo) -> Result<Generator> {
        let handle = self
            .transport
            .open(&info.serial_number)
            .map_err(|status| Error::Open {
                serial: info.serial_number.clone(),
                status,
            })?;
        for param in self.config.transport_params() {
            log::debug!("{}: setting {:?}", info.serial_number, param);
            if let Err(status) = self.transport.configure(handle, param) {
                if let Err(close_status) = self.transport.close(handle) {
                    log::warn!(
                        "failed to close {} after configuration error: {close_status}",
                        info.serial_number
                    );
                }
                return Err(Error::Configuration {
                    serial: info.serial_number,
                    param: param.kind(),
                    status,
                });
            }
        }
        Ok(Generator::new(
            info,
            handle,
            Arc::clone(&self.transport),
            self.config.max_read_length,
        ))
    }

    /// Close every generator and empty the collection. Never fails.
    pub fn shutdown(&mut self) {
        if self.generators.is_empty() {
            return;
        }
        for generator in &self.generators {
            if let Err(e) = generator.close() {
                log::warn!("{e}");
            }
        }
        log::info!("shut down {} generator(s)", self.generators.len());
        self.generators.clear();
    }

    pub fn generator_count(&self) -> usize {
        self.generators.len()
    }

    /// Generators in discovery order.
    pub fn generators(&self) -> &[Generator] {
        &self.generators
    }

    pub fn find_by_handle(&self, handle: DeviceHandle) -> Option<&Generator> {
        self.generators.iter().find(|g| g.handle() == handle)
    }

    pub fn find_by_serial(&self, serial_number: &str) -> Option<&Generator> {
        self.generators
            .iter()
            .find(|g| g.serial_number() == serial_number)
    }

    fn resolve(&self, handle: DeviceHandle) -> Result<&Generator> {
        self.find_by_handle(handle)
            .ok_or(Error::UnknownHandle(handle))
    }

    /// Start streaming and read `length` bytes from one generator.
    ///
    /// The generator stays locked for the whole sequence. Streaming is left
    /// running afterwards unless `stop_after_read` is configured; starting
    /// again purges the device first, so repeated calls are safe.
    pub fn get_bytes(&self, handle: DeviceHandle, length: usize) -> Result<Vec<u8>> {
        let generator = self.resolve(handle)?;
        let mut link = generator.lock();
        link.start_streaming()?;
        let bytes = link.read(length)?;
        if self.config.stop_after_read {
            link.stop_streaming()?;
        }
        Ok(bytes)
    }

    /// Stop streaming on one generator.
    pub fn clear(&self, handle: DeviceHandle) -> Result<()> {
        self.resolve(handle)?.stop_streaming()
    }

    pub fn rand_int32(&self, handle: DeviceHandle) -> Result<i32> {
        numeric::rand_int32(|n| self.get_bytes(handle, n))
    }

    pub fn rand_uniform(&self, handle: DeviceHandle) -> Result<f64> {
        numeric::rand_uniform(|n| self.get_bytes(handle, n))
    }

    pub fn rand_normal(&self, handle: DeviceHandle) -> Result<f64> {
        numeric::rand_normal(|n| self.get_bytes(handle, n))
    }

    pub fn health_report(&self) -> HealthReport {
        let generators: Vec<GeneratorHealth> =
            self.generators.iter().map(Generator::health).collect();
        HealthReport {
            total: generators.len(),
            open: generators
                .iter()
                .filter(|g| g.state != StreamState::Closed)
                .count(),
            generators,
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sim::{Call, Fault, SimulatedTransport};
    use crate::transport::{ParamKind, TransportParam, TransportStatus};

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn sim_with(serials: &[&str]) -> Arc<SimulatedTransport> {
        let sim = Arc::new(SimulatedTransport::new());
        for serial in serials {
            sim.add_device(serial, "MED100K 100 kHz v1.0");
        }
        sim
    }

    fn driver(sim: &Arc<SimulatedTransport>) -> Driver {
        init_logs();
        Driver::new(sim.clone(), DriverConfig::default()).unwrap()
    }

    #[test]
    fn test_initialize_counts_prefixed_devices_only() {
        let sim = sim_with(&["QWR4A001", "FT232R01", "QWR4A002", "A5XK3RJT"]);
        let mut d = driver(&sim);
        assert_eq!(d.initialize().unwrap(), 2);
        assert_eq!(d.generator_count(), 2);
        let serials: Vec<_> = d.generators().iter().map(|g| g.serial_number()).collect();
        assert_eq!(serials, vec!["QWR4A001", "QWR4A002"]);
        // Non-matching devices are never opened.
        assert!(!sim.journal().contains(&Call::Open("FT232R01".into())));
    }

    #[test]
    fn test_initialize_applies_three_params_in_order() {
        let sim = sim_with(&["QWR4A001"]);
        let mut d = driver(&sim);
        d.initialize().unwrap();
        let h = d.generators()[0].handle();
        let configured: Vec<_> = sim
            .journal()
            .into_iter()
            .filter_map(|c| match c {
                Call::Configure(handle, p) if handle == h => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(configured, DriverConfig::default().transport_params().to_vec());
    }

    #[test]
    fn test_no_matching_devices() {
        let sim = sim_with(&["FT232R01"]);
        let mut d = driver(&sim);
        let err = d.initialize().unwrap_err();
        assert_eq!(err, Error::NoGenerators);
        assert_eq!(err.to_string(), "No generators connected");
        assert_eq!(d.generator_count(), 0);
    }

    #[test]
    fn test_enumeration_failure() {
        let sim = sim_with(&["QWR4A001"]);
        sim.fail_enumeration(Some(TransportStatus::IoError));
        let mut d = driver(&sim);
        let err = d.initialize().unwrap_err();
        assert_eq!(err, Error::Enumeration(TransportStatus::IoError));
        assert_eq!(err.kind(), ErrorKind::Discovery);
    }

    #[test]
    fn test_open_failure_aborts_and_closes_earlier_devices() {
        let sim = sim_with(&["QWR4A001", "QWR4A002"]);
        sim.inject("QWR4A002", Fault::Open(TransportStatus::DeviceNotOpened));
        let mut d = driver(&sim);
        let err = d.initialize().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Open);
        assert!(err.to_string().contains("QWR4A002"));
        assert_eq!(d.generator_count(), 0);
        assert_eq!(sim.open_count(), 0);
    }

    #[test]
    fn test_configuration_failure_names_device_and_param() {
        let sim = sim_with(&["QWR4A001", "QWR4A002"]);
        sim.inject(
            "QWR4A002",
            Fault::Configure(ParamKind::UsbPacketSize, TransportStatus::InvalidParameter),
        );
        let mut d = driver(&sim);
        let err = d.initialize().unwrap_err();
        assert_eq!(
            err,
            Error::Configuration {
                serial: "QWR4A002".into(),
                param: ParamKind::UsbPacketSize,
                status: TransportStatus::InvalidParameter,
            }
        );
        assert_eq!(
            err.to_string(),
            "Failed to set in/out USB packet size for QWR4A002 [invalid parameter [6]]"
        );
        // Only the first device got as far as its timeouts.
        let timeouts_set = sim
            .journal()
            .iter()
            .filter(|c| matches!(c, Call::Configure(_, TransportParam::Timeouts { .. })))
            .count();
        assert_eq!(timeouts_set, 1);
        assert_eq!(sim.open_count(), 0);
        assert_eq!(d.generator_count(), 0);
    }

    #[test]
    fn test_reinitialize_closes_previous_generators() {
        let sim = sim_with(&["QWR4A001", "QWR4A002"]);
        let mut d = driver(&sim);
        d.initialize().unwrap();
        let old = d.generators()[0].handle();
        assert_eq!(d.initialize().unwrap(), 2);
        assert!(sim.journal().contains(&Call::Close(old)));
        assert_eq!(sim.open_count(), 2);
        assert!(d.find_by_handle(old).is_none());
    }

    #[test]
    fn test_duplicate_serials_skipped() {
        let sim = sim_with(&["QWR4A001", "QWR4A001"]);
        let mut d = driver(&sim);
        assert_eq!(d.initialize().unwrap(), 1);
    }

    #[test]
    fn test_shutdown_continues_past_close_failure() {
        let sim = sim_with(&["QWR4A001", "QWR4A002"]);
        let mut d = driver(&sim);
        d.initialize().unwrap();
        sim.inject("QWR4A001", Fault::Close(TransportStatus::IoError));
        d.shutdown();
        assert_eq!(d.generator_count(), 0);
        assert_eq!(sim.open_count(), 0);
        d.shutdown();
    }

    #[test]
    fn test_lookup_by_serial_and_handle() {
        let sim = sim_with(&["QWR4A001", "QWR4A002"]);
        let mut d = driver(&sim);
        d.initialize().unwrap();
        let g = d.find_by_serial("QWR4A002").unwrap();
        assert_eq!(d.find_by_handle(g.handle()).unwrap().serial_number(), "QWR4A002");
        assert!(d.find_by_serial("QWR4A003").is_none());
        assert!(d.find_by_handle(DeviceHandle(0xdead)).is_none());
    }

    #[test]
    fn test_get_bytes_starts_then_reads() {
        let sim = sim_with(&["QWR4A001"]);
        let mut d = driver(&sim);
        d.initialize().unwrap();
        let h = d.generators()[0].handle();
        sim.clear_journal();
        assert_eq!(d.get_bytes(h, 10).unwrap().len(), 10);
        assert_eq!(
            sim.journal(),
            vec![
                Call::Purge(h),
                Call::Write(h, vec![crate::config::START_STREAMING_COMMAND]),
                Call::Read(h, 10),
            ]
        );
        assert!(sim.is_streaming("QWR4A001"));
        // Repeating without an intervening stop works.
        assert_eq!(d.get_bytes(h, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_get_bytes_symmetric_when_configured() {
        let sim = sim_with(&["QWR4A001"]);
        init_logs();
        let config = DriverConfig {
            stop_after_read: true,
            ..DriverConfig::default()
        };
        let mut d = Driver::new(sim.clone(), config).unwrap();
        d.initialize().unwrap();
        let h = d.generators()[0].handle();
        d.get_bytes(h, 4).unwrap();
        assert!(!sim.is_streaming("QWR4A001"));
    }

    #[test]
    fn test_get_bytes_failure_names_serial_and_step() {
        let sim = sim_with(&["QWR4A001"]);
        let mut d = driver(&sim);
        d.initialize().unwrap();
        let h = d.generators()[0].handle();

        sim.inject("QWR4A001", Fault::Write(TransportStatus::IoError));
        let msg = d.get_bytes(h, 4).unwrap_err().to_string();
        assert!(msg.contains("QWR4A001") && msg.contains("start streaming"), "{msg}");

        sim.clear_faults("QWR4A001");
        sim.inject(
            "QWR4A001",
            Fault::ShortRead {
                missing: 1,
                status: None,
            },
        );
        let msg = d.get_bytes(h, 4).unwrap_err().to_string();
        assert!(msg.contains("QWR4A001") && msg.contains("reading"), "{msg}");
    }

    #[test]
    fn test_unknown_handle() {
        let sim = sim_with(&["QWR4A001"]);
        let mut d = driver(&sim);
        d.initialize().unwrap();
        let err = d.get_bytes(DeviceHandle(1), 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_clear_stops_streaming() {
        let sim = sim_with(&["QWR4A001"]);
        let mut d = driver(&sim);
        d.initialize().unwrap();
        let h = d.generators()[0].handle();
        d.get_bytes(h, 1).unwrap();
        d.clear(h).unwrap();
        assert!(!sim.is_streaming("QWR4A001"));
        assert_eq!(d.generators()[0].state(), StreamState::Idle);
    }

    #[test]
    fn test_rand_values_from_scripted_bytes() {
        let sim = sim_with(&["QWR4A001"]);
        sim.script_bytes("QWR4A001", &[0xFF, 0xFF, 0xFF, 0xFF]);
        sim.script_bytes("QWR4A001", &[0, 0, 0, 0, 0, 0]);
        let mut d = driver(&sim);
        d.initialize().unwrap();
        let h = d.generators()[0].handle();
        assert_eq!(d.rand_int32(h).unwrap(), -1);
        assert_eq!(d.rand_uniform(h).unwrap(), 0.0);
        let u = d.rand_uniform(h).unwrap();
        assert!((0.0..1.0).contains(&u));
    }

    #[test]
    fn test_rand_normal_fails_without_value_on_read_error() {
        let sim = sim_with(&["QWR4A001"]);
        let mut d = driver(&sim);
        d.initialize().unwrap();
        let h = d.generators()[0].handle();
        sim.inject("QWR4A001", Fault::Read(TransportStatus::IoError));
        assert_eq!(d.rand_normal(h).unwrap_err().kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_health_report_tracks_bytes_and_failures() {
        let sim = sim_with(&["QWR4A001", "QWR4A002"]);
        let mut d = driver(&sim);
        d.initialize().unwrap();
        let h1 = d.generators()[0].handle();
        let h2 = d.generators()[1].handle();
        d.get_bytes(h1, 32).unwrap();
        sim.inject("QWR4A002", Fault::Purge(TransportStatus::IoError));
        assert!(d.get_bytes(h2, 32).is_err());

        let report = d.health_report();
        assert_eq!(report.total, 2);
        assert_eq!(report.open, 2);
        assert_eq!(report.generators[0].bytes, 32);
        assert_eq!(report.generators[0].state, StreamState::Streaming);
        assert_eq!(report.generators[1].failures, 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["generators"][0]["state"], "streaming");
    }

    #[test]
    fn test_drop_closes_all_devices() {
        let sim = sim_with(&["QWR4A001", "QWR4A002"]);
        {
            let mut d = driver(&sim);
            d.initialize().unwrap();
            assert_eq!(sim.open_count(), 2);
        }
        assert_eq!(sim.open_count(), 0);
    }
}
