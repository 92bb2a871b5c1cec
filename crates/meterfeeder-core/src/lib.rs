//! # meterfeeder-core
//!
//! **Driver for USB hardware entropy generators.**
//!
//! `meterfeeder-core` manages a small fleet of USB-attached random number
//! generators (MED1K, MED100K, PQ128MU and friends) and turns their raw byte
//! streams into values an application can use: bytes, 32-bit integers,
//! uniform doubles in `[0, 1)` and standard normal doubles.
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use meterfeeder_core::sim::SimulatedTransport;
//! use meterfeeder_core::{DriverConfig, MeterFeeder};
//!
//! // Any `Transport` works here; the simulator needs no hardware.
//! let sim = Arc::new(SimulatedTransport::new());
//! sim.add_device("QWR4A003", "MED100K 100 kHz v1.0");
//!
//! let mf = MeterFeeder::new(sim, DriverConfig::default()).unwrap();
//! assert!(mf.initialize().is_ok());
//! assert_eq!(mf.get_list_generators(), vec!["QWR4A003|MED100K 100 kHz v1.0"]);
//!
//! let u = mf.rand_uniform("QWR4A003");
//! assert!(u.is_ok());
//! assert!((0.0..1.0).contains(&u.value));
//! ```
//!
//! ## Architecture
//!
//! Transport → Generator (start/stop/read) → Driver (discovery, dispatch)
//! → numeric derivation → MeterFeeder (flat host surface)
//!
//! The USB stack itself is behind the [`Transport`] trait. Every
//! [`Generator`] owns exactly one transport handle; the [`Driver`] owns the
//! generators found by its latest `initialize`.

pub mod config;
pub mod driver;
pub mod error;
pub mod generator;
pub mod meterfeeder;
pub mod numeric;
pub mod sim;
pub mod transport;

pub use config::{DriverConfig, START_STREAMING_COMMAND, STOP_STREAMING_COMMAND};
pub use driver::{Driver, HealthReport};
pub use error::{Error, ErrorKind, Result, Step, error_reason};
pub use generator::{Generator, GeneratorHealth, GeneratorLock, StreamState};
pub use meterfeeder::{MeterFeeder, Reply};
pub use numeric::{int32_from_le, normal_from_uniforms, uniform_from_le48};
pub use transport::{
    DeviceHandle, DeviceInfo, ParamKind, ReadOutcome, Transport, TransportParam, TransportStatus,
};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
