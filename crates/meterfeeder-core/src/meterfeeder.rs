//! Flat, serial-number based surface for host applications.
//!
//! [`MeterFeeder`] is the context object a host creates once and passes to
//! every call. Nothing here returns `Result`: each call hands back a
//! [`Reply`] holding a value and an error reason, where an empty reason means
//! success. On failure the value is the type's zero (`false`, `0`, `0.0`, an
//! empty buffer) and the reason is capped at `error_reason_max_len` bytes.
//!
//! The driver sits behind one `RwLock`. `initialize`, `shutdown` and `reset`
//! take it exclusively; all other calls share it, so different generators can
//! be read from different threads at the same time.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::DriverConfig;
use crate::driver::{Driver, HealthReport};
use crate::error::{Error, Result, error_reason};
use crate::transport::{DeviceHandle, Transport};

/// A value paired with an error reason (empty on success).
#[derive(Debug, Clone, PartialEq)]
pub struct Reply<T> {
    pub value: T,
    pub error_reason: String,
}

impl<T> Reply<T> {
    pub fn is_ok(&self) -> bool {
        self.error_reason.is_empty()
    }

    pub fn into_result(self) -> std::result::Result<T, String> {
        if self.error_reason.is_empty() {
            Ok(self.value)
        } else {
            Err(self.error_reason)
        }
    }
}

/// Boundary context owning one [`Driver`].
pub struct MeterFeeder {
    driver: RwLock<Driver>,
    error_reason_max_len: usize,
}

impl MeterFeeder {
    pub fn new(transport: Arc<dyn Transport>, config: DriverConfig) -> Result<Self> {
        let error_reason_max_len = config.error_reason_max_len;
        Ok(Self {
            driver: RwLock::new(Driver::new(transport, config)?),
            error_reason_max_len,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Driver> {
        self.driver.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Driver> {
        self.driver.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn reply<T: Default>(&self, result: Result<T>) -> Reply<T> {
        match result {
            Ok(value) => Reply {
                value,
                error_reason: String::new(),
            },
            Err(e) => Reply {
                value: T::default(),
                error_reason: error_reason(&e, self.error_reason_max_len),
            },
        }
    }

    /// Resolve `serial` and run `op` against its handle under the shared lock.
    fn with_serial<T: Default>(
        &self,
        serial: &str,
        op: impl FnOnce(&Driver, DeviceHandle) -> Result<T>,
    ) -> Reply<T> {
        let driver = self.read();
        let result = driver
            .find_by_serial(serial)
            .map(|g| g.handle())
            .ok_or(Error::NotFound)
            .and_then(|handle| op(&*driver, handle));
        self.reply(result)
    }

    pub fn initialize(&self) -> Reply<bool> {
        let result = self.write().initialize().map(|_| true);
        self.reply(result)
    }

    pub fn shutdown(&self) {
        self.write().shutdown();
    }

    /// Shutdown followed by initialize, without releasing the lock in between.
    pub fn reset(&self) -> Reply<bool> {
        let mut driver = self.write();
        driver.shutdown();
        let result = driver.initialize().map(|_| true);
        drop(driver);
        self.reply(result)
    }

    pub fn get_number_generators(&self) -> usize {
        self.read().generator_count()
    }

    /// `"<serial>|<description>"` for each generator, in discovery order.
    pub fn get_list_generators(&self) -> Vec<String> {
        self.read().generators().iter().map(|g| g.listing()).collect()
    }

    /// Like [`get_list_generators`](Self::get_list_generators), but `None`
    /// when more than `capacity` generators are attached.
    pub fn get_list_generators_with_capacity(&self, capacity: usize) -> Option<Vec<String>> {
        let list = self.get_list_generators();
        (list.len() <= capacity).then_some(list)
    }

    pub fn get_serial_list_generators(&self) -> Vec<String> {
        self.read()
            .generators()
            .iter()
            .map(|g| g.serial_number().to_string())
            .collect()
    }

    pub fn get_serial_list_generators_with_capacity(&self, capacity: usize) -> Option<Vec<String>> {
        let list = self.get_serial_list_generators();
        (list.len() <= capacity).then_some(list)
    }

    /// Read `length` bytes from the generator with serial number `serial`.
    ///
    /// Negative lengths are rejected like zero.
    pub fn get_bytes(&self, length: i64, serial: &str) -> Reply<Vec<u8>> {
        self.with_serial(serial, |driver, handle| {
            let length = usize::try_from(length).map_err(|_| Error::InvalidLength {
                serial: serial.to_string(),
                requested: length,
                max: driver.config().max_read_length,
            })?;
            driver.get_bytes(handle, length)
        })
    }

    pub fn get_byte(&self, serial: &str) -> Reply<u8> {
        self.with_serial(serial, |driver, handle| {
            Ok(driver.get_bytes(handle, 1)?[0])
        })
    }

    /// Stop streaming on the generator with serial number `serial`.
    pub fn clear(&self, serial: &str) -> Reply<bool> {
        self.with_serial(serial, |driver, handle| driver.clear(handle).map(|()| true))
    }

    pub fn rand_int32(&self, serial: &str) -> Reply<i32> {
        self.with_serial(serial, Driver::rand_int32)
    }

    pub fn rand_uniform(&self, serial: &str) -> Reply<f64> {
        self.with_serial(serial, Driver::rand_uniform)
    }

    pub fn rand_normal(&self, serial: &str) -> Reply<f64> {
        self.with_serial(serial, Driver::rand_normal)
    }

    pub fn health_report(&self) -> HealthReport {
        self.read().health_report()
    }
}
