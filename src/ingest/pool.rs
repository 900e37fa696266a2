use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::ingest::CaptureDevice;

/// Returned (inside `anyhow::Error`) when a device is already leased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceBusy {
    pub url: String,
}

impl fmt::Display for DeviceBusy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device busy: {} is owned by another session", self.url)
    }
}

impl std::error::Error for DeviceBusy {}

/// Exclusive device ownership across sessions, keyed by device url.
#[derive(Clone, Default)]
pub struct DevicePool {
    leased: Arc<Mutex<HashSet<String>>>,
}

impl DevicePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve and open `device`.
    ///
    /// Fails with `DeviceBusy` when another lease holds the same url, or with
    /// the device's own error when `open` fails (the reservation is undone).
    pub fn acquire(&self, mut device: Box<dyn CaptureDevice>) -> Result<DeviceLease> {
        let key = device.url().to_string();
        {
            let mut leased = lock(&self.leased);
            if !leased.insert(key.clone()) {
                return Err(DeviceBusy { url: key }.into());
            }
        }

        if let Err(err) = device.open() {
            lock(&self.leased).remove(&key);
            return Err(err).with_context(|| format!("open capture device {}", key));
        }

        Ok(DeviceLease {
            device,
            key,
            leased: Arc::clone(&self.leased),
        })
    }

    pub fn is_leased(&self, url: &str) -> bool {
        lock(&self.leased).contains(url)
    }

    pub fn leased_count(&self) -> usize {
        lock(&self.leased).len()
    }
}

/// Scoped device ownership. Dropping the lease releases the device and
/// frees its url for the next session, on every exit path.
pub struct DeviceLease {
    device: Box<dyn CaptureDevice>,
    key: String,
    leased: Arc<Mutex<HashSet<String>>>,
}

impl DeviceLease {
    pub fn url(&self) -> &str {
        &self.key
    }

    pub fn device(&self) -> &dyn CaptureDevice {
        self.device.as_ref()
    }

    pub fn device_mut(&mut self) -> &mut dyn CaptureDevice {
        self.device.as_mut()
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.device.release();
        lock(&self.leased).remove(&self.key);
        log::debug!("device lease on {} returned", self.key);
    }
}

// A panicking session must not wedge the pool, so poisoning is ignored.
fn lock(set: &Mutex<HashSet<String>>) -> std::sync::MutexGuard<'_, HashSet<String>> {
    match set.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{CameraConfig, SyntheticCamera};

    fn stub(url: &str) -> Box<dyn CaptureDevice> {
        Box::new(
            SyntheticCamera::new(&CameraConfig {
                url: url.to_string(),
                width: 32,
                height: 24,
                ..CameraConfig::default()
            })
            .unwrap(),
        )
    }

    #[test]
    fn second_lease_on_same_device_is_busy() {
        let pool = DevicePool::new();
        let first = pool.acquire(stub("stub://cam0")).unwrap();
        let err = pool.acquire(stub("stub://cam0")).err().unwrap();
        assert!(err.downcast_ref::<DeviceBusy>().is_some());

        let other = pool.acquire(stub("stub://cam1")).unwrap();
        assert_eq!(pool.leased_count(), 2);

        drop(first);
        assert!(!pool.is_leased("stub://cam0"));
        assert!(pool.acquire(stub("stub://cam0")).is_ok());
        drop(other);
    }

    #[test]
    fn failed_open_frees_reservation() {
        let pool = DevicePool::new();
        let err = pool.acquire(stub("stub://cam?fail_open=true")).err().unwrap();
        assert!(err.downcast_ref::<DeviceBusy>().is_none());
        assert_eq!(pool.leased_count(), 0);
    }

    #[test]
    fn lease_reads_frames_until_dropped() {
        let pool = DevicePool::new();
        let mut lease = pool.acquire(stub("stub://cam")).unwrap();
        assert!(lease.device_mut().read_frame().is_ok());
        assert_eq!(lease.device().stats().frames_read, 1);
        drop(lease);
        assert_eq!(pool.leased_count(), 0);
    }
}
