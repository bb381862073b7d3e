//! Callbacks the core invokes on device owners, buses, classes and drivers.

use axerrno::AxResult;
use bitflags::bitflags;

use crate::device::DeviceId;

bitflags! {
    /// Shutdown hooks a device implementation provides.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ShutdownCaps: u8 {
        /// Class-level hook run before any other shutdown step.
        const CLASS_SHUTDOWN_PRE = 1 << 0;
        /// Bus-level shutdown.
        const BUS_SHUTDOWN = 1 << 1;
        /// Driver-level shutdown, used when the bus has none.
        const DRIVER_SHUTDOWN = 1 << 2;
    }
}

/// Operations supplied by whoever owns a device.
///
/// Only the hooks advertised in [`shutdown_caps`](Self::shutdown_caps) are
/// called during the shutdown walk. Every hook runs without the link graph
/// lock held, so it may add or remove links and devices.
pub trait DeviceOps: Send + Sync {
    /// Called exactly once, when the last reference to the device is dropped.
    fn release(&self, _dev: DeviceId) {}

    /// Shutdown hooks this device implements.
    fn shutdown_caps(&self) -> ShutdownCaps {
        ShutdownCaps::empty()
    }

    /// Class pre-shutdown hook.
    fn class_shutdown_pre(&self, _dev: DeviceId) {}

    /// Bus shutdown hook.
    fn bus_shutdown(&self, _dev: DeviceId) {}

    /// Driver shutdown hook.
    fn driver_shutdown(&self, _dev: DeviceId) {}

    /// Binds the driver. Runs with the device lock held.
    fn probe(&self, _dev: DeviceId) -> AxResult {
        Ok(())
    }

    /// Unbinds the driver. Runs with the device lock held.
    fn remove(&self, _dev: DeviceId) {}
}

/// Device operations that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDeviceOps;

impl DeviceOps for NoopDeviceOps {}
