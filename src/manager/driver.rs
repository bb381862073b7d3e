//! Driver probe and release, wrapped around the link protocol.

use crate::device::DeviceId;
use crate::error::{DevError, DevResult};
use crate::link::DevLinkStatus;

use super::DeviceManager;

impl DeviceManager {
    /// Binds a driver to `dev` by calling its probe hook.
    ///
    /// The probe counts as in flight for the whole call and runs under the
    /// device lock. Probing an already bound device does nothing.
    ///
    /// # Errors
    ///
    /// - `NoDevice`: the device is not added.
    /// - `Defer`: a supplier is not bound yet, or probing is blocked.
    /// - `Driver`: the probe hook failed.
    pub fn probe_device(&self, dev: DeviceId) -> DevResult {
        let node = self.node_or_err(dev)?;
        if !node.is_registered() {
            return dev_err!(NoDevice, "cannot probe '{}', not added", node.name());
        }
        let Some(_probe) = self.probe.try_begin() else {
            debug!("{}: probing blocked, deferring", node.name());
            return Err(DevError::Defer);
        };
        let _guard = node.lock();

        if self.device_status(dev) == DevLinkStatus::DriverBound {
            return Ok(());
        }
        if let Err(err) = self.check_suppliers(dev) {
            // Supplier links were already put back; only the device state
            // is left to undo.
            self.links.write().set_status(dev, DevLinkStatus::NoDriver);
            debug!("{}: probe deferred", node.name());
            return Err(err);
        }

        match node.ops().probe(dev) {
            Ok(()) => {
                self.mark_bound(dev)?;
                info!("{}: driver bound", node.name());
                Ok(())
            }
            Err(err) => {
                self.mark_no_driver(dev)?;
                warn!("{}: probe failed: {:?}", node.name(), err);
                Err(DevError::Driver(err))
            }
        }
    }

    /// Unbinds the driver of `dev`, first unbinding every consumer still
    /// probing or bound.
    ///
    /// Does nothing if no driver is bound.
    pub fn release_driver(&self, dev: DeviceId) -> DevResult {
        let node = self.node_or_err(dev)?;
        let _guard = node.lock();

        if self.device_status(dev) != DevLinkStatus::DriverBound {
            return Ok(());
        }
        if self.has_active_consumers(dev) {
            self.force_unbind_consumers(dev);
        }

        node.ops().remove(dev);
        self.mark_unbound(dev)?;
        info!("{}: driver unbound", node.name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;

    use axerrno::{AxError, AxResult};

    use super::*;
    use crate::link::{LinkFlags, LinkStatus};
    use crate::ops::{DeviceOps, NoopDeviceOps};

    struct FailingProbe;

    impl DeviceOps for FailingProbe {
        fn probe(&self, _dev: DeviceId) -> AxResult {
            Err(AxError::Unsupported)
        }
    }

    #[test]
    fn test_probe_binds_after_supplier() {
        let mgr = DeviceManager::default();
        let s = mgr.register("s", None, Arc::new(NoopDeviceOps)).unwrap();
        let c = mgr.register("c", None, Arc::new(NoopDeviceOps)).unwrap();
        let link = mgr.add_link(c, s, LinkFlags::empty()).unwrap();

        assert_eq!(mgr.probe_device(c), Err(DevError::Defer));
        assert_eq!(mgr.device_status(c), DevLinkStatus::NoDriver);
        assert_eq!(link.status(), LinkStatus::Dormant);

        mgr.probe_device(s).unwrap();
        mgr.probe_device(c).unwrap();
        assert_eq!(link.status(), LinkStatus::Active);

        // Unbinding the supplier takes the consumer down first.
        mgr.release_driver(s).unwrap();
        assert_eq!(mgr.device_status(c), DevLinkStatus::NoDriver);
        assert_eq!(mgr.device_status(s), DevLinkStatus::NoDriver);
        assert_eq!(link.status(), LinkStatus::Dormant);
    }

    #[test]
    fn test_probe_failure_reported() {
        let mgr = DeviceManager::default();
        let dev = mgr.register("bad", None, Arc::new(FailingProbe)).unwrap();
        assert_eq!(
            mgr.probe_device(dev),
            Err(DevError::Driver(AxError::Unsupported))
        );
        assert_eq!(mgr.device_status(dev), DevLinkStatus::NoDriver);
    }

    #[test]
    fn test_probe_requires_added_device() {
        let mgr = DeviceManager::default();
        let dev = mgr.initialize("loose", None, Arc::new(NoopDeviceOps)).unwrap();
        assert_eq!(mgr.probe_device(dev), Err(DevError::NoDevice));
        mgr.put_device(dev);
    }
}
