//! Link graph operations and the driver-binding protocol.

use alloc::collections::BTreeSet;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use super::DeviceManager;
use crate::device::DeviceId;
use crate::error::{DevError, DevResult};
use crate::link::{DevLinkStatus, DeviceLink, LinkFlags, LinkStatus, LinkTable};

/// What forced consumer unbinding must do next.
enum UnbindStep {
    Done,
    WaitForProbes,
    Detach(DeviceId),
}

impl DeviceManager {
    /// Whether `target` is `dev`, or one of its descendants or consumers,
    /// transitively.
    fn is_dependent(&self, table: &LinkTable, dev: DeviceId, target: DeviceId) -> bool {
        let mut visited = BTreeSet::new();
        let mut stack = vec![dev];
        while let Some(cur) = stack.pop() {
            if cur == target {
                return true;
            }
            if !visited.insert(cur) {
                continue;
            }
            stack.extend(self.children(cur));
            stack.extend(table.consumers(cur).iter().map(|link| link.consumer()));
        }
        false
    }

    /// Creates a link making `consumer` depend on `supplier`.
    ///
    /// If the pair is already linked the existing link is returned and
    /// nothing changes. The new link's status follows the current binding
    /// state of both ends, and the consumer with all of its dependents moves
    /// to the tail of both orders.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument`: unknown device, self link, or `STATELESS` combined
    ///   with `AUTOREMOVE`.
    /// - `SupplierNotReady`: the supplier is not in the power-management order.
    /// - `CycleDetected`: the supplier already depends on the consumer.
    /// - `AllocationFailure`: the link limit is reached or memory ran out.
    pub fn add_link(
        &self,
        consumer: DeviceId,
        supplier: DeviceId,
        flags: LinkFlags,
    ) -> DevResult<Arc<DeviceLink>> {
        if consumer == supplier {
            return dev_err!(InvalidArgument, "{} cannot link to itself", consumer);
        }
        if flags.contains(LinkFlags::STATELESS | LinkFlags::AUTOREMOVE) {
            return dev_err!(InvalidArgument, "stateless links cannot auto-remove");
        }
        let consumer_node = self.node_or_err(consumer)?;
        let supplier_node = self.node_or_err(supplier)?;

        let mut table = self.links.write();
        let mut dpm = self.dpm.lock();

        if !supplier_node.in_dpm() {
            return dev_err!(
                SupplierNotReady,
                "{}: supplier {} is not registered",
                consumer_node.name(),
                supplier_node.name()
            );
        }
        if self.is_dependent(&table, consumer, supplier) {
            return dev_err!(
                CycleDetected,
                "{}: {} depends on it already",
                consumer_node.name(),
                supplier_node.name()
            );
        }
        if let Some(link) = table.find(consumer, supplier) {
            return Ok(link);
        }
        if let Some(max) = self.config.max_links {
            if table.live_links() >= max {
                return dev_err!(AllocationFailure, "link limit of {} reached", max);
            }
        }
        if table.reserve(consumer, supplier).is_err() {
            return dev_err!(AllocationFailure, "out of memory for a new link");
        }

        let status = if flags.contains(LinkFlags::STATELESS) {
            LinkStatus::None
        } else {
            match table.status(supplier) {
                DevLinkStatus::DriverBound => match table.status(consumer) {
                    DevLinkStatus::Probing => LinkStatus::ConsumerProbe,
                    DevLinkStatus::DriverBound => LinkStatus::Active,
                    _ => LinkStatus::Available,
                },
                DevLinkStatus::Unbinding => LinkStatus::SupplierUnbind,
                _ => LinkStatus::Dormant,
            }
        };
        let id = table.next_link_id();
        let link = Arc::new(DeviceLink::new(id, consumer, supplier, flags, status));

        if flags.contains(LinkFlags::PM_RUNTIME) {
            if flags.contains(LinkFlags::RPM_ACTIVE) {
                supplier_node.rpm_get();
                link.set_rpm_active();
            }
            consumer_node.rpm_new_link();
        }
        supplier_node.kref().get();
        consumer_node.kref().get();

        // Everything depending on the consumer must now come after the supplier.
        self.reorder_locked(&table, &mut dpm, consumer);

        table.insert(Arc::clone(&link));
        drop(dpm);
        drop(table);

        info!(
            "{}: Linked as a consumer to {}",
            consumer_node.name(),
            supplier_node.name()
        );
        Ok(link)
    }

    /// Unhooks `link`. Caller holds the graph write lock, and must pass the
    /// link to [`free_links`](Self::free_links) once it is released.
    fn del_link_locked(&self, table: &mut LinkTable, link: &Arc<DeviceLink>) {
        info!(
            "{}: Dropping the link to {}",
            self.dev_name(link.consumer()),
            self.dev_name(link.supplier())
        );
        if link.flags().contains(LinkFlags::PM_RUNTIME) {
            if let Some(consumer) = self.node(link.consumer()) {
                consumer.rpm_drop_link();
            }
        }
        table.unlink(link);
    }

    /// Drops what deleted links hold on their ends.
    fn free_links(&self, dead: Vec<Arc<DeviceLink>>) {
        for link in dead {
            if link.is_rpm_active() {
                if let Some(supplier) = self.node(link.supplier()) {
                    supplier.rpm_put();
                }
            }
            self.put_device(link.consumer());
            self.put_device(link.supplier());
        }
    }

    /// Deletes `link` and drops its references to both ends.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the link is no longer in the graph.
    pub fn remove_link(&self, link: &Arc<DeviceLink>) -> DevResult {
        {
            let mut table = self.links.write();
            let _dpm = self.dpm.lock();
            if !table.contains(link) {
                return dev_err!(InvalidArgument, "link {:?} is already gone", link.id());
            }
            self.del_link_locked(&mut table, link);
        }
        self.free_links(alloc::vec![Arc::clone(link)]);
        Ok(())
    }

    /// Puts the device's not-yet-active supplier links back to `Available`.
    fn missing_supplier(table: &LinkTable, dev: DeviceId) {
        for link in table.suppliers(dev) {
            if link.status() == LinkStatus::ConsumerProbe {
                link.set_status(LinkStatus::Available);
            }
        }
    }

    /// Checks that every supplier of `dev` is bound before probing it.
    ///
    /// Supplier links move to `ConsumerProbe` and the device to `Probing`.
    ///
    /// # Errors
    ///
    /// Returns `Defer` when some supplier is not available; links already
    /// moved go back to `Available`. The device is left `Probing` either way.
    pub fn check_suppliers(&self, dev: DeviceId) -> DevResult {
        self.node_or_err(dev)?;
        let mut table = self.links.write();

        let mut ret = Ok(());
        for link in table.suppliers(dev) {
            if link.is_stateless() {
                continue;
            }
            if link.status() != LinkStatus::Available {
                Self::missing_supplier(&table, dev);
                debug!(
                    "{}: supplier {} not ready",
                    self.dev_name(dev),
                    self.dev_name(link.supplier())
                );
                ret = Err(DevError::Defer);
                break;
            }
            link.set_status(LinkStatus::ConsumerProbe);
        }
        table.set_status(dev, DevLinkStatus::Probing);
        ret
    }

    /// Records that a driver bound to `dev`.
    ///
    /// Consumer links become `Available`, supplier links `Active`.
    pub fn mark_bound(&self, dev: DeviceId) -> DevResult {
        self.node_or_err(dev)?;
        let mut table = self.links.write();

        for link in table.consumers(dev) {
            if link.is_stateless() {
                continue;
            }
            // A consumer that lost its own driver leaves `Available` behind.
            self.warn_on(
                !matches!(link.status(), LinkStatus::Dormant | LinkStatus::Available),
                "consumer link in use at driver bind",
            );
            link.set_status(LinkStatus::Available);
        }
        for link in table.suppliers(dev) {
            if link.is_stateless() {
                continue;
            }
            self.warn_on(
                link.status() != LinkStatus::ConsumerProbe,
                "supplier link not probing at driver bind",
            );
            link.set_status(LinkStatus::Active);
        }
        table.set_status(dev, DevLinkStatus::DriverBound);
        Ok(())
    }

    /// Consumer-side cleanup after a failed probe or an unbind.
    ///
    /// Auto-remove supplier links are deleted, the rest become `Available`
    /// unless their supplier is unbinding. Returns the deleted links.
    fn no_driver_locked(&self, table: &mut LinkTable, dev: DeviceId) -> Vec<Arc<DeviceLink>> {
        let mut dead = Vec::new();
        let suppliers: Vec<_> = table.suppliers(dev).iter().rev().cloned().collect();
        for link in suppliers {
            if link.is_stateless() {
                continue;
            }
            if link.flags().contains(LinkFlags::AUTOREMOVE) {
                self.del_link_locked(table, &link);
                dead.push(link);
            } else if link.status() != LinkStatus::SupplierUnbind {
                link.set_status(LinkStatus::Available);
            }
        }
        table.set_status(dev, DevLinkStatus::NoDriver);
        dead
    }

    /// Records that `dev` has no driver after a failed or deferred probe.
    pub fn mark_no_driver(&self, dev: DeviceId) -> DevResult {
        self.node_or_err(dev)?;
        let dead = {
            let mut table = self.links.write();
            self.no_driver_locked(&mut table, dev)
        };
        self.free_links(dead);
        Ok(())
    }

    /// Records that the driver of `dev` is gone.
    ///
    /// Consumer links, which must be `SupplierUnbind` by now, become
    /// `Dormant`; supplier links are cleaned up as for
    /// [`mark_no_driver`](Self::mark_no_driver).
    pub fn mark_unbound(&self, dev: DeviceId) -> DevResult {
        self.node_or_err(dev)?;
        let dead = {
            let mut table = self.links.write();
            for link in table.consumers(dev) {
                if link.is_stateless() {
                    continue;
                }
                self.warn_on(
                    link.status() != LinkStatus::SupplierUnbind,
                    "consumer link not unbinding at driver cleanup",
                );
                link.set_status(LinkStatus::Dormant);
            }
            self.no_driver_locked(&mut table, dev)
        };
        self.free_links(dead);
        Ok(())
    }

    /// Starts unbinding `dev` and reports whether a consumer is still
    /// probing or bound.
    ///
    /// Idle consumer links move to `SupplierUnbind` up to the first busy
    /// one; the device moves to `Unbinding` either way.
    pub fn has_active_consumers(&self, dev: DeviceId) -> bool {
        let mut table = self.links.write();

        let mut busy = false;
        for link in table.consumers(dev) {
            if link.is_stateless() {
                continue;
            }
            match link.status() {
                LinkStatus::ConsumerProbe | LinkStatus::Active => {
                    busy = true;
                    break;
                }
                _ => link.set_status(LinkStatus::SupplierUnbind),
            }
        }
        table.set_status(dev, DevLinkStatus::Unbinding);
        busy
    }

    /// Unbinds the driver of every consumer of `dev`.
    ///
    /// Waits for consumer probes in flight and restarts the scan after each
    /// detach, since the graph may change while its lock is dropped.
    pub fn force_unbind_consumers(&self, dev: DeviceId) {
        loop {
            let table = self.links.write();
            let mut step = UnbindStep::Done;
            for link in table.consumers(dev) {
                if link.is_stateless() {
                    continue;
                }
                let status = link.status();
                if status == LinkStatus::ConsumerProbe {
                    step = UnbindStep::WaitForProbes;
                    break;
                }
                link.set_status(LinkStatus::SupplierUnbind);
                if status == LinkStatus::Active {
                    step = UnbindStep::Detach(link.consumer());
                    break;
                }
            }

            match step {
                UnbindStep::Done => return,
                UnbindStep::WaitForProbes => {
                    drop(table);
                    self.probe.wait_idle();
                    core::hint::spin_loop();
                }
                UnbindStep::Detach(consumer) => {
                    let held = self.get_device(consumer);
                    drop(table);
                    debug!(
                        "{}: detaching consumer {}",
                        self.dev_name(dev),
                        self.dev_name(consumer)
                    );
                    if let Err(err) = self.release_driver(consumer) {
                        warn!("{}: consumer detach failed: {}", self.dev_name(consumer), err);
                    }
                    if held.is_some() {
                        self.put_device(consumer);
                    }
                }
            }
        }
    }

    /// Deletes every link of a device on its way out.
    ///
    /// Supplier links must not be `Active` and consumer links must be
    /// `Dormant` (or stateless) by now.
    pub fn purge(&self, dev: DeviceId) -> DevResult {
        self.node_or_err(dev)?;
        let mut dead = Vec::new();
        {
            let mut table = self.links.write();

            let suppliers: Vec<_> = table.suppliers(dev).iter().rev().cloned().collect();
            for link in suppliers {
                self.warn_on(
                    link.status() == LinkStatus::Active,
                    "purging an active supplier link",
                );
                self.del_link_locked(&mut table, &link);
                dead.push(link);
            }

            let consumers: Vec<_> = table.consumers(dev).iter().rev().cloned().collect();
            for link in consumers {
                self.warn_on(
                    !matches!(link.status(), LinkStatus::Dormant | LinkStatus::None),
                    "purging a consumer link that is not dormant",
                );
                self.del_link_locked(&mut table, &link);
                dead.push(link);
            }
        }
        self.free_links(dead);
        Ok(())
    }

    /// Links where `dev` is the supplier.
    pub fn consumers(&self, dev: DeviceId) -> Vec<Arc<DeviceLink>> {
        self.links.read().consumers(dev).to_vec()
    }

    /// Links where `dev` is the consumer.
    pub fn suppliers(&self, dev: DeviceId) -> Vec<Arc<DeviceLink>> {
        self.links.read().suppliers(dev).to_vec()
    }

    /// Existing link from `consumer` to `supplier`.
    pub fn find_link(&self, consumer: DeviceId, supplier: DeviceId) -> Option<Arc<DeviceLink>> {
        self.links.read().find(consumer, supplier)
    }

    /// Driver binding state of `dev`.
    pub fn device_status(&self, dev: DeviceId) -> DevLinkStatus {
        self.links.read().status(dev)
    }

    /// Number of links in the graph.
    pub fn link_count(&self) -> usize {
        self.links.read().live_links()
    }

    /// Runtime-PM usage count of `dev`.
    pub fn runtime_usage(&self, dev: DeviceId) -> usize {
        self.node(dev).map_or(0, |node| node.rpm_usage())
    }

    /// Number of runtime-PM links where `dev` is the consumer.
    pub fn runtime_links(&self, dev: DeviceId) -> usize {
        self.node(dev).map_or(0, |node| node.rpm_links())
    }
}
