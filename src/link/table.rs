//! Link storage, indexed by device.

use alloc::collections::BTreeMap;
use alloc::collections::TryReserveError;
use alloc::sync::Arc;
use alloc::vec::Vec;

use super::{DevLinkStatus, DeviceLink, LinkId};
use crate::device::DeviceId;

/// Link record of one device.
#[derive(Debug, Default)]
pub(crate) struct DeviceLinks {
    /// Links where this device is the supplier.
    pub consumers: Vec<Arc<DeviceLink>>,
    /// Links where this device is the consumer.
    pub suppliers: Vec<Arc<DeviceLink>>,
    /// Driver binding state.
    pub status: DevLinkStatus,
}

/// Every link in the system.
///
/// Lives behind the graph lock; nothing here locks on its own.
#[derive(Debug, Default)]
pub(crate) struct LinkTable {
    devices: BTreeMap<DeviceId, DeviceLinks>,
    next_id: u64,
    live: usize,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty record for a newly initialized device.
    pub fn insert_device(&mut self, dev: DeviceId) {
        self.devices.entry(dev).or_default();
    }

    /// Drops the record of a freed device.
    pub fn remove_device(&mut self, dev: DeviceId) -> Option<DeviceLinks> {
        self.devices.remove(&dev)
    }

    pub fn status(&self, dev: DeviceId) -> DevLinkStatus {
        self.devices.get(&dev).map_or(DevLinkStatus::NoDriver, |l| l.status)
    }

    pub fn set_status(&mut self, dev: DeviceId, status: DevLinkStatus) {
        if let Some(links) = self.devices.get_mut(&dev) {
            links.status = status;
        }
    }

    /// Links where `dev` is the supplier.
    pub fn consumers(&self, dev: DeviceId) -> &[Arc<DeviceLink>] {
        match self.devices.get(&dev) {
            Some(links) => &links.consumers,
            None => &[],
        }
    }

    /// Links where `dev` is the consumer.
    pub fn suppliers(&self, dev: DeviceId) -> &[Arc<DeviceLink>] {
        match self.devices.get(&dev) {
            Some(links) => &links.suppliers,
            None => &[],
        }
    }

    /// Existing link from `consumer` to `supplier`.
    pub fn find(&self, consumer: DeviceId, supplier: DeviceId) -> Option<Arc<DeviceLink>> {
        self.consumers(supplier)
            .iter()
            .find(|link| link.consumer() == consumer)
            .cloned()
    }

    /// Whether `link` is still in the table.
    pub fn contains(&self, link: &Arc<DeviceLink>) -> bool {
        self.consumers(link.supplier())
            .iter()
            .any(|l| Arc::ptr_eq(l, link))
    }

    pub fn next_link_id(&mut self) -> LinkId {
        self.next_id += 1;
        LinkId(self.next_id)
    }

    /// Number of links in the table.
    pub fn live_links(&self) -> usize {
        self.live
    }

    /// Makes sure inserting one link between the two devices cannot fail.
    pub fn reserve(
        &mut self,
        consumer: DeviceId,
        supplier: DeviceId,
    ) -> Result<(), TryReserveError> {
        if let Some(links) = self.devices.get_mut(&supplier) {
            links.consumers.try_reserve(1)?;
        }
        if let Some(links) = self.devices.get_mut(&consumer) {
            links.suppliers.try_reserve(1)?;
        }
        Ok(())
    }

    /// Hooks `link` into both of its ends.
    ///
    /// Both ends must have a record.
    pub fn insert(&mut self, link: Arc<DeviceLink>) {
        if let Some(links) = self.devices.get_mut(&link.supplier()) {
            links.consumers.push(Arc::clone(&link));
        }
        if let Some(links) = self.devices.get_mut(&link.consumer()) {
            links.suppliers.push(link);
        }
        self.live += 1;
    }

    /// Unhooks `link` from both ends. Returns `false` if it was not present.
    pub fn unlink(&mut self, link: &Arc<DeviceLink>) -> bool {
        let mut found = false;
        if let Some(links) = self.devices.get_mut(&link.supplier()) {
            if let Some(pos) = links.consumers.iter().position(|l| Arc::ptr_eq(l, link)) {
                links.consumers.remove(pos);
                found = true;
            }
        }
        if let Some(links) = self.devices.get_mut(&link.consumer()) {
            if let Some(pos) = links.suppliers.iter().position(|l| Arc::ptr_eq(l, link)) {
                links.suppliers.remove(pos);
            }
        }
        if found {
            self.live -= 1;
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{LinkFlags, LinkStatus};

    fn table_with(devs: &[usize]) -> LinkTable {
        let mut table = LinkTable::new();
        for &d in devs {
            table.insert_device(DeviceId(d));
        }
        table
    }

    #[test]
    fn test_table_insert_and_unlink() {
        let mut table = table_with(&[1, 2]);
        let id = table.next_link_id();
        let link = Arc::new(DeviceLink::new(
            id,
            DeviceId(2),
            DeviceId(1),
            LinkFlags::empty(),
            LinkStatus::Dormant,
        ));

        table.reserve(DeviceId(2), DeviceId(1)).unwrap();
        table.insert(Arc::clone(&link));
        assert_eq!(table.live_links(), 1);
        assert_eq!(table.consumers(DeviceId(1)).len(), 1);
        assert_eq!(table.suppliers(DeviceId(2)).len(), 1);
        assert!(table.contains(&link));
        assert!(Arc::ptr_eq(&table.find(DeviceId(2), DeviceId(1)).unwrap(), &link));
        assert!(table.find(DeviceId(1), DeviceId(2)).is_none());

        assert!(table.unlink(&link));
        assert!(!table.unlink(&link));
        assert_eq!(table.live_links(), 0);
        assert!(table.consumers(DeviceId(1)).is_empty());
        assert!(table.suppliers(DeviceId(2)).is_empty());
    }

    #[test]
    fn test_table_status_defaults() {
        let mut table = table_with(&[7]);
        assert_eq!(table.status(DeviceId(7)), DevLinkStatus::NoDriver);
        table.set_status(DeviceId(7), DevLinkStatus::Probing);
        assert_eq!(table.status(DeviceId(7)), DevLinkStatus::Probing);
        // Unknown devices read as unbound.
        assert_eq!(table.status(DeviceId(8)), DevLinkStatus::NoDriver);
    }
}
