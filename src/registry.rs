//! Ordered device lists.
//!
//! The device core keeps two of these: the registry order, walked backwards at
//! shutdown, and the power-management order used for suspend/resume. Both
//! encode "dependencies first": a supplier always sits before its consumers
//! and a parent before its children.
//!
//! A plain vector with linear search is used, which is fine for the device
//! counts a single machine sees. Locking is left to the owner.

use alloc::vec::Vec;

use crate::device::DeviceId;

/// Ordered sequence of distinct devices.
#[derive(Debug, Default, Clone)]
pub struct DeviceList {
    entries: Vec<DeviceId>,
}

impl DeviceList {
    /// Creates an empty list.
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Number of devices on the list.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Position of `dev`, if it is on the list.
    pub fn position(&self, dev: DeviceId) -> Option<usize> {
        self.entries.iter().position(|&d| d == dev)
    }

    /// Whether `dev` is on the list.
    #[inline]
    pub fn contains(&self, dev: DeviceId) -> bool {
        self.position(dev).is_some()
    }

    /// Appends `dev` at the tail.
    ///
    /// A device already on the list is moved to the tail instead.
    pub fn push_back(&mut self, dev: DeviceId) {
        self.remove(dev);
        self.entries.push(dev);
    }

    /// Takes `dev` off the list. Returns `false` if it was not there.
    pub fn remove(&mut self, dev: DeviceId) -> bool {
        match self.position(dev) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Takes the tail device off the list.
    pub fn pop_last(&mut self) -> Option<DeviceId> {
        self.entries.pop()
    }

    /// Moves `dev` to the tail. Devices not on the list are left alone.
    pub fn move_last(&mut self, dev: DeviceId) -> bool {
        if !self.remove(dev) {
            return false;
        }
        self.entries.push(dev);
        true
    }

    /// Moves `deva` right in front of `devb`.
    ///
    /// Both must be on the list; otherwise nothing changes.
    pub fn move_before(&mut self, deva: DeviceId, devb: DeviceId) -> bool {
        if deva == devb || !self.contains(devb) || !self.remove(deva) {
            return false;
        }
        // `devb` is still present after removing `deva`.
        let pos = self.position(devb).unwrap_or(self.entries.len());
        self.entries.insert(pos, deva);
        true
    }

    /// Moves `deva` right behind `devb`.
    ///
    /// Both must be on the list; otherwise nothing changes.
    pub fn move_after(&mut self, deva: DeviceId, devb: DeviceId) -> bool {
        if deva == devb || !self.contains(devb) || !self.remove(deva) {
            return false;
        }
        let pos = self.position(devb).map_or(self.entries.len(), |p| p + 1);
        self.entries.insert(pos, deva);
        true
    }

    /// Iterates from head to tail.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = DeviceId> + '_ {
        self.entries.iter().copied()
    }

    /// Copies the current order out.
    pub fn to_vec(&self) -> Vec<DeviceId> {
        self.entries.clone()
    }
}
