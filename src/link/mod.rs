//! Device links: dependency edges between arbitrary devices.
//!
//! A link says "the consumer needs the supplier". Unlike the parent/child
//! tree, links may point anywhere, but they must never close a dependency
//! cycle. Each link owns a reference to both ends for its whole lifetime.
//!
//! # Architecture
//!
//! ```text
//!             consumers                       suppliers
//! ┌──────────┐ ───────> ┌────────────────┐ <─────── ┌──────────┐
//! │ supplier │          │   DeviceLink   │          │ consumer │
//! └──────────┘          │ flags, status  │          └──────────┘
//!                       └────────────────┘
//! ```
//!
//! All links live in one [`LinkTable`] behind the graph lock, indexed by
//! device. The per-link status is atomic so it can be read without the lock.

mod state;
mod table;

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use bitflags::bitflags;

use crate::device::DeviceId;

pub use state::{AtomicLinkStatus, DevLinkStatus, LinkStatus};
pub(crate) use table::LinkTable;

bitflags! {
    /// Link creation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LinkFlags: u32 {
        /// Do not track the link state; the link is informational only.
        const STATELESS = 1 << 0;
        /// Delete the link when the consumer driver unbinds.
        const AUTOREMOVE = 1 << 1;
        /// Runtime PM takes the link into account.
        const PM_RUNTIME = 1 << 2;
        /// Hold the supplier runtime-active for the life of the link.
        /// Ignored without `PM_RUNTIME`.
        const RPM_ACTIVE = 1 << 3;
    }
}

/// Unique identifier for a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId(pub u64);

/// A directed dependency edge from a consumer to a supplier.
pub struct DeviceLink {
    id: LinkId,
    supplier: DeviceId,
    consumer: DeviceId,
    flags: LinkFlags,
    status: AtomicLinkStatus,
    rpm_active: AtomicBool,
}

impl DeviceLink {
    pub(crate) fn new(
        id: LinkId,
        consumer: DeviceId,
        supplier: DeviceId,
        flags: LinkFlags,
        status: LinkStatus,
    ) -> Self {
        Self {
            id,
            supplier,
            consumer,
            flags,
            status: AtomicLinkStatus::new(status),
            rpm_active: AtomicBool::new(false),
        }
    }

    /// Gets the link ID.
    #[inline]
    pub fn id(&self) -> LinkId {
        self.id
    }

    /// The device depended upon.
    #[inline]
    pub fn supplier(&self) -> DeviceId {
        self.supplier
    }

    /// The dependent device.
    #[inline]
    pub fn consumer(&self) -> DeviceId {
        self.consumer
    }

    #[inline]
    pub fn flags(&self) -> LinkFlags {
        self.flags
    }

    #[inline]
    pub fn is_stateless(&self) -> bool {
        self.flags.contains(LinkFlags::STATELESS)
    }

    /// Current status. Safe to call without any lock.
    #[inline]
    pub fn status(&self) -> LinkStatus {
        self.status.load()
    }

    /// Caller holds the graph write lock.
    #[inline]
    pub(crate) fn set_status(&self, status: LinkStatus) {
        self.status.store(status);
    }

    /// Whether the link holds a runtime-PM reference on its supplier.
    #[inline]
    pub fn is_rpm_active(&self) -> bool {
        self.rpm_active.load(Ordering::Acquire)
    }

    pub(crate) fn set_rpm_active(&self) {
        self.rpm_active.store(true, Ordering::Release);
    }
}

impl fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceLink")
            .field("id", &self.id)
            .field("consumer", &self.consumer)
            .field("supplier", &self.supplier)
            .field("flags", &self.flags)
            .field("status", &self.status())
            .finish()
    }
}
