//! Link and device binding states.

use core::sync::atomic::{AtomicU8, Ordering};

/// State of a device link.
///
/// ```text
///            supplier bound            consumer probing         consumer bound
/// ┌─────────┐ ──────────> ┌───────────┐ ──────────> ┌───────────────┐ ─────> ┌────────┐
/// │ Dormant │             │ Available │ <────────── │ ConsumerProbe │        │ Active │
/// └─────────┘ <─┐         └───────────┘   deferred  └───────────────┘        └────────┘
///      │        │ cleanup                                                         │
///      │   ┌────────────────┐                    supplier unbinding               │
///      └─> │ SupplierUnbind │ <───────────────────────────────────────────────────┘
///          └────────────────┘
/// ```
///
/// Stateless links stay in `None` forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkStatus {
    /// Stateless link, not tracked.
    None = 0,
    /// Supplier has no driver.
    Dormant = 1,
    /// Supplier is bound, consumer may probe.
    Available = 2,
    /// Consumer probe in progress.
    ConsumerProbe = 3,
    /// Both ends are bound.
    Active = 4,
    /// Supplier driver is going away.
    SupplierUnbind = 5,
}

impl LinkStatus {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Dormant,
            2 => Self::Available,
            3 => Self::ConsumerProbe,
            4 => Self::Active,
            5 => Self::SupplierUnbind,
            _ => Self::None,
        }
    }
}

/// Driver binding state of a device, as seen by its links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevLinkStatus {
    /// No driver bound.
    #[default]
    NoDriver,
    /// Driver probe in progress.
    Probing,
    /// Driver bound.
    DriverBound,
    /// Driver being unbound.
    Unbinding,
}

/// Link status readable without the graph lock.
///
/// Writers hold the graph write lock; readers may not.
#[derive(Debug)]
pub struct AtomicLinkStatus(AtomicU8);

impl AtomicLinkStatus {
    pub const fn new(status: LinkStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    #[inline]
    pub fn load(&self) -> LinkStatus {
        LinkStatus::from_raw(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, status: LinkStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}
