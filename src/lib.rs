#![no_std]

//! # Device Hierarchy Core
//!
//! This crate keeps track of the devices of a system: who their parents are,
//! who depends on whom, in which order they were registered and in which
//! order they must be suspended and shut down. It is designed for `no_std`
//! environments and uses the `alloc` crate for dynamic memory allocation.
//!
//! ## Architecture
//!
//! ### Devices
//! - [`DeviceManager`]: Owns every device, both orders and the link graph
//! - [`DeviceId`]: Handle of a device; the device lives while it is referenced
//! - [`DeviceOps`]: Release, probe, remove and shutdown hooks of a device
//!
//! ### Links
//! - [`DeviceLink`]: A consumer→supplier dependency, holding both ends
//! - [`LinkStatus`]: Per-link state driven by the driver binding protocol
//! - [`DevLinkStatus`]: Per-device binding state as seen by its links
//!
//! ### Orders
//! - [`DeviceList`]: Registry and power-management orders; suppliers and
//!   parents always come before their dependents
//!
//! ## Invariants
//!
//! - The link graph plus the parent/child tree never contains a cycle.
//! - A device is freed exactly once, when its last reference is dropped.
//! - Device hooks never run while the link graph lock is held.
//!
//! ## Examples
//!
//! ```rust,ignore
//! use alloc::sync::Arc;
//! use axdevtree::{DeviceManager, LinkFlags, NoopDeviceOps};
//!
//! let mgr = DeviceManager::default();
//! let bus = mgr.register("bus", None, Arc::new(NoopDeviceOps))?;
//! let clk = mgr.register("clk", Some(bus), Arc::new(NoopDeviceOps))?;
//! let uart = mgr.register("uart", Some(bus), Arc::new(NoopDeviceOps))?;
//!
//! // The uart needs the clock.
//! let link = mgr.add_link(uart, clk, LinkFlags::AUTOREMOVE)?;
//!
//! mgr.probe_device(clk)?;
//! mgr.probe_device(uart)?;
//!
//! // Power off, consumers first.
//! mgr.shutdown();
//! ```

extern crate alloc;
#[macro_use]
extern crate log;

#[macro_use]
mod error;

mod config;
mod device;
mod kref;
mod lifecycle;
mod link;
mod manager;
mod ops;
mod registry;

pub use config::{AssertPolicy, DeviceCoreConfig};
pub use device::DeviceId;
pub use error::{DevError, DevResult};
pub use kref::Kref;
pub use lifecycle::{GateState, ProbeGate, ProbeGuard};
pub use link::{DevLinkStatus, DeviceLink, LinkFlags, LinkId, LinkStatus};
pub use manager::{DeviceManager, DpmOrder};
pub use ops::{DeviceOps, NoopDeviceOps, ShutdownCaps};
pub use registry::DeviceList;
