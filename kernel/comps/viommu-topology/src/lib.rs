// SPDX-License-Identifier: MPL-2.0

//! Virtio-iommu topology discovery and endpoint resolution.
//!
//! A virtio-iommu device may describe in its configuration space which
//! endpoints it translates, instead of relying on a firmware table. This
//! crate reads that description when the IOMMU's transport device is
//! discovered, and later tells the DMA setup of any other device which IOMMU
//! translates it and under which endpoint ID.
//!
//! The flow is:
//!
//! 1. A transport probe ([`pci::probe_topology`] or [`mmio::probe_topology`])
//!    decodes the topology table of an IOMMU and inserts it into a
//!    [`TopologyRegistry`], usually [`VIOMMU_TOPOLOGY`].
//! 2. Once the IOMMU driver has probed its device, it registers its
//!    operations with [`TopologyRegistry::bind`].
//! 3. Device probes call [`dma::configure`], which resolves the device with
//!    [`resolve`] and sets up its DMA. If the device sits behind an IOMMU whose
//!    driver is not bound yet, [`Error::ProbeDeferred`] asks the caller to
//!    probe again later.

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

pub mod device;
pub mod dma;
mod error;
pub mod layout;
#[cfg(feature = "mmio")]
pub mod mmio;
#[cfg(feature = "pci")]
pub mod pci;
pub mod reader;
mod registry;
mod resolver;
pub mod table;

#[cfg(test)]
mod mock;

pub use self::{
    device::{BusDevice, BusKind, DeviceId, DeviceIommu, FwNode, IommuOps},
    error::{Error, Result},
    registry::TopologyRegistry,
    resolver::{Resolution, resolve},
    table::{EndpointQuery, TopologyEntry, TopologyTable},
};

/// The topology tables of all virtio-iommu devices in the system.
pub static VIOMMU_TOPOLOGY: TopologyRegistry = TopologyRegistry::new();
