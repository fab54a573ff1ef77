// SPDX-License-Identifier: MPL-2.0

//! Topology discovery for virtio-iommu devices on PCI.
//!
//! The device configuration of a virtio PCI function lives in one of its
//! BARs. Early in enumeration those BARs are not mapped yet, so the
//! configuration is read through the virtio configuration access capability
//! (`VIRTIO_PCI_CAP_PCI_CFG`), a small window in configuration space that can
//! be pointed at any BAR region.

use core::fmt::Debug;

use log::{debug, warn};

use self::{
    capability::{CapabilityWindow, VirtioPciCapabilityType},
    cfg_space::{DEVICE_ID, VENDOR_ID},
    reader::PciWindowReader,
};
use crate::{
    Error, Result,
    device::BusDevice,
    layout::VirtioIommuFeatures,
    reader::ConfigReader,
    registry::TopologyRegistry,
    table::parse_topology,
};

pub mod capability;
pub mod cfg_space;
pub mod reader;

/// The virtio PCI vendor ID.
pub const VIRTIO_PCI_VENDOR_ID: u16 = 0x1af4;
/// Device IDs of virtio-iommu functions: the one the topology description
/// was first assigned, and the modern `0x1040 + 23`.
pub const VIRTIO_IOMMU_PCI_DEVICE_IDS: [u16; 2] = [0x1014, 0x1057];

// Offsets within `struct virtio_pci_common_cfg`.
const COMMON_DEVICE_FEATURE_SELECT: u32 = 0;
const COMMON_DEVICE_FEATURE: u32 = 4;

/// Access to the configuration space of one PCI function.
pub trait PciConfigAccess: Send + Sync + Debug {
    fn read8(&self, offset: u16) -> u8;

    fn read16(&self, offset: u16) -> u16;

    fn read32(&self, offset: u16) -> u32;

    fn write8(&self, offset: u16, val: u8);

    fn write16(&self, offset: u16, val: u16);

    fn write32(&self, offset: u16, val: u32);
}

/// Decodes the topology described by a virtio-iommu PCI function and adds it
/// to `registry`.
///
/// Functions that are not virtio-iommu devices, or that do not offer a
/// topology description, are ignored.
pub fn probe_topology(
    registry: &TopologyRegistry,
    device: &dyn BusDevice,
    cfg: &dyn PciConfigAccess,
) -> Result<()> {
    let vendor_id = cfg.read16(VENDOR_ID);
    let device_id = cfg.read16(DEVICE_ID);
    if vendor_id != VIRTIO_PCI_VENDOR_ID || !VIRTIO_IOMMU_PCI_DEVICE_IDS.contains(&device_id) {
        return Ok(());
    }

    let find = |cfg_type: VirtioPciCapabilityType, what: &str| {
        CapabilityWindow::find(cfg, cfg_type).ok_or_else(|| {
            warn!("[viommu]: {} capability not found on {}", what, device.name());
            Error::CapabilityNotFound(cfg_type as u8)
        })
    };
    let common = find(VirtioPciCapabilityType::CommonCfg, "common")?;
    let device_cfg = find(VirtioPciCapabilityType::DeviceCfg, "device config")?;
    let pci_cfg = find(VirtioPciCapabilityType::PciCfg, "PCI config")?;

    let common = PciWindowReader::new(cfg, pci_cfg.pos, common);
    common.write32(COMMON_DEVICE_FEATURE_SELECT, 0)?;
    let features =
        VirtioIommuFeatures::from_bits_truncate(common.read32(COMMON_DEVICE_FEATURE)?);
    if !features.contains(VirtioIommuFeatures::TOPOLOGY) {
        debug!(
            "[viommu]: {} does not have a topology description",
            device.name()
        );
        return Ok(());
    }

    let reader = PciWindowReader::new(cfg, pci_cfg.pos, device_cfg);
    parse_topology(registry, device, &reader)
}
