// SPDX-License-Identifier: MPL-2.0

//! Topology discovery for virtio-iommu devices on virtio-mmio.
//!
//! Only devices instantiated by name (for example from the kernel command
//! line) are handled here. Firmware-described devices come with their own
//! topology.

use log::debug;

use crate::{
    Result,
    device::{BusDevice, BusKind},
    layout::{VIRTIO_ID_IOMMU, VirtioIommuFeatures},
    reader::{IoMem, IoMemReader},
    registry::TopologyRegistry,
    table::parse_topology,
};

/// The name of virtio-mmio platform devices.
pub const VIRTIO_MMIO_NAME: &str = "virtio-mmio";

pub(crate) const VIRTIO_MMIO_MAGIC: u32 = 0x7472_6976;

// Register offsets, as in Virtual I/O Device (VIRTIO) Version 1.3, Section
// 4.2.2 MMIO Device Register Layout.
pub(crate) const MAGIC_VALUE: usize = 0x000;
pub(crate) const DEVICE_ID: usize = 0x008;
pub(crate) const DEVICE_FEATURES: usize = 0x010;
pub(crate) const DEVICE_FEATURES_SEL: usize = 0x014;
pub(crate) const CONFIG: usize = 0x100;

/// Decodes the topology described by a virtio-mmio IOMMU and adds it to
/// `registry`.
///
/// `io_mem` maps the registers of `device`. Other virtio-mmio devices, and
/// IOMMUs without a topology description, are ignored.
pub fn probe_topology<M: IoMem + ?Sized>(
    registry: &TopologyRegistry,
    device: &dyn BusDevice,
    io_mem: &M,
) -> Result<()> {
    if device.name() != VIRTIO_MMIO_NAME {
        return Ok(());
    }
    if !matches!(device.kind(), BusKind::Platform(Some(_))) {
        return Ok(());
    }

    // "The driver MUST ignore a device with MagicValue which is not 0x74726976."
    if io_mem.read32(MAGIC_VALUE) != VIRTIO_MMIO_MAGIC {
        debug!(
            "[viommu]: {} has no virtio-mmio magic number",
            device.name()
        );
        return Ok(());
    }
    if io_mem.read32(DEVICE_ID) != VIRTIO_ID_IOMMU {
        return Ok(());
    }

    io_mem.write32(DEVICE_FEATURES_SEL, 0);
    let features = VirtioIommuFeatures::from_bits_truncate(io_mem.read32(DEVICE_FEATURES));
    if !features.contains(VirtioIommuFeatures::TOPOLOGY) {
        debug!(
            "[viommu]: {} does not have a topology description",
            device.name()
        );
        return Ok(());
    }

    parse_topology(registry, device, &IoMemReader::new(io_mem, CONFIG))
}
