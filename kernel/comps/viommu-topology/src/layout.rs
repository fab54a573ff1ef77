// SPDX-License-Identifier: MPL-2.0

//! Virtio-iommu configuration layout shared by all transports.
//!
//! All fields are little-endian on the device side.

use bitflags::bitflags;
use zerocopy::{
    FromBytes, Immutable, KnownLayout, Unaligned,
    byteorder::little_endian::{U16, U32, U64},
};

/// Virtio device ID of the IOMMU.
pub const VIRTIO_ID_IOMMU: u32 = 23;

// Offsets within `struct virtio_iommu_config`, which is laid out as
// `page_size_mask: u64`, `input_range: {u64, u64}`, `domain_range: {u32, u32}`,
// `probe_size: u32` and finally the topology description header.
const TOPO_CONFIG: u32 = 36;
/// Offset of the topology array within the device configuration.
pub const TOPO_CONFIG_OFFSET: u32 = TOPO_CONFIG;
/// Number of items in the topology array.
pub const TOPO_CONFIG_NUM_ITEMS: u32 = TOPO_CONFIG + 4;
/// Length of each item in the topology array, as declared by the device.
pub const TOPO_CONFIG_ITEM_LENGTH: u32 = TOPO_CONFIG + 8;

bitflags! {
    /// Virtio-iommu device features, word 0.
    pub struct VirtioIommuFeatures: u32 {
        const INPUT_RANGE   = 1 << 0;
        const DOMAIN_RANGE  = 1 << 1;
        const MAP_UNMAP     = 1 << 2;
        const BYPASS        = 1 << 3;
        const PROBE         = 1 << 4;
        const MMIO          = 1 << 5;
        /// The configuration space describes which endpoints the IOMMU manages.
        const TOPOLOGY      = 1 << 6;
    }
}

/// Topology item type: a range of PCI requester IDs.
pub const TOPO_TYPE_PCI_RANGE: u16 = 1;
/// Topology item type: a single memory-mapped endpoint.
pub const TOPO_TYPE_ENDPOINT: u16 = 2;

#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub(crate) struct RawTopoPciRange {
    pub(crate) _type: U16,
    pub(crate) hierarchy: U16,
    pub(crate) requester_start: U16,
    pub(crate) requester_end: U16,
    pub(crate) endpoint_start: U32,
}

#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub(crate) struct RawTopoEndpoint {
    pub(crate) _type: U16,
    pub(crate) _reserved: [u8; 2],
    pub(crate) endpoint: U32,
    pub(crate) address: U64,
}

/// The number of bytes the decoder keeps of each topology item.
///
/// Devices may declare longer items. The extra trailing bytes are skipped.
pub const TOPO_ENTRY_SIZE: usize = {
    let pci = size_of::<RawTopoPciRange>();
    let ep = size_of::<RawTopoEndpoint>();
    if pci > ep { pci } else { ep }
};
