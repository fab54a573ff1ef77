// SPDX-License-Identifier: MPL-2.0

//! Topology tables and their decoder.

use alloc::{sync::Arc, vec::Vec};

use log::{error, info};
use zerocopy::FromBytes;

use crate::{
    Error, Result,
    device::{BusDevice, DeviceId, FwNode, IommuOps},
    layout::{
        RawTopoEndpoint, RawTopoPciRange, TOPO_CONFIG_ITEM_LENGTH, TOPO_CONFIG_NUM_ITEMS,
        TOPO_CONFIG_OFFSET, TOPO_ENTRY_SIZE, TOPO_TYPE_ENDPOINT, TOPO_TYPE_PCI_RANGE,
    },
    reader::{ConfigReader, copy_config},
    registry::TopologyRegistry,
};

/// A range of PCI requester IDs, linearly mapped onto endpoint IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciRange {
    pub hierarchy: u32,
    pub requester_start: u16,
    pub requester_end: u16,
    pub endpoint_start: u32,
}

impl PciRange {
    /// Returns the endpoint ID of `requester_id` in `domain`, if the range covers it.
    pub fn endpoint_id(&self, domain: u32, requester_id: u16) -> Option<u32> {
        if domain != self.hierarchy
            || requester_id < self.requester_start
            || requester_id > self.requester_end
        {
            return None;
        }
        let offset = (requester_id - self.requester_start) as u32;
        Some(self.endpoint_start.wrapping_add(offset))
    }
}

/// A single endpoint identified by the base address of its registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub address: u64,
    pub endpoint_id: u32,
}

/// One item of a topology table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyEntry {
    PciRange(PciRange),
    Endpoint(Endpoint),
    /// An item of a type this decoder does not know. It never matches.
    Unknown { kind: u16 },
}

impl TopologyEntry {
    /// Decodes an item from its raw, zero-padded bytes.
    pub fn parse(bytes: &[u8; TOPO_ENTRY_SIZE]) -> Self {
        let kind = u16::from_le_bytes([bytes[0], bytes[1]]);
        match kind {
            TOPO_TYPE_PCI_RANGE => {
                let Ok((raw, _)) = RawTopoPciRange::read_from_prefix(bytes) else {
                    return Self::Unknown { kind };
                };
                Self::PciRange(PciRange {
                    hierarchy: raw.hierarchy.get() as u32,
                    requester_start: raw.requester_start.get(),
                    requester_end: raw.requester_end.get(),
                    endpoint_start: raw.endpoint_start.get(),
                })
            }
            TOPO_TYPE_ENDPOINT => {
                let Ok((raw, _)) = RawTopoEndpoint::read_from_prefix(bytes) else {
                    return Self::Unknown { kind };
                };
                Self::Endpoint(Endpoint {
                    address: raw.address.get(),
                    endpoint_id: raw.endpoint.get(),
                })
            }
            _ => Self::Unknown { kind },
        }
    }

    /// Returns the endpoint ID this entry assigns to the queried device.
    pub fn endpoint_id(&self, query: &EndpointQuery) -> Option<u32> {
        match (self, query) {
            (
                Self::PciRange(range),
                EndpointQuery::Pci {
                    domain,
                    requester_id,
                },
            ) => range.endpoint_id(*domain, *requester_id),
            (Self::Endpoint(ep), EndpointQuery::Platform { address }) if ep.address == *address => {
                Some(ep.endpoint_id)
            }
            _ => None,
        }
    }
}

/// What a device is looked up by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointQuery {
    Pci { domain: u32, requester_id: u16 },
    Platform { address: u64 },
}

/// The topology described by one virtio-iommu device.
///
/// The IOMMU operations are unknown when the table is decoded. They are bound
/// later, once the driver of the describing device has probed it (see
/// [`TopologyRegistry::bind`]).
#[derive(Debug)]
pub struct TopologyTable {
    device: DeviceId,
    fwnode: Option<FwNode>,
    ops: Option<Arc<dyn IommuOps>>,
    entries: Vec<TopologyEntry>,
}

impl TopologyTable {
    pub fn new(device: DeviceId, entries: Vec<TopologyEntry>) -> Self {
        Self {
            device,
            fwnode: None,
            ops: None,
            entries,
        }
    }

    /// The transport device the table was read from.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn fwnode(&self) -> Option<FwNode> {
        self.fwnode
    }

    pub fn ops(&self) -> Option<&Arc<dyn IommuOps>> {
        self.ops.as_ref()
    }

    pub fn entries(&self) -> &[TopologyEntry] {
        &self.entries
    }

    pub(crate) fn bind(&mut self, fwnode: Option<FwNode>, ops: Option<Arc<dyn IommuOps>>) {
        self.fwnode = ops.as_ref().and(fwnode);
        self.ops = ops;
    }

    /// Returns the endpoint ID of the first entry matching `query`.
    pub fn find_endpoint(&self, query: &EndpointQuery) -> Option<u32> {
        self.entries
            .iter()
            .find_map(|entry| entry.endpoint_id(query))
    }

    /// Decodes the topology table of `device` through `reader`.
    ///
    /// Returns `Ok(None)` if the device describes no topology. Reads that fail
    /// are not fatal; the affected words decode as zero.
    pub fn decode<R: ConfigReader + ?Sized>(device: DeviceId, reader: &R) -> Result<Option<Self>> {
        let offset = reader.read32(TOPO_CONFIG_OFFSET).unwrap_or(0);
        let item_length = reader.read32(TOPO_CONFIG_ITEM_LENGTH).unwrap_or(0);
        let num_items = reader.read32(TOPO_CONFIG_NUM_ITEMS).unwrap_or(0);
        if offset == 0 || item_length == 0 || num_items == 0 {
            return Ok(None);
        }

        let mut entries = Vec::new();
        entries
            .try_reserve_exact(num_items as usize)
            .map_err(|_| Error::NoMemory)?;

        let read_length = (item_length as usize).min(TOPO_ENTRY_SIZE);
        let mut cursor = offset;
        for _ in 0..num_items {
            let mut raw = [0u8; TOPO_ENTRY_SIZE];
            // A misaligned item length leaves the item zeroed, which decodes
            // as an unknown entry.
            let _ = copy_config(reader, &mut raw[..read_length], cursor);
            entries.push(TopologyEntry::parse(&raw));
            cursor = cursor.wrapping_add(item_length);
        }

        Ok(Some(Self::new(device, entries)))
    }
}

/// Decodes the topology of `device` and adds it to `registry`.
pub(crate) fn parse_topology<R: ConfigReader + ?Sized>(
    registry: &TopologyRegistry,
    device: &dyn BusDevice,
    reader: &R,
) -> Result<()> {
    let table = match TopologyTable::decode(device.id(), reader) {
        Ok(Some(table)) => table,
        Ok(None) => return Ok(()),
        Err(err) => {
            error!(
                "[viommu]: failed to decode the topology of {}: {}",
                device.name(),
                err
            );
            return Err(err);
        }
    };
    info!(
        "[viommu]: {} describes {} topology entries",
        device.name(),
        table.entries().len()
    );
    // TODO: call `TopologyRegistry::remove` from the transport's device removal path.
    registry.insert(table);
    Ok(())
}
