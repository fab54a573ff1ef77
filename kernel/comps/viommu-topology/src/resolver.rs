// SPDX-License-Identifier: MPL-2.0

//! Finding the virtual IOMMU that translates a device.

use alloc::sync::Arc;
use core::ops::ControlFlow;

use log::warn;

use crate::{
    device::{BusDevice, BusKind, DeviceId, FwNode, IommuOps},
    registry::TopologyRegistry,
    table::EndpointQuery,
};

/// The outcome of resolving a device against the topology tables.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// The device already carries IOMMU operations. Nothing was changed.
    AlreadyTranslated(Arc<dyn IommuOps>),
    /// The device is translated by `ops` under `endpoint_id`, which has been
    /// recorded in the device's firmware spec.
    Translated {
        endpoint_id: u32,
        ops: Arc<dyn IommuOps>,
    },
    /// A topology table describes the device, but its IOMMU driver has not
    /// registered yet.
    Deferred,
    /// No virtual IOMMU translates the device.
    NotApplicable,
}

#[derive(Debug)]
struct Found {
    endpoint_id: u32,
    owner: DeviceId,
    fwnode: Option<FwNode>,
    ops: Option<Arc<dyn IommuOps>>,
}

/// Returns what the topology tables say about a device.
fn query_of(device: &dyn BusDevice) -> Option<EndpointQuery> {
    match device.kind() {
        BusKind::Pci(location) => Some(EndpointQuery::Pci {
            domain: location.domain,
            requester_id: location.requester_id(),
        }),
        BusKind::Platform(Some(mem)) => Some(EndpointQuery::Platform { address: mem.start }),
        BusKind::Platform(None) | BusKind::Other => None,
    }
}

/// Resolves `device` to the virtual IOMMU and endpoint ID translating it.
///
/// Tables are scanned in registry order, and entries in table order. The
/// first matching entry wins. On success the device's firmware spec is
/// initialized with the IOMMU and the endpoint ID is appended to it.
pub fn resolve(registry: &TopologyRegistry, device: &dyn BusDevice) -> Resolution {
    if let Some(ops) = device.iommu().ops() {
        return Resolution::AlreadyTranslated(ops);
    }

    let Some(query) = query_of(device) else {
        return Resolution::NotApplicable;
    };

    let found = registry.for_each_table(|table| match table.find_endpoint(&query) {
        Some(endpoint_id) => ControlFlow::Break(Found {
            endpoint_id,
            owner: table.device(),
            fwnode: table.fwnode(),
            ops: table.ops().cloned(),
        }),
        None => ControlFlow::Continue(()),
    });
    let Some(found) = found else {
        return Resolution::NotApplicable;
    };

    // An IOMMU never translates its own transport.
    if found.owner == device.id() {
        return Resolution::NotApplicable;
    }

    let Some(ops) = found.ops else {
        return Resolution::Deferred;
    };

    let iommu = device.iommu();
    if let Err(err) = iommu
        .fwspec_init(found.fwnode, &ops)
        .and_then(|()| iommu.fwspec_add_ids(&[found.endpoint_id]))
    {
        warn!(
            "[viommu]: cannot attach {} to {}: {}",
            device.name(),
            ops.name(),
            err
        );
        return Resolution::NotApplicable;
    }

    Resolution::Translated {
        endpoint_id: found.endpoint_id,
        ops,
    }
}
