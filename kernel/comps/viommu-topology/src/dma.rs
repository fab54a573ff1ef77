// SPDX-License-Identifier: MPL-2.0

//! DMA configuration of devices behind a virtual IOMMU.

use log::{debug, warn};

use crate::{
    Error, Result,
    device::{BusDevice, DmaConfig},
    registry::TopologyRegistry,
    resolver::{Resolution, resolve},
};

/// Configures DMA of `device`, the alternative to firmware-table based setup
/// for virtualized devices.
///
/// Returns [`Error::ProbeDeferred`] if the device sits behind a virtual IOMMU
/// whose driver has not registered yet; the caller should probe the device
/// again later. Devices that no virtual IOMMU translates get identity DMA.
pub fn configure(registry: &TopologyRegistry, device: &dyn BusDevice) -> Result<()> {
    if device.dma_mask().is_none() {
        warn!("[viommu]: {} has no DMA mask", device.name());
    }

    let ops = match resolve(registry, device) {
        Resolution::Deferred => {
            debug!("[viommu]: defer probing {}", device.name());
            return Err(Error::ProbeDeferred);
        }
        Resolution::NotApplicable => None,
        Resolution::AlreadyTranslated(ops) | Resolution::Translated { ops, .. } => Some(ops),
    };

    // The IOMMU driver may have missed the device when it was added. Replay
    // the probe to get things in order.
    if let Some(ops) = ops.as_ref()
        && !device.iommu().is_mapped()
    {
        match ops.probe_device(device) {
            Ok(()) => device.iommu().set_mapped(),
            Err(err) => warn!(
                "[viommu]: {} failed to probe {}: {}",
                ops.name(),
                device.name(),
                err
            ),
        }
    }

    // Assume coherent DMA with full 64-bit addressing.
    device.iommu().set_dma_config(DmaConfig {
        dma_base: 0,
        size: u64::MAX,
        coherent: true,
        iommu: ops,
    });
    Ok(())
}
