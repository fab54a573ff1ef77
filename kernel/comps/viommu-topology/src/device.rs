// SPDX-License-Identifier: MPL-2.0

//! The device-framework view this crate works against.
//!
//! Bus enumeration, firmware nodes and the IOMMU drivers themselves live
//! outside of this crate. They are reached through [`BusDevice`] and
//! [`IommuOps`], while the per-device IOMMU state that resolution fills in is
//! kept in a [`DeviceIommu`] embedded by every device.

use alloc::{sync::Arc, vec::Vec};
use core::{
    fmt::Debug,
    sync::atomic::{AtomicBool, Ordering},
};

use spin::Mutex;

use crate::{Error, Result};

/// The identity of a bus device.
///
/// Two handles refer to the same device if and only if their IDs are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u64);

/// A firmware node handle, passed through to the firmware spec unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FwNode(pub u64);

/// The location of a PCI function.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PciDeviceLocation {
    /// PCI segment group, also called the hierarchy or domain.
    pub domain: u32,
    /// Bus number with in [0, 255].
    pub bus: u8,
    /// Device number with in [0, 31].
    pub device: u8,
    /// Function number with in [0, 7].
    pub function: u8,
}

impl PciDeviceLocation {
    pub const MAX_DEVICE: u8 = 31;
    pub const MAX_FUNCTION: u8 = 7;

    /// Returns the 16-bit requester ID, i.e. the bus/device/function encoding
    /// the function uses on the bus.
    pub const fn requester_id(&self) -> u16 {
        (self.bus as u16) << 8
            | ((self.device & Self::MAX_DEVICE) as u16) << 3
            | (self.function & Self::MAX_FUNCTION) as u16
    }
}

/// A memory-mapped register region of a platform device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRegion {
    pub start: u64,
    pub len: u64,
}

/// The bus a device sits on, with what resolution needs to know about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Pci(PciDeviceLocation),
    /// A platform device, with its primary memory resource if it has one.
    Platform(Option<MemRegion>),
    Other,
}

/// A device known to the device framework.
pub trait BusDevice: Send + Sync + Debug {
    fn id(&self) -> DeviceId;

    /// The device name. Platform devices are matched on it.
    fn name(&self) -> &str;

    fn kind(&self) -> BusKind;

    fn fwnode(&self) -> Option<FwNode>;

    /// The IOMMU state of this device.
    fn iommu(&self) -> &DeviceIommu;

    /// The DMA addressing mask, if the bus has set one up.
    fn dma_mask(&self) -> Option<u64> {
        Some(u64::MAX)
    }
}

/// The operations of an IOMMU driver.
pub trait IommuOps: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Attaches `device` to the IOMMU.
    ///
    /// The device framework normally calls this when the device is added.
    /// It is replayed during DMA configuration for devices that missed it.
    fn probe_device(&self, device: &dyn BusDevice) -> Result<()>;
}

/// The firmware description of how a device is translated: which IOMMU and
/// which endpoint IDs.
#[derive(Debug, Clone)]
pub struct FwSpec {
    fwnode: Option<FwNode>,
    ops: Arc<dyn IommuOps>,
    ids: Vec<u32>,
}

impl FwSpec {
    pub fn fwnode(&self) -> Option<FwNode> {
        self.fwnode
    }

    pub fn ops(&self) -> &Arc<dyn IommuOps> {
        &self.ops
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids
    }
}

/// How DMA of a device is set up once configuration is done.
#[derive(Debug, Clone)]
pub struct DmaConfig {
    pub dma_base: u64,
    pub size: u64,
    pub coherent: bool,
    /// The IOMMU translating the device, or `None` for identity DMA.
    pub iommu: Option<Arc<dyn IommuOps>>,
}

/// Per-device IOMMU state.
#[derive(Debug, Default)]
pub struct DeviceIommu {
    fwspec: Mutex<Option<FwSpec>>,
    dma: Mutex<Option<DmaConfig>>,
    mapped: AtomicBool,
}

impl DeviceIommu {
    pub const fn new() -> Self {
        Self {
            fwspec: Mutex::new(None),
            dma: Mutex::new(None),
            mapped: AtomicBool::new(false),
        }
    }

    pub fn fwspec(&self) -> Option<FwSpec> {
        self.fwspec.lock().clone()
    }

    /// Returns the IOMMU operations of the firmware spec, if any.
    pub fn ops(&self) -> Option<Arc<dyn IommuOps>> {
        self.fwspec.lock().as_ref().map(|spec| spec.ops.clone())
    }

    /// Initializes the firmware spec.
    ///
    /// Initializing an already initialized spec succeeds only if it points at
    /// the same IOMMU operations.
    pub fn fwspec_init(&self, fwnode: Option<FwNode>, ops: &Arc<dyn IommuOps>) -> Result<()> {
        let mut fwspec = self.fwspec.lock();
        if let Some(spec) = fwspec.as_ref() {
            return if Arc::ptr_eq(&spec.ops, ops) {
                Ok(())
            } else {
                Err(Error::FwSpecConflict)
            };
        }
        *fwspec = Some(FwSpec {
            fwnode,
            ops: ops.clone(),
            ids: Vec::new(),
        });
        Ok(())
    }

    /// Appends endpoint IDs to the firmware spec.
    pub fn fwspec_add_ids(&self, ids: &[u32]) -> Result<()> {
        let mut fwspec = self.fwspec.lock();
        let spec = fwspec.as_mut().ok_or(Error::InvalidArgs)?;
        spec.ids
            .try_reserve(ids.len())
            .map_err(|_| Error::NoMemory)?;
        spec.ids.extend_from_slice(ids);
        Ok(())
    }

    /// Whether the device has been attached to its IOMMU.
    pub fn is_mapped(&self) -> bool {
        self.mapped.load(Ordering::Acquire)
    }

    pub fn set_mapped(&self) {
        self.mapped.store(true, Ordering::Release);
    }

    pub fn dma_config(&self) -> Option<DmaConfig> {
        self.dma.lock().clone()
    }

    pub(crate) fn set_dma_config(&self, config: DmaConfig) {
        *self.dma.lock() = Some(config);
    }
}
