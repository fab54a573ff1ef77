// SPDX-License-Identifier: MPL-2.0

use core::fmt;

/// The error type of virtio-iommu topology discovery and endpoint resolution.
///
/// None of these errors is fatal to the system. The worst outcome of any of
/// them is a device that runs without virtual IOMMU translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A configuration access does not fit in the capability it targets.
    Overflow,
    /// Invalid arguments, e.g. a copy length that is not a multiple of 4.
    InvalidArgs,
    /// Out of memory while allocating a topology table.
    NoMemory,
    /// A required virtio PCI capability (identified by its `cfg_type`) is absent.
    CapabilityNotFound(u8),
    /// The device already carries a firmware spec bound to other IOMMU operations.
    FwSpecConflict,
    /// The IOMMU driver owning the device has not registered yet. Probe again later.
    ProbeDeferred,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Overflow => write!(f, "access overflows the capability window"),
            Self::InvalidArgs => write!(f, "invalid arguments"),
            Self::NoMemory => write!(f, "out of memory"),
            Self::CapabilityNotFound(cfg_type) => {
                write!(f, "virtio PCI capability of type {} not found", cfg_type)
            }
            Self::FwSpecConflict => write!(f, "device is bound to other IOMMU operations"),
            Self::ProbeDeferred => write!(f, "IOMMU not ready, probe deferred"),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
