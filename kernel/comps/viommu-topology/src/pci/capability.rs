// SPDX-License-Identifier: MPL-2.0

//! Virtio vendor-specific PCI capabilities.

use log::warn;

use super::{
    PciConfigAccess,
    cfg_space::{CAPABILITIES_POINTER, CAPABILITY_ID_VNDR, CAPABILITY_TTL, Status},
};
use crate::{Error, Result};

/// The virtio PCI capability types (`cfg_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum VirtioPciCapabilityType {
    CommonCfg = 1,
    NotifyCfg = 2,
    IsrCfg = 3,
    DeviceCfg = 4,
    PciCfg = 5,
}

impl TryFrom<u8> for VirtioPciCapabilityType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            1 => Self::CommonCfg,
            2 => Self::NotifyCfg,
            3 => Self::IsrCfg,
            4 => Self::DeviceCfg,
            5 => Self::PciCfg,
            _ => return Err(Error::InvalidArgs),
        })
    }
}

// Field offsets of `struct virtio_pci_cap`.
const CAP_CFG_TYPE: u16 = 3;
const CAP_BAR: u16 = 4;
const CAP_OFFSET: u16 = 8;
const CAP_LENGTH: u16 = 12;
/// Offset of the data window of `struct virtio_pci_cfg_cap`.
pub(super) const CAP_PCI_CFG_DATA: u16 = 16;

/// The highest valid BAR index.
const MAX_BAR: u8 = 5;

/// A virtio capability: a region of `length` bytes at `offset` within `bar`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityWindow {
    /// Position of the capability in configuration space.
    pub pos: u16,
    pub bar: u8,
    pub length: u32,
    pub offset: u32,
}

impl CapabilityWindow {
    /// Looks up the first virtio capability of type `cfg_type`.
    ///
    /// Capabilities pointing at a reserved BAR are skipped, except for the
    /// configuration access capability whose BAR field is programmed by the
    /// driver.
    pub fn find(cfg: &dyn PciConfigAccess, cfg_type: VirtioPciCapabilityType) -> Option<Self> {
        let status = Status::from_bits_truncate(cfg.read16(Status::OFFSET));
        if !status.contains(Status::CAPABILITIES_LIST) {
            return None;
        }

        let mut pos = (cfg.read8(CAPABILITIES_POINTER) & !0x3) as u16;
        let mut ttl = CAPABILITY_TTL;
        while pos != 0 && ttl > 0 {
            ttl -= 1;
            let kind = VirtioPciCapabilityType::try_from(cfg.read8(pos + CAP_CFG_TYPE));
            if cfg.read8(pos) == CAPABILITY_ID_VNDR && kind == Ok(cfg_type) {
                let bar = cfg.read8(pos + CAP_BAR);
                if cfg_type == VirtioPciCapabilityType::PciCfg || bar <= MAX_BAR {
                    return Some(Self {
                        pos,
                        bar,
                        length: cfg.read32(pos + CAP_LENGTH),
                        offset: cfg.read32(pos + CAP_OFFSET),
                    });
                }
            }
            pos = (cfg.read8(pos + 1) & !0x3) as u16;
        }
        None
    }

    /// Points the configuration access capability at `pci_cfg_pos` to
    /// `length` bytes at `offset` of this capability's region.
    ///
    /// The three window fields are written one by one, so accesses to one
    /// device's window must not race.
    pub(super) fn switch_window(
        &self,
        cfg: &dyn PciConfigAccess,
        pci_cfg_pos: u16,
        length: u32,
        offset: u32,
    ) -> Result<()> {
        let start = self.offset.checked_add(offset);
        let fits = start
            .and_then(|start| start.checked_add(length))
            .zip(self.offset.checked_add(self.length))
            .is_some_and(|(end, limit)| end <= limit);
        let Some(start) = start.filter(|_| fits) else {
            warn!(
                "[viommu]: read of {} bytes at offset {:#x} overflows capability of size {}",
                length, offset, self.length
            );
            return Err(Error::Overflow);
        };

        cfg.write8(pci_cfg_pos + CAP_BAR, self.bar);
        cfg.write32(pci_cfg_pos + CAP_LENGTH, length);
        cfg.write32(pci_cfg_pos + CAP_OFFSET, start);
        Ok(())
    }
}
