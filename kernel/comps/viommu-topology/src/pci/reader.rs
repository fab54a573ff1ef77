// SPDX-License-Identifier: MPL-2.0

use super::{
    PciConfigAccess,
    capability::{CAP_PCI_CFG_DATA, CapabilityWindow},
};
use crate::{Result, reader::ConfigReader};

/// Reads a capability region through the virtio PCI configuration access
/// capability, one 32-bit window at a time.
#[derive(Debug)]
pub struct PciWindowReader<'a> {
    cfg: &'a dyn PciConfigAccess,
    /// Position of the configuration access capability.
    pci_cfg_pos: u16,
    /// The region being read.
    cap: CapabilityWindow,
}

impl<'a> PciWindowReader<'a> {
    pub fn new(cfg: &'a dyn PciConfigAccess, pci_cfg_pos: u16, cap: CapabilityWindow) -> Self {
        Self {
            cfg,
            pci_cfg_pos,
            cap,
        }
    }

    /// Writes `value` at `offset` of the region.
    pub(super) fn write32(&self, offset: u32, value: u32) -> Result<()> {
        self.cap
            .switch_window(self.cfg, self.pci_cfg_pos, 4, offset)?;
        self.cfg.write32(self.pci_cfg_pos + CAP_PCI_CFG_DATA, value);
        Ok(())
    }
}

impl ConfigReader for PciWindowReader<'_> {
    fn read32(&self, offset: u32) -> Result<u32> {
        self.cap
            .switch_window(self.cfg, self.pci_cfg_pos, 4, offset)?;
        Ok(self.cfg.read32(self.pci_cfg_pos + CAP_PCI_CFG_DATA))
    }
}
