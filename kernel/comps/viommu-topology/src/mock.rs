// SPDX-License-Identifier: MPL-2.0

//! Emulated devices and transports for the unit tests.

use alloc::{
    format,
    string::{String, ToString},
    sync::Arc,
    vec,
    vec::Vec,
};
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use spin::Mutex;

use crate::{
    Error, Result,
    device::{
        BusDevice, BusKind, DeviceId, DeviceIommu, FwNode, IommuOps, MemRegion, PciDeviceLocation,
    },
    layout::{
        TOPO_CONFIG_ITEM_LENGTH, TOPO_CONFIG_NUM_ITEMS, TOPO_CONFIG_OFFSET, TOPO_TYPE_ENDPOINT,
        TOPO_TYPE_PCI_RANGE,
    },
    reader::{ConfigReader, IoMem},
};
#[cfg(feature = "mmio")]
use crate::{layout::VIRTIO_ID_IOMMU, mmio};

#[derive(Debug)]
pub(crate) struct MockDevice {
    id: DeviceId,
    name: String,
    kind: BusKind,
    fwnode: Option<FwNode>,
    dma_mask: Option<u64>,
    iommu: DeviceIommu,
}

impl MockDevice {
    fn new(id: u64, name: String, kind: BusKind) -> Self {
        Self {
            id: DeviceId(id),
            name,
            kind,
            fwnode: None,
            dma_mask: Some(u64::MAX),
            iommu: DeviceIommu::new(),
        }
    }

    pub(crate) fn pci(id: u64, location: PciDeviceLocation) -> Self {
        let name = format!(
            "{:04x}:{:02x}:{:02x}.{}",
            location.domain, location.bus, location.device, location.function
        );
        Self::new(id, name, BusKind::Pci(location))
    }

    /// A PCI function in `domain` whose requester ID is `requester_id`.
    pub(crate) fn pci_at(id: u64, domain: u32, requester_id: u16) -> Self {
        Self::pci(
            id,
            PciDeviceLocation {
                domain,
                bus: (requester_id >> 8) as u8,
                device: ((requester_id >> 3) & 0x1f) as u8,
                function: (requester_id & 0x7) as u8,
            },
        )
    }

    pub(crate) fn platform(id: u64, name: &str, mem: Option<MemRegion>) -> Self {
        Self::new(id, name.to_string(), BusKind::Platform(mem))
    }

    pub(crate) fn other(id: u64) -> Self {
        Self::new(id, format!("other{}", id), BusKind::Other)
    }

    pub(crate) fn with_fwnode(mut self, fwnode: FwNode) -> Self {
        self.fwnode = Some(fwnode);
        self
    }

    pub(crate) fn with_dma_mask(mut self, dma_mask: Option<u64>) -> Self {
        self.dma_mask = dma_mask;
        self
    }
}

impl BusDevice for MockDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BusKind {
        self.kind
    }

    fn fwnode(&self) -> Option<FwNode> {
        self.fwnode
    }

    fn iommu(&self) -> &DeviceIommu {
        &self.iommu
    }

    fn dma_mask(&self) -> Option<u64> {
        self.dma_mask
    }
}

/// IOMMU operations that count how often a device was probed.
#[derive(Debug)]
pub(crate) struct MockOps {
    name: String,
    failing: bool,
    probed: AtomicUsize,
}

impl MockOps {
    pub(crate) fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            failing: false,
            probed: AtomicUsize::new(0),
        })
    }

    /// Returns operations whose `probe_device` always fails.
    pub(crate) fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            failing: true,
            probed: AtomicUsize::new(0),
        })
    }

    pub(crate) fn probed(&self) -> usize {
        self.probed.load(Ordering::Relaxed)
    }
}

impl IommuOps for MockOps {
    fn name(&self) -> &str {
        &self.name
    }

    fn probe_device(&self, _device: &dyn BusDevice) -> Result<()> {
        self.probed.fetch_add(1, Ordering::Relaxed);
        if self.failing {
            Err(Error::InvalidArgs)
        } else {
            Ok(())
        }
    }
}

/// A little-endian byte image of a virtio-iommu device configuration.
#[derive(Debug, Clone)]
pub(crate) struct ConfigImage {
    bytes: Vec<u8>,
}

impl ConfigImage {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
        }
    }

    pub(crate) fn put_u16(&mut self, at: u32, value: u16) {
        let at = at as usize;
        self.bytes[at..at + 2].copy_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn put_u32(&mut self, at: u32, value: u32) {
        let at = at as usize;
        self.bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn put_u64(&mut self, at: u32, value: u64) {
        let at = at as usize;
        self.bytes[at..at + 8].copy_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn set_header(&mut self, offset: u32, item_length: u32, num_items: u32) {
        self.put_u32(TOPO_CONFIG_OFFSET, offset);
        self.put_u32(TOPO_CONFIG_ITEM_LENGTH, item_length);
        self.put_u32(TOPO_CONFIG_NUM_ITEMS, num_items);
    }

    pub(crate) fn put_pci_range(
        &mut self,
        at: u32,
        hierarchy: u16,
        requester_start: u16,
        requester_end: u16,
        endpoint_start: u32,
    ) {
        self.put_u16(at, TOPO_TYPE_PCI_RANGE);
        self.put_u16(at + 2, hierarchy);
        self.put_u16(at + 4, requester_start);
        self.put_u16(at + 6, requester_end);
        self.put_u32(at + 8, endpoint_start);
    }

    pub(crate) fn put_endpoint(&mut self, at: u32, address: u64, endpoint_id: u32) {
        self.put_u16(at, TOPO_TYPE_ENDPOINT);
        self.put_u16(at + 2, 0);
        self.put_u32(at + 4, endpoint_id);
        self.put_u64(at + 8, address);
    }

    fn get_u32(&self, at: u32) -> Option<u32> {
        let at = at as usize;
        let word = self.bytes.get(at..at.checked_add(4)?)?;
        Some(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
    }

    #[cfg(feature = "mmio")]
    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl ConfigReader for ConfigImage {
    fn read32(&self, offset: u32) -> Result<u32> {
        self.get_u32(offset).ok_or(Error::Overflow)
    }
}

/// Builds a configuration image holding a table of PCI ranges, given as
/// `(hierarchy, requester_start, requester_end, endpoint_start)`.
pub(crate) fn topology_image(
    size: usize,
    offset: u32,
    item_length: u32,
    ranges: &[(u16, u16, u16, u32)],
) -> ConfigImage {
    let mut image = ConfigImage::new(size);
    image.set_header(offset, item_length, ranges.len() as u32);
    for (i, &(hierarchy, start, end, endpoint_start)) in ranges.iter().enumerate() {
        image.put_pci_range(
            offset + i as u32 * item_length,
            hierarchy,
            start,
            end,
            endpoint_start,
        );
    }
    image
}

/// A configuration reader that counts its reads.
#[derive(Debug)]
pub(crate) struct CountingReader {
    image: ConfigImage,
    reads: AtomicUsize,
}

impl CountingReader {
    pub(crate) fn new(image: ConfigImage) -> Self {
        Self {
            image,
            reads: AtomicUsize::new(0),
        }
    }

    /// Backs the words at `base` with `words`. Every other read fails.
    pub(crate) fn from_words(base: u32, words: &[u32]) -> Self {
        let mut image = ConfigImage::new(base as usize + words.len() * 4);
        for (i, &word) in words.iter().enumerate() {
            image.put_u32(base + i as u32 * 4, word);
        }
        Self::new(image)
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

impl ConfigReader for CountingReader {
    fn read32(&self, offset: u32) -> Result<u32> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.image.read32(offset)
    }
}

/// Plain memory-mapped registers.
#[derive(Debug)]
pub(crate) struct MockIoMem {
    bytes: Mutex<Vec<u8>>,
}

impl MockIoMem {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            bytes: Mutex::new(vec![0; size]),
        }
    }
}

impl IoMem for MockIoMem {
    fn read32(&self, offset: usize) -> u32 {
        let bytes = self.bytes.lock();
        u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ])
    }

    fn write32(&self, offset: usize, value: u32) {
        self.bytes.lock()[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

/// The registers of a virtio-mmio device, with working feature selection.
#[cfg(feature = "mmio")]
#[derive(Debug)]
pub(crate) struct MockVirtioMmio {
    regs: MockIoMem,
    features: u64,
    feature_select: AtomicU32,
}

#[cfg(feature = "mmio")]
impl MockVirtioMmio {
    pub(crate) fn new(device_id: u32, features: u64) -> Self {
        let regs = MockIoMem::new(0x200);
        regs.write32(mmio::MAGIC_VALUE, mmio::VIRTIO_MMIO_MAGIC);
        regs.write32(mmio::DEVICE_ID, device_id);
        Self {
            regs,
            features,
            feature_select: AtomicU32::new(u32::MAX),
        }
    }

    pub(crate) fn virtio_iommu(features: u64) -> Self {
        Self::new(VIRTIO_ID_IOMMU, features)
    }

    /// Copies `image` into the device configuration registers.
    pub(crate) fn load_config(&self, image: &ConfigImage) {
        for (i, word) in image.as_bytes().chunks_exact(4).enumerate() {
            let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            self.regs.write32(mmio::CONFIG + i * 4, value);
        }
    }

    /// The feature word the driver selected last.
    pub(crate) fn feature_select(&self) -> u32 {
        self.feature_select.load(Ordering::Relaxed)
    }
}

#[cfg(feature = "mmio")]
impl IoMem for MockVirtioMmio {
    fn read32(&self, offset: usize) -> u32 {
        if offset != mmio::DEVICE_FEATURES {
            return self.regs.read32(offset);
        }
        match self.feature_select() {
            0 => self.features as u32,
            1 => (self.features >> 32) as u32,
            _ => 0,
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        if offset == mmio::DEVICE_FEATURES_SEL {
            self.feature_select.store(value, Ordering::Relaxed);
        } else {
            self.regs.write32(offset, value);
        }
    }
}

/// The configuration space of a virtio-iommu PCI function.
///
/// The function has an MSI-X capability followed by the common config,
/// device config and PCI config access capabilities. The common and device
/// configuration live in BAR 4 and are only reachable through the access
/// window.
#[cfg(feature = "pci")]
#[derive(Debug)]
pub(crate) struct MockPciFunction {
    space: Mutex<[u8; 256]>,
    features: u32,
    feature_select: AtomicU32,
    device_cfg: Mutex<ConfigImage>,
}

#[cfg(feature = "pci")]
impl MockPciFunction {
    pub(crate) const MSIX_CAP: u16 = 0x40;
    pub(crate) const COMMON_CFG_CAP: u16 = 0x4c;
    pub(crate) const DEVICE_CFG_CAP: u16 = 0x5c;
    pub(crate) const PCI_CFG_CAP: u16 = 0x6c;

    const BAR: u8 = 4;
    pub(crate) const COMMON_CFG: u32 = 0x0;
    const COMMON_CFG_LEN: u32 = 0x38;
    pub(crate) const DEVICE_CFG: u32 = 0x2000;
    pub(crate) const DEVICE_CFG_LEN: u32 = 0x1000;

    /// Creates a function offering `features` in feature word 0.
    pub(crate) fn virtio_iommu(features: u32) -> Self {
        let function = Self {
            space: Mutex::new([0; 256]),
            features,
            feature_select: AtomicU32::new(u32::MAX),
            device_cfg: Mutex::new(ConfigImage::new(Self::DEVICE_CFG_LEN as usize)),
        };
        function.poke16(0x00, 0x1af4);
        function.poke16(0x02, 0x1014);
        function.poke16(0x06, 0x0010);
        function.poke8(0x34, Self::MSIX_CAP as u8);

        function.poke8(Self::MSIX_CAP, 0x11);
        function.poke8(Self::MSIX_CAP + 1, Self::COMMON_CFG_CAP as u8);
        function.add_virtio_cap(
            Self::COMMON_CFG_CAP,
            Self::DEVICE_CFG_CAP,
            1,
            Self::COMMON_CFG,
            Self::COMMON_CFG_LEN,
        );
        function.add_virtio_cap(
            Self::DEVICE_CFG_CAP,
            Self::PCI_CFG_CAP,
            4,
            Self::DEVICE_CFG,
            Self::DEVICE_CFG_LEN,
        );
        function.poke8(Self::PCI_CFG_CAP, 0x09);
        function.poke8(Self::PCI_CFG_CAP + 1, 0);
        function.poke8(Self::PCI_CFG_CAP + 2, 20);
        function.poke8(Self::PCI_CFG_CAP + 3, 5);
        function
    }

    fn add_virtio_cap(&self, pos: u16, next: u16, cfg_type: u8, offset: u32, length: u32) {
        self.poke8(pos, 0x09);
        self.poke8(pos + 1, next as u8);
        self.poke8(pos + 2, 16);
        self.poke8(pos + 3, cfg_type);
        self.poke8(pos + 4, Self::BAR);
        self.poke32(pos + 8, offset);
        self.poke32(pos + 12, length);
    }

    pub(crate) fn poke8(&self, offset: u16, value: u8) {
        self.space.lock()[offset as usize] = value;
    }

    pub(crate) fn poke16(&self, offset: u16, value: u16) {
        let offset = offset as usize;
        self.space.lock()[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn poke32(&self, offset: u16, value: u32) {
        let offset = offset as usize;
        self.space.lock()[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn peek32(&self, offset: u16) -> u32 {
        let space = self.space.lock();
        let offset = offset as usize;
        u32::from_le_bytes([
            space[offset],
            space[offset + 1],
            space[offset + 2],
            space[offset + 3],
        ])
    }

    pub(crate) fn put_device_cfg32(&self, offset: u32, value: u32) {
        self.device_cfg.lock().put_u32(offset, value);
    }

    /// Describes a table of PCI ranges in the device configuration.
    pub(crate) fn set_topology(
        &self,
        offset: u32,
        item_length: u32,
        ranges: &[(u16, u16, u16, u32)],
    ) {
        *self.device_cfg.lock() = topology_image(
            Self::DEVICE_CFG_LEN as usize,
            offset,
            item_length,
            ranges,
        );
    }

    /// The feature word the driver selected last.
    pub(crate) fn feature_select(&self) -> u32 {
        self.feature_select.load(Ordering::Relaxed)
    }

    fn is_window_data(offset: u16) -> bool {
        offset == Self::PCI_CFG_CAP + 16
    }

    /// Returns the BAR 4 offset the access window points at.
    fn window_target(&self) -> Option<u32> {
        let bar = self.space.lock()[(Self::PCI_CFG_CAP + 4) as usize];
        let length = self.peek32(Self::PCI_CFG_CAP + 12);
        if bar != Self::BAR || length != 4 {
            return None;
        }
        Some(self.peek32(Self::PCI_CFG_CAP + 8))
    }

    fn window_read(&self) -> u32 {
        const FEATURE: u32 = MockPciFunction::COMMON_CFG + 4;
        match self.window_target() {
            Some(FEATURE) => match self.feature_select() {
                0 => self.features,
                _ => 0,
            },
            Some(offset) if offset >= Self::DEVICE_CFG => self
                .device_cfg
                .lock()
                .get_u32(offset - Self::DEVICE_CFG)
                .unwrap_or(u32::MAX),
            _ => u32::MAX,
        }
    }

    fn window_write(&self, value: u32) {
        if self.window_target() == Some(Self::COMMON_CFG) {
            self.feature_select.store(value, Ordering::Relaxed);
        }
    }
}

#[cfg(feature = "pci")]
impl crate::pci::PciConfigAccess for MockPciFunction {
    fn read8(&self, offset: u16) -> u8 {
        self.space.lock()[offset as usize]
    }

    fn read16(&self, offset: u16) -> u16 {
        let space = self.space.lock();
        let offset = offset as usize;
        u16::from_le_bytes([space[offset], space[offset + 1]])
    }

    fn read32(&self, offset: u16) -> u32 {
        if Self::is_window_data(offset) {
            return self.window_read();
        }
        self.peek32(offset)
    }

    fn write8(&self, offset: u16, val: u8) {
        self.poke8(offset, val);
    }

    fn write16(&self, offset: u16, val: u16) {
        self.poke16(offset, val);
    }

    fn write32(&self, offset: u16, val: u32) {
        if Self::is_window_data(offset) {
            self.window_write(val);
            return;
        }
        self.poke32(offset, val);
    }
}
