// SPDX-License-Identifier: MPL-2.0

//! 32-bit reads of a device configuration region.
//!
//! The topology structures are only ever accessed as 32-bit words, so a
//! transport merely has to provide [`ConfigReader::read32`]. Two transports
//! exist: [`IoMemReader`] reads memory-mapped configuration directly, while
//! the PCI transport moves a small access window over the region before each
//! read (see [`crate::pci`]).

use log::warn;

use crate::{Error, Result};

/// A device configuration region that can be read 32 bits at a time.
pub trait ConfigReader {
    /// Reads the 32-bit value at byte `offset` of the region.
    fn read32(&self, offset: u32) -> Result<u32>;
}

/// Memory-mapped I/O registers.
pub trait IoMem: Send + Sync {
    fn read32(&self, offset: usize) -> u32;

    fn write32(&self, offset: usize, value: u32);
}

/// Reads configuration that is directly mapped at `base` of an [`IoMem`].
///
/// The caller guarantees that the mapping covers every read.
#[derive(Debug)]
pub struct IoMemReader<'a, M: ?Sized> {
    io_mem: &'a M,
    base: usize,
}

impl<'a, M: IoMem + ?Sized> IoMemReader<'a, M> {
    pub fn new(io_mem: &'a M, base: usize) -> Self {
        Self { io_mem, base }
    }
}

impl<M: IoMem + ?Sized> ConfigReader for IoMemReader<'_, M> {
    fn read32(&self, offset: u32) -> Result<u32> {
        Ok(self.io_mem.read32(self.base + offset as usize))
    }
}

/// Copies `dest.len()` bytes of configuration starting at `offset` into `dest`.
///
/// The length must be a multiple of 4, otherwise nothing is read and
/// [`Error::InvalidArgs`] is returned. Words that fail to read are stored as
/// zero. Words are stored in device (little-endian) byte order.
pub fn copy_config<R: ConfigReader + ?Sized>(
    reader: &R,
    dest: &mut [u8],
    mut offset: u32,
) -> Result<()> {
    // All virtio-iommu configuration structures are 32-bit aligned.
    if !dest.len().is_multiple_of(size_of::<u32>()) {
        warn!(
            "[viommu]: refuse to copy {} bytes of configuration, not a multiple of 4",
            dest.len()
        );
        return Err(Error::InvalidArgs);
    }

    for word in dest.chunks_exact_mut(size_of::<u32>()) {
        let value = reader.read32(offset).unwrap_or(0);
        word.copy_from_slice(&value.to_le_bytes());
        offset = offset.wrapping_add(size_of::<u32>() as u32);
    }
    Ok(())
}
