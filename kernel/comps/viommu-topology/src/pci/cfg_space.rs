// SPDX-License-Identifier: MPL-2.0

//! The parts of the PCI configuration space header that are needed here.

use bitflags::bitflags;

/// Offset of the vendor ID.
pub const VENDOR_ID: u16 = 0x00;
/// Offset of the device ID.
pub const DEVICE_ID: u16 = 0x02;
/// Offset of the pointer to the first capability.
pub const CAPABILITIES_POINTER: u16 = 0x34;

/// The maximum number of capabilities visited, which bounds malformed lists.
pub const CAPABILITY_TTL: usize = 48;

bitflags! {
    /// The PCI status register.
    pub struct Status: u16 {
        const INTERRUPT_STATUS          = 0x0008;
        const CAPABILITIES_LIST         = 0x0010;
        const MHZ66_CAPABLE             = 0x0020;
        const FAST_BACK_TO_BACK_CAPABLE = 0x0080;
        const MASTER_DATA_PARITY_ERROR  = 0x0100;
        const SIGNALED_TARGET_ABORT     = 0x0800;
        const RECEIVED_TARGET_ABORT     = 0x1000;
        const RECEIVED_MASTER_ABORT     = 0x2000;
        const SIGNALED_SYSTEM_ERROR     = 0x4000;
        const DETECTED_PARITY_ERROR     = 0x8000;
    }
}

impl Status {
    pub const OFFSET: u16 = 0x06;
}

/// The capability ID of vendor-specific capabilities.
pub const CAPABILITY_ID_VNDR: u8 = 0x09;
