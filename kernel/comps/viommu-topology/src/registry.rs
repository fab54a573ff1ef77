// SPDX-License-Identifier: MPL-2.0

//! The collection of decoded topology tables.

use alloc::{sync::Arc, vec::Vec};
use core::ops::ControlFlow;

use log::debug;
use spin::Mutex;

use crate::{
    device::{BusDevice, DeviceId, IommuOps},
    table::TopologyTable,
};

/// All topology tables discovered so far, in discovery order.
///
/// A single lock serializes every access. It is held only while walking the
/// tables and never while calling out of this crate.
#[derive(Debug, Default)]
pub struct TopologyRegistry {
    tables: Mutex<Vec<TopologyTable>>,
}

impl TopologyRegistry {
    pub const fn new() -> Self {
        Self {
            tables: Mutex::new(Vec::new()),
        }
    }

    /// Appends a table. Tables are scanned in insertion order.
    pub fn insert(&self, table: TopologyTable) {
        self.tables.lock().push(table);
    }

    /// Visits the tables in insertion order until `f` breaks.
    ///
    /// Returns the value `f` broke with, if any.
    pub fn for_each_table<B, F>(&self, mut f: F) -> Option<B>
    where
        F: FnMut(&TopologyTable) -> ControlFlow<B>,
    {
        let tables = self.tables.lock();
        for table in tables.iter() {
            if let ControlFlow::Break(value) = f(table) {
                return Some(value);
            }
        }
        None
    }

    /// Runs `f` on the table read from `device`, if there is one.
    pub fn find_table_by_device<R, F>(&self, device: DeviceId, f: F) -> Option<R>
    where
        F: FnOnce(&TopologyTable) -> R,
    {
        let tables = self.tables.lock();
        tables.iter().find(|table| table.device() == device).map(f)
    }

    /// Binds the IOMMU operations of the driver that has probed `device`.
    ///
    /// Passing `None` unbinds them again. Returns whether `device` describes a
    /// topology at all.
    pub fn bind(&self, device: &dyn BusDevice, ops: Option<Arc<dyn IommuOps>>) -> bool {
        let id = device.id();
        let fwnode = device.fwnode();
        let mut tables = self.tables.lock();
        let Some(table) = tables.iter_mut().find(|table| table.device() == id) else {
            return false;
        };
        debug!(
            "[viommu]: {} IOMMU operations of {}",
            if ops.is_some() { "bind" } else { "unbind" },
            device.name()
        );
        table.bind(fwnode, ops);
        true
    }

    /// Removes the table read from `device`.
    ///
    /// Must be called before the describing device goes away, or endpoints it
    /// described keep resolving to it.
    pub fn remove(&self, device: DeviceId) -> Option<TopologyTable> {
        let mut tables = self.tables.lock();
        let pos = tables.iter().position(|table| table.device() == device)?;
        Some(tables.remove(pos))
    }

    pub fn len(&self) -> usize {
        self.tables.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.lock().is_empty()
    }
}
