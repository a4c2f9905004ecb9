//! Reactive data section.
//!
//! [`Data`] maintains three standing relationships between its entries:
//!
//! - `address(e[0]) = image_offset + base_address`
//! - `address(e[k]) = address(e[k-1]) + size(e[k-1])`
//! - `size = sum(size(e))`
//!
//! Every mutation re-satisfies them by recomputing forward from the first
//! entry it affects. Derived addresses are always resolved, so unlike
//! [`crate::code::Code`] there is no stop condition.

use std::io::Write;

use crate::entry::{DataEntry, DataKind};
use crate::error::LayoutError;
use crate::size::SizeChange;

#[derive(Debug, Default)]
pub struct Data {
    entries: Vec<DataEntry>,
    base_address: u64,
    image_offset: u64,
    size: u64,
}

impl Data {
    pub fn new(base_address: u64) -> Self {
        Self {
            base_address,
            ..Self::default()
        }
    }

    pub fn from_entries(entries: impl IntoIterator<Item = DataEntry>, base_address: u64) -> Self {
        let mut data = Self::new(base_address);
        for entry in entries {
            data.add(entry);
        }
        data
    }

    /// Appends an entry and binds its address to its predecessor.
    pub fn add(&mut self, entry: DataEntry) -> usize {
        let index = self.entries.len();
        self.entries.push(entry);
        self.rebind_from(index);
        index
    }

    fn start_address(&self) -> u64 {
        self.image_offset.wrapping_add(self.base_address)
    }

    fn rebind_from(&mut self, index: usize) {
        let mut address = match index.checked_sub(1) {
            Some(previous) => {
                let entry = &self.entries[previous];
                entry.address().unwrap_or_default().wrapping_add(entry.size())
            }
            None => self.start_address(),
        };
        for entry in self.entries.iter_mut().skip(index) {
            if entry.place(address) {
                tracing::trace!("entry {:?} -> 0x{:x}", entry.name(), address);
            }
            address = address.wrapping_add(entry.size());
        }
        self.size = self.entries.iter().map(DataEntry::size).sum();
    }

    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    pub fn set_base_address(&mut self, base_address: u64) {
        self.base_address = base_address;
        self.rebind_from(0);
    }

    pub fn image_offset(&self) -> u64 {
        self.image_offset
    }

    /// Sets the section's position in the image once the emitter knows it.
    pub fn set_image_offset(&mut self, image_offset: u64) {
        self.image_offset = image_offset;
        self.rebind_from(0);
    }

    /// Address of the first entry.
    pub fn address(&self) -> u64 {
        self.start_address()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DataEntry> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut DataEntry> {
        self.entries.get_mut(index)
    }

    pub fn entries(&self) -> &[DataEntry] {
        &self.entries
    }

    pub fn label_address(&self, name: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|entry| entry.name() == Some(name))
            .and_then(DataEntry::address)
    }

    /// Replaces an entry's content; followers move if its size changed.
    ///
    /// Returns the change of the section's total size. Content the kind
    /// cannot hold is rejected and leaves the entry untouched.
    pub fn replace(&mut self, index: usize, kind: DataKind) -> Result<Option<SizeChange>, LayoutError> {
        let previous_total = self.size;
        let Some(entry) = self.entries.get_mut(index) else {
            return Ok(None);
        };
        let previous = entry.set_kind(kind)?;
        if SizeChange::between(previous, entry.size()).is_none() {
            return Ok(None);
        }
        self.rebind_from(index + 1);
        tracing::debug!("data entry {} resized, section size 0x{:x} -> 0x{:x}", index, previous_total, self.size);
        Ok(SizeChange::between(previous_total, self.size))
    }

    pub fn relocation_addresses(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().filter_map(DataEntry::relocation_address)
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<(), LayoutError> {
        for entry in &self.entries {
            entry.write(writer)?;
        }
        Ok(())
    }
}
