//! Static section layout.
//!
//! [`InitializedData`] and [`UninitializedData`] hold entries whose sizes are
//! fixed at creation. They are linearized once, at construction, and never
//! revisited. [`SectionSummary`] describes a placed section to the image
//! emitter.

use std::io::Write;

use object::SectionKind;

use crate::entry::DataEntry;
use crate::error::LayoutError;

/// Assigns sequential addresses from `base_address`; returns the total size.
fn linearize(entries: &mut [DataEntry], base_address: u64) -> u64 {
    let mut address = base_address;
    for entry in entries.iter_mut() {
        entry.place(address);
        address = address.wrapping_add(entry.size());
    }
    address.wrapping_sub(base_address)
}

fn find_label(entries: &[DataEntry], name: &str) -> Option<u64> {
    entries.iter().find(|e| e.name() == Some(name)).and_then(DataEntry::address)
}

/// A section of constant, byte-producing entries.
#[derive(Debug, Default)]
pub struct InitializedData {
    entries: Vec<DataEntry>,
    base_address: u64,
    size: u64,
}

impl InitializedData {
    pub fn new(mut entries: Vec<DataEntry>, base_address: u64) -> Self {
        let size = linearize(&mut entries, base_address);
        tracing::debug!("initialized data: {} entries at 0x{:x}, size 0x{:x}", entries.len(), base_address, size);
        Self { entries, base_address, size }
    }

    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn entries(&self) -> &[DataEntry] {
        &self.entries
    }

    pub fn label_address(&self, name: &str) -> Option<u64> {
        find_label(&self.entries, name)
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

/// A section of reserved, zero-initialized space. Occupies no file bytes.
#[derive(Debug, Default)]
pub struct UninitializedData {
    entries: Vec<DataEntry>,
    base_address: u64,
    size: u64,
}

impl UninitializedData {
    pub fn new(mut entries: Vec<DataEntry>, base_address: u64) -> Self {
        let size = linearize(&mut entries, base_address);
        tracing::debug!("uninitialized data: {} entries at 0x{:x}, size 0x{:x}", entries.len(), base_address, size);
        Self { entries, base_address, size }
    }

    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn entries(&self) -> &[DataEntry] {
        &self.entries
    }

    pub fn label_address(&self, name: &str) -> Option<u64> {
        find_label(&self.entries, name)
    }
}

/// A placed output section, as handed to the image emitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionSummary {
    /// Name of the section (e.g. ".text", ".data").
    pub name: &'static str,
    /// Used for permissions and for deciding whether bytes go in the file.
    pub kind: SectionKind,
    /// The virtual address of the first byte.
    pub address: u64,
    pub size: u64,
}

impl SectionSummary {
    pub fn end(&self) -> u64 {
        self.address.wrapping_add(self.size)
    }

    /// Whether the section contributes bytes to the file.
    pub fn has_file_bytes(&self) -> bool {
        self.kind != SectionKind::UninitializedData
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialized_data_is_linearized_once() {
        let data = InitializedData::new(
            vec![
                DataEntry::ascii("name").unwrap().named("greeting"),
                DataEntry::label("table"),
                DataEntry::pointer(),
                DataEntry::pointer(),
            ],
            0x2000,
        );
        assert_eq!(data.size(), 5 + 16);
        assert_eq!(data.label_address("greeting"), Some(0x2000));
        assert_eq!(data.label_address("table"), Some(0x2005));
        assert_eq!(data.relocation_addresses().collect::<Vec<_>>(), vec![0x2005, 0x200d]);

        let mut out = Vec::new();
        data.write(&mut out).unwrap();
        assert_eq!(&out[..5], b"name\0");
        assert_eq!(out.len(), 21);
    }

    #[test]
    fn uninitialized_data_reserves_space() {
        let bss = UninitializedData::new(
            vec![DataEntry::reserved(0x100).named("buffer"), DataEntry::reserved(8).named("counter")],
            0x5000,
        );
        assert_eq!(bss.size(), 0x108);
        assert_eq!(bss.label_address("counter"), Some(0x5100));
    }

    #[test]
    fn empty_sections_have_zero_size() {
        assert_eq!(InitializedData::new(Vec::new(), 0x10).size(), 0);
        assert_eq!(UninitializedData::default().size(), 0);
    }

    #[test]
    fn summary_file_bytes() {
        let bss = SectionSummary {
            name: ".bss",
            kind: SectionKind::UninitializedData,
            address: 0x1000,
            size: 0x20,
        };
        assert!(!bss.has_file_bytes());
        assert_eq!(bss.end(), 0x1020);
    }
}
