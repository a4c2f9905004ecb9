//! Data entries.
//!
//! A [`DataEntry`] is a unit of non-executable bytes. Its address is never
//! set by the entry itself: the owning section derives it from the entries
//! before it. Content is assumed not to depend on the address, except for
//! the relocation slot, which the fixup stage fills in after layout.

use std::fmt;
use std::io::{self, Read, Write};
use std::ops::BitOr;
use std::rc::Rc;

use crate::address::{AddressConsumer, AddressProvider};
use crate::error::LayoutError;

/// Size in bytes of a pointer slot.
pub const POINTER_SIZE: u64 = 8;

/// Behaviour flags of a data entry.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DataEntryFlags(u32);

impl DataEntryFlags {
    pub const NONE: Self = Self(0);
    /// The content does not depend on the entry's address.
    pub const FIXED: Self = Self(1);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for DataEntryFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for DataEntryFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.contains(Self::FIXED) {
            write!(f, "FIXED")
        } else {
            write!(f, "NONE")
        }
    }
}

/// What a data entry contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataKind {
    /// An ASCII string, emitted with a trailing NUL.
    Ascii(String),
    Blob(Vec<u8>),
    /// A zero-size anchor.
    Label,
    /// Zero-filled space, typically in an uninitialized section.
    Reserved(u64),
}

impl DataKind {
    /// Rejects content the kind cannot represent.
    pub fn validate(&self) -> Result<(), LayoutError> {
        match self {
            DataKind::Ascii(text) if !text.is_ascii() => Err(LayoutError::NonAscii(text.clone())),
            _ => Ok(()),
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            DataKind::Ascii(text) => text.len() as u64 + 1,
            DataKind::Blob(bytes) => bytes.len() as u64,
            DataKind::Label => 0,
            DataKind::Reserved(size) => *size,
        }
    }
}

#[derive(Debug)]
pub struct DataEntry {
    name: Option<String>,
    kind: DataKind,
    flags: DataEntryFlags,
    address: AddressProvider,
    relocation_offset: Option<u64>,
}

impl DataEntry {
    fn new(kind: DataKind) -> Self {
        Self {
            name: None,
            kind,
            flags: DataEntryFlags::FIXED,
            address: AddressProvider::new(),
            relocation_offset: None,
        }
    }

    pub fn ascii(text: impl Into<String>) -> Result<Self, LayoutError> {
        let kind = DataKind::Ascii(text.into());
        kind.validate()?;
        Ok(Self::new(kind))
    }

    pub fn blob(bytes: Vec<u8>) -> Self {
        Self::new(DataKind::Blob(bytes))
    }

    pub fn label(name: impl Into<String>) -> Self {
        Self::new(DataKind::Label).named(name)
    }

    pub fn reserved(size: u64) -> Self {
        Self::new(DataKind::Reserved(size))
    }

    /// A zeroed pointer slot whose value is patched after layout.
    pub fn pointer() -> Self {
        Self::new(DataKind::Blob(vec![0; POINTER_SIZE as usize]))
            .with_relocation(0)
            .with_flags(DataEntryFlags::NONE)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_relocation(mut self, offset: u64) -> Self {
        self.relocation_offset = Some(offset);
        self
    }

    pub fn with_flags(mut self, flags: DataEntryFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> &DataKind {
        &self.kind
    }

    pub fn flags(&self) -> DataEntryFlags {
        self.flags
    }

    pub fn is_label(&self) -> bool {
        self.kind == DataKind::Label
    }

    pub fn size(&self) -> u64 {
        self.kind.size()
    }

    pub fn address(&self) -> Option<u64> {
        self.address.address()
    }

    pub fn is_address_valid(&self) -> bool {
        self.address.is_address_valid()
    }

    /// Only sections place entries.
    pub(crate) fn place(&mut self, address: u64) -> bool {
        self.address.set_address(address)
    }

    /// Swaps the content, returning the previous size.
    pub(crate) fn set_kind(&mut self, kind: DataKind) -> Result<u64, LayoutError> {
        kind.validate()?;
        let previous = self.size();
        self.kind = kind;
        Ok(previous)
    }

    pub fn add_address_consumer(&mut self, consumer: Rc<dyn AddressConsumer>) {
        self.address.add_consumer(consumer);
    }

    pub fn remove_address_consumer(&mut self, consumer: &Rc<dyn AddressConsumer>) {
        self.address.remove_consumer(consumer);
    }

    pub fn relocation_address(&self) -> Option<u64> {
        Some(self.address()?.wrapping_add(self.relocation_offset?))
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<(), LayoutError> {
        match &self.kind {
            DataKind::Ascii(text) => {
                writer.write_all(text.as_bytes())?;
                writer.write_all(&[0])?;
            }
            DataKind::Blob(bytes) => writer.write_all(bytes)?,
            DataKind::Label => {}
            DataKind::Reserved(size) => {
                io::copy(&mut io::repeat(0).take(*size), writer)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_by_kind() {
        assert_eq!(DataEntry::ascii("hi").unwrap().size(), 3);
        assert_eq!(DataEntry::blob(vec![1, 2, 3, 4]).size(), 4);
        assert_eq!(DataEntry::label("end").size(), 0);
        assert_eq!(DataEntry::reserved(64).size(), 64);
        assert_eq!(DataEntry::pointer().size(), POINTER_SIZE);
    }

    #[test]
    fn non_ascii_is_rejected() {
        assert!(matches!(DataEntry::ascii("héllo"), Err(LayoutError::NonAscii(_))));
    }

    #[test]
    fn set_kind_keeps_content_on_rejection() {
        let mut entry = DataEntry::ascii("abc").unwrap();
        let err = entry.set_kind(DataKind::Ascii("héé".into())).unwrap_err();
        assert!(matches!(err, LayoutError::NonAscii(_)));
        assert_eq!(entry.kind(), &DataKind::Ascii("abc".into()));
        assert_eq!(entry.set_kind(DataKind::Blob(vec![1])).unwrap(), 4);
    }

    #[test]
    fn writes_nul_terminated_ascii_and_zeroed_reservations() {
        let mut out = Vec::new();
        DataEntry::ascii("ok").unwrap().write(&mut out).unwrap();
        DataEntry::label("x").write(&mut out).unwrap();
        DataEntry::reserved(3).write(&mut out).unwrap();
        assert_eq!(out, b"ok\0\0\0\0");
    }

    #[test]
    fn pointer_relocates_at_its_own_address() {
        let mut entry = DataEntry::pointer().named("ExitProcess");
        assert_eq!(entry.relocation_address(), None);
        assert!(!entry.flags().contains(DataEntryFlags::FIXED));

        entry.place(0x3000);
        assert_eq!(entry.relocation_address(), Some(0x3000));
    }

    #[test]
    fn flags_combine() {
        let flags = DataEntryFlags::NONE | DataEntryFlags::FIXED;
        assert!(flags.contains(DataEntryFlags::FIXED));
        assert_eq!(flags.bits(), 1);
    }
}
