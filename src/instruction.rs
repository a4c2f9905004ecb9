//! Instructions.
//!
//! An [`Instruction`] wraps an [`Encode`] implementation supplied by the code
//! generator. Encoding is lazy: nothing is produced until the size or the
//! bytes are first needed, and the result is cached until [`Instruction::reencode`]
//! is called.

use std::fmt;
use std::io::Write;
use std::rc::Rc;

use crate::address::{AddressConsumer, AddressProvider};
use crate::error::LayoutError;
use crate::size::{SizeChange, SizeProvider};

/// Encoding rules for one kind of instruction.
pub trait Encode: fmt::Debug {
    /// Short name used in diagnostics.
    fn mnemonic(&self) -> &str;

    /// Produces the instruction bytes for the given address, or `None` if the
    /// operands cannot be encoded.
    fn encode(&self, address: Option<u64>) -> Option<Vec<u8>>;

    /// Offset, within this instruction's bytes, of a value a later stage must patch.
    fn relocation_offset(&self) -> Option<u64> {
        None
    }

    /// Whether the encoding (and therefore the size) can change with the address.
    fn depends_on_address(&self) -> bool {
        false
    }

    /// The label name, for zero-size anchors.
    fn label(&self) -> Option<&str> {
        None
    }
}

/// Cached state of an instruction's bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoding {
    Unencoded,
    Encoded(Vec<u8>),
    Invalid,
}

#[derive(Debug)]
pub struct Instruction {
    encoder: Box<dyn Encode>,
    encoding: Encoding,
    address: AddressProvider,
}

impl Instruction {
    pub fn new(encoder: impl Encode + 'static) -> Self {
        Self::from_boxed(Box::new(encoder))
    }

    pub fn from_boxed(encoder: Box<dyn Encode>) -> Self {
        Self {
            encoder,
            encoding: Encoding::Unencoded,
            address: AddressProvider::new(),
        }
    }

    pub fn label(name: impl Into<String>) -> Self {
        Self::new(Label::new(name))
    }

    pub fn encoder(&self) -> &dyn Encode {
        self.encoder.as_ref()
    }

    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    pub fn mnemonic(&self) -> &str {
        self.encoder.mnemonic()
    }

    pub fn label_name(&self) -> Option<&str> {
        self.encoder.label()
    }

    pub fn address(&self) -> Option<u64> {
        self.address.address()
    }

    pub fn is_address_valid(&self) -> bool {
        self.address.is_address_valid()
    }

    /// Moves the instruction. Does not re-encode; see [`crate::code::Code::relax`].
    pub fn set_address(&mut self, address: u64) -> bool {
        self.address.set_address(address)
    }

    #[cfg(test)]
    pub(crate) fn reset_address(&mut self) {
        self.address.reset();
    }

    pub fn add_address_consumer(&mut self, consumer: Rc<dyn AddressConsumer>) {
        self.address.add_consumer(consumer);
    }

    pub fn remove_address_consumer(&mut self, consumer: &Rc<dyn AddressConsumer>) {
        self.address.remove_consumer(consumer);
    }

    pub fn relocation_address(&self) -> Option<u64> {
        let offset = self.encoder.relocation_offset()?;
        Some(self.address()?.wrapping_add(offset))
    }

    pub fn depends_on_address(&self) -> bool {
        self.encoder.depends_on_address()
    }

    fn ensure_encoded(&mut self) {
        if self.encoding == Encoding::Unencoded {
            self.encoding = match self.encoder.encode(self.address()) {
                Some(bytes) => Encoding::Encoded(bytes),
                None => Encoding::Invalid,
            };
        }
    }

    /// Returns the bytes, encoding first if needed. `None` if encoding failed.
    pub fn bytes(&mut self) -> Option<&[u8]> {
        self.ensure_encoded();
        match &self.encoding {
            Encoding::Encoded(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Drops the cached bytes and encodes again at the current address.
    pub fn reencode(&mut self) -> Option<SizeChange> {
        let previous = self.size();
        self.encoding = Encoding::Unencoded;
        SizeChange::between(previous, self.size())
    }

    /// Replaces the encoder and reports the resulting size change.
    pub fn replace(&mut self, encoder: Box<dyn Encode>) -> Option<SizeChange> {
        let previous = self.size();
        self.encoder = encoder;
        self.encoding = Encoding::Unencoded;
        SizeChange::between(previous, self.size())
    }

    /// Writes the instruction bytes. An instruction that cannot be encoded is
    /// a hard error; `index` is only used for the error report.
    pub fn write<W: Write>(&mut self, index: usize, writer: &mut W) -> Result<(), LayoutError> {
        let name = self.mnemonic().to_string();
        match self.bytes() {
            Some(bytes) => Ok(writer.write_all(bytes)?),
            None => Err(LayoutError::Unencodable { index, name }),
        }
    }
}

impl SizeProvider for Instruction {
    fn size(&mut self) -> u64 {
        self.bytes().map_or(0, |bytes| bytes.len() as u64)
    }
}

/// A named, zero-size anchor in the instruction stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    name: String,
}

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Encode for Label {
    fn mnemonic(&self) -> &str {
        "label"
    }

    fn encode(&self, _address: Option<u64>) -> Option<Vec<u8>> {
        Some(Vec::new())
    }

    fn label(&self) -> Option<&str> {
        Some(&self.name)
    }
}

/// Bytes already encoded by the code generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBytes {
    bytes: Vec<u8>,
    relocation_offset: Option<u64>,
}

impl RawBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, relocation_offset: None }
    }

    pub fn with_relocation(mut self, offset: u64) -> Self {
        self.relocation_offset = Some(offset);
        self
    }
}

impl Encode for RawBytes {
    fn mnemonic(&self) -> &str {
        "bytes"
    }

    fn encode(&self, _address: Option<u64>) -> Option<Vec<u8>> {
        Some(self.bytes.clone())
    }

    fn relocation_offset(&self) -> Option<u64> {
        self.relocation_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug)]
    struct Counting {
        calls: Rc<Cell<usize>>,
        len: usize,
    }

    impl Encode for Counting {
        fn mnemonic(&self) -> &str {
            "counting"
        }

        fn encode(&self, _address: Option<u64>) -> Option<Vec<u8>> {
            self.calls.set(self.calls.get() + 1);
            Some(vec![0x90; self.len])
        }
    }

    #[derive(Debug)]
    struct Broken;

    impl Encode for Broken {
        fn mnemonic(&self) -> &str {
            "broken"
        }

        fn encode(&self, _address: Option<u64>) -> Option<Vec<u8>> {
            None
        }
    }

    #[test]
    fn size_forces_encoding_once() {
        let calls = Rc::new(Cell::new(0));
        let mut instruction = Instruction::new(Counting { calls: calls.clone(), len: 3 });
        assert_eq!(*instruction.encoding(), Encoding::Unencoded);

        assert_eq!(instruction.size(), 3);
        assert_eq!(instruction.size(), 3);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn reencode_reports_size_change() {
        let mut instruction = Instruction::new(RawBytes::new(vec![1, 2]));
        assert_eq!(instruction.size(), 2);
        assert_eq!(instruction.reencode(), None);

        let change = instruction.replace(Box::new(RawBytes::new(vec![1, 2, 3, 4, 5])));
        assert_eq!(change, Some(SizeChange::new(2, 5)));
    }

    #[test]
    fn label_is_zero_size_and_writes_nothing() {
        let mut label = Instruction::label("start");
        assert_eq!(label.size(), 0);
        assert_eq!(label.label_name(), Some("start"));

        let mut out = Vec::new();
        label.write(0, &mut out).unwrap();
        assert!(out.is_empty());
        label.set_address(0x10);
        assert_eq!(label.relocation_address(), None);
    }

    #[test]
    fn unencodable_write_is_fatal() {
        let mut instruction = Instruction::new(Broken);
        assert_eq!(instruction.size(), 0);
        assert_eq!(*instruction.encoding(), Encoding::Invalid);

        let err = instruction.write(4, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, LayoutError::Unencodable { index: 4, .. }));
    }

    #[test]
    fn relocation_address_needs_an_address() {
        let mut instruction = Instruction::new(RawBytes::new(vec![0; 10]).with_relocation(2));
        assert_eq!(instruction.relocation_address(), None);
        instruction.set_address(0x1000);
        assert_eq!(instruction.relocation_address(), Some(0x1002));
    }
}
