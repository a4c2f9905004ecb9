//! Executable image descriptor.
//!
//! Binds the code section, the data sections, the entry label and the import
//! list into one value for the relocation and emission stages.

use std::io::Write;

use object::SectionKind;

use crate::code::Code;
use crate::data::Data;
use crate::error::LayoutError;
use crate::layout::{InitializedData, SectionSummary, UninitializedData};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    pub fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Functions imported from one shared library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDescriptor {
    pub library: String,
    pub functions: Vec<String>,
}

impl ImportDescriptor {
    pub fn new(library: impl Into<String>, functions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            library: library.into(),
            functions: functions.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug)]
pub struct Executable {
    name: String,
    version: Version,
    /// Seconds since the Unix epoch.
    timestamp: u64,
    code: Code,
    entry: usize,
    constants: Data,
    uninitialized: UninitializedData,
    initialized: InitializedData,
    imports: Vec<ImportDescriptor>,
}

impl Executable {
    /// Creates an executable whose entry point is the code label `entry_label`.
    pub fn new(name: impl Into<String>, code: Code, entry_label: &str) -> Result<Self, LayoutError> {
        let entry = code
            .label_index(entry_label)
            .ok_or_else(|| LayoutError::UnknownLabel(entry_label.to_string()))?;
        Ok(Self {
            name: name.into(),
            version: Version::default(),
            timestamp: 0,
            code,
            entry,
            constants: Data::default(),
            uninitialized: UninitializedData::default(),
            initialized: InitializedData::default(),
            imports: Vec::new(),
        })
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Read-only constants whose sizes may still change after placement.
    pub fn with_constants(mut self, constants: Data) -> Self {
        self.constants = constants;
        self
    }

    pub fn with_initialized_data(mut self, data: InitializedData) -> Self {
        self.initialized = data;
        self
    }

    pub fn with_uninitialized_data(mut self, data: UninitializedData) -> Self {
        self.uninitialized = data;
        self
    }

    pub fn with_import(mut self, import: ImportDescriptor) -> Self {
        self.imports.push(import);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn code(&self) -> &Code {
        &self.code
    }

    /// Writes the code bytes. Encodes any instruction not encoded yet.
    pub fn write_code<W: Write>(&mut self, writer: &mut W) -> Result<(), LayoutError> {
        self.code.write(writer)
    }

    pub fn constants(&self) -> &Data {
        &self.constants
    }

    pub fn initialized_data(&self) -> &InitializedData {
        &self.initialized
    }

    pub fn uninitialized_data(&self) -> &UninitializedData {
        &self.uninitialized
    }

    pub fn imports(&self) -> &[ImportDescriptor] {
        &self.imports
    }

    pub fn entry_label(&self) -> Option<&str> {
        self.code.get(self.entry).and_then(|i| i.label_name())
    }

    /// Address of the entry label, once the code has been placed.
    pub fn entry_point(&self) -> Option<u64> {
        self.code.get(self.entry).and_then(|i| i.address())
    }

    /// Non-empty sections in `.text`, `.rdata`, `.data`, `.bss` order.
    pub fn sections(&self) -> Vec<SectionSummary> {
        let all = [
            SectionSummary {
                name: ".text",
                kind: SectionKind::Text,
                address: self.code.base_address(),
                size: self.code.size(),
            },
            SectionSummary {
                name: ".rdata",
                kind: SectionKind::ReadOnlyData,
                address: self.constants.address(),
                size: self.constants.size(),
            },
            SectionSummary {
                name: ".data",
                kind: SectionKind::Data,
                address: self.initialized.base_address(),
                size: self.initialized.size(),
            },
            SectionSummary {
                name: ".bss",
                kind: SectionKind::UninitializedData,
                address: self.uninitialized.base_address(),
                size: self.uninitialized.size(),
            },
        ];
        all.into_iter().filter(|s| s.size > 0).collect()
    }

    /// Every address the fixup stage must patch, in section order.
    pub fn relocation_addresses(&self) -> Vec<u64> {
        self.code
            .relocation_addresses()
            .chain(self.constants.relocation_addresses())
            .chain(self.initialized.relocation_addresses())
            .collect()
    }

    /// Finds a label in any section.
    pub fn label_address(&self, name: &str) -> Option<u64> {
        self.code
            .label_address(name)
            .or_else(|| self.constants.label_address(name))
            .or_else(|| self.initialized.label_address(name))
            .or_else(|| self.uninitialized.label_address(name))
    }
}
