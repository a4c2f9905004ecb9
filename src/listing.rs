//! Text listing front-end.
//!
//! A listing is a line-oriented description of already-encoded code and data:
//!
//! ```text
//! .name hello
//! .version 1.0
//! .entry _start
//! .import kernel32.dll ExitProcess
//! .text
//! label _start
//! bytes ff 15 00000000 reloc 2
//! .rdata
//! ascii greeting "Hello\n"
//! .data
//! pointer ExitProcess
//! .bss
//! reserve buffer 256
//! ```
//!
//! `#` starts a comment. [`Listing::build`] places the sections page by page
//! above an image base and returns the laid-out [`Executable`].

use anyhow::{anyhow, bail, Context, Result};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::code::Code;
use crate::data::Data;
use crate::entry::DataEntry;
use crate::executable::{Executable, ImportDescriptor, Version};
use crate::instruction::{Instruction, RawBytes};
use crate::layout::{InitializedData, UninitializedData};
use crate::utils::{checked_align_up, PAGE_SIZE};

/// Entry label used when the listing names none.
pub const DEFAULT_ENTRY: &str = "_start";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Text,
    Rdata,
    Data,
    Bss,
}

#[derive(Debug)]
pub struct Listing {
    pub name: String,
    pub version: Version,
    pub timestamp: Option<u64>,
    pub entry: String,
    pub imports: Vec<ImportDescriptor>,
    pub text: Vec<Instruction>,
    pub rdata: Vec<DataEntry>,
    pub data: Vec<DataEntry>,
    pub bss: Vec<DataEntry>,
}

impl Default for Listing {
    fn default() -> Self {
        Self {
            name: "a.out".to_string(),
            version: Version::default(),
            timestamp: None,
            entry: DEFAULT_ENTRY.to_string(),
            imports: Vec::new(),
            text: Vec::new(),
            rdata: Vec::new(),
            data: Vec::new(),
            bss: Vec::new(),
        }
    }
}

/// Parses a decimal or `0x`-prefixed hexadecimal number.
pub fn parse_number(text: &str) -> Result<u64, std::num::ParseIntError> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    }
}

fn parse_hex(tokens: &[&str]) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    for token in tokens {
        if token.len() % 2 != 0 {
            bail!("odd number of hex digits in `{}`", token);
        }
        for i in (0..token.len()).step_by(2) {
            let pair = token.get(i..i + 2).ok_or_else(|| anyhow!("invalid hex `{}`", token))?;
            bytes.push(u8::from_str_radix(pair, 16).with_context(|| format!("invalid hex `{}`", token))?);
        }
    }
    Ok(bytes)
}

/// Extracts the text between the first and last double quote, with escapes.
fn parse_quoted(rest: &str) -> Result<String> {
    let start = rest.find('"').context("expected a quoted string")?;
    let end = rest.rfind('"').filter(|&end| end > start).context("unterminated string")?;
    let mut out = String::new();
    let mut chars = rest[start + 1..end].chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            other => bail!("unknown escape `\\{}`", other.map(String::from).unwrap_or_default()),
        }
    }
    Ok(out)
}

const TOO_HIGH: &str = "image does not fit in the address space";

/// Page boundary following a section of `size` bytes at `base`.
fn next_page(base: u64, size: u64) -> Result<u64> {
    base.checked_add(size)
        .and_then(|end| checked_align_up(end, PAGE_SIZE))
        .context(TOO_HIGH)
}

fn expect_args(args: &[&str], count: usize, usage: &str) -> Result<()> {
    if args.len() != count {
        bail!("usage: {}", usage);
    }
    Ok(())
}

impl Listing {
    pub fn parse(source: &str) -> Result<Self> {
        let mut listing = Listing::default();
        let mut section = Section::Text;
        for (number, line) in source.lines().enumerate() {
            let line = line.split_once('#').map_or(line, |(code, _)| code).trim();
            if line.is_empty() {
                continue;
            }
            listing
                .parse_line(line, &mut section)
                .with_context(|| format!("line {}: `{}`", number + 1, line))?;
        }
        tracing::debug!(
            "parsed listing: {} instructions, {} constants, {} data entries, {} bss entries",
            listing.text.len(),
            listing.rdata.len(),
            listing.data.len(),
            listing.bss.len()
        );
        Ok(listing)
    }

    fn parse_line(&mut self, line: &str, section: &mut Section) -> Result<()> {
        let (keyword, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let args: Vec<&str> = rest.split_whitespace().collect();

        match keyword {
            ".text" => *section = Section::Text,
            ".rdata" => *section = Section::Rdata,
            ".data" => *section = Section::Data,
            ".bss" => *section = Section::Bss,
            ".name" => {
                expect_args(&args, 1, ".name NAME")?;
                self.name = args[0].to_string();
            }
            ".entry" => {
                expect_args(&args, 1, ".entry LABEL")?;
                self.entry = args[0].to_string();
            }
            ".version" => {
                expect_args(&args, 1, ".version MAJOR.MINOR")?;
                let (major, minor) = args[0].split_once('.').unwrap_or((args[0], "0"));
                self.version = Version::new(major.parse()?, minor.parse()?);
            }
            ".timestamp" => {
                expect_args(&args, 1, ".timestamp SECONDS")?;
                self.timestamp = Some(parse_number(args[0])?);
            }
            ".import" => {
                if args.len() < 2 {
                    bail!("usage: .import LIBRARY FUNCTION...");
                }
                self.imports.push(ImportDescriptor::new(args[0], args[1..].iter().copied()));
            }
            _ => match section {
                Section::Text => self.text.push(Self::parse_instruction(keyword, &args)?),
                Section::Rdata => self.rdata.push(Self::parse_data(keyword, rest, &args)?),
                Section::Data => self.data.push(Self::parse_data(keyword, rest, &args)?),
                Section::Bss => self.bss.push(Self::parse_bss(keyword, &args)?),
            },
        }
        Ok(())
    }

    fn parse_instruction(keyword: &str, args: &[&str]) -> Result<Instruction> {
        match keyword {
            "label" => {
                expect_args(args, 1, "label NAME")?;
                Ok(Instruction::label(args[0]))
            }
            "bytes" => {
                let (hex, reloc) = match args.iter().position(|a| *a == "reloc") {
                    Some(at) => {
                        expect_args(&args[at..], 2, "bytes HEX... reloc OFFSET")?;
                        (&args[..at], Some(parse_number(args[at + 1])?))
                    }
                    None => (args, None),
                };
                let bytes = parse_hex(hex)?;
                if bytes.is_empty() {
                    bail!("instruction has no bytes");
                }
                let mut encoder = RawBytes::new(bytes);
                if let Some(offset) = reloc {
                    encoder = encoder.with_relocation(offset);
                }
                Ok(Instruction::new(encoder))
            }
            other => bail!("`{}` is not allowed in .text", other),
        }
    }

    fn parse_data(keyword: &str, rest: &str, args: &[&str]) -> Result<DataEntry> {
        let Some(name) = args.first() else {
            bail!("`{}` needs a name", keyword);
        };
        match keyword {
            "label" => {
                expect_args(args, 1, "label NAME")?;
                Ok(DataEntry::label(*name))
            }
            "ascii" => Ok(DataEntry::ascii(parse_quoted(rest)?)?.named(*name)),
            "blob" => Ok(DataEntry::blob(parse_hex(&args[1..])?).named(*name)),
            "pointer" => {
                expect_args(args, 1, "pointer NAME")?;
                Ok(DataEntry::pointer().named(*name))
            }
            other => bail!("`{}` is not allowed in a data section", other),
        }
    }

    fn parse_bss(keyword: &str, args: &[&str]) -> Result<DataEntry> {
        match keyword {
            "label" => {
                expect_args(args, 1, "label NAME")?;
                Ok(DataEntry::label(args[0]))
            }
            "reserve" => {
                expect_args(args, 2, "reserve NAME SIZE")?;
                Ok(DataEntry::reserved(parse_number(args[1])?).named(args[0]))
            }
            other => bail!("`{}` is not allowed in .bss", other),
        }
    }

    /// Lays out the listing above `image_base`.
    ///
    /// `.text` starts one page above the base; `.rdata`, `.data` and `.bss`
    /// each start at the next page boundary after the previous section.
    /// Fails if any section would end beyond the address space.
    pub fn build(self, image_base: u64) -> Result<Executable> {
        let text_base = image_base.checked_add(PAGE_SIZE).context(TOO_HIGH)?;
        let mut code = Code::new(self.text, text_base);
        let passes = code.relax()?;
        tracing::debug!("code relaxed in {} passes", passes);

        let rdata_base = next_page(text_base, code.size())?;
        let mut constants = Data::from_entries(self.rdata, 0);
        constants.set_image_offset(rdata_base);

        let data_base = next_page(rdata_base, constants.size())?;
        let initialized = InitializedData::new(self.data, data_base);
        let bss_base = next_page(data_base, initialized.size())?;
        let bss_size = self
            .bss
            .iter()
            .try_fold(0u64, |total, entry| total.checked_add(entry.size()))
            .context(TOO_HIGH)?;
        bss_base.checked_add(bss_size).context(TOO_HIGH)?;
        let uninitialized = UninitializedData::new(self.bss, bss_base);

        let timestamp = self.timestamp.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default()
        });

        let mut executable = Executable::new(self.name, code, &self.entry)
            .context("entry point must be a label in .text")?
            .with_version(self.version)
            .with_timestamp(timestamp)
            .with_constants(constants)
            .with_initialized_data(initialized)
            .with_uninitialized_data(uninitialized);
        for import in self.imports {
            executable = executable.with_import(import);
        }
        Ok(executable)
    }
}
