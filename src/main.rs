//! Entry point for the ulay layout tool.
//!
//! This file handles high-level application flow:
//! 1. Parse command-line arguments using `clap`.
//! 2. Install the `tracing` subscriber at the requested level.
//! 3. Parse the listing and lay it out above the image base.
//! 4. Print the address map and the relocation list.
//! 5. Optionally dump the raw section bytes.
//!
//! Error handling is done via `anyhow`.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use ulay::config::Config;
use ulay::executable::Executable;
use ulay::listing::Listing;
use ulay::utils::{align_up, PAGE_SIZE};

fn main() -> Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let source = std::fs::read_to_string(&config.input)
        .with_context(|| format!("failed to read {}", config.input.display()))?;
    let listing = Listing::parse(&source).with_context(|| format!("failed to parse {}", config.input.display()))?;
    let mut executable = listing.build(config.base)?;
    tracing::info!("laid out {} v{}", executable.name(), executable.version());

    print_map(&executable);

    if let Some(output) = &config.output {
        write_image(&mut executable, output)?;
        println!("Wrote sections to {}", output.display());
    }
    Ok(())
}

fn print_map(executable: &Executable) {
    println!("{} {} (timestamp {})", executable.name(), executable.version(), executable.timestamp());
    if let Some(entry) = executable.entry_point() {
        println!("entry 0x{:x}", entry);
    }

    println!("sections:");
    for section in executable.sections() {
        println!("  {:<6} {:?} 0x{:x}..0x{:x}", section.name, section.kind, section.address, section.end());
    }

    println!("symbols:");
    let code = executable.code().iter().filter_map(|i| Some((i.label_name()?, i.address()?)));
    let data = executable
        .constants()
        .entries()
        .iter()
        .chain(executable.initialized_data().entries())
        .chain(executable.uninitialized_data().entries())
        .filter_map(|e| Some((e.name()?, e.address()?)));
    for (name, address) in code.chain(data) {
        println!("  0x{:x} {}", address, name);
    }

    println!("relocations:");
    for address in executable.relocation_addresses() {
        println!("  0x{:x}", address);
    }

    for import in executable.imports() {
        println!("import {}: {}", import.library, import.functions.join(", "));
    }
}

/// Writes `.text`, `.rdata` then `.data`, each padded to a page, as a flat file.
fn write_image(executable: &mut Executable, output: &Path) -> Result<()> {
    let mut buffer = Vec::new();
    executable.write_code(&mut buffer)?;
    buffer.resize(align_up(buffer.len() as u64, PAGE_SIZE) as usize, 0);
    executable.constants().write(&mut buffer)?;
    buffer.resize(align_up(buffer.len() as u64, PAGE_SIZE) as usize, 0);
    executable.initialized_data().write(&mut buffer)?;
    std::fs::write(output, &buffer).with_context(|| format!("failed to write {}", output.display()))?;
    Ok(())
}
