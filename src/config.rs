//! Configuration module.
//!
//! This module defines the command-line interface (CLI) using `clap`.

use clap::Parser;
use std::path::PathBuf;

use crate::listing::parse_number;

/// Default image base, the usual start of a static x86_64 executable.
pub const DEFAULT_IMAGE_BASE: u64 = 0x400000;

/// Lays out a listing of pre-encoded code and data.
///
/// Assigns final addresses to every instruction and data entry, prints the
/// resulting address map and the addresses that still need relocation, and
/// optionally dumps the raw section bytes.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Listing file to lay out
    pub input: PathBuf,

    /// Write the raw .text, .rdata and .data bytes here, each padded to a page
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Image base address (decimal or 0x-prefixed hex)
    #[arg(long, default_value_t = DEFAULT_IMAGE_BASE, value_parser = parse_number)]
    pub base: u64,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", help = "Set the logging level")]
    pub log_level: String,
}
