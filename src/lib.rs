//! Address and size layout engine.
//!
//! This library assigns final addresses to the instructions and data entries
//! of a program and keeps them consistent as encodings change size.
//! It is organized into several modules:
//! - `address`: optional addresses and their observers.
//! - `size`: size change reporting.
//! - `instruction`: lazily encoded instructions and code labels.
//! - `code`: the code section and its forward-shift propagation.
//! - `entry`: data entries.
//! - `data`: the reactive data section.
//! - `layout`: static initialized and uninitialized sections.
//! - `executable`: the image descriptor handed to later stages.
//! - `listing`: a text front-end used by the `ulay` binary.
//! - `config`: CLI configuration.

pub mod address;
pub mod code;
pub mod config;
pub mod data;
pub mod entry;
pub mod error;
pub mod executable;
pub mod instruction;
pub mod layout;
pub mod listing;
pub mod size;
pub mod utils;

pub use error::LayoutError;
