//! Poke Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the Poke ETL workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`PokeError`] and the [`Result`] alias
//! - **Logging**: tracing subscriber setup shared by every binary
//! - **Checksums**: SHA-256 digests attached to uploads
//! - **Types**: catalog records and media references
//!
//! # Example
//!
//! ```no_run
//! use poke_common::checksum::compute_file_checksum;
//!
//! fn digest(path: &str) -> poke_common::Result<String> {
//!     compute_file_checksum(path)
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

pub use error::{PokeError, Result};
