//! lc-core: shared errors, configuration, and the format registry.
//!
//! This crate is the foundational dependency for the other lc-* crates. It
//! carries no I/O beyond reading a configuration file.

pub mod config;
pub mod error;
pub mod formats;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use formats::{ConversionTarget, DocumentFamily, FormatRegistry};
