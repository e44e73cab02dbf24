//! # lc-engine
//!
//! Supervision of the external office engine for the conversion service.
//!
//! This crate provides:
//!
//! - **Engine discovery** ([`EngineLocator`]) -- find `soffice` (or
//!   `libreoffice`) from config or `PATH` and report its version.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support that kills the whole process group on expiry or cancellation.
//! - **Scratch directories** ([`ScratchDir`]) -- per-job temporary directory
//!   with an input slot, an isolated engine profile, and an output directory.
//! - **Conversion** ([`ConversionWorker`]) -- one headless engine invocation
//!   per job, with output verification.

pub mod command;
pub mod convert;
pub mod tools;
pub mod workspace;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use convert::ConversionWorker;
pub use tools::{EngineInfo, EngineLocator};
pub use workspace::ScratchDir;
