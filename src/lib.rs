//! Workspace facade crate.
//!
//! Re-exports the reader and its runtime so hosts can depend on a single
//! crate (`mfr-workspace`) instead of wiring `core-reader` and
//! `core-runtime` individually.

pub use core_reader as reader;
pub use core_runtime as runtime;

pub use core_reader::{MediaFormatReader, ReaderConfig, ReaderError};
