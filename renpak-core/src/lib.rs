//! This crate implements the core of renpak
//!
//! It reads Ren'Py archives (RPA-3.0) and compiled script containers (RPYC2),
//! decodes the pickle data inside them and renders script syntax trees back to
//! source text.

#![allow(clippy::uninlined_format_args)]

pub mod decompile;
pub mod error;
pub mod format;

pub use error::{Error, Result};
