//! nescheck - CCured-style pointer classification plus selective
//! bounds-check insertion for an SSA intermediate representation.
//!
//! The crate has three layers:
//! - [`ir`]: a small SSA IR (types, values, instructions, basic blocks,
//!   functions, modules) with a constant-folding builder
//! - [`pass`]: the whole-module analysis/instrumentation pass. Every
//!   pointer-typed value is classified SAFE, SEQ, or DYN; function
//!   signatures grow a size parameter per pointer parameter; bounds
//!   checks are inserted only where the classification requires them
//! - [`runtime`]: the support library linked into instrumented programs
//!   (a process-global metadata table and two diagnostic printers)

pub mod ir;
pub mod pass;
pub mod runtime;

pub use pass::{NesCheckPass, PassConfig};
