//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (`core-runtime`, `core-dst`). Host applications can depend
//! on `dst-workspace` and enable the documented features without needing to
//! wire each crate individually.

#[cfg(feature = "runtime")]
pub use core_runtime as runtime;

#[cfg(feature = "dst")]
pub use core_dst as dst;
