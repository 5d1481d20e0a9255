//! # Core Runtime Module
//!
//! Provides the ambient runtime infrastructure shared by the decoder crates:
//! - Logging and tracing infrastructure
//! - Plugin settings blocks (configuration source)
//!
//! ## Overview
//!
//! Nothing in this crate touches audio data. It establishes the logging
//! conventions and the configuration shape that `core-dst` builds on.

pub mod config;
pub mod error;
pub mod logging;

pub use config::ConfigBlock;
pub use error::{Error, Result};
