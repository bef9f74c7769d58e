#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Shared utilities for stylepipe.
//!
//! Pure helper functions with no logging/tracing dependencies.
//! Logging is handled by the core and CLI crates.

pub mod fs;
pub mod hash;
