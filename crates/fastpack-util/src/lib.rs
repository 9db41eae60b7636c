#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Shared utilities for fastpack.
//!
//! Pure helpers with no logging/tracing dependencies. Logging is handled by
//! the CLI crate and the engine.

pub mod fs;
pub mod hash;
