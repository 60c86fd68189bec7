#![deny(unused_must_use)]
#![deny(unreachable_patterns)]
#![deny(unknown_lints)]
//! # Keymaster Test Utilities
//!
//! This crate contains some commonly useful test utilities for testing the Keymaster codebase.
//!
//! ## Modules
//!
//! - `paths` - Contains utilities which return and create paths which are useful for tests involving files
//! - `random` - Contains utilities to making generating random values easier

pub mod paths;
pub mod random;
