//! Domain models for NFSIG.
//!
//! These are the core types shared across all crates.

pub mod certificate;
