//! NFSIG Core: domain models, error taxonomy, repository contracts and
//! the clock abstraction shared by every NFSIG crate.

pub mod clock;
pub mod error;
pub mod models;
pub mod repository;
