//! Persistent identifier handling for pidgate
//!
//! This crate turns raw user input into typed persistent identifiers:
//! - DOI parsing with prefix/suffix and collection/record split
//! - Handle parsing, including content-negotiation suffixes
//! - Absolute URL parsing with heuristic record/collection ids
//! - Canonical resolvable forms for each variant

pub mod extractors;
pub mod pid;
pub mod validators;

pub use extractors::*;
pub use pid::*;
pub use validators::*;
