//! Shared helpers for pidgate-core integration tests

#![allow(dead_code)]

pub mod fixtures;
pub mod transport;
