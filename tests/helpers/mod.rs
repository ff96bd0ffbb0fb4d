//! Shared integration test helpers.

pub mod fixtures;
