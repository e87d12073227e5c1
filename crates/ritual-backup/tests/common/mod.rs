//! Common test utilities for ritual-backup
//!
//! - Fixtures: world trees, pipelines and targets over a temp directory
//! - Mocks: storages that fail on demand

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;
