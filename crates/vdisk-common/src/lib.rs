//! # vdisk-common
//!
//! Shared error definitions, settings, configuration models, and constants
//! used across the entire vdisk workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and provides the primitives that the lifecycle core, the
//! actions and the CLI build upon.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
