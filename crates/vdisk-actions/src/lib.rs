//! # vdisk-actions
//!
//! The operations vdisk exposes on a disk image. Each action validates its
//! inputs, then drives a [`vdisk_core::SystemSession`] (or, for `create`, the
//! preset's disk setup) through an [`ActionContext`].

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod bootstrap;
pub mod context;
pub mod create;
pub mod enter;
pub mod files;
pub mod install;
pub mod manifest;
pub mod puppet;

#[cfg(test)]
mod fixture;

pub use context::ActionContext;
