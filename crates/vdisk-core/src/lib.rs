//! # vdisk-core
//!
//! The resource lifecycle manager behind vdisk.
//!
//! A disk image is exposed as a writable root filesystem by stacking OS
//! resources in a fixed order and releasing them in exactly the reverse one:
//! - **Loopback**: the image file bound to a loop device, partitions mapped
//!   through `kpartx`.
//! - **LVM**: the image's volume group activated and its logical volumes
//!   resolved by name.
//! - **Mounts**: root, boot and pseudo-filesystems, unwound last-in first-out.
//! - **Presets**: the closed set of disk layouts an image can have.
//! - **Sessions**: the state machine composing all of the above.
//!
//! Every external tool is reached through the [`process::CommandRunner`]
//! trait, so the whole stack can be driven against a scripted runner.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod devicemap;
pub mod loopback;
pub mod lvm;
pub mod mount;
pub mod preflight;
pub mod preset;
pub mod process;
pub mod session;
pub mod teardown;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use preset::{Preset, PresetParams};
pub use process::{CommandRunner, Invocation, SystemRunner};
pub use session::{SessionOptions, SystemSession, with_session};
