//! Host checks run before any resource is touched.
//!
//! Loopback, LVM and mount operations all need root; missing tools are
//! reported together instead of failing half-way through a session.

use vdisk_common::error::{Result, VdiskError};

/// Fails unless the process runs with effective uid 0.
///
/// # Errors
///
/// Returns [`VdiskError::PermissionDenied`] for unprivileged processes.
pub fn ensure_root() -> Result<()> {
    let euid = nix::unistd::geteuid();
    if euid.is_root() {
        return Ok(());
    }
    Err(VdiskError::PermissionDenied {
        message: format!(
            "vdisk uses loopback mounting and must run as root (effective uid {euid})"
        ),
    })
}

/// Verifies every `(tool, package)` pair resolves on `PATH`.
///
/// # Errors
///
/// Returns [`VdiskError::ResourceUnavailable`] listing every missing tool
/// with the package that provides it.
pub fn check_host_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<String> = tools
        .iter()
        .filter(|(tool, _)| which::which(tool).is_err())
        .map(|(tool, package)| format!("{tool} (install: {package})"))
        .collect();

    if missing.is_empty() {
        tracing::debug!(count = tools.len(), "host tools present");
        return Ok(());
    }
    Err(VdiskError::ResourceUnavailable {
        kind: "host tool",
        id: missing.join(", "),
    })
}
