//! Unified error types for the vdisk workspace.
//!
//! Acquisition failures surface their original cause. Failures seen while
//! releasing OS resources are aggregated into [`VdiskError::Teardown`] or
//! attached to the original cause through [`VdiskError::WithSuppressed`], so
//! callers can tell when a loop device, volume group or mount may have leaked.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum VdiskError {
    /// An external command exited with a non-zero status.
    #[error("{command} {}: subprocess returned non-zero exit code {exit_code}", .args.join(" "))]
    CommandFailed {
        /// Program that was invoked.
        command: String,
        /// Arguments passed to the program.
        args: Vec<String>,
        /// Exit code reported by the program (`128 + signal` when killed).
        exit_code: i32,
    },

    /// An external command did not finish within its timeout and was killed.
    #[error("{command} {}: killed after {}s timeout", .args.join(" "), .timeout.as_secs())]
    CommandTimeout {
        /// Program that was invoked.
        command: String,
        /// Arguments passed to the program.
        args: Vec<String>,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// An external command could not be started at all.
    #[error("failed to execute {command}: {source}")]
    Spawn {
        /// Program that could not be started.
        command: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An expected device, volume or mount target is missing or occupied.
    #[error("{kind} unavailable: {id}")]
    ResourceUnavailable {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The disk layout does not match what the preset requires.
    #[error("invalid disk layout: {message}")]
    InvalidLayout {
        /// Description of the mismatch.
        message: String,
    },

    /// A configuration value is missing or invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// The process lacks the privilege required to touch block devices.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The YAML configuration could not be parsed.
    #[error("malformed configuration: {source}")]
    Yaml {
        /// Underlying parse error.
        #[from]
        source: serde_yaml::Error,
    },

    /// One or more release steps failed while tearing resources down.
    #[error("teardown incomplete, {} step(s) failed: {}", .failures.len(), join_errors(.failures))]
    Teardown {
        /// Every failure observed, in the order the steps ran.
        failures: Vec<VdiskError>,
    },

    /// An error that triggered a teardown which itself failed.
    #[error("{primary} (cleanup also failed: {})", join_errors(.suppressed))]
    WithSuppressed {
        /// The failure that caused the teardown.
        primary: Box<VdiskError>,
        /// Failures seen while releasing already-acquired resources.
        suppressed: Vec<VdiskError>,
    },
}

impl VdiskError {
    /// Attaches teardown failures to this error without replacing it.
    ///
    /// Returns `self` unchanged when `suppressed` is empty.
    #[must_use]
    pub fn with_suppressed(self, suppressed: Vec<Self>) -> Self {
        if suppressed.is_empty() {
            return self;
        }
        match self {
            Self::WithSuppressed {
                primary,
                suppressed: mut existing,
            } => {
                existing.extend(suppressed);
                Self::WithSuppressed {
                    primary,
                    suppressed: existing,
                }
            }
            other => Self::WithSuppressed {
                primary: Box::new(other),
                suppressed,
            },
        }
    }

    /// Returns the original cause, looking through attached teardown failures.
    #[must_use]
    pub fn primary(&self) -> &Self {
        match self {
            Self::WithSuppressed { primary, .. } => primary,
            other => other,
        }
    }

    /// Returns the teardown failures attached to this error, if any.
    #[must_use]
    pub fn suppressed(&self) -> &[Self] {
        match self {
            Self::WithSuppressed { suppressed, .. } => suppressed,
            _ => &[],
        }
    }

    /// Flattens this error into the individual failures it reports.
    ///
    /// A [`VdiskError::Teardown`] yields its members; anything else yields
    /// itself.
    #[must_use]
    pub fn into_failures(self) -> Vec<Self> {
        match self {
            Self::Teardown { failures } => failures,
            other => vec![other],
        }
    }
}

fn join_errors(errors: &[VdiskError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, VdiskError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(command: &str, code: i32) -> VdiskError {
        VdiskError::CommandFailed {
            command: command.into(),
            args: vec!["-d".into(), "/dev/loop0".into()],
            exit_code: code,
        }
    }

    #[test]
    fn command_failed_message_names_command_and_args() {
        let msg = failed("losetup", 1).to_string();
        assert_eq!(
            msg,
            "losetup -d /dev/loop0: subprocess returned non-zero exit code 1"
        );
    }

    #[test]
    fn with_suppressed_keeps_primary_cause() {
        let err = failed("kpartx", 2).with_suppressed(vec![failed("losetup", 1)]);
        assert!(matches!(
            err.primary(),
            VdiskError::CommandFailed { command, exit_code: 2, .. } if command == "kpartx"
        ));
        assert_eq!(err.suppressed().len(), 1);
        let msg = err.to_string();
        assert!(msg.starts_with("kpartx"), "got: {msg}");
        assert!(msg.contains("cleanup also failed: losetup"), "got: {msg}");
    }

    #[test]
    fn with_suppressed_empty_is_identity() {
        let err = failed("mount", 32).with_suppressed(Vec::new());
        assert!(matches!(err, VdiskError::CommandFailed { .. }));
        assert!(err.suppressed().is_empty());
    }

    #[test]
    fn with_suppressed_accumulates() {
        let err = failed("mount", 32)
            .with_suppressed(vec![failed("umount", 1)])
            .with_suppressed(vec![failed("losetup", 1)]);
        assert_eq!(err.suppressed().len(), 2);
        assert!(matches!(err.primary(), VdiskError::CommandFailed { command, .. } if command == "mount"));
    }

    #[test]
    fn teardown_message_counts_failures() {
        let err = VdiskError::Teardown {
            failures: vec![failed("umount", 1), failed("kpartx", 1)],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 step(s) failed"), "got: {msg}");
        assert_eq!(err.into_failures().len(), 2);
    }
}
