//! Error types for zfile-core

use nix::errno::Errno;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ZfileError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("namespace {name:?} not found: {errno}")]
    NamespaceNotFound { name: String, errno: Errno },

    #[error("contract template unavailable: {syscall}: {errno}")]
    GuardUnavailable { syscall: &'static str, errno: Errno },

    #[error("descriptor channel unavailable: {0}")]
    ChannelUnavailable(Errno),

    #[error("fork failed: {0}")]
    ForkFailed(Errno),

    #[error("child {pid} did not exit normally: {detail}")]
    ChildDidNotExit { pid: i32, detail: String },

    #[error("entering namespace failed: {0}")]
    EntryFailed(Errno),

    #[error("child rejected the open mode")]
    InvalidMode,

    #[error("open {path:?} failed inside namespace: {errno}")]
    OpenFailed { path: String, errno: Errno },

    #[error("descriptor transfer failed: {0}")]
    TransferFailed(Errno),

    #[error("{syscall} interrupted")]
    Interrupted { syscall: &'static str },

    #[error("worker lost: {0}")]
    WorkerLost(String),
}

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidRequest,
    NamespaceNotFound,
    GuardUnavailable,
    ChannelUnavailable,
    ForkFailed,
    ChildDidNotExit,
    EntryFailed,
    InvalidMode,
    OpenFailed,
    TransferFailed,
    TransientInterrupt,
    WorkerLost,
}

impl FailureKind {
    /// The target itself is missing.
    #[must_use]
    pub const fn is_not_found(self) -> bool {
        matches!(self, Self::NamespaceNotFound)
    }

    /// The target exists, but the path or mode could not be served inside it.
    #[must_use]
    pub const fn is_target_failure(self) -> bool {
        matches!(self, Self::EntryFailed | Self::InvalidMode | Self::OpenFailed)
    }

    /// Our own fork/contract/socket plumbing broke.
    #[must_use]
    pub const fn is_plumbing_failure(self) -> bool {
        matches!(
            self,
            Self::GuardUnavailable
                | Self::ChannelUnavailable
                | Self::ForkFailed
                | Self::ChildDidNotExit
                | Self::TransferFailed
                | Self::TransientInterrupt
                | Self::WorkerLost
        )
    }
}

impl ZfileError {
    /// Map a plumbing errno to its error, folding `EINTR` into the retryable kind.
    pub(crate) fn plumbing(
        syscall: &'static str,
        errno: Errno,
        make: impl FnOnce(Errno) -> Self,
    ) -> Self {
        if errno == Errno::EINTR {
            Self::Interrupted { syscall }
        } else {
            make(errno)
        }
    }

    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidRequest(_) => FailureKind::InvalidRequest,
            Self::NamespaceNotFound { .. } => FailureKind::NamespaceNotFound,
            Self::GuardUnavailable { .. } => FailureKind::GuardUnavailable,
            Self::ChannelUnavailable(_) => FailureKind::ChannelUnavailable,
            Self::ForkFailed(_) => FailureKind::ForkFailed,
            Self::ChildDidNotExit { .. } => FailureKind::ChildDidNotExit,
            Self::EntryFailed(_) => FailureKind::EntryFailed,
            Self::InvalidMode => FailureKind::InvalidMode,
            Self::OpenFailed { .. } => FailureKind::OpenFailed,
            Self::TransferFailed(_) => FailureKind::TransferFailed,
            Self::Interrupted { .. } => FailureKind::TransientInterrupt,
            Self::WorkerLost(_) => FailureKind::WorkerLost,
        }
    }

    /// Underlying OS error, if one is known.
    #[must_use]
    pub const fn errno(&self) -> Option<Errno> {
        match self {
            Self::NamespaceNotFound { errno, .. }
            | Self::GuardUnavailable { errno, .. }
            | Self::OpenFailed { errno, .. } => Some(*errno),
            Self::ChannelUnavailable(errno)
            | Self::ForkFailed(errno)
            | Self::EntryFailed(errno)
            | Self::TransferFailed(errno) => Some(*errno),
            Self::ChildDidNotExit { .. } => Some(Errno::ECHILD),
            Self::Interrupted { .. } => Some(Errno::EINTR),
            Self::InvalidRequest(_) => Some(Errno::EINVAL),
            Self::InvalidMode | Self::WorkerLost(_) => None,
        }
    }

    /// Name of the operation that failed.
    #[must_use]
    pub const fn syscall(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "validate",
            Self::NamespaceNotFound { .. } => NAMESPACE_LOOKUP,
            Self::GuardUnavailable { syscall, .. } | Self::Interrupted { syscall } => *syscall,
            Self::ChannelUnavailable(_) => "socketpair",
            Self::ForkFailed(_) => "fork",
            Self::ChildDidNotExit { .. } => "waitpid",
            Self::EntryFailed(_) => NAMESPACE_ENTER,
            Self::InvalidMode | Self::OpenFailed { .. } => "open",
            Self::TransferFailed(_) => "sendmsg",
            Self::WorkerLost(_) => "spawn_blocking",
        }
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }

    #[must_use]
    pub fn report(&self) -> FailureReport {
        FailureReport {
            kind: self.kind(),
            code: self.errno().map(|e| e as i32),
            syscall: self.syscall(),
            message: self.to_string(),
        }
    }
}

#[cfg(target_os = "illumos")]
const NAMESPACE_LOOKUP: &str = "getzoneidbyname";
#[cfg(target_os = "illumos")]
const NAMESPACE_ENTER: &str = "zone_enter";
#[cfg(not(target_os = "illumos"))]
const NAMESPACE_LOOKUP: &str = "open";
#[cfg(not(target_os = "illumos"))]
const NAMESPACE_ENTER: &str = "setns";

/// Flat, serializable view of a failure.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub kind: FailureKind,
    pub code: Option<i32>,
    pub syscall: &'static str,
    pub message: String,
}
