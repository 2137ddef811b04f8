//! Child exit statuses and what the parent collects from a child

use nix::errno::Errno;
use std::os::fd::OwnedFd;

/// Terminal status of the helper child.
///
/// Both success variants exit 0; the parent tells them apart by whether a
/// descriptor arrived on the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    /// Descriptor sent to the parent
    Transferred,
    /// The namespace disappeared before we could enter it
    NamespaceGone,
    /// Namespace exists but entering it failed
    EntryFailed,
    /// Mode could not be translated to open flags
    InvalidMode,
    /// `open(2)` failed inside the namespace
    OpenFailed,
    /// Descriptor could not be sent back
    TransferFailed,
}

impl ChildStatus {
    /// Process exit code for this status
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Transferred | Self::NamespaceGone => 0,
            Self::EntryFailed => 1,
            Self::InvalidMode => 2,
            Self::OpenFailed => 4,
            Self::TransferFailed => 6,
        }
    }

    /// Failure status for a non-zero exit code; `None` for 0 and for codes
    /// the child never produces.
    #[must_use]
    pub const fn from_failure_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::EntryFailed),
            2 => Some(Self::InvalidMode),
            4 => Some(Self::OpenFailed),
            6 => Some(Self::TransferFailed),
            _ => None,
        }
    }

    /// Leading byte of the child's message on the channel.
    ///
    /// Unlike the exit code this tells the two success statuses apart, so the
    /// message alone identifies the outcome when the exit status is lost.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Transferred => 0,
            Self::NamespaceGone => 0x80,
            // Failure codes are small positive values.
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            other => other.code() as u8,
        }
    }

    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Transferred),
            0x80 => Some(Self::NamespaceGone),
            code => Self::from_failure_code(code as i32),
        }
    }
}

/// How the child ended, as seen by `waitpid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildExit {
    /// Exited with a code
    Code(i32),
    /// Signaled, stopped or otherwise not a normal exit
    Abnormal(String),
    /// Reaped by someone else (`ECHILD`); the channel is the only witness
    Unknown,
}

/// What the child left on the channel.
#[derive(Debug)]
pub enum ChildReport {
    /// The opened descriptor
    Descriptor(OwnedFd),
    /// A status other than `Transferred`, with the errno behind it
    Status { status: ChildStatus, errno: Errno },
    /// The child closed its end without sending anything
    Silent,
}

impl ChildReport {
    #[must_use]
    pub const fn errno(&self) -> Option<Errno> {
        match self {
            Self::Status { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}

/// Everything the parent learned from one child.
#[derive(Debug)]
pub struct ChildResult {
    pub pid: i32,
    pub exit: ChildExit,
    pub report: ChildReport,
}
