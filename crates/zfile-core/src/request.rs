//! Open requests and mode translation

use crate::{Result, ZfileError};
use std::ffi::CString;
use std::fmt;
use std::str::FromStr;

/// How the target file is opened inside the namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenMode {
    /// Read-only
    Read,
    /// Write-only, created if missing, truncated if present
    WriteTruncate,
    /// Write-only append, created if missing
    Append,
}

impl OpenMode {
    /// Native `open(2)` flags for this mode.
    #[must_use]
    pub const fn oflags(self) -> libc::c_int {
        match self {
            Self::Read => libc::O_RDONLY,
            Self::WriteTruncate => libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
            Self::Append => libc::O_WRONLY | libc::O_CREAT | libc::O_APPEND,
        }
    }

    /// Whether the open may create the file.
    #[must_use]
    pub const fn creates(self) -> bool {
        !matches!(self, Self::Read)
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "r",
            Self::WriteTruncate => "w",
            Self::Append => "a",
        })
    }
}

impl FromStr for OpenMode {
    type Err = ZfileError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "r" | "read" => Ok(Self::Read),
            "w" | "write" | "truncate" => Ok(Self::WriteTruncate),
            "a" | "append" => Ok(Self::Append),
            other => Err(ZfileError::InvalidRequest(format!(
                "unknown open mode {other:?}"
            ))),
        }
    }
}

/// One call's worth of input: where, what and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    namespace: String,
    path: String,
    mode: OpenMode,
}

impl OpenRequest {
    /// Validate and build a request.
    ///
    /// Both the namespace name and the path must be non-empty and free of
    /// NUL bytes. A relative path resolves from the namespace root.
    pub fn new(namespace: impl Into<String>, path: impl Into<String>, mode: OpenMode) -> Result<Self> {
        let namespace = namespace.into();
        let path = path.into();

        if namespace.is_empty() {
            return Err(ZfileError::InvalidRequest("namespace name is empty".into()));
        }
        if namespace.contains('\0') {
            return Err(ZfileError::InvalidRequest(
                "namespace name contains a NUL byte".into(),
            ));
        }
        if path.is_empty() {
            return Err(ZfileError::InvalidRequest("path is empty".into()));
        }
        if path.contains('\0') {
            return Err(ZfileError::InvalidRequest("path contains a NUL byte".into()));
        }

        Ok(Self { namespace, path, mode })
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub const fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Path as a C string, built before fork so the child never allocates it.
    pub(crate) fn c_path(&self) -> Result<CString> {
        CString::new(self.path.as_bytes())
            .map_err(|_| ZfileError::InvalidRequest("path contains a NUL byte".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FailureKind;

    #[test]
    fn append_opens_for_writing() {
        let flags = OpenMode::Append.oflags();
        assert_eq!(flags & libc::O_ACCMODE, libc::O_WRONLY);
        assert_ne!(flags & libc::O_APPEND, 0);
        assert_ne!(flags & libc::O_CREAT, 0);
        assert_eq!(flags & libc::O_TRUNC, 0);
    }

    #[test]
    fn write_truncates_and_read_never_creates() {
        let flags = OpenMode::WriteTruncate.oflags();
        assert_eq!(flags & libc::O_ACCMODE, libc::O_WRONLY);
        assert_ne!(flags & libc::O_TRUNC, 0);

        let flags = OpenMode::Read.oflags();
        assert_eq!(flags & libc::O_ACCMODE, libc::O_RDONLY);
        assert_eq!(flags & libc::O_CREAT, 0);
        assert!(!OpenMode::Read.creates());
    }

    #[test]
    fn parse_mode_names() {
        assert_eq!("r".parse::<OpenMode>().unwrap(), OpenMode::Read);
        assert_eq!("write".parse::<OpenMode>().unwrap(), OpenMode::WriteTruncate);
        assert_eq!("a".parse::<OpenMode>().unwrap(), OpenMode::Append);
        assert_eq!(
            "rw".parse::<OpenMode>().unwrap_err().kind(),
            FailureKind::InvalidRequest
        );
    }

    #[test]
    fn rejects_malformed_requests() {
        for (ns, path) in [
            ("", "/etc/motd"),
            ("web01", ""),
            ("web\0", "/etc/motd"),
            ("web01", "/etc/\0motd"),
        ] {
            let err = OpenRequest::new(ns, path, OpenMode::Read).unwrap_err();
            assert_eq!(err.kind(), FailureKind::InvalidRequest, "{ns:?} {path:?}");
        }
    }

    #[test]
    fn accepts_well_formed_request() {
        let req = OpenRequest::new("web01", "/etc/motd", OpenMode::Append).unwrap();
        assert_eq!(req.namespace(), "web01");
        assert_eq!(req.path(), "/etc/motd");
        assert_eq!(req.mode(), OpenMode::Append);
        assert_eq!(req.c_path().unwrap().as_bytes(), b"/etc/motd");
    }

    #[test]
    fn accepts_relative_path() {
        let req = OpenRequest::new("web01", "etc/motd", OpenMode::Read).unwrap();
        assert_eq!(req.path(), "etc/motd");
    }
}
