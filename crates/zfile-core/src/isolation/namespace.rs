//! Namespace resolution and entry
//!
//! On illumos a namespace is a zone, looked up by name and entered with
//! `zone_enter(2)`. On Linux it is a mount namespace named by an nsfs file,
//! entered with `setns(2)`.

use crate::{OpenerConfig, Result};
use nix::errno::Errno;

/// Outcome of trying to enter a namespace (child side)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    /// Now running inside the namespace
    Entered,
    /// The namespace went away after it was resolved
    Vanished,
    /// The namespace exists but could not be entered
    Failed(Errno),
}

/// A namespace resolved for exactly one operation
#[derive(Debug)]
pub struct NamespaceHandle {
    name: String,
    inner: imp::Handle,
}

impl NamespaceHandle {
    /// Resolve a namespace name. Fails with `NamespaceNotFound`.
    pub fn resolve(name: &str, config: &OpenerConfig) -> Result<Self> {
        let inner = imp::resolve(name, config)?;
        tracing::debug!(namespace = name, handle = ?inner, "namespace resolved");

        Ok(Self {
            name: name.to_owned(),
            inner,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this handle names the namespace we are already in.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.inner.is_current()
    }

    /// Move the calling process into the namespace.
    ///
    /// Irreversible; only ever called in the forked child.
    #[must_use]
    pub fn enter(&self) -> Entry {
        if self.is_current() {
            return Entry::Entered;
        }
        imp::enter(&self.inner)
    }
}

#[cfg(target_os = "linux")]
mod imp {
    use crate::{OpenerConfig, Result, ZfileError};
    use nix::errno::Errno;
    use nix::sched::CloneFlags;
    use std::fs::File;
    use std::os::unix::fs::MetadataExt;
    use std::path::{Component, Path, PathBuf};

    const SELF_MNT_NS: &str = "/proc/self/ns/mnt";

    /// Open nsfs file; holding it pins the namespace for the operation
    #[derive(Debug)]
    pub struct Handle {
        file: File,
        current: bool,
    }

    impl Handle {
        pub const fn is_current(&self) -> bool {
            self.current
        }
    }

    pub fn resolve(name: &str, config: &OpenerConfig) -> Result<Handle> {
        let path = namespace_path(name, &config.namespace_dir)?;

        let not_found = |e: std::io::Error| ZfileError::NamespaceNotFound {
            name: name.to_owned(),
            errno: e.raw_os_error().map_or(Errno::ENOENT, Errno::from_raw),
        };

        let file = File::open(&path).map_err(not_found)?;
        let target = file.metadata().map_err(not_found)?;
        let current = std::fs::metadata(SELF_MNT_NS)
            .map(|own| own.dev() == target.dev() && own.ino() == target.ino())
            .unwrap_or(false);

        Ok(Handle { file, current })
    }

    pub fn enter(handle: &Handle) -> super::Entry {
        match nix::sched::setns(&handle.file, CloneFlags::CLONE_NEWNS) {
            Ok(()) => super::Entry::Entered,
            Err(e) => super::Entry::Failed(e),
        }
    }

    /// Bare names live in the namespace directory; anything with a slash
    /// must be an absolute path to a namespace file.
    fn namespace_path(name: &str, dir: &Path) -> Result<PathBuf> {
        if name.contains('/') {
            if !name.starts_with('/') {
                return Err(ZfileError::InvalidRequest(format!(
                    "namespace path {name:?} is not absolute"
                )));
            }
            return Ok(PathBuf::from(name));
        }

        if !matches!(Path::new(name).components().next(), Some(Component::Normal(_))) {
            return Err(ZfileError::InvalidRequest(format!(
                "invalid namespace name {name:?}"
            )));
        }

        Ok(dir.join(name))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn bare_names_resolve_under_the_directory() {
            let path = namespace_path("web01", Path::new("/run/zfile/ns")).unwrap();
            assert_eq!(path, PathBuf::from("/run/zfile/ns/web01"));

            let path = namespace_path("/proc/1/ns/mnt", Path::new("/run/zfile/ns")).unwrap();
            assert_eq!(path, PathBuf::from("/proc/1/ns/mnt"));
        }

        #[test]
        fn traversal_names_are_rejected() {
            for name in ["..", ".", "ns/../x"] {
                assert!(namespace_path(name, Path::new("/run/zfile/ns")).is_err(), "{name}");
            }
        }
    }
}

#[cfg(target_os = "illumos")]
mod imp {
    use crate::{OpenerConfig, Result, ZfileError};
    use nix::errno::Errno;
    use std::ffi::CString;

    #[allow(non_camel_case_types)]
    type zoneid_t = libc::c_int;

    unsafe extern "C" {
        fn getzoneid() -> zoneid_t;
        fn getzoneidbyname(name: *const libc::c_char) -> zoneid_t;
        fn zone_enter(zoneid: zoneid_t) -> libc::c_int;
    }

    /// Zone id, valid only until the zone is halted or reconfigured
    #[derive(Debug)]
    pub struct Handle {
        id: zoneid_t,
        current: bool,
    }

    impl Handle {
        pub const fn is_current(&self) -> bool {
            self.current
        }
    }

    pub fn resolve(name: &str, _config: &OpenerConfig) -> Result<Handle> {
        let c_name = CString::new(name)
            .map_err(|_| ZfileError::InvalidRequest("zone name contains a NUL byte".into()))?;

        // SAFETY: c_name is a valid NUL-terminated string
        let id = unsafe { getzoneidbyname(c_name.as_ptr()) };
        if id < 0 {
            return Err(ZfileError::NamespaceNotFound {
                name: name.to_owned(),
                errno: Errno::last(),
            });
        }

        // SAFETY: no arguments, cannot fail
        let current = id == unsafe { getzoneid() };

        Ok(Handle { id, current })
    }

    pub fn enter(handle: &Handle) -> super::Entry {
        // SAFETY: plain syscall on an integer id
        if unsafe { zone_enter(handle.id) } == 0 {
            return super::Entry::Entered;
        }

        // EINVAL: the zone is gone or no longer running
        match Errno::last() {
            Errno::EINVAL => super::Entry::Vanished,
            e => super::Entry::Failed(e),
        }
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::FailureKind;

    #[test]
    fn own_mount_namespace_is_current() {
        let config = OpenerConfig::default();
        let handle = NamespaceHandle::resolve("/proc/self/ns/mnt", &config).unwrap();

        assert!(handle.is_current());
        assert_eq!(handle.name(), "/proc/self/ns/mnt");
        assert_eq!(handle.enter(), Entry::Entered);
    }

    #[test]
    fn missing_namespace_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let config = OpenerConfig::builder().namespace_dir(dir.path()).build();

        let err = NamespaceHandle::resolve("nope", &config).unwrap_err();
        assert_eq!(err.kind(), FailureKind::NamespaceNotFound);
        assert_eq!(err.errno(), Some(Errno::ENOENT));
    }

    #[test]
    fn symlinked_name_resolves() {
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink("/proc/self/ns/mnt", dir.path().join("host")).unwrap();
        let config = OpenerConfig::builder().namespace_dir(dir.path()).build();

        let handle = NamespaceHandle::resolve("host", &config).unwrap();
        assert!(handle.is_current());
    }
}
