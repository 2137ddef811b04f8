//! Child side of the open protocol
//!
//! Everything here runs in the forked child only. No tracing and no locks:
//! another thread of the parent may have held either at fork time.

use crate::channel::{ChildEnd, ParentEnd};
use crate::isolation::fork::terminate;
use crate::isolation::{ContractTemplate, Entry, NamespaceHandle};
use crate::request::OpenMode;
use crate::result::ChildStatus;
use nix::errno::Errno;
use std::ffi::CStr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::panic::{self, AssertUnwindSafe};

/// What the child has to open, prepared by the parent before fork
#[derive(Debug)]
pub struct Assignment<'a> {
    pub namespace: &'a NamespaceHandle,
    pub path: &'a CStr,
    pub mode: OpenMode,
    pub create_mode: u32,
}

/// Run `body` as the child and exit with its status.
///
/// Clears the child's copy of the contract template and closes the parent's
/// end of the channel first. A panic aborts, which the parent reports as a
/// child that did not exit normally.
pub fn run_child<F>(
    template: ContractTemplate,
    parent_end: ParentEnd,
    channel: ChildEnd,
    body: F,
) -> !
where
    F: FnOnce(&ChildEnd) -> ChildStatus,
{
    drop(template);
    drop(parent_end);

    let status = panic::catch_unwind(AssertUnwindSafe(|| body(&channel)))
        .unwrap_or_else(|_| std::process::abort());

    drop(channel);
    terminate(status)
}

/// Enter the namespace, open the path and send the descriptor back.
///
/// Every status other than `Transferred` is reported on the channel too, so
/// the parent can tell outcomes apart even if the exit status is lost.
#[must_use]
pub fn open_inside(assignment: &Assignment<'_>, channel: &ChildEnd) -> ChildStatus {
    let fail = |status: ChildStatus, errno: Errno| {
        channel.send_status(status, errno);
        status
    };

    match assignment.namespace.enter() {
        Entry::Entered => {}
        Entry::Vanished => return fail(ChildStatus::NamespaceGone, Errno::ENOENT),
        Entry::Failed(errno) => return fail(ChildStatus::EntryFailed, errno),
    }

    // Relative paths resolve from the namespace root.
    // SAFETY: static NUL-terminated path
    if unsafe { libc::chdir(c"/".as_ptr()) } < 0 {
        return fail(ChildStatus::EntryFailed, Errno::last());
    }

    let file = match open_nonblocking(assignment) {
        Ok(file) => file,
        Err(errno) => return fail(ChildStatus::OpenFailed, errno),
    };

    match channel.send_descriptor(file.as_raw_fd()) {
        Ok(()) => ChildStatus::Transferred,
        Err(errno) => fail(ChildStatus::TransferFailed, errno),
    }
}

/// Open without blocking, then hand back a blocking descriptor.
///
/// Guests control what sits at the path. A FIFO with no peer would otherwise
/// park the child in `open(2)` and the parent in `waitpid` forever.
fn open_nonblocking(assignment: &Assignment<'_>) -> Result<OwnedFd, Errno> {
    let flags = assignment.mode.oflags() | libc::O_CLOEXEC | libc::O_NOCTTY | libc::O_NONBLOCK;

    // SAFETY: path is NUL-terminated; the mode argument is only read with O_CREAT
    let fd = unsafe { libc::open(assignment.path.as_ptr(), flags, assignment.create_mode) };
    if fd < 0 {
        return Err(Errno::last());
    }

    // SAFETY: open just returned this descriptor to us
    let file = unsafe { OwnedFd::from_raw_fd(fd) };

    // SAFETY: F_GETFL on a descriptor we own
    let status = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_GETFL) };
    if status < 0 {
        return Err(Errno::last());
    }
    // SAFETY: F_SETFL on a descriptor we own
    if unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETFL, status & !libc::O_NONBLOCK) } < 0 {
        return Err(Errno::last());
    }

    Ok(file)
}
