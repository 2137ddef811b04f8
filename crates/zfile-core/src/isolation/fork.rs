//! fork(2) wrapper

use crate::result::ChildStatus;
use crate::{Result, ZfileError};
use nix::unistd::{ForkResult, Pid};

/// Which side of the fork we are on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forked {
    Parent(Pid),
    Child,
}

/// Fork the calling process.
///
/// `EINTR` surfaces as a retryable error; anything else is `ForkFailed`.
pub fn fork() -> Result<Forked> {
    // SAFETY: callers hold the fork lock and the child branch only runs
    // `worker::run_child`, which ends in `terminate`
    match unsafe { nix::unistd::fork() } {
        Ok(ForkResult::Parent { child }) => Ok(Forked::Parent(child)),
        Ok(ForkResult::Child) => Ok(Forked::Child),
        Err(e) => Err(ZfileError::plumbing("fork", e, ZfileError::ForkFailed)),
    }
}

/// End the child with its coded status, skipping atexit handlers and stdio
/// buffers inherited from the parent.
pub fn terminate(status: ChildStatus) -> ! {
    // SAFETY: _exit is async-signal-safe and never returns
    unsafe { libc::_exit(status.code()) }
}
