//! Parent side of the open protocol and the retrying entry point

use crate::channel::{ChildEnd, DescriptorChannel};
use crate::isolation::fork::{self, Forked};
use crate::isolation::{contract, ContractTemplate, NamespaceHandle};
use crate::result::{ChildExit, ChildReport, ChildResult, ChildStatus};
use crate::worker::{self, Assignment};
use crate::{OpenMode, OpenRequest, OpenerConfig, Result, ZfileError};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::fs::File;
use std::os::fd::{AsRawFd, OwnedFd};

/// Serializes template activation, fork, contract capture and reaping.
///
/// "Latest contract" is per process, so two concurrent forks could capture
/// and abandon each other's contracts.
static FORK_LOCK: Mutex<()> = Mutex::new(());

/// Open `path` inside `namespace` with the default configuration.
pub fn open_in_namespace(namespace: &str, path: &str, mode: OpenMode) -> Result<File> {
    let request = OpenRequest::new(namespace, path, mode)?;
    open_with_config(&request, &OpenerConfig::default())
}

/// Open a validated request, retrying the whole sequence on `EINTR`.
pub fn open_with_config(request: &OpenRequest, config: &OpenerConfig) -> Result<File> {
    with_retries(config.max_attempts, || open_once(request, config))
}

fn with_retries<T>(max_attempts: u32, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                tracing::debug!(attempt, error = %e, "interrupted, retrying");
                attempt += 1;
            }
            other => return other,
        }
    }
}

fn open_once(request: &OpenRequest, config: &OpenerConfig) -> Result<File> {
    let path = request.c_path()?;
    let _serial = FORK_LOCK.lock();

    let namespace = NamespaceHandle::resolve(request.namespace(), config)?;
    let assignment = Assignment {
        namespace: &namespace,
        path: &path,
        mode: request.mode(),
        create_mode: config.create_mode,
    };

    tracing::debug!(
        namespace = request.namespace(),
        path = request.path(),
        mode = %request.mode(),
        "opening inside namespace"
    );

    let result = exchange(|channel| worker::open_inside(&assignment, channel))?;
    let fd = interpret(request, result)?;
    set_cloexec(&fd)?;

    tracing::debug!(fd = fd.as_raw_fd(), "descriptor received");
    Ok(File::from(fd))
}

/// Fork a contract-scoped child running `body` and collect what it left on
/// the channel. Caller holds `FORK_LOCK`.
fn exchange<F>(body: F) -> Result<ChildResult>
where
    F: FnOnce(&ChildEnd) -> ChildStatus,
{
    let template = ContractTemplate::activate()?;
    let (parent_end, child_end) = DescriptorChannel::new()?.split();

    let pid = match fork::fork()? {
        Forked::Child => worker::run_child(template, parent_end, child_end, body),
        Forked::Parent(pid) => pid,
    };
    tracing::debug!(pid = pid.as_raw(), "forked");

    let latest = template.latest();
    drop(template);
    if let Some(id) = latest {
        contract::abandon(id);
    }
    drop(child_end);

    let exit = reap(pid);
    tracing::debug!(pid = pid.as_raw(), ?exit, "child reaped");

    let report = match exit {
        ChildExit::Abnormal(_) => ChildReport::Silent,
        ChildExit::Code(_) | ChildExit::Unknown => parent_end.receive()?,
    };

    Ok(ChildResult {
        pid: pid.as_raw(),
        exit,
        report,
    })
}

/// Wait for the child, retrying on `EINTR`.
fn reap(pid: Pid) -> ChildExit {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return ChildExit::Code(code),
            Ok(WaitStatus::Signaled(_, signal, core_dumped)) => {
                let core = if core_dumped { " (core dumped)" } else { "" };
                return ChildExit::Abnormal(format!("killed by {}{core}", signal.as_str()));
            }
            Ok(status) => return ChildExit::Abnormal(format!("{status:?}")),
            Err(Errno::EINTR) => {}
            Err(Errno::ECHILD) => {
                tracing::debug!(pid = pid.as_raw(), "child already reaped");
                return ChildExit::Unknown;
            }
            Err(e) => {
                tracing::warn!(pid = pid.as_raw(), error = %e, "waitpid failed");
                return ChildExit::Abnormal(format!("waitpid failed: {e}"));
            }
        }
    }
}

/// Turn a child's exit and channel contents into the caller's outcome.
///
/// The exit code is authoritative when we have one. After `ECHILD` the
/// child's tagged report stands in for it.
fn interpret(request: &OpenRequest, result: ChildResult) -> Result<OwnedFd> {
    let ChildResult { pid, exit, report } = result;
    let errno = report.errno().unwrap_or(Errno::UnknownErrno);

    match (exit, report) {
        (ChildExit::Abnormal(detail), _) => Err(ZfileError::ChildDidNotExit { pid, detail }),
        (ChildExit::Code(0) | ChildExit::Unknown, ChildReport::Descriptor(fd)) => Ok(fd),
        (ChildExit::Code(0), _) => Err(namespace_gone(request)),
        (ChildExit::Unknown, ChildReport::Status { status, errno }) => {
            Err(failure(request, pid, status, errno))
        }
        (ChildExit::Unknown, ChildReport::Silent) => Err(ZfileError::ChildDidNotExit {
            pid,
            detail: "reaped elsewhere without reporting".into(),
        }),
        (ChildExit::Code(code), _) => Err(match ChildStatus::from_failure_code(code) {
            Some(status) => failure(request, pid, status, errno),
            None => ZfileError::ChildDidNotExit {
                pid,
                detail: format!("exited with unexpected status {code}"),
            },
        }),
    }
}

fn failure(request: &OpenRequest, pid: i32, status: ChildStatus, errno: Errno) -> ZfileError {
    match status {
        ChildStatus::NamespaceGone => namespace_gone(request),
        ChildStatus::EntryFailed => ZfileError::EntryFailed(errno),
        ChildStatus::InvalidMode => ZfileError::InvalidMode,
        ChildStatus::OpenFailed => ZfileError::OpenFailed {
            path: request.path().to_owned(),
            errno,
        },
        ChildStatus::TransferFailed => ZfileError::TransferFailed(errno),
        ChildStatus::Transferred => ZfileError::ChildDidNotExit {
            pid,
            detail: "reported a transfer without a descriptor".into(),
        },
    }
}

fn namespace_gone(request: &OpenRequest) -> ZfileError {
    ZfileError::NamespaceNotFound {
        name: request.namespace().to_owned(),
        errno: Errno::ENOENT,
    }
}

fn set_cloexec(fd: &OwnedFd) -> Result<()> {
    // SAFETY: fd is open and owned by us
    let ret = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) };
    if ret == -1 {
        return Err(ZfileError::TransferFailed(Errno::last()));
    }
    Ok(())
}
