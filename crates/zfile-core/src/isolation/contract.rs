//! Process-contract template scoped to one fork
//!
//! On illumos, a child forked while the template is active lands in a fresh
//! process contract that is neither fatal nor critical to us, so a crashing
//! helper cannot take the parent down. Each such contract is abandoned once
//! the child is handled, otherwise they pile up for the life of the process.
//!
//! Linux has no process contracts. There the template is inert and
//! `latest` never yields an id.

use crate::Result;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Process contract id (`ctid_t`)
pub type ContractId = i32;

/// Templates activated and not yet cleared, process-wide.
static ACTIVE: AtomicUsize = AtomicUsize::new(0);

/// Number of templates currently active on any thread.
#[must_use]
pub fn active_templates() -> usize {
    ACTIVE.load(Ordering::SeqCst)
}

/// Active contract template for the calling thread.
///
/// Dropping it clears the template, so forks after that point are no longer
/// placed in new contracts.
#[derive(Debug)]
pub struct ContractTemplate {
    inner: imp::Template,
}

impl ContractTemplate {
    /// Open, configure and activate a template for the next fork.
    pub fn activate() -> Result<Self> {
        let inner = imp::activate()?;
        ACTIVE.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("contract template activated");
        Ok(Self { inner })
    }

    /// Id of the contract most recently created by this process.
    ///
    /// Only meaningful directly after fork, while the fork lock is held.
    #[must_use]
    pub fn latest(&self) -> Option<ContractId> {
        imp::latest()
    }
}

impl Drop for ContractTemplate {
    fn drop(&mut self) {
        // No logging here: the forked child drops its copy too.
        imp::clear(&self.inner);
        ACTIVE.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Abandon a contract so it does not linger. Failure is logged only.
pub fn abandon(id: ContractId) {
    match imp::abandon(id) {
        Ok(()) => tracing::debug!(contract = id, "contract abandoned"),
        Err(e) => tracing::warn!(contract = id, error = %e, "failed to abandon contract"),
    }
}

#[cfg(target_os = "illumos")]
mod imp {
    use super::ContractId;
    use crate::{Result, ZfileError};
    use nix::errno::Errno;
    use std::fs::{File, OpenOptions};
    use std::os::fd::AsRawFd;

    const TEMPLATE_PATH: &str = "/system/contract/process/template";
    const LATEST_PATH: &str = "/system/contract/process/latest";

    // sys/contract/process.h
    const CT_PR_EV_HWERR: libc::c_uint = 0x20;
    const CT_PR_PGRPONLY: libc::c_uint = 0x04;
    const CT_PR_REGENT: libc::c_uint = 0x08;
    // sys/contract.h
    const CTD_COMMON: libc::c_int = 0;

    #[allow(non_camel_case_types)]
    type ct_stathdl_t = *mut libc::c_void;

    #[link(name = "contract")]
    unsafe extern "C" {
        fn ct_tmpl_activate(fd: libc::c_int) -> libc::c_int;
        fn ct_tmpl_clear(fd: libc::c_int) -> libc::c_int;
        fn ct_tmpl_set_critical(fd: libc::c_int, events: libc::c_uint) -> libc::c_int;
        fn ct_tmpl_set_informative(fd: libc::c_int, events: libc::c_uint) -> libc::c_int;
        fn ct_pr_tmpl_set_fatal(fd: libc::c_int, events: libc::c_uint) -> libc::c_int;
        fn ct_pr_tmpl_set_param(fd: libc::c_int, params: libc::c_uint) -> libc::c_int;
        fn ct_status_read(fd: libc::c_int, detail: libc::c_int, stathdl: *mut ct_stathdl_t) -> libc::c_int;
        fn ct_status_get_id(stathdl: ct_stathdl_t) -> ContractId;
        fn ct_status_free(stathdl: ct_stathdl_t);
        fn ct_ctl_abandon(fd: libc::c_int) -> libc::c_int;
    }

    #[derive(Debug)]
    pub struct Template {
        file: File,
    }

    /// libcontract calls return 0 or an errno value
    fn check(syscall: &'static str, ret: libc::c_int) -> Result<()> {
        if ret == 0 {
            return Ok(());
        }
        Err(ZfileError::plumbing(syscall, Errno::from_raw(ret), |errno| {
            ZfileError::GuardUnavailable { syscall, errno }
        }))
    }

    fn io_errno(e: &std::io::Error) -> Errno {
        e.raw_os_error().map_or(Errno::UnknownErrno, Errno::from_raw)
    }

    pub fn activate() -> Result<Template> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(TEMPLATE_PATH)
            .map_err(|e| {
                ZfileError::plumbing("open", io_errno(&e), |errno| ZfileError::GuardUnavailable {
                    syscall: "open",
                    errno,
                })
            })?;
        let fd = file.as_raw_fd();

        // SAFETY: fd is an open template for the duration of these calls
        unsafe {
            check("ct_tmpl_set_critical", ct_tmpl_set_critical(fd, 0))?;
            check("ct_tmpl_set_informative", ct_tmpl_set_informative(fd, 0))?;
            check("ct_pr_tmpl_set_fatal", ct_pr_tmpl_set_fatal(fd, CT_PR_EV_HWERR))?;
            check(
                "ct_pr_tmpl_set_param",
                ct_pr_tmpl_set_param(fd, CT_PR_PGRPONLY | CT_PR_REGENT),
            )?;
            check("ct_tmpl_activate", ct_tmpl_activate(fd))?;
        }

        Ok(Template { file })
    }

    pub fn clear(template: &Template) {
        // SAFETY: the template fd stays open until the File drops
        let _ = unsafe { ct_tmpl_clear(template.file.as_raw_fd()) };
    }

    pub fn latest() -> Option<ContractId> {
        let file = File::open(LATEST_PATH).ok()?;
        let mut status: ct_stathdl_t = std::ptr::null_mut();

        // SAFETY: status is written by ct_status_read and freed below
        unsafe {
            if ct_status_read(file.as_raw_fd(), CTD_COMMON, &raw mut status) != 0 {
                return None;
            }
            let id = ct_status_get_id(status);
            ct_status_free(status);
            Some(id)
        }
    }

    pub fn abandon(id: ContractId) -> std::result::Result<(), Errno> {
        let ctl = OpenOptions::new()
            .write(true)
            .open(format!("/system/contract/all/{id}/ctl"))
            .map_err(|e| io_errno(&e))?;

        // SAFETY: ctl is an open contract control file
        match unsafe { ct_ctl_abandon(ctl.as_raw_fd()) } {
            0 => Ok(()),
            e => Err(Errno::from_raw(e)),
        }
    }
}

#[cfg(not(target_os = "illumos"))]
mod imp {
    use super::ContractId;
    use crate::Result;
    use nix::errno::Errno;

    #[derive(Debug)]
    pub struct Template;

    #[allow(clippy::unnecessary_wraps)]
    pub const fn activate() -> Result<Template> {
        Ok(Template)
    }

    pub const fn clear(_template: &Template) {}

    pub const fn latest() -> Option<ContractId> {
        None
    }

    pub const fn abandon(_id: ContractId) -> std::result::Result<(), Errno> {
        Err(Errno::ENOSYS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_os = "illumos"))]
    #[test]
    fn inert_template_has_no_contract() {
        let template = ContractTemplate::activate().unwrap();
        assert_eq!(template.latest(), None);
        drop(template);
    }

    #[test]
    fn abandoning_an_unknown_contract_is_not_fatal() {
        abandon(i32::MAX);
    }
}
