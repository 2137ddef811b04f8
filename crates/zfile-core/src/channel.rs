//! Socketpair carrying one descriptor (or one status and errno) from child to parent

use crate::result::{ChildReport, ChildStatus};
use crate::{Result, ZfileError};
use nix::errno::Errno;
use nix::sys::socket::{
    recvmsg, sendmsg, socketpair, AddressFamily, ControlMessage, ControlMessageOwned, MsgFlags,
    SockFlag, SockType,
};
use std::io::{IoSlice, IoSliceMut, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

/// A connected pair of local stream sockets, created together
#[derive(Debug)]
pub struct DescriptorChannel {
    parent: UnixStream,
    child: UnixStream,
}

impl DescriptorChannel {
    /// Create a new socketpair
    pub fn new() -> Result<Self> {
        let (parent, child) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::SOCK_CLOEXEC,
        )
        .map_err(|e| ZfileError::plumbing("socketpair", e, ZfileError::ChannelUnavailable))?;

        Ok(Self {
            parent: UnixStream::from(parent),
            child: UnixStream::from(child),
        })
    }

    /// Split the channel into parent and child ends
    #[must_use]
    pub fn split(self) -> (ParentEnd, ChildEnd) {
        (ParentEnd { stream: self.parent }, ChildEnd { stream: self.child })
    }
}

/// Receiving end, kept by the parent
#[derive(Debug)]
pub struct ParentEnd {
    stream: UnixStream,
}

impl ParentEnd {
    /// Receive whatever the child reported.
    ///
    /// The first byte is a status tag. `Transferred` must carry exactly one
    /// `SCM_RIGHTS` descriptor; any other status carries none and is
    /// followed by a 4-byte errno. Anything else is malformed, and any
    /// descriptors that did arrive are closed.
    pub fn receive(&self) -> Result<ChildReport> {
        let Some((tag, fd)) = receive_tagged(self.stream.as_raw_fd())? else {
            return Ok(ChildReport::Silent);
        };

        match (ChildStatus::from_tag(tag), fd) {
            (Some(ChildStatus::Transferred), Some(fd)) => Ok(ChildReport::Descriptor(fd)),
            (Some(status), None) if status != ChildStatus::Transferred => {
                let errno = self.receive_errno().unwrap_or(Errno::UnknownErrno);
                Ok(ChildReport::Status { status, errno })
            }
            (status, fd) => {
                tracing::debug!(tag, ?status, with_descriptor = fd.is_some(), "malformed child report");
                Err(ZfileError::TransferFailed(Errno::EBADMSG))
            }
        }
    }

    fn receive_errno(&self) -> Option<Errno> {
        let mut frame = [0u8; 4];
        (&self.stream).read_exact(&mut frame).ok()?;
        Some(Errno::from_raw(i32::from_ne_bytes(frame)))
    }
}

/// Sending end, handed to the child
#[derive(Debug)]
pub struct ChildEnd {
    stream: UnixStream,
}

impl ChildEnd {
    /// Send one descriptor behind the `Transferred` tag. The local copy stays open.
    pub fn send_descriptor(&self, fd: RawFd) -> std::result::Result<(), Errno> {
        send_descriptor(self.stream.as_raw_fd(), fd)
    }

    /// Report a status other than `Transferred` and the errno behind it.
    /// Best effort: the exit status says the same thing when it survives.
    pub fn send_status(&self, status: ChildStatus, errno: Errno) {
        let mut frame = [0u8; 5];
        frame[0] = status.tag();
        frame[1..].copy_from_slice(&(errno as i32).to_ne_bytes());
        let _ = (&self.stream).write_all(&frame);
    }
}

fn send_descriptor(sock: RawFd, fd: RawFd) -> std::result::Result<(), Errno> {
    let payload = [ChildStatus::Transferred.tag()];
    let iov = [IoSlice::new(&payload)];
    let fds = [fd];
    let cmsgs = [ControlMessage::ScmRights(&fds)];

    loop {
        match sendmsg::<()>(sock, &iov, &cmsgs, MsgFlags::empty(), None) {
            Ok(0) => return Err(Errno::EPIPE),
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => {}
            Err(e) => return Err(e),
        }
    }
}

/// Read the tag byte and any descriptor riding on it. `None` when the peer
/// closed without sending anything.
fn receive_tagged(sock: RawFd) -> Result<Option<(u8, Option<OwnedFd>)>> {
    let mut payload = [0u8; 1];
    let mut cmsg_buf = nix::cmsg_space!(RawFd);

    let (bytes, truncated, fds) = loop {
        let mut iov = [IoSliceMut::new(&mut payload)];
        match recvmsg::<()>(sock, &mut iov, Some(&mut cmsg_buf), MsgFlags::empty()) {
            Ok(msg) => {
                let mut fds = Vec::new();
                let cmsgs = msg.cmsgs().map_err(ZfileError::TransferFailed)?;
                for cmsg in cmsgs {
                    if let ControlMessageOwned::ScmRights(received) = cmsg {
                        fds.extend(received);
                    }
                }
                break (msg.bytes, msg.flags.contains(MsgFlags::MSG_CTRUNC), fds);
            }
            Err(Errno::EINTR) => {}
            Err(e) => return Err(ZfileError::TransferFailed(e)),
        }
    };

    // SAFETY: SCM_RIGHTS installs fresh descriptors that nothing else owns
    let mut owned: Vec<OwnedFd> = fds
        .into_iter()
        .map(|fd| unsafe { OwnedFd::from_raw_fd(fd) })
        .collect();

    if bytes == 0 && owned.is_empty() {
        return Ok(None);
    }

    if bytes == 0 || truncated || owned.len() > 1 {
        tracing::debug!(
            bytes,
            truncated,
            descriptors = owned.len(),
            "malformed descriptor message"
        );
        return Err(ZfileError::TransferFailed(Errno::EBADMSG));
    }

    Ok(Some((payload[0], owned.pop())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FailureKind;
    use std::io::Seek;

    fn channel() -> (ParentEnd, ChildEnd) {
        DescriptorChannel::new().expect("socketpair").split()
    }

    #[test]
    fn descriptor_survives_transfer() {
        let (parent, child) = channel();
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"inside the zone").unwrap();
        file.rewind().unwrap();

        child.send_descriptor(file.as_raw_fd()).unwrap();
        drop(file);

        let ChildReport::Descriptor(fd) = parent.receive().unwrap() else {
            panic!("expected a descriptor");
        };
        let mut received = std::fs::File::from(fd);
        let mut contents = String::new();
        received.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "inside the zone");
    }

    #[test]
    fn closed_peer_is_silent() {
        let (parent, child) = channel();
        drop(child);

        assert!(matches!(parent.receive().unwrap(), ChildReport::Silent));
    }

    #[test]
    fn transferred_tag_without_rights_is_malformed() {
        let (parent, child) = channel();
        (&child.stream).write_all(&[ChildStatus::Transferred.tag()]).unwrap();
        drop(child);

        let err = parent.receive().unwrap_err();
        assert_eq!(err.kind(), FailureKind::TransferFailed);
        assert_eq!(err.errno(), Some(Errno::EBADMSG));
    }

    #[test]
    fn unknown_tag_is_malformed() {
        let (parent, child) = channel();
        (&child.stream).write_all(&[0x7f, 0, 0, 0, 0]).unwrap();
        drop(child);

        assert_eq!(parent.receive().unwrap_err().errno(), Some(Errno::EBADMSG));
    }

    #[test]
    fn status_frame_reaches_parent() {
        let (parent, child) = channel();
        child.send_status(ChildStatus::OpenFailed, Errno::ENOENT);
        drop(child);

        let report = parent.receive().unwrap();
        assert!(matches!(
            report,
            ChildReport::Status {
                status: ChildStatus::OpenFailed,
                errno: Errno::ENOENT
            }
        ));
    }

    #[test]
    fn namespace_gone_is_distinct_from_silence() {
        let (parent, child) = channel();
        child.send_status(ChildStatus::NamespaceGone, Errno::EINVAL);
        drop(child);

        let report = parent.receive().unwrap();
        assert!(matches!(
            report,
            ChildReport::Status {
                status: ChildStatus::NamespaceGone,
                ..
            }
        ));
    }

    #[test]
    fn truncated_status_frame_has_unknown_errno() {
        let (parent, child) = channel();
        (&child.stream).write_all(&[ChildStatus::EntryFailed.tag(), 1]).unwrap();
        drop(child);

        assert_eq!(parent.receive().unwrap().errno(), Some(Errno::UnknownErrno));
    }
}
