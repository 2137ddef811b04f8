//! # zfile-core
//!
//! Open a file as seen from inside another zone (illumos) or mount namespace
//! (Linux) and get the descriptor back in the calling process, which never
//! leaves its own namespace.
//!
//! The protocol, per call:
//! - activate a process-contract template so the helper child cannot fault us
//! - create a socketpair and fork
//! - the child enters the target namespace, opens the path and sends the
//!   descriptor back with `SCM_RIGHTS`, then exits with a coded status
//! - the parent abandons the child's contract, reaps it and receives the fd
//!
//! Fork, contract capture and reaping are serialized process-wide.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

#[cfg(not(any(target_os = "linux", target_os = "illumos")))]
compile_error!("zfile-core supports illumos zones and Linux mount namespaces only");

pub mod channel;
pub mod config;
pub mod error;
pub mod isolation;
pub mod orchestrator;
pub mod pool;
pub mod request;
pub mod result;
pub mod worker;

pub use config::OpenerConfig;
pub use error::{FailureKind, FailureReport, ZfileError};
pub use orchestrator::{open_in_namespace, open_with_config};
pub use pool::ZoneOpener;
pub use request::{OpenMode, OpenRequest};

/// Crate-level result type
pub type Result<T> = std::result::Result<T, ZfileError>;
