//! Opener configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Presence of this variable turns on step-by-step debug tracing.
pub const DEBUG_ENV: &str = "ZFILE_DEBUG";

/// Overrides the directory bare namespace names are looked up in (Linux).
pub const NS_DIR_ENV: &str = "ZFILE_NS_DIR";

/// Attempts per call when the fork sequence is interrupted by a signal.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Configuration shared by every open issued through an opener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenerConfig {
    /// Directory holding namespace files for bare names (Linux only;
    /// illumos resolves zone names with `getzoneidbyname`)
    pub namespace_dir: PathBuf,

    /// Upper bound on attempts when a call fails with `EINTR`
    pub max_attempts: u32,

    /// Size of the blocking worker pool
    pub workers: usize,

    /// Permission bits for files created by write or append opens
    pub create_mode: u32,
}

impl Default for OpenerConfig {
    fn default() -> Self {
        Self {
            namespace_dir: default_namespace_dir(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            workers: 4,
            create_mode: 0o644,
        }
    }
}

impl OpenerConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> OpenerConfigBuilder {
        OpenerConfigBuilder::default()
    }
}

/// Builder for `OpenerConfig`
#[derive(Debug, Default)]
pub struct OpenerConfigBuilder {
    config: OpenerConfig,
}

impl OpenerConfigBuilder {
    #[must_use]
    pub fn namespace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.namespace_dir = dir.into();
        self
    }

    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn create_mode(mut self, mode: u32) -> Self {
        self.config.create_mode = mode & 0o7777;
        self
    }

    #[must_use]
    pub fn build(self) -> OpenerConfig {
        self.config
    }
}

/// Get the namespace directory from `ZFILE_NS_DIR` or the system default
///
/// Returns:
/// - `$ZFILE_NS_DIR` if set
/// - `/run/zfile/ns` otherwise
pub fn default_namespace_dir() -> PathBuf {
    std::env::var_os(NS_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/run/zfile/ns"))
}

/// Whether `ZFILE_DEBUG` is present in the environment.
#[must_use]
pub fn debug_enabled() -> bool {
    std::env::var_os(DEBUG_ENV).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_clamps_values() {
        let config = OpenerConfig::builder()
            .max_attempts(0)
            .workers(0)
            .create_mode(0o100_600)
            .namespace_dir("/tmp/ns")
            .build();

        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.workers, 1);
        assert_eq!(config.create_mode, 0o600);
        assert_eq!(config.namespace_dir, PathBuf::from("/tmp/ns"));
    }

    #[test]
    fn defaults_retry_three_times() {
        let config = OpenerConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.create_mode, 0o644);
    }
}
