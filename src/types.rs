/// Core types for the polythene rootfs sandbox
use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;

/// Podman hardening environment, captured once at process start.
///
/// Values already present in the caller's environment win; defaults are
/// only filled in for unset variables. The config is threaded explicitly
/// into every engine invocation instead of mutating the process env.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// CONTAINERS_STORAGE_DRIVER value passed to the engine
    pub storage_driver: String,
    /// CONTAINERS_EVENTS_BACKEND value passed to the engine
    pub events_backend: String,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            storage_driver: std::env::var("CONTAINERS_STORAGE_DRIVER")
                .unwrap_or_else(|_| "vfs".to_string()),
            events_backend: std::env::var("CONTAINERS_EVENTS_BACKEND")
                .unwrap_or_else(|_| "file".to_string()),
        }
    }

    /// Apply the hardening variables to an engine subprocess.
    pub fn apply(&self, cmd: &mut Command) {
        cmd.env("CONTAINERS_STORAGE_DRIVER", &self.storage_driver);
        cmd.env("CONTAINERS_EVENTS_BACKEND", &self.events_backend);
    }
}

/// Identity of one exported rootfs tree under the store root.
///
/// Created by `pull`; read-only identity thereafter. The tree itself is
/// only mutated by commands executed inside it, and never deleted by this
/// subsystem.
#[derive(Clone, Debug)]
pub struct RootfsHandle {
    /// Unique identifier (UUIDv7 string) naming the tree
    pub identifier: String,
    /// Store root directory containing all trees
    pub store_root: PathBuf,
    /// store_root/identifier
    pub root_path: PathBuf,
}

impl RootfsHandle {
    pub fn new(identifier: impl Into<String>, store_root: impl Into<PathBuf>) -> Self {
        let identifier = identifier.into();
        let store_root = store_root.into();
        let root_path = store_root.join(&identifier);
        Self {
            identifier,
            store_root,
            root_path,
        }
    }
}

/// Outcome of a single capability or viability probe.
///
/// Probes report by value; a failed probe is an expected negotiation
/// result, not an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Probe succeeded; carries the flags the real invocation may use
    Viable(Vec<String>),
    /// Probe failed; the candidate flags must be omitted
    Unviable,
}

impl ProbeOutcome {
    pub fn is_viable(&self) -> bool {
        matches!(self, ProbeOutcome::Viable(_))
    }

    /// Resolved flags, empty when the probe was unviable.
    pub fn into_flags(self) -> Vec<String> {
        match self {
            ProbeOutcome::Viable(flags) => flags,
            ProbeOutcome::Unviable => Vec::new(),
        }
    }
}

/// Result of one real (committed) execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Exit code of the process (124 when timed_out is set)
    pub exit_code: i32,
    /// True when the caller-supplied timeout expired and the process
    /// group was killed
    pub timed_out: bool,
}

/// Error taxonomy for polythene operations
#[derive(Error, Debug)]
pub enum PolytheneError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Engine subprocess (pull/create/export) failed; carries the
    /// engine's own exit code for verbatim propagation.
    #[error("{context}: engine exited with code {code}")]
    Engine { context: String, code: i32 },

    /// A binary required for the requested operation is not on PATH.
    #[error("required binary not found: {0}")]
    MissingBinary(String),

    /// Destination directory already exists during pull.
    #[error("destination already exists: {0}")]
    StoreCollision(PathBuf),

    /// `exec` against an identifier with no store directory.
    #[error("no such rootfs: {identifier} ({path})")]
    NotFound { identifier: String, path: PathBuf },

    /// Every allowed isolation backend was skipped or failed its probe.
    #[error("all isolation modes unavailable ({attempted})")]
    NoBackend { attempted: String },

    /// A blocking engine step exceeded the caller-supplied timeout.
    #[error("{context} timed out after {secs}s")]
    Timeout { context: String, secs: u64 },
}

/// Result type alias for polythene operations
pub type Result<T> = std::result::Result<T, PolytheneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_joins_identifier_under_store_root() {
        let handle = RootfsHandle::new("abc-123", "/var/tmp/polythene");
        assert_eq!(
            handle.root_path,
            PathBuf::from("/var/tmp/polythene/abc-123")
        );
    }

    #[test]
    fn unviable_probe_resolves_to_no_flags() {
        assert!(ProbeOutcome::Unviable.into_flags().is_empty());
        let viable = ProbeOutcome::Viable(vec!["--proc".into(), "/proc".into()]);
        assert!(viable.is_viable());
        assert_eq!(viable.into_flags(), vec!["--proc", "/proc"]);
    }
}
