//! Error types for tracee control

/// Errors surfaced by ptrace operations on the tracee
#[derive(thiserror::Error, Debug)]
pub enum TraceError {
    #[error("failed to spawn tracee {path}: {source}")]
    Spawn {
        path: String,
        source: nix::errno::Errno,
    },
    #[error("ptrace {op} failed: {source}")]
    Ptrace {
        op: &'static str,
        source: nix::errno::Errno,
    },
    #[error("memory {op} at 0x{addr:x} failed: {source}")]
    Memory {
        op: &'static str,
        addr: u64,
        source: nix::errno::Errno,
    },
    #[error("wait on tracee failed: {0}")]
    Wait(nix::errno::Errno),
    #[error("tracee is gone")]
    TraceeGone,
}

impl TraceError {
    /// The tracee vanished underneath us (killed or reaped); callers treat
    /// this as end-of-session, not a failure
    pub fn is_tracee_gone(&self) -> bool {
        match self {
            TraceError::TraceeGone => true,
            TraceError::Ptrace { source, .. }
            | TraceError::Memory { source, .. }
            | TraceError::Wait(source) => *source == nix::errno::Errno::ESRCH,
            TraceError::Spawn { .. } => false,
        }
    }
}

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, TraceError>;
