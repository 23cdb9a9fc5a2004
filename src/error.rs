//! Error taxonomy (spec §7). `anyhow::Result`/`Context` stays the propagation
//! mechanism everywhere (as in the teacher's style); this enum exists purely
//! so the command entry point can recover a stable exit code without
//! sniffing error messages.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VpcctlError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("kernel driver failure: {0}")]
    Driver(String),

    #[error("{0}")]
    Lock(String),

    #[error("store io error: {0}")]
    Io(String),
}

impl VpcctlError {
    pub fn exit_code(&self) -> i32 {
        match self {
            VpcctlError::Validation(_) | VpcctlError::NotFound(_) | VpcctlError::Conflict(_) => 2,
            VpcctlError::Driver(_) => 3,
            VpcctlError::Lock(_) => 4,
            VpcctlError::Io(_) => 3,
        }
    }
}

/// Maps a propagated `anyhow::Error` to a process exit code. Unrecognized
/// errors (no `VpcctlError` in the chain) get the "unspecified" code 1.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<VpcctlError>())
        .map(VpcctlError::exit_code)
        .unwrap_or(1)
}

/// `delete-subnet`/`delete-vpc` tolerate a missing target (spec §7): callers
/// fold a `NotFound` into success rather than treating it as a failure.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(
        err.chain().find_map(|c| c.downcast_ref::<VpcctlError>()),
        Some(VpcctlError::NotFound(_))
    )
}
