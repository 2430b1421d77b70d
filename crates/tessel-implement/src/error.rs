//! Error types for implementer registration and dispatch.

use tessel_ir::{IrError, Worker};
use tessel_opt::PassError;

/// Errors raised while registering implementers or compiling tasks.
#[derive(Debug, thiserror::Error)]
pub enum ImplementError {
    /// No registered implementer accepts the task.
    #[error("no implementer found for task `{task}` on {worker}")]
    NoImplementerFound { task: String, worker: Worker },

    /// An implementer key was registered twice.
    #[error("implementer `{key}` is already registered")]
    DuplicateRegistration { key: String },

    /// A task pattern failed validation at registration.
    #[error("malformed pattern for implementer `{key}`: {reason}")]
    MalformedPattern { key: String, reason: String },

    /// An implementer returned a module that does not define the task.
    #[error("implementer `{key}` produced an invalid module: {reason}")]
    InvalidOutput { key: String, reason: String },

    /// An implementer accepted a task it cannot generate code for.
    #[error("implementer `{key}` failed: {reason}")]
    Codegen { key: String, reason: String },

    #[error(transparent)]
    Ir(#[from] IrError),

    #[error(transparent)]
    Pass(#[from] PassError),
}
