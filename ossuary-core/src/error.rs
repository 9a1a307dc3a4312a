//! Error taxonomy for the scoring pipeline.
//!
//! Every fallible core operation returns one of these kinds so callers can
//! distinguish "retry later" from "this package has no upstream" without
//! string matching. Retries live inside the HTTP layer; nothing here retries.

use thiserror::Error;

/// Core error kinds, one per failure class.
#[derive(Debug, Error)]
pub enum OssuaryError {
    /// Unknown ecosystem, malformed package name, unparseable cutoff.
    /// Never cached.
    #[error("invalid input: {0}")]
    Input(String),

    /// No upstream repository URL could be resolved, or the URL points at an
    /// unsupported forge. A score is never fabricated for these.
    #[error("could not resolve upstream repository: {0}")]
    UnresolvedRepo(String),

    /// Network failure, 5xx, or rate-limit budget exhausted after backoff.
    /// The orchestrator may degrade to a partial score if one collector
    /// branch still succeeded.
    #[error("transient collection failure: {0}")]
    Transient(String),

    /// Repository deleted, DMCA'd, or 403 after a known-good state.
    #[error("repository gone: {0}")]
    RepoGone(String),

    /// An aggregator or scorer assertion failed. Aborts the task; the result
    /// is never cached.
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl OssuaryError {
    /// Process exit code for the CLI dispatcher.
    pub fn exit_code(&self) -> i32 {
        match self {
            OssuaryError::UnresolvedRepo(_) | OssuaryError::RepoGone(_) => 1,
            OssuaryError::Transient(_) | OssuaryError::Invariant(_) => 2,
            OssuaryError::Input(_) => 3,
        }
    }

    /// True when a retry at a later time could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, OssuaryError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, OssuaryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_cli_contract() {
        assert_eq!(OssuaryError::UnresolvedRepo("x".into()).exit_code(), 1);
        assert_eq!(OssuaryError::Transient("x".into()).exit_code(), 2);
        assert_eq!(OssuaryError::Input("x".into()).exit_code(), 3);
        assert_eq!(OssuaryError::RepoGone("x".into()).exit_code(), 1);
    }
}
