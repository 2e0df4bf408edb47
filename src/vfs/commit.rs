//! COMMIT: force previously written data to stable storage.

use super::file::{Handle, PrePost};
use super::write::StableVerifier;

/// [`super::Backend::commit`] arguments.
pub struct Args {
    pub file: Handle,
    pub offset: u64,
    /// `0` commits from `offset` to end of file.
    pub count: u32,
}

/// [`super::Backend::commit`] result.
pub struct Success {
    pub verifier: StableVerifier,
    pub wcc: PrePost,
}
