//! WRITE: store data into a regular file.

use crate::iovec::IoVec;

use super::file::{Handle, PrePost};

/// Durability requested for a WRITE, carried over from the teacher's
/// `StableHow` under the spec's naming (§4.1 "stability levels").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Unstable,
    DataSync,
    FileSync,
}

pub const VERIFIER_LEN: usize = 8;

/// Changes value across a back end restart so a client can tell an
/// `Unstable` write may not have survived (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StableVerifier(pub [u8; VERIFIER_LEN]);

/// [`super::Backend::write`] arguments.
pub struct Args {
    pub file: Handle,
    pub offset: u64,
    pub data: Vec<IoVec>,
    pub mode: WriteMode,
}

/// [`super::Backend::write`] result.
pub struct Success {
    pub count: u64,
    pub committed: WriteMode,
    pub verifier: StableVerifier,
    pub wcc: PrePost,
}
