//! OPEN: establish per-open state for an existing file (spec §4.1 "per-open
//! refcounted state"). Distinct from LOOKUP: OPEN is what allocates the
//! open-owner entry a later READ/WRITE/CLOSE addresses, so that two
//! concurrent opens of the same object are tracked, and released,
//! independently.

use super::file::{Attr, Handle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
}

/// [`super::Backend::open`] arguments.
pub struct Args {
    pub file: Handle,
    pub flags: OpenFlags,
    /// Spec §4.1 "Open-handle cache and inferred opens": when set, the back
    /// end must not allocate a real handle or increment the inode's
    /// refcount, and returns a synthetic pointer instead. Protocols that
    /// need no durable open state (NFSv3 CREATE) set this; protocols that
    /// do (an actual OPEN) leave it clear.
    pub inferred: bool,
}

/// Opaque per-open reference. Bundled into the [`Handle`] fragment by
/// back ends that need it (cairn does; demofs's file handles are
/// self-sufficient without one), and presented back to CLOSE.
pub struct Success {
    pub open: Handle,
    pub attr: Option<Attr>,
}
