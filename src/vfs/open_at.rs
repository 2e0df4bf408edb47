//! OPEN_AT: LOOKUP and OPEN as one request (spec §4.1), avoiding a
//! round trip for the common open-by-name path.

use super::file::{Attr, Handle};
use super::open::OpenFlags;

/// [`super::Backend::open_at`] arguments.
pub struct Args {
    pub parent: Handle,
    pub name: String,
    pub flags: OpenFlags,
    /// Forwarded to the implicit OPEN; see [`super::open::Args::inferred`].
    pub inferred: bool,
}

/// [`super::Backend::open_at`] result.
pub struct Success {
    pub object: Handle,
    pub open: Handle,
    pub object_attr: Option<Attr>,
}
