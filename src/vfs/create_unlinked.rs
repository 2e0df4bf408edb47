//! CREATE_UNLINKED: create a regular file with no directory entry (spec
//! §4.1's `O_TMPFILE`-equivalent), later given a name via LINK or discarded
//! on CLOSE of its last open reference.

use super::file::{Attr, Handle, SetAttr};
use super::open::OpenFlags;

/// [`super::Backend::create_unlinked`] arguments.
pub struct Args {
    /// Directory supplying the new file's containing directory/device for
    /// placement purposes; the object itself is not linked into it.
    pub parent: Handle,
    pub attr: SetAttr,
    pub flags: OpenFlags,
}

/// [`super::Backend::create_unlinked`] result.
pub struct Success {
    pub object: Handle,
    pub open: Handle,
    pub object_attr: Option<Attr>,
}
