//! LOOKUP: resolve a name within a directory to a file handle.
//!
//! Spec §4.1 "Name semantics": `.` resolves to the directory itself and
//! `..` resolves via the stored parent inum/generation; neither is passed
//! to dirent lookup. Each [`super::Backend`] implementation special-cases
//! both names itself, before consulting its directory-entry structure.

use super::file::{Attr, Handle};

/// [`super::Backend::lookup`] arguments.
pub struct Args {
    pub parent: Handle,
    pub name: String,
}

/// [`super::Backend::lookup`] result.
pub struct Success {
    pub object: Handle,
    pub object_attr: Option<Attr>,
    pub parent_attr: Option<Attr>,
}
