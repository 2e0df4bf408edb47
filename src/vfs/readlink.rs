//! READLINK: fetch the target of a symbolic link.

use super::file::{Attr, Handle};

/// [`super::Backend::readlink`] arguments.
pub struct Args {
    pub file: Handle,
}

/// [`super::Backend::readlink`] result.
///
/// Returns [`crate::error::Error::Inval`] when `file` does not name a
/// symlink.
pub struct Success {
    pub target: String,
    pub file_attr: Option<Attr>,
}
