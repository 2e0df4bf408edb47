//! LINK: create an additional hard link to an existing object.

use super::file::{Attr, Handle, PrePost};

/// [`super::Backend::link`] arguments.
///
/// `file` and `dir` must share a module magic; see
/// [`crate::vfs::Dispatcher::resolve_same_module`].
pub struct Args {
    pub file: Handle,
    pub dir: Handle,
    pub name: String,
}

/// [`super::Backend::link`] result.
pub struct Success {
    pub file_attr: Option<Attr>,
    pub dir_wcc: PrePost,
}
