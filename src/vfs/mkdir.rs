//! MKDIR: create a subdirectory.

use super::file::{Attr, Handle, PrePost, SetAttr};

/// [`super::Backend::mkdir`] arguments.
pub struct Args {
    pub parent: Handle,
    pub name: String,
    pub attr: SetAttr,
}

/// [`super::Backend::mkdir`] result.
pub struct Success {
    pub object: Handle,
    pub object_attr: Option<Attr>,
    pub parent_wcc: PrePost,
}
