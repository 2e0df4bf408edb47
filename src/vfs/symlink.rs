//! SYMLINK: create a symbolic link, atomically with its target data (spec
//! §4.1: "once visible, a READLINK of the new link must never fail or
//! return incorrect data").

use super::file::{Attr, Handle, PrePost, SetAttr};

/// [`super::Backend::symlink`] arguments.
pub struct Args {
    pub parent: Handle,
    pub name: String,
    pub target: String,
    pub attr: SetAttr,
}

/// [`super::Backend::symlink`] result.
pub struct Success {
    pub object: Handle,
    pub object_attr: Option<Attr>,
    pub parent_wcc: PrePost,
}
