//! MKNOD: create a special file (device, socket, FIFO) or, via the shared
//! `What` variants, a regular file, directory or symlink without data
//! (spec §4.1's single create-family entry point).

use super::file::{Attr, Device, Handle, PrePost, SetAttr};

/// Discriminates the kind of object MKNOD creates.
pub enum What {
    Char(Device),
    Block(Device),
    Socket,
    Fifo,
    Regular,
    Directory,
    Symlink(String),
}

/// [`super::Backend::mknod`] arguments.
pub struct Args {
    pub parent: Handle,
    pub name: String,
    pub what: What,
    pub attr: SetAttr,
}

/// [`super::Backend::mknod`] result.
///
/// A back end that does not support `what` at all returns
/// [`crate::error::Error::NotSupp`]; one that supports the family but not
/// this particular variant (e.g. no device nodes) returns
/// [`crate::error::Error::Inval`].
pub struct Success {
    pub object: Handle,
    pub object_attr: Option<Attr>,
    pub parent_wcc: PrePost,
}
