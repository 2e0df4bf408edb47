//! GETATTR: fetch the attributes of a file-system object.

use super::file::{Attr, AttrMask, Handle};

/// [`super::Backend::getattr`] arguments.
pub struct Args {
    pub object: Handle,
    pub want: AttrMask,
}

/// [`super::Backend::getattr`] result.
pub struct Success {
    pub attr: Attr,
}
