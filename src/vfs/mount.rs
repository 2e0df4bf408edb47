//! MOUNT: attach a configured back end and obtain the handle of its root.

use super::file::{Attr, Handle};

/// [`super::Backend::mount`] arguments.
///
/// `path` is the back end's own notion of a mount-point identifier (a
/// cairn database directory, a demofs device name); it is opaque to the
/// dispatcher, which only routes on the module magic already bound to this
/// `Backend` instance.
pub struct Args {
    pub path: String,
}

/// [`super::Backend::mount`] result.
pub struct Success {
    pub root: Handle,
    pub root_attr: Option<Attr>,
}
