//! RENAME: move/rename an entry, atomically, within or across directories.

use super::file::{Handle, PrePost};

/// [`super::Backend::rename`] arguments.
///
/// Both handles must share the same `fsid`/mount id: a cross-module rename
/// is rejected with [`crate::error::Error::XDev`] by the dispatcher before a
/// back end ever sees it.
pub struct Args {
    pub from_dir: Handle,
    pub from_name: String,
    pub to_dir: Handle,
    pub to_name: String,
}

/// [`super::Backend::rename`] result.
pub struct Success {
    pub from_dir_wcc: PrePost,
    pub to_dir_wcc: PrePost,
}
