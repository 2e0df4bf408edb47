//! REMOVE: unlink a directory entry, whether it names a file or an empty
//! directory (spec §4.1 folds NFSv3's separate REMOVE/RMDIR into one
//! operation; the back end inspects the target's type itself).

use super::file::{Handle, PrePost};

/// [`super::Backend::remove`] arguments.
pub struct Args {
    pub dir: Handle,
    pub name: String,
}

/// [`super::Backend::remove`] result.
///
/// Removing a non-empty directory fails with
/// [`crate::error::Error::NotEmpty`].
pub struct Success {
    pub dir_wcc: PrePost,
}
