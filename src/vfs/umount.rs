//! UMOUNT: detach a previously mounted back end.

/// [`super::Backend::umount`] arguments.
pub struct Args {
    pub path: String,
}

/// [`super::Backend::umount`] result. Empty: a clean unmount reports
/// nothing beyond success.
pub struct Success;
