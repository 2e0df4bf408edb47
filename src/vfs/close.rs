//! CLOSE: release per-open state obtained from OPEN or OPEN_AT.

use super::file::Handle;

/// [`super::Backend::close`] arguments.
pub struct Args {
    pub open: Handle,
}

/// [`super::Backend::close`] result. Empty: CLOSE reports only success or
/// the failure kind.
pub struct Success;
