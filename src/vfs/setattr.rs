//! SETATTR: change one or more attributes of an object.
//!
//! Generalizes the teacher's `vfs::set_attr` module, dropping the NFSv3
//! weak-cache-consistency guard type in favor of spec §4.1's generic
//! pre/post straddle and spec §3's ctime-based staleness check, expressed
//! the same way (an optional expected `ctime`).

use super::file::{AttrMask, Handle, PrePost, SetAttr};

/// Guard used to reject a SETATTR whose caller's view of the object is
/// already stale.
#[derive(Debug, Clone, Copy)]
pub struct Guard {
    pub ctime: super::file::Time,
}

/// [`super::Backend::setattr`] arguments.
pub struct Args {
    pub object: Handle,
    pub attr: SetAttr,
    pub guard: Option<Guard>,
    pub want: AttrMask,
}

/// [`super::Backend::setattr`] result.
///
/// SETATTR is not guaranteed atomic with respect to which individual fields
/// land: a failure partway through may have applied some of the requested
/// changes, which is why `wcc` is returned on both success and failure (see
/// [`super::Backend`]'s error contract).
pub struct Success {
    pub wcc: PrePost,
}
