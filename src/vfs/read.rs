//! READ: fetch data from a regular file.

use crate::iovec::IoVec;

use super::file::{Attr, Handle};

/// [`super::Backend::read`] arguments.
pub struct Args {
    pub file: Handle,
    pub offset: u64,
    pub count: u32,
}

/// [`super::Backend::read`] result.
///
/// `data` may total less than the requested `count` without `eof` being
/// set, per spec §4.1 (short reads are permitted, not just at end-of-file).
pub struct Success {
    pub data: Vec<IoVec>,
    pub eof: bool,
    pub file_attr: Option<Attr>,
}
