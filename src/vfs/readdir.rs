//! READDIR: enumerate directory entries (spec §3 "Readdir cookies").
//!
//! Cookie values `0` and `1`/`2` are reserved for "start of directory" and
//! `.`/`..` respectively; real entries carry cookies `>= 3` chosen by the
//! back end such that re-issuing READDIR with a previously returned cookie
//! resumes immediately after that entry. A cookie that no longer
//! corresponds to a position in the directory (because the directory
//! changed) is rejected with [`crate::error::Error::BadCookie`], guarded by
//! `verifier`.

use super::file::{Attr, Handle};

pub const COOKIE_START: u64 = 0;

/// Opaque generation stamp of a directory's cookie space, returned from one
/// READDIR call and echoed on the next to detect concurrent modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CookieVerifier(pub u64);

pub struct Entry {
    pub inum: u64,
    pub name: String,
    pub cookie: u64,
}

/// [`super::Backend::readdir`] arguments.
pub struct Args {
    pub dir: Handle,
    pub cookie: u64,
    pub verifier: CookieVerifier,
    pub max_entries: usize,
    /// When set, cookies `1`/`2` yield `.`/`..` before real entries (spec
    /// §3 "Readdir"). When clear, `.`/`..` are skipped entirely.
    pub emit_dot: bool,
}

/// [`super::Backend::readdir`] result.
pub struct Success {
    pub dir_attr: Option<Attr>,
    pub verifier: CookieVerifier,
    pub entries: Vec<Entry>,
    /// `true` when `entries` reaches the end of the directory.
    pub eof: bool,
}
