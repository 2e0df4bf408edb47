//! Error taxonomy shared by every back end and by the VFS request pipeline.
//!
//! Kinds, not integers: front ends translate these into their own protocol
//! status codes (NFS3ERR_*, NFS4ERR_*, SMB STATUS_*); the core never masks a
//! kind to make it fit a particular wire protocol.

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A back end or pipeline error. See spec §7 for the condition each variant
/// reports.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// Operation denied by mode/owner. Reserved: the core does not enforce
    /// access control itself (see DESIGN.md, Open Question (a)).
    Perm,
    /// Access denied. Reserved, as with `Perm`.
    Access,
    /// Parent not found, or name not present in directory.
    NoEnt,
    /// Creation with exclusive semantics against an existing name.
    Exist,
    /// Operation required a directory but the target was not one.
    NotDir,
    /// Operation required a non-directory but the target was one.
    IsDir,
    /// `rmdir`/rename-over of a non-empty directory.
    NotEmpty,
    /// Malformed request, e.g. `read_link` of a non-symlink.
    Inval,
    /// Out of device or quota space.
    NoSpace,
    /// Write would exceed an implementation limit.
    FileTooBig,
    /// File-handle generation mismatch, or the addressed module is not
    /// loaded.
    Stale,
    /// Readdir cookie/verifier does not match the directory's current
    /// state.
    BadCookie,
    /// A path component exceeded 255 bytes.
    NameTooLong,
    /// Cross-device rename/link where not supported.
    XDev,
    /// Operation unknown to the back end.
    NotSupp,
    /// Internal inconsistency, typically a storage-layer failure that was
    /// recoverable enough to report rather than abort on.
    Fault,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Error::Perm => "operation not permitted",
            Error::Access => "permission denied",
            Error::NoEnt => "no such file or directory",
            Error::Exist => "file exists",
            Error::NotDir => "not a directory",
            Error::IsDir => "is a directory",
            Error::NotEmpty => "directory not empty",
            Error::Inval => "invalid argument",
            Error::NoSpace => "no space left on device",
            Error::FileTooBig => "file too large",
            Error::Stale => "stale file handle",
            Error::BadCookie => "readdir cookie is stale",
            Error::NameTooLong => "name too long",
            Error::XDev => "cross-device link",
            Error::NotSupp => "operation not supported",
            Error::Fault => "internal file system error",
        };
        f.write_str(s)
    }
}

impl std::error::Error for Error {}

/// Raised when a back end detects storage-layer corruption it cannot safely
/// recover from, e.g. a cairn transaction commit failure. Unlike [`Error`],
/// this is not routed back through the dispatcher as a request status: spec
/// §4.1 requires the *process*, not just the request, to treat this as
/// fatal. Callers that see this should log at `error` and abort, per spec §9
/// ("goto-based cleanup and abort on KV error... let the dispatcher decide").
#[derive(Debug)]
pub struct Fatal(pub String);

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fatal storage error: {}", self.0)
    }
}

impl std::error::Error for Fatal {}

/// Outcome of a back end operation that may be fatal rather than merely
/// erroneous.
pub type FatalResult<T> = std::result::Result<T, Fatal>;
