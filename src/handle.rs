//! File-handle codec (spec §4.2).
//!
//! Layout:
//!
//! | bytes | content                                    |
//! |-------|--------------------------------------------|
//! | 0..15 | mount id (fsid-derived at MOUNT, else copied from parent) |
//! | 16    | module magic                                |
//! | 17..  | module-specific fragment                    |
//!
//! The mount id is carried but never consulted for routing: the magic byte
//! alone selects the back end (see [`crate::vfs::Dispatcher::resolve`]).
//! Decoders
//! nonetheless propagate it unchanged, per spec §4.2, so a client's later
//! stateful identification stays consistent within one mount.

use crate::error::{Error, Result};

/// Maximum encoded handle length a front end may place on the wire.
pub const MAX_HANDLE_LEN: usize = 128;

/// Width of the mount id prefix.
pub const MOUNT_ID_LEN: usize = 16;

/// Offset of the module magic byte.
pub const MAGIC_OFFSET: usize = MOUNT_ID_LEN;

/// Offset at which the module-specific fragment begins.
pub const FRAGMENT_OFFSET: usize = MAGIC_OFFSET + 1;

/// A 16-byte mount identifier.
pub type MountId = [u8; MOUNT_ID_LEN];

/// Derives a mount id from a 64-bit fsid. Deterministic so that a handle
/// decoded after a restart of a durable back end (cairn) carries the same
/// mount id it was encoded with, per spec §4.2 and §9 ("the FSID is stable
/// across restarts for cairn").
pub fn mount_id_from_fsid(fsid: u64) -> MountId {
    let half = fsid.to_be_bytes();
    let mut id = [0u8; MOUNT_ID_LEN];
    id[..8].copy_from_slice(&half);
    id[8..].copy_from_slice(&half);
    id
}

/// An opaque file handle, value-typed and freely copied (spec §3,
/// "Ownership: File handles are value types copied freely").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle(Vec<u8>);

impl FileHandle {
    /// Used once at MOUNT to stamp a new handle with a freshly derived
    /// mount id.
    pub fn encode_mount(mount_id: MountId, magic: u8, fragment: &[u8]) -> Result<Self> {
        Self::build(mount_id, magic, fragment)
    }

    /// Used for every child-of operation to copy the parent's mount id
    /// forward unchanged.
    pub fn encode_parent(parent: &FileHandle, magic: u8, fragment: &[u8]) -> Result<Self> {
        Self::build(parent.mount_id(), magic, fragment)
    }

    fn build(mount_id: MountId, magic: u8, fragment: &[u8]) -> Result<Self> {
        let total = FRAGMENT_OFFSET + fragment.len();
        if total > MAX_HANDLE_LEN {
            return Err(Error::NameTooLong);
        }
        let mut bytes = Vec::with_capacity(total);
        bytes.extend_from_slice(&mount_id);
        bytes.push(magic);
        bytes.extend_from_slice(fragment);
        Ok(Self(bytes))
    }

    /// Parses the wire bytes of a handle. Does not interpret the fragment;
    /// callers dispatch on [`Self::magic`] first and then ask the addressed
    /// back end to decode the fragment.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FRAGMENT_OFFSET || bytes.len() > MAX_HANDLE_LEN {
            return Err(Error::Stale);
        }
        Ok(Self(bytes.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn mount_id(&self) -> MountId {
        let mut id = [0u8; MOUNT_ID_LEN];
        id.copy_from_slice(&self.0[..MOUNT_ID_LEN]);
        id
    }

    /// The module magic byte used for dispatch.
    pub fn magic(&self) -> u8 {
        self.0[MAGIC_OFFSET]
    }

    /// The module-specific fragment, opaque at this layer.
    pub fn fragment(&self) -> &[u8] {
        &self.0[FRAGMENT_OFFSET..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_magic_and_fragment() {
        let mount_id = mount_id_from_fsid(0xDEAD_BEEF);
        let fh = FileHandle::encode_mount(mount_id, 7, &[1, 2, 3]).unwrap();
        assert_eq!(fh.magic(), 7);
        assert_eq!(fh.fragment(), &[1, 2, 3]);
        assert_eq!(fh.mount_id(), mount_id);

        let decoded = FileHandle::from_bytes(fh.as_bytes()).unwrap();
        assert_eq!(decoded, fh);
    }

    #[test]
    fn child_handles_copy_parent_mount_id() {
        let mount_id = mount_id_from_fsid(42);
        let parent = FileHandle::encode_mount(mount_id, 1, &[0]).unwrap();
        let child = FileHandle::encode_parent(&parent, 1, &[1]).unwrap();
        assert_eq!(child.mount_id(), parent.mount_id());
        assert_ne!(child.fragment(), parent.fragment());
    }

    #[test]
    fn oversized_fragment_rejected() {
        let mount_id = mount_id_from_fsid(1);
        let fragment = vec![0u8; MAX_HANDLE_LEN];
        assert_eq!(
            FileHandle::encode_mount(mount_id, 1, &fragment),
            Err(Error::NameTooLong)
        );
    }

    #[test]
    fn truncated_handle_is_stale() {
        assert_eq!(FileHandle::from_bytes(&[0u8; 4]), Err(Error::Stale));
    }
}
