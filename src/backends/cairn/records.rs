//! On-disk value encodings for cairn's records (spec §4.3).
//!
//! Kept deliberately simple (fixed-width fields, no varint) except where
//! the spec calls one out (`DIRENT` packs `name_len` + `name`); cairn's
//! values are small and bounded, so there's no pressure to shrink them the
//! way the file-handle fragment is.

use crate::vfs::file::{Device, Time, Type};

fn type_tag(t: Type) -> u8 {
    match t {
        Type::Regular => 0,
        Type::Directory => 1,
        Type::BlockDevice => 2,
        Type::CharacterDevice => 3,
        Type::Symlink => 4,
        Type::Socket => 5,
        Type::Fifo => 6,
    }
}

fn type_from_tag(tag: u8) -> Type {
    match tag {
        0 => Type::Regular,
        1 => Type::Directory,
        2 => Type::BlockDevice,
        3 => Type::CharacterDevice,
        4 => Type::Symlink,
        5 => Type::Socket,
        6 => Type::Fifo,
        _ => Type::Regular,
    }
}

/// In-memory shape of the `INODE` value.
#[derive(Debug, Clone)]
pub struct Inode {
    pub file_type: Type,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub space_used: u64,
    pub device: Option<Device>,
    pub generation: u32,
    pub atime: Time,
    pub mtime: Time,
    pub ctime: Time,
    /// Directory inum this inode is filed under; meaningless for
    /// non-directories. Backs `..` for `EMIT_DOT` readdir (spec §3
    /// "Readdir"); kept current across RENAME when a directory moves to a
    /// new parent.
    pub parent_inum: u64,
    /// Open count (spec §3 "Open handle": "OPEN increments the inode
    /// refcount; CLOSE decrements it and may trigger deferred
    /// destruction"). An inode with `nlink == 0 && refcount == 0` is
    /// destroyed; `refcount > 0` keeps it alive, unreachable via lookup,
    /// until the last CLOSE (the ORPHANED state of spec §4.5's handle
    /// lifecycle).
    pub refcount: u32,
}

impl Inode {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(88);
        buf.push(type_tag(self.file_type));
        buf.extend_from_slice(&self.mode.to_le_bytes());
        buf.extend_from_slice(&self.nlink.to_le_bytes());
        buf.extend_from_slice(&self.uid.to_le_bytes());
        buf.extend_from_slice(&self.gid.to_le_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf.extend_from_slice(&self.space_used.to_le_bytes());
        let (major, minor) = match self.device {
            Some(d) => (d.major, d.minor),
            None => (0, 0),
        };
        buf.extend_from_slice(&major.to_le_bytes());
        buf.extend_from_slice(&minor.to_le_bytes());
        buf.extend_from_slice(&self.generation.to_le_bytes());
        for t in [self.atime, self.mtime, self.ctime] {
            buf.extend_from_slice(&t.seconds.to_le_bytes());
            buf.extend_from_slice(&t.nanos.to_le_bytes());
        }
        buf.extend_from_slice(&self.parent_inum.to_le_bytes());
        buf.extend_from_slice(&self.refcount.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < 1 + 4 * 4 + 8 * 2 + 4 * 3 + 12 * 3 + 8 + 4 {
            return None;
        }
        let mut pos = 0;
        let mut take4 = |buf: &[u8], pos: &mut usize| {
            let mut b = [0u8; 4];
            b.copy_from_slice(&buf[*pos..*pos + 4]);
            *pos += 4;
            u32::from_le_bytes(b)
        };
        let mut take8 = |buf: &[u8], pos: &mut usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[*pos..*pos + 8]);
            *pos += 8;
            u64::from_le_bytes(b)
        };

        let file_type = type_from_tag(buf[pos]);
        pos += 1;
        let mode = take4(buf, &mut pos);
        let nlink = take4(buf, &mut pos);
        let uid = take4(buf, &mut pos);
        let gid = take4(buf, &mut pos);
        let size = take8(buf, &mut pos);
        let space_used = take8(buf, &mut pos);
        let major = take4(buf, &mut pos);
        let minor = take4(buf, &mut pos);
        let generation = take4(buf, &mut pos);

        let mut take_time = |buf: &[u8], pos: &mut usize| {
            let mut s = [0u8; 8];
            s.copy_from_slice(&buf[*pos..*pos + 8]);
            *pos += 8;
            let mut n = [0u8; 4];
            n.copy_from_slice(&buf[*pos..*pos + 4]);
            *pos += 4;
            Time { seconds: i64::from_le_bytes(s), nanos: u32::from_le_bytes(n) }
        };
        let atime = take_time(buf, &mut pos);
        let mtime = take_time(buf, &mut pos);
        let ctime = take_time(buf, &mut pos);
        let parent_inum = take8(buf, &mut pos);
        let refcount = take4(buf, &mut pos);

        let device = matches!(file_type, Type::BlockDevice | Type::CharacterDevice)
            .then_some(Device { major, minor });

        Some(Self {
            file_type,
            mode,
            nlink,
            uid,
            gid,
            size,
            space_used,
            device,
            generation,
            atime,
            mtime,
            ctime,
            parent_inum,
            refcount,
        })
    }
}

/// In-memory shape of the `DIRENT` value: `{child_inum, name_len, name}`.
pub struct Dirent {
    pub child_inum: u64,
    pub name: String,
}

impl Dirent {
    pub fn encode(&self) -> Vec<u8> {
        let name_bytes = self.name.as_bytes();
        let mut buf = Vec::with_capacity(8 + 1 + name_bytes.len());
        buf.extend_from_slice(&self.child_inum.to_le_bytes());
        buf.push(name_bytes.len() as u8);
        buf.extend_from_slice(name_bytes);
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < 9 {
            return None;
        }
        let mut inum_bytes = [0u8; 8];
        inum_bytes.copy_from_slice(&buf[0..8]);
        let child_inum = u64::from_le_bytes(inum_bytes);
        let name_len = buf[8] as usize;
        let name = std::str::from_utf8(buf.get(9..9 + name_len)?).ok()?.to_string();
        Some(Self { child_inum, name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_inode() -> Inode {
        Inode {
            file_type: Type::Regular,
            mode: 0o644,
            nlink: 1,
            uid: 0,
            gid: 0,
            size: 4096,
            space_used: 4096,
            device: None,
            generation: 1,
            atime: Time::ZERO,
            mtime: Time::ZERO,
            ctime: Time::ZERO,
            parent_inum: 0,
            refcount: 0,
        }
    }

    #[test]
    fn inode_round_trips() {
        let inode = sample_inode();
        let decoded = Inode::decode(&inode.encode()).unwrap();
        assert_eq!(decoded.mode, inode.mode);
        assert_eq!(decoded.size, inode.size);
        assert_eq!(decoded.generation, inode.generation);
    }

    #[test]
    fn dirent_round_trips() {
        let dirent = Dirent { child_inum: 7, name: "hello.txt".to_string() };
        let decoded = Dirent::decode(&dirent.encode()).unwrap();
        assert_eq!(decoded.child_inum, 7);
        assert_eq!(decoded.name, "hello.txt");
    }
}
