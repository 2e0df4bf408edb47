//! Block device abstraction and free-space reservation (spec §4.4 "Device
//! pool and free-space reservation").
//!
//! Grounded in `examples/original_source/src/vfs/io_uring/io_uring.c` for
//! the device-type split (io_uring vs VFIO) and in the teacher's existing
//! `io-uring` dependency (already present, `cfg(target_os = "linux")`) for
//! the concrete Linux implementation. All writes and extent boundaries are
//! 4 KiB aligned, per spec §4.4.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};

pub const BLOCK_SIZE: u64 = 4096;
pub const RESERVATION_SIZE: u64 = 1 << 30;

pub fn align_down(offset: u64) -> u64 {
    offset - (offset % BLOCK_SIZE)
}

pub fn align_up(offset: u64) -> u64 {
    align_down(offset + BLOCK_SIZE - 1)
}

/// A raw block device a demofs mount stores file data on.
#[async_trait]
pub trait BlockDevice: Send + Sync {
    fn max_request_size(&self) -> u64;
    async fn read_at(&self, offset: u64, len: u64) -> Result<Vec<u8>>;
    async fn write_at(&self, offset: u64, data: &[u8]) -> Result<()>;
}

/// Per-device free-space tracking: a single run `(offset, length)`.
/// Workers carve 1-GiB reservations out of it and allocate from their own
/// reservation without touching shared state, per spec §4.4.
pub struct DevicePool {
    device: Box<dyn BlockDevice>,
    remaining_offset: AtomicU64,
    remaining_len: Mutex<u64>,
}

impl DevicePool {
    pub fn new(device: Box<dyn BlockDevice>, capacity: u64) -> Self {
        Self { device, remaining_offset: AtomicU64::new(0), remaining_len: Mutex::new(capacity) }
    }

    pub fn device(&self) -> &dyn BlockDevice {
        &*self.device
    }

    /// Carves a new 1-GiB chunk from the device's remaining run. Only
    /// called when a worker's thread-local reservation is exhausted.
    fn reserve_chunk(&self) -> Result<(u64, u64)> {
        let mut remaining = self.remaining_len.lock().expect("device pool lock poisoned");
        let take = RESERVATION_SIZE.min(*remaining);
        if take == 0 {
            return Err(Error::NoSpace);
        }
        let offset = self.remaining_offset.fetch_add(take, Ordering::Relaxed);
        *remaining -= take;
        Ok((offset, take))
    }
}

/// A worker's thread-local carve-out of device space. Allocation within a
/// reservation is pure arithmetic; only exhausting it touches the shared
/// [`DevicePool`].
pub struct Reservation {
    offset: u64,
    remaining: u64,
}

impl Reservation {
    pub fn empty() -> Self {
        Self { offset: 0, remaining: 0 }
    }

    /// Allocates `len` (already 4-KiB aligned) bytes of device space,
    /// pulling a fresh 1-GiB chunk from `pool` if this reservation is
    /// exhausted.
    pub fn alloc(&mut self, pool: &DevicePool, len: u64) -> Result<u64> {
        debug_assert_eq!(len % BLOCK_SIZE, 0);
        if len > self.remaining {
            let (offset, size) = pool.reserve_chunk()?;
            if len > size {
                return Err(Error::NoSpace);
            }
            self.offset = offset;
            self.remaining = size;
        }
        let allocated = self.offset;
        self.offset += len;
        self.remaining -= len;
        Ok(allocated)
    }
}

/// Linux device backed by the teacher's existing `io-uring` dependency.
/// Submission/completion plumbing is intentionally minimal (one
/// submit-and-wait per call): the spec's concurrency story is about the
/// VFS layer's worker model, not about deepening io_uring's own queue
/// depth, so this back end favors a small, obviously-correct adapter over
/// a hand-rolled async reactor.
#[cfg(target_os = "linux")]
pub mod io_uring_device {
    use super::*;
    use io_uring::{opcode, types, IoUring};
    use std::fs::{File, OpenOptions};
    use std::os::unix::io::AsRawFd;
    use std::sync::Mutex as StdMutex;

    pub struct IoUringDevice {
        file: File,
        ring: StdMutex<IoUring>,
        max_request_size: u64,
    }

    impl IoUringDevice {
        pub fn open(path: &str, max_request_size: u64) -> Result<Self> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .map_err(|_| Error::Fault)?;
            let ring = IoUring::new(32).map_err(|_| Error::Fault)?;
            Ok(Self { file, ring: StdMutex::new(ring), max_request_size })
        }
    }

    #[async_trait]
    impl BlockDevice for IoUringDevice {
        fn max_request_size(&self) -> u64 {
            self.max_request_size
        }

        async fn read_at(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
            let mut buf = vec![0u8; len as usize];
            let fd = types::Fd(self.file.as_raw_fd());
            let entry = opcode::Read::new(fd, buf.as_mut_ptr(), len as u32)
                .offset(offset)
                .build()
                .user_data(0);
            let mut ring = self.ring.lock().expect("io_uring lock poisoned");
            unsafe {
                ring.submission().push(&entry).map_err(|_| Error::Fault)?;
            }
            ring.submit_and_wait(1).map_err(|_| Error::Fault)?;
            let cqe = ring.completion().next().ok_or(Error::Fault)?;
            if cqe.result() < 0 {
                return Err(Error::Fault);
            }
            Ok(buf)
        }

        async fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
            let fd = types::Fd(self.file.as_raw_fd());
            let entry = opcode::Write::new(fd, data.as_ptr(), data.len() as u32)
                .offset(offset)
                .build()
                .user_data(0);
            let mut ring = self.ring.lock().expect("io_uring lock poisoned");
            unsafe {
                ring.submission().push(&entry).map_err(|_| Error::Fault)?;
            }
            ring.submit_and_wait(1).map_err(|_| Error::Fault)?;
            let cqe = ring.completion().next().ok_or(Error::Fault)?;
            if cqe.result() < 0 {
                return Err(Error::Fault);
            }
            Ok(())
        }
    }
}

/// Opens the device named by one config entry (spec §6 "Demofs: `devices`").
/// Creates the backing file at `size` bytes if it does not already exist.
///
/// `vfio` is accepted by config parsing so a config round-trips and an
/// unconfigured device type is distinguishable from an unsupported one, but
/// there is no in-crate way to map a PCI BAR without privileged host setup,
/// so this always reports `NotSupp` for it (see DESIGN.md).
pub fn open_device(config: &crate::config::DeviceConfig) -> Result<Box<dyn BlockDevice>> {
    match config.device_type {
        #[cfg(target_os = "linux")]
        crate::config::DeviceType::IoUring => {
            ensure_sized(&config.path, config.size)?;
            let device = io_uring_device::IoUringDevice::open(&config.path, 1 << 20)?;
            Ok(Box::new(device))
        }
        #[cfg(not(target_os = "linux"))]
        crate::config::DeviceType::IoUring => Err(Error::NotSupp),
        crate::config::DeviceType::Vfio => Err(Error::NotSupp),
    }
}

fn ensure_sized(path: &str, size: u64) -> Result<()> {
    let path = std::path::Path::new(path);
    if path.exists() {
        return Ok(());
    }
    FileDevice::create(path, size, 1 << 20).map(|_| ())
}

/// A plain file, used by unit tests in place of a raw block device
/// (spec's device types are `io_uring`/`vfio`; this crate's own test
/// tooling needs something that runs without a kernel block device or
/// root, hence this addition — see DESIGN.md).
pub struct FileDevice {
    file: Mutex<std::fs::File>,
    max_request_size: u64,
}

impl FileDevice {
    pub fn create(path: &std::path::Path, size: u64, max_request_size: u64) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|_| Error::Fault)?;
        file.set_len(size).map_err(|_| Error::Fault)?;
        Ok(Self { file: Mutex::new(file), max_request_size })
    }
}

#[async_trait]
impl BlockDevice for FileDevice {
    fn max_request_size(&self) -> u64 {
        self.max_request_size
    }

    async fn read_at(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = self.file.lock().expect("file device lock poisoned");
        file.seek(SeekFrom::Start(offset)).map_err(|_| Error::Fault)?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf).map_err(|_| Error::Fault)?;
        Ok(buf)
    }

    async fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut file = self.file.lock().expect("file device lock poisoned");
        file.seek(SeekFrom::Start(offset)).map_err(|_| Error::Fault)?;
        file.write_all(data).map_err(|_| Error::Fault)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_helpers_round_to_block_size() {
        assert_eq!(align_down(4097), 4096);
        assert_eq!(align_up(4097), 8192);
        assert_eq!(align_up(4096), 4096);
    }

    #[test]
    fn vfio_device_type_is_not_supported() {
        let config = crate::config::DeviceConfig {
            device_type: crate::config::DeviceType::Vfio,
            path: "0000:00:04.0".to_string(),
            size: 1024,
        };
        assert!(matches!(open_device(&config), Err(Error::NotSupp)));
    }

    #[test]
    fn reservation_carves_from_pool_once() {
        let device = FileDevice::create(
            &std::env::temp_dir().join("chimera-vfs-test-device"),
            RESERVATION_SIZE * 2,
            1 << 20,
        )
        .unwrap();
        let pool = DevicePool::new(Box::new(device), RESERVATION_SIZE * 2);
        let mut reservation = Reservation::empty();
        let a = reservation.alloc(&pool, BLOCK_SIZE).unwrap();
        let b = reservation.alloc(&pool, BLOCK_SIZE).unwrap();
        assert_eq!(b, a + BLOCK_SIZE);
    }
}
