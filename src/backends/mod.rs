//! Concrete [`crate::vfs::Backend`] implementations.

pub mod cairn;
pub mod demofs;
