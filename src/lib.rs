pub mod error;
pub mod fs;
pub mod handle;
pub mod allocator;
pub mod config;
pub mod ramfs;
pub mod storage;
pub mod backend;

pub use error::{FsError, Result};
pub use fs::{FileSystem, VirtualFileSystem, OpenMode, Attributes, Whence, DirEntry, Stat, FileHandle, DirHandle};
pub use ramfs::{RamFs, RamFsStats};
pub use storage::HostFs;
pub use backend::BackendRegistry;

#[cfg(test)]
mod conformance;
