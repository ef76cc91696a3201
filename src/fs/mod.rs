use bitflags::bitflags;
use tracing::{debug, error, info};
use crate::error::{FsError, Result};
use crate::handle::Key;

/// 接口版本 (major, minor)，major 不同的后端不可互换
pub const INTERFACE_VERSION: (u16, u16) = (1, 0);

/// 文件名最大字节数
pub const MAX_NAME_LEN: usize = 63;

bitflags! {
    /// 打开模式
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenMode: u32 {
        const READ = 0x1;
        const WRITE = 0x2;
        const RDWR = Self::READ.bits() | Self::WRITE.bits();
        /// 不存在时创建
        const CREATE = 0x100;
        /// 与 CREATE 同时设置时，打开已有文件会清空内容
        const TRUNCATE = 0x200;
        /// 打开后位置在文件末尾
        const APPEND = 0x400;
    }
}

bitflags! {
    /// 文件属性，仅作提示
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Attributes: u32 {
        const READONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
    }
}

/// seek 的起点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Whence {
    Set = 0,
    Cur = 1,
    End = 2,
}

impl TryFrom<i32> for Whence {
    type Error = FsError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Whence::Set),
            1 => Ok(Whence::Cur),
            2 => Ok(Whence::End),
            other => Err(FsError::Invalid(format!("unknown whence {}", other))),
        }
    }
}

/// 根据起点计算新位置，结果为负或溢出时返回 Invalid
pub fn resolve_seek(position: u64, size: u64, offset: i64, whence: Whence) -> Result<u64> {
    let base = match whence {
        Whence::Set => 0i64,
        Whence::Cur => i64::try_from(position)
            .map_err(|_| FsError::Invalid(format!("position {} out of range", position)))?,
        Whence::End => i64::try_from(size)
            .map_err(|_| FsError::Invalid(format!("size {} out of range", size)))?,
    };
    let target = base
        .checked_add(offset)
        .ok_or_else(|| FsError::Invalid(format!("seek overflow: {} + {}", base, offset)))?;
    u64::try_from(target).map_err(|_| FsError::Invalid(format!("negative seek position {}", target)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub size: u32,
    pub attr: Attributes,
    pub time: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stat {
    pub size: u32,
    pub attr: Attributes,
    pub ctime: u32,
    pub mtime: u32,
    pub atime: u32,
}

/// 超过 32 位的大小按上限截断
pub fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// 检查扁平命名空间中的文件名
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(FsError::Invalid("empty file name".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(FsError::Invalid(format!(
            "file name longer than {} bytes: {}",
            MAX_NAME_LEN, name
        )));
    }
    Ok(())
}

/// 打开文件后得到的句柄
///
/// 句柄只是一个带检查的索引，本身不持有任何资源。关闭、删除文件或
/// 后端 deinit 之后再使用会得到 `FsError::Invalid`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle {
    session: u32,
    key: Key,
}

impl FileHandle {
    pub(crate) fn new(session: u32, key: Key) -> Self {
        Self { session, key }
    }

    pub(crate) fn session(&self) -> u32 {
        self.session
    }

    pub(crate) fn key(&self) -> Key {
        self.key
    }
}

/// opendir 得到的目录句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirHandle {
    session: u32,
    key: Key,
}

impl DirHandle {
    pub(crate) fn new(session: u32, key: Key) -> Self {
        Self { session, key }
    }

    pub(crate) fn session(&self) -> u32 {
        self.session
    }

    pub(crate) fn key(&self) -> Key {
        self.key
    }
}

/// 文件系统接口
///
/// 每个后端必须给出相同的可观察行为，调用方不区分后端。所有操作都是
/// 同步的，在调用线程上执行完毕。
pub trait FileSystem: Send + Sync + std::fmt::Debug {
    /// 后端名称，例如 "ramfs"
    fn name(&self) -> &str;

    /// 初始化，重复调用是成功的空操作
    fn init(&self, config: &str) -> Result<()>;
    /// 释放所有资源，未初始化时是成功的空操作
    fn deinit(&self) -> Result<()>;
    fn is_initialized(&self) -> bool;

    fn open(&self, path: &str, mode: OpenMode, attr: Attributes) -> Result<FileHandle>;
    fn close(&self, fh: FileHandle) -> Result<()>;
    /// 返回实际读取的字节数，短读不算错误
    fn read(&self, fh: FileHandle, buf: &mut [u8]) -> Result<usize>;
    fn write(&self, fh: FileHandle, buf: &[u8]) -> Result<usize>;
    /// 返回新位置
    fn seek(&self, fh: FileHandle, offset: i64, whence: Whence) -> Result<u64>;
    fn ioctl(&self, fh: FileHandle, request: u32, arg: &mut [u8]) -> Result<i32>;
    fn sync(&self, fh: FileHandle) -> Result<()>;
    fn tell(&self, fh: FileHandle) -> Result<u64>;
    fn eof(&self, fh: FileHandle) -> Result<bool>;
    fn size(&self, fh: FileHandle) -> Result<u64>;
    fn flush(&self, fh: FileHandle) -> Result<()>;
    /// 句柄上最近一次读写失败的错误码，清除于 seek
    fn error(&self, fh: FileHandle) -> Result<Option<i32>>;

    /// 读取一个字节，到达末尾返回 None
    fn getc(&self, fh: FileHandle) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.read(fh, &mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    fn putc(&self, fh: FileHandle, byte: u8) -> Result<u8> {
        match self.write(fh, &[byte])? {
            1 => Ok(byte),
            n => Err(FsError::General(format!("putc wrote {} bytes", n))),
        }
    }

    fn opendir(&self, path: &str) -> Result<DirHandle>;
    fn closedir(&self, dh: DirHandle) -> Result<()>;
    /// 返回下一项，遍历结束返回 None
    fn readdir(&self, dh: DirHandle) -> Result<Option<DirEntry>>;

    fn stat(&self, path: &str) -> Result<Stat>;
    fn unlink(&self, path: &str) -> Result<()>;
    fn rename(&self, old_path: &str, new_path: &str) -> Result<()>;
    fn chmod(&self, path: &str, mode: u32) -> Result<()>;
    fn utime(&self, path: &str, atime: u32, mtime: u32) -> Result<()>;
    fn mkdir(&self, path: &str, mode: u32) -> Result<()>;
    fn direxists(&self, path: &str) -> Result<bool>;
}

/// 持有一个具体后端，把所有操作转发给它
///
/// drop 时若后端仍处于初始化状态会自动 deinit。
#[derive(Debug)]
pub struct VirtualFileSystem {
    storage: Box<dyn FileSystem>,
}

impl VirtualFileSystem {
    pub fn new(storage: Box<dyn FileSystem>) -> Self {
        Self { storage }
    }

    /// 读出整个文件，便于命令行和测试使用
    pub fn read_to_end(&self, path: &str) -> Result<Vec<u8>> {
        let fh = self.open(path, OpenMode::READ, Attributes::empty())?;
        let mut out = Vec::new();
        let mut chunk = [0u8; 4096];
        let result = loop {
            match self.read(fh, &mut chunk) {
                Ok(0) => break Ok(out),
                Ok(n) => out.extend_from_slice(&chunk[..n]),
                Err(e) => break Err(e),
            }
        };
        self.close(fh)?;
        result
    }

    /// 用 data 替换整个文件内容，文件不存在时创建
    pub fn write_all(&self, path: &str, data: &[u8], append: bool) -> Result<()> {
        let mut mode = OpenMode::WRITE | OpenMode::CREATE;
        mode |= if append { OpenMode::APPEND } else { OpenMode::TRUNCATE };
        let fh = self.open(path, mode, Attributes::empty())?;
        let mut written = 0;
        let result = loop {
            if written == data.len() {
                break Ok(());
            }
            match self.write(fh, &data[written..]) {
                Ok(0) => break Err(FsError::NoSpace(format!("short write to {}", path))),
                Ok(n) => written += n,
                Err(e) => break Err(e),
            }
        };
        self.close(fh)?;
        result
    }

    /// 列出所有目录项
    pub fn list(&self, path: &str) -> Result<Vec<DirEntry>> {
        let dh = self.opendir(path)?;
        let mut entries = Vec::new();
        let result = loop {
            match self.readdir(dh) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => break Ok(entries),
                Err(e) => break Err(e),
            }
        };
        self.closedir(dh)?;
        result
    }
}

impl Drop for VirtualFileSystem {
    fn drop(&mut self) {
        if self.storage.is_initialized() {
            debug!("dropping {} while initialized, running deinit", self.storage.name());
            if let Err(e) = self.storage.deinit() {
                error!("deinit {} failed: {}", self.storage.name(), e);
            }
        }
    }
}

impl FileSystem for VirtualFileSystem {
    fn name(&self) -> &str {
        self.storage.name()
    }

    fn init(&self, config: &str) -> Result<()> {
        info!("init backend {} config={:?}", self.storage.name(), config);
        self.storage.init(config)
    }

    fn deinit(&self) -> Result<()> {
        info!("deinit backend {}", self.storage.name());
        self.storage.deinit()
    }

    fn is_initialized(&self) -> bool {
        self.storage.is_initialized()
    }

    fn open(&self, path: &str, mode: OpenMode, attr: Attributes) -> Result<FileHandle> {
        self.storage.open(path, mode, attr)
    }

    fn close(&self, fh: FileHandle) -> Result<()> {
        self.storage.close(fh)
    }

    fn read(&self, fh: FileHandle, buf: &mut [u8]) -> Result<usize> {
        self.storage.read(fh, buf)
    }

    fn write(&self, fh: FileHandle, buf: &[u8]) -> Result<usize> {
        self.storage.write(fh, buf)
    }

    fn seek(&self, fh: FileHandle, offset: i64, whence: Whence) -> Result<u64> {
        self.storage.seek(fh, offset, whence)
    }

    fn ioctl(&self, fh: FileHandle, request: u32, arg: &mut [u8]) -> Result<i32> {
        self.storage.ioctl(fh, request, arg)
    }

    fn sync(&self, fh: FileHandle) -> Result<()> {
        self.storage.sync(fh)
    }

    fn tell(&self, fh: FileHandle) -> Result<u64> {
        self.storage.tell(fh)
    }

    fn eof(&self, fh: FileHandle) -> Result<bool> {
        self.storage.eof(fh)
    }

    fn size(&self, fh: FileHandle) -> Result<u64> {
        self.storage.size(fh)
    }

    fn flush(&self, fh: FileHandle) -> Result<()> {
        self.storage.flush(fh)
    }

    fn error(&self, fh: FileHandle) -> Result<Option<i32>> {
        self.storage.error(fh)
    }

    fn getc(&self, fh: FileHandle) -> Result<Option<u8>> {
        self.storage.getc(fh)
    }

    fn putc(&self, fh: FileHandle, byte: u8) -> Result<u8> {
        self.storage.putc(fh, byte)
    }

    fn opendir(&self, path: &str) -> Result<DirHandle> {
        self.storage.opendir(path)
    }

    fn closedir(&self, dh: DirHandle) -> Result<()> {
        self.storage.closedir(dh)
    }

    fn readdir(&self, dh: DirHandle) -> Result<Option<DirEntry>> {
        self.storage.readdir(dh)
    }

    fn stat(&self, path: &str) -> Result<Stat> {
        self.storage.stat(path)
    }

    fn unlink(&self, path: &str) -> Result<()> {
        self.storage.unlink(path)
    }

    fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.storage.rename(old_path, new_path)
    }

    fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        self.storage.chmod(path, mode)
    }

    fn utime(&self, path: &str, atime: u32, mtime: u32) -> Result<()> {
        self.storage.utime(path, atime, mtime)
    }

    fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        self.storage.mkdir(path, mode)
    }

    fn direxists(&self, path: &str) -> Result<bool> {
        self.storage.direxists(path)
    }
}
