use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use crate::allocator::{Allocator, HeapAllocator};
use crate::config::RamFsConfig;
use crate::error::{FsError, Result};
use crate::fs::{
    clamp_u32, resolve_seek, validate_name, Attributes, DirEntry, DirHandle, FileHandle,
    FileSystem, OpenMode, Stat, Whence,
};
use crate::handle::{Arena, Key};

/// 一个存储在内存中的文件
#[derive(Debug)]
struct FileRecord {
    name: String,
    /// 从未写入过的文件没有缓冲区
    data: Option<Vec<u8>>,
    /// 有效字节数，不超过缓冲区长度
    size: usize,
    /// 最近一次打开时使用的模式
    flags: OpenMode,
}

impl FileRecord {
    fn new(name: &str, flags: OpenMode) -> Self {
        Self {
            name: name.to_string(),
            data: None,
            size: 0,
            flags,
        }
    }

    fn capacity(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }
}

/// 打开的文件：自己的游标 + 指向记录的 key
#[derive(Debug)]
struct OpenFile {
    record: Key,
    position: u64,
    mode: OpenMode,
    error: Option<i32>,
}

/// opendir 时按名字排序的记录快照
#[derive(Debug)]
struct DirCursor {
    entries: Vec<Key>,
    next: usize,
}

/// 一次 init 到 deinit 之间的全部状态
#[derive(Debug)]
struct Session {
    id: u32,
    config: RamFsConfig,
    records: Arena<FileRecord>,
    open_files: Arena<OpenFile>,
    dirs: Arena<DirCursor>,
    /// 所有记录缓冲区容量之和
    allocated: usize,
}

#[derive(Debug, Default)]
struct State {
    next_session: u32,
    session: Option<Session>,
}

/// 内存文件系统统计信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RamFsStats {
    pub files: usize,
    pub open_files: usize,
    pub bytes_used: usize,
    pub bytes_allocated: usize,
}

impl std::fmt::Display for RamFsStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ramfs: files={}, open={}, used={} bytes, allocated={} bytes",
            self.files, self.open_files, self.bytes_used, self.bytes_allocated
        )
    }
}

impl Session {
    fn new(id: u32, config: RamFsConfig) -> Self {
        Self {
            id,
            config,
            records: Arena::new(),
            open_files: Arena::new(),
            dirs: Arena::new(),
            allocated: 0,
        }
    }

    /// 按名字线性查找，区分大小写，不做任何规范化
    fn find(&self, name: &str) -> Option<Key> {
        self.records
            .iter()
            .find(|(_, record)| record.name == name)
            .map(|(key, _)| key)
    }

    fn file_key(&self, fh: FileHandle) -> Result<Key> {
        if fh.session() != self.id || !self.open_files.contains(fh.key()) {
            return Err(FsError::Invalid(format!("stale or closed file handle {:?}", fh)));
        }
        Ok(fh.key())
    }

    fn file(&self, fh: FileHandle) -> Result<&OpenFile> {
        let key = self.file_key(fh)?;
        self.open_files
            .get(key)
            .ok_or_else(|| FsError::Invalid(format!("closed file handle {:?}", fh)))
    }

    fn file_mut(&mut self, fh: FileHandle) -> Result<&mut OpenFile> {
        let key = self.file_key(fh)?;
        self.open_files
            .get_mut(key)
            .ok_or_else(|| FsError::Invalid(format!("closed file handle {:?}", fh)))
    }

    fn record(&self, key: Key) -> Result<&FileRecord> {
        self.records
            .get(key)
            .ok_or_else(|| FsError::Invalid("file was unlinked while open".to_string()))
    }

    fn open(&mut self, path: &str, mode: OpenMode) -> Result<FileHandle> {
        let key = match self.find(path) {
            Some(key) => {
                if mode.contains(OpenMode::CREATE | OpenMode::TRUNCATE) {
                    if let Some(record) = self.records.get_mut(key) {
                        // 保留已分配的容量
                        record.size = 0;
                    }
                }
                key
            }
            None => {
                if !mode.contains(OpenMode::CREATE) {
                    return Err(FsError::NotFound(path.to_string()));
                }
                validate_name(path)?;
                if let Some(max_files) = self.config.max_files {
                    if self.records.len() >= max_files {
                        return Err(FsError::NoSpace(format!(
                            "file limit {} reached, cannot create {}",
                            max_files, path
                        )));
                    }
                }
                debug!("open: creating {:?}", path);
                self.records.insert(FileRecord::new(path, mode))
            }
        };

        let record = self
            .records
            .get_mut(key)
            .ok_or_else(|| FsError::General(format!("record for {} vanished", path)))?;
        record.flags = mode;
        let position = if mode.contains(OpenMode::APPEND) {
            record.size as u64
        } else {
            0
        };

        let file = self.open_files.insert(OpenFile {
            record: key,
            position,
            mode,
            error: None,
        });
        Ok(FileHandle::new(self.id, file))
    }

    fn close(&mut self, fh: FileHandle) -> Result<()> {
        let key = self.file_key(fh)?;
        self.open_files.remove(key);
        Ok(())
    }

    fn read(&mut self, fh: FileHandle, buf: &mut [u8]) -> Result<usize> {
        let (record_key, position) = {
            let file = self.file(fh)?;
            (file.record, file.position)
        };
        let record = self.record(record_key)?;

        let available = (record.size as u64).saturating_sub(position);
        let count = available.min(buf.len() as u64) as usize;
        if count > 0 {
            let start = position as usize;
            let data = record
                .data
                .as_ref()
                .ok_or_else(|| FsError::General(format!("{} has size but no buffer", record.name)))?;
            buf[..count].copy_from_slice(&data[start..start + count]);
        }

        self.file_mut(fh)?.position += count as u64;
        debug!("read: {} bytes (requested {})", count, buf.len());
        Ok(count)
    }

    fn write(&mut self, fh: FileHandle, buf: &[u8], allocator: &dyn Allocator) -> Result<usize> {
        let result = self.write_inner(fh, buf, allocator);
        if let Err(e) = &result {
            warn!("write failed: {}", e);
            if let Ok(file) = self.file_mut(fh) {
                file.error = Some(e.code());
            }
        }
        result
    }

    fn write_inner(&mut self, fh: FileHandle, buf: &[u8], allocator: &dyn Allocator) -> Result<usize> {
        let (record_key, position, mode) = {
            let file = self.file(fh)?;
            (file.record, file.position, file.mode)
        };
        if !mode.contains(OpenMode::WRITE) {
            return Err(FsError::Invalid(format!("handle {:?} not opened for writing", fh)));
        }
        let record = self
            .records
            .get_mut(record_key)
            .ok_or_else(|| FsError::Invalid("file was unlinked while open".to_string()))?;
        if buf.is_empty() {
            return Ok(0);
        }

        let no_space = || FsError::NoSpace(format!("write of {} bytes at {} too large", buf.len(), position));
        let start = usize::try_from(position).map_err(|_| no_space())?;
        let end = start.checked_add(buf.len()).ok_or_else(no_space)?;

        let capacity = record.capacity();
        if end > capacity {
            let new_capacity = end.saturating_mul(2).max(self.config.growth_floor);
            let total = (self.allocated - capacity).saturating_add(new_capacity);
            if let Some(max_bytes) = self.config.max_bytes {
                if total > max_bytes {
                    return Err(FsError::NoSpace(format!(
                        "growing {} to {} bytes exceeds limit {}",
                        record.name, new_capacity, max_bytes
                    )));
                }
            }

            // 分配失败时保持原记录不变
            let mut new_data = allocator.alloc(new_capacity).ok_or_else(|| {
                FsError::NoSpace(format!("cannot allocate {} bytes for {}", new_capacity, record.name))
            })?;
            if let Some(old) = record.data.take() {
                new_data[..record.size].copy_from_slice(&old[..record.size]);
                allocator.free(old);
            }
            debug!("write: {} grown {} -> {} bytes", record.name, capacity, new_capacity);
            record.data = Some(new_data);
            self.allocated = total;
        }

        let size = record.size;
        let Some(data) = record.data.as_mut() else {
            return Err(FsError::General(format!("{} has no buffer after growth", record.name)));
        };
        // 新缓冲区超出旧容量的部分已经是零，只需清理截断后残留的旧数据
        let stale_end = start.min(capacity);
        if stale_end > size {
            data[size..stale_end].fill(0);
        }
        data[start..end].copy_from_slice(buf);
        record.size = size.max(end);

        self.file_mut(fh)?.position = end as u64;
        debug!("write: {} bytes", buf.len());
        Ok(buf.len())
    }

    fn seek(&mut self, fh: FileHandle, offset: i64, whence: Whence) -> Result<u64> {
        let (record_key, position) = {
            let file = self.file(fh)?;
            (file.record, file.position)
        };
        let size = self.record(record_key)?.size as u64;
        let target = resolve_seek(position, size, offset, whence)?;

        let file = self.file_mut(fh)?;
        file.position = target;
        file.error = None;
        debug!("seek: position {}", target);
        Ok(target)
    }

    fn size_of(&self, fh: FileHandle) -> Result<(u64, u64)> {
        let file = self.file(fh)?;
        let record = self.record(file.record)?;
        Ok((file.position, record.size as u64))
    }

    fn opendir(&mut self) -> Result<DirHandle> {
        let mut named: Vec<(&str, Key)> = self
            .records
            .iter()
            .map(|(key, record)| (record.name.as_str(), key))
            .collect();
        named.sort_by(|a, b| a.0.cmp(b.0));
        let entries = named.into_iter().map(|(_, key)| key).collect();
        let key = self.dirs.insert(DirCursor { entries, next: 0 });
        Ok(DirHandle::new(self.id, key))
    }

    fn readdir(&mut self, dh: DirHandle) -> Result<Option<DirEntry>> {
        let cursor = self
            .dirs
            .get_mut(dh.key())
            .filter(|_| dh.session() == self.id)
            .ok_or_else(|| FsError::Invalid(format!("stale or closed dir handle {:?}", dh)))?;

        while cursor.next < cursor.entries.len() {
            let key = cursor.entries[cursor.next];
            cursor.next += 1;
            // 快照之后被删除的记录直接跳过
            if let Some(record) = self.records.get(key) {
                return Ok(Some(DirEntry {
                    name: record.name.clone(),
                    size: clamp_u32(record.size as u64),
                    attr: Attributes::empty(),
                    time: 0,
                }));
            }
        }
        Ok(None)
    }

    fn closedir(&mut self, dh: DirHandle) -> Result<()> {
        if dh.session() != self.id || self.dirs.remove(dh.key()).is_none() {
            return Err(FsError::Invalid(format!("stale or closed dir handle {:?}", dh)));
        }
        Ok(())
    }

    fn stat(&self, path: &str) -> Result<Stat> {
        let key = self.find(path).ok_or_else(|| FsError::NotFound(path.to_string()))?;
        let record = self.record(key)?;
        Ok(Stat {
            size: clamp_u32(record.size as u64),
            ..Stat::default()
        })
    }

    fn unlink(&mut self, path: &str, allocator: &dyn Allocator) -> Result<()> {
        let key = self.find(path).ok_or_else(|| FsError::NotFound(path.to_string()))?;
        if let Some(mut record) = self.records.remove(key) {
            if let Some(data) = record.data.take() {
                self.allocated -= data.len();
                allocator.free(data);
            }
        }
        Ok(())
    }

    fn rename(&mut self, old_path: &str, new_path: &str) -> Result<()> {
        let key = self
            .find(old_path)
            .ok_or_else(|| FsError::NotFound(old_path.to_string()))?;
        if old_path == new_path {
            return Ok(());
        }
        validate_name(new_path)?;
        if self.find(new_path).is_some() {
            return Err(FsError::Exists(new_path.to_string()));
        }

        let record = self
            .records
            .get_mut(key)
            .ok_or_else(|| FsError::NotFound(old_path.to_string()))?;
        record.name = new_path.to_string();
        Ok(())
    }

    fn release(&mut self, allocator: &dyn Allocator) -> usize {
        self.open_files.drain();
        self.dirs.drain();
        let records = self.records.drain();
        let count = records.len();
        for mut record in records {
            if let Some(data) = record.data.take() {
                allocator.free(data);
            }
        }
        self.allocated = 0;
        count
    }

    fn stats(&self) -> RamFsStats {
        RamFsStats {
            files: self.records.len(),
            open_files: self.open_files.len(),
            bytes_used: self.records.iter().map(|(_, r)| r.size).sum(),
            bytes_allocated: self.allocated,
        }
    }
}

/// 内存文件系统
///
/// 扁平命名空间，所有文件都保存在进程内存中，deinit 后全部释放。
/// 所有操作通过一把后端级别的锁串行执行。
#[derive(Debug)]
pub struct RamFs {
    allocator: Arc<dyn Allocator>,
    state: Mutex<State>,
}

impl Default for RamFs {
    fn default() -> Self {
        Self::new()
    }
}

impl RamFs {
    pub fn new() -> Self {
        Self::with_allocator(Arc::new(HeapAllocator))
    }

    /// 使用指定的分配器创建
    pub fn with_allocator(allocator: Arc<dyn Allocator>) -> Self {
        Self {
            allocator,
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| FsError::General("ramfs state lock poisoned".to_string()))
    }

    fn with_session<T>(&self, f: impl FnOnce(&mut Session, &dyn Allocator) -> Result<T>) -> Result<T> {
        let mut state = self.lock()?;
        let session = state.session.as_mut().ok_or(FsError::NotInitialized)?;
        f(session, self.allocator.as_ref())
    }

    /// 文件当前的缓冲区容量
    pub fn capacity(&self, path: &str) -> Result<usize> {
        self.with_session(|s, _| {
            let key = s.find(path).ok_or_else(|| FsError::NotFound(path.to_string()))?;
            Ok(s.record(key)?.capacity())
        })
    }

    /// 文件最近一次打开时的模式
    pub fn flags(&self, path: &str) -> Result<OpenMode> {
        self.with_session(|s, _| {
            let key = s.find(path).ok_or_else(|| FsError::NotFound(path.to_string()))?;
            Ok(s.record(key)?.flags)
        })
    }

    /// 句柄打开时使用的模式
    pub fn handle_mode(&self, fh: FileHandle) -> Result<OpenMode> {
        self.with_session(|s, _| Ok(s.file(fh)?.mode))
    }

    pub fn stats(&self) -> Result<RamFsStats> {
        self.with_session(|s, _| Ok(s.stats()))
    }
}

impl FileSystem for RamFs {
    fn name(&self) -> &str {
        "ramfs"
    }

    fn init(&self, config: &str) -> Result<()> {
        let mut state = self.lock()?;
        if state.session.is_some() {
            info!("ramfs: already initialized");
            return Ok(());
        }

        let config = RamFsConfig::parse(config)?;
        let id = state.next_session;
        state.next_session = id.wrapping_add(1);
        info!("ramfs: initializing session {} with {:?}", id, config);
        state.session = Some(Session::new(id, config));
        Ok(())
    }

    fn deinit(&self) -> Result<()> {
        let mut state = self.lock()?;
        let Some(mut session) = state.session.take() else {
            return Ok(());
        };
        let released = session.release(self.allocator.as_ref());
        info!("ramfs: deinitialized session {}, released {} files", session.id, released);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.lock().map(|state| state.session.is_some()).unwrap_or(false)
    }

    fn open(&self, path: &str, mode: OpenMode, _attr: Attributes) -> Result<FileHandle> {
        debug!("open: {:?} mode={:#x}", path, mode.bits());
        self.with_session(|s, _| s.open(path, mode))
    }

    fn close(&self, fh: FileHandle) -> Result<()> {
        self.with_session(|s, _| s.close(fh))
    }

    fn read(&self, fh: FileHandle, buf: &mut [u8]) -> Result<usize> {
        self.with_session(|s, _| s.read(fh, buf))
    }

    fn write(&self, fh: FileHandle, buf: &[u8]) -> Result<usize> {
        self.with_session(|s, allocator| s.write(fh, buf, allocator))
    }

    fn seek(&self, fh: FileHandle, offset: i64, whence: Whence) -> Result<u64> {
        self.with_session(|s, _| s.seek(fh, offset, whence))
    }

    fn ioctl(&self, fh: FileHandle, request: u32, _arg: &mut [u8]) -> Result<i32> {
        self.with_session(|s, _| {
            s.file(fh)?;
            debug!("ioctl: request {} not supported", request);
            Err(FsError::General(format!("ioctl request {} not supported", request)))
        })
    }

    fn sync(&self, fh: FileHandle) -> Result<()> {
        self.with_session(|s, _| s.file(fh).map(|_| ()))
    }

    fn tell(&self, fh: FileHandle) -> Result<u64> {
        self.with_session(|s, _| Ok(s.file(fh)?.position))
    }

    fn eof(&self, fh: FileHandle) -> Result<bool> {
        self.with_session(|s, _| {
            let (position, size) = s.size_of(fh)?;
            Ok(position >= size)
        })
    }

    fn size(&self, fh: FileHandle) -> Result<u64> {
        self.with_session(|s, _| Ok(s.size_of(fh)?.1))
    }

    fn flush(&self, fh: FileHandle) -> Result<()> {
        self.with_session(|s, _| s.file(fh).map(|_| ()))
    }

    fn error(&self, fh: FileHandle) -> Result<Option<i32>> {
        self.with_session(|s, _| Ok(s.file(fh)?.error))
    }

    fn opendir(&self, path: &str) -> Result<DirHandle> {
        debug!("opendir: {:?} (flat namespace, path ignored)", path);
        self.with_session(|s, _| s.opendir())
    }

    fn closedir(&self, dh: DirHandle) -> Result<()> {
        self.with_session(|s, _| s.closedir(dh))
    }

    fn readdir(&self, dh: DirHandle) -> Result<Option<DirEntry>> {
        self.with_session(|s, _| s.readdir(dh))
    }

    fn stat(&self, path: &str) -> Result<Stat> {
        self.with_session(|s, _| s.stat(path))
    }

    fn unlink(&self, path: &str) -> Result<()> {
        debug!("unlink: {:?}", path);
        self.with_session(|s, allocator| s.unlink(path, allocator))
    }

    fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        debug!("rename: {:?} -> {:?}", old_path, new_path);
        self.with_session(|s, _| s.rename(old_path, new_path))
    }

    fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        debug!("chmod: {:?} mode={:o} ignored", path, mode);
        self.with_session(|_, _| Ok(()))
    }

    fn utime(&self, path: &str, atime: u32, mtime: u32) -> Result<()> {
        debug!("utime: {:?} atime={} mtime={} ignored", path, atime, mtime);
        self.with_session(|_, _| Ok(()))
    }

    fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        debug!("mkdir: {:?} mode={:o} ignored", path, mode);
        self.with_session(|_, _| Ok(()))
    }

    fn direxists(&self, _path: &str) -> Result<bool> {
        self.with_session(|_, _| Ok(false))
    }
}
