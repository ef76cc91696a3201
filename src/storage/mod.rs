use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{FileExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use rustix::fs::{AtFlags, Mode, RawMode, Timespec, Timestamps, CWD};
use tracing::{debug, error, info, warn};
use crate::config::HostFsConfig;
use crate::error::{FsError, Result};
use crate::fs::{
    clamp_u32, resolve_seek, validate_name, Attributes, DirEntry, DirHandle, FileHandle,
    FileSystem, OpenMode, Stat, Whence,
};
use crate::handle::{Arena, Key};

#[derive(Debug)]
struct HostFile {
    name: String,
    file: File,
    mode: OpenMode,
    position: u64,
    error: Option<i32>,
}

#[derive(Debug)]
struct HostDir {
    root: PathBuf,
    entries: Vec<String>,
    next: usize,
}

#[derive(Debug)]
struct HostSession {
    id: u32,
    root: PathBuf,
    files: Arena<HostFile>,
    dirs: Arena<HostDir>,
}

#[derive(Debug, Default)]
struct HostState {
    next_session: u32,
    session: Option<HostSession>,
}

/// 以宿主机上的一个目录作为存储的后端
///
/// 与 `RamFs` 一样是扁平命名空间：文件名不能包含路径分隔符。每个句柄
/// 自己维护读写位置，通过 `read_at` / `write_at` 访问，多个句柄互不影响。
#[derive(Debug)]
pub struct HostFs {
    default_root: Option<PathBuf>,
    state: Mutex<HostState>,
}

/// 检查宿主文件名，除通用规则外还不能含有分隔符
fn validate_host_name(name: &str) -> Result<()> {
    validate_name(name)?;
    if name == "." || name == ".." || name.contains('/') || name.contains('\0') {
        return Err(FsError::Invalid(format!("not a flat file name: {:?}", name)));
    }
    Ok(())
}

fn metadata_attributes(metadata: &std::fs::Metadata) -> Attributes {
    let mut attr = Attributes::empty();
    if metadata.is_dir() {
        attr |= Attributes::DIRECTORY;
    }
    if metadata.permissions().readonly() {
        attr |= Attributes::READONLY;
    }
    attr
}

fn clamp_time(secs: i64) -> u32 {
    u32::try_from(secs.max(0)).unwrap_or(u32::MAX)
}

impl HostSession {
    fn path(&self, name: &str) -> Result<PathBuf> {
        validate_host_name(name)?;
        Ok(self.root.join(name))
    }

    fn file_key(&self, fh: FileHandle) -> Result<Key> {
        if fh.session() != self.id || !self.files.contains(fh.key()) {
            return Err(FsError::Invalid(format!("stale or closed file handle {:?}", fh)));
        }
        Ok(fh.key())
    }

    fn file(&self, fh: FileHandle) -> Result<&HostFile> {
        let key = self.file_key(fh)?;
        self.files
            .get(key)
            .ok_or_else(|| FsError::Invalid(format!("closed file handle {:?}", fh)))
    }

    fn file_mut(&mut self, fh: FileHandle) -> Result<&mut HostFile> {
        let key = self.file_key(fh)?;
        self.files
            .get_mut(key)
            .ok_or_else(|| FsError::Invalid(format!("closed file handle {:?}", fh)))
    }

    fn open(&mut self, name: &str, mode: OpenMode) -> Result<FileHandle> {
        let full_path = match self.path(name) {
            Ok(path) => path,
            // 非法文件名不可能存在
            Err(e) if !mode.contains(OpenMode::CREATE) => {
                debug!("open: {:?} rejected ({}), reporting not found", name, e);
                return Err(FsError::NotFound(name.to_string()));
            }
            Err(e) => return Err(e),
        };
        if full_path.is_dir() {
            return Err(FsError::Invalid(format!("{} is a directory", name)));
        }

        let writable = mode.intersects(OpenMode::WRITE | OpenMode::CREATE);
        let mut options = OpenOptions::new();
        options.read(true).write(writable);
        if mode.contains(OpenMode::CREATE) {
            options.create(true);
            if mode.contains(OpenMode::TRUNCATE) {
                options.truncate(true);
            }
        }
        let file = options.open(&full_path).map_err(|e| FsError::from_io(e, name))?;

        let position = if mode.contains(OpenMode::APPEND) {
            file.metadata().map_err(|e| FsError::from_io(e, name))?.len()
        } else {
            0
        };
        debug!("open: {:?} -> {:?}, position={}", name, full_path, position);

        let key = self.files.insert(HostFile {
            name: name.to_string(),
            file,
            mode,
            position,
            error: None,
        });
        Ok(FileHandle::new(self.id, key))
    }

    fn read(&mut self, fh: FileHandle, buf: &mut [u8]) -> Result<usize> {
        let file = self.file_mut(fh)?;
        let count = match file.file.read_at(buf, file.position) {
            Ok(count) => count,
            Err(e) => {
                error!("read: {} failed: {:?}", file.name, e);
                let err = FsError::from_io(e, &file.name);
                file.error = Some(err.code());
                return Err(err);
            }
        };
        file.position += count as u64;
        Ok(count)
    }

    fn write(&mut self, fh: FileHandle, buf: &[u8]) -> Result<usize> {
        let file = self.file_mut(fh)?;
        if !file.mode.contains(OpenMode::WRITE) {
            warn!("write: {} not opened for writing", file.name);
            let err = FsError::Invalid(format!("handle {:?} not opened for writing", fh));
            file.error = Some(err.code());
            return Err(err);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        if let Err(e) = file.file.write_all_at(buf, file.position) {
            error!("write: {} failed: {:?}", file.name, e);
            let err = FsError::from_io(e, &file.name);
            file.error = Some(err.code());
            return Err(err);
        }
        file.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn size_of(&self, fh: FileHandle) -> Result<(u64, u64)> {
        let file = self.file(fh)?;
        let len = file
            .file
            .metadata()
            .map_err(|e| FsError::from_io(e, &file.name))?
            .len();
        Ok((file.position, len))
    }

    fn seek(&mut self, fh: FileHandle, offset: i64, whence: Whence) -> Result<u64> {
        let (position, size) = self.size_of(fh)?;
        let target = resolve_seek(position, size, offset, whence)?;
        let file = self.file_mut(fh)?;
        file.position = target;
        file.error = None;
        Ok(target)
    }

    fn opendir(&mut self, path: &str) -> Result<DirHandle> {
        let dir = match path {
            "" | "/" | "." => self.root.clone(),
            name => self.path(name.trim_start_matches('/'))?,
        };
        if !dir.is_dir() {
            return Err(FsError::NotFound(path.to_string()));
        }

        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|e| FsError::from_io(e, path))? {
            let entry = entry.map_err(|e| FsError::from_io(e, path))?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if let (true, Some(name)) = (is_file, entry.file_name().to_str()) {
                entries.push(name.to_string());
            }
        }
        entries.sort();

        let key = self.dirs.insert(HostDir {
            root: dir,
            entries,
            next: 0,
        });
        Ok(DirHandle::new(self.id, key))
    }

    fn readdir(&mut self, dh: DirHandle) -> Result<Option<DirEntry>> {
        let dir = self
            .dirs
            .get_mut(dh.key())
            .filter(|_| dh.session() == self.id)
            .ok_or_else(|| FsError::Invalid(format!("stale or closed dir handle {:?}", dh)))?;

        while dir.next < dir.entries.len() {
            let name = &dir.entries[dir.next];
            dir.next += 1;
            // 列目录之后被删除的文件直接跳过
            if let Ok(metadata) = std::fs::metadata(dir.root.join(name)) {
                return Ok(Some(DirEntry {
                    name: name.clone(),
                    size: clamp_u32(metadata.len()),
                    attr: metadata_attributes(&metadata),
                    time: clamp_time(metadata.mtime()),
                }));
            }
        }
        Ok(None)
    }

    fn stat(&self, name: &str) -> Result<Stat> {
        let full_path = self
            .path(name)
            .map_err(|_| FsError::NotFound(name.to_string()))?;
        let metadata = std::fs::metadata(&full_path).map_err(|e| FsError::from_io(e, name))?;
        Ok(Stat {
            size: clamp_u32(metadata.len()),
            attr: metadata_attributes(&metadata),
            ctime: clamp_time(metadata.ctime()),
            mtime: clamp_time(metadata.mtime()),
            atime: clamp_time(metadata.atime()),
        })
    }

    fn unlink(&self, name: &str) -> Result<()> {
        let full_path = self
            .path(name)
            .map_err(|_| FsError::NotFound(name.to_string()))?;
        if full_path.is_dir() {
            return Err(FsError::Invalid(format!("{} is a directory", name)));
        }
        std::fs::remove_file(&full_path).map_err(|e| FsError::from_io(e, name))
    }

    fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        let old_path = self
            .path(old_name)
            .map_err(|_| FsError::NotFound(old_name.to_string()))?;
        if std::fs::symlink_metadata(&old_path).is_err() {
            return Err(FsError::NotFound(old_name.to_string()));
        }
        if old_name == new_name {
            return Ok(());
        }
        let new_path = self.path(new_name)?;
        if std::fs::symlink_metadata(&new_path).is_ok() {
            return Err(FsError::Exists(new_name.to_string()));
        }
        std::fs::rename(&old_path, &new_path).map_err(|e| FsError::from_io(e, old_name))
    }
}

impl HostFs {
    /// 以 root 为默认根目录创建，init 的配置可以覆盖它
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            default_root: Some(root.into()),
            state: Mutex::new(HostState::default()),
        }
    }

    /// 不带默认根目录，init 时必须通过配置 `root=...` 指定
    pub fn unrooted() -> Self {
        Self {
            default_root: None,
            state: Mutex::new(HostState::default()),
        }
    }

    /// 当前会话的根目录
    pub fn root(&self) -> Result<PathBuf> {
        self.with_session(|s| Ok(s.root.clone()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, HostState>> {
        self.state
            .lock()
            .map_err(|_| FsError::General("hostfs state lock poisoned".to_string()))
    }

    fn with_session<T>(&self, f: impl FnOnce(&mut HostSession) -> Result<T>) -> Result<T> {
        let mut state = self.lock()?;
        let session = state.session.as_mut().ok_or(FsError::NotInitialized)?;
        f(session)
    }

    fn prepare_root(root: &Path) -> Result<()> {
        if !root.exists() {
            info!("hostfs: creating root directory {:?}", root);
            std::fs::create_dir_all(root).map_err(FsError::Io)?;
        }
        if !root.is_dir() {
            return Err(FsError::Invalid(format!("root {:?} is not a directory", root)));
        }
        Ok(())
    }
}

impl FileSystem for HostFs {
    fn name(&self) -> &str {
        "hostfs"
    }

    fn init(&self, config: &str) -> Result<()> {
        let mut state = self.lock()?;
        if state.session.is_some() {
            info!("hostfs: already initialized");
            return Ok(());
        }

        let config = HostFsConfig::parse(config)?;
        let root = config
            .root
            .or_else(|| self.default_root.clone())
            .ok_or_else(|| FsError::Invalid("hostfs needs a root directory".to_string()))?;
        Self::prepare_root(&root)?;

        let id = state.next_session;
        state.next_session = id.wrapping_add(1);
        info!("hostfs: initializing session {} at {:?}", id, root);
        state.session = Some(HostSession {
            id,
            root,
            files: Arena::new(),
            dirs: Arena::new(),
        });
        Ok(())
    }

    fn deinit(&self) -> Result<()> {
        let mut state = self.lock()?;
        let Some(mut session) = state.session.take() else {
            return Ok(());
        };
        let open = session.files.drain();
        for mut file in open {
            if let Err(e) = file.file.flush() {
                warn!("hostfs: flushing {} on deinit failed: {}", file.name, e);
            }
        }
        session.dirs.drain();
        info!("hostfs: deinitialized session {}", session.id);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.lock().map(|state| state.session.is_some()).unwrap_or(false)
    }

    fn open(&self, path: &str, mode: OpenMode, _attr: Attributes) -> Result<FileHandle> {
        self.with_session(|s| s.open(path, mode))
    }

    fn close(&self, fh: FileHandle) -> Result<()> {
        self.with_session(|s| {
            let key = s.file_key(fh)?;
            s.files.remove(key);
            Ok(())
        })
    }

    fn read(&self, fh: FileHandle, buf: &mut [u8]) -> Result<usize> {
        self.with_session(|s| s.read(fh, buf))
    }

    fn write(&self, fh: FileHandle, buf: &[u8]) -> Result<usize> {
        self.with_session(|s| s.write(fh, buf))
    }

    fn seek(&self, fh: FileHandle, offset: i64, whence: Whence) -> Result<u64> {
        self.with_session(|s| s.seek(fh, offset, whence))
    }

    fn ioctl(&self, fh: FileHandle, request: u32, _arg: &mut [u8]) -> Result<i32> {
        self.with_session(|s| {
            s.file(fh)?;
            Err(FsError::General(format!("ioctl request {} not supported", request)))
        })
    }

    fn sync(&self, fh: FileHandle) -> Result<()> {
        self.with_session(|s| {
            let file = s.file(fh)?;
            file.file.sync_all().map_err(|e| FsError::from_io(e, &file.name))
        })
    }

    fn tell(&self, fh: FileHandle) -> Result<u64> {
        self.with_session(|s| Ok(s.file(fh)?.position))
    }

    fn eof(&self, fh: FileHandle) -> Result<bool> {
        self.with_session(|s| {
            let (position, size) = s.size_of(fh)?;
            Ok(position >= size)
        })
    }

    fn size(&self, fh: FileHandle) -> Result<u64> {
        self.with_session(|s| Ok(s.size_of(fh)?.1))
    }

    fn flush(&self, fh: FileHandle) -> Result<()> {
        self.with_session(|s| {
            let file = s.file_mut(fh)?;
            file.file.flush().map_err(|e| FsError::from_io(e, &file.name))
        })
    }

    fn error(&self, fh: FileHandle) -> Result<Option<i32>> {
        self.with_session(|s| Ok(s.file(fh)?.error))
    }

    fn opendir(&self, path: &str) -> Result<DirHandle> {
        self.with_session(|s| s.opendir(path))
    }

    fn closedir(&self, dh: DirHandle) -> Result<()> {
        self.with_session(|s| {
            if dh.session() != s.id || s.dirs.remove(dh.key()).is_none() {
                return Err(FsError::Invalid(format!("stale or closed dir handle {:?}", dh)));
            }
            Ok(())
        })
    }

    fn readdir(&self, dh: DirHandle) -> Result<Option<DirEntry>> {
        self.with_session(|s| s.readdir(dh))
    }

    fn stat(&self, path: &str) -> Result<Stat> {
        self.with_session(|s| s.stat(path))
    }

    fn unlink(&self, path: &str) -> Result<()> {
        debug!("unlink: {:?}", path);
        self.with_session(|s| s.unlink(path))
    }

    fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        debug!("rename: {:?} -> {:?}", old_path, new_path);
        self.with_session(|s| s.rename(old_path, new_path))
    }

    fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        self.with_session(|s| {
            let full_path = s.path(path)?;
            rustix::fs::chmod(&full_path, Mode::from_bits_truncate(mode as RawMode))
                .map_err(|e| FsError::from_io(e.into(), path))
        })
    }

    fn utime(&self, path: &str, atime: u32, mtime: u32) -> Result<()> {
        self.with_session(|s| {
            let full_path = s.path(path)?;
            let times = Timestamps {
                last_access: Timespec {
                    tv_sec: atime.into(),
                    tv_nsec: 0,
                },
                last_modification: Timespec {
                    tv_sec: mtime.into(),
                    tv_nsec: 0,
                },
            };
            rustix::fs::utimensat(CWD, &full_path, &times, AtFlags::empty())
                .map_err(|e| FsError::from_io(e.into(), path))
        })
    }

    fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        self.with_session(|s| {
            let full_path = s.path(path)?;
            debug!("mkdir: creating directory at {:?}", full_path);
            rustix::fs::mkdir(&full_path, Mode::from_bits_truncate(mode as RawMode))
                .map_err(|e| FsError::from_io(e.into(), path))
        })
    }

    fn direxists(&self, path: &str) -> Result<bool> {
        self.with_session(|s| Ok(s.path(path).map(|p| p.is_dir()).unwrap_or(false)))
    }
}
