use std::collections::BTreeMap;
use tracing::{debug, info};
use crate::error::{FsError, Result};
use crate::fs::{FileSystem, VirtualFileSystem, INTERFACE_VERSION};
use crate::ramfs::RamFs;
use crate::storage::HostFs;

/// 构造一个未初始化的后端
pub type BackendFactory = Box<dyn Fn() -> Box<dyn FileSystem> + Send + Sync>;

struct BackendEntry {
    version: (u16, u16),
    factory: BackendFactory,
}

/// 按名字登记的后端工厂
///
/// 调用方通过名字选择后端，拿到的 `VirtualFileSystem` 已经用给定的
/// 配置字符串完成了 init。
pub struct BackendRegistry {
    backends: BTreeMap<String, BackendEntry>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.names())
            .finish()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: BTreeMap::new(),
        }
    }

    /// 登记内置的 ramfs 和 hostfs
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.backends.insert(
            "ramfs".to_string(),
            BackendEntry {
                version: INTERFACE_VERSION,
                factory: Box::new(|| Box::new(RamFs::new()) as Box<dyn FileSystem>),
            },
        );
        registry.backends.insert(
            "hostfs".to_string(),
            BackendEntry {
                version: INTERFACE_VERSION,
                factory: Box::new(|| Box::new(HostFs::unrooted()) as Box<dyn FileSystem>),
            },
        );
        registry
    }

    pub fn register<F>(&mut self, name: &str, version: (u16, u16), factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn FileSystem> + Send + Sync + 'static,
    {
        if self.backends.contains_key(name) {
            return Err(FsError::Exists(format!("backend {}", name)));
        }
        debug!("registering backend {} v{}.{}", name, version.0, version.1);
        self.backends.insert(
            name.to_string(),
            BackendEntry {
                version,
                factory: Box::new(factory),
            },
        );
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    pub fn version(&self, name: &str) -> Option<(u16, u16)> {
        self.backends.get(name).map(|entry| entry.version)
    }

    /// 构造并初始化名为 name 的后端
    pub fn create(&self, name: &str, config: &str) -> Result<VirtualFileSystem> {
        let entry = self
            .backends
            .get(name)
            .ok_or_else(|| FsError::NotFound(format!("backend {}", name)))?;
        if entry.version.0 != INTERFACE_VERSION.0 {
            return Err(FsError::Invalid(format!(
                "backend {} implements interface v{}.{}, expected v{}.x",
                name, entry.version.0, entry.version.1, INTERFACE_VERSION.0
            )));
        }

        let fs = VirtualFileSystem::new((entry.factory)());
        fs.init(config)?;
        info!("backend {} ready", name);
        Ok(fs)
    }
}
