use std::alloc::{self, Layout};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// 文件缓冲区的分配器
///
/// `alloc` 返回恰好 `len` 字节、内容为零的缓冲区，失败返回 None。
/// 后端通过 `free` 归还缓冲区，分配器可以据此统计用量。
pub trait Allocator: Send + Sync + std::fmt::Debug {
    fn alloc(&self, len: usize) -> Option<Vec<u8>>;
    fn free(&self, buf: Vec<u8>);
}

/// 默认分配器，直接使用进程堆
///
/// 通过 `alloc_zeroed` 取得清零的内存，大缓冲区在写入前不会被逐页触碰。
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl Allocator for HeapAllocator {
    fn alloc(&self, len: usize) -> Option<Vec<u8>> {
        if len == 0 {
            return Some(Vec::new());
        }
        let Ok(layout) = Layout::array::<u8>(len) else {
            debug!("heap allocation of {} bytes exceeds layout limit", len);
            return None;
        };
        // SAFETY: layout 非零大小；指针来自全局分配器，长度和容量都等于 len，
        // 所有字节已清零，满足 Vec::from_raw_parts 的要求
        unsafe {
            let ptr = alloc::alloc_zeroed(layout);
            if ptr.is_null() {
                debug!("heap allocation of {} bytes failed", len);
                return None;
            }
            Some(Vec::from_raw_parts(ptr, len, len))
        }
    }

    fn free(&self, buf: Vec<u8>) {
        drop(buf);
    }
}

/// 限制同时存活字节数的分配器
#[derive(Debug)]
pub struct LimitedAllocator {
    limit: usize,
    in_use: AtomicUsize,
}

impl LimitedAllocator {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            in_use: AtomicUsize::new(0),
        }
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }
}

impl Allocator for LimitedAllocator {
    fn alloc(&self, len: usize) -> Option<Vec<u8>> {
        let reserved = self
            .in_use
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                used.checked_add(len).filter(|total| *total <= self.limit)
            });
        if reserved.is_err() {
            debug!("allocation of {} bytes exceeds limit {}", len, self.limit);
            return None;
        }

        match HeapAllocator.alloc(len) {
            Some(buf) => Some(buf),
            None => {
                self.in_use.fetch_sub(len, Ordering::SeqCst);
                None
            }
        }
    }

    fn free(&self, buf: Vec<u8>) {
        self.in_use.fetch_sub(buf.len(), Ordering::SeqCst);
    }
}
