use thiserror::Error;

/// 所有后端共用的整数状态码
pub mod code {
    pub const OK: i32 = 0;
    pub const GENERAL: i32 = -1;
    pub const NOT_FOUND: i32 = -2;
    pub const EXISTS: i32 = -3;
    pub const NO_SPACE: i32 = -4;
    pub const INVALID: i32 = -5;
    pub const NOT_EMPTY: i32 = -6;
}

#[derive(Error, Debug)]
pub enum FsError {
    #[error("File system not initialized")]
    NotInitialized,

    #[error("General failure: {0}")]
    General(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("File already exists: {0}")]
    Exists(String),

    #[error("No space left: {0}")]
    NoSpace(String),

    #[error("Invalid argument: {0}")]
    Invalid(String),

    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// 对应的负数状态码
    pub fn code(&self) -> i32 {
        match self {
            FsError::NotInitialized | FsError::General(_) => code::GENERAL,
            FsError::NotFound(_) => code::NOT_FOUND,
            FsError::Exists(_) => code::EXISTS,
            FsError::NoSpace(_) => code::NO_SPACE,
            FsError::Invalid(_) => code::INVALID,
            FsError::NotEmpty(_) => code::NOT_EMPTY,
            FsError::Io(e) => io_code(e.kind()),
        }
    }

    /// 转换宿主文件系统的 IO 错误，消息中保留路径
    pub fn from_io(err: std::io::Error, path: &str) -> Self {
        let msg = format!("{}: {}", path, err);
        match err.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(msg),
            std::io::ErrorKind::AlreadyExists => FsError::Exists(msg),
            std::io::ErrorKind::InvalidInput => FsError::Invalid(msg),
            std::io::ErrorKind::OutOfMemory => FsError::NoSpace(msg),
            _ => FsError::Io(err),
        }
    }
}

fn io_code(kind: std::io::ErrorKind) -> i32 {
    match kind {
        std::io::ErrorKind::NotFound => code::NOT_FOUND,
        std::io::ErrorKind::AlreadyExists => code::EXISTS,
        std::io::ErrorKind::InvalidInput => code::INVALID,
        std::io::ErrorKind::OutOfMemory => code::NO_SPACE,
        _ => code::GENERAL,
    }
}

pub type Result<T> = std::result::Result<T, FsError>;

/// 把结果折叠为 `code::OK` 或错误码
pub fn status<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => code::OK,
        Err(e) => e.code(),
    }
}
