use std::path::PathBuf;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use crate::error::{FsError, Result};

/// 默认的缓冲区增长下限（字节）
pub const DEFAULT_GROWTH_FLOOR: usize = 256;

/// init 收到的配置字符串
///
/// 支持两种写法：JSON 对象，例如 `{"max_files": 32}`；或者用 `,` / `;`
/// 分隔的 `key=value` 列表，例如 `max_files=32;growth_floor=512`。
/// 空字符串表示全部使用默认值。
#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    values: Map<String, Value>,
}

impl BackendConfig {
    /// 解析配置字符串
    ///
    /// `string_keys` 中的键总是按字符串保存。在 `key=value` 写法里，这些键
    /// 的值可以包含 `,` 或 `;`：紧随其后、不含 `=` 的片段会接回到值上。
    pub fn parse(config: &str, string_keys: &[&str]) -> Result<Self> {
        let trimmed = config.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }

        if trimmed.starts_with('{') {
            let values: Map<String, Value> = serde_json::from_str(trimmed)
                .map_err(|e| FsError::Invalid(format!("bad config json: {}", e)))?;
            return Ok(Self { values });
        }

        let mut entries: Vec<(String, String)> = Vec::new();
        let mut last_sep = None;
        for piece in trimmed.split_inclusive([',', ';']) {
            let (body, sep) = match piece.chars().last() {
                Some(c @ (',' | ';')) => (&piece[..piece.len() - 1], Some(c)),
                _ => (piece, None),
            };
            let continues = !body.contains('=')
                && !body.trim().is_empty()
                && matches!(entries.last(), Some((key, _)) if string_keys.contains(&key.as_str()));

            if continues {
                if let (Some((_, value)), Some(prev)) = (entries.last_mut(), last_sep) {
                    value.push(prev);
                    value.push_str(body);
                }
            } else if !body.trim().is_empty() {
                let (key, raw) = body
                    .split_once('=')
                    .ok_or_else(|| FsError::Invalid(format!("config entry without '=': {}", body.trim())))?;
                entries.push((key.trim().to_string(), raw.to_string()));
            }
            last_sep = sep;
        }

        let values = entries
            .into_iter()
            .map(|(key, raw)| {
                let raw = raw.trim();
                let value = if string_keys.contains(&key.as_str()) {
                    Value::String(raw.to_string())
                } else {
                    scalar(raw)
                };
                (key, value)
            })
            .collect();
        Ok(Self { values })
    }

    /// 反序列化成具体后端的配置结构
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T> {
        serde_json::from_value(Value::Object(self.values))
            .map_err(|e| FsError::Invalid(format!("bad config: {}", e)))
    }
}

// 数字和布尔按 JSON 解析，其余按字符串处理
fn scalar(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
        _ => Value::String(raw.to_string()),
    }
}

/// 内存文件系统的配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RamFsConfig {
    /// 首次分配缓冲区的最小容量
    pub growth_floor: usize,
    /// 文件数量上限，None 表示不限
    pub max_files: Option<usize>,
    /// 所有文件缓冲区总容量上限，None 表示不限
    pub max_bytes: Option<usize>,
}

impl Default for RamFsConfig {
    fn default() -> Self {
        Self {
            growth_floor: DEFAULT_GROWTH_FLOOR,
            max_files: None,
            max_bytes: None,
        }
    }
}

impl RamFsConfig {
    pub fn parse(config: &str) -> Result<Self> {
        let parsed: Self = BackendConfig::parse(config, &[])?.into_typed()?;
        if parsed.growth_floor == 0 {
            return Err(FsError::Invalid("growth_floor must be positive".to_string()));
        }
        Ok(parsed)
    }
}

/// 宿主目录后端的配置
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostFsConfig {
    pub root: Option<PathBuf>,
}

impl HostFsConfig {
    const STRING_KEYS: &'static [&'static str] = &["root"];

    pub fn parse(config: &str) -> Result<Self> {
        BackendConfig::parse(config, Self::STRING_KEYS)?.into_typed()
    }
}
