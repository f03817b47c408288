use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// 默认的 SendQ 上限（96 KiB）。
pub const DEFAULT_MAX_SENDQ_BYTES: u64 = 96 * 1024;
/// `cert_fp` 完成 TLS 握手的截止时长。
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
/// `write` 发出唤醒信号时允许等待的最长时间。
pub const DEFAULT_WRITE_WAKE_TIMEOUT: Duration = Duration::from_secs(15);
/// `close` 强制唤醒写循环时允许等待的最长时间。
pub const DEFAULT_CLOSE_WAKE_TIMEOUT: Duration = Duration::from_millis(200);

/// 单条连接的套接字配置。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把“排队未发送字节上限”和几个有界等待时长集中到一处，避免调用方在构造套接字时散落魔法数；
/// - 保持与传输层 `*SocketConfig` 一致的 Builder 风格：`new` + `with_*` + 只读 getter。
///
/// ## 契约（What）
/// - `max_sendq_bytes`：写循环排空时允许的累计排队字节数，超过即视为致命；
/// - `handshake_timeout`：`cert_fp` 完成握手的截止时长；
/// - `write_wake_timeout` / `close_wake_timeout`：后台唤醒尝试的超时上界，调用方本身从不等待。
///
/// ## 风险与权衡（Trade-offs）
/// - `max_sendq_bytes = 0` 合法，此时任何非空写入都会在下一次排空时触发 SendQ 超限。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocketConfig {
    max_sendq_bytes: u64,
    handshake_timeout: Duration,
    write_wake_timeout: Duration,
    close_wake_timeout: Duration,
}

impl SocketConfig {
    /// 创建默认配置。
    pub const fn new() -> Self {
        Self {
            max_sendq_bytes: DEFAULT_MAX_SENDQ_BYTES,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            write_wake_timeout: DEFAULT_WRITE_WAKE_TIMEOUT,
            close_wake_timeout: DEFAULT_CLOSE_WAKE_TIMEOUT,
        }
    }

    pub fn with_max_sendq_bytes(mut self, max_sendq_bytes: u64) -> Self {
        self.max_sendq_bytes = max_sendq_bytes;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_write_wake_timeout(mut self, timeout: Duration) -> Self {
        self.write_wake_timeout = timeout;
        self
    }

    pub fn with_close_wake_timeout(mut self, timeout: Duration) -> Self {
        self.close_wake_timeout = timeout;
        self
    }

    pub fn max_sendq_bytes(&self) -> u64 {
        self.max_sendq_bytes
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    pub fn write_wake_timeout(&self) -> Duration {
        self.write_wake_timeout
    }

    pub fn close_wake_timeout(&self) -> Duration {
        self.close_wake_timeout
    }

    /// 从扁平 TOML 表解析配置，缺省字段沿用默认值。
    ///
    /// # 契约（What）
    /// - `max_sendq`：整数字节数，或带单位的字符串（`"16k"`、`"1m"`、`"512b"`，基数 1024）；
    /// - `handshake_timeout_ms` / `write_wake_timeout_ms` / `close_wake_timeout_ms`：毫秒整数；
    /// - 未知字段直接拒绝，避免拼写错误被静默忽略。
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: SocketConfigFile = toml::from_str(raw)?;
        let mut config = Self::new();
        if let Some(max_sendq) = file.max_sendq {
            config.max_sendq_bytes = max_sendq.into_bytes()?;
        }
        if let Some(ms) = file.handshake_timeout_ms {
            config.handshake_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = file.write_wake_timeout_ms {
            config.write_wake_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = file.close_wake_timeout_ms {
            config.close_wake_timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// 配置解析失败的原因。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid socket config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid byte size `{0}`")]
    ByteSize(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SocketConfigFile {
    max_sendq: Option<ByteSize>,
    handshake_timeout_ms: Option<u64>,
    write_wake_timeout_ms: Option<u64>,
    close_wake_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ByteSize {
    Bytes(u64),
    Text(String),
}

impl ByteSize {
    fn into_bytes(self) -> Result<u64, ConfigError> {
        match self {
            ByteSize::Bytes(bytes) => Ok(bytes),
            ByteSize::Text(text) => parse_byte_size(&text),
        }
    }
}

/// 解析 `"16k"` 一类的人类可读字节数。
pub(crate) fn parse_byte_size(raw: &str) -> Result<u64, ConfigError> {
    let invalid = || ConfigError::ByteSize(raw.to_owned());
    let normalized = raw.trim().to_ascii_lowercase();
    let split = normalized
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(normalized.len());
    let (digits, unit) = normalized.split_at(split);
    if digits.is_empty() {
        return Err(invalid());
    }
    let value: u64 = digits.parse().map_err(|_| invalid())?;
    let shift = match unit.trim() {
        "" | "b" => 0,
        "k" | "kb" | "kib" => 10,
        "m" | "mb" | "mib" => 20,
        "g" | "gb" | "gib" => 30,
        _ => return Err(invalid()),
    };
    value.checked_mul(1u64 << shift).ok_or_else(invalid)
}
