use std::io;

use thiserror::Error;

/// 套接字层对外暴露的错误分类。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - `read`/`write`/`cert_fp` 直接把错误交还调用方，由协议层决定是否终止会话；
/// - 写循环内部的失败（写错误、SendQ 超限）从不经由该类型返回，只体现为套接字进入关闭态。
///
/// ## 契约（What）
/// - `Closed`：套接字已进入关闭态后继续 `write`；
/// - `EndOfStream`：关闭后继续 `read`，或读到流末尾且没有可交付的残留行；
/// - `NotTls` / `NoPeerCertificate`：`cert_fp` 在明文连接上调用，或对端未出示证书；
/// - `Handshake`：TLS 握手失败或超时，原样携带底层 `io::Error`；
/// - `Io`：非 EOF 的读错误，原样传播且不会强制关闭套接字；
/// - `WriterAlreadyRunning`：写循环被重复启动。
///
/// ## 风险与权衡（Trade-offs）
/// - `code()` 返回稳定错误码，运维脚本应依赖错误码而非 `Display` 文案。
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("socket closed")]
    Closed,
    #[error("end of stream")]
    EndOfStream,
    #[error("not a tls connection")]
    NotTls,
    #[error("client did not provide a certificate")]
    NoPeerCertificate,
    #[error("tls handshake failed: {source}")]
    Handshake {
        /// 底层握手错误；超时以 `ErrorKind::TimedOut` 表示。
        source: io::Error,
    },
    #[error("socket read failed: {source}")]
    Io { source: io::Error },
    #[error("socket writer already running")]
    WriterAlreadyRunning,
}

pub(crate) const CLOSED: &str = "spark.socket.closed";
pub(crate) const END_OF_STREAM: &str = "spark.socket.end_of_stream";
pub(crate) const NOT_TLS: &str = "spark.socket.not_tls";
pub(crate) const NO_PEER_CERTIFICATE: &str = "spark.socket.no_peer_certificate";
pub(crate) const HANDSHAKE_FAILED: &str = "spark.socket.handshake_failed";
pub(crate) const READ_FAILED: &str = "spark.socket.read_failed";
pub(crate) const WRITER_ALREADY_RUNNING: &str = "spark.socket.writer_already_running";

impl SocketError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            SocketError::Closed => CLOSED,
            SocketError::EndOfStream => END_OF_STREAM,
            SocketError::NotTls => NOT_TLS,
            SocketError::NoPeerCertificate => NO_PEER_CERTIFICATE,
            SocketError::Handshake { .. } => HANDSHAKE_FAILED,
            SocketError::Io { .. } => READ_FAILED,
            SocketError::WriterAlreadyRunning => WRITER_ALREADY_RUNNING,
        }
    }

    /// 该错误是否意味着套接字已经终结。
    pub fn is_terminal(&self) -> bool {
        matches!(self, SocketError::Closed | SocketError::EndOfStream)
    }
}

// 仅实现层构造这些错误；关闭 `runtime-tokio` 时它们没有调用方。
#[cfg_attr(not(feature = "runtime-tokio"), allow(dead_code))]
impl SocketError {
    pub(crate) fn handshake(source: io::Error) -> Self {
        SocketError::Handshake { source }
    }

    pub(crate) fn handshake_timed_out() -> Self {
        SocketError::Handshake {
            source: io::Error::new(io::ErrorKind::TimedOut, "tls handshake timed out"),
        }
    }

    pub(crate) fn read(source: io::Error) -> Self {
        SocketError::Io { source }
    }
}

/// 套接字层统一的结果别名。
pub type Result<T, E = SocketError> = std::result::Result<T, E>;
