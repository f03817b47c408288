#![doc = r#"
# spark-line-socket

## 设计动机（Why）
- **定位**：行协议（CRLF 结尾的文本协议，例如聊天服务器协议）服务端的逐连接传输层，
  把明文或 TLS 字节流转换为可靠的行序列；
- **出站治理**：多个生产者并发写入，单一写循环负责发送，以 SendQ 字节上限实施背压，
  超限即断开并向对端发送协议级错误行；
- **认证辅助**：提供 TLS 客户端证书的 SHA-256 指纹（CertFP）。

## 核心契约（What）
- [`Socket`]：`read` / `write` / `write_line` / `close` / `cert_fp`，以及只读观察接口；
- [`Socket::run_writer`]：每个套接字由调用方显式启动一次的写循环，独占连接的写入与最终释放；
- [`Connection`]：监听器交付的明文或 TLS 连接，TLS 握手可以推迟到首次 IO；
- [`SocketConfig`]：SendQ 上限与各类有界等待时长；
- [`SocketError`]：携带稳定错误码的错误分类。

## 实现策略（How）
- Tokio 运行时 + `rustls`/`tokio-rustls`；
- 关闭标志与出站队列共用一把锁，关闭后不再接受追加；
- 唤醒信号是容量为 1 的通道，生产者只做非阻塞或后台有界投递，从不等待写循环；
- 连接只由写循环关闭一次，关闭同时唤醒阻塞中的读者。

## 风险与考量（Trade-offs）
- SendQ 超限时整批丢弃，不会先冲刷上限以内的前缀；
- `close` 之后尚未写出的数据被丢弃；
- 监听、TLS 配置、协议解析与会话状态不在本 crate 范围内。
"#]
#![cfg_attr(
    not(feature = "runtime-tokio"),
    doc = r#"## 功能开关：`runtime-tokio`

默认启用 Tokio + rustls 实现；禁用默认特性时仅保留 [`SocketConfig`] 与 [`SocketError`]。
"#
)]

mod config;
mod error;

pub use config::{
    ConfigError, DEFAULT_CLOSE_WAKE_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_SENDQ_BYTES,
    DEFAULT_WRITE_WAKE_TIMEOUT, SocketConfig,
};
pub use error::{Result, SocketError};

#[cfg(feature = "runtime-tokio")]
mod certfp;
#[cfg(feature = "runtime-tokio")]
mod queue;
#[cfg(feature = "runtime-tokio")]
mod reader;
#[cfg(feature = "runtime-tokio")]
mod socket;
#[cfg(feature = "runtime-tokio")]
mod stream;
#[cfg(feature = "runtime-tokio")]
mod wake;
#[cfg(feature = "runtime-tokio")]
mod writer;

#[cfg(feature = "runtime-tokio")]
pub use certfp::fingerprint;
#[cfg(feature = "runtime-tokio")]
pub use queue::SENDQ_EXCEEDED_NOTICE;
#[cfg(feature = "runtime-tokio")]
pub use socket::Socket;
#[cfg(feature = "runtime-tokio")]
pub use stream::{Connection, Transport};
