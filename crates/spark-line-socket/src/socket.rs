use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use tokio::{
    net::TcpStream,
    sync::{Mutex as AsyncMutex, watch},
    task::JoinHandle,
};

use crate::{
    config::SocketConfig,
    error::{Result, SocketError},
    queue::SendQueue,
    reader::{Frame, LineReader},
    stream::{Connection, SharedConnection, Transport},
    wake::WakeSignal,
};

const CRLF: &str = "\r\n";

/// 行协议连接的套接字封装。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把原始字节流（明文或 TLS）变成可靠的 CRLF 行序列，并以异步写循环承担出站发送；
/// - 多个生产者可以并发写入，唯一的写循环负责真正的 IO 与连接的最终释放，
///   任何失败路径都只会让连接被关闭一次。
///
/// ## 逻辑（How）
/// - `queue`：关闭标志、待发送行与临终数据，受同一把 `parking_lot::Mutex` 保护；
/// - `wake`：通知写循环的尽力唤醒信号，生产者从不等待它；
/// - `reader`：指定读者使用的行读取器，`tokio::sync::Mutex` 保证即便误用也不会交错读取；
/// - `released`：写循环释放连接后置位，用于唤醒阻塞在流上的读者。
///
/// ## 契约（What）
/// - `new`/`with_config` 不会启动写循环，调用方必须显式调用一次 [`Socket::run_writer`]
///   或 [`Socket::spawn_writer`]；
/// - `write`/`write_line`/`close` 是同步方法，只短暂持锁，可在任意任务中并发调用；
/// - `read` 只应由一个读者调用；`cert_fp` 可重复调用。
///
/// ## 风险与权衡（Trade-offs）
/// - `close` 之后尚未写出的数据会被丢弃，而不是尽力冲刷；需要“先发后关”的调用方应在写出后再关闭；
/// - 连接本身只由写循环关闭：若写循环从未启动，`close` 只会让后续读写失败，连接会随套接字一起被丢弃。
pub struct Socket<S = TcpStream> {
    pub(crate) config: SocketConfig,
    pub(crate) queue: Mutex<SendQueue>,
    pub(crate) wake: WakeSignal,
    pub(crate) connection: SharedConnection<S>,
    reader: AsyncMutex<LineReader<SharedConnection<S>>>,
    pub(crate) released: watch::Sender<bool>,
}

impl<S: Transport> Socket<S> {
    /// 以指定的 SendQ 上限包装连接，其余配置取默认值。
    pub fn new(connection: Connection<S>, max_sendq_bytes: u64) -> Self {
        Self::with_config(
            connection,
            SocketConfig::new().with_max_sendq_bytes(max_sendq_bytes),
        )
    }

    pub fn with_config(connection: Connection<S>, config: SocketConfig) -> Self {
        let connection = SharedConnection::new(connection);
        let reader = LineReader::new(connection.clone());
        let (released, _) = watch::channel(false);
        Self {
            config,
            queue: Mutex::new(SendQueue::new()),
            wake: WakeSignal::new(),
            connection,
            reader: AsyncMutex::new(reader),
            released,
        }
    }

    /// 停止收发；幂等。
    ///
    /// 仅标记关闭并在后台尝试唤醒写循环，由写循环观察关闭标志后完成拆除。
    pub fn close(&self) {
        if !self.queue.lock().close() {
            return;
        }
        self.wake.notify_within(self.config.close_wake_timeout());
    }

    /// 原样追加 `data` 到出站队列。
    pub fn write(&self, data: impl Into<String>) -> Result<()> {
        if !self.queue.lock().push(data.into()) {
            return Err(SocketError::Closed);
        }
        self.wake.notify_within(self.config.write_wake_timeout());
        Ok(())
    }

    /// 追加一行，自动补上 CRLF。
    pub fn write_line(&self, line: &str) -> Result<()> {
        let mut data = String::with_capacity(line.len() + CRLF.len());
        data.push_str(line);
        data.push_str(CRLF);
        self.write(data)
    }

    /// 读取一行协议消息，已去除结尾的 CR/LF。
    ///
    /// # 契约（What）
    /// - 套接字已关闭时立即返回 [`SocketError::EndOfStream`]；
    /// - 读到 EOF 时套接字被标记为关闭；若残留内容非空白，仍作为一行返回一次；
    /// - 其他读错误原样返回，不强制关闭；
    /// - 写循环释放连接会唤醒阻塞中的读取，返回 [`SocketError::EndOfStream`]；
    /// - 可安全取消（例如在 `tokio::select!` 中与空闲计时器竞争）：被丢弃的调用已读入的半行
    ///   会留给下一次 `read` 继续拼接，不会丢失。
    pub async fn read(&self) -> Result<String> {
        if self.is_closed() {
            return Err(SocketError::EndOfStream);
        }

        let mut reader = self.reader.lock().await;
        let mut released = self.released.subscribe();
        let frame = tokio::select! {
            frame = async {
                self.connection
                    .complete_handshake()
                    .await
                    .map_err(SocketError::handshake)?;
                let frame = reader.read_frame().await.map_err(SocketError::read)?;
                Ok::<_, SocketError>(frame)
            } => frame?,
            _ = released.wait_for(|released| *released) => return Err(SocketError::EndOfStream),
        };

        match frame {
            Frame::Line(line) => Ok(line),
            Frame::Eof(residual) => {
                self.close();
                residual.ok_or(SocketError::EndOfStream)
            }
        }
    }

    /// 在当前 Tokio 运行时上派生写循环。
    pub fn spawn_writer(self: &Arc<Self>) -> JoinHandle<Result<()>> {
        let socket = Arc::clone(self);
        tokio::spawn(async move { socket.run_writer().await })
    }

    pub fn is_closed(&self) -> bool {
        self.queue.lock().is_closed()
    }

    pub fn is_tls(&self) -> bool {
        self.connection.is_tls()
    }

    pub fn max_sendq_bytes(&self) -> u64 {
        self.config.max_sendq_bytes()
    }

    /// 拆除前写给对端的最后一段数据（仅在 SendQ 超限时设置）。
    pub fn final_data(&self) -> Option<String> {
        self.queue.lock().final_data().map(str::to_owned)
    }

    /// 当前排队但尚未写出的字节数。
    pub fn queued_bytes(&self) -> u64 {
        self.queue.lock().queued_bytes()
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }
}

impl<S> fmt::Debug for Socket<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("config", &self.config)
            .field("queue", &*self.queue.lock())
            .finish_non_exhaustive()
    }
}
