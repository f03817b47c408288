use std::{
    fmt,
    future::{Future, poll_fn},
    io,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll, ready},
    time::Duration,
};

use parking_lot::Mutex;
use rustls::pki_types::CertificateDer;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
    sync::Mutex as AsyncMutex,
};
use tokio_rustls::{Accept, server::TlsStream};
use tracing::debug;

/// 可被套接字层承载的底层字节流。
///
/// 生产环境通常是 `TcpStream`，测试中可以是 `tokio::io::DuplexStream`。
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// 已被监听器接受的连接，明文或 TLS。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 监听器在交付连接前已完成 TLS 配置；握手可以已经完成，也可以推迟到第一次 IO 或 `cert_fp`；
/// - 统一明文与 TLS 两种形态，使套接字层只面对一套读写接口。
///
/// ## 契约（What）
/// - [`Connection::plain`]：明文流；
/// - [`Connection::tls`]：握手已完成的 `TlsStream`；
/// - [`Connection::tls_pending`]：尚未完成握手的 `Accept` future，由套接字层按需驱动；
/// - 握手完成时缓存对端叶子证书，释放连接后仍可计算指纹。
///
/// ## 风险与权衡（Trade-offs）
/// - 握手失败的结果是粘滞的：之后所有读写都返回同一错误的副本。
pub struct Connection<S = TcpStream> {
    state: State<S>,
    tls: bool,
    handshaken: bool,
    peer_leaf: Option<CertificateDer<'static>>,
}

enum State<S> {
    Plain(S),
    Handshaking(Accept<S>),
    Tls(Box<TlsStream<S>>),
    Failed(HandshakeFailure),
    Released,
}

#[derive(Clone, Debug)]
struct HandshakeFailure {
    kind: io::ErrorKind,
    message: String,
}

impl HandshakeFailure {
    fn from_error(err: &io::Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    fn to_io_error(&self) -> io::Error {
        io::Error::new(self.kind, self.message.clone())
    }
}

impl<S: Transport> Connection<S> {
    pub fn plain(stream: S) -> Self {
        Self {
            state: State::Plain(stream),
            tls: false,
            handshaken: true,
            peer_leaf: None,
        }
    }

    pub fn tls(stream: TlsStream<S>) -> Self {
        let peer_leaf = leaf_certificate(&stream);
        Self {
            state: State::Tls(Box::new(stream)),
            tls: true,
            handshaken: true,
            peer_leaf,
        }
    }

    pub fn tls_pending(accept: Accept<S>) -> Self {
        Self {
            state: State::Handshaking(accept),
            tls: true,
            handshaken: false,
            peer_leaf: None,
        }
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    fn poll_handshake(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let accept = match &mut self.state {
            State::Handshaking(accept) => accept,
            other => return Poll::Ready(settled(other, self.handshaken)),
        };
        match ready!(Pin::new(accept).poll(cx)) {
            Ok(stream) => {
                self.peer_leaf = leaf_certificate(&stream);
                self.handshaken = true;
                self.state = State::Tls(Box::new(stream));
                Poll::Ready(Ok(()))
            }
            Err(err) => {
                self.state = State::Failed(HandshakeFailure::from_error(&err));
                Poll::Ready(Err(err))
            }
        }
    }

    fn poll_read(&mut self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match &mut self.state {
            State::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            State::Tls(stream) => Pin::new(&mut **stream).poll_read(cx, buf),
            State::Handshaking(_) => Poll::Ready(Err(handshake_pending())),
            State::Failed(failure) => Poll::Ready(Err(failure.to_io_error())),
            // 已释放的连接表现为 EOF。
            State::Released => Poll::Ready(Ok(())),
        }
    }

    fn poll_write(&mut self, cx: &mut Context<'_>, data: &[u8]) -> Poll<io::Result<usize>> {
        match &mut self.state {
            State::Plain(stream) => Pin::new(stream).poll_write(cx, data),
            State::Tls(stream) => Pin::new(&mut **stream).poll_write(cx, data),
            State::Handshaking(_) => Poll::Ready(Err(handshake_pending())),
            State::Failed(failure) => Poll::Ready(Err(failure.to_io_error())),
            State::Released => Poll::Ready(Err(released())),
        }
    }

    fn poll_flush(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.state {
            State::Plain(stream) => Pin::new(stream).poll_flush(cx),
            State::Tls(stream) => Pin::new(&mut **stream).poll_flush(cx),
            _ => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.state {
            State::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            State::Tls(stream) => Pin::new(&mut **stream).poll_shutdown(cx),
            _ => Poll::Ready(Ok(())),
        }
    }

    fn release(&mut self) {
        self.state = State::Released;
    }
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::Plain(_) => "plain",
            State::Handshaking(_) => "handshaking",
            State::Tls(_) => "tls",
            State::Failed(_) => "handshake_failed",
            State::Released => "released",
        };
        f.debug_struct("Connection")
            .field("state", &state)
            .field("tls", &self.tls)
            .field("has_peer_certificate", &self.peer_leaf.is_some())
            .finish()
    }
}

fn settled<S>(state: &State<S>, handshaken: bool) -> io::Result<()> {
    match state {
        State::Failed(failure) => Err(failure.to_io_error()),
        State::Released if !handshaken => Err(released()),
        _ => Ok(()),
    }
}

fn leaf_certificate<S>(stream: &TlsStream<S>) -> Option<CertificateDer<'static>> {
    let (_, session) = stream.get_ref();
    session
        .peer_certificates()
        .and_then(|chain| chain.first())
        .cloned()
}

fn handshake_pending() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "tls handshake not complete")
}

fn released() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection released")
}

/// 读端、写循环与 `cert_fp` 共享的连接句柄。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 读者与写循环需要并发使用同一条连接，而 `cert_fp` 还要观察 TLS 会话状态，
///   因此不能像 `tokio::io::split` 那样把连接拆成互不可见的两半；
///
/// ## 逻辑（How）
/// - 连接放在 `parking_lot::Mutex` 中，每次 `poll_*` 只在单次轮询期间持锁，与 `split` 的做法一致；
/// - 握手由 `gate` 串行化：同一时刻只有一个任务驱动 `Accept`，避免两个任务争抢同一个 IO 唤醒器；
/// - `release` 以原子标志保证关闭动作至多执行一次。
///
/// ## 契约（What）
/// - 克隆只增加引用计数，所有克隆指向同一条连接；
/// - 读写前必须先 `complete_handshake`，否则 `Handshaking` 状态下的读写直接报错。
pub(crate) struct SharedConnection<S> {
    shared: Arc<Shared<S>>,
}

struct Shared<S> {
    connection: Mutex<Connection<S>>,
    gate: AsyncMutex<()>,
    releasing: AtomicBool,
}

impl<S> Clone for SharedConnection<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: Transport> SharedConnection<S> {
    pub(crate) fn new(connection: Connection<S>) -> Self {
        Self {
            shared: Arc::new(Shared {
                connection: Mutex::new(connection),
                gate: AsyncMutex::new(()),
                releasing: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn is_tls(&self) -> bool {
        self.shared.connection.lock().is_tls()
    }

    pub(crate) fn peer_leaf_certificate(&self) -> Option<CertificateDer<'static>> {
        self.shared.connection.lock().peer_leaf.clone()
    }

    /// 确保 TLS 握手已经结束（成功或失败）；明文连接立即返回。
    pub(crate) async fn complete_handshake(&self) -> io::Result<()> {
        {
            let connection = self.shared.connection.lock();
            if !matches!(connection.state, State::Handshaking(_)) {
                return settled(&connection.state, connection.handshaken);
            }
        }
        let _gate = self.shared.gate.lock().await;
        poll_fn(|cx| self.shared.connection.lock().poll_handshake(cx)).await
    }

    /// 关闭并释放底层连接，至多执行一次；首次调用返回 `true`。
    ///
    /// `shutdown`（TLS 下即 `close_notify`）最多等待 `grace`，随后无条件丢弃底层流。
    pub(crate) async fn release(&self, grace: Duration) -> bool {
        if self.shared.releasing.swap(true, Ordering::AcqRel) {
            return false;
        }
        let shutdown = poll_fn(|cx| self.shared.connection.lock().poll_shutdown(cx));
        match tokio::time::timeout(grace, shutdown).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(error = %err, "shutdown before release failed"),
            Err(_) => debug!(?grace, "shutdown before release timed out"),
        }
        self.shared.connection.lock().release();
        true
    }
}

impl<S: Transport> AsyncRead for SharedConnection<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.shared.connection.lock().poll_read(cx, buf)
    }
}

impl<S: Transport> AsyncWrite for SharedConnection<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.shared.connection.lock().poll_write(cx, data)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shared.connection.lock().poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shared.connection.lock().poll_shutdown(cx)
    }
}
