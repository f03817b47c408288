use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

const LINE_FEED: u8 = b'\n';

/// 一次读取得到的帧。
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Frame {
    /// 以 `\n` 结尾的完整行，已去除结尾的 `\r`/`\n`。
    Line(String),
    /// 读到流末尾；若残留内容非空白则一并交付。
    Eof(Option<String>),
}

/// 带缓冲的行读取器。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 协议层期望一次拿到一整行；底层流可能把一行拆成多次到达，也可能一次带来多行；
/// - 对端在发送最后一条消息（例如 `QUIT`）后直接断开而不带行结束符时，这条消息仍应被交付一次。
///
/// ## 逻辑（How）
/// - `read_until(b'\n')` 读取到行结束符或 EOF；
/// - 字节按 UTF-8 解码，非法序列以 U+FFFD 替换而不是让整次读取失败；
/// - 结尾的任意 `\r`/`\n` 字符被剥离，因此 CRLF 与裸 LF 都可接受。
///
/// ## 契约（What）
/// - 返回 [`Frame::Line`] 时流尚未结束；
/// - 返回 [`Frame::Eof`] 后，调用方应视流为终结，不应再次读取；
/// - 读错误原样返回，此时已读入的部分数据被丢弃；
/// - 可安全取消：`read_frame` 被丢弃时已搬入 `scratch` 的半行保留，下一次调用接着拼接。
#[derive(Debug)]
pub(crate) struct LineReader<R> {
    inner: BufReader<R>,
    scratch: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            scratch: Vec::new(),
        }
    }

    pub(crate) async fn read_frame(&mut self) -> io::Result<Frame> {
        // `scratch` 只在交付一帧或读错误后清空。
        if let Err(err) = self.inner.read_until(LINE_FEED, &mut self.scratch).await {
            self.scratch.clear();
            return Err(err);
        }
        let frame = decode_frame(&self.scratch);
        self.scratch.clear();
        Ok(frame)
    }
}

fn decode_frame(raw: &[u8]) -> Frame {
    let text = String::from_utf8_lossy(raw);
    let line = trim_line_ending(&text);
    if raw.last() == Some(&LINE_FEED) {
        return Frame::Line(line.to_owned());
    }
    if text.trim().is_empty() {
        Frame::Eof(None)
    } else {
        Frame::Eof(Some(line.to_owned()))
    }
}

fn trim_line_ending(text: &str) -> &str {
    text.trim_end_matches(['\r', '\n'])
}
