/// SendQ 超限时作为最后一帧写给对端的协议级错误行。
pub const SENDQ_EXCEEDED_NOTICE: &str = "\r\nERROR :SendQ Exceeded\r\n";

/// 出站队列与关闭标志。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 关闭标志、待发送行与“临终数据”必须在同一把锁下观察，才能保证“关闭之后绝不再追加”；
/// - 把 SendQ 记账与排空决策收拢为纯数据结构，写循环只负责 IO。
///
/// ## 逻辑 (How)
/// - `push` 仅在未关闭时追加；
/// - `drain` 依序累加每一行的字节数，任意前缀超过上限即放弃整批并记录超限通知，
///   否则把整批拼接为单个负载并清空队列。
///
/// ## 契约 (What)
/// - **前置条件**：调用方持有外层互斥锁；
/// - **后置条件**：`closed` 只会从 `false` 变为 `true`；`final_data` 一旦写入不再改变。
///
/// ## 注意事项 (Trade-offs)
/// - 超限时不会先冲刷未超限的前缀，整批数据都不再发送，对端只会收到超限通知。
#[derive(Debug, Default)]
pub(crate) struct SendQueue {
    closed: bool,
    lines: Vec<String>,
    final_data: Option<String>,
}

/// 一次排空尝试的结果。
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Drain {
    /// 套接字已关闭，写循环应进入拆除阶段。
    Closed,
    /// 重复或迟到的唤醒，队列为空。
    Empty,
    /// 累计字节数超过上限；`queued_bytes` 为触发超限时的前缀和。
    Exceeded { queued_bytes: u64 },
    /// 可以一次写出的完整负载。
    Batch(String),
}

impl SendQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// 追加一段数据；已关闭时拒绝并返回 `false`。
    pub(crate) fn push(&mut self, data: String) -> bool {
        if self.closed {
            return false;
        }
        self.lines.push(data);
        true
    }

    /// 标记关闭；仅首次调用返回 `true`。
    pub(crate) fn close(&mut self) -> bool {
        !std::mem::replace(&mut self.closed, true)
    }

    pub(crate) fn queued_bytes(&self) -> u64 {
        self.lines.iter().map(|line| line.len() as u64).sum()
    }

    pub(crate) fn final_data(&self) -> Option<&str> {
        self.final_data.as_deref()
    }

    pub(crate) fn drain(&mut self, max_sendq_bytes: u64) -> Drain {
        if self.closed {
            return Drain::Closed;
        }
        if self.lines.is_empty() {
            return Drain::Empty;
        }

        let mut queued_bytes = 0u64;
        for line in &self.lines {
            queued_bytes = queued_bytes.saturating_add(line.len() as u64);
            if queued_bytes > max_sendq_bytes {
                self.final_data = Some(SENDQ_EXCEEDED_NOTICE.to_owned());
                return Drain::Exceeded { queued_bytes };
            }
        }

        let payload = self.lines.concat();
        self.lines.clear();
        Drain::Batch(payload)
    }

    /// 拆除阶段丢弃尚未发送的数据，返回丢弃的字节数。
    pub(crate) fn discard(&mut self) -> u64 {
        let dropped = self.queued_bytes();
        self.lines.clear();
        dropped
    }
}
