use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::trace;

/// 写循环的唤醒信号。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 生产者（`write`/`close`）只需“尽力通知”写循环有新数据，绝不能因为写循环繁忙而被无限阻塞；
/// - 信号本身不是队列：重复或丢失的唤醒都由写循环重新检查队列状态来吸收。
///
/// ## 逻辑（How）
/// - 底层是容量为 1 的 `mpsc` 通道，槽位被占用即代表“已有一次待消费的唤醒”；
/// - `notify_within` 先 `try_send`，成功或通道已关闭都立即返回；
/// - 槽位已满时，在当前 Tokio 运行时上派生一个分离任务，以 `send_timeout` 做一次有界投递，
///   调用方不等待该任务；同一时刻最多只有一个这样的后台尝试。
///
/// ## 契约（What）
/// - `notify_within`：同步、非阻塞，可在任意线程调用；不在运行时内时仅做快速路径；
/// - `take_receiver`：只能成功一次，由写循环持有接收端。
///
/// ## 风险与权衡（Trade-offs）
/// - 槽位已满意味着写循环之后一定会再醒来一次并看到此前入队的数据，因此后台尝试只会产生重复唤醒。
#[derive(Debug)]
pub(crate) struct WakeSignal {
    sender: mpsc::Sender<()>,
    receiver: Mutex<Option<mpsc::Receiver<()>>>,
    retry_in_flight: Arc<AtomicBool>,
}

impl WakeSignal {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = mpsc::channel(1);
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            retry_in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 尽力唤醒写循环，最长在后台等待 `timeout`。
    pub(crate) fn notify_within(&self, timeout: Duration) {
        match self.sender.try_send(()) {
            Ok(()) | Err(TrySendError::Closed(())) => {}
            Err(TrySendError::Full(())) => self.spawn_retry(timeout),
        }
    }

    fn spawn_retry(&self, timeout: Duration) {
        let Ok(handle) = Handle::try_current() else {
            trace!("wake slot occupied outside a runtime; relying on pending wake");
            return;
        };
        if self.retry_in_flight.swap(true, Ordering::AcqRel) {
            return;
        }
        let sender = self.sender.clone();
        let in_flight = Arc::clone(&self.retry_in_flight);
        handle.spawn(async move {
            if sender.send_timeout((), timeout).await.is_err() {
                trace!(?timeout, "wake signal not delivered");
            }
            in_flight.store(false, Ordering::Release);
        });
    }

    pub(crate) fn take_receiver(&self) -> Option<WakeReceiver> {
        self.receiver
            .lock()
            .take()
            .map(|receiver| WakeReceiver { receiver })
    }
}

/// 写循环持有的唤醒接收端。
#[derive(Debug)]
pub(crate) struct WakeReceiver {
    receiver: mpsc::Receiver<()>,
}

impl WakeReceiver {
    /// 等待下一次唤醒；发送端全部消失时返回 `false`。
    pub(crate) async fn wait(&mut self) -> bool {
        self.receiver.recv().await.is_some()
    }

    /// 关闭通道并丢弃残留信号，返回丢弃的数量。
    ///
    /// 关闭后新的 `try_send` 立即得到 `Closed`，后台投递也会提前结束。
    pub(crate) fn drain(&mut self) -> usize {
        self.receiver.close();
        let mut dropped = 0;
        while self.receiver.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}
