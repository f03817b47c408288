use std::{io, time::Duration};

use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};

use crate::{
    error::{Result, SocketError},
    queue::Drain,
    socket::Socket,
    stream::{SharedConnection, Transport},
    wake::WakeReceiver,
};

/// 拆除阶段单个步骤（临终数据写出、`shutdown`）允许占用的最长时间。
const TEARDOWN_GRACE: Duration = Duration::from_secs(1);

/// 写循环结束的原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Teardown {
    Closed,
    SendQExceeded,
    WriteFailed,
}

impl Teardown {
    fn as_str(self) -> &'static str {
        match self {
            Teardown::Closed => "closed",
            Teardown::SendQExceeded => "sendq_exceeded",
            Teardown::WriteFailed => "write_failed",
        }
    }
}

impl<S: Transport> Socket<S> {
    /// 运行写循环，直到套接字关闭、SendQ 超限或写失败。
    ///
    /// # 教案级注释
    ///
    /// ## 意图（Why）
    /// - 连接只被写循环写入、也只被写循环关闭，从而把“关闭恰好一次”的责任集中到一处；
    /// - 写循环内部的错误不回传给任何调用方，只体现为套接字进入关闭态。
    ///
    /// ## 逻辑（How）
    /// 1. 等待唤醒信号；
    /// 2. 持锁排空队列：已关闭则拆除；队列为空视为重复唤醒；累计字节超限则记录超限通知并拆除；
    /// 3. 否则释放锁后把整批负载一次写出，写失败则拆除；
    /// 4. 写完后若已被关闭则拆除，否则回到第 1 步。
    ///
    /// 拆除：标记关闭，丢弃未发送数据，尽力写出临终数据，释放连接，唤醒阻塞中的读者，
    /// 最后关闭并清空唤醒通道。
    ///
    /// ## 契约（What）
    /// - 每个套接字只能运行一次；重复调用返回 [`SocketError::WriterAlreadyRunning`]；
    /// - 正常结束返回 `Ok(())`，无论结束原因是什么。
    pub async fn run_writer(&self) -> Result<()> {
        let Some(mut wake) = self.wake.take_receiver() else {
            return Err(SocketError::WriterAlreadyRunning);
        };
        debug!(
            max_sendq_bytes = self.config.max_sendq_bytes(),
            tls = self.is_tls(),
            "socket writer started"
        );

        let reason = self.drive_writer(&mut wake).await;
        self.teardown(reason, wake).await;
        Ok(())
    }

    async fn drive_writer(&self, wake: &mut WakeReceiver) -> Teardown {
        let mut writer = self.connection.clone();
        loop {
            if !wake.wait().await {
                return Teardown::Closed;
            }

            let drained = self.queue.lock().drain(self.config.max_sendq_bytes());
            match drained {
                Drain::Closed => return Teardown::Closed,
                Drain::Empty => continue,
                Drain::Exceeded { queued_bytes } => {
                    warn!(
                        queued_bytes,
                        max_sendq_bytes = self.config.max_sendq_bytes(),
                        "sendq exceeded"
                    );
                    return Teardown::SendQExceeded;
                }
                Drain::Batch(payload) => {
                    if let Err(err) = write_payload(&mut writer, &payload).await {
                        warn!(error = %err, bytes = payload.len(), "socket write failed");
                        return Teardown::WriteFailed;
                    }
                }
            }

            if self.is_closed() {
                return Teardown::Closed;
            }
        }
    }

    async fn teardown(&self, reason: Teardown, mut wake: WakeReceiver) {
        let (final_data, discarded_bytes) = {
            let mut queue = self.queue.lock();
            queue.close();
            (queue.final_data().map(str::to_owned), queue.discard())
        };
        debug!(reason = reason.as_str(), discarded_bytes, "socket writer tearing down");

        if let Some(data) = final_data {
            let mut writer = self.connection.clone();
            let attempt = write_payload(&mut writer, &data);
            match tokio::time::timeout(TEARDOWN_GRACE, attempt).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => trace!(error = %err, "final data not delivered"),
                Err(_) => trace!("final data write timed out"),
            }
        }

        if self.connection.release(TEARDOWN_GRACE).await {
            debug!(reason = reason.as_str(), "connection released");
        }
        self.released.send_replace(true);

        let dropped = wake.drain();
        trace!(dropped, "pending wake signals discarded");
    }
}

async fn write_payload<S: Transport>(
    writer: &mut SharedConnection<S>,
    payload: &str,
) -> io::Result<()> {
    writer.complete_handshake().await?;
    writer.write_all(payload.as_bytes()).await?;
    writer.flush().await
}
