use sha2::{Digest, Sha256};

use crate::{
    error::{Result, SocketError},
    socket::Socket,
    stream::Transport,
};

/// 计算证书 DER 编码的 SHA-256 指纹，输出 64 位小写十六进制。
pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

impl<S: Transport> Socket<S> {
    /// 返回客户端证书指纹，用作认证凭据。
    ///
    /// # 教案级注释
    ///
    /// ## 逻辑（How）
    /// 1. 明文连接直接返回 [`SocketError::NotTls`]；
    /// 2. 在 `handshake_timeout`（默认 5 秒）内完成握手；握手已完成时立即通过；
    /// 3. 对端未出示证书返回 [`SocketError::NoPeerCertificate`]；
    /// 4. 对叶子证书的原始 DER 字节求 SHA-256。
    ///
    /// ## 契约（What）
    /// - 可重复调用；首次调用可能触发握手相关的网络 IO；
    /// - 截止时间到期时返回 `ErrorKind::TimedOut` 的握手错误，握手本身保持可恢复，
    ///   之后的读写或再次调用会继续推进它。
    pub async fn cert_fp(&self) -> Result<String> {
        if !self.connection.is_tls() {
            return Err(SocketError::NotTls);
        }

        let handshake = self.connection.complete_handshake();
        match tokio::time::timeout(self.config.handshake_timeout(), handshake).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(SocketError::handshake(err)),
            Err(_) => return Err(SocketError::handshake_timed_out()),
        }

        let leaf = self
            .connection
            .peer_leaf_certificate()
            .ok_or(SocketError::NoPeerCertificate)?;
        Ok(fingerprint(&leaf))
    }
}
