//! 导航取消令牌
//!
//! 调用方持有令牌并可在任意时刻取消一次正在执行的导航；
//! 守卫与中间件通过上下文拿到同一个令牌，可以主动观察取消状态。

use std::sync::Arc;

use tokio::sync::watch;

/// 可克隆的取消令牌
///
/// 所有克隆共享同一个取消状态。
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    /// 创建未取消的令牌
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { inner: Arc::new(tx) }
    }

    /// 触发取消，重复调用无副作用
    pub fn cancel(&self) {
        self.inner.send_replace(true);
    }

    /// 是否已被取消
    pub fn is_cancelled(&self) -> bool {
        *self.inner.borrow()
    }

    /// 等待直到令牌被取消
    ///
    /// 已取消时立即返回。
    pub async fn cancelled(&self) {
        let mut rx = self.inner.subscribe();
        // 发送端由 self 持有，wait_for 不会因通道关闭而返回错误
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = token.clone();

        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .expect("should not block");
    }
}
