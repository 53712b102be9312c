//! 中间件类型定义

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::router::{Location, NavigationTarget};
use crate::utils::{CancellationToken, NavError};

/// 中间件执行后的流程控制
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiddlewareFlow {
    /// 继续执行下一个中间件
    Continue,
    /// 终止链并重定向
    Redirect(NavigationTarget),
    /// 终止链，附带原因
    Abort(String),
}

impl MiddlewareFlow {
    /// 重定向到给定目标
    pub fn redirect(target: impl Into<NavigationTarget>) -> Self {
        MiddlewareFlow::Redirect(target.into())
    }

    /// 以给定原因终止
    pub fn abort(reason: impl Into<String>) -> Self {
        MiddlewareFlow::Abort(reason.into())
    }
}

impl From<()> for MiddlewareFlow {
    fn from(_: ()) -> Self {
        MiddlewareFlow::Continue
    }
}

/// 中间件上下文
#[derive(Debug, Clone)]
pub struct MiddlewareContext {
    /// 目标位置
    pub to: Arc<Location>,
    /// 当前位置
    pub from: Arc<Location>,
    /// 当前是第几次尝试，从 1 开始
    pub attempt: u32,
    /// 取消令牌
    pub cancel: CancellationToken,
}

impl MiddlewareContext {
    /// 创建上下文
    pub fn new(to: Arc<Location>, from: Arc<Location>, cancel: CancellationToken) -> Self {
        Self {
            to,
            from,
            attempt: 1,
            cancel,
        }
    }
}

/// 中间件
#[async_trait]
pub trait Middleware: Send + Sync {
    /// 中间件名称
    fn name(&self) -> &str;

    /// 处理一次导航
    async fn handle(&self, ctx: MiddlewareContext) -> anyhow::Result<MiddlewareFlow>;
}

/// 由异步闭包构造的中间件
pub struct FnMiddleware<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(MiddlewareContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<MiddlewareFlow>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, ctx: MiddlewareContext) -> anyhow::Result<MiddlewareFlow> {
        (self.f)(ctx).await
    }
}

/// 使用异步闭包创建中间件
pub fn middleware_fn<F, Fut>(name: impl Into<String>, f: F) -> FnMiddleware<F>
where
    F: Fn(MiddlewareContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<MiddlewareFlow>> + Send + 'static,
{
    FnMiddleware {
        name: name.into(),
        f,
    }
}

/// 自定义错误处理的决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// 终止整条链
    Abort,
    /// 跳过当前中间件
    Skip,
    /// 重新执行当前中间件
    Retry,
}

/// 自定义错误处理器
///
/// 任何 `Fn(&str, &NavError, u32) -> ErrorAction` 闭包都可直接使用。
pub trait MiddlewareErrorHandler: Send + Sync {
    /// 根据中间件名称、错误和已尝试次数给出处理决定
    fn on_error(&self, middleware: &str, error: &NavError, attempt: u32) -> ErrorAction;
}

impl<F> MiddlewareErrorHandler for F
where
    F: Fn(&str, &NavError, u32) -> ErrorAction + Send + Sync,
{
    fn on_error(&self, middleware: &str, error: &NavError, attempt: u32) -> ErrorAction {
        self(middleware, error, attempt)
    }
}

/// 中间件失败时的处理策略
#[derive(Clone, Default)]
pub enum ErrorStrategy {
    /// 终止链并返回错误
    #[default]
    Abort,
    /// 记录日志后继续
    Skip,
    /// 重试，超过次数后按 `Abort` 处理
    Retry {
        /// 首次失败后的最大重试次数
        max_retries: u32,
    },
    /// 交给自定义处理器
    Custom(Arc<dyn MiddlewareErrorHandler>),
}

impl ErrorStrategy {
    /// 使用给定重试次数
    pub fn retry(max_retries: u32) -> Self {
        ErrorStrategy::Retry { max_retries }
    }

    /// 使用自定义处理器
    pub fn custom(handler: impl MiddlewareErrorHandler + 'static) -> Self {
        ErrorStrategy::Custom(Arc::new(handler))
    }

    /// 策略名称
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStrategy::Abort => "abort",
            ErrorStrategy::Skip => "skip",
            ErrorStrategy::Retry { .. } => "retry",
            ErrorStrategy::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for ErrorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorStrategy::Retry { max_retries } => {
                f.debug_struct("Retry").field("max_retries", max_retries).finish()
            }
            other => f.write_str(other.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_middleware_fn() {
        let mw = middleware_fn("redirect", |ctx: MiddlewareContext| async move {
            if ctx.to.path == "/old" {
                Ok(MiddlewareFlow::redirect("/new"))
            } else {
                Ok(MiddlewareFlow::Continue)
            }
        });
        let ctx = MiddlewareContext::new(
            Arc::new(Location::new("/old")),
            Arc::new(Location::new("/")),
            CancellationToken::new(),
        );

        assert_eq!(mw.name(), "redirect");
        assert_eq!(
            mw.handle(ctx).await.unwrap(),
            MiddlewareFlow::Redirect(NavigationTarget::Path("/new".to_string()))
        );
    }

    #[test]
    fn test_closure_error_handler() {
        let strategy = ErrorStrategy::custom(|_name: &str, error: &NavError, attempt: u32| {
            if error.is_timeout() && attempt < 2 {
                ErrorAction::Retry
            } else {
                ErrorAction::Skip
            }
        });
        let ErrorStrategy::Custom(handler) = &strategy else {
            panic!("expected custom strategy");
        };

        let timeout = NavError::MiddlewareTimeout {
            middleware: "slow".into(),
            timeout_ms: 10,
        };
        assert_eq!(handler.on_error("slow", &timeout, 1), ErrorAction::Retry);
        assert_eq!(handler.on_error("slow", &timeout, 2), ErrorAction::Skip);
        assert_eq!(strategy.as_str(), "custom");
        assert_eq!(format!("{:?}", ErrorStrategy::retry(2)), "Retry { max_retries: 2 }");
    }
}
