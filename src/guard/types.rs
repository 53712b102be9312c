//! 守卫类型定义
//!
//! 守卫的返回值是一个带标签的枚举 [`GuardOutcome`]，每次调用只求值一次：
//! `Allow` 继续，`Deny` 拒绝，`Redirect` 拒绝并给出新目标，`Fail` 拒绝并附带错误。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::router::{Location, NavigationTarget};
use crate::utils::{CancellationToken, NavError};

/// 导航阶段
///
/// 每次导航严格按以下顺序执行，任一阶段拒绝即终止后续阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GuardPhase {
    /// 离开当前组件
    BeforeRouteLeave,
    /// 全局前置
    BeforeEach,
    /// 目标路由自身
    BeforeEnter,
    /// 进入目标组件
    BeforeRouteEnter,
    /// 复用同名组件
    BeforeRouteUpdate,
}

impl GuardPhase {
    /// 按执行顺序排列的全部阶段
    pub const ALL: [GuardPhase; 5] = [
        GuardPhase::BeforeRouteLeave,
        GuardPhase::BeforeEach,
        GuardPhase::BeforeEnter,
        GuardPhase::BeforeRouteEnter,
        GuardPhase::BeforeRouteUpdate,
    ];

    /// 阶段名称
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardPhase::BeforeRouteLeave => "beforeRouteLeave",
            GuardPhase::BeforeEach => "beforeEach",
            GuardPhase::BeforeEnter => "beforeEnter",
            GuardPhase::BeforeRouteEnter => "beforeRouteEnter",
            GuardPhase::BeforeRouteUpdate => "beforeRouteUpdate",
        }
    }
}

impl fmt::Display for GuardPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 守卫返回值
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    /// 放行
    Allow,
    /// 拒绝，不重定向
    Deny,
    /// 拒绝并重定向
    Redirect(NavigationTarget),
    /// 拒绝并附带错误
    Fail(String),
}

impl GuardOutcome {
    /// 重定向到给定目标
    pub fn redirect(target: impl Into<NavigationTarget>) -> Self {
        GuardOutcome::Redirect(target.into())
    }

    /// 是否放行
    pub fn is_allow(&self) -> bool {
        matches!(self, GuardOutcome::Allow)
    }

    /// 由 `Result` 转换，错误视为 `Fail`
    pub fn from_result<E: fmt::Display>(result: std::result::Result<GuardOutcome, E>) -> Self {
        result.unwrap_or_else(|e| GuardOutcome::Fail(e.to_string()))
    }
}

impl From<()> for GuardOutcome {
    fn from(_: ()) -> Self {
        GuardOutcome::Allow
    }
}

impl From<bool> for GuardOutcome {
    fn from(allowed: bool) -> Self {
        if allowed {
            GuardOutcome::Allow
        } else {
            GuardOutcome::Deny
        }
    }
}

impl From<NavigationTarget> for GuardOutcome {
    fn from(target: NavigationTarget) -> Self {
        GuardOutcome::Redirect(target)
    }
}

impl From<&str> for GuardOutcome {
    fn from(path: &str) -> Self {
        GuardOutcome::Redirect(NavigationTarget::from(path))
    }
}

impl From<anyhow::Result<GuardOutcome>> for GuardOutcome {
    fn from(result: anyhow::Result<GuardOutcome>) -> Self {
        GuardOutcome::from_result(result)
    }
}

/// 单个守卫求值后的裁决
#[derive(Debug, Clone)]
pub enum GuardVerdict {
    /// 继续执行后续守卫
    Continue,
    /// 拒绝
    Deny,
    /// 拒绝并重定向
    Redirect(NavigationTarget),
    /// 拒绝并附带错误（含超时和取消）
    Error(NavError),
}

impl GuardVerdict {
    /// 把守卫返回值转换为裁决
    pub fn from_outcome(guard: &str, outcome: GuardOutcome) -> Self {
        match outcome {
            GuardOutcome::Allow => GuardVerdict::Continue,
            GuardOutcome::Deny => GuardVerdict::Deny,
            GuardOutcome::Redirect(target) => GuardVerdict::Redirect(target),
            GuardOutcome::Fail(reason) => GuardVerdict::Error(NavError::GuardExecution {
                guard: guard.to_string(),
                reason,
            }),
        }
    }

    /// 是否终止当前阶段
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GuardVerdict::Continue)
    }
}

/// 守卫上下文
///
/// 克隆代价很低：位置以 `Arc` 共享，取消令牌共享同一状态。
#[derive(Debug, Clone)]
pub struct GuardContext {
    /// 目标位置
    pub to: Arc<Location>,
    /// 当前位置
    pub from: Arc<Location>,
    /// 当前阶段
    pub phase: GuardPhase,
    /// 取消令牌
    pub cancel: CancellationToken,
}

impl GuardContext {
    /// 创建上下文
    pub fn new(
        to: Arc<Location>,
        from: Arc<Location>,
        phase: GuardPhase,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            to,
            from,
            phase,
            cancel,
        }
    }

    pub(crate) fn with_phase(&self, phase: GuardPhase) -> Self {
        Self {
            phase,
            ..self.clone()
        }
    }
}

/// 导航守卫
#[async_trait]
pub trait NavigationGuard: Send + Sync {
    /// 守卫名称，用于日志和依赖推断
    fn name(&self) -> &str;

    /// 执行检查
    async fn check(&self, ctx: GuardContext) -> GuardOutcome;
}

/// 由异步闭包构造的守卫
pub struct FnGuard<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut, O> NavigationGuard for FnGuard<F>
where
    F: Fn(GuardContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = O> + Send + 'static,
    O: Into<GuardOutcome> + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: GuardContext) -> GuardOutcome {
        (self.f)(ctx).await.into()
    }
}

/// 使用异步闭包创建守卫
///
/// 闭包返回值可以是 `()`、`bool`、`&str`（重定向路径）、`NavigationTarget`
/// 或 `GuardOutcome`。
pub fn guard_fn<F, Fut, O>(name: impl Into<String>, f: F) -> FnGuard<F>
where
    F: Fn(GuardContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = O> + Send + 'static,
    O: Into<GuardOutcome> + 'static,
{
    FnGuard {
        name: name.into(),
        f,
    }
}

/// 由同步闭包构造的守卫
pub struct SyncGuard<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, O> NavigationGuard for SyncGuard<F>
where
    F: Fn(&GuardContext) -> O + Send + Sync + 'static,
    O: Into<GuardOutcome> + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: GuardContext) -> GuardOutcome {
        (self.f)(&ctx).into()
    }
}

/// 使用同步闭包创建守卫
pub fn guard_sync<F, O>(name: impl Into<String>, f: F) -> SyncGuard<F>
where
    F: Fn(&GuardContext) -> O + Send + Sync + 'static,
    O: Into<GuardOutcome> + 'static,
{
    SyncGuard {
        name: name.into(),
        f,
    }
}

/// 导航完成后的钩子
///
/// 失败只记录日志，不影响导航结果。
#[async_trait]
pub trait AfterEachHook: Send + Sync {
    /// 钩子名称
    fn name(&self) -> &str;

    /// 导航成功后调用
    async fn after_each(&self, to: Arc<Location>, from: Arc<Location>) -> anyhow::Result<()>;
}

/// 由异步闭包构造的钩子
pub struct FnHook<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> AfterEachHook for FnHook<F>
where
    F: Fn(Arc<Location>, Arc<Location>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn after_each(&self, to: Arc<Location>, from: Arc<Location>) -> anyhow::Result<()> {
        (self.f)(to, from).await
    }
}

/// 使用异步闭包创建 afterEach 钩子
pub fn hook_fn<F, Fut>(name: impl Into<String>, f: F) -> FnHook<F>
where
    F: Fn(Arc<Location>, Arc<Location>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHook {
        name: name.into(),
        f,
    }
}
