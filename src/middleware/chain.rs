//! 中间件链
//!
//! 每次执行时对注册表取快照，过滤掉禁用或条件不满足的中间件，
//! 再按优先级降序（同优先级按注册顺序）逐个执行。
//! 每一步都有独立超时，失败后按该中间件的 [`ErrorStrategy`] 处理。

use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::condition::MiddlewareCondition;
use super::types::{ErrorAction, ErrorStrategy, Middleware, MiddlewareContext, MiddlewareFlow};
use crate::core::config::MiddlewareConfig;
use crate::router::{Location, NavigationTarget};
use crate::utils::{prefixed_id, read, write, CancellationToken, NavError, Result};

// ============================================================================
// 注册
// ============================================================================

/// 中间件注册选项
pub struct MiddlewareOptions {
    handler: Arc<dyn Middleware>,
    name: Option<String>,
    priority: i32,
    condition: Option<MiddlewareCondition>,
    enabled: bool,
    timeout: Option<Duration>,
    error_strategy: ErrorStrategy,
}

impl MiddlewareOptions {
    /// 创建注册选项
    pub fn new(middleware: impl Middleware + 'static) -> Self {
        Self::from_arc(Arc::new(middleware))
    }

    /// 使用共享的中间件实例
    pub fn from_arc(handler: Arc<dyn Middleware>) -> Self {
        Self {
            handler,
            name: None,
            priority: 0,
            condition: None,
            enabled: true,
            timeout: None,
            error_strategy: ErrorStrategy::default(),
        }
    }

    /// 覆盖中间件名称
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 设置优先级，越大越先执行
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// 设置执行条件
    pub fn condition(mut self, condition: MiddlewareCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// 设置单步超时，未设置时使用链的默认值
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 设置失败处理策略
    pub fn error_strategy(mut self, strategy: ErrorStrategy) -> Self {
        self.error_strategy = strategy;
        self
    }

    /// 以禁用状态注册
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

struct MiddlewareEntry {
    id: String,
    name: String,
    handler: Arc<dyn Middleware>,
    priority: i32,
    condition: Option<MiddlewareCondition>,
    enabled: AtomicBool,
    /// 注销后置为 false
    active: AtomicBool,
    timeout: Duration,
    error_strategy: ErrorStrategy,
}

#[derive(Default)]
struct MiddlewareRegistry {
    entries: RwLock<Vec<Arc<MiddlewareEntry>>>,
}

impl MiddlewareRegistry {
    fn remove(&self, id: &str) -> bool {
        let mut entries = write(&self.entries);
        match entries.iter().position(|e| e.id == id) {
            Some(pos) => {
                let entry = entries.remove(pos);
                entry.active.store(false, Ordering::SeqCst);
                debug!(middleware = %entry.name, "中间件已注销");
                true
            }
            None => false,
        }
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let entries = read(&self.entries);
        let entry = entries
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| NavError::MiddlewareNotFound(id.to_string()))?;
        entry.enabled.store(enabled, Ordering::SeqCst);
        debug!(middleware = %entry.name, enabled = enabled, "中间件状态已修改");
        Ok(())
    }
}

/// 中间件注册句柄
///
/// 只持有注册表的弱引用；丢弃句柄不会注销中间件。
#[derive(Clone)]
pub struct MiddlewareHandle {
    id: String,
    registry: Weak<MiddlewareRegistry>,
}

impl std::fmt::Debug for MiddlewareHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareHandle").field("id", &self.id).finish()
    }
}

impl MiddlewareHandle {
    /// 注册 ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 注销，重复调用返回 false
    pub fn unregister(&self) -> bool {
        self.registry
            .upgrade()
            .map(|registry| registry.remove(&self.id))
            .unwrap_or(false)
    }

    /// 启用
    pub fn enable(&self) -> Result<()> {
        self.set_enabled(true)
    }

    /// 禁用
    pub fn disable(&self) -> Result<()> {
        self.set_enabled(false)
    }

    fn set_enabled(&self, enabled: bool) -> Result<()> {
        match self.registry.upgrade() {
            Some(registry) => registry.set_enabled(&self.id, enabled),
            None => Err(NavError::MiddlewareNotFound(self.id.clone())),
        }
    }
}

// ============================================================================
// 执行报告
// ============================================================================

/// 单个中间件的执行记录
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    /// 注册 ID
    pub id: String,
    /// 中间件名称
    pub name: String,
    /// 执行序号，从 0 开始
    pub order: usize,
    /// 耗时（毫秒，含重试）
    pub duration_ms: f64,
    /// 是否成功
    pub success: bool,
    /// 尝试次数
    pub attempts: u32,
    /// 最后一次失败的错误信息
    pub error: Option<String>,
}

/// 中间件链的最终结果
#[derive(Debug, Clone)]
pub enum ChainOutcome {
    /// 全部执行完毕
    Completed,
    /// 某个中间件要求重定向
    Redirect {
        /// 发起重定向的中间件
        middleware: String,
        /// 重定向目标
        target: NavigationTarget,
    },
    /// 某个中间件主动终止
    Aborted {
        /// 发起终止的中间件
        middleware: String,
        /// 终止原因
        reason: String,
    },
    /// 中间件失败且策略为终止
    Failed(NavError),
}

impl ChainOutcome {
    /// 是否全部执行完毕
    pub fn is_completed(&self) -> bool {
        matches!(self, ChainOutcome::Completed)
    }
}

/// 中间件链执行报告
#[derive(Debug, Clone)]
pub struct PerformanceReport {
    /// 每一步的记录，按执行顺序
    pub steps: Vec<StepRecord>,
    /// 总耗时（毫秒）
    pub total_ms: f64,
    /// 最慢的一步
    pub slowest: Option<String>,
    /// 失败的中间件名称
    pub failed_steps: Vec<String>,
    /// 完整执行路径
    pub execution_path: Vec<String>,
    /// 最终结果
    pub outcome: ChainOutcome,
}

impl PerformanceReport {
    fn new(steps: Vec<StepRecord>, total_ms: f64, outcome: ChainOutcome) -> Self {
        let slowest = steps
            .iter()
            .max_by(|a, b| a.duration_ms.total_cmp(&b.duration_ms))
            .map(|s| s.name.clone());
        let failed_steps = steps
            .iter()
            .filter(|s| !s.success)
            .map(|s| s.name.clone())
            .collect();
        let execution_path = steps.iter().map(|s| s.name.clone()).collect();
        Self {
            steps,
            total_ms,
            slowest,
            failed_steps,
            execution_path,
            outcome,
        }
    }

    /// 某个中间件的执行序号
    pub fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().find(|s| s.name == name).map(|s| s.order)
    }
}

// ============================================================================
// 中间件链
// ============================================================================

enum StepResult {
    Flow(MiddlewareFlow),
    Skipped(NavError),
    Failed(NavError),
}

/// 中间件链
pub struct MiddlewareChain {
    label: String,
    registry: Arc<MiddlewareRegistry>,
    config: MiddlewareConfig,
}

impl MiddlewareChain {
    /// 创建中间件链
    pub fn new(config: MiddlewareConfig) -> Self {
        Self {
            label: "default".to_string(),
            registry: Arc::new(MiddlewareRegistry::default()),
            config,
        }
    }

    /// 设置链名称（用于日志）
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// 链名称
    pub fn label(&self) -> &str {
        &self.label
    }

    /// 链配置
    pub fn config(&self) -> &MiddlewareConfig {
        &self.config
    }

    /// 注册中间件
    pub fn register(&self, options: MiddlewareOptions) -> MiddlewareHandle {
        let id = prefixed_id("mw");
        let name = options
            .name
            .unwrap_or_else(|| options.handler.name().to_string());
        let timeout = options
            .timeout
            .unwrap_or_else(|| Duration::from_millis(self.config.timeout_ms));

        debug!(
            chain = %self.label,
            middleware = %name,
            priority = options.priority,
            strategy = options.error_strategy.as_str(),
            "中间件已注册"
        );
        write(&self.registry.entries).push(Arc::new(MiddlewareEntry {
            id: id.clone(),
            name,
            handler: options.handler,
            priority: options.priority,
            condition: options.condition,
            enabled: AtomicBool::new(options.enabled),
            active: AtomicBool::new(true),
            timeout,
            error_strategy: options.error_strategy,
        }));

        MiddlewareHandle {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// 批量注册
    pub fn register_batch(
        &self,
        batch: impl IntoIterator<Item = MiddlewareOptions>,
    ) -> Vec<MiddlewareHandle> {
        batch.into_iter().map(|o| self.register(o)).collect()
    }

    /// 按 ID 注销
    pub fn unregister(&self, id: &str) -> bool {
        self.registry.remove(id)
    }

    /// 启用中间件
    pub fn enable(&self, id: &str) -> Result<()> {
        self.registry.set_enabled(id, true)
    }

    /// 禁用中间件（保留注册）
    pub fn disable(&self, id: &str) -> Result<()> {
        self.registry.set_enabled(id, false)
    }

    /// 已注册中间件数量
    pub fn len(&self) -> usize {
        read(&self.registry.entries).len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按执行顺序列出已启用的中间件名称（不考虑条件）
    pub fn names(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .filter(|e| e.enabled.load(Ordering::SeqCst))
            .map(|e| e.name.clone())
            .collect()
    }

    /// 按优先级排序的快照
    fn snapshot(&self) -> Vec<Arc<MiddlewareEntry>> {
        let mut entries = read(&self.registry.entries).clone();
        entries.sort_by(|a, b| b.priority.cmp(&a.priority));
        entries
    }

    /// 执行中间件链
    pub async fn execute(&self, to: Arc<Location>, from: Arc<Location>) -> PerformanceReport {
        self.execute_with_cancel(to, from, CancellationToken::new())
            .await
    }

    /// 执行中间件链，可通过令牌取消
    pub async fn execute_with_cancel(
        &self,
        to: Arc<Location>,
        from: Arc<Location>,
        cancel: CancellationToken,
    ) -> PerformanceReport {
        let started = Instant::now();
        let selected: Vec<Arc<MiddlewareEntry>> = self
            .snapshot()
            .into_iter()
            .filter(|e| e.enabled.load(Ordering::SeqCst))
            .filter(|e| e.condition.as_ref().map_or(true, |c| c.matches(&to, &from)))
            .collect();

        let ctx = MiddlewareContext::new(to, from, cancel);
        let mut steps = Vec::with_capacity(selected.len());
        let mut outcome = ChainOutcome::Completed;

        for entry in selected {
            if !entry.active.load(Ordering::SeqCst) {
                debug!(middleware = %entry.name, "中间件已注销，跳过");
                continue;
            }

            let step_started = Instant::now();
            let (result, attempts) = self.run_step(&entry, &ctx).await;
            let mut step = StepRecord {
                id: entry.id.clone(),
                name: entry.name.clone(),
                order: steps.len(),
                duration_ms: step_started.elapsed().as_secs_f64() * 1000.0,
                success: true,
                attempts,
                error: None,
            };

            let stop = match result {
                StepResult::Flow(MiddlewareFlow::Continue) => None,
                StepResult::Flow(MiddlewareFlow::Redirect(target)) => {
                    Some(ChainOutcome::Redirect {
                        middleware: entry.name.clone(),
                        target,
                    })
                }
                StepResult::Flow(MiddlewareFlow::Abort(reason)) => Some(ChainOutcome::Aborted {
                    middleware: entry.name.clone(),
                    reason,
                }),
                StepResult::Skipped(error) => {
                    warn!(chain = %self.label, middleware = %entry.name, error = %error, "中间件失败，已跳过");
                    step.success = false;
                    step.error = Some(error.to_string());
                    None
                }
                StepResult::Failed(error) => {
                    step.success = false;
                    step.error = Some(error.to_string());
                    Some(ChainOutcome::Failed(error))
                }
            };

            steps.push(step);
            if let Some(stop) = stop {
                outcome = stop;
                break;
            }
        }

        let report = PerformanceReport::new(
            steps,
            started.elapsed().as_secs_f64() * 1000.0,
            outcome,
        );
        debug!(
            chain = %self.label,
            path = %ctx.to.path,
            steps = report.steps.len(),
            elapsed_ms = report.total_ms,
            "中间件链执行完成"
        );
        report
    }

    /// 执行单个中间件，包含重试，返回结果和尝试次数
    async fn run_step(
        &self,
        entry: &MiddlewareEntry,
        ctx: &MiddlewareContext,
    ) -> (StepResult, u32) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut step_ctx = ctx.clone();
            step_ctx.attempt = attempt;

            let error = match self.invoke(entry, step_ctx).await {
                Ok(flow) => return (StepResult::Flow(flow), attempt),
                Err(NavError::Cancelled) => {
                    return (StepResult::Failed(NavError::Cancelled), attempt)
                }
                Err(error) => error,
            };

            match self.decide(entry, &error, attempt) {
                ErrorAction::Retry => {
                    debug!(middleware = %entry.name, attempt = attempt, error = %error, "中间件失败，准备重试");
                    if self.config.retry_delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                    }
                }
                ErrorAction::Skip => return (StepResult::Skipped(error), attempt),
                ErrorAction::Abort => {
                    error!(chain = %self.label, middleware = %entry.name, attempts = attempt, error = %error, "中间件失败，终止执行链");
                    return (StepResult::Failed(error), attempt);
                }
            }
        }
    }

    /// 根据策略决定如何处理失败
    fn decide(&self, entry: &MiddlewareEntry, error: &NavError, attempt: u32) -> ErrorAction {
        match &entry.error_strategy {
            ErrorStrategy::Abort => ErrorAction::Abort,
            ErrorStrategy::Skip => ErrorAction::Skip,
            ErrorStrategy::Retry { max_retries } => {
                if attempt <= *max_retries {
                    ErrorAction::Retry
                } else {
                    ErrorAction::Abort
                }
            }
            ErrorStrategy::Custom(handler) => {
                match handler.on_error(&entry.name, error, attempt) {
                    // 自定义处理器的重试同样受链配置的次数上限约束
                    ErrorAction::Retry if attempt > self.config.max_retries => ErrorAction::Abort,
                    action => action,
                }
            }
        }
    }

    /// 带超时和取消地调用一次中间件
    async fn invoke(&self, entry: &MiddlewareEntry, ctx: MiddlewareContext) -> Result<MiddlewareFlow> {
        if ctx.cancel.is_cancelled() {
            return Err(NavError::Cancelled);
        }

        let cancel = ctx.cancel.clone();
        let call = AssertUnwindSafe(entry.handler.handle(ctx)).catch_unwind();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(NavError::Cancelled),
            result = tokio::time::timeout(entry.timeout, call) => match result {
                Ok(Ok(Ok(flow))) => Ok(flow),
                Ok(Ok(Err(e))) => Err(NavError::MiddlewareExecution {
                    middleware: entry.name.clone(),
                    reason: e.to_string(),
                }),
                Ok(Err(_)) => Err(NavError::MiddlewareExecution {
                    middleware: entry.name.clone(),
                    reason: "中间件发生 panic".to_string(),
                }),
                Err(_) => {
                    let timeout_ms = entry.timeout.as_millis() as u64;
                    warn!(middleware = %entry.name, timeout_ms = timeout_ms, "中间件执行超时");
                    Err(NavError::MiddlewareTimeout {
                        middleware: entry.name.clone(),
                        timeout_ms,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{middleware_fn, ErrorAction};
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    fn chain() -> MiddlewareChain {
        MiddlewareChain::new(MiddlewareConfig::default())
    }

    fn locations(path: &str) -> (Arc<Location>, Arc<Location>) {
        (Arc::new(Location::new(path)), Arc::new(Location::new("/")))
    }

    fn noop(name: &'static str) -> MiddlewareOptions {
        MiddlewareOptions::new(middleware_fn(name, |_ctx| async { Ok(MiddlewareFlow::Continue) }))
    }

    fn failing(name: &'static str, calls: Arc<AtomicU32>) -> MiddlewareOptions {
        MiddlewareOptions::new(middleware_fn(name, move |_ctx| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("boom"))
            }
        }))
    }

    #[tokio::test]
    async fn test_priority_order() {
        let chain = chain();
        chain.register(noop("low").priority(5));
        chain.register(noop("high").priority(10));
        chain.register(noop("low-2").priority(5));

        let (to, from) = locations("/a");
        let report = chain.execute(to, from).await;

        assert!(report.outcome.is_completed());
        assert_eq!(report.execution_path, vec!["high", "low", "low-2"]);
        assert!(report.position("high").unwrap() < report.position("low").unwrap());
    }

    #[tokio::test]
    async fn test_condition_and_disable() {
        let chain = chain();
        chain.register(
            noop("admin-only")
                .condition(MiddlewareCondition::new().path("/admin/**").unwrap()),
        );
        let handle = chain.register(noop("toggled"));

        let (to, from) = locations("/home");
        assert_eq!(chain.execute(to, from).await.execution_path, vec!["toggled"]);

        handle.disable().unwrap();
        let (to, from) = locations("/admin/users");
        assert_eq!(chain.execute(to, from).await.execution_path, vec!["admin-only"]);
        assert_eq!(chain.len(), 2);

        chain.enable(handle.id()).unwrap();
        assert_eq!(chain.names(), vec!["admin-only", "toggled"]);
        assert!(matches!(
            chain.disable("missing"),
            Err(NavError::MiddlewareNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_abort_strategy_stops_chain() {
        let chain = chain();
        let calls = Arc::new(AtomicU32::new(0));
        chain.register(failing("bad", Arc::clone(&calls)).priority(1));
        chain.register(noop("after"));

        let (to, from) = locations("/a");
        let report = chain.execute(to, from).await;

        assert!(matches!(
            report.outcome,
            ChainOutcome::Failed(NavError::MiddlewareExecution { .. })
        ));
        assert_eq!(report.execution_path, vec!["bad"]);
        assert_eq!(report.failed_steps, vec!["bad"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_skip_strategy_continues() {
        let chain = chain();
        let calls = Arc::new(AtomicU32::new(0));
        chain.register(
            failing("flaky", Arc::clone(&calls))
                .priority(1)
                .error_strategy(ErrorStrategy::Skip),
        );
        chain.register(noop("after"));

        let (to, from) = locations("/a");
        let report = chain.execute(to, from).await;

        assert!(report.outcome.is_completed());
        assert_eq!(report.execution_path, vec!["flaky", "after"]);
        assert!(!report.steps[0].success);
        assert_eq!(report.steps[0].error.as_deref(), Some("中间件执行失败: 'flaky' - boom"));
    }

    #[tokio::test]
    async fn test_retry_then_abort() {
        let chain = chain();
        let calls = Arc::new(AtomicU32::new(0));
        chain.register(failing("retry", Arc::clone(&calls)).error_strategy(ErrorStrategy::retry(2)));

        let (to, from) = locations("/a");
        let report = chain.execute(to, from).await;

        assert!(matches!(report.outcome, ChainOutcome::Failed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.steps[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let chain = chain();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        chain.register(
            MiddlewareOptions::new(middleware_fn("eventually", move |ctx| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if ctx.attempt < 2 {
                        Err(anyhow::anyhow!("not yet"))
                    } else {
                        Ok(MiddlewareFlow::Continue)
                    }
                }
            }))
            .error_strategy(ErrorStrategy::retry(3)),
        );

        let (to, from) = locations("/a");
        let report = chain.execute(to, from).await;

        assert!(report.outcome.is_completed());
        assert!(report.steps[0].success);
        assert_eq!(report.steps[0].attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_custom_strategy_bounded_by_config() {
        let chain = chain();
        let calls = Arc::new(AtomicU32::new(0));
        chain.register(
            failing("custom", Arc::clone(&calls))
                .error_strategy(ErrorStrategy::custom(|_: &str, _: &NavError, _: u32| ErrorAction::Retry)),
        );

        let (to, from) = locations("/a");
        let report = chain.execute(to, from).await;

        assert!(matches!(report.outcome, ChainOutcome::Failed(_)));
        // 默认 max_retries = 3
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout() {
        let chain = chain();
        chain.register(
            MiddlewareOptions::new(middleware_fn("slow", |_ctx| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(MiddlewareFlow::Continue)
            }))
            .error_strategy(ErrorStrategy::Skip),
        );
        chain.register(noop("next").priority(-1));

        let (to, from) = locations("/a");
        let report = chain.execute(to, from).await;

        assert!(report.outcome.is_completed());
        assert_eq!(report.failed_steps, vec!["slow"]);
        assert_eq!(report.slowest.as_deref(), Some("slow"));
        assert!(report.steps[0].error.as_ref().unwrap().contains("5000ms"));
    }

    #[tokio::test]
    async fn test_redirect_and_abort_flows() {
        let chain = chain();
        chain.register(MiddlewareOptions::new(middleware_fn("legacy", |ctx| async move {
            if ctx.to.path == "/old" {
                Ok(MiddlewareFlow::redirect("/new"))
            } else {
                Ok(MiddlewareFlow::abort("maintenance"))
            }
        })));
        chain.register(noop("never").priority(-1));

        let (to, from) = locations("/old");
        match chain.execute(to, from).await.outcome {
            ChainOutcome::Redirect { middleware, target } => {
                assert_eq!(middleware, "legacy");
                assert_eq!(target, NavigationTarget::Path("/new".to_string()));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let (to, from) = locations("/other");
        let report = chain.execute(to, from).await;
        assert!(matches!(report.outcome, ChainOutcome::Aborted { ref reason, .. } if reason == "maintenance"));
        assert_eq!(report.execution_path, vec!["legacy"]);
    }

    #[tokio::test]
    async fn test_register_unregister_idempotent() {
        let chain = chain();
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        let before = chain.len();

        let handles = chain.register_batch(vec![
            noop("a"),
            MiddlewareOptions::new(middleware_fn("b", move |_ctx| {
                let log = Arc::clone(&log_clone);
                async move {
                    log.lock().unwrap().push("b");
                    Ok(MiddlewareFlow::Continue)
                }
            })),
        ]);
        for handle in &handles {
            assert!(handle.unregister());
            assert!(!handle.unregister());
        }

        assert_eq!(chain.len(), before);
        let (to, from) = locations("/a");
        let report = chain.execute(to, from).await;
        assert!(report.steps.is_empty());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unregister_mid_run() {
        let chain = Arc::new(chain());
        let handle_slot: Arc<Mutex<Option<MiddlewareHandle>>> = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&handle_slot);
        chain.register(
            MiddlewareOptions::new(middleware_fn("remover", move |_ctx| {
                let slot = Arc::clone(&slot);
                async move {
                    if let Some(handle) = slot.lock().unwrap().take() {
                        handle.unregister();
                    }
                    Ok(MiddlewareFlow::Continue)
                }
            }))
            .priority(10),
        );
        let victim = chain.register(noop("victim"));
        *handle_slot.lock().unwrap() = Some(victim);

        let (to, from) = locations("/a");
        let report = chain.execute(to, from).await;
        assert_eq!(report.execution_path, vec!["remover"]);
    }

    #[tokio::test]
    async fn test_cancelled_chain() {
        let chain = chain();
        chain.register(noop("a"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (to, from) = locations("/a");
        let report = chain.execute_with_cancel(to, from, cancel).await;
        assert!(matches!(report.outcome, ChainOutcome::Failed(NavError::Cancelled)));
    }
}
