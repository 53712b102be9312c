//! 守卫管线
//!
//! 按固定顺序执行导航守卫：
//! `beforeRouteLeave -> beforeEach -> beforeEnter -> beforeRouteEnter -> beforeRouteUpdate`，
//! 任一阶段出现拒绝、重定向或错误时立即终止。导航放行后执行 `afterEach` 钩子，
//! 钩子失败只记录日志。
//!
//! 注册表在阶段开始时取快照，但每个守卫调用前会再次检查其是否仍处于注册状态，
//! 运行中被注销的守卫不会再被调用。

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::parallel::ParallelGuardExecutor;
use super::types::{AfterEachHook, GuardContext, GuardPhase, GuardVerdict, NavigationGuard};
use crate::core::config::GuardConfig;
use crate::router::{Location, NavigationTarget, RouteGuard, RouteRecord};
use crate::utils::{generate_uuid, lock, prefixed_id, read, write, CancellationToken, NavError};

// ============================================================================
// 注册
// ============================================================================

/// 守卫注册选项
#[derive(Debug, Clone, Default)]
pub struct GuardOptions {
    /// 优先级（数值越大越先执行）
    pub priority: i32,
    /// 首次调用后自动注销
    pub once: bool,
    /// 名称，缺省时使用守卫自身的名称
    pub name: Option<String>,
    /// 显式依赖（同阶段守卫的名称或 ID）
    pub depends_on: Vec<String>,
}

impl GuardOptions {
    /// 默认选项
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置优先级
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// 只执行一次
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// 设置名称
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 添加显式依赖
    pub fn depends_on(mut self, guard: impl Into<String>) -> Self {
        self.depends_on.push(guard.into());
        self
    }
}

/// 已注册的守卫
pub(crate) struct GuardEntry {
    id: String,
    phase: GuardPhase,
    handler: Arc<dyn NavigationGuard>,
    priority: i32,
    once: bool,
    name: String,
    depends_on: Vec<String>,
    /// 注销或 `once` 守卫被领取后置为 false
    active: AtomicBool,
}

struct HookEntry {
    id: String,
    hook: Arc<dyn AfterEachHook>,
}

/// 守卫与钩子注册表
#[derive(Default)]
pub(crate) struct GuardRegistry {
    guards: RwLock<Vec<Arc<GuardEntry>>>,
    hooks: RwLock<Vec<Arc<HookEntry>>>,
}

impl GuardRegistry {
    fn remove(&self, id: &str) -> bool {
        {
            let mut guards = write(&self.guards);
            if let Some(pos) = guards.iter().position(|g| g.id == id) {
                let entry = guards.remove(pos);
                entry.active.store(false, Ordering::SeqCst);
                return true;
            }
        }
        let mut hooks = write(&self.hooks);
        match hooks.iter().position(|h| h.id == id) {
            Some(pos) => {
                hooks.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// 注册句柄
///
/// 只持有注册表的弱引用；丢弃句柄不会注销守卫。
#[derive(Debug, Clone)]
pub struct GuardHandle {
    id: String,
    registry: Weak<GuardRegistry>,
}

impl GuardHandle {
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
}

// ============================================================================
// 单个守卫的执行单元
// ============================================================================

/// 一个阶段中待执行的守卫
///
/// 由注册表守卫或路由记录、组件上的守卫生成，只在一次管线执行中存在。
#[derive(Clone)]
pub struct GuardTask {
    /// 守卫 ID
    pub id: String,
    /// 守卫名称
    pub name: String,
    /// 优先级
    pub priority: i32,
    /// 注册顺序
    pub order: usize,
    /// 显式依赖
    pub depends_on: Vec<String>,
    handler: Arc<dyn NavigationGuard>,
    entry: Option<Arc<GuardEntry>>,
    registry: Weak<GuardRegistry>,
}

impl std::fmt::Debug for GuardTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardTask")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("order", &self.order)
            .field("depends_on", &self.depends_on)
            .finish()
    }
}

impl GuardTask {
    /// 创建独立的执行单元（不关联注册表）
    pub fn new(id: impl Into<String>, handler: Arc<dyn NavigationGuard>) -> Self {
        let name = handler.name().to_string();
        Self {
            id: id.into(),
            name,
            priority: 0,
            order: 0,
            depends_on: Vec::new(),
            handler,
            entry: None,
            registry: Weak::new(),
        }
    }

    /// 设置优先级
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// 设置注册顺序
    pub fn with_order(mut self, order: usize) -> Self {
        self.order = order;
        self
    }

    /// 添加显式依赖
    pub fn depends_on(mut self, guard: impl Into<String>) -> Self {
        self.depends_on.push(guard.into());
        self
    }

    fn from_entry(entry: Arc<GuardEntry>, registry: Weak<GuardRegistry>) -> Self {
        Self {
            id: entry.id.clone(),
            name: entry.name.clone(),
            priority: entry.priority,
            order: 0,
            depends_on: entry.depends_on.clone(),
            handler: Arc::clone(&entry.handler),
            entry: Some(entry),
            registry,
        }
    }

    fn from_route_guard(id: String, guard: &RouteGuard) -> Self {
        Self::new(id, Arc::clone(&guard.handler)).with_priority(guard.priority)
    }

    /// 领取执行资格：已注销的守卫不再执行，`once` 守卫只能领取一次
    fn claim(&self) -> bool {
        match &self.entry {
            None => true,
            Some(entry) if entry.once => entry
                .active
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok(),
            Some(entry) => entry.active.load(Ordering::SeqCst),
        }
    }

    fn release(&self) {
        let Some(entry) = &self.entry else {
            return;
        };
        if entry.once {
            if let Some(registry) = self.registry.upgrade() {
                registry.remove(&entry.id);
                debug!(guard = %self.name, "once 守卫已注销");
            }
        }
    }

    /// 执行守卫，已注销时返回 `None`
    pub(crate) async fn run(&self, ctx: &GuardContext, timeout: Duration) -> Option<GuardVerdict> {
        if !self.claim() {
            debug!(guard = %self.name, "守卫已注销，跳过");
            return None;
        }
        let verdict = self.invoke(ctx.clone(), timeout).await;
        self.release();
        Some(verdict)
    }

    async fn invoke(&self, ctx: GuardContext, timeout: Duration) -> GuardVerdict {
        if ctx.cancel.is_cancelled() {
            return GuardVerdict::Error(NavError::Cancelled);
        }

        let cancel = ctx.cancel.clone();
        let phase = ctx.phase;
        let call = AssertUnwindSafe(self.handler.check(ctx)).catch_unwind();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(guard = %self.name, phase = %phase, "守卫执行被取消");
                GuardVerdict::Error(NavError::Cancelled)
            }
            result = tokio::time::timeout(timeout, call) => match result {
                Ok(Ok(outcome)) => GuardVerdict::from_outcome(&self.name, outcome),
                Ok(Err(_)) => {
                    error!(guard = %self.name, phase = %phase, "守卫发生 panic");
                    GuardVerdict::Error(NavError::GuardExecution {
                        guard: self.name.clone(),
                        reason: "守卫发生 panic".to_string(),
                    })
                }
                Err(_) => {
                    let timeout_ms = timeout.as_millis() as u64;
                    warn!(guard = %self.name, phase = %phase, timeout_ms = timeout_ms, "守卫执行超时");
                    GuardVerdict::Error(NavError::GuardTimeout {
                        guard: self.name.clone(),
                        timeout_ms,
                    })
                }
            }
        }
    }
}

/// 单个阶段的执行报告
#[derive(Debug, Clone)]
pub struct PhaseReport {
    /// 阶段裁决
    pub verdict: GuardVerdict,
    /// 并发执行的守卫数
    pub parallel_count: usize,
    /// 串行执行的守卫数
    pub serial_count: usize,
}

/// 按顺序执行守卫，遇到终止裁决立即返回
pub(crate) async fn run_in_sequence<'a>(
    tasks: impl IntoIterator<Item = &'a GuardTask>,
    ctx: &GuardContext,
    timeout: Duration,
) -> PhaseReport {
    let mut serial_count = 0;
    for task in tasks {
        let Some(verdict) = task.run(ctx, timeout).await else {
            continue;
        };
        serial_count += 1;
        if verdict.is_terminal() {
            debug!(guard = %task.name, phase = %ctx.phase, verdict = ?verdict, "守卫终止导航");
            return PhaseReport {
                verdict,
                parallel_count: 0,
                serial_count,
            };
        }
    }
    PhaseReport {
        verdict: GuardVerdict::Continue,
        parallel_count: 0,
        serial_count,
    }
}

// ============================================================================
// 执行结果与历史
// ============================================================================

/// 一次管线执行的最终结果
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// 是否放行
    pub allowed: bool,
    /// 重定向目标
    pub redirect: Option<NavigationTarget>,
    /// 错误
    pub error: Option<NavError>,
    /// 耗时（毫秒）
    pub duration_ms: f64,
    /// 并发执行的守卫数
    pub parallel_count: usize,
    /// 串行执行的守卫数
    pub serial_count: usize,
    /// 终止导航的阶段
    pub stopped_at: Option<GuardPhase>,
}

impl ExecutionResult {
    /// 放行
    pub fn allow() -> Self {
        Self {
            allowed: true,
            redirect: None,
            error: None,
            duration_ms: 0.0,
            parallel_count: 0,
            serial_count: 0,
            stopped_at: None,
        }
    }

    /// 拒绝
    pub fn deny() -> Self {
        Self {
            allowed: false,
            ..Self::allow()
        }
    }

    /// 拒绝并重定向
    pub fn redirect(target: NavigationTarget) -> Self {
        Self {
            redirect: Some(target),
            ..Self::deny()
        }
    }

    /// 拒绝并附带错误
    pub fn error(error: NavError) -> Self {
        Self {
            error: Some(error),
            ..Self::deny()
        }
    }

    fn from_verdict(verdict: GuardVerdict) -> Self {
        match verdict {
            GuardVerdict::Continue => Self::allow(),
            GuardVerdict::Deny => Self::deny(),
            GuardVerdict::Redirect(target) => Self::redirect(target),
            GuardVerdict::Error(err) => Self::error(err),
        }
    }

    /// 是否为重定向
    pub fn is_redirect(&self) -> bool {
        self.redirect.is_some()
    }
}

/// 执行历史记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// 记录 ID
    pub id: String,
    /// 目标地址
    pub to: String,
    /// 起始地址
    pub from: String,
    /// 是否放行
    pub allowed: bool,
    /// 重定向目标
    pub redirect: Option<String>,
    /// 错误描述
    pub error: Option<String>,
    /// 错误码
    pub error_code: Option<String>,
    /// 终止阶段
    pub stopped_at: Option<GuardPhase>,
    /// 耗时（毫秒）
    pub duration_ms: f64,
    /// 并发执行的守卫数
    pub parallel_count: usize,
    /// 串行执行的守卫数
    pub serial_count: usize,
    /// 时间戳
    pub timestamp: DateTime<Utc>,
}

impl ExecutionRecord {
    fn new(to: &Location, from: &Location, result: &ExecutionResult) -> Self {
        Self {
            id: generate_uuid(),
            to: to.full_path(),
            from: from.full_path(),
            allowed: result.allowed,
            redirect: result.redirect.as_ref().map(ToString::to_string),
            error: result.error.as_ref().map(ToString::to_string),
            error_code: result.error.as_ref().map(|e| e.error_code().to_string()),
            stopped_at: result.stopped_at,
            duration_ms: result.duration_ms,
            parallel_count: result.parallel_count,
            serial_count: result.serial_count,
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// 管线
// ============================================================================

/// 守卫管线
pub struct GuardPipeline {
    registry: Arc<GuardRegistry>,
    executor: ParallelGuardExecutor,
    config: GuardConfig,
    history: Mutex<VecDeque<ExecutionRecord>>,
}

impl GuardPipeline {
    /// 创建守卫管线
    pub fn new(config: GuardConfig) -> Self {
        let executor = ParallelGuardExecutor::new(
            config.dependency_inference,
            Duration::from_millis(config.timeout_ms),
        );
        Self {
            registry: Arc::new(GuardRegistry::default()),
            executor,
            config,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// 管线配置
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// 单个守卫的超时时间
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    /// 注册守卫
    pub fn register(
        &self,
        phase: GuardPhase,
        guard: impl NavigationGuard + 'static,
        options: GuardOptions,
    ) -> GuardHandle {
        self.register_arc(phase, Arc::new(guard), options)
    }

    /// 注册共享的守卫实例
    pub fn register_arc(
        &self,
        phase: GuardPhase,
        handler: Arc<dyn NavigationGuard>,
        options: GuardOptions,
    ) -> GuardHandle {
        let id = prefixed_id("guard");
        let name = options
            .name
            .unwrap_or_else(|| handler.name().to_string());

        let entry = Arc::new(GuardEntry {
            id: id.clone(),
            phase,
            handler,
            priority: options.priority,
            once: options.once,
            name: name.clone(),
            depends_on: options.depends_on,
            active: AtomicBool::new(true),
        });
        write(&self.registry.guards).push(entry);

        debug!(guard = %name, phase = %phase, priority = options.priority, "守卫已注册");
        GuardHandle {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// 注册全局 beforeEach 守卫
    pub fn before_each(&self, guard: impl NavigationGuard + 'static) -> GuardHandle {
        self.register(GuardPhase::BeforeEach, guard, GuardOptions::default())
    }

    /// 注册 afterEach 钩子
    pub fn after_each(&self, hook: impl AfterEachHook + 'static) -> GuardHandle {
        let id = prefixed_id("hook");
        write(&self.registry.hooks).push(Arc::new(HookEntry {
            id: id.clone(),
            hook: Arc::new(hook),
        }));
        GuardHandle {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// 按 ID 注销守卫或钩子
    pub fn unregister(&self, id: &str) -> bool {
        self.registry.remove(id)
    }

    /// 已注册守卫数量
    pub fn len(&self) -> usize {
        read(&self.registry.guards).len()
    }

    /// 是否没有注册任何守卫
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 已注册钩子数量
    pub fn hook_count(&self) -> usize {
        read(&self.registry.hooks).len()
    }

    /// 某阶段守卫的名称，按执行顺序
    pub fn guard_names(&self, phase: GuardPhase) -> Vec<String> {
        let mut entries: Vec<Arc<GuardEntry>> = read(&self.registry.guards)
            .iter()
            .filter(|g| g.phase == phase)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.priority.cmp(&a.priority));
        entries.iter().map(|g| g.name.clone()).collect()
    }

    /// 执行全部守卫阶段
    pub async fn execute(
        &self,
        to: Arc<Location>,
        from: Arc<Location>,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let started = Instant::now();
        let base_ctx = GuardContext::new(
            Arc::clone(&to),
            Arc::clone(&from),
            GuardPhase::BeforeRouteLeave,
            cancel,
        );

        let mut parallel_count = 0;
        let mut serial_count = 0;
        let mut stopped: Option<(GuardPhase, GuardVerdict)> = None;

        for phase in GuardPhase::ALL {
            if phase == GuardPhase::BeforeRouteUpdate && !same_component(&to, &from) {
                continue;
            }
            let tasks = self.collect_phase(phase, &to, &from);
            if tasks.is_empty() {
                continue;
            }

            let ctx = base_ctx.with_phase(phase);
            let report = if self.config.parallel {
                match self.executor.execute(&tasks, &ctx).await {
                    Ok(report) => report,
                    Err(err) => PhaseReport {
                        verdict: GuardVerdict::Error(err),
                        parallel_count: 0,
                        serial_count: 0,
                    },
                }
            } else {
                run_in_sequence(&tasks, &ctx, self.timeout()).await
            };

            parallel_count += report.parallel_count;
            serial_count += report.serial_count;
            debug!(
                phase = %phase,
                guards = tasks.len(),
                parallel = report.parallel_count,
                serial = report.serial_count,
                "守卫阶段完成"
            );

            if report.verdict.is_terminal() {
                stopped = Some((phase, report.verdict));
                break;
            }
        }

        let mut result = match stopped {
            Some((phase, verdict)) => ExecutionResult {
                stopped_at: Some(phase),
                ..ExecutionResult::from_verdict(verdict)
            },
            None => ExecutionResult::allow(),
        };
        result.parallel_count = parallel_count;
        result.serial_count = serial_count;

        if result.allowed {
            self.run_after_hooks(&to, &from).await;
        }
        result.duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        info!(
            to = %to.path,
            from = %from.path,
            allowed = result.allowed,
            redirect = ?result.redirect,
            elapsed_ms = result.duration_ms,
            "守卫管线执行完成"
        );
        self.record_history(&to, &from, &result);
        result
    }

    /// 收集某个阶段的守卫，按优先级降序、注册顺序升序排列
    ///
    /// 注册表守卫排在路由记录和组件守卫之前。
    fn collect_phase(&self, phase: GuardPhase, to: &Location, from: &Location) -> Vec<GuardTask> {
        let registry = Arc::downgrade(&self.registry);
        let mut tasks: Vec<GuardTask> = read(&self.registry.guards)
            .iter()
            .filter(|g| g.phase == phase && g.active.load(Ordering::SeqCst))
            .map(|g| GuardTask::from_entry(Arc::clone(g), registry.clone()))
            .collect();

        let mut push_guards = |owner: &str, guards: &[RouteGuard]| {
            for (index, guard) in guards.iter().enumerate() {
                let id = format!("{}:{}#{}", phase, owner, index);
                tasks.push(GuardTask::from_route_guard(id, guard));
            }
        };

        match phase {
            GuardPhase::BeforeRouteLeave => {
                // 子组件先离开
                for record in from.matched.iter().rev() {
                    if !contains_record(&to.matched, record) {
                        if let Some(component) = &record.component {
                            push_guards(&record.path, &component.before_route_leave);
                        }
                    }
                }
            }
            GuardPhase::BeforeEach => {}
            GuardPhase::BeforeEnter => {
                for record in &to.matched {
                    if !contains_record(&from.matched, record) {
                        push_guards(&record.path, &record.guards);
                    }
                }
            }
            GuardPhase::BeforeRouteEnter => {
                for record in &to.matched {
                    if !contains_record(&from.matched, record) {
                        if let Some(component) = &record.component {
                            push_guards(&record.path, &component.before_route_enter);
                        }
                    }
                }
            }
            GuardPhase::BeforeRouteUpdate => {
                if let Some(record) = to.leaf() {
                    if let Some(component) = &record.component {
                        push_guards(&record.path, &component.before_route_update);
                    }
                }
            }
        }

        for (order, task) in tasks.iter_mut().enumerate() {
            task.order = order;
        }
        // 稳定排序，同优先级保持注册顺序
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority));
        tasks
    }

    async fn run_after_hooks(&self, to: &Arc<Location>, from: &Arc<Location>) {
        let hooks: Vec<Arc<HookEntry>> = read(&self.registry.hooks).clone();
        for entry in hooks {
            let call =
                AssertUnwindSafe(entry.hook.after_each(Arc::clone(to), Arc::clone(from))).catch_unwind();
            match tokio::time::timeout(self.timeout(), call).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => {
                    warn!(hook = %entry.hook.name(), error = %e, "afterEach 钩子执行失败");
                }
                Ok(Err(_)) => {
                    warn!(hook = %entry.hook.name(), "afterEach 钩子发生 panic");
                }
                Err(_) => {
                    warn!(hook = %entry.hook.name(), timeout_ms = self.config.timeout_ms, "afterEach 钩子执行超时");
                }
            }
        }
    }

    /// 追加执行历史
    pub(crate) fn record_history(&self, to: &Location, from: &Location, result: &ExecutionResult) {
        if self.config.history_limit == 0 {
            return;
        }
        let mut history = lock(&self.history);
        while history.len() >= self.config.history_limit {
            history.pop_front();
        }
        history.push_back(ExecutionRecord::new(to, from, result));
    }

    /// 执行历史，最早的在前
    pub fn execution_history(&self) -> Vec<ExecutionRecord> {
        lock(&self.history).iter().cloned().collect()
    }

    /// 清空执行历史
    pub fn clear_history(&self) {
        lock(&self.history).clear();
    }
}

fn contains_record(records: &[Arc<RouteRecord>], record: &Arc<RouteRecord>) -> bool {
    records.iter().any(|r| Arc::ptr_eq(r, record))
}

/// `to` 与 `from` 的叶子是否为同名组件
fn same_component(to: &Location, from: &Location) -> bool {
    match (to.component_name(), from.component_name()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
