//! 导航引擎
//!
//! `Navigator` 持有匹配器、匹配缓存、守卫管线和前后两条中间件链，
//! 是导航内核对外的主要入口。所有状态都属于实例本身，没有全局单例。
//!
//! # 示例
//!
//! ```rust,no_run
//! use chips_navigator::{guard_sync, GuardContext, Location, Navigator, NavigatorConfig, RouteRecord};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> chips_navigator::Result<()> {
//!     let navigator = Navigator::new(NavigatorConfig::default())?;
//!     navigator
//!         .add_routes(vec![
//!             RouteRecord::new("/").name("home"),
//!             RouteRecord::new("/user/:id").name("user"),
//!         ])
//!         .await?;
//!
//!     navigator.before_each(guard_sync("log", |ctx: &GuardContext| {
//!         println!("-> {}", ctx.to.path);
//!         true
//!     }));
//!
//!     let from = Arc::new(Location::new("/"));
//!     let navigation = navigator.navigate("/user/42", from).await?;
//!     assert!(navigation.result.allowed);
//!     Ok(())
//! }
//! ```

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::core::config::NavigatorConfig;
use crate::guard::{
    AfterEachHook, ExecutionRecord, ExecutionResult, GuardHandle, GuardOptions, GuardPhase,
    GuardPipeline, NavigationGuard,
};
use crate::middleware::{ChainOutcome, MiddlewareChain, MiddlewareHandle, MiddlewareOptions};
use crate::router::validator;
use crate::router::{
    CacheStats, Location, MatchCache, MatchMode, MatchResult, NavigationTarget, RouteGroup,
    RouteMatcher, RouteRecord, SweeperHandle,
};
use crate::utils::{CancellationToken, NavError, Result};

// ============================================================================
// 统计
// ============================================================================

/// 导航统计
#[derive(Debug, Default)]
pub struct NavigationStats {
    total: AtomicU64,
    allowed: AtomicU64,
    denied: AtomicU64,
    redirected: AtomicU64,
    errored: AtomicU64,
    total_latency_us: AtomicU64,
    min_latency_us: AtomicU64,
    max_latency_us: AtomicU64,
}

impl NavigationStats {
    /// 创建统计实例
    pub fn new() -> Self {
        Self {
            min_latency_us: AtomicU64::new(u64::MAX),
            ..Default::default()
        }
    }

    /// 记录一次管线执行
    pub fn record(&self, result: &ExecutionResult, latency_us: u64) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);

        let counter = if result.allowed {
            &self.allowed
        } else if result.error.is_some() {
            &self.errored
        } else if result.redirect.is_some() {
            &self.redirected
        } else {
            &self.denied
        };
        counter.fetch_add(1, Ordering::Relaxed);

        self.min_latency_us.fetch_min(latency_us, Ordering::Relaxed);
        self.max_latency_us.fetch_max(latency_us, Ordering::Relaxed);
    }

    /// 获取统计快照
    pub fn snapshot(&self) -> NavigationStatsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let total_latency = self.total_latency_us.load(Ordering::Relaxed);
        let min_latency = self.min_latency_us.load(Ordering::Relaxed);

        NavigationStatsSnapshot {
            total,
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            redirected: self.redirected.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
            avg_latency_us: if total > 0 { total_latency / total } else { 0 },
            min_latency_us: if min_latency == u64::MAX { 0 } else { min_latency },
            max_latency_us: self.max_latency_us.load(Ordering::Relaxed),
        }
    }

    /// 重置统计
    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.allowed.store(0, Ordering::Relaxed);
        self.denied.store(0, Ordering::Relaxed);
        self.redirected.store(0, Ordering::Relaxed);
        self.errored.store(0, Ordering::Relaxed);
        self.total_latency_us.store(0, Ordering::Relaxed);
        self.min_latency_us.store(u64::MAX, Ordering::Relaxed);
        self.max_latency_us.store(0, Ordering::Relaxed);
    }
}

/// 导航统计快照
#[derive(Debug, Clone, Serialize)]
pub struct NavigationStatsSnapshot {
    /// 管线执行总数
    pub total: u64,
    /// 放行数
    pub allowed: u64,
    /// 拒绝数（不含重定向和错误）
    pub denied: u64,
    /// 重定向数
    pub redirected: u64,
    /// 出错数
    pub errored: u64,
    /// 平均耗时（微秒）
    pub avg_latency_us: u64,
    /// 最小耗时（微秒）
    pub min_latency_us: u64,
    /// 最大耗时（微秒）
    pub max_latency_us: u64,
}

// ============================================================================
// 导航结果
// ============================================================================

/// 一次完整导航（含重定向）的结果
#[derive(Debug, Clone)]
pub struct Navigation {
    /// 最后一次管线执行的目标位置
    pub location: Arc<Location>,
    /// 最后一次管线执行的结果
    pub result: ExecutionResult,
    /// 依次经过的重定向地址
    pub redirects: Vec<String>,
}

impl Navigation {
    /// 导航是否最终成功
    pub fn is_allowed(&self) -> bool {
        self.result.allowed
    }
}

// ============================================================================
// 导航引擎
// ============================================================================

/// 导航引擎
pub struct Navigator {
    config: NavigatorConfig,
    matcher: RouteMatcher,
    cache: Option<Arc<MatchCache>>,
    _sweeper: Option<SweeperHandle>,
    guards: GuardPipeline,
    before: MiddlewareChain,
    after: MiddlewareChain,
    stats: NavigationStats,
}

impl Navigator {
    /// 创建导航引擎
    ///
    /// 配置了后台清扫间隔时需要在 tokio 运行时中调用，否则只做惰性过期。
    pub fn new(config: NavigatorConfig) -> Result<Self> {
        config.validate()?;

        let (matcher, cache, sweeper) = if config.cache.enabled {
            let cache = Arc::new(MatchCache::new(
                config.cache.max_size,
                Duration::from_millis(config.cache.default_ttl_ms),
            ));
            let sweeper =
                cache.start_sweeper(Duration::from_millis(config.cache.sweep_interval_ms));
            if sweeper.is_none() && config.cache.sweep_interval_ms > 0 {
                warn!("不在 tokio 运行时中，缓存后台清扫未启动");
            }
            let matcher = RouteMatcher::with_cache(
                config.matcher.clone(),
                Arc::clone(&cache),
                config.cache.include_query,
            );
            (matcher, Some(cache), sweeper)
        } else {
            (RouteMatcher::new(config.matcher.clone()), None, None)
        };

        let guards = GuardPipeline::new(config.guards.clone());
        let before = MiddlewareChain::new(config.middleware.clone()).with_label("before");
        let after = MiddlewareChain::new(config.middleware.clone()).with_label("after");

        info!(
            cache = config.cache.enabled,
            parallel_guards = config.guards.parallel,
            default_mode = %config.matcher.default_mode,
            "导航引擎已创建"
        );

        Ok(Self {
            config,
            matcher,
            cache,
            _sweeper: sweeper,
            guards,
            before,
            after,
            stats: NavigationStats::new(),
        })
    }

    /// 使用默认配置创建
    pub fn with_defaults() -> Result<Self> {
        Self::new(NavigatorConfig::default())
    }

    /// 引擎配置
    pub fn config(&self) -> &NavigatorConfig {
        &self.config
    }

    /// 路由匹配器
    pub fn matcher(&self) -> &RouteMatcher {
        &self.matcher
    }

    /// 守卫管线
    pub fn guards(&self) -> &GuardPipeline {
        &self.guards
    }

    /// 守卫执行前的中间件链
    pub fn before_middleware(&self) -> &MiddlewareChain {
        &self.before
    }

    /// 导航成功后的中间件链
    pub fn after_middleware(&self) -> &MiddlewareChain {
        &self.after
    }

    // ==================== 路由注册 ====================

    /// 注册路由
    pub async fn add_route(&self, record: RouteRecord) -> Result<()> {
        self.matcher.add_route(record).await
    }

    /// 批量注册路由
    pub async fn add_routes(&self, records: Vec<RouteRecord>) -> Result<()> {
        self.matcher.add_routes(records).await
    }

    /// 注册路由分组
    pub async fn add_group(&self, group: RouteGroup) -> Result<()> {
        self.matcher.add_group(group).await
    }

    /// 移除路由及其子路由，返回移除数量
    pub async fn remove_route(&self, path: &str) -> Result<usize> {
        self.matcher.remove_route(path).await
    }

    // ==================== 守卫与中间件注册 ====================

    /// 注册指定阶段的守卫
    pub fn register_guard(
        &self,
        phase: GuardPhase,
        guard: impl NavigationGuard + 'static,
        options: GuardOptions,
    ) -> GuardHandle {
        self.guards.register(phase, guard, options)
    }

    /// 注册全局 beforeEach 守卫
    pub fn before_each(&self, guard: impl NavigationGuard + 'static) -> GuardHandle {
        self.guards.before_each(guard)
    }

    /// 注册 afterEach 钩子
    pub fn after_each(&self, hook: impl AfterEachHook + 'static) -> GuardHandle {
        self.guards.after_each(hook)
    }

    /// 注册守卫执行前的中间件
    pub fn use_middleware(&self, options: MiddlewareOptions) -> MiddlewareHandle {
        self.before.register(options)
    }

    /// 注册导航成功后的中间件
    pub fn use_after_middleware(&self, options: MiddlewareOptions) -> MiddlewareHandle {
        self.after.register(options)
    }

    // ==================== 解析 ====================

    /// 使用默认模式匹配路径
    pub async fn resolve(&self, path: &str) -> MatchResult {
        self.matcher.match_path(path, None).await
    }

    /// 使用指定模式匹配路径
    pub async fn resolve_with_mode(&self, path: &str, mode: MatchMode) -> MatchResult {
        self.matcher.match_path(path, Some(mode)).await
    }

    /// 把导航目标解析为完整位置
    ///
    /// 未命中返回 `RouteNotFound`，参数校验失败返回 `MatchValidation`。
    pub async fn resolve_location(&self, target: &NavigationTarget) -> Result<Location> {
        let raw = match target {
            NavigationTarget::Path(path) => Location::parse(path),
            NavigationTarget::Named {
                name,
                params,
                query,
            } => {
                let path = self.matcher.resolve_named(name, params).await?;
                Location {
                    query: query.clone(),
                    ..Location::new(path)
                }
            }
        };

        let result = self.matcher.match_location(&raw, None).await;
        if result.has_validation_errors() {
            return Err(validator::into_nav_error(&result.validation_errors));
        }
        if !result.matched {
            return Err(NavError::RouteNotFound(raw.path));
        }
        Ok(result.to_location(&raw))
    }

    // ==================== 管线 ====================

    /// 执行一次导航管线
    ///
    /// 返回 `allowed = false` 且带重定向时，调用方应以重定向目标重新调用；
    /// 不带重定向时应保持当前位置不变。
    pub async fn run_pipeline(&self, to: Arc<Location>, from: Arc<Location>) -> ExecutionResult {
        self.run_pipeline_with_cancel(to, from, CancellationToken::new())
            .await
    }

    /// 执行一次可取消的导航管线
    #[instrument(skip_all, fields(to = %to.path, from = %from.path))]
    pub async fn run_pipeline_with_cancel(
        &self,
        to: Arc<Location>,
        from: Arc<Location>,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let started = Instant::now();

        let mut result = match self.run_before_middleware(&to, &from, &cancel).await {
            Some(mut blocked) => {
                blocked.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.guards.record_history(&to, &from, &blocked);
                blocked
            }
            None => {
                self.guards
                    .execute(Arc::clone(&to), Arc::clone(&from), cancel.clone())
                    .await
            }
        };

        if result.allowed {
            let report = self
                .after
                .execute_with_cancel(Arc::clone(&to), Arc::clone(&from), cancel)
                .await;
            if !report.outcome.is_completed() {
                warn!(outcome = ?report.outcome, "后置中间件未完整执行");
            }
        }

        let elapsed = started.elapsed();
        result.duration_ms = elapsed.as_secs_f64() * 1000.0;
        self.stats.record(&result, elapsed.as_micros() as u64);
        result
    }

    /// 执行前置中间件，链被终止时返回对应的执行结果
    async fn run_before_middleware(
        &self,
        to: &Arc<Location>,
        from: &Arc<Location>,
        cancel: &CancellationToken,
    ) -> Option<ExecutionResult> {
        if self.before.is_empty() {
            return None;
        }

        let report = self
            .before
            .execute_with_cancel(Arc::clone(to), Arc::clone(from), cancel.clone())
            .await;
        match report.outcome {
            ChainOutcome::Completed => None,
            ChainOutcome::Redirect { middleware, target } => {
                debug!(middleware = %middleware, target = %target, "前置中间件要求重定向");
                Some(ExecutionResult::redirect(target))
            }
            ChainOutcome::Aborted { middleware, reason } => {
                debug!(middleware = %middleware, reason = %reason, "前置中间件终止导航");
                Some(ExecutionResult::deny())
            }
            ChainOutcome::Failed(err) => Some(ExecutionResult::error(err)),
        }
    }

    /// 解析目标并执行管线，自动跟随重定向
    ///
    /// 重定向次数超过 `max_redirects` 时返回 `RedirectLimitExceeded`。
    pub async fn navigate(
        &self,
        target: impl Into<NavigationTarget>,
        from: Arc<Location>,
    ) -> Result<Navigation> {
        self.navigate_with_cancel(target, from, CancellationToken::new())
            .await
    }

    /// 可取消的 [`Navigator::navigate`]
    pub async fn navigate_with_cancel(
        &self,
        target: impl Into<NavigationTarget>,
        from: Arc<Location>,
        cancel: CancellationToken,
    ) -> Result<Navigation> {
        let mut target = target.into();
        let mut redirects: Vec<String> = Vec::new();

        loop {
            let to = Arc::new(self.resolve_location(&target).await?);
            let result = self
                .run_pipeline_with_cancel(Arc::clone(&to), Arc::clone(&from), cancel.clone())
                .await;

            let Some(next) = result.redirect.clone() else {
                return Ok(Navigation {
                    location: to,
                    result,
                    redirects,
                });
            };

            redirects.push(next.to_string());
            if redirects.len() > self.config.max_redirects {
                warn!(limit = self.config.max_redirects, chain = ?redirects, "重定向次数超过上限");
                return Err(NavError::RedirectLimitExceeded {
                    limit: self.config.max_redirects,
                    chain: redirects,
                });
            }
            debug!(from = %to.path, redirect = %next, "跟随重定向");
            target = next;
        }
    }

    // ==================== 只读观测 ====================

    /// 匹配缓存统计，未启用缓存时返回 `None`
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    /// 匹配缓存
    pub fn cache(&self) -> Option<&Arc<MatchCache>> {
        self.cache.as_ref()
    }

    /// 守卫执行历史
    pub fn execution_history(&self) -> Vec<ExecutionRecord> {
        self.guards.execution_history()
    }

    /// 清空执行历史
    pub fn clear_history(&self) {
        self.guards.clear_history();
    }

    /// 导航统计
    pub fn stats(&self) -> NavigationStatsSnapshot {
        self.stats.snapshot()
    }

    /// 重置导航统计和缓存命中计数
    pub fn reset_stats(&self) {
        self.stats.reset();
        if let Some(cache) = &self.cache {
            cache.reset_stats();
        }
    }

    /// 以名称 -> 路径的形式列出命名路由
    pub async fn named_routes(&self) -> BTreeMap<String, String> {
        self.matcher
            .routes()
            .await
            .iter()
            .filter_map(|r| r.name.clone().map(|name| (name, r.path.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{guard_sync, GuardContext};
    use crate::middleware::{middleware_fn, MiddlewareFlow};

    async fn navigator() -> Navigator {
        let navigator = Navigator::with_defaults().unwrap();
        navigator
            .add_routes(vec![
                RouteRecord::new("/").name("home"),
                RouteRecord::new("/login").name("login"),
                RouteRecord::new("/user/:id").name("user"),
            ])
            .await
            .unwrap();
        navigator
    }

    fn root() -> Arc<Location> {
        Arc::new(Location::new("/"))
    }

    #[tokio::test]
    async fn test_resolve_location() {
        let navigator = navigator().await;

        let location = navigator
            .resolve_location(&NavigationTarget::from("/user/7?tab=posts"))
            .await
            .unwrap();
        assert_eq!(location.name.as_deref(), Some("user"));
        assert_eq!(location.params.get("id").map(String::as_str), Some("7"));
        assert_eq!(location.query.get("tab").map(String::as_str), Some("posts"));

        let location = navigator
            .resolve_location(&NavigationTarget::named("user").with_param("id", "9"))
            .await
            .unwrap();
        assert_eq!(location.path, "/user/9");

        assert!(matches!(
            navigator.resolve_location(&NavigationTarget::from("/nope")).await,
            Err(NavError::RouteNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_navigate_follows_redirect() {
        let navigator = navigator().await;
        navigator.before_each(guard_sync("auth", |ctx: &GuardContext| {
            if ctx.to.path.starts_with("/user") {
                crate::guard::GuardOutcome::redirect(NavigationTarget::named("login"))
            } else {
                crate::guard::GuardOutcome::Allow
            }
        }));

        let navigation = navigator.navigate("/user/1", root()).await.unwrap();
        assert!(navigation.is_allowed());
        assert_eq!(navigation.location.path, "/login");
        assert_eq!(navigation.redirects, vec!["@login"]);

        let stats = navigator.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.redirected, 1);
        assert_eq!(stats.allowed, 1);
    }

    #[tokio::test]
    async fn test_redirect_limit() {
        let navigator = navigator().await;
        navigator.before_each(guard_sync("loop", |ctx: &GuardContext| {
            if ctx.to.path == "/login" {
                "/"
            } else {
                "/login"
            }
        }));

        match navigator.navigate("/", root()).await {
            Err(NavError::RedirectLimitExceeded { limit, chain }) => {
                assert_eq!(limit, 10);
                assert_eq!(chain.len(), 11);
            }
            other => panic!("unexpected result: {:?}", other.map(|n| n.result)),
        }
    }

    #[tokio::test]
    async fn test_before_middleware_blocks_guards() {
        let navigator = navigator().await;
        let guard_calls = Arc::new(AtomicU64::new(0));
        let calls = Arc::clone(&guard_calls);
        navigator.before_each(guard_sync("counter", move |_ctx: &GuardContext| {
            calls.fetch_add(1, Ordering::SeqCst);
            true
        }));
        navigator.use_middleware(MiddlewareOptions::new(middleware_fn(
            "maintenance",
            |_ctx| async { Ok(MiddlewareFlow::abort("down")) },
        )));

        let to = Arc::new(navigator.resolve_location(&"/login".into()).await.unwrap());
        let result = navigator.run_pipeline(to, root()).await;

        assert!(!result.allowed);
        assert!(result.redirect.is_none());
        assert_eq!(guard_calls.load(Ordering::SeqCst), 0);
        assert_eq!(navigator.execution_history().len(), 1);
        assert_eq!(navigator.stats().denied, 1);
    }

    #[tokio::test]
    async fn test_after_middleware_never_blocks() {
        let navigator = navigator().await;
        navigator.use_after_middleware(MiddlewareOptions::new(middleware_fn(
            "broken",
            |_ctx| async { Err(anyhow::anyhow!("analytics down")) },
        )));

        let navigation = navigator.navigate("/login", root()).await.unwrap();
        assert!(navigation.is_allowed());
    }

    #[tokio::test]
    async fn test_cache_stats_exposed() {
        let navigator = navigator().await;
        navigator.resolve("/user/1").await;
        navigator.resolve("/user/1").await;

        let stats = navigator.cache_stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);

        navigator.reset_stats();
        assert_eq!(navigator.cache_stats().unwrap().hits, 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = NavigatorConfig::default();
        config.guards.timeout_ms = 0;
        assert!(Navigator::new(config).is_err());
    }
}
