//! # Chips Navigator - 薯片导航内核
//!
//! 在任何视图渲染之前，为每一次导航请求给出匹配的路由和放行结论：
//!
//! - **路由匹配**: 精确、前缀、正则、模糊四种模式，支持参数校验、命名路由、嵌套路由和路由分组
//! - **匹配缓存**: LRU + TTL，命中统计，可选后台清扫
//! - **守卫管线**: `beforeRouteLeave -> beforeEach -> beforeEnter -> beforeRouteEnter -> beforeRouteUpdate`，
//!   每个守卫独立超时，导航成功后执行 `afterEach`
//! - **并行守卫**: 推断守卫依赖，无依赖的守卫并发执行，结果与串行执行一致
//! - **中间件链**: 按优先级和条件执行，支持终止、跳过、重试和自定义错误策略
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use chips_navigator::{
//!     guard_sync, GuardContext, GuardOutcome, Location, Navigator, NavigatorConfig, RouteRecord,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> chips_navigator::Result<()> {
//!     let navigator = Navigator::new(NavigatorConfig::builder().parallel_guards(true).build())?;
//!     navigator
//!         .add_routes(vec![
//!             RouteRecord::new("/login").name("login"),
//!             RouteRecord::new("/admin").meta("requiresAuth", true),
//!         ])
//!         .await?;
//!
//!     navigator.before_each(guard_sync("authenticate", |ctx: &GuardContext| {
//!         if ctx.to.meta.contains_key("requiresAuth") {
//!             GuardOutcome::redirect("/login")
//!         } else {
//!             GuardOutcome::Allow
//!         }
//!     }));
//!
//!     let navigation = navigator.navigate("/admin", Arc::new(Location::new("/"))).await?;
//!     assert_eq!(navigation.location.path, "/login");
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `router` - 位置、路由记录、匹配器和匹配缓存
//! - `guard` - 守卫类型、守卫管线和并行执行器
//! - `middleware` - 中间件链
//! - `api` - 导航引擎
//! - `core` - 配置
//! - `utils` - 错误类型、日志、ID 和取消令牌

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod api;
pub mod core;
pub mod guard;
pub mod middleware;
pub mod router;
pub mod utils;

// 重导出常用类型，方便使用
pub use router::{
    CacheStats, ComponentDef, Location, MatchCache, MatchMode, MatchResult, NavigationTarget,
    ParamValidator, RouteGroup, RouteGuard, RouteMatcher, RouteRecord, ValidationError,
};

pub use guard::{
    guard_fn, guard_sync, hook_fn, AfterEachHook, ExecutionRecord, ExecutionResult, GuardContext,
    GuardHandle, GuardOptions, GuardOutcome, GuardPhase, GuardPipeline, NavigationGuard,
    ParallelGuardExecutor, PermissionGuard,
};

pub use middleware::{
    middleware_fn, ChainOutcome, ErrorAction, ErrorStrategy, Middleware, MiddlewareChain,
    MiddlewareCondition, MiddlewareContext, MiddlewareFlow, MiddlewareHandle, MiddlewareOptions,
    PerformanceReport,
};

pub use utils::{error_code, generate_id, generate_uuid, CancellationToken, NavError, Result};
pub use utils::logger::{LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};

pub use core::config::{
    CacheConfig, DependencyInference, GuardConfig, LogConfig, MatcherConfig, MiddlewareConfig,
    NavigatorConfig, NavigatorConfigBuilder,
};
pub use api::{Navigation, NavigationStatsSnapshot, Navigator};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
