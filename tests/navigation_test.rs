//! 导航内核集成测试
//!
//! 通过公开 API 验证匹配、缓存、守卫管线、并行执行器和中间件链的组合行为。

use chips_navigator::guard::{GuardTask, GuardVerdict};
use chips_navigator::{
    guard_fn, guard_sync, hook_fn, middleware_fn, CancellationToken, ComponentDef, GuardContext,
    GuardOptions, GuardOutcome, GuardPhase, Location, MatchCache, MatchMode, MiddlewareCondition,
    MiddlewareFlow, MiddlewareOptions, NavError, NavigationTarget, Navigator, NavigatorConfig,
    ParallelGuardExecutor, PermissionGuard, RouteGroup, RouteGuard, RouteRecord,
};
use chips_navigator::{DependencyInference, ParamValidator};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn root() -> Arc<Location> {
    Arc::new(Location::new("/"))
}

async fn navigator_with(config: NavigatorConfig) -> Navigator {
    let navigator = Navigator::new(config).unwrap();
    navigator
        .add_routes(vec![
            RouteRecord::new("/").name("home"),
            RouteRecord::new("/login").name("login"),
            RouteRecord::new("/a/:id").name("a"),
            RouteRecord::new("/dashboard").meta("requiresAuth", true),
        ])
        .await
        .unwrap();
    navigator
}

async fn navigator() -> Navigator {
    navigator_with(NavigatorConfig::default()).await
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(&GuardContext) -> bool + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let inner = Arc::clone(&count);
    (count, move |_ctx: &GuardContext| {
        inner.fetch_add(1, Ordering::SeqCst);
        true
    })
}

// ============================================================================
// 匹配与缓存
// ============================================================================

#[tokio::test]
async fn test_dynamic_segment_extracts_params() {
    let navigator = navigator().await;

    let result = navigator.resolve("/a/123").await;
    assert!(result.matched);
    assert_eq!(result.params.get("id").map(String::as_str), Some("123"));

    // 段数不同不匹配
    assert!(!navigator.resolve("/a/123/extra").await.matched);
}

#[tokio::test]
async fn test_validation_failure_keeps_params() {
    let navigator = navigator().await;
    navigator
        .add_route(RouteRecord::new("/order/:id").validator(ParamValidator::numeric("id")))
        .await
        .unwrap();

    let result = navigator.resolve("/order/abc").await;
    assert!(!result.matched);
    assert_eq!(result.params.get("id").map(String::as_str), Some("abc"));
    assert_eq!(result.validation_errors.len(), 1);

    assert!(navigator.resolve("/order/42").await.matched);
    match navigator.navigate("/order/abc", root()).await {
        Err(NavError::MatchValidation(message)) => assert!(message.contains("id=abc")),
        other => panic!("expected MatchValidation, got {:?}", other.map(|n| n.result.allowed)),
    }
}

#[tokio::test]
async fn test_match_modes() {
    let navigator = navigator().await;
    navigator
        .add_routes(vec![
            RouteRecord::new("/docs"),
            RouteRecord::new("/settings/profile"),
            RouteRecord::new("/files").pattern(r"^/files/(?P<name>[\w.]+)$"),
        ])
        .await
        .unwrap();

    let prefix = navigator
        .resolve_with_mode("/docs/guide/intro", MatchMode::Prefix)
        .await;
    assert_eq!(prefix.record.unwrap().path, "/docs");

    let regex = navigator
        .resolve_with_mode("/files/report.pdf", MatchMode::Regex)
        .await;
    assert_eq!(regex.params.get("name").map(String::as_str), Some("report.pdf"));

    let fuzzy = navigator
        .resolve_with_mode("/setprof", MatchMode::Fuzzy)
        .await;
    assert_eq!(fuzzy.record.unwrap().path, "/settings/profile");
}

#[tokio::test(start_paused = true)]
async fn test_cache_ttl_expiry() {
    let cache = MatchCache::new(16, Duration::ZERO);
    let record = Arc::new(RouteRecord::new("/a/:id"));
    let params = BTreeMap::from([("id".to_string(), "1".to_string())]);

    cache.set("/a/1", vec![Arc::clone(&record)], params, Some(Duration::from_millis(1000)));

    tokio::time::advance(Duration::from_millis(999)).await;
    let entry = cache.get("/a/1").unwrap();
    assert!(Arc::ptr_eq(&entry.records[0], &record));

    tokio::time::advance(Duration::from_millis(2)).await;
    assert!(cache.get("/a/1").is_none());
    assert_eq!(cache.stats().misses, 1);
}

#[tokio::test]
async fn test_cache_lru_eviction() {
    let cache = MatchCache::new(3, Duration::ZERO);
    for key in ["/a", "/b", "/c"] {
        cache.set(key, Vec::new(), BTreeMap::new(), None);
    }
    // 访问 /a 后 /b 成为最久未访问
    assert!(cache.get("/a").is_some());
    cache.set("/d", Vec::new(), BTreeMap::new(), None);

    assert_eq!(cache.len(), 3);
    assert!(cache.get("/b").is_none());
    for key in ["/a", "/c", "/d"] {
        assert!(cache.get(key).is_some(), "{} should survive", key);
    }
}

#[tokio::test]
async fn test_query_order_collapses_to_one_cache_key() {
    let mut config = NavigatorConfig::default();
    config.cache.include_query = true;
    let navigator = navigator_with(config).await;

    navigator.resolve("/a/1?b=2&a=1").await;
    let second = navigator.resolve("/a/1?a=1&b=2").await;

    assert!(second.from_cache);
    assert_eq!(navigator.cache_stats().unwrap().size, 1);
}

#[tokio::test]
async fn test_route_removal_invalidates_cache() {
    let navigator = navigator().await;
    assert!(navigator.resolve("/a/1").await.matched);
    assert!(navigator.resolve("/a/1").await.from_cache);

    navigator.remove_route("/a/:id").await.unwrap();
    assert!(!navigator.resolve("/a/1").await.matched);
}

#[tokio::test]
async fn test_route_changes_are_not_served_from_stale_cache() {
    let navigator = navigator().await;
    let first = navigator.resolve("/a/1").await;
    assert_eq!(first.record.as_ref().map(|r| r.path.as_str()), Some("/a/:id"));
    assert!(navigator.resolve("/a/1").await.from_cache);

    // 新增的静态路由优先于已缓存的动态匹配
    navigator
        .add_routes(vec![RouteRecord::new("/a/1").name("a-one")])
        .await
        .unwrap();
    let result = navigator.resolve("/a/1").await;
    assert!(!result.from_cache);
    assert_eq!(result.record.as_ref().map(|r| r.path.as_str()), Some("/a/1"));
    assert!(result.params.is_empty());
    assert!(navigator.resolve("/a/1").await.from_cache);

    // 移除静态路由后回落到动态路由
    navigator.remove_route("/a/1").await.unwrap();
    let result = navigator.resolve("/a/1").await;
    assert!(!result.from_cache);
    assert_eq!(result.record.as_ref().map(|r| r.path.as_str()), Some("/a/:id"));
    assert_eq!(result.params.get("id").map(String::as_str), Some("1"));
}

// ============================================================================
// 守卫管线
// ============================================================================

#[tokio::test]
async fn test_leave_denial_prevents_before_each() {
    let navigator = navigator().await;
    navigator
        .add_route(
            RouteRecord::new("/editor").component(
                ComponentDef::new("Editor")
                    .on_leave(RouteGuard::new(guard_sync("unsaved", |_ctx: &GuardContext| false))),
            ),
        )
        .await
        .unwrap();

    let (before_each_calls, guard) = counter();
    navigator.before_each(guard_sync("counter", guard));

    let from = Arc::new(navigator.resolve_location(&"/editor".into()).await.unwrap());
    let to = Arc::new(navigator.resolve_location(&"/login".into()).await.unwrap());
    let result = navigator.run_pipeline(to, from).await;

    assert!(!result.allowed);
    assert!(result.redirect.is_none());
    assert_eq!(result.stopped_at, Some(GuardPhase::BeforeRouteLeave));
    assert_eq!(before_each_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_phase_sequence_on_full_navigation() {
    let navigator = navigator().await;
    let log = Arc::new(Mutex::new(Vec::new()));
    let logged = |label: &'static str| {
        let log = Arc::clone(&log);
        guard_sync(label, move |_ctx: &GuardContext| {
            log.lock().unwrap().push(label);
            true
        })
    };

    navigator
        .add_routes(vec![
            RouteRecord::new("/from").component(
                ComponentDef::new("From").on_leave(RouteGuard::new(logged("leave"))),
            ),
            RouteRecord::new("/to")
                .guard(RouteGuard::new(logged("enter")))
                .component(ComponentDef::new("To").on_enter(RouteGuard::new(logged("component"))))
        ])
        .await
        .unwrap();
    navigator.before_each(logged("each"));

    let from = Arc::new(navigator.resolve_location(&"/from".into()).await.unwrap());
    let to = Arc::new(navigator.resolve_location(&"/to".into()).await.unwrap());
    assert!(navigator.run_pipeline(to, from).await.allowed);
    assert_eq!(*log.lock().unwrap(), vec!["leave", "each", "enter", "component"]);
}

#[tokio::test]
async fn test_priority_then_registration_order() {
    let navigator = navigator().await;
    let log = Arc::new(Mutex::new(Vec::new()));
    for (label, priority) in [("low", 0), ("high", 10), ("low-2", 0), ("mid", 5)] {
        let log = Arc::clone(&log);
        navigator.register_guard(
            GuardPhase::BeforeEach,
            guard_sync(label, move |_ctx: &GuardContext| {
                log.lock().unwrap().push(label);
                true
            }),
            GuardOptions::new().priority(priority),
        );
    }

    navigator.navigate("/login", root()).await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["high", "mid", "low", "low-2"]);
}

#[tokio::test]
async fn test_named_redirect_from_guard() {
    let navigator = navigator().await;
    navigator.before_each(guard_sync("authenticate", |ctx: &GuardContext| {
        if ctx.to.meta.contains_key("requiresAuth") {
            GuardOutcome::redirect(NavigationTarget::named("login"))
        } else {
            GuardOutcome::Allow
        }
    }));

    let navigation = navigator.navigate("/dashboard", root()).await.unwrap();
    assert!(navigation.is_allowed());
    assert_eq!(navigation.location.path, "/login");
    assert_eq!(navigation.redirects, vec!["@login"]);

    let history = navigator.execution_history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].redirect.as_deref(), Some("@login"));
    assert!(history[1].allowed);
}

#[tokio::test(start_paused = true)]
async fn test_guard_timeout_denies() {
    let navigator = navigator_with(NavigatorConfig::builder().guard_timeout_ms(50).build()).await;
    navigator.before_each(guard_fn("slow", |_ctx| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        true
    }));

    let result = navigator
        .run_pipeline(Arc::new(Location::new("/login")), root())
        .await;
    assert!(!result.allowed);
    assert!(matches!(
        result.error,
        Some(NavError::GuardTimeout { ref guard, timeout_ms: 50 }) if guard == "slow"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_pipeline() {
    let navigator = navigator().await;
    navigator.before_each(guard_fn("remote", |ctx: GuardContext| async move {
        ctx.cancel.cancelled().await;
        true
    }));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let result = navigator
        .run_pipeline_with_cancel(Arc::new(Location::new("/login")), root(), cancel)
        .await;
    assert!(!result.allowed);
    assert!(matches!(result.error, Some(NavError::Cancelled)));
}

#[tokio::test]
async fn test_after_each_failure_is_not_propagated() {
    let navigator = navigator().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let inner = Arc::clone(&calls);
    navigator.after_each(hook_fn("analytics", move |_to, _from| {
        let inner = Arc::clone(&inner);
        async move {
            inner.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("collector offline"))
        }
    }));

    let navigation = navigator.navigate("/login", root()).await.unwrap();
    assert!(navigation.is_allowed());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // 被拒绝的导航不触发 afterEach
    navigator.before_each(guard_sync("deny", |_ctx: &GuardContext| false));
    let navigation = navigator.navigate("/login", root()).await.unwrap();
    assert!(!navigation.is_allowed());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_after_each_panic_is_not_propagated() {
    let navigator = navigator().await;
    navigator.after_each(hook_fn(
        "exploding",
        |_to, _from| -> std::future::Ready<anyhow::Result<()>> { panic!("hook exploded") },
    ));

    let navigation = navigator.navigate("/login", root()).await.unwrap();
    assert!(navigation.is_allowed());

    // 后续导航不受影响
    let navigation = navigator.navigate("/a/1", root()).await.unwrap();
    assert!(navigation.is_allowed());
}

#[tokio::test]
async fn test_guard_register_unregister_idempotent() {
    let navigator = navigator().await;
    let before = navigator.guards().len();

    let (calls, guard) = counter();
    let handle = navigator.before_each(guard_sync("temp", guard));
    assert_eq!(navigator.guards().len(), before + 1);
    assert!(handle.unregister());
    assert!(!handle.unregister());
    assert_eq!(navigator.guards().len(), before);

    navigator.navigate("/login", root()).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_once_guard_runs_once() {
    let navigator = navigator().await;
    let (calls, guard) = counter();
    navigator.register_guard(
        GuardPhase::BeforeEach,
        guard_sync("intro", guard),
        GuardOptions::new().once(),
    );

    navigator.navigate("/login", root()).await.unwrap();
    navigator.navigate("/", root()).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(navigator.guards().is_empty());
}

#[tokio::test]
async fn test_permission_guard_with_nested_group() {
    let navigator = navigator().await;
    navigator
        .add_group(
            RouteGroup::new("/admin")
                .permission("admin")
                .route(RouteRecord::new("/users").name("admin-users")),
        )
        .await
        .unwrap();
    navigator.before_each(PermissionGuard::with_permissions(["users:read"]).redirect_to("/login"));

    let navigation = navigator.navigate("/admin/users", root()).await.unwrap();
    assert_eq!(navigation.location.path, "/login");
    assert_eq!(navigation.redirects, vec!["/login"]);
}

// ============================================================================
// 并行执行
// ============================================================================

async fn redirect_race(parallel: bool) -> Option<NavigationTarget> {
    let navigator =
        navigator_with(NavigatorConfig::builder().parallel_guards(parallel).build()).await;
    navigator.register_guard(
        GuardPhase::BeforeEach,
        guard_fn("A", |_ctx| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            true
        }),
        GuardOptions::new().priority(10),
    );
    navigator.register_guard(
        GuardPhase::BeforeEach,
        guard_fn("B", |_ctx| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            "/login"
        }),
        GuardOptions::new().priority(1),
    );

    navigator
        .run_pipeline(Arc::new(Location::new("/dashboard")), root())
        .await
        .redirect
}

#[tokio::test(start_paused = true)]
async fn test_parallel_matches_serial_outcome() {
    let expected = Some(NavigationTarget::Path("/login".to_string()));
    assert_eq!(redirect_race(false).await, expected);
    assert_eq!(redirect_race(true).await, expected);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_counts_reported() {
    let navigator = navigator_with(NavigatorConfig::builder().parallel_guards(true).build()).await;
    navigator.before_each(guard_sync("logging", |_ctx: &GuardContext| true));
    navigator.before_each(guard_sync("authenticate", |_ctx: &GuardContext| true));
    navigator.before_each(guard_sync("permission", |_ctx: &GuardContext| true));

    let result = navigator
        .run_pipeline(Arc::new(Location::new("/login")), root())
        .await;
    assert!(result.allowed);
    assert_eq!(result.parallel_count, 1);
    assert_eq!(result.serial_count, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_parallel_pipeline_runs_on_spawned_task() {
    let navigator = Arc::new(
        navigator_with(NavigatorConfig::builder().parallel_guards(true).build()).await,
    );
    navigator.before_each(guard_sync("logging", |_ctx: &GuardContext| true));
    navigator.before_each(guard_fn("authenticate", |_ctx| async {
        tokio::task::yield_now().await;
        GuardOutcome::Allow
    }));
    navigator.before_each(guard_sync("permission", |_ctx: &GuardContext| true));

    let spawned = Arc::clone(&navigator);
    let result = tokio::spawn(async move {
        spawned
            .run_pipeline(Arc::new(Location::new("/login")), root())
            .await
    })
    .await
    .unwrap();

    assert!(result.allowed);
    assert_eq!(result.serial_count, 2);
}

#[tokio::test]
async fn test_circular_dependency_aborts_before_any_guard() {
    let navigator = navigator_with(NavigatorConfig::builder().parallel_guards(true).build()).await;
    let (calls_a, guard_a) = counter();
    let (calls_b, guard_b) = counter();
    navigator.register_guard(
        GuardPhase::BeforeEach,
        guard_sync("A", guard_a),
        GuardOptions::new().depends_on("B"),
    );
    navigator.register_guard(
        GuardPhase::BeforeEach,
        guard_sync("B", guard_b),
        GuardOptions::new().depends_on("A"),
    );

    let result = navigator
        .run_pipeline(Arc::new(Location::new("/login")), root())
        .await;

    assert!(!result.allowed);
    let err = result.error.expect("cycle should be reported");
    assert!(err.is_fatal());
    match err {
        NavError::CircularDependency(path) => assert!(path.contains(" -> ")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(calls_a.load(Ordering::SeqCst), 0);
    assert_eq!(calls_b.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_executor_reports_first_denial_in_order() {
    let executor = ParallelGuardExecutor::new(DependencyInference::Both, Duration::from_secs(1));
    let tasks = vec![
        GuardTask::new("1", Arc::new(guard_sync("first", |_ctx: &GuardContext| true))),
        GuardTask::new("2", Arc::new(guard_sync("second", |_ctx: &GuardContext| false)))
            .with_order(1),
        GuardTask::new("3", Arc::new(guard_sync("third", |_ctx: &GuardContext| "/x")))
            .with_order(2),
    ];
    let ctx = GuardContext::new(
        Arc::new(Location::new("/to")),
        root(),
        GuardPhase::BeforeEach,
        CancellationToken::new(),
    );

    let report = executor.execute(&tasks, &ctx).await.unwrap();
    assert!(matches!(report.verdict, GuardVerdict::Deny));
    assert_eq!(report.parallel_count, 3);
}

// ============================================================================
// 中间件
// ============================================================================

#[tokio::test]
async fn test_middleware_priority_order() {
    let navigator = navigator().await;
    let condition = || MiddlewareCondition::new().path("/**").unwrap();
    let noop = |name: &'static str| {
        middleware_fn(name, |_ctx| async { Ok(MiddlewareFlow::Continue) })
    };

    navigator.use_middleware(MiddlewareOptions::new(noop("p5")).priority(5).condition(condition()));
    navigator.use_middleware(MiddlewareOptions::new(noop("p10")).priority(10).condition(condition()));

    let report = navigator
        .before_middleware()
        .execute(Arc::new(Location::new("/login")), root())
        .await;
    assert!(report.position("p10").unwrap() < report.position("p5").unwrap());
}

#[tokio::test]
async fn test_middleware_redirect_is_followed() {
    let navigator = navigator().await;
    navigator.use_middleware(
        MiddlewareOptions::new(middleware_fn("auth", |_ctx| async {
            Ok(MiddlewareFlow::redirect("/login"))
        }))
        .condition(MiddlewareCondition::new().meta("requiresAuth", true)),
    );

    let navigation = navigator.navigate("/dashboard", root()).await.unwrap();
    assert!(navigation.is_allowed());
    assert_eq!(navigation.location.path, "/login");
}

#[tokio::test]
async fn test_middleware_register_unregister_idempotent() {
    let navigator = navigator().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let inner = Arc::clone(&calls);
    let before = navigator.before_middleware().len();

    let handle = navigator.use_middleware(MiddlewareOptions::new(middleware_fn(
        "temp",
        move |_ctx| {
            let inner = Arc::clone(&inner);
            async move {
                inner.fetch_add(1, Ordering::SeqCst);
                Ok(MiddlewareFlow::Continue)
            }
        },
    )));
    assert!(handle.unregister());
    assert!(!handle.unregister());
    assert_eq!(navigator.before_middleware().len(), before);

    navigator.navigate("/login", root()).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
