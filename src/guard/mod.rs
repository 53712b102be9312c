//! 守卫模块
//!
//! 包含导航守卫的完整生命周期：
//! - 守卫类型和返回值
//! - 分阶段的守卫管线
//! - 基于依赖推断的并行执行器
//! - 内置权限守卫

pub mod builtin;
pub mod parallel;
pub mod pipeline;
pub mod types;

// 重导出常用类型
pub use builtin::PermissionGuard;
pub use parallel::{DependencyGraph, GuardDependency, ParallelGuardExecutor};
pub use pipeline::{
    ExecutionRecord, ExecutionResult, GuardHandle, GuardOptions, GuardPipeline, GuardTask,
    PhaseReport,
};
pub use types::{
    guard_fn, guard_sync, hook_fn, AfterEachHook, FnGuard, FnHook, GuardContext, GuardOutcome,
    GuardPhase, GuardVerdict, NavigationGuard, SyncGuard,
};
