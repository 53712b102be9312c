//! 中间件模块
//!
//! 用于横切关注点（认证、日志、统计）的通用执行链：
//! - 中间件类型和错误处理策略
//! - 执行条件
//! - 按优先级排序、带超时的中间件链

pub mod chain;
pub mod condition;
pub mod types;

// 重导出常用类型
pub use chain::{
    ChainOutcome, MiddlewareChain, MiddlewareHandle, MiddlewareOptions, PerformanceReport,
    StepRecord,
};
pub use condition::MiddlewareCondition;
pub use types::{
    middleware_fn, ErrorAction, ErrorStrategy, FnMiddleware, Middleware, MiddlewareContext,
    MiddlewareErrorHandler, MiddlewareFlow,
};
