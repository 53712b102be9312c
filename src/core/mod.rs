//! 核心模块
//!
//! 包含导航内核配置。

pub mod config;

pub use config::{
    CacheConfig, DependencyInference, GuardConfig, LogConfig, MatcherConfig, MiddlewareConfig,
    NavigatorConfig, NavigatorConfigBuilder,
};
