//! 路由模块
//!
//! 包含路由解析的核心组件：
//! - 位置与导航目标
//! - 路由记录、组件定义和路由分组
//! - 参数验证器
//! - 多模式路由匹配器
//! - 匹配结果缓存

pub mod cache;
pub mod location;
pub mod matcher;
pub mod record;
pub mod validator;

// 重导出常用类型
pub use cache::{CacheEntry, CacheStats, MatchCache, SweeperHandle};
pub use location::{Location, Meta, NavigationTarget};
pub use matcher::{fuzzy_score, MatchMode, MatchResult, RouteMatcher};
pub use record::{ComponentDef, RouteGroup, RouteGuard, RouteRecord};
pub use validator::{validate_params, ParamValidator, ValidationError, ValidationErrorCode};
