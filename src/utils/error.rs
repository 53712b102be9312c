//! 导航内核错误类型定义
//!
//! 本模块定义了导航内核中使用的所有错误类型。
//! 错误需要保存在 `ExecutionResult` 和执行历史中，因此 `NavError` 实现了 `Clone`，
//! 无法克隆的底层错误（IO、序列化）以 `Arc` 包装。

use std::sync::Arc;

use thiserror::Error;

/// 导航内核核心错误类型
#[derive(Error, Debug, Clone)]
pub enum NavError {
    // ==================== 路由匹配错误 ====================

    /// 参数校验失败（非致命，通常作为 `MatchResult::validation_errors` 暴露）
    #[error("参数校验失败: {0}")]
    MatchValidation(String),

    /// 路由未找到
    #[error("路由未找到: '{0}'")]
    RouteNotFound(String),

    /// 路由已存在
    #[error("路由已存在: '{0}'")]
    RouteAlreadyExists(String),

    /// 路由模式无效
    #[error("路由模式无效: {0}")]
    InvalidPattern(String),

    /// 命名路由缺少参数
    #[error("命名路由 '{name}' 缺少参数 '{param}'")]
    MissingParam {
        /// 路由名
        name: String,
        /// 缺少的参数名
        param: String,
    },

    // ==================== 守卫错误 ====================

    /// 守卫执行超时
    #[error("守卫执行超时: '{guard}' 超过 {timeout_ms}ms")]
    GuardTimeout {
        /// 守卫名称
        guard: String,
        /// 超时时间（毫秒）
        timeout_ms: u64,
    },

    /// 守卫执行失败
    #[error("守卫执行失败: '{guard}' - {reason}")]
    GuardExecution {
        /// 守卫名称
        guard: String,
        /// 失败原因
        reason: String,
    },

    /// 守卫之间存在循环依赖
    #[error("检测到守卫循环依赖: {0}")]
    CircularDependency(String),

    // ==================== 中间件错误 ====================

    /// 中间件执行超时
    #[error("中间件执行超时: '{middleware}' 超过 {timeout_ms}ms")]
    MiddlewareTimeout {
        /// 中间件名称
        middleware: String,
        /// 超时时间（毫秒）
        timeout_ms: u64,
    },

    /// 中间件执行失败
    #[error("中间件执行失败: '{middleware}' - {reason}")]
    MiddlewareExecution {
        /// 中间件名称
        middleware: String,
        /// 失败原因
        reason: String,
    },

    /// 中间件未找到
    #[error("中间件未找到: '{0}'")]
    MiddlewareNotFound(String),

    // ==================== 导航错误 ====================

    /// 重定向次数超过上限
    #[error("重定向次数超过上限 {limit}: {chain:?}")]
    RedirectLimitExceeded {
        /// 允许的最大重定向次数
        limit: usize,
        /// 已经历的重定向路径
        chain: Vec<String>,
    },

    /// 操作被取消
    #[error("导航被取消")]
    Cancelled,

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 配置值无效
    #[error("配置值无效: '{key}' - {reason}")]
    InvalidConfigValue {
        /// 配置键（点分路径）
        key: String,
        /// 无效原因
        reason: String,
    },

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(Arc<std::io::Error>),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(Arc<serde_json::Error>),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(Arc<serde_yaml::Error>),

    // ==================== 通用错误 ====================

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),
}

impl From<std::io::Error> for NavError {
    fn from(err: std::io::Error) -> Self {
        NavError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for NavError {
    fn from(err: serde_json::Error) -> Self {
        NavError::Json(Arc::new(err))
    }
}

impl From<serde_yaml::Error> for NavError {
    fn from(err: serde_yaml::Error) -> Self {
        NavError::Yaml(Arc::new(err))
    }
}

impl From<regex::Error> for NavError {
    fn from(err: regex::Error) -> Self {
        NavError::InvalidPattern(err.to_string())
    }
}

/// 导航内核操作结果类型别名
pub type Result<T> = std::result::Result<T, NavError>;

/// 错误码常量
pub mod error_code {
    // 匹配错误 (MATCH-xxx)
    /// 参数校验失败
    pub const MATCH_VALIDATION_FAILED: &str = "MATCH-001";
    /// 路由未找到
    pub const MATCH_ROUTE_NOT_FOUND: &str = "MATCH-002";
    /// 路由已存在
    pub const MATCH_ROUTE_EXISTS: &str = "MATCH-003";
    /// 路由模式无效
    pub const MATCH_INVALID_PATTERN: &str = "MATCH-004";
    /// 命名路由缺少参数
    pub const MATCH_MISSING_PARAM: &str = "MATCH-005";

    // 守卫错误 (GUARD-xxx)
    /// 守卫超时
    pub const GUARD_TIMEOUT: &str = "GUARD-001";
    /// 守卫执行失败
    pub const GUARD_EXECUTION_FAILED: &str = "GUARD-002";
    /// 守卫循环依赖
    pub const GUARD_CIRCULAR_DEPENDENCY: &str = "GUARD-003";

    // 中间件错误 (MIDDLEWARE-xxx)
    /// 中间件超时
    pub const MIDDLEWARE_TIMEOUT: &str = "MIDDLEWARE-001";
    /// 中间件执行失败
    pub const MIDDLEWARE_EXECUTION_FAILED: &str = "MIDDLEWARE-002";
    /// 中间件未找到
    pub const MIDDLEWARE_NOT_FOUND: &str = "MIDDLEWARE-003";

    // 导航错误 (NAV-xxx)
    /// 重定向次数超限
    pub const NAV_REDIRECT_LIMIT: &str = "NAV-001";
    /// 导航被取消
    pub const NAV_CANCELLED: &str = "NAV-002";

    // 配置错误 (CONFIG-xxx)
    /// 配置加载失败
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
    /// 配置值无效
    pub const CONFIG_INVALID_VALUE: &str = "CONFIG-002";
}

impl NavError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            NavError::MatchValidation(_) => error_code::MATCH_VALIDATION_FAILED,
            NavError::RouteNotFound(_) => error_code::MATCH_ROUTE_NOT_FOUND,
            NavError::RouteAlreadyExists(_) => error_code::MATCH_ROUTE_EXISTS,
            NavError::InvalidPattern(_) => error_code::MATCH_INVALID_PATTERN,
            NavError::MissingParam { .. } => error_code::MATCH_MISSING_PARAM,
            NavError::GuardTimeout { .. } => error_code::GUARD_TIMEOUT,
            NavError::GuardExecution { .. } => error_code::GUARD_EXECUTION_FAILED,
            NavError::CircularDependency(_) => error_code::GUARD_CIRCULAR_DEPENDENCY,
            NavError::MiddlewareTimeout { .. } => error_code::MIDDLEWARE_TIMEOUT,
            NavError::MiddlewareExecution { .. } => error_code::MIDDLEWARE_EXECUTION_FAILED,
            NavError::MiddlewareNotFound(_) => error_code::MIDDLEWARE_NOT_FOUND,
            NavError::RedirectLimitExceeded { .. } => error_code::NAV_REDIRECT_LIMIT,
            NavError::Cancelled => error_code::NAV_CANCELLED,
            NavError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            NavError::InvalidConfigValue { .. } => error_code::CONFIG_INVALID_VALUE,
            _ => "UNKNOWN",
        }
    }

    /// 是否为致命错误
    ///
    /// 致命错误会立即终止整次管线执行，不受任何错误策略影响。
    pub fn is_fatal(&self) -> bool {
        matches!(self, NavError::CircularDependency(_) | NavError::Cancelled)
    }

    /// 是否为超时错误
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            NavError::GuardTimeout { .. } | NavError::MiddlewareTimeout { .. }
        )
    }
}
