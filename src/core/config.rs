//! 导航内核配置
//!
//! 定义匹配器、缓存、守卫、中间件和日志的配置结构与加载逻辑。
//! 所有字段都有默认值，配置文件中只需要写出需要覆盖的部分。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::router::MatchMode;
use crate::utils::{NavError, Result};

/// 守卫依赖推断方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyInference {
    /// 仅根据守卫名称推断（authenticate / permission 约定）
    NameHeuristic,
    /// 仅使用注册时显式声明的依赖
    Explicit,
    /// 两者取并集（默认）
    #[default]
    Both,
}

/// 路由匹配器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// 静态段是否区分大小写
    #[serde(default)]
    pub case_sensitive: bool,

    /// 是否严格区分末尾斜杠（`/a/` 与 `/a`）
    #[serde(default)]
    pub strict_trailing_slash: bool,

    /// 是否启用参数校验
    #[serde(default = "default_true")]
    pub validation_enabled: bool,

    /// 默认匹配模式
    #[serde(default)]
    pub default_mode: MatchMode,

    /// 模糊匹配的最低得分（None 表示得分需达到查询路径长度）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuzzy_min_score: Option<f64>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            strict_trailing_slash: false,
            validation_enabled: true,
            default_mode: MatchMode::Exact,
            fuzzy_min_score: None,
        }
    }
}

/// 匹配缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 是否启用缓存
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// 最大条目数
    #[serde(default = "default_cache_size")]
    pub max_size: usize,

    /// 默认 TTL（毫秒），0 表示永不过期
    #[serde(default)]
    pub default_ttl_ms: u64,

    /// 后台清扫间隔（毫秒），0 表示不启用后台清扫
    #[serde(default)]
    pub sweep_interval_ms: u64,

    /// 缓存键是否包含规范化后的查询串
    #[serde(default)]
    pub include_query: bool,
}

fn default_cache_size() -> usize {
    256
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: default_cache_size(),
            default_ttl_ms: 0,
            sweep_interval_ms: 0,
            include_query: false,
        }
    }
}

/// 守卫管线配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// 单个守卫的超时时间（毫秒）
    #[serde(default = "default_guard_timeout_ms")]
    pub timeout_ms: u64,

    /// 是否启用并行守卫执行
    #[serde(default)]
    pub parallel: bool,

    /// 依赖推断方式
    #[serde(default)]
    pub dependency_inference: DependencyInference,

    /// 执行历史保留条数
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_guard_timeout_ms() -> u64 {
    10_000
}

fn default_history_limit() -> usize {
    100
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_guard_timeout_ms(),
            parallel: false,
            dependency_inference: DependencyInference::default(),
            history_limit: default_history_limit(),
        }
    }
}

/// 中间件链配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    /// 中间件默认超时时间（毫秒）
    #[serde(default = "default_middleware_timeout_ms")]
    pub timeout_ms: u64,

    /// 自定义错误策略连续返回 `Retry` 时的重试上限
    ///
    /// `ErrorStrategy::Retry` 自带次数，不受此项影响。
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// 两次重试之间的等待时间（毫秒）
    #[serde(default)]
    pub retry_delay_ms: u64,
}

fn default_middleware_timeout_ms() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    3
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_middleware_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: 0,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_redirects() -> usize {
    10
}

/// 导航内核配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigatorConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 匹配器配置
    #[serde(default)]
    pub matcher: MatcherConfig,

    /// 匹配缓存配置
    #[serde(default)]
    pub cache: CacheConfig,

    /// 守卫配置
    #[serde(default)]
    pub guards: GuardConfig,

    /// 中间件配置
    #[serde(default)]
    pub middleware: MiddlewareConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// `navigate` 跟随重定向的最大次数
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            matcher: MatcherConfig::default(),
            cache: CacheConfig::default(),
            guards: GuardConfig::default(),
            middleware: MiddlewareConfig::default(),
            logging: LogConfig::default(),
            max_redirects: default_max_redirects(),
        }
    }
}

impl NavigatorConfig {
    /// 创建配置构建器
    pub fn builder() -> NavigatorConfigBuilder {
        NavigatorConfigBuilder::new()
    }

    /// 从文件加载配置
    ///
    /// 扩展名为 `.json` 时按 JSON 解析，其余按 YAML 解析。加载后会执行 [`validate`](Self::validate)。
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            NavError::ConfigLoadFailed(format!("无法读取 {}: {}", path.display(), e))
        })?;

        let mut config = Self::from_str_with_format(&content, is_json(&path))?;
        config.config_path = Some(path);
        config.validate()?;
        Ok(config)
    }

    /// 从字符串解析配置
    pub fn from_str_with_format(content: &str, json: bool) -> Result<Self> {
        let config = if json {
            serde_json::from_str(content)?
        } else {
            serde_yaml::from_str(content)?
        };
        Ok(config)
    }

    /// 校验配置值
    pub fn validate(&self) -> Result<()> {
        if self.cache.enabled && self.cache.max_size == 0 {
            return Err(NavError::InvalidConfigValue {
                key: "cache.max_size".to_string(),
                reason: "启用缓存时容量必须大于 0".to_string(),
            });
        }
        if self.guards.timeout_ms == 0 {
            return Err(NavError::InvalidConfigValue {
                key: "guards.timeout_ms".to_string(),
                reason: "超时时间必须大于 0".to_string(),
            });
        }
        if self.middleware.timeout_ms == 0 {
            return Err(NavError::InvalidConfigValue {
                key: "middleware.timeout_ms".to_string(),
                reason: "超时时间必须大于 0".to_string(),
            });
        }
        if self.middleware.max_retries == 0 {
            return Err(NavError::InvalidConfigValue {
                key: "middleware.max_retries".to_string(),
                reason: "重试次数至少为 1".to_string(),
            });
        }
        Ok(())
    }

    /// 合并另一个配置（只覆盖与默认值不同的字段）
    pub fn merge(&mut self, other: NavigatorConfig) {
        let defaults = NavigatorConfig::default();

        if other.matcher.case_sensitive {
            self.matcher.case_sensitive = true;
        }
        if other.matcher.strict_trailing_slash {
            self.matcher.strict_trailing_slash = true;
        }
        if !other.matcher.validation_enabled {
            self.matcher.validation_enabled = false;
        }
        if other.matcher.default_mode != defaults.matcher.default_mode {
            self.matcher.default_mode = other.matcher.default_mode;
        }
        if other.matcher.fuzzy_min_score.is_some() {
            self.matcher.fuzzy_min_score = other.matcher.fuzzy_min_score;
        }
        if other.cache.max_size != defaults.cache.max_size {
            self.cache.max_size = other.cache.max_size;
        }
        if !other.cache.enabled {
            self.cache.enabled = false;
        }
        if other.cache.include_query {
            self.cache.include_query = true;
        }
        if other.cache.default_ttl_ms != 0 {
            self.cache.default_ttl_ms = other.cache.default_ttl_ms;
        }
        if other.cache.sweep_interval_ms != 0 {
            self.cache.sweep_interval_ms = other.cache.sweep_interval_ms;
        }
        if other.guards.timeout_ms != defaults.guards.timeout_ms {
            self.guards.timeout_ms = other.guards.timeout_ms;
        }
        if other.guards.parallel {
            self.guards.parallel = true;
        }
        if other.guards.dependency_inference != defaults.guards.dependency_inference {
            self.guards.dependency_inference = other.guards.dependency_inference;
        }
        if other.guards.history_limit != defaults.guards.history_limit {
            self.guards.history_limit = other.guards.history_limit;
        }
        if other.middleware.timeout_ms != defaults.middleware.timeout_ms {
            self.middleware.timeout_ms = other.middleware.timeout_ms;
        }
        if other.middleware.max_retries != defaults.middleware.max_retries {
            self.middleware.max_retries = other.middleware.max_retries;
        }
        if other.middleware.retry_delay_ms != defaults.middleware.retry_delay_ms {
            self.middleware.retry_delay_ms = other.middleware.retry_delay_ms;
        }
        if other.logging.level != defaults.logging.level {
            self.logging.level = other.logging.level;
        }
        if other.logging.file_output {
            self.logging.file_output = true;
            self.logging.log_dir = other.logging.log_dir;
        }
        if other.logging.json_format {
            self.logging.json_format = true;
        }
        if other.logging.rotation != defaults.logging.rotation {
            self.logging.rotation = other.logging.rotation;
        }
        if other.max_redirects != defaults.max_redirects {
            self.max_redirects = other.max_redirects;
        }
    }
}

fn is_json(path: &std::path::Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct NavigatorConfigBuilder {
    config: NavigatorConfig,
}

impl NavigatorConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self::default()
    }

    /// 静态段区分大小写
    pub fn case_sensitive(mut self, enable: bool) -> Self {
        self.config.matcher.case_sensitive = enable;
        self
    }

    /// 严格区分末尾斜杠
    pub fn strict_trailing_slash(mut self, enable: bool) -> Self {
        self.config.matcher.strict_trailing_slash = enable;
        self
    }

    /// 启用或关闭参数校验
    pub fn validation(mut self, enable: bool) -> Self {
        self.config.matcher.validation_enabled = enable;
        self
    }

    /// 设置默认匹配模式
    pub fn default_mode(mut self, mode: MatchMode) -> Self {
        self.config.matcher.default_mode = mode;
        self
    }

    /// 设置缓存容量
    pub fn cache_size(mut self, size: usize) -> Self {
        self.config.cache.max_size = size;
        self
    }

    /// 设置缓存默认 TTL（毫秒）
    pub fn cache_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.config.cache.default_ttl_ms = ttl_ms;
        self
    }

    /// 关闭匹配缓存
    pub fn without_cache(mut self) -> Self {
        self.config.cache.enabled = false;
        self
    }

    /// 设置守卫超时时间（毫秒）
    pub fn guard_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.guards.timeout_ms = timeout_ms;
        self
    }

    /// 启用并行守卫执行
    pub fn parallel_guards(mut self, enable: bool) -> Self {
        self.config.guards.parallel = enable;
        self
    }

    /// 设置依赖推断方式
    pub fn dependency_inference(mut self, inference: DependencyInference) -> Self {
        self.config.guards.dependency_inference = inference;
        self
    }

    /// 设置中间件超时时间（毫秒）
    pub fn middleware_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.middleware.timeout_ms = timeout_ms;
        self
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 设置最大重定向次数
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.config.max_redirects = max;
        self
    }

    /// 构建配置
    pub fn build(self) -> NavigatorConfig {
        self.config
    }
}
