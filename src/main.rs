//! Chips Navigator 命令行入口
//!
//! 用于检查配置、查看路由表和离线调试路由解析。
//!
//! # 命令概览
//!
//! - `check-config` - 验证配置文件
//! - `routes` - 列出路由文件中的路由
//! - `resolve` - 用路由文件解析一个地址
//! - `version` - 显示版本信息
//!
//! # 使用示例
//!
//! ```bash
//! # 检查配置文件
//! chips-navigator check-config -c navigator.yaml
//!
//! # 查看路由表
//! chips-navigator routes -r routes.yaml
//!
//! # 以模糊模式解析地址
//! chips-navigator resolve -r routes.yaml --mode fuzzy /usr/prof
//! ```

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use chips_navigator::{
    LoggerConfig, Logger, MatchMode, Navigator, NavigatorConfig, RouteRecord,
};

/// Chips Navigator - 薯片导航内核
#[derive(Parser)]
#[command(name = "chips-navigator")]
#[command(version, about = "路由匹配与导航守卫内核的调试工具", long_about = None)]
#[command(author = "Chips Team")]
#[command(propagate_version = true)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "navigator.yaml", global = true)]
    config: PathBuf,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// 子命令
    #[command(subcommand)]
    command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
enum Commands {
    /// 查看版本信息
    Version,

    /// 验证配置文件
    ///
    /// 检查配置文件是否有效，并显示解析后的配置内容。
    CheckConfig,

    /// 列出路由文件中的全部路由（子路由展开后）
    Routes {
        /// 路由定义文件（YAML 或 JSON）
        #[arg(short, long)]
        routes: PathBuf,
    },

    /// 解析一个地址
    Resolve {
        /// 路由定义文件（YAML 或 JSON）
        #[arg(short, long)]
        routes: PathBuf,

        /// 匹配模式（exact / prefix / regex / fuzzy），默认使用配置
        #[arg(short, long)]
        mode: Option<MatchMode>,

        /// 待解析的地址
        path: String,
    },
}

/// 路由文件中的一条路由
#[derive(Debug, Deserialize)]
struct RouteDef {
    path: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    meta: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    permission: Option<String>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    children: Vec<RouteDef>,
}

impl RouteDef {
    fn into_record(self) -> RouteRecord {
        let mut record = RouteRecord::new(self.path);
        if let Some(name) = self.name {
            record = record.name(name);
        }
        for (key, value) in self.meta {
            record = record.meta(key, value);
        }
        if let Some(permission) = self.permission {
            record = record.permission(permission);
        }
        if let Some(pattern) = self.pattern {
            record = record.pattern(pattern);
        }
        for child in self.children {
            record = record.child(child.into_record());
        }
        record
    }
}

/// 加载配置文件，不存在时使用默认配置
async fn load_config(path: &Path) -> Result<NavigatorConfig, Box<dyn std::error::Error>> {
    if path.exists() {
        let config = NavigatorConfig::from_file(path).await?;
        info!("已加载配置文件: {}", path.display());
        Ok(config)
    } else {
        info!("配置文件不存在 ({})，使用默认配置", path.display());
        Ok(NavigatorConfig::default())
    }
}

/// 加载路由文件
async fn load_routes(path: &Path) -> Result<Vec<RouteRecord>, Box<dyn std::error::Error>> {
    let content = tokio::fs::read_to_string(path).await?;
    let is_json = path.extension().is_some_and(|ext| ext == "json");
    let defs: Vec<RouteDef> = if is_json {
        serde_json::from_str(&content)?
    } else {
        serde_yaml::from_str(&content)?
    };
    debug!(count = defs.len(), "已读取路由定义");
    Ok(defs.into_iter().map(RouteDef::into_record).collect())
}

/// 根据配置创建导航引擎并注册路由
async fn build_navigator(
    config: NavigatorConfig,
    routes: &Path,
) -> Result<Navigator, Box<dyn std::error::Error>> {
    let navigator = Navigator::new(config)?;
    navigator.add_routes(load_routes(routes).await?).await?;
    Ok(navigator)
}

/// 检查配置文件
async fn check_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("检查配置文件: {}", path.display());
    println!();

    let config = if path.exists() {
        NavigatorConfig::from_file(path).await
    } else {
        println!("⚠️  警告: 配置文件不存在，将使用默认配置");
        println!();
        Ok(NavigatorConfig::default())
    };

    match config.and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => {
            println!("✅ 配置有效！");
            println!();
            println!("────────────────────────────────────────");
            println!("  [匹配器]");
            println!("    大小写敏感:     {}", yes_no(config.matcher.case_sensitive));
            println!("    严格尾部斜杠:   {}", yes_no(config.matcher.strict_trailing_slash));
            println!("    参数校验:       {}", yes_no(config.matcher.validation_enabled));
            println!("    默认模式:       {}", config.matcher.default_mode);
            println!();
            println!("  [缓存]");
            println!("    启用:           {}", yes_no(config.cache.enabled));
            println!("    容量:           {}", config.cache.max_size);
            println!("    默认 TTL:       {} ms", config.cache.default_ttl_ms);
            println!("    清扫间隔:       {} ms", config.cache.sweep_interval_ms);
            println!();
            println!("  [守卫]");
            println!("    超时:           {} ms", config.guards.timeout_ms);
            println!("    并行执行:       {}", yes_no(config.guards.parallel));
            println!("    依赖推断:       {:?}", config.guards.dependency_inference);
            println!();
            println!("  [中间件]");
            println!("    超时:           {} ms", config.middleware.timeout_ms);
            println!("    最大重试次数:   {}", config.middleware.max_retries);
            println!();
            println!("  [其他]");
            println!("    日志级别:       {}", config.logging.level);
            println!("    最大重定向次数: {}", config.max_redirects);
            println!("────────────────────────────────────────");
            Ok(())
        }
        Err(e) => {
            println!("❌ 配置无效: {}", e);
            Err(Box::new(e))
        }
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "是"
    } else {
        "否"
    }
}

/// 列出路由
async fn show_routes(config: NavigatorConfig, routes: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let navigator = build_navigator(config, routes).await?;

    println!();
    println!("路由表");
    println!("═══════════════════════════════════════");
    for record in navigator.matcher().routes().await {
        let name = record.name.as_deref().unwrap_or("-");
        let permission = record.permission.as_deref().unwrap_or("-");
        println!("  {:<32} 名称: {:<16} 权限: {}", record.path, name, permission);
    }
    println!("═══════════════════════════════════════");
    println!();
    Ok(())
}

/// 解析地址
async fn resolve(
    config: NavigatorConfig,
    routes: &Path,
    path: &str,
    mode: Option<MatchMode>,
) -> Result<(), Box<dyn std::error::Error>> {
    let navigator = build_navigator(config, routes).await?;
    let result = navigator.matcher().match_path(path, mode).await;

    println!();
    println!("解析结果");
    println!("────────────────────────────────────────");
    println!("  地址:     {}", path);
    println!("  模式:     {}", result.mode);
    println!("  命中:     {}", yes_no(result.matched));
    if let Some(ref record) = result.record {
        println!("  路由:     {}", record.path);
        if let Some(ref name) = record.name {
            println!("  名称:     {}", name);
        }
        println!("  得分:     {:.2}", result.score);
        println!("  参数:     {}", serde_json::to_string(&result.params)?);
        let chain: Vec<&str> = result.matched_records.iter().map(|r| r.path.as_str()).collect();
        println!("  记录链:   {}", chain.join(" > "));
    }
    for error in &result.validation_errors {
        println!("  校验失败: {} = '{}' ({})", error.field, error.value, error.message);
    }
    println!("────────────────────────────────────────");
    Ok(())
}

/// 打印版本信息
fn print_version() {
    println!();
    println!("Chips Navigator - 薯片导航内核");
    println!("═══════════════════════════════════════");
    println!("  版本:             {}", chips_navigator::VERSION);
    println!("  目标平台:         {}", std::env::consts::ARCH);
    println!("  操作系统:         {}", std::env::consts::OS);
    println!("═══════════════════════════════════════");
    println!();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => print_version(),
        Commands::CheckConfig => check_config(&cli.config).await?,
        Commands::Routes { ref routes } => {
            let config = load_config(&cli.config).await?;
            let _guard = init_logging(&config, cli.log_level.as_deref());
            show_routes(config, routes).await?;
        }
        Commands::Resolve {
            ref routes,
            mode,
            ref path,
        } => {
            let config = load_config(&cli.config).await?;
            let _guard = init_logging(&config, cli.log_level.as_deref());
            resolve(config, routes, path, mode).await?;
        }
    }

    Ok(())
}

/// 按配置初始化日志，命令行级别优先
fn init_logging(config: &NavigatorConfig, level: Option<&str>) -> chips_navigator::LogGuard {
    let mut logger_config = LoggerConfig::from_log_config(&config.logging);
    if let Some(level) = level {
        logger_config.level = level.to_string();
    }
    Logger::try_init(logger_config)
}
