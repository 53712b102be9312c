//! API 模块
//!
//! 导航内核对外的主要接口。
//!
//! - `navigator`: 导航引擎，持有匹配器、缓存、守卫管线和中间件链

pub mod navigator;

pub use navigator::{Navigation, NavigationStats, NavigationStatsSnapshot, Navigator};
