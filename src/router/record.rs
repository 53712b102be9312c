//! 路由记录
//!
//! 路由记录在注册后不可变，只能通过匹配器显式添加或移除。
//! 嵌套子路由和路由组都在注册时展开，运行时没有额外的表示。

use std::fmt;
use std::sync::Arc;

use super::location::{join_paths, split_segments, Meta};
use super::validator::ParamValidator;
use crate::guard::NavigationGuard;

/// 挂载在路由记录或组件上的守卫
#[derive(Clone)]
pub struct RouteGuard {
    /// 守卫实现
    pub handler: Arc<dyn NavigationGuard>,
    /// 优先级（数值越大越先执行）
    pub priority: i32,
}

impl RouteGuard {
    /// 创建优先级为 0 的守卫
    pub fn new(handler: impl NavigationGuard + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
            priority: 0,
        }
    }

    /// 设置优先级
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// 守卫名称
    pub fn name(&self) -> &str {
        self.handler.name()
    }
}

impl fmt::Debug for RouteGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteGuard")
            .field("name", &self.handler.name())
            .field("priority", &self.priority)
            .finish()
    }
}

/// 组件定义
///
/// 组件本身由视图层加载，这里只保存名称和组件内守卫。
#[derive(Debug, Clone, Default)]
pub struct ComponentDef {
    /// 组件名称
    pub name: String,
    /// 进入组件前
    pub before_route_enter: Vec<RouteGuard>,
    /// 同一组件复用时
    pub before_route_update: Vec<RouteGuard>,
    /// 离开组件前
    pub before_route_leave: Vec<RouteGuard>,
}

impl ComponentDef {
    /// 创建组件定义
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// 添加 beforeRouteEnter 守卫
    pub fn on_enter(mut self, guard: RouteGuard) -> Self {
        self.before_route_enter.push(guard);
        self
    }

    /// 添加 beforeRouteUpdate 守卫
    pub fn on_update(mut self, guard: RouteGuard) -> Self {
        self.before_route_update.push(guard);
        self
    }

    /// 添加 beforeRouteLeave 守卫
    pub fn on_leave(mut self, guard: RouteGuard) -> Self {
        self.before_route_leave.push(guard);
        self
    }
}

/// 路由记录
#[derive(Debug, Clone, Default)]
pub struct RouteRecord {
    /// 路径模式，例如 `/users/:id`；展开后为完整路径
    pub path: String,
    /// 路由名称
    pub name: Option<String>,
    /// 子路由（注册时展开，已注册的记录中为空）
    pub children: Vec<RouteRecord>,
    /// 父路由路径（注册时填充）
    pub parent: Option<String>,
    /// 元数据
    pub meta: Meta,
    /// beforeEnter 守卫
    pub guards: Vec<RouteGuard>,
    /// 访问所需权限
    pub permission: Option<String>,
    /// 正则覆盖，设置后正则模式使用它而非路径模式
    pub match_pattern: Option<String>,
    /// 组件定义
    pub component: Option<ComponentDef>,
    /// 参数校验器
    pub validators: Vec<ParamValidator>,
}

impl RouteRecord {
    /// 创建路由记录
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// 设置名称
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 添加元数据
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// 添加 beforeEnter 守卫
    pub fn guard(mut self, guard: RouteGuard) -> Self {
        self.guards.push(guard);
        self
    }

    /// 设置访问权限
    pub fn permission(mut self, permission: impl Into<String>) -> Self {
        self.permission = Some(permission.into());
        self
    }

    /// 设置正则覆盖（支持命名捕获组）
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.match_pattern = Some(pattern.into());
        self
    }

    /// 设置组件
    pub fn component(mut self, component: ComponentDef) -> Self {
        self.component = Some(component);
        self
    }

    /// 添加参数校验器
    pub fn validator(mut self, validator: ParamValidator) -> Self {
        self.validators.push(validator);
        self
    }

    /// 添加子路由
    pub fn child(mut self, child: RouteRecord) -> Self {
        self.children.push(child);
        self
    }

    /// 路径中的动态参数名
    pub fn param_names(&self) -> Vec<&str> {
        split_segments(&self.path)
            .into_iter()
            .filter_map(|s| s.strip_prefix(':'))
            .collect()
    }

    /// 是否为纯静态路径
    pub fn is_static(&self) -> bool {
        !self.path.contains(':')
    }
}

/// 路由组
///
/// 为成员路由统一加上路径前缀、共享元数据、共享守卫和权限要求。
/// 记录自身的元数据键优先；组守卫排在记录守卫之前。
#[derive(Debug, Clone, Default)]
pub struct RouteGroup {
    /// 路径前缀
    pub prefix: String,
    /// 共享元数据
    pub meta: Meta,
    /// 共享守卫
    pub guards: Vec<RouteGuard>,
    /// 共享权限（记录未设置时生效）
    pub permission: Option<String>,
    /// 成员路由
    pub records: Vec<RouteRecord>,
}

impl RouteGroup {
    /// 创建路由组
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    /// 添加共享元数据
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// 添加共享守卫
    pub fn guard(mut self, guard: RouteGuard) -> Self {
        self.guards.push(guard);
        self
    }

    /// 设置共享权限
    pub fn permission(mut self, permission: impl Into<String>) -> Self {
        self.permission = Some(permission.into());
        self
    }

    /// 添加成员路由
    pub fn route(mut self, record: RouteRecord) -> Self {
        self.records.push(record);
        self
    }

    /// 展开为普通路由记录
    ///
    /// 只有顶层记录加前缀，相对路径的子路由随父路由一起继承前缀。
    pub fn expand(self) -> Vec<RouteRecord> {
        let prefix = self.prefix.trim_end_matches('/').to_string();
        self.records
            .into_iter()
            .map(|mut record| {
                let relative = record.path.trim_start_matches('/');
                record.path = join_paths(&prefix, relative);
                if record.path.is_empty() {
                    record.path = "/".to_string();
                }

                let mut meta = self.meta.clone();
                meta.extend(std::mem::take(&mut record.meta));
                record.meta = meta;

                let mut guards = self.guards.clone();
                guards.append(&mut record.guards);
                record.guards = guards;

                if record.permission.is_none() {
                    record.permission = self.permission.clone();
                }
                record
            })
            .collect()
    }
}
