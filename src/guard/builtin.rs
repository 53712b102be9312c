//! 内置守卫

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use super::types::{GuardContext, GuardOutcome, NavigationGuard};
use crate::router::NavigationTarget;

type PermissionProvider = dyn Fn() -> HashSet<String> + Send + Sync;

/// 权限守卫
///
/// 检查目标位置匹配链上每条记录的 `permission` 要求，任何一项未授予即拒绝。
/// 已授予的权限在每次检查时通过提供函数获取，因此登录状态变化后无需重新注册。
#[derive(Clone)]
pub struct PermissionGuard {
    name: String,
    granted: Arc<PermissionProvider>,
    redirect: Option<NavigationTarget>,
}

impl PermissionGuard {
    /// 创建权限守卫
    pub fn new<F>(granted: F) -> Self
    where
        F: Fn() -> HashSet<String> + Send + Sync + 'static,
    {
        Self {
            name: "permission".to_string(),
            granted: Arc::new(granted),
            redirect: None,
        }
    }

    /// 使用固定的权限集合
    pub fn with_permissions<I, S>(permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: HashSet<String> = permissions.into_iter().map(Into::into).collect();
        Self::new(move || set.clone())
    }

    /// 拒绝时重定向到指定目标
    pub fn redirect_to(mut self, target: impl Into<NavigationTarget>) -> Self {
        self.redirect = Some(target.into());
        self
    }

    /// 自定义守卫名称
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// 找出第一个缺失的权限
    pub fn missing_permission(&self, ctx: &GuardContext) -> Option<String> {
        let granted = (self.granted)();
        ctx.to
            .matched
            .iter()
            .filter_map(|record| record.permission.as_ref())
            .find(|permission| !granted.contains(*permission))
            .cloned()
    }
}

impl std::fmt::Debug for PermissionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionGuard")
            .field("name", &self.name)
            .field("redirect", &self.redirect)
            .finish()
    }
}

#[async_trait]
impl NavigationGuard for PermissionGuard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: GuardContext) -> GuardOutcome {
        match self.missing_permission(&ctx) {
            None => GuardOutcome::Allow,
            Some(permission) => {
                debug!(path = %ctx.to.path, permission = %permission, "缺少访问权限");
                match &self.redirect {
                    Some(target) => GuardOutcome::Redirect(target.clone()),
                    None => GuardOutcome::Deny,
                }
            }
        }
    }
}
