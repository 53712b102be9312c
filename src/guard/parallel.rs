//! 并行守卫执行器
//!
//! 在保证与串行执行结果一致的前提下，并发执行没有依赖关系的守卫。
//!
//! # 依赖推断
//!
//! - 名称约定：名称包含 `permission`，或包含 `auth` 但不包含 `check` 的守卫，
//!   依赖所有更早注册、名称包含 `authenticate` 或 `checkAuth` 的守卫
//! - 显式声明：注册时通过 `depends_on` 指定同阶段守卫的名称或 ID
//!
//! 两种来源按 [`DependencyInference`] 配置合并。
//!
//! # 执行顺序
//!
//! 1. 构建依赖图并检测循环依赖，存在环时在任何守卫执行前返回错误
//! 2. 无依赖关系的守卫并发执行，全部完成后按原始顺序取第一个拒绝结果
//! 3. 有依赖关系的守卫按拓扑序串行执行，遇到拒绝立即终止

use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::debug;

use super::pipeline::{run_in_sequence, GuardTask, PhaseReport};
use super::types::{GuardContext, GuardVerdict};
use crate::core::config::DependencyInference;
use crate::utils::{NavError, Result};

/// 守卫依赖关系（单次执行内有效）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardDependency {
    /// 守卫 ID
    pub id: String,
    /// 守卫名称
    pub name: String,
    /// 依赖的守卫 ID
    pub dependencies: BTreeSet<String>,
}

// ============================================================================
// 依赖图
// ============================================================================

/// 守卫依赖图
///
/// 节点保持插入顺序，拓扑排序在满足依赖的前提下尽量保持该顺序。
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// 节点（插入顺序）
    nodes: Vec<String>,
    /// 正向边：节点 -> 它依赖的节点
    edges: HashMap<String, Vec<String>>,
    /// 反向边：节点 -> 依赖它的节点
    reverse_edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// 创建空的依赖图
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加节点，已存在时忽略
    pub fn add_node(&mut self, id: &str) {
        if !self.edges.contains_key(id) {
            self.nodes.push(id.to_string());
            self.edges.insert(id.to_string(), Vec::new());
            self.reverse_edges.insert(id.to_string(), Vec::new());
        }
    }

    /// 添加依赖：`id` 依赖 `dependency`
    pub fn add_dependency(&mut self, id: &str, dependency: &str) {
        self.add_node(id);
        self.add_node(dependency);

        if let Some(deps) = self.edges.get_mut(id) {
            if !deps.iter().any(|d| d == dependency) {
                deps.push(dependency.to_string());
            }
        }
        if let Some(rev) = self.reverse_edges.get_mut(dependency) {
            if !rev.iter().any(|d| d == id) {
                rev.push(id.to_string());
            }
        }
    }

    /// 直接依赖
    pub fn dependencies(&self, id: &str) -> Vec<String> {
        self.edges.get(id).cloned().unwrap_or_default()
    }

    /// 直接被依赖方
    pub fn dependents(&self, id: &str) -> Vec<String> {
        self.reverse_edges.get(id).cloned().unwrap_or_default()
    }

    /// 节点是否参与任何依赖关系
    pub fn is_involved(&self, id: &str) -> bool {
        self.edges.get(id).is_some_and(|d| !d.is_empty())
            || self.reverse_edges.get(id).is_some_and(|d| !d.is_empty())
    }

    /// 是否包含节点
    pub fn contains(&self, id: &str) -> bool {
        self.edges.contains_key(id)
    }

    /// 节点数量
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 是否存在环
    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// 查找一个环，返回环上的节点路径（首尾相同）
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = BTreeSet::new();
        let mut stack = Vec::new();

        for node in &self.nodes {
            if let Some(cycle) = self.find_cycle_from(node, &mut visited, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }

    fn find_cycle_from(
        &self,
        node: &str,
        visited: &mut BTreeSet<String>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = stack.iter().position(|n| n == node) {
            let mut cycle = stack[pos..].to_vec();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if !visited.insert(node.to_string()) {
            return None;
        }

        stack.push(node.to_string());
        for dep in self.edges.get(node).into_iter().flatten() {
            if let Some(cycle) = self.find_cycle_from(dep, visited, stack) {
                return Some(cycle);
            }
        }
        stack.pop();
        None
    }

    /// 拓扑排序（Kahn 算法），被依赖的节点在前
    ///
    /// 可选节点之间按插入顺序排列。存在环时返回 `CircularDependency`。
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        let index: HashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();

        let mut remaining: Vec<usize> = self
            .nodes
            .iter()
            .map(|n| self.edges.get(n).map_or(0, Vec::len))
            .collect();
        let mut ready: BTreeSet<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, &count)| count == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(next) = ready.pop_first() {
            let node = &self.nodes[next];
            order.push(node.clone());
            for dependent in self.reverse_edges.get(node).into_iter().flatten() {
                if let Some(&i) = index.get(dependent.as_str()) {
                    remaining[i] -= 1;
                    if remaining[i] == 0 {
                        ready.insert(i);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let cycle = self
                .find_cycle()
                .map(|c| c.join(" -> "))
                .unwrap_or_else(|| "unknown".to_string());
            return Err(NavError::CircularDependency(cycle));
        }
        Ok(order)
    }
}

// ============================================================================
// 执行器
// ============================================================================

/// 名称是否符合授权类守卫约定
fn is_authorization(name: &str) -> bool {
    let name = name.to_lowercase();
    name.contains("permission") || (name.contains("auth") && !name.contains("check"))
}

/// 名称是否符合认证类守卫约定
fn is_authentication(name: &str) -> bool {
    let name = name.to_lowercase();
    name.contains("authenticate") || name.contains("checkauth")
}

/// 并行守卫执行器
#[derive(Debug, Clone)]
pub struct ParallelGuardExecutor {
    inference: DependencyInference,
    timeout: Duration,
}

impl ParallelGuardExecutor {
    /// 创建执行器
    pub fn new(inference: DependencyInference, timeout: Duration) -> Self {
        Self { inference, timeout }
    }

    /// 依赖推断方式
    pub fn inference(&self) -> DependencyInference {
        self.inference
    }

    /// 推断一组守卫之间的依赖关系
    pub fn infer_dependencies(&self, tasks: &[GuardTask]) -> Vec<GuardDependency> {
        let use_names = matches!(
            self.inference,
            DependencyInference::NameHeuristic | DependencyInference::Both
        );
        let use_explicit = matches!(
            self.inference,
            DependencyInference::Explicit | DependencyInference::Both
        );

        tasks
            .iter()
            .map(|task| {
                let mut dependencies = BTreeSet::new();

                if use_names && is_authorization(&task.name) {
                    for other in tasks {
                        if other.id != task.id
                            && other.order < task.order
                            && is_authentication(&other.name)
                        {
                            dependencies.insert(other.id.clone());
                        }
                    }
                }

                if use_explicit {
                    for reference in &task.depends_on {
                        match tasks
                            .iter()
                            .find(|o| o.id != task.id && (&o.id == reference || &o.name == reference))
                        {
                            Some(other) => {
                                dependencies.insert(other.id.clone());
                            }
                            None => {
                                debug!(guard = %task.name, dependency = %reference, "依赖的守卫不在当前阶段，忽略");
                            }
                        }
                    }
                }

                GuardDependency {
                    id: task.id.clone(),
                    name: task.name.clone(),
                    dependencies,
                }
            })
            .collect()
    }

    /// 由依赖关系构建依赖图，节点顺序与输入一致
    pub fn build_graph(&self, dependencies: &[GuardDependency]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for dep in dependencies {
            graph.add_node(&dep.id);
        }
        for dep in dependencies {
            for target in &dep.dependencies {
                graph.add_dependency(&dep.id, target);
            }
        }
        graph
    }

    /// 执行一个阶段的守卫
    ///
    /// `tasks` 应已按执行优先级排序。存在循环依赖时返回错误且不执行任何守卫。
    pub async fn execute(&self, tasks: &[GuardTask], ctx: &GuardContext) -> Result<PhaseReport> {
        let dependencies = self.infer_dependencies(tasks);
        let graph = self.build_graph(&dependencies);
        if let Some(cycle) = graph.find_cycle() {
            return Err(NavError::CircularDependency(cycle.join(" -> ")));
        }

        let (independent, dependent): (Vec<&GuardTask>, Vec<&GuardTask>) =
            tasks.iter().partition(|t| !graph.is_involved(&t.id));

        // 并发执行，全部完成后按原始顺序取第一个终止裁决
        let results = join_all(independent.iter().map(|t| t.run(ctx, self.timeout))).await;
        let parallel_count = results.iter().filter(|r| r.is_some()).count();

        if let Some(verdict) = results
            .into_iter()
            .flatten()
            .find(GuardVerdict::is_terminal)
        {
            return Ok(PhaseReport {
                verdict,
                parallel_count,
                serial_count: 0,
            });
        }

        let order = graph.topological_sort()?;
        // 先收集再等待，避免借用闭包跨越 await 导致 future 不是 Send
        let sorted: Vec<&GuardTask> = order
            .iter()
            .filter_map(|id| dependent.iter().find(|t| &t.id == id).copied())
            .collect();
        let serial = run_in_sequence(sorted, ctx, self.timeout).await;

        debug!(
            phase = %ctx.phase,
            parallel = parallel_count,
            serial = serial.serial_count,
            "并行守卫执行完成"
        );
        Ok(PhaseReport {
            verdict: serial.verdict,
            parallel_count,
            serial_count: serial.serial_count,
        })
    }
}
