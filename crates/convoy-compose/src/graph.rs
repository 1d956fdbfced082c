//! 依存グラフ
//!
//! ノードは名前順に並んだ密な配列のインデックスで表す。エッジは
//! 前進（依存 → 依存元）と後退の隣接配列を持ち、スケジューラは
//! ノード単位の未完了前任者カウントだけを更新する。

use crate::error::{OrchestratorError, Result};
use convoy_core::{ComposeError, DependCondition, Project};
use std::collections::{HashMap, HashSet, VecDeque};

/// 走行方向
///
/// 前進 = create/start系（依存が先）、後退 = stop/down系（依存元が先）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// 一回のスケジューラ実行に使う依存DAG
#[derive(Debug)]
pub struct ServiceGraph {
    /// index → サービス名（名前順なのでindex順 = 決定的な名前順）
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    /// node → その依存（エッジ条件付き）
    dependencies: Vec<Vec<(usize, DependCondition)>>,
    /// node → それに依存するノード
    dependents: Vec<Vec<usize>>,
}

impl ServiceGraph {
    /// ターゲット集合を閉包してグラフを構築
    ///
    /// filter が空なら全サービス。前進では依存方向に、後退では被依存
    /// 方向に閉じる。未知のサービス名はエラー。
    pub fn build(project: &Project, filter: &[String], direction: Direction) -> Result<Self> {
        for name in filter {
            if !project.services.contains_key(name) {
                return Err(OrchestratorError::Compose(ComposeError::ServiceNotFound(
                    name.clone(),
                )));
            }
        }

        // 被依存の全量マップ（閉包計算用）
        let mut dependents_map: HashMap<&str, Vec<&str>> = HashMap::new();
        for (name, service) in &project.services {
            for dep in &service.depends_on {
                dependents_map
                    .entry(dep.service.as_str())
                    .or_default()
                    .push(name.as_str());
            }
        }

        // ターゲット集合の閉包
        let mut included: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = if filter.is_empty() {
            project.services.keys().cloned().collect()
        } else {
            filter.iter().cloned().collect()
        };
        while let Some(name) = queue.pop_front() {
            if !included.insert(name.clone()) {
                continue;
            }
            match direction {
                Direction::Forward => {
                    if let Some(service) = project.services.get(&name) {
                        for dep in &service.depends_on {
                            queue.push_back(dep.service.clone());
                        }
                    }
                }
                Direction::Reverse => {
                    if let Some(children) = dependents_map.get(name.as_str()) {
                        for child in children {
                            queue.push_back((*child).to_string());
                        }
                    }
                }
            }
        }

        // 決定的な順序: 名前順
        let mut nodes: Vec<String> = included.into_iter().collect();
        nodes.sort();
        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        let mut dependencies = vec![Vec::new(); nodes.len()];
        let mut dependents = vec![Vec::new(); nodes.len()];
        for (i, name) in nodes.iter().enumerate() {
            let service = &project.services[name];
            for dep in &service.depends_on {
                // 閉包外への依存は後退アクションで起こり得る（無視してよい）
                if let Some(&dep_idx) = index.get(&dep.service) {
                    dependencies[i].push((dep_idx, dep.condition));
                    dependents[dep_idx].push(i);
                }
            }
        }
        for deps in &mut dependencies {
            deps.sort_by_key(|(idx, _)| *idx);
        }
        for deps in &mut dependents {
            deps.sort();
        }

        let graph = Self {
            nodes,
            index,
            dependencies,
            dependents,
        };
        graph.reject_cycle()?;
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn name(&self, idx: usize) -> &str {
        &self.nodes[idx]
    }

    pub fn names(&self) -> &[String] {
        &self.nodes
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// ノードの依存エッジ（条件付き）
    pub fn dependencies_of(&self, idx: usize) -> &[(usize, DependCondition)] {
        &self.dependencies[idx]
    }

    /// 走行方向における前任者の数
    pub fn predecessor_counts(&self, direction: Direction) -> Vec<usize> {
        match direction {
            Direction::Forward => self.dependencies.iter().map(Vec::len).collect(),
            Direction::Reverse => self.dependents.iter().map(Vec::len).collect(),
        }
    }

    /// 走行方向における後続ノード
    pub fn successors(&self, idx: usize, direction: Direction) -> Vec<usize> {
        match direction {
            Direction::Forward => self.dependents[idx].clone(),
            Direction::Reverse => self.dependencies[idx].iter().map(|(i, _)| *i).collect(),
        }
    }

    /// 後続の推移閉包（失敗時のskip伝播用）
    pub fn transitive_successors(&self, idx: usize, direction: Direction) -> Vec<usize> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<usize> = self.successors(idx, direction).into();
        while let Some(node) = queue.pop_front() {
            if seen.insert(node) {
                queue.extend(self.successors(node, direction));
            }
        }
        let mut result: Vec<usize> = seen.into_iter().collect();
        result.sort();
        result
    }

    /// Kahnのアルゴリズムで循環を拒否
    ///
    /// 通常はロード時に検証済みで、ここに到達するのは不正な入力のみ。
    fn reject_cycle(&self) -> Result<()> {
        let mut counts = self.predecessor_counts(Direction::Forward);
        let mut queue: VecDeque<usize> = counts
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == 0)
            .map(|(i, _)| i)
            .collect();
        let mut visited = 0;
        while let Some(node) = queue.pop_front() {
            visited += 1;
            for succ in &self.dependents[node] {
                counts[*succ] -= 1;
                if counts[*succ] == 0 {
                    queue.push_back(*succ);
                }
            }
        }
        if visited != self.nodes.len() {
            let remaining: Vec<&str> = counts
                .iter()
                .enumerate()
                .filter(|(_, c)| **c > 0)
                .map(|(i, _)| self.nodes[i].as_str())
                .collect();
            return Err(OrchestratorError::Compose(ComposeError::DependencyCycle(
                remaining.join(" -> "),
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_core::{DependsOn, Service};

    fn project_with(edges: &[(&str, &[&str])]) -> Project {
        let mut project = Project {
            name: "test".to_string(),
            ..Default::default()
        };
        for (name, deps) in edges {
            project.services.insert(
                name.to_string(),
                Service {
                    image: Some("alpine".to_string()),
                    depends_on: deps
                        .iter()
                        .map(|d| DependsOn {
                            service: d.to_string(),
                            condition: DependCondition::default(),
                        })
                        .collect(),
                    ..Default::default()
                },
            );
        }
        project
    }

    #[test]
    fn test_nodes_sorted_by_name() {
        let project = project_with(&[("web", &[]), ("app", &[]), ("db", &[])]);
        let graph = ServiceGraph::build(&project, &[], Direction::Forward).unwrap();
        assert_eq!(graph.names(), &["app", "db", "web"]);
    }

    #[test]
    fn test_forward_closure_includes_dependencies() {
        let project = project_with(&[("app", &["db"]), ("db", &[]), ("other", &[])]);
        let graph =
            ServiceGraph::build(&project, &["app".to_string()], Direction::Forward).unwrap();
        assert_eq!(graph.names(), &["app", "db"]);
    }

    #[test]
    fn test_reverse_closure_includes_dependents() {
        let project = project_with(&[("app", &["db"]), ("db", &[]), ("other", &[])]);
        let graph =
            ServiceGraph::build(&project, &["db".to_string()], Direction::Reverse).unwrap();
        assert_eq!(graph.names(), &["app", "db"]);
    }

    #[test]
    fn test_predecessor_counts_by_direction() {
        let project = project_with(&[("app", &["db"]), ("db", &[])]);
        let graph = ServiceGraph::build(&project, &[], Direction::Forward).unwrap();

        let app = graph.index_of("app").unwrap();
        let db = graph.index_of("db").unwrap();

        let forward = graph.predecessor_counts(Direction::Forward);
        assert_eq!(forward[app], 1);
        assert_eq!(forward[db], 0);

        let reverse = graph.predecessor_counts(Direction::Reverse);
        assert_eq!(reverse[app], 0);
        assert_eq!(reverse[db], 1);
    }

    #[test]
    fn test_transitive_successors() {
        let project = project_with(&[("a", &[]), ("b", &["a"]), ("c", &["b"]), ("d", &[])]);
        let graph = ServiceGraph::build(&project, &[], Direction::Forward).unwrap();

        let a = graph.index_of("a").unwrap();
        let skipped = graph.transitive_successors(a, Direction::Forward);
        let names: Vec<&str> = skipped.iter().map(|i| graph.name(*i)).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_cycle_rejected() {
        let project = project_with(&[("a", &["b"]), ("b", &["a"])]);
        let err = ServiceGraph::build(&project, &[], Direction::Forward).unwrap_err();
        assert!(err.to_string().contains("cycle"));
        assert_eq!(err.exit_code(), 125);
    }

    #[test]
    fn test_unknown_filter_rejected() {
        let project = project_with(&[("a", &[])]);
        let err = ServiceGraph::build(&project, &["ghost".to_string()], Direction::Forward)
            .unwrap_err();
        assert_eq!(err.exit_code(), 125);
    }
}
