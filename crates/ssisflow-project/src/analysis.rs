//! Package invocation graph
//!
//! Nodes are the project's packages; an edge `parent -> child` exists for
//! every execute-package task in `parent` naming `child`. Children outside
//! the project stay on the edge lists so chains still show them.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use ssisflow_core::{ExecutionChain, PackageDependency};

/// Directed graph of package invocations
#[derive(Debug, Clone, Default)]
pub struct PackageGraph {
    /// Project packages, sorted
    nodes: BTreeSet<String>,

    /// parent -> invoked packages, in task order, without repeats
    children: BTreeMap<String, Vec<String>>,

    /// child -> invoking packages
    parents: BTreeMap<String, Vec<String>>,
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

impl PackageGraph {
    /// Build from the project's package names and scanned dependencies
    ///
    /// Edges whose parent is not a project package are ignored.
    pub fn from_dependencies<'a>(
        packages: impl IntoIterator<Item = &'a str>,
        dependencies: &[PackageDependency],
    ) -> Self {
        let nodes: BTreeSet<String> = packages.into_iter().map(str::to_string).collect();
        let mut children: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut parents: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for dependency in dependencies {
            if !nodes.contains(&dependency.parent) {
                tracing::debug!(parent = %dependency.parent, "Dependency from unknown package ignored");
                continue;
            }
            push_unique(children.entry(dependency.parent.clone()).or_default(), &dependency.child);
            push_unique(parents.entry(dependency.child.clone()).or_default(), &dependency.parent);
        }

        Self {
            nodes,
            children,
            parents,
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains(name)
    }

    pub fn children(&self, name: &str) -> &[String] {
        self.children.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parents(&self, name: &str) -> &[String] {
        self.parents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn edge_count(&self) -> usize {
        self.children.values().map(Vec::len).sum()
    }

    /// Packages never invoked by another package
    pub fn entry_points(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| self.parents(n).is_empty())
            .cloned()
            .collect()
    }

    /// Packages with neither incoming nor outgoing invocations
    pub fn isolated(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| self.parents(n).is_empty() && self.children(n).is_empty())
            .cloned()
            .collect()
    }

    /// Depth-first invocation order from `start`
    ///
    /// Each branch carries its own visited set, so a package reached twice
    /// through different branches appears twice; a package already on the
    /// current branch ends that branch.
    pub fn execution_chain(&self, start: &str) -> Vec<String> {
        let mut chain = Vec::new();
        self.trace(start, &HashSet::new(), &mut chain);
        chain
    }

    fn trace<'g>(&'g self, node: &'g str, branch: &HashSet<&'g str>, chain: &mut Vec<String>) {
        if branch.contains(node) {
            return;
        }

        let mut branch = branch.clone();
        branch.insert(node);
        chain.push(node.to_string());

        for child in self.children(node) {
            self.trace(child, &branch, chain);
        }
    }

    /// Chains for every entry point that invokes at least one package
    pub fn execution_chains(&self) -> Vec<ExecutionChain> {
        self.entry_points()
            .into_iter()
            .filter_map(|entry_point| {
                let packages = self.execution_chain(&entry_point);
                (packages.len() > 1).then_some(ExecutionChain {
                    entry_point,
                    packages,
                })
            })
            .collect()
    }

    /// Every package transitively invoked by `name`, breadth first
    pub fn downstream(&self, name: &str) -> Vec<String> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = self.children(name).iter().map(String::as_str).collect();
        let mut result = Vec::new();

        while let Some(current) = queue.pop_front() {
            if current == name || !visited.insert(current) {
                continue;
            }
            result.push(current.to_string());
            queue.extend(self.children(current).iter().map(String::as_str));
        }

        result
    }

    /// Every package that transitively invokes `name`, breadth first
    pub fn upstream(&self, name: &str) -> Vec<String> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = self.parents(name).iter().map(String::as_str).collect();
        let mut result = Vec::new();

        while let Some(current) = queue.pop_front() {
            if current == name || !visited.insert(current) {
                continue;
            }
            result.push(current.to_string());
            queue.extend(self.parents(current).iter().map(String::as_str));
        }

        result
    }

    /// First invocation cycle, closed on its starting package
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut done: HashSet<&str> = HashSet::new();
        let mut path: Vec<&str> = Vec::new();

        self.nodes
            .iter()
            .find_map(|node| self.cycle_through(node, &mut done, &mut path))
    }

    fn cycle_through<'g>(
        &'g self,
        node: &'g str,
        done: &mut HashSet<&'g str>,
        path: &mut Vec<&'g str>,
    ) -> Option<Vec<String>> {
        if done.contains(node) {
            return None;
        }
        if let Some(start) = path.iter().position(|p| *p == node) {
            let mut cycle: Vec<String> = path[start..].iter().map(|p| p.to_string()).collect();
            cycle.push(node.to_string());
            return Some(cycle);
        }

        path.push(node);
        for child in self.children(node) {
            if let Some(cycle) = self.cycle_through(child, done, path) {
                return Some(cycle);
            }
        }
        path.pop();
        done.insert(node);
        None
    }

    /// Orchestration advice for the project as a whole
    pub fn recommendations(&self) -> Vec<String> {
        let mut recommendations = Vec::new();

        if self.entry_points().len() > 1 {
            recommendations.push(
                "Multiple entry points detected - consider creating a master DAG for orchestration".to_string(),
            );
        }

        let isolated = self.isolated();
        if !isolated.is_empty() {
            recommendations.push(format!(
                "Isolated packages found: {:?} - these can be independent DAGs",
                isolated
            ));
        }

        if self.edge_count() == 0 {
            recommendations.push("No package dependencies found - all packages can run independently".to_string());
        }

        recommendations
    }
}
