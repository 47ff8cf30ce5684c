//! Precedence constraints and control flow graph analysis
//!
//! Constraints become [`PrecedenceEdge`]s. The [`PrecedenceGraph`] built over
//! them answers root, leaf, fan-out and ordering queries, and detects the
//! first cycle without trying to enumerate every one.

use std::collections::{HashMap, HashSet, VecDeque};

use ssisflow_core::{DiagnosticCode, PrecedenceCondition, PrecedenceEdge};

use crate::context::ParseContext;
use crate::document::{ns, Element};
use crate::metadata::is_true;

/// Map a constraint value to a condition
///
/// Accepts the symbolic names and the codes 0 to 3. A missing value means
/// success; anything else unrecognized yields `None`.
pub fn map_condition(raw: Option<&str>) -> Option<PrecedenceCondition> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Some(PrecedenceCondition::Success);
    };

    match raw.to_ascii_lowercase().as_str() {
        "success" | "0" => Some(PrecedenceCondition::Success),
        "failure" | "1" => Some(PrecedenceCondition::Failure),
        "completion" | "2" => Some(PrecedenceCondition::Completion),
        "expression" | "3" => Some(PrecedenceCondition::Expression),
        _ => None,
    }
}

/// Expression payload of a constraint, first match wins
fn constraint_expression(constraint: Element<'_>) -> Option<String> {
    let from_property = constraint
        .descendants_named(ns::DTS, "Property")
        .find(|p| p.attr("Name") == Some("Expression"))
        .and_then(|p| p.text());

    let from_element = || {
        constraint
            .descendants_named(ns::DTS, "Expression")
            .find_map(|e| e.text())
    };

    let from_object_data = || {
        constraint
            .child(ns::DTS, "ObjectData")
            .and_then(|d| d.descendants().find_map(|e| e.attr_text("Expression")))
    };

    from_property
        .or_else(from_element)
        .or_else(from_object_data)
        .or_else(|| constraint.attr_text("Expression"))
        .map(|e| e.trim().to_string())
}

fn parse_constraint(constraint: Element<'_>, ctx: &mut ParseContext<'_>) -> Option<PrecedenceEdge> {
    let element_id = constraint.attr("refId");

    let (Some(from), Some(to)) = (constraint.attr_text("From"), constraint.attr_text("To")) else {
        ctx.warn(
            DiagnosticCode::MissingAttribute,
            "Precedence constraint without From or To skipped",
            element_id,
        );
        return None;
    };

    let raw_value = constraint.attr("Value");
    let Some(mut condition) = map_condition(raw_value) else {
        ctx.warn(
            DiagnosticCode::InvalidPrecedenceCondition,
            format!(
                "Unknown precedence condition '{}' on {} -> {}; edge skipped",
                raw_value.unwrap_or_default(),
                from,
                to
            ),
            element_id,
        );
        return None;
    };

    // EvalOp 0 is expression only; 2 and 3 combine an expression with the value
    let eval_op = constraint.attr_text("EvalOp");
    if eval_op == Some("0") {
        condition = PrecedenceCondition::Expression;
    }
    let wants_expression =
        condition == PrecedenceCondition::Expression || matches!(eval_op, Some("2" | "3"));

    let expression = if wants_expression {
        constraint_expression(constraint)
    } else {
        None
    };

    if condition == PrecedenceCondition::Expression && expression.is_none() {
        ctx.warn(
            DiagnosticCode::MissingPrecedenceExpression,
            format!("Expression constraint {} -> {} has no expression; edge skipped", from, to),
            element_id,
        );
        return None;
    }

    let logical_and = constraint
        .attr("LogicalAnd")
        .map(|v| is_true(Some(v)))
        .unwrap_or(true);

    tracing::debug!(from, to, condition = %condition, "Parsed precedence constraint");

    Some(PrecedenceEdge {
        from: from.to_string(),
        to: to.to_string(),
        condition,
        expression,
        logical_and,
    })
}

/// Every precedence constraint in the document, in document order
pub fn extract_edges(root: Element<'_>, ctx: &mut ParseContext<'_>) -> Vec<PrecedenceEdge> {
    let edges: Vec<PrecedenceEdge> = root
        .descendants_named(ns::DTS, "PrecedenceConstraint")
        .filter_map(|c| parse_constraint(c, ctx))
        .collect();

    tracing::info!(count = edges.len(), "Found precedence constraints");
    edges
}

/// Control flow graph over executable ids
#[derive(Debug, Clone)]
pub struct PrecedenceGraph {
    /// Known executables first, then any unknown edge endpoints
    nodes: Vec<String>,

    known: HashSet<String>,

    /// from -> [to], in edge order
    children: HashMap<String, Vec<String>>,

    /// to -> [from], in edge order
    parents: HashMap<String, Vec<String>>,

    /// from -> [to] over success edges only
    success_children: HashMap<String, Vec<String>>,
}

impl PrecedenceGraph {
    /// Build the adjacency lists
    pub fn from_edges<'a>(executable_ids: impl IntoIterator<Item = &'a str>, edges: &[PrecedenceEdge]) -> Self {
        let mut nodes: Vec<String> = Vec::new();
        let mut known = HashSet::new();
        for id in executable_ids {
            if known.insert(id.to_string()) {
                nodes.push(id.to_string());
            }
        }

        let mut seen: HashSet<String> = known.clone();
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        let mut parents: HashMap<String, Vec<String>> = HashMap::new();
        let mut success_children: HashMap<String, Vec<String>> = HashMap::new();

        for edge in edges {
            for endpoint in [&edge.from, &edge.to] {
                if seen.insert(endpoint.clone()) {
                    nodes.push(endpoint.clone());
                }
            }

            children.entry(edge.from.clone()).or_default().push(edge.to.clone());
            parents.entry(edge.to.clone()).or_default().push(edge.from.clone());

            if edge.condition == PrecedenceCondition::Success {
                success_children
                    .entry(edge.from.clone())
                    .or_default()
                    .push(edge.to.clone());
            }
        }

        Self {
            nodes,
            known,
            children,
            parents,
            success_children,
        }
    }

    /// Immediate successors of an executable
    pub fn children(&self, id: &str) -> &[String] {
        self.children.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Immediate predecessors of an executable
    pub fn parents(&self, id: &str) -> &[String] {
        self.parents.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Executables that never appear as an edge target
    pub fn roots(&self) -> Vec<&str> {
        self.known_nodes()
            .filter(|id| !self.parents.contains_key(*id))
            .collect()
    }

    /// Executables that never appear as an edge source
    pub fn leaves(&self) -> Vec<&str> {
        self.known_nodes()
            .filter(|id| !self.children.contains_key(*id))
            .collect()
    }

    /// Executables touching no edge at all
    pub fn isolated(&self) -> Vec<&str> {
        self.known_nodes()
            .filter(|id| !self.parents.contains_key(*id) && !self.children.contains_key(*id))
            .collect()
    }

    /// Sources with more than one success edge, and their targets
    pub fn parallel_groups(&self) -> Vec<(&str, &[String])> {
        self.nodes
            .iter()
            .filter_map(|id| {
                self.success_children
                    .get(id)
                    .filter(|targets| targets.len() > 1)
                    .map(|targets| (id.as_str(), targets.as_slice()))
            })
            .collect()
    }

    /// Edge endpoints that name no known executable, in first-seen order
    pub fn unresolved(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .map(String::as_str)
            .filter(|id| !self.known.contains(*id))
            .collect()
    }

    /// First cycle found by depth-first search
    ///
    /// The returned path starts and ends on the same node.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = Vec::new();

        for node in &self.nodes {
            if visited.contains(node.as_str()) {
                continue;
            }
            if let Some(cycle) = self.cycle_from(node, &mut visited, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }

    fn cycle_from<'g>(
        &'g self,
        node: &'g str,
        visited: &mut HashSet<&'g str>,
        stack: &mut Vec<&'g str>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        stack.push(node);

        for next in self.children(node) {
            if let Some(start) = stack.iter().position(|s| *s == next.as_str()) {
                let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(next.clone());
                return Some(cycle);
            }
            if !visited.contains(next.as_str()) {
                if let Some(cycle) = self.cycle_from(next, visited, stack) {
                    return Some(cycle);
                }
            }
        }

        stack.pop();
        None
    }

    /// Transitive successors, breadth first
    pub fn downstream(&self, id: &str) -> Vec<String> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<&String> = self.children(id).iter().collect();
        let mut result = Vec::new();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.as_str()) {
                continue;
            }
            result.push(current.clone());

            for child in self.children(current) {
                if !visited.contains(child.as_str()) {
                    queue.push_back(child);
                }
            }
        }

        result
    }

    /// Kahn ordering of every node, `None` when the graph has a cycle
    pub fn topological_order(&self) -> Option<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.as_str(), self.parents(n).len()))
            .collect();

        let mut queue: VecDeque<&str> = self
            .nodes
            .iter()
            .map(String::as_str)
            .filter(|n| in_degree.get(n) == Some(&0))
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(node) = queue.pop_front() {
            order.push(node.to_string());
            for child in self.children(node) {
                if let Some(degree) = in_degree.get_mut(child.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(child);
                    }
                }
            }
        }

        (order.len() == self.nodes.len()).then_some(order)
    }

    fn known_nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .iter()
            .map(String::as_str)
            .filter(|id| self.known.contains(*id))
    }

    /// Report unresolved endpoints, the first cycle and isolated executables
    pub fn validate(&self, ctx: &mut ParseContext<'_>) {
        for id in self.unresolved() {
            ctx.warn(
                DiagnosticCode::UnresolvedReference,
                format!("Precedence constraint references unknown executable '{}'", id),
                Some(id),
            );
        }

        if let Some(cycle) = self.find_cycle() {
            ctx.warn(
                DiagnosticCode::PrecedenceCycle,
                format!("Precedence cycle detected: {}", cycle.join(" -> ")),
                cycle.first().map(String::as_str),
            );
            ctx.relate_last(cycle);
        }

        let isolated = self.isolated();
        if !isolated.is_empty() && self.known.len() > 1 {
            ctx.info(
                DiagnosticCode::IsolatedExecutable,
                format!("{} executable(s) have no precedence constraints", isolated.len()),
                None,
            );
            ctx.relate_last(isolated.iter().map(|id| id.to_string()).collect());
        }
    }
}
