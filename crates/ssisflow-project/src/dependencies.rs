//! Raw dependency scan
//!
//! Finds execute-package tasks straight from the document, before any IR is
//! assembled, so a package that later fails to parse still contributes its
//! edges to the project graph.

use std::collections::HashMap;

use ssisflow_core::{ExecutableType, PackageDependency, PrecedenceCondition};
use ssisflow_dtsx::document::load_package;
use ssisflow_dtsx::{execute_package_target, map_condition, map_executable_type, ns, DocumentLoadError, Element};

/// `refId`, or the owning container's id joined with the object name
fn executable_id(executable: Element<'_>) -> String {
    if let Some(id) = executable.attr_text("refId") {
        return id.to_string();
    }
    match executable.ancestors().find(|a| a.is(ns::DTS, "Executable")) {
        Some(container) => format!(
            "{}\\{}",
            executable_id(container),
            executable.attr_text("ObjectName").unwrap_or_default()
        ),
        None => "Package".to_string(),
    }
}

/// Execute-package edges declared by one package
pub fn scan_dependencies(package: &str, bytes: &[u8]) -> Result<Vec<PackageDependency>, DocumentLoadError> {
    let document = load_package(bytes)?;
    let root = document.root();

    // Condition on the first constraint leading into each task
    let mut incoming: HashMap<&str, Option<PrecedenceCondition>> = HashMap::new();
    for constraint in root.descendants_named(ns::DTS, "PrecedenceConstraint") {
        let Some(to) = constraint.attr_text("To") else {
            continue;
        };
        let condition = if constraint.attr("EvalOp").map(str::trim) == Some("0") {
            Some(PrecedenceCondition::Expression)
        } else {
            map_condition(constraint.attr("Value"))
        };
        incoming.entry(to).or_insert(condition);
    }

    let mut dependencies = Vec::new();
    for task in root.descendants_named(ns::DTS, "Executable") {
        let raw_type = task.attr("ExecutableType").unwrap_or("");
        if map_executable_type(raw_type) != ExecutableType::ExecutePackage {
            continue;
        }

        let task_name = task.attr_text("ObjectName").unwrap_or("Execute Package Task");
        let Some(child) = execute_package_target(task) else {
            tracing::debug!(package, task = task_name, "Execute package task without a target package");
            continue;
        };

        let task_id = executable_id(task);

        dependencies.push(PackageDependency {
            parent: package.to_string(),
            child,
            task_name: task_name.to_string(),
            condition: incoming.get(task_id.as_str()).copied().flatten(),
            task_id,
        });
    }

    tracing::debug!(package, count = dependencies.len(), "Scanned package dependencies");
    Ok(dependencies)
}
