//! Project intermediate representation
//!
//! An [`IrProject`] is filled in two passes: the raw pass records packages,
//! project parameters/connections and dependencies; the analysis pass fills
//! entry points, isolated packages and execution chains.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ir::{ConnectionManager, IrPackage, Parameter};
use crate::tags::{PrecedenceCondition, ProtectionLevel};

/// Package-to-package invocation edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDependency {
    /// Invoking package
    pub parent: String,

    /// Invoked package (name without extension)
    pub child: String,

    pub task_name: String,

    /// Hierarchical id of the execute-package task
    pub task_id: String,

    /// Condition on the constraint leading into the invoking task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<PrecedenceCondition>,
}

/// Package member of a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageReference {
    pub name: String,

    /// Path of the document inside the container
    pub path: String,

    /// Computed: never invoked by another package
    #[serde(default)]
    pub entry_point: bool,

    /// Computed from the package IR
    #[serde(default)]
    pub transformation_only: bool,

    /// The package failed to parse and is a placeholder
    #[serde(default)]
    pub failed: bool,
}

impl PackageReference {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            entry_point: false,
            transformation_only: false,
            failed: false,
        }
    }
}

/// Packages reachable from an entry point, in invocation order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionChain {
    pub entry_point: String,
    pub packages: Vec<String>,
}

/// Parsed project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrProject {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    pub protection_level: ProtectionLevel,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_server_version: Option<String>,

    pub parameters: Vec<Parameter>,

    pub connections: Vec<ConnectionManager>,

    /// Packages sorted by name
    pub packages: Vec<PackageReference>,

    /// Package IRs keyed by package name
    pub package_irs: BTreeMap<String, IrPackage>,

    pub dependencies: Vec<PackageDependency>,

    pub entry_points: Vec<String>,

    pub execution_chains: Vec<ExecutionChain>,

    pub isolated_packages: Vec<String>,
}

impl IrProject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            protection_level: ProtectionLevel::default(),
            target_server_version: None,
            parameters: Vec::new(),
            connections: Vec::new(),
            packages: Vec::new(),
            package_irs: BTreeMap::new(),
            dependencies: Vec::new(),
            entry_points: Vec::new(),
            execution_chains: Vec::new(),
            isolated_packages: Vec::new(),
        }
    }

    pub fn package(&self, name: &str) -> Option<&IrPackage> {
        self.package_irs.get(name)
    }

    pub fn reference(&self, name: &str) -> Option<&PackageReference> {
        self.packages.iter().find(|p| p.name == name)
    }

    /// Packages invoked by `parent`
    pub fn children_of<'a>(&'a self, parent: &'a str) -> impl Iterator<Item = &'a PackageDependency> + 'a {
        self.dependencies.iter().filter(move |d| d.parent == parent)
    }

    /// Packages invoking `child`
    pub fn parents_of<'a>(&'a self, child: &'a str) -> impl Iterator<Item = &'a PackageDependency> + 'a {
        self.dependencies.iter().filter(move |d| d.child == child)
    }

    pub fn failed_packages(&self) -> impl Iterator<Item = &PackageReference> {
        self.packages.iter().filter(|p| p.failed)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
