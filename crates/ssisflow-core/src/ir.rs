//! Package intermediate representation
//!
//! Records are plain values. They are assembled once at the end of a package
//! parse and never mutated afterwards. Collections keep document order so
//! re-parsing identical bytes yields identical JSON.

use serde::{Deserialize, Serialize};

use crate::properties::PropertyMap;
use crate::tags::{
    ComponentType, ConnectionType, ExecutableType, PrecedenceCondition, ProtectionLevel,
    SqlDialect, WriteMode,
};

/// Scope name for package-level variables and expressions
pub const PACKAGE_SCOPE: &str = "Package";

/// Sentinel stored in place of every sensitive value
pub const REDACTED: &str = "[REDACTED]";

/// Package-level metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub name: String,

    pub protection_level: ProtectionLevel,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PackageMetadata {
    /// Metadata carrying only a name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            protection_level: ProtectionLevel::default(),
            version: None,
            creator: None,
            creation_date: None,
            description: None,
        }
    }
}

/// Package or project parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,

    pub data_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub sensitive: bool,
}

/// Package variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,

    /// Variable namespace, `User` or `System`
    pub namespace: String,

    /// Owning executable id, or [`PACKAGE_SCOPE`]
    pub scope: String,

    pub data_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Expression that computes the value, when the variable is evaluated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Variable {
    /// Namespace-qualified name, e.g. `User::BatchId`
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.namespace, self.name)
    }
}

/// Connection manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionManager {
    /// Unique id referenced by tasks and components
    pub id: String,

    pub name: String,

    pub connection_type: ConnectionType,

    /// Properties; sensitive values are already redacted
    pub properties: PropertyMap,

    pub sensitive: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Component inside a data flow pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFlowComponent {
    /// Unique within the owning pipeline
    pub id: String,

    pub name: String,

    pub component_type: ComponentType,

    /// Raw component class id as written in the package
    pub class_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_ref: Option<String>,

    /// Every property, verbatim
    pub properties: PropertyMap,

    /// Path ids feeding this component, in wiring order
    pub inputs: Vec<String>,

    /// Path ids leaving this component, in wiring order
    pub outputs: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_keys: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookup_table: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_mode: Option<WriteMode>,
}

/// Control flow task or container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Executable {
    /// Hierarchical id such as `Package\Load\Stage Orders`
    pub id: String,

    /// Id of the owning container, `None` for top-level executables
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    pub executable_type: ExecutableType,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_dialect: Option<SqlDialect>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_ref: Option<String>,

    /// Pipeline components, only populated for data flow tasks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<DataFlowComponent>,

    pub properties: PropertyMap,

    pub disabled: bool,

    pub delay_validation: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variable_refs: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameter_refs: Vec<String>,
}

impl Executable {
    /// Bare executable with no task payload
    pub fn new(id: impl Into<String>, name: impl Into<String>, executable_type: ExecutableType) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            executable_type,
            name: name.into(),
            description: None,
            sql: None,
            sql_dialect: None,
            connection_ref: None,
            components: Vec::new(),
            properties: PropertyMap::new(),
            disabled: false,
            delay_validation: false,
            variable_refs: Vec::new(),
            parameter_refs: Vec::new(),
        }
    }

    pub fn component(&self, id: &str) -> Option<&DataFlowComponent> {
        self.components.iter().find(|c| c.id == id)
    }
}

/// Directed, conditioned edge between two executables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecedenceEdge {
    pub from: String,

    pub to: String,

    pub condition: PrecedenceCondition,

    /// Present whenever `condition` is [`PrecedenceCondition::Expression`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,

    /// All converging constraints must hold (`true`) or any one (`false`)
    pub logical_and: bool,
}

/// Property expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expression {
    /// Owning executable id, or [`PACKAGE_SCOPE`]
    pub scope: String,

    /// Property the expression computes
    pub property: String,

    pub text: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variable_refs: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameter_refs: Vec<String>,
}

/// Parsed package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrPackage {
    pub metadata: PackageMetadata,

    pub parameters: Vec<Parameter>,

    pub variables: Vec<Variable>,

    pub connections: Vec<ConnectionManager>,

    /// Pre-order flattening of the executable tree
    pub executables: Vec<Executable>,

    pub edges: Vec<PrecedenceEdge>,

    pub expressions: Vec<Expression>,
}

impl IrPackage {
    /// Empty package carrying only a name
    ///
    /// Returned for packages that failed to parse so callers never see a
    /// half-populated structure.
    pub fn minimal(name: impl Into<String>) -> Self {
        Self {
            metadata: PackageMetadata::named(name),
            parameters: Vec::new(),
            variables: Vec::new(),
            connections: Vec::new(),
            executables: Vec::new(),
            edges: Vec::new(),
            expressions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// True when nothing was extracted beyond the name
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
            && self.variables.is_empty()
            && self.connections.is_empty()
            && self.executables.is_empty()
            && self.edges.is_empty()
            && self.expressions.is_empty()
    }

    pub fn executable(&self, id: &str) -> Option<&Executable> {
        self.executables.iter().find(|e| e.id == id)
    }

    pub fn connection(&self, id: &str) -> Option<&ConnectionManager> {
        self.connections.iter().find(|c| c.id == id)
    }

    /// Data flow tasks in document order
    pub fn data_flows(&self) -> impl Iterator<Item = &Executable> {
        self.executables
            .iter()
            .filter(|e| e.executable_type == ExecutableType::DataFlow)
    }

    /// Execute SQL tasks in document order
    pub fn sql_tasks(&self) -> impl Iterator<Item = &Executable> {
        self.executables
            .iter()
            .filter(|e| e.executable_type == ExecutableType::ExecuteSql)
    }

    /// Direct children of a container
    pub fn children_of<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Executable> + 'a {
        self.executables
            .iter()
            .filter(move |e| e.parent_id.as_deref() == Some(id))
    }

    /// Whether the package only transforms data already in the warehouse
    ///
    /// False as soon as any executable ingests external data or any data flow
    /// reads or writes a flat file.
    pub fn is_transformation_only(&self) -> bool {
        let ingests = self
            .executables
            .iter()
            .any(|e| e.executable_type.is_ingestion());

        let touches_files = self
            .data_flows()
            .flat_map(|e| e.components.iter())
            .any(|c| c.component_type.is_flat_file());

        !ingests && !touches_files
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// SHA-256 of the canonical JSON form
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        use sha2::{Digest, Sha256};

        let canonical = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Ok(hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn component(id: &str, component_type: ComponentType) -> DataFlowComponent {
        DataFlowComponent {
            id: id.to_string(),
            name: id.to_string(),
            component_type,
            class_id: String::new(),
            sql: None,
            table: None,
            expression: None,
            connection_ref: None,
            properties: PropertyMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            join_keys: None,
            lookup_table: None,
            write_mode: None,
        }
    }

    fn data_flow_package(source: ComponentType) -> IrPackage {
        let mut task = Executable::new("Package\\Load", "Load", ExecutableType::DataFlow);
        task.components = vec![
            component("src", source),
            component("dst", ComponentType::OledbDestination),
        ];

        let mut package = IrPackage::minimal("Load");
        package.executables.push(task);
        package
    }

    #[test]
    fn oledb_only_data_flow_is_transformation_only() {
        assert!(data_flow_package(ComponentType::OledbSource).is_transformation_only());
    }

    #[test]
    fn flat_file_source_breaks_transformation_only() {
        assert!(!data_flow_package(ComponentType::FlatFileSource).is_transformation_only());
    }

    #[test]
    fn ingestion_task_breaks_transformation_only() {
        let mut package = IrPackage::minimal("Ingest");
        package
            .executables
            .push(Executable::new("Package\\Bulk", "Bulk", ExecutableType::BulkInsert));
        assert!(!package.is_transformation_only());
    }

    #[test]
    fn minimal_package_is_empty() {
        let package = IrPackage::minimal("Broken");
        assert_eq!(package.name(), "Broken");
        assert!(package.is_empty());
        assert!(package.is_transformation_only());
    }

    #[test]
    fn json_round_trip_and_stable_fingerprint() {
        let mut package = data_flow_package(ComponentType::OledbSource);
        package.edges.push(PrecedenceEdge {
            from: "Package\\Load".to_string(),
            to: "Package\\Load".to_string(),
            condition: PrecedenceCondition::Expression,
            expression: Some("@[User::Run] == 1".to_string()),
            logical_and: true,
        });

        let json = package.to_json().unwrap();
        let back = IrPackage::from_json(&json).unwrap();
        assert_eq!(back, package);
        assert_eq!(back.fingerprint().unwrap(), package.fingerprint().unwrap());
        assert_eq!(package.fingerprint().unwrap().len(), 64);
    }

    #[test]
    fn children_follow_parent_id() {
        let mut package = IrPackage::minimal("Nested");
        package.executables.push(Executable::new(
            "Package\\Seq",
            "Seq",
            ExecutableType::SequenceContainer,
        ));
        let mut child = Executable::new("Package\\Seq\\Run", "Run", ExecutableType::ExecuteSql);
        child.parent_id = Some("Package\\Seq".to_string());
        package.executables.push(child);

        let children: Vec<_> = package.children_of("Package\\Seq").map(|e| e.name.as_str()).collect();
        assert_eq!(children, vec!["Run"]);
        assert_eq!(package.sql_tasks().count(), 1);
    }
}
