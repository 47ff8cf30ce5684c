//! ssisflow Core
//!
//! Core domain model with stable, versioned types.
//! Never rename diagnostic codes - they are part of the public API.

pub mod diagnostic;
pub mod tags;
pub mod properties;
pub mod ir;
pub mod project;
pub mod report;
pub mod config;

pub use diagnostic::{Diagnostic, DiagnosticCode, Severity, Location};
pub use tags::{
    ProtectionLevel, ConnectionType, ExecutableType, ComponentType, PrecedenceCondition,
    SqlDialect, WriteMode, ComponentCategory,
};
pub use properties::PropertyMap;
pub use ir::{
    PackageMetadata, Parameter, Variable, ConnectionManager, DataFlowComponent, Executable,
    PrecedenceEdge, Expression, IrPackage, PACKAGE_SCOPE, REDACTED,
};
pub use project::{PackageDependency, PackageReference, ExecutionChain, IrProject};
pub use report::{
    PackageReport, ProjectReport, ProjectSummary, ReportSummary, ReportVersion, MigrationMode,
    ReviewItem,
};
pub use config::{ParserConfig, SeverityThreshold, ConfigError};
