//! DTSX package parsing
//!
//! This crate handles:
//! - Loading package documents with namespace resolution and recovery
//! - Extracting metadata, parameters, variables and connection managers
//! - Flattening the executable tree and parsing data flow pipelines
//! - Precedence graph analysis (cycles, roots, leaves, parallel groups)
//! - Expression harvesting and sensitive data redaction

pub mod error;
pub mod document;
pub mod context;
pub mod metadata;
pub mod executable;
pub mod pipeline;
pub mod precedence;
pub mod expressions;
pub mod security;
pub mod package;

pub use error::{DocumentLoadError, EncryptionError, PackageError};
pub use document::{Document, Element, ns};
pub use context::ParseContext;
pub use executable::{map_executable_type, execute_package_target, ExecutableTree};
pub use pipeline::map_component_type;
pub use precedence::{PrecedenceGraph, map_condition, extract_edges};
pub use expressions::{ExpressionComplexity, ExpressionAnalyzer, TemplateStyle};
pub use security::{SecurityHandler, ComplianceAudit, is_sensitive_key};
pub use metadata::parse_connection_manager;
pub use package::{PackageParser, ParsedPackage, fallback_name};
