//! Diagnostic codes and error reporting
//!
//! IMPORTANT: Diagnostic codes are versioned and stable.
//! NEVER rename or remove codes - they are part of the public API.
//! Add new codes with new names only.

use serde::{Deserialize, Serialize};

/// Diagnostic code registry (v1)
///
/// These codes are STABLE and VERSIONED.
/// Do NOT rename or remove codes - only add new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    // Document loading (1xxx)
    /// Package document could not be read or parsed
    DocumentLoadFailed,

    /// Document was malformed; parsing recovered what it could
    DocumentRecovered,

    // Security (2xxx)
    /// Package is fully encrypted and cannot be read
    PackageEncrypted,

    /// Sensitive values could not be decrypted and were redacted instead
    DecryptionUnavailable,

    /// Protection level string was not recognised
    UnknownProtectionLevel,

    /// Connection manager carries redacted sensitive properties
    SensitiveDataRedacted,

    /// SQL text appears to embed credentials
    HardcodedCredentials,

    // Unsupported constructs (3xxx)
    /// Executable type not in the mapping table
    UnsupportedExecutable,

    /// Data flow component class not in the mapping table
    UnsupportedComponent,

    /// Connection manager creation name not in the mapping table
    UnsupportedConnection,

    /// Element was missing a required attribute and was skipped
    MissingAttribute,

    /// Two entries share a key that must be unique
    DuplicateKey,

    // Control flow (4xxx)
    /// Precedence constraint references an unknown executable
    UnresolvedReference,

    /// Precedence constraint value could not be mapped
    InvalidPrecedenceCondition,

    /// Expression-conditioned constraint without an expression
    MissingPrecedenceExpression,

    /// Cycle found in the precedence graph
    PrecedenceCycle,

    /// Executables with no precedence constraints
    IsolatedExecutable,

    // Data flow (5xxx)
    /// Data flow task without a pipeline element
    DataflowMissingPipeline,

    /// Path endpoint does not resolve to a component
    DataflowUnresolvedPath,

    /// Component input is not produced by any component
    DataflowUnwiredInput,

    /// Path produced by more than one component
    DataflowFanIn,

    // Expressions (6xxx)
    /// Expression failed basic syntax checks
    ExpressionSyntax,

    /// Expression flagged for manual review
    ExpressionComplex,

    // Project (7xxx)
    /// Project file could not be parsed
    ProjectFileInvalid,

    /// Dependency scan of a package failed
    DependencyScanFailed,

    /// Execute-package task names a package outside the project
    UnknownChildPackage,

    /// Packages invoke each other in a cycle
    CircularPackageDependency,

    // General (9xxx)
    /// General informational message
    Info,

    /// General warning message
    Warning,
}

impl DiagnosticCode {
    /// Get the diagnostic code as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentLoadFailed => "DOCUMENT_LOAD_FAILED",
            Self::DocumentRecovered => "DOCUMENT_RECOVERED",
            Self::PackageEncrypted => "PACKAGE_ENCRYPTED",
            Self::DecryptionUnavailable => "DECRYPTION_UNAVAILABLE",
            Self::UnknownProtectionLevel => "UNKNOWN_PROTECTION_LEVEL",
            Self::SensitiveDataRedacted => "SENSITIVE_DATA_REDACTED",
            Self::HardcodedCredentials => "HARDCODED_CREDENTIALS",
            Self::UnsupportedExecutable => "UNSUPPORTED_EXECUTABLE",
            Self::UnsupportedComponent => "UNSUPPORTED_COMPONENT",
            Self::UnsupportedConnection => "UNSUPPORTED_CONNECTION",
            Self::MissingAttribute => "MISSING_ATTRIBUTE",
            Self::DuplicateKey => "DUPLICATE_KEY",
            Self::UnresolvedReference => "UNRESOLVED_REFERENCE",
            Self::InvalidPrecedenceCondition => "INVALID_PRECEDENCE_CONDITION",
            Self::MissingPrecedenceExpression => "MISSING_PRECEDENCE_EXPRESSION",
            Self::PrecedenceCycle => "PRECEDENCE_CYCLE",
            Self::IsolatedExecutable => "ISOLATED_EXECUTABLE",
            Self::DataflowMissingPipeline => "DATAFLOW_MISSING_PIPELINE",
            Self::DataflowUnresolvedPath => "DATAFLOW_UNRESOLVED_PATH",
            Self::DataflowUnwiredInput => "DATAFLOW_UNWIRED_INPUT",
            Self::DataflowFanIn => "DATAFLOW_FAN_IN",
            Self::ExpressionSyntax => "EXPRESSION_SYNTAX",
            Self::ExpressionComplex => "EXPRESSION_COMPLEX",
            Self::ProjectFileInvalid => "PROJECT_FILE_INVALID",
            Self::DependencyScanFailed => "DEPENDENCY_SCAN_FAILED",
            Self::UnknownChildPackage => "UNKNOWN_CHILD_PACKAGE",
            Self::CircularPackageDependency => "CIRCULAR_PACKAGE_DEPENDENCY",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
        }
    }
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message
    Info,

    /// Warning - should be reviewed but not blocking
    Warn,

    /// Error - blocking issue for the package
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Location of a finding inside a package document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Source file or archive member
    pub file: String,

    /// Identifier of the element involved (executable refId, component id, ...)
    pub element: Option<String>,
}

impl Location {
    /// Create a new location with just a file path
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            element: None,
        }
    }

    /// Create a location pointing at an element within a file
    pub fn with_element(file: impl Into<String>, element: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            element: Some(element.into()),
        }
    }
}

/// A diagnostic message with structured metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable diagnostic code
    pub code: DiagnosticCode,

    /// Severity level
    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    /// Source location (best-effort)
    pub location: Option<Location>,

    /// Identifiers involved in the finding (cycle members, unresolved ids, ...)
    pub related: Vec<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with minimal fields
    pub fn new(code: DiagnosticCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
            location: None,
            related: Vec::new(),
        }
    }

    /// Set the location
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Set related identifiers
    pub fn with_related(mut self, related: Vec<String>) -> Self {
        self.related = related;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_code_stability() {
        // Ensure codes are stable strings
        assert_eq!(DiagnosticCode::PrecedenceCycle.as_str(), "PRECEDENCE_CYCLE");
        assert_eq!(DiagnosticCode::PackageEncrypted.as_str(), "PACKAGE_ENCRYPTED");
    }

    #[test]
    fn serde_name_matches_as_str() {
        let json = serde_json::to_string(&DiagnosticCode::DataflowUnwiredInput).unwrap();
        assert_eq!(json, format!("\"{}\"", DiagnosticCode::DataflowUnwiredInput.as_str()));
    }

    #[test]
    fn diagnostic_serialization() {
        let diag = Diagnostic::new(
            DiagnosticCode::UnresolvedReference,
            Severity::Warn,
            "Precedence constraint references unknown task 'Package\\Missing'"
        )
        .with_location(Location::with_element("orders.dtsx", "Package\\Missing"));

        let json = serde_json::to_string(&diag).unwrap();
        assert!(json.contains("UNRESOLVED_REFERENCE"));
        assert!(json.contains("warn"));
    }
}
