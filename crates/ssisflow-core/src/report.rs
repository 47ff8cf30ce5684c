//! Report schema (stable v1)
//!
//! This schema is STABLE and VERSIONED.
//! Breaking changes require a new version.

use serde::{Deserialize, Serialize};
use crate::diagnostic::{Diagnostic, Severity};

/// Report schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    /// Major version (breaking changes)
    pub major: u32,

    /// Minor version (backward-compatible additions)
    pub minor: u32,
}

impl ReportVersion {
    /// Current report schema version
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 0 };
}

impl std::fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Target a package should be migrated to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationMode {
    /// Pure in-warehouse transformation
    Dbt,

    /// Orchestration with external data movement
    Airflow,

    /// Data flows mixed with SQL tasks
    Mixed,
}

impl std::fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dbt => write!(f, "dbt"),
            Self::Airflow => write!(f, "airflow"),
            Self::Mixed => write!(f, "mixed"),
        }
    }
}

/// Item a human should look at before migrating
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewItem {
    /// Kind of construct (script_task, expression, connection, ...)
    pub kind: String,

    /// Element id or name
    pub element: String,

    pub reason: String,
}

impl ReviewItem {
    pub fn new(kind: impl Into<String>, element: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            element: element.into(),
            reason: reason.into(),
        }
    }
}

/// Summary statistics for a package report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Total number of diagnostics
    pub total: usize,

    /// Number of errors
    pub errors: usize,

    /// Number of warnings
    pub warnings: usize,

    /// Number of info messages
    pub info: usize,

    /// Executables found, supported or not
    pub executables_total: usize,

    /// Executables with a mapped type
    pub executables_supported: usize,

    /// Data flow components kept
    pub components: usize,

    /// Precedence edges kept
    pub edges: usize,
}

impl ReportSummary {
    fn count(&mut self, severity: Severity) {
        match severity {
            Severity::Error => self.errors += 1,
            Severity::Warn => self.warnings += 1,
            Severity::Info => self.info += 1,
        }
        self.total += 1;
    }
}

/// Per-package parse report
///
/// `success` means an IR was produced; warnings and errors found along the
/// way are left to the caller to weigh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageReport {
    /// Schema version
    pub version: ReportVersion,

    /// Timestamp (ISO 8601)
    pub timestamp: String,

    pub package: String,

    /// File or archive member the package was read from
    pub source: String,

    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration_mode: Option<MigrationMode>,

    pub summary: ReportSummary,

    /// Raw type strings of executables with no mapping
    #[serde(default)]
    pub unsupported_executables: Vec<String>,

    /// `connection_id.property` paths that were redacted
    #[serde(default)]
    pub redacted_properties: Vec<String>,

    #[serde(default)]
    pub manual_review: Vec<ReviewItem>,

    /// All diagnostics
    pub diagnostics: Vec<Diagnostic>,
}

impl PackageReport {
    /// Create a new empty, successful report
    pub fn new(package: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            version: ReportVersion::CURRENT,
            timestamp: chrono::Utc::now().to_rfc3339(),
            package: package.into(),
            source: source.into(),
            success: true,
            migration_mode: None,
            summary: ReportSummary::default(),
            unsupported_executables: Vec::new(),
            redacted_properties: Vec::new(),
            manual_review: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Add a diagnostic to the report
    pub fn add_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.summary.count(diagnostic.severity);
        self.diagnostics.push(diagnostic);
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        for diagnostic in diagnostics {
            self.add_diagnostic(diagnostic);
        }
    }

    /// Record a fatal failure; the package IR is a placeholder
    pub fn fail(&mut self, diagnostic: Diagnostic) {
        self.success = false;
        self.add_diagnostic(diagnostic);
    }

    /// Check if the report has any errors
    pub fn has_errors(&self) -> bool {
        self.summary.errors > 0
    }

    pub fn has_warnings(&self) -> bool {
        self.summary.warnings > 0
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save to file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = self.to_json().map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

/// Summary statistics for a project report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub packages_total: usize,
    pub packages_parsed: usize,
    pub packages_failed: usize,
    pub dependencies: usize,
    pub entry_points: usize,
    pub transformation_only: usize,
}

/// Project parse report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectReport {
    /// Schema version
    pub version: ReportVersion,

    /// Timestamp (ISO 8601)
    pub timestamp: String,

    pub project: String,

    pub summary: ProjectSummary,

    /// One report per package, sorted by package name
    pub packages: Vec<PackageReport>,

    /// Findings that belong to the project rather than a package
    pub diagnostics: Vec<Diagnostic>,

    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl ProjectReport {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            version: ReportVersion::CURRENT,
            timestamp: chrono::Utc::now().to_rfc3339(),
            project: project.into(),
            summary: ProjectSummary::default(),
            packages: Vec::new(),
            diagnostics: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    pub fn add_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Add a package report and update the package counters
    pub fn add_package(&mut self, report: PackageReport) {
        self.summary.packages_total += 1;
        if report.success {
            self.summary.packages_parsed += 1;
        } else {
            self.summary.packages_failed += 1;
        }
        self.packages.push(report);
    }

    pub fn package(&self, name: &str) -> Option<&PackageReport> {
        self.packages.iter().find(|r| r.package == name)
    }

    /// True when at least one package parsed and at least one failed
    pub fn is_partial(&self) -> bool {
        self.summary.packages_parsed > 0 && self.summary.packages_failed > 0
    }

    /// Any error, at project level or in a package
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
            || self.packages.iter().any(PackageReport::has_errors)
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save to file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = self.to_json().map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::{Diagnostic, DiagnosticCode, Severity};

    #[test]
    fn empty_report() {
        let report = PackageReport::new("Orders", "Orders.dtsx");
        assert_eq!(report.version, ReportVersion::CURRENT);
        assert_eq!(report.summary.total, 0);
        assert!(report.success);
        assert!(!report.has_errors());
    }

    #[test]
    fn report_with_diagnostics() {
        let mut report = PackageReport::new("Orders", "Orders.dtsx");
        report.extend(vec![
            Diagnostic::new(DiagnosticCode::PrecedenceCycle, Severity::Warn, "Cycle"),
            Diagnostic::new(DiagnosticCode::Info, Severity::Info, "All good"),
        ]);

        assert_eq!(report.summary.total, 2);
        assert_eq!(report.summary.warnings, 1);
        assert_eq!(report.summary.info, 1);
        assert!(!report.has_errors());
        assert!(report.success);
    }

    #[test]
    fn failure_clears_success() {
        let mut report = PackageReport::new("Secret", "Secret.dtsx");
        report.fail(Diagnostic::new(DiagnosticCode::PackageEncrypted, Severity::Error, "Encrypted"));
        assert!(!report.success);
        assert!(report.has_errors());
    }

    #[test]
    fn project_counts_partial_success() {
        let mut project = ProjectReport::new("Warehouse");
        project.add_package(PackageReport::new("A", "A.dtsx"));

        let mut broken = PackageReport::new("B", "B.dtsx");
        broken.fail(Diagnostic::new(DiagnosticCode::DocumentLoadFailed, Severity::Error, "Bad XML"));
        project.add_package(broken);

        assert_eq!(project.summary.packages_total, 2);
        assert_eq!(project.summary.packages_failed, 1);
        assert!(project.is_partial());
        assert!(project.has_errors());
    }

    #[test]
    fn report_serialization() {
        let mut report = PackageReport::new("Orders", "Orders.dtsx");
        report.migration_mode = Some(MigrationMode::Dbt);
        let json = report.to_json().unwrap();
        assert!(json.contains("\"version\""));
        assert!(json.contains("\"diagnostics\""));
        assert!(json.contains("\"dbt\""));
    }
}
