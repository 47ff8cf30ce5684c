//! Single package parse
//!
//! Runs the extractors in order over one loaded document and assembles the
//! IR and its report. A fatal failure (unloadable document, unreadable
//! encryption) yields a name-only IR and a failed report, never a partially
//! populated package.

use std::path::Path;

use ssisflow_core::{
    Diagnostic, DiagnosticCode, ExecutableType, IrPackage, Location, MigrationMode, PackageReport,
    ParserConfig, ProtectionLevel, ReviewItem, Severity,
};

use crate::context::ParseContext;
use crate::document::{load_package, Document};
use crate::error::{DocumentLoadError, PackageError};
use crate::executable::extract_executables;
use crate::expressions::{complexity, ExpressionAnalyzer, ExpressionComplexity};
use crate::metadata::{extract_connections, extract_metadata, extract_parameters, extract_variables};
use crate::precedence::{extract_edges, PrecedenceGraph};
use crate::security::{ComplianceAudit, SecurityHandler};

/// Expressions longer than this are flagged for review
const LONG_EXPRESSION: usize = 100;

/// IR and report for one package
#[derive(Debug, Clone)]
pub struct ParsedPackage {
    pub package: IrPackage,
    pub report: PackageReport,
}

impl ParsedPackage {
    pub fn is_success(&self) -> bool {
        self.report.success
    }
}

/// Package name used when the document carries none
pub fn fallback_name(source: &str) -> String {
    Path::new(source)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(source)
        .to_string()
}

fn read_document(path: &Path) -> Result<Vec<u8>, DocumentLoadError> {
    if !path.exists() {
        return Err(DocumentLoadError::NotFound(path.display().to_string()));
    }
    std::fs::read(path).map_err(|e| DocumentLoadError::Io(path.display().to_string(), e.to_string()))
}

/// Parses DTSX documents under one configuration
#[derive(Debug, Clone, Copy)]
pub struct PackageParser<'a> {
    config: &'a ParserConfig,
}

impl<'a> PackageParser<'a> {
    pub fn new(config: &'a ParserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &'a ParserConfig {
        self.config
    }

    /// Parse a package file; failures are reported, not returned
    pub fn parse_file(&self, path: &Path) -> ParsedPackage {
        let source = path.display().to_string();
        match read_document(path) {
            Ok(bytes) => self.parse_bytes(&bytes, &source),
            Err(err) => self.failed(&source, fallback_name(&source), Vec::new(), &err.into()),
        }
    }

    /// Parse package bytes; failures are reported, not returned
    pub fn parse_bytes(&self, bytes: &[u8], source: &str) -> ParsedPackage {
        self.run(bytes, source).0
    }

    /// Parse package bytes, returning fatal failures as errors
    pub fn try_parse(&self, bytes: &[u8], source: &str) -> Result<ParsedPackage, PackageError> {
        match self.run(bytes, source) {
            (parsed, None) => Ok(parsed),
            (_, Some(err)) => Err(err),
        }
    }

    fn run(&self, bytes: &[u8], source: &str) -> (ParsedPackage, Option<PackageError>) {
        let document = match load_package(bytes) {
            Ok(document) => document,
            Err(err) => {
                let err = PackageError::from(err);
                let parsed = self.failed(source, fallback_name(source), Vec::new(), &err);
                return (parsed, Some(err));
            }
        };

        let mut ctx = ParseContext::new(self.config, source);
        let metadata = extract_metadata(document.root(), &fallback_name(source), &mut ctx);

        let security = SecurityHandler::new(
            metadata.protection_level,
            self.config.password.as_deref(),
            &self.config.extra_sensitive_keys,
        );

        if let Err(err) = security.resolve(&mut ctx) {
            let err = PackageError::from(err);
            let (diagnostics, _, _) = ctx.finish();
            let parsed = self.failed(source, metadata.name, diagnostics, &err);
            return (parsed, Some(err));
        }

        (self.assemble(&document, metadata, &security, ctx), None)
    }

    fn assemble(
        &self,
        document: &Document,
        metadata: ssisflow_core::PackageMetadata,
        security: &SecurityHandler<'_>,
        mut ctx: ParseContext<'_>,
    ) -> ParsedPackage {
        let root = document.root();

        if let Some(reason) = document.recovered_error() {
            ctx.warn(
                DiagnosticCode::DocumentRecovered,
                format!("Document was malformed and parsed with recovery: {}", reason),
                None,
            );
        }

        let parameters = extract_parameters(root, security, &mut ctx);
        let variables = extract_variables(root, &mut ctx);
        let connections = extract_connections(root, security, &mut ctx);
        let tree = extract_executables(root, security, &mut ctx);

        let edges = extract_edges(root, &mut ctx);
        let graph = PrecedenceGraph::from_edges(tree.executables.iter().map(|e| e.id.as_str()), &edges);
        graph.validate(&mut ctx);

        let expressions = ExpressionAnalyzer::new(security).harvest(root, &mut ctx);

        let package = IrPackage {
            metadata,
            parameters,
            variables,
            connections,
            executables: tree.executables,
            edges,
            expressions,
        };

        let audit = ComplianceAudit::run(&package);
        for suspect in &audit.credential_suspects {
            ctx.warn(
                DiagnosticCode::HardcodedCredentials,
                format!("SQL in '{}' appears to embed credentials", suspect),
                Some(suspect.as_str()),
            );
        }
        for notice in &audit.notices {
            ctx.info(DiagnosticCode::Info, notice.as_str(), None);
        }

        let source = ctx.source().to_string();
        let (diagnostics, unsupported, redacted) = ctx.finish();

        let mut report = PackageReport::new(package.name(), source);
        report.migration_mode = Some(migration_mode(&package));
        report.manual_review = review_items(&package);
        report.unsupported_executables = unsupported;
        report.redacted_properties = redacted;
        report.summary.executables_total = tree.total;
        report.summary.executables_supported = tree.supported;
        report.summary.components = package.executables.iter().map(|e| e.components.len()).sum();
        report.summary.edges = package.edges.len();
        report.extend(diagnostics);

        tracing::info!(
            package = %package.name(),
            executables = package.executables.len(),
            edges = package.edges.len(),
            diagnostics = report.diagnostics.len(),
            "Parsed package"
        );

        ParsedPackage { package, report }
    }

    /// Name-only IR with a failed report
    fn failed(&self, source: &str, name: String, diagnostics: Vec<Diagnostic>, err: &PackageError) -> ParsedPackage {
        let code = match err {
            PackageError::Load(_) => DiagnosticCode::DocumentLoadFailed,
            PackageError::Encryption(_) => DiagnosticCode::PackageEncrypted,
        };
        let severity = self.config.severity.get_severity(code, Severity::Error);

        tracing::error!(package = %name, source, error = %err, "Package parse failed");

        let mut report = PackageReport::new(name.clone(), source);
        report.extend(diagnostics);
        report.fail(Diagnostic::new(code, severity, err.to_string()).with_location(Location::new(source)));

        ParsedPackage {
            package: IrPackage::minimal(name),
            report,
        }
    }
}

/// dbt when nothing leaves the warehouse, mixed when data flows sit beside
/// SQL tasks, airflow otherwise
pub fn migration_mode(package: &IrPackage) -> MigrationMode {
    if package.is_transformation_only() {
        return MigrationMode::Dbt;
    }

    let has_data_flows = package.data_flows().next().is_some();
    let has_sql_tasks = package.sql_tasks().next().is_some();
    if has_data_flows && has_sql_tasks {
        MigrationMode::Mixed
    } else {
        MigrationMode::Airflow
    }
}

/// Constructs that need a human before migration
pub fn review_items(package: &IrPackage) -> Vec<ReviewItem> {
    let mut items = Vec::new();

    if package.metadata.protection_level != ProtectionLevel::DontSaveSensitive {
        items.push(ReviewItem::new(
            "package",
            package.name(),
            format!(
                "Protected with {}; verify sensitive values are supplied at the target",
                package.metadata.protection_level
            ),
        ));
    }

    for executable in &package.executables {
        let (kind, reason) = match &executable.executable_type {
            ExecutableType::Script => ("script_task", "Script task needs manual conversion"),
            t if t.is_loop() => ("loop", "Loop container; verify dynamic enumeration mapping"),
            ExecutableType::Unsupported(_) => ("executable", "Unsupported executable type"),
            _ => continue,
        };
        items.push(ReviewItem::new(kind, executable.id.as_str(), reason));
    }

    for expression in &package.expressions {
        if expression.text.len() > LONG_EXPRESSION
            || complexity(&expression.text) == ExpressionComplexity::High
        {
            items.push(ReviewItem::new(
                "expression",
                format!("{}.{}", expression.scope, expression.property),
                "Complex expression; review the translation",
            ));
        }
    }

    for connection in &package.connections {
        if connection.connection_type.has_limited_support() {
            items.push(ReviewItem::new(
                "connection",
                connection.id.as_str(),
                "Connection type has limited support",
            ));
        }
    }

    items
}
