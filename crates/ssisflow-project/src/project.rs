//! Project parse
//!
//! Runs in three phases over a [`ProjectContainer`]:
//! 1. Project files (manifest, `.dtproj`, parameters, connection managers)
//! 2. Raw dependency scan of every package document
//! 3. Per-package IR assembly, in parallel when configured
//!
//! The graph analysis then runs over whatever the scan found. A package that
//! cannot be read or parsed becomes a placeholder; it never stops the others.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use rayon::prelude::*;

use ssisflow_core::{
    ConnectionManager, Diagnostic, DiagnosticCode, IrPackage, IrProject, Location, PackageDependency, Parameter,
    PackageReference, PackageReport, ParserConfig, ProjectReport, Severity,
};
use ssisflow_dtsx::{fallback_name, PackageParser, ParseContext, ParsedPackage, SecurityHandler};

use crate::analysis::PackageGraph;
use crate::container::{open_container, ProjectContainer};
use crate::dependencies::scan_dependencies;
use crate::error::ProjectError;
use crate::manifest::{parse_connection_file, parse_dtproj, parse_manifest, parse_parameters, ProjectManifest};

const MANIFEST_FILE: &str = "@Project.manifest";
const PARAMETERS_FILE: &str = "Project.params";

/// IR and report for one project
#[derive(Debug, Clone)]
pub struct ParsedProject {
    pub project: IrProject,
    pub report: ProjectReport,
}

impl ParsedProject {
    /// Every package parsed
    pub fn is_success(&self) -> bool {
        self.report.summary.packages_failed == 0
    }

    pub fn is_partial(&self) -> bool {
        self.report.is_partial()
    }
}

/// Package document read from the container
struct PackageSource {
    name: String,
    member: String,
    bytes: Result<Vec<u8>, ProjectError>,
}

/// Project-level metadata and shared definitions
#[derive(Default)]
struct ProjectFiles {
    manifest: ProjectManifest,
    parameters: Vec<Parameter>,
    connections: Vec<ConnectionManager>,
}

/// Parses whole projects under one configuration
#[derive(Debug, Clone, Copy)]
pub struct ProjectParser<'a> {
    config: &'a ParserConfig,
}

impl<'a> ProjectParser<'a> {
    pub fn new(config: &'a ParserConfig) -> Self {
        Self { config }
    }

    /// Open an archive, directory or `.dtproj` and parse it
    pub fn parse_path(&self, path: &Path) -> Result<ParsedProject, ProjectError> {
        let container = open_container(path)?;
        Ok(self.parse_container(container.as_ref()))
    }

    pub fn parse_container(&self, container: &dyn ProjectContainer) -> ParsedProject {
        let mut ctx = ParseContext::new(self.config, container.name());

        let files = self.read_project_files(container, &mut ctx);
        let sources = self.read_packages(container, &mut ctx);

        for listed in &files.manifest.packages {
            if !sources.iter().any(|s| s.name.eq_ignore_ascii_case(&listed.name))
                && !self.config.is_package_excluded(&listed.name)
            {
                ctx.warn(
                    DiagnosticCode::Warning,
                    format!("Manifest lists package '{}' but the container has no document for it", listed.name),
                    Some(listed.name.as_str()),
                );
            }
        }

        let dependencies = scan_all(&sources, &mut ctx);
        let parsed = self.parse_packages(&sources);

        let names: Vec<&str> = sources.iter().map(|s| s.name.as_str()).collect();
        let graph = PackageGraph::from_dependencies(names.iter().copied(), &dependencies);
        check_graph(&graph, &dependencies, &mut ctx);

        for listed in &files.manifest.packages {
            let computed = graph.contains(&listed.name) && graph.parents(&listed.name).is_empty();
            if listed.entry_point != computed {
                tracing::debug!(
                    package = %listed.name,
                    manifest = listed.entry_point,
                    computed,
                    "Manifest entry point flag differs from invocation graph"
                );
            }
        }

        self.assemble(container, files, &sources, parsed, dependencies, &graph, ctx)
    }

    fn read_project_files(&self, container: &dyn ProjectContainer, ctx: &mut ParseContext<'_>) -> ProjectFiles {
        let mut files = ProjectFiles::default();

        if let Some(member) = container.find(MANIFEST_FILE) {
            match container.read(&member).map(|bytes| parse_manifest(&bytes, ctx)) {
                Ok(Ok(manifest)) => files.manifest = manifest,
                Ok(Err(err)) => project_file_invalid(ctx, &member, &err.to_string()),
                Err(err) => project_file_invalid(ctx, &member, &err.to_string()),
            }
        }

        if let Some(member) = container.members_with_extension("dtproj").into_iter().next() {
            match container.read(&member).map(|bytes| parse_dtproj(&bytes, ctx)) {
                Ok(Ok(project_file)) => files.manifest.merge(project_file),
                Ok(Err(err)) => project_file_invalid(ctx, &member, &err.to_string()),
                Err(err) => project_file_invalid(ctx, &member, &err.to_string()),
            }
        }

        let security = SecurityHandler::new(
            files.manifest.protection_level.unwrap_or_default(),
            self.config.password.as_deref(),
            &self.config.extra_sensitive_keys,
        );

        if let Err(err) = security.resolve(ctx) {
            ctx.warn(
                DiagnosticCode::PackageEncrypted,
                format!("Project parameters and connections skipped: {}", err),
                None,
            );
            return files;
        }

        if let Some(member) = container.find(PARAMETERS_FILE) {
            match container.read(&member).map(|bytes| parse_parameters(&bytes, &security, ctx)) {
                Ok(Ok(parameters)) => files.parameters = parameters,
                Ok(Err(err)) => project_file_invalid(ctx, &member, &err.to_string()),
                Err(err) => project_file_invalid(ctx, &member, &err.to_string()),
            }
        }

        let mut seen = HashSet::new();
        for member in container.members_with_extension("conmgr") {
            let connection = match container.read(&member).map(|bytes| parse_connection_file(&bytes, &security, ctx)) {
                Ok(Ok(Some(connection))) => connection,
                Ok(Ok(None)) => continue,
                Ok(Err(err)) => {
                    project_file_invalid(ctx, &member, &err.to_string());
                    continue;
                }
                Err(err) => {
                    project_file_invalid(ctx, &member, &err.to_string());
                    continue;
                }
            };

            if !seen.insert(connection.id.clone()) {
                ctx.warn(
                    DiagnosticCode::DuplicateKey,
                    format!("Duplicate project connection manager '{}' ignored", connection.id),
                    Some(member.as_str()),
                );
                continue;
            }
            files.connections.push(connection);
        }

        files
    }

    /// Package members keyed by file stem, minus exclusions and duplicates
    fn read_packages(&self, container: &dyn ProjectContainer, ctx: &mut ParseContext<'_>) -> Vec<PackageSource> {
        let mut sources: Vec<PackageSource> = Vec::new();

        for member in container.package_members() {
            let name = fallback_name(crate::container::member_file_name(&member));

            if self.config.is_package_excluded(&name) {
                tracing::info!(package = %name, "Package excluded by configuration");
                continue;
            }

            if sources.iter().any(|s| s.name == name) {
                ctx.warn(
                    DiagnosticCode::DuplicateKey,
                    format!("Package name '{}' appears more than once; '{}' ignored", name, member),
                    Some(member.as_str()),
                );
                continue;
            }

            let bytes = container.read(&member);
            sources.push(PackageSource { name, member, bytes });
        }

        sources.sort_by(|a, b| a.name.cmp(&b.name));
        sources
    }

    fn parse_packages(&self, sources: &[PackageSource]) -> Vec<ParsedPackage> {
        let parser = PackageParser::new(self.config);
        let parse = |source: &PackageSource| match &source.bytes {
            Ok(bytes) => parser.parse_bytes(bytes, &source.member),
            Err(err) => placeholder(source, err),
        };

        if self.config.parallel_packages {
            sources.par_iter().map(parse).collect()
        } else {
            sources.iter().map(parse).collect()
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        container: &dyn ProjectContainer,
        files: ProjectFiles,
        sources: &[PackageSource],
        parsed: Vec<ParsedPackage>,
        dependencies: Vec<PackageDependency>,
        graph: &PackageGraph,
        ctx: ParseContext<'_>,
    ) -> ParsedProject {
        let ProjectFiles {
            manifest,
            parameters,
            connections,
        } = files;

        let name = manifest.name.unwrap_or_else(|| container.name().to_string());
        let entry_points = graph.entry_points();

        let mut project = IrProject::new(name.clone());
        project.version = manifest.version;
        project.protection_level = manifest.protection_level.unwrap_or_default();
        project.target_server_version = manifest.target_server_version;
        project.parameters = parameters;
        project.connections = connections;

        let mut report = ProjectReport::new(name);
        let mut package_irs = BTreeMap::new();

        for (source, ParsedPackage { package, report: package_report }) in sources.iter().zip(parsed) {
            let mut reference = PackageReference::new(&source.name, &source.member);
            reference.failed = !package_report.success;
            reference.transformation_only = package_report.success && package.is_transformation_only();
            reference.entry_point = entry_points.contains(&source.name);

            if reference.transformation_only {
                report.summary.transformation_only += 1;
            }

            project.packages.push(reference);
            package_irs.insert(source.name.clone(), package);
            report.add_package(package_report);
        }

        project.package_irs = package_irs;
        project.execution_chains = graph.execution_chains();
        project.isolated_packages = graph.isolated();
        project.entry_points = entry_points;
        project.dependencies = dependencies;

        report.summary.dependencies = project.dependencies.len();
        report.summary.entry_points = project.entry_points.len();
        report.recommendations = graph.recommendations();

        let (diagnostics, _, _) = ctx.finish();
        for diagnostic in diagnostics {
            report.add_diagnostic(diagnostic);
        }

        tracing::info!(
            project = %project.name,
            packages = project.packages.len(),
            failed = report.summary.packages_failed,
            dependencies = project.dependencies.len(),
            "Parsed project"
        );

        ParsedProject { project, report }
    }
}

fn project_file_invalid(ctx: &mut ParseContext<'_>, member: &str, reason: &str) {
    ctx.warn(
        DiagnosticCode::ProjectFileInvalid,
        format!("Failed to read project file '{}': {}", member, reason),
        Some(member),
    );
}

/// Dependency scan over every readable package
fn scan_all(sources: &[PackageSource], ctx: &mut ParseContext<'_>) -> Vec<PackageDependency> {
    let mut dependencies = Vec::new();

    for source in sources {
        let Ok(bytes) = &source.bytes else {
            continue;
        };
        match scan_dependencies(&source.name, bytes) {
            Ok(found) => dependencies.extend(found.into_iter().map(|mut dependency| {
                if let Some(name) = package_name(sources, &dependency.child) {
                    dependency.child = name.to_string();
                }
                dependency
            })),
            Err(err) => ctx.warn(
                DiagnosticCode::DependencyScanFailed,
                format!("Dependency scan of '{}' failed: {}", source.name, err),
                Some(source.member.as_str()),
            ),
        }
    }

    tracing::info!(count = dependencies.len(), "Scanned package dependencies");
    dependencies
}

/// Project package named `reference`, preferring an exact match over a case-insensitive one
fn package_name<'s>(sources: &'s [PackageSource], reference: &str) -> Option<&'s str> {
    sources
        .iter()
        .find(|s| s.name == reference)
        .or_else(|| sources.iter().find(|s| s.name.eq_ignore_ascii_case(reference)))
        .map(|s| s.name.as_str())
}

fn check_graph(graph: &PackageGraph, dependencies: &[PackageDependency], ctx: &mut ParseContext<'_>) {
    let mut reported = HashSet::new();
    for dependency in dependencies {
        if !graph.contains(&dependency.child) && reported.insert(dependency.child.as_str()) {
            ctx.warn(
                DiagnosticCode::UnknownChildPackage,
                format!(
                    "Package '{}' invokes '{}', which is not part of the project",
                    dependency.parent, dependency.child
                ),
                Some(dependency.task_id.as_str()),
            );
        }
    }

    if let Some(cycle) = graph.find_cycle() {
        ctx.warn(
            DiagnosticCode::CircularPackageDependency,
            format!("Packages invoke each other in a cycle: {}", cycle.join(" -> ")),
            None,
        );
        ctx.relate_last(cycle);
    }
}

/// Name-only package for a document that could not be read
fn placeholder(source: &PackageSource, err: &ProjectError) -> ParsedPackage {
    tracing::error!(package = %source.name, error = %err, "Failed to read package document");

    let mut report = PackageReport::new(&source.name, &source.member);
    report.fail(
        Diagnostic::new(
            DiagnosticCode::DocumentLoadFailed,
            Severity::Error,
            format!("Failed to read package document: {}", err),
        )
        .with_location(Location::new(&source.member)),
    );

    ParsedPackage {
        package: IrPackage::minimal(&source.name),
        report,
    }
}
