//! Project-level files
//!
//! Reads `@Project.manifest`, `.dtproj`, `Project.params` and `*.conmgr`.
//! Manifest fields appear either as attributes or as `SSIS:Property`
//! children named after the field; both forms are accepted everywhere.

use std::collections::HashSet;

use ssisflow_core::{ConnectionManager, DiagnosticCode, Parameter, ProtectionLevel, REDACTED};
use ssisflow_dtsx::metadata::{data_type_name, parse_protection_level};
use ssisflow_dtsx::{
    ns, parse_connection_manager, Document, DocumentLoadError, Element, ParseContext,
    SecurityHandler,
};

/// Package listed by a project manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestPackage {
    /// Package name without `.dtsx`
    pub name: String,
    pub entry_point: bool,
}

/// Project metadata from a manifest or project file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectManifest {
    pub name: Option<String>,
    pub version: Option<String>,
    pub protection_level: Option<ProtectionLevel>,
    pub target_server_version: Option<String>,
    pub packages: Vec<ManifestPackage>,
}

impl ProjectManifest {
    /// Fill fields still missing here from `other`
    pub fn merge(&mut self, other: ProjectManifest) {
        self.name = self.name.take().or(other.name);
        self.version = self.version.take().or(other.version);
        self.protection_level = self.protection_level.or(other.protection_level);
        self.target_server_version = self.target_server_version.take().or(other.target_server_version);
        if self.packages.is_empty() {
            self.packages = other.packages;
        }
    }
}

fn flag(raw: Option<&str>) -> bool {
    raw.map(str::trim)
        .is_some_and(|v| v == "1" || v == "-1" || v.eq_ignore_ascii_case("true"))
}

fn strip_dtsx(name: &str) -> &str {
    match name.len().checked_sub(5) {
        Some(cut) if name.is_char_boundary(cut) && name[cut..].eq_ignore_ascii_case(".dtsx") => &name[..cut],
        _ => name,
    }
}

/// Field value from an attribute or a `Property[@Name]` child
fn field<'d>(element: Element<'d>, name: &str) -> Option<&'d str> {
    element.attr_text(name).or_else(|| {
        element
            .children()
            .filter(|c| c.has_local_name("Properties"))
            .flat_map(|c| c.children())
            .chain(element.children())
            .filter(|p| p.has_local_name("Property") && p.attr("Name") == Some(name))
            .find_map(|p| p.text())
    })
}

fn read_version(element: Element<'_>) -> Option<String> {
    if let Some(version) = field(element, "Version") {
        return Some(version.to_string());
    }

    let parts: Vec<&str> = ["VersionMajor", "VersionMinor", "VersionBuild"]
        .iter()
        .map_while(|part| field(element, part))
        .collect();
    (!parts.is_empty()).then(|| parts.join("."))
}

fn read_manifest(project: Element<'_>, ctx: &mut ParseContext<'_>) -> ProjectManifest {
    let protection_level = field(project, "ProtectionLevel").map(|raw| parse_protection_level(Some(raw), ctx));

    let packages = project
        .descendants_local("Package")
        .filter(|p| p.parent().is_some_and(|parent| parent.has_local_name("Packages")))
        .filter_map(|p| {
            let Some(name) = field(p, "Name") else {
                ctx.warn(
                    DiagnosticCode::MissingAttribute,
                    "Manifest package entry without a name skipped",
                    None,
                );
                return None;
            };
            Some(ManifestPackage {
                name: strip_dtsx(name).to_string(),
                entry_point: flag(field(p, "EntryPoint")),
            })
        })
        .collect();

    ProjectManifest {
        name: field(project, "Name").map(str::to_string),
        version: read_version(project),
        protection_level,
        target_server_version: field(project, "TargetServerVersion").map(str::to_string),
        packages,
    }
}

/// Parse `@Project.manifest`
pub fn parse_manifest(bytes: &[u8], ctx: &mut ParseContext<'_>) -> Result<ProjectManifest, DocumentLoadError> {
    let document = Document::parse(bytes)?;
    let root = document.root();
    if !root.has_local_name("Project") {
        return Err(DocumentLoadError::RootMismatch {
            expected: format!("{{{}}}Project", ns::SSIS),
            found: root.qualified_name(),
        });
    }

    let manifest = read_manifest(root, ctx);
    tracing::info!(
        project = ?manifest.name,
        packages = manifest.packages.len(),
        "Read project manifest"
    );
    Ok(manifest)
}

/// Parse a `.dtproj` project file
///
/// Build properties such as `TargetServerVersion` may sit under any element
/// whose name ends with the property name; an embedded deployment manifest
/// supplies everything else.
pub fn parse_dtproj(bytes: &[u8], ctx: &mut ParseContext<'_>) -> Result<ProjectManifest, DocumentLoadError> {
    let document = Document::parse(bytes)?;
    let root = document.root();

    let ending_with = |suffix: &str| {
        root.descendants()
            .find(|e| e.local_name().ends_with(suffix) && e.children().next().is_none())
            .and_then(|e| e.text())
    };

    let target_server_version = ending_with("TargetServerVersion").map(str::to_string);
    let protection_level = ending_with("ProtectionLevel").map(|raw| parse_protection_level(Some(raw), ctx));

    let mut manifest = ProjectManifest {
        name: None,
        version: None,
        protection_level,
        target_server_version,
        packages: Vec::new(),
    };

    if let Some(embedded) = root.descendants_named(ns::SSIS, "Project").next() {
        manifest.merge(read_manifest(embedded, ctx));
    }

    tracing::info!(
        target_server_version = ?manifest.target_server_version,
        "Read project file"
    );
    Ok(manifest)
}

/// Parse `Project.params`
///
/// Sensitive parameter values are replaced with the redaction sentinel.
pub fn parse_parameters(
    bytes: &[u8],
    security: &SecurityHandler<'_>,
    ctx: &mut ParseContext<'_>,
) -> Result<Vec<Parameter>, DocumentLoadError> {
    let document = Document::parse(bytes)?;
    let mut seen = HashSet::new();
    let mut parameters = Vec::new();

    for element in document.root().descendants_local("Parameter") {
        let Some(name) = field(element, "Name").or_else(|| element.attr_text("ObjectName")) else {
            ctx.warn(
                DiagnosticCode::MissingAttribute,
                "Project parameter without a name skipped",
                None,
            );
            continue;
        };

        if !seen.insert(name.to_string()) {
            ctx.warn(
                DiagnosticCode::DuplicateKey,
                format!("Duplicate project parameter '{}' ignored", name),
                Some(name),
            );
            continue;
        }

        let sensitive = flag(field(element, "Sensitive"));
        let value = field(element, "Value")
            .or_else(|| field(element, "ParameterValue"))
            .or_else(|| element.descendants_local("ParameterValue").find_map(|v| v.text()))
            .map(|v| {
                if sensitive || security.is_sensitive(name) {
                    ctx.note_redacted("$Project", name);
                    REDACTED.to_string()
                } else {
                    v.to_string()
                }
            });

        parameters.push(Parameter {
            name: name.to_string(),
            data_type: field(element, "DataType")
                .map(data_type_name)
                .unwrap_or_else(|| "String".to_string()),
            default_value: value,
            description: field(element, "Description").map(str::to_string),
            required: flag(field(element, "Required")),
            sensitive,
        });
    }

    tracing::info!(count = parameters.len(), "Found project parameters");
    Ok(parameters)
}

/// Parse one `*.conmgr` file
pub fn parse_connection_file(
    bytes: &[u8],
    security: &SecurityHandler<'_>,
    ctx: &mut ParseContext<'_>,
) -> Result<Option<ConnectionManager>, DocumentLoadError> {
    let document = Document::parse_with_root(bytes, ns::DTS, "ConnectionManager")?;
    Ok(parse_connection_manager(
        document.root(),
        "Project.ConnectionManagers",
        security,
        ctx,
    ))
}
