//! Scalar extractors: metadata, parameters, variables, connection managers
//!
//! Every lookup here is best effort. A missing element or attribute leaves
//! the field empty; only a missing name causes an entry to be skipped.

use std::collections::HashSet;

use ssisflow_core::{
    ConnectionManager, ConnectionType, DiagnosticCode, PackageMetadata, Parameter, PropertyMap,
    ProtectionLevel, Variable, PACKAGE_SCOPE, REDACTED,
};

use crate::context::ParseContext;
use crate::document::{ns, Element};
use crate::security::SecurityHandler;

/// Readable name for an SSIS numeric data type code
pub fn data_type_name(raw: &str) -> String {
    let name = match raw.trim() {
        "2" => "Int16",
        "3" => "Int32",
        "4" => "Single",
        "5" => "Double",
        "6" => "Currency",
        "7" => "DateTime",
        "8" => "String",
        "11" => "Boolean",
        "13" => "Object",
        "14" => "Decimal",
        "16" => "SByte",
        "17" => "Byte",
        "18" => "String",
        "19" => "UInt32",
        "20" => "Int64",
        "21" => "UInt64",
        "" => "String",
        other => return other.to_string(),
    };
    name.to_string()
}

pub(crate) fn is_true(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|r| r.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "-1")
    )
}

/// Executable id owning an element, or the package scope
pub(crate) fn owning_scope(element: Element<'_>) -> String {
    element
        .ancestors()
        .find(|a| a.is(ns::DTS, "Executable"))
        .filter(|a| a.parent().is_some())
        .and_then(|a| a.attr_text("refId"))
        .map(str::to_string)
        .unwrap_or_else(|| PACKAGE_SCOPE.to_string())
}

/// Read a protection level, logging and defaulting on unknown values
pub fn parse_protection_level(raw: Option<&str>, ctx: &mut ParseContext<'_>) -> ProtectionLevel {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return ProtectionLevel::default();
    };

    ProtectionLevel::parse(raw).unwrap_or_else(|| {
        ctx.warn(
            DiagnosticCode::UnknownProtectionLevel,
            format!("Unknown protection level '{}', assuming DontSaveSensitive", raw),
            None,
        );
        ProtectionLevel::DontSaveSensitive
    })
}

/// Root-level package metadata
pub fn extract_metadata(root: Element<'_>, fallback_name: &str, ctx: &mut ParseContext<'_>) -> PackageMetadata {
    let name = root
        .attr_text("ObjectName")
        .unwrap_or(fallback_name)
        .to_string();

    let raw_level = root
        .attr("ProtectionLevel")
        .or_else(|| root.dts_property("ProtectionLevel").and_then(|p| p.text()));
    let protection_level = parse_protection_level(raw_level, ctx);

    let version = match (root.attr_text("VersionMajor"), root.attr_text("VersionBuild")) {
        (Some(major), build) => Some(format!(
            "{}.{}.{}",
            major,
            root.attr_text("VersionMinor").unwrap_or("0"),
            build.unwrap_or("0")
        )),
        (None, Some(build)) => Some(build.to_string()),
        (None, None) => None,
    };

    let metadata = PackageMetadata {
        name,
        protection_level,
        version,
        creator: root.attr_text("CreatorName").map(str::to_string),
        creation_date: root.attr_text("CreationDate").map(str::to_string),
        description: root.attr_text("Description").map(str::to_string),
    };

    tracing::info!(
        package = %metadata.name,
        protection_level = %metadata.protection_level,
        "Read package metadata"
    );
    metadata
}

/// Package parameters, from both the current and the legacy layout
pub fn extract_parameters(
    root: Element<'_>,
    security: &SecurityHandler<'_>,
    ctx: &mut ParseContext<'_>,
) -> Vec<Parameter> {
    let current = root
        .children_named(ns::DTS, "PackageParameters")
        .flat_map(|c| c.children_named(ns::DTS, "PackageParameter"));

    let legacy = root
        .children()
        .filter(|c| c.is(ns::DTS, "Property") && c.attr("Name") == Some("Parameters"))
        .flat_map(|c| c.descendants_named(ns::DTS, "Parameter"));

    let mut seen = HashSet::new();
    let mut parameters = Vec::new();

    for element in current.chain(legacy) {
        let Some(name) = element.attr_text("ObjectName") else {
            ctx.warn(
                DiagnosticCode::MissingAttribute,
                "Package parameter without a name skipped",
                None,
            );
            continue;
        };

        if !seen.insert(name.to_string()) {
            ctx.warn(
                DiagnosticCode::DuplicateKey,
                format!("Duplicate package parameter '{}' ignored", name),
                Some(name),
            );
            continue;
        }

        let sensitive = is_true(element.attr("Sensitive"));
        let value = element
            .dts_property("ParameterValue")
            .or_else(|| element.dts_property("Value"))
            .and_then(|p| p.text())
            .or_else(|| {
                element
                    .descendants_named(ns::DTS, "PropertyExpression")
                    .find(|p| p.attr("Name") == Some("Value"))
                    .and_then(|p| p.text())
            })
            .map(|v| {
                if sensitive || security.is_sensitive(name) {
                    ctx.note_redacted("$Package", name);
                    REDACTED.to_string()
                } else {
                    v.to_string()
                }
            });

        parameters.push(Parameter {
            name: name.to_string(),
            data_type: data_type_name(element.attr("DataType").unwrap_or("")),
            default_value: value,
            description: element.attr_text("Description").map(str::to_string),
            required: is_true(element.attr("Required")),
            sensitive,
        });
    }

    tracing::info!(count = parameters.len(), "Found package parameters");
    parameters
}

/// Variables at every scope, keyed by `(scope, namespace, name)`
pub fn extract_variables(root: Element<'_>, ctx: &mut ParseContext<'_>) -> Vec<Variable> {
    let mut seen = HashSet::new();
    let mut variables = Vec::new();

    for element in root.descendants_named(ns::DTS, "Variable") {
        let Some(name) = element.attr_text("ObjectName") else {
            ctx.warn(
                DiagnosticCode::MissingAttribute,
                "Variable without a name skipped",
                None,
            );
            continue;
        };

        let namespace = element.attr_text("Namespace").unwrap_or("User").to_string();
        let scope = owning_scope(element);

        if !seen.insert((scope.clone(), namespace.clone(), name.to_string())) {
            ctx.warn(
                DiagnosticCode::DuplicateKey,
                format!("Duplicate variable '{}::{}' in scope '{}' ignored", namespace, name, scope),
                Some(scope.as_str()),
            );
            continue;
        }

        let value_element = element.child(ns::DTS, "VariableValue");
        let value = value_element
            .and_then(|v| v.text())
            .or_else(|| element.dts_property("Value").and_then(|p| p.text()))
            .map(str::to_string);

        let data_type = value_element
            .and_then(|v| v.attr("DataType"))
            .or_else(|| element.attr("DataType"))
            .map(data_type_name)
            .unwrap_or_else(|| "String".to_string());

        let expression = if is_true(element.attr("EvaluateAsExpression")) {
            element.attr_text("Expression").map(str::to_string)
        } else {
            None
        }
        .or_else(|| {
            element
                .descendants_named(ns::DTS, "PropertyExpression")
                .find(|p| p.attr("Name") == Some("Value"))
                .and_then(|p| p.text())
                .map(str::to_string)
        });

        variables.push(Variable {
            name: name.to_string(),
            namespace,
            scope,
            data_type,
            value,
            expression,
            description: element.attr_text("Description").map(str::to_string),
        });
    }

    tracing::info!(count = variables.len(), "Found variables");
    variables
}

/// Parse one `DTS:ConnectionManager` element
///
/// Used for package connection managers and for project `.conmgr` files.
/// Sensitive values are redacted before the record is built.
pub fn parse_connection_manager(
    element: Element<'_>,
    id_prefix: &str,
    security: &SecurityHandler<'_>,
    ctx: &mut ParseContext<'_>,
) -> Option<ConnectionManager> {
    let Some(name) = element.attr_text("ObjectName") else {
        ctx.warn(
            DiagnosticCode::MissingAttribute,
            "Connection manager without a name skipped",
            element.attr("refId"),
        );
        return None;
    };

    let id = element
        .attr_text("refId")
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}[{}]", id_prefix, name));

    let creation_name = element.attr_text("CreationName");
    let connection_type = ConnectionType::from_creation_name(creation_name);
    if let ConnectionType::Unsupported(raw) = &connection_type {
        ctx.warn(
            DiagnosticCode::UnsupportedConnection,
            format!("Unsupported connection type '{}' on '{}'", raw, name),
            Some(id.as_str()),
        );
    }

    let mut properties = PropertyMap::new();
    let mut marked_sensitive = 0;

    // Legacy layout keeps values in DTS:Property children of the manager
    for property in element.children_named(ns::DTS, "Property") {
        if let (Some(key), Some(value)) = (property.attr_text("Name"), property.text()) {
            properties.insert(key, value);
        }
    }

    let inner = element
        .child(ns::DTS, "ObjectData")
        .and_then(|d| d.children().next());

    if let Some(inner) = inner {
        for (key, value) in inner.attributes() {
            properties.insert(key, value);
        }

        for child in inner.descendants() {
            let key = child
                .attr_text("Name")
                .unwrap_or_else(|| child.local_name());
            if is_true(child.attr("Sensitive")) {
                properties.insert(key, REDACTED);
                ctx.note_redacted(&id, key);
                marked_sensitive += 1;
            } else if let Some(text) = child.text() {
                properties.insert_missing(key, text);
            }
        }
    }

    let redacted = security.redact(&id, &mut properties, ctx) + marked_sensitive;
    if redacted > 0 {
        ctx.info(
            DiagnosticCode::SensitiveDataRedacted,
            format!("Redacted {} sensitive value(s) on connection '{}'", redacted, name),
            Some(id.as_str()),
        );
    }

    tracing::debug!(id = %id, connection_type = ?connection_type, "Parsed connection manager");

    Some(ConnectionManager {
        sensitive: connection_type.is_relational() || redacted > 0,
        id,
        name: name.to_string(),
        connection_type,
        properties,
        description: element.attr_text("Description").map(str::to_string),
    })
}

/// Connection managers declared by the package
pub fn extract_connections(
    root: Element<'_>,
    security: &SecurityHandler<'_>,
    ctx: &mut ParseContext<'_>,
) -> Vec<ConnectionManager> {
    let mut seen = HashSet::new();
    let mut connections = Vec::new();

    let elements = root
        .children_named(ns::DTS, "ConnectionManagers")
        .flat_map(|c| c.children_named(ns::DTS, "ConnectionManager"));

    for element in elements {
        let Some(connection) =
            parse_connection_manager(element, "Package.ConnectionManagers", security, ctx)
        else {
            continue;
        };

        if !seen.insert(connection.id.clone()) {
            ctx.warn(
                DiagnosticCode::DuplicateKey,
                format!("Duplicate connection manager id '{}' ignored", connection.id),
                Some(connection.id.as_str()),
            );
            continue;
        }
        connections.push(connection);
    }

    tracing::info!(count = connections.len(), "Found connection managers");
    connections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::load_package;
    use ssisflow_core::ParserConfig;

    const PACKAGE: &str = r#"<?xml version="1.0"?>
<DTS:Executable xmlns:DTS="www.microsoft.com/SqlServer/Dts"
    DTS:refId="Package" DTS:ObjectName="LoadOrders" DTS:CreatorName="etl"
    DTS:ProtectionLevel="EncryptSensitiveWithUserKey" DTS:VersionMajor="2" DTS:VersionBuild="14">
  <DTS:ConnectionManagers>
    <DTS:ConnectionManager DTS:refId="Package.ConnectionManagers[Warehouse]"
        DTS:ObjectName="Warehouse" DTS:CreationName="OLEDB">
      <DTS:ObjectData>
        <DTS:ConnectionManager DTS:ConnectionString="Data Source=db;User ID=etl;">
          <DTS:Password DTS:Name="Password" Sensitive="1">secret</DTS:Password>
        </DTS:ConnectionManager>
      </DTS:ObjectData>
    </DTS:ConnectionManager>
    <DTS:ConnectionManager DTS:ObjectName="Feed" DTS:CreationName="MSOLAP100" />
    <DTS:ConnectionManager DTS:CreationName="FLATFILE" />
  </DTS:ConnectionManagers>
  <DTS:Variables>
    <DTS:Variable DTS:Namespace="User" DTS:ObjectName="BatchId">
      <DTS:VariableValue DTS:DataType="3">42</DTS:VariableValue>
    </DTS:Variable>
    <DTS:Variable DTS:Namespace="User" DTS:ObjectName="BatchId" />
    <DTS:Variable DTS:Namespace="User" DTS:ObjectName="RunDate"
        DTS:EvaluateAsExpression="True" DTS:Expression="GETDATE()" />
  </DTS:Variables>
  <DTS:PackageParameters>
    <DTS:PackageParameter DTS:ObjectName="Region" DTS:DataType="8" DTS:Required="True">
      <DTS:Property DTS:Name="ParameterValue">EMEA</DTS:Property>
    </DTS:PackageParameter>
    <DTS:PackageParameter DTS:ObjectName="ApiSecret" DTS:DataType="8" DTS:Sensitive="True">
      <DTS:Property DTS:Name="ParameterValue">abc</DTS:Property>
    </DTS:PackageParameter>
    <DTS:PackageParameter DTS:DataType="8" />
  </DTS:PackageParameters>
  <DTS:Executables>
    <DTS:Executable DTS:refId="Package\Loop" DTS:ObjectName="Loop">
      <DTS:Variables>
        <DTS:Variable DTS:Namespace="User" DTS:ObjectName="BatchId" />
      </DTS:Variables>
    </DTS:Executable>
  </DTS:Executables>
</DTS:Executable>"#;

    #[test]
    fn metadata_fields() {
        let doc = load_package(PACKAGE.as_bytes()).unwrap();
        let config = ParserConfig::default();
        let mut ctx = ParseContext::new(&config, "LoadOrders.dtsx");

        let metadata = extract_metadata(doc.root(), "fallback", &mut ctx);
        assert_eq!(metadata.name, "LoadOrders");
        assert_eq!(metadata.protection_level, ProtectionLevel::EncryptSensitiveWithUserKey);
        assert_eq!(metadata.version.as_deref(), Some("2.0.14"));
        assert_eq!(metadata.creator.as_deref(), Some("etl"));
    }

    #[test]
    fn unknown_protection_level_defaults_with_warning() {
        let doc = load_package(
            br#"<DTS:Executable xmlns:DTS="www.microsoft.com/SqlServer/Dts" DTS:ProtectionLevel="ServerStorage"/>"#,
        )
        .unwrap();
        let config = ParserConfig::default();
        let mut ctx = ParseContext::new(&config, "x.dtsx");

        let metadata = extract_metadata(doc.root(), "x", &mut ctx);
        assert_eq!(metadata.name, "x");
        assert_eq!(metadata.protection_level, ProtectionLevel::DontSaveSensitive);
        assert!(ctx.has_code(DiagnosticCode::UnknownProtectionLevel));
    }

    #[test]
    fn connections_are_redacted_at_read_time() {
        let doc = load_package(PACKAGE.as_bytes()).unwrap();
        let config = ParserConfig::default();
        let mut ctx = ParseContext::new(&config, "LoadOrders.dtsx");
        let security = SecurityHandler::new(ProtectionLevel::DontSaveSensitive, None, &[]);

        let connections = extract_connections(doc.root(), &security, &mut ctx);
        assert_eq!(connections.len(), 2);

        let warehouse = &connections[0];
        assert_eq!(warehouse.connection_type, ConnectionType::Oledb);
        assert!(warehouse.sensitive);
        assert_eq!(warehouse.properties.text("ConnectionString"), Some(REDACTED));
        assert_eq!(warehouse.properties.text("Password"), Some(REDACTED));

        let feed = &connections[1];
        assert_eq!(feed.id, "Package.ConnectionManagers[Feed]");
        assert_eq!(feed.connection_type, ConnectionType::Unsupported("MSOLAP100".to_string()));
        assert!(ctx.has_code(DiagnosticCode::UnsupportedConnection));
        assert!(ctx.has_code(DiagnosticCode::MissingAttribute));
    }

    #[test]
    fn variables_keyed_by_scope() {
        let doc = load_package(PACKAGE.as_bytes()).unwrap();
        let config = ParserConfig::default();
        let mut ctx = ParseContext::new(&config, "LoadOrders.dtsx");

        let variables = extract_variables(doc.root(), &mut ctx);
        let keys: Vec<_> = variables
            .iter()
            .map(|v| format!("{}/{}", v.scope, v.qualified_name()))
            .collect();
        assert_eq!(
            keys,
            vec!["Package/User::BatchId", "Package/User::RunDate", "Package\\Loop/User::BatchId"]
        );
        assert_eq!(variables[0].value.as_deref(), Some("42"));
        assert_eq!(variables[0].data_type, "Int32");
        assert_eq!(variables[1].expression.as_deref(), Some("GETDATE()"));
        assert!(ctx.has_code(DiagnosticCode::DuplicateKey));
    }

    #[test]
    fn parameters_skip_unnamed_and_redact_sensitive() {
        let doc = load_package(PACKAGE.as_bytes()).unwrap();
        let config = ParserConfig::default();
        let mut ctx = ParseContext::new(&config, "LoadOrders.dtsx");
        let security = SecurityHandler::new(ProtectionLevel::DontSaveSensitive, None, &[]);

        let parameters = extract_parameters(doc.root(), &security, &mut ctx);
        assert_eq!(parameters.len(), 2);
        assert_eq!(parameters[0].name, "Region");
        assert_eq!(parameters[0].default_value.as_deref(), Some("EMEA"));
        assert!(parameters[0].required);
        assert_eq!(parameters[1].default_value.as_deref(), Some(REDACTED));
        assert!(parameters[1].sensitive);
    }
}
