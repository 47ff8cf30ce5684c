//! Executable tree flattening
//!
//! The control flow tree is walked in pre-order. Each executable keeps its
//! hierarchical id and the id of its container, so the tree can be rebuilt
//! from the flat list.

use std::collections::{BTreeSet, HashSet};

use ssisflow_core::{DiagnosticCode, Executable, ExecutableType, SqlDialect};

use crate::context::ParseContext;
use crate::document::{ns, Element};
use crate::expressions::{parameter_refs, variable_refs};
use crate::metadata::is_true;
use crate::pipeline::parse_pipeline;
use crate::security::SecurityHandler;

/// Markers that only make sense in T-SQL
const TSQL_MARKERS: &[&str] = &[
    "GETDATE()",
    "ISNULL(",
    "TOP ",
    "NOLOCK",
    "@@ROWCOUNT",
    "SCOPE_IDENTITY(",
];

/// Map a raw `ExecutableType` to a known executable type
///
/// Both the short (`Microsoft.ExecuteSQLTask`) and the assembly-qualified
/// spellings are accepted, as are the `STOCK:` container monikers.
pub fn map_executable_type(raw: &str) -> ExecutableType {
    let head = raw.split(',').next().unwrap_or(raw).trim().to_ascii_lowercase();
    let normalized = match head.rsplit_once('.') {
        Some((rest, last)) if !last.is_empty() && last.chars().all(|c| c.is_ascii_digit()) => rest,
        _ => head.as_str(),
    };

    match normalized {
        "microsoft.executesqltask"
        | "microsoft.sqlserver.dts.tasks.executesqltask.executesqltask"
        | "stock:sqltask" => ExecutableType::ExecuteSql,
        "microsoft.pipeline"
        | "microsoft.sqlserver.dts.pipeline.wrapper.taskhost"
        | "stock:pipelinetask"
        | "ssis.pipeline" => ExecutableType::DataFlow,
        "microsoft.scripttask" | "microsoft.sqlserver.dts.tasks.scripttask.scripttask" => {
            ExecutableType::Script
        }
        "stock:sequence" => ExecutableType::SequenceContainer,
        "stock:foreachloop" => ExecutableType::ForEachLoop,
        "stock:forloop" => ExecutableType::ForLoop,
        "microsoft.bulkinserttask" => ExecutableType::BulkInsert,
        "microsoft.executepackagetask" | "ssis.executepackagetask" => ExecutableType::ExecutePackage,
        "microsoft.filesystemtask" => ExecutableType::FileSystem,
        "microsoft.ftptask" => ExecutableType::Ftp,
        "microsoft.sendmailtask" => ExecutableType::SendMail,
        "microsoft.webservicetask" => ExecutableType::WebService,
        _ => ExecutableType::Unsupported(raw.to_string()),
    }
}

/// Child package named by an Execute Package task, without `.dtsx`
///
/// Looks for a `PackageName` element, a `Property Name="PackageName"`
/// element, and finally a `DTS:Property` of that name.
pub fn execute_package_target(task: Element<'_>) -> Option<String> {
    let from_element = task.descendants_local("PackageName").find_map(|e| e.text());
    let from_property = || {
        task.descendants_local("Property")
            .filter(|p| p.attr("Name") == Some("PackageName"))
            .find_map(|p| p.text())
    };

    let raw = from_element.or_else(from_property)?;
    let name = raw.rsplit(['\\', '/']).next().unwrap_or(raw);
    let name = match name.len().checked_sub(5) {
        Some(cut) if name.is_char_boundary(cut) && name[cut..].eq_ignore_ascii_case(".dtsx") => &name[..cut],
        _ => name,
    };

    (!name.is_empty()).then(|| name.to_string())
}

/// T-SQL when any vendor marker appears, ANSI otherwise
pub fn detect_dialect(sql: &str) -> SqlDialect {
    let upper = sql.to_uppercase();
    if TSQL_MARKERS.iter().any(|m| upper.contains(m)) {
        SqlDialect::Tsql
    } else {
        SqlDialect::Ansi
    }
}

/// Flattened control flow
#[derive(Debug, Default)]
pub struct ExecutableTree {
    pub executables: Vec<Executable>,

    /// Executables seen, including skipped unsupported ones
    pub total: usize,

    pub supported: usize,
}

struct Walker<'w, 'c> {
    security: &'w SecurityHandler<'w>,
    ctx: &'w mut ParseContext<'c>,
    tree: ExecutableTree,
    seen: HashSet<String>,
}

impl<'w, 'c> Walker<'w, 'c> {
    fn walk_children(&mut self, container: Element<'_>, container_id: &str, parent_id: Option<&str>) {
        let children = container
            .children_named(ns::DTS, "Executables")
            .flat_map(|e| e.children_named(ns::DTS, "Executable"));

        for child in children {
            self.visit(child, container_id, parent_id);
        }
    }

    fn visit(&mut self, element: Element<'_>, container_id: &str, parent_id: Option<&str>) {
        let Some(name) = element.attr_text("ObjectName") else {
            self.ctx.warn(
                DiagnosticCode::MissingAttribute,
                format!("Executable without a name under '{}' skipped", container_id),
                Some(container_id),
            );
            return;
        };

        let id = element
            .attr_text("refId")
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}\\{}", container_id, name));

        if !self.seen.insert(id.clone()) {
            self.ctx.warn(
                DiagnosticCode::DuplicateKey,
                format!("Duplicate executable id '{}' skipped", id),
                Some(id.as_str()),
            );
            return;
        }

        let raw_type = element.attr("ExecutableType").unwrap_or("");
        let executable_type = map_executable_type(raw_type);
        self.tree.total += 1;

        let keep = if executable_type.is_supported() {
            self.tree.supported += 1;
            true
        } else {
            self.ctx.warn(
                DiagnosticCode::UnsupportedExecutable,
                format!("Unsupported executable type '{}' on '{}'", raw_type, name),
                Some(id.as_str()),
            );
            self.ctx.note_unsupported_executable(raw_type);
            self.ctx.config().retain_unsupported_executables
        };

        if keep {
            let mut executable = Executable::new(id.clone(), name, executable_type);
            executable.parent_id = parent_id.map(str::to_string);
            self.populate(&mut executable, element);

            tracing::debug!(
                id = %executable.id,
                executable_type = %executable.executable_type,
                "Parsed executable"
            );
            self.tree.executables.push(executable);
            self.walk_children(element, &id, Some(id.as_str()));
        } else {
            // Children of a dropped container attach to the nearest kept one
            self.walk_children(element, &id, parent_id);
        }
    }

    fn populate(&mut self, executable: &mut Executable, element: Element<'_>) {
        executable.description = element.attr_text("Description").map(str::to_string);
        executable.disabled = is_true(element.attr("Disabled"));
        executable.delay_validation = is_true(element.attr("DelayValidation"));

        for property in element.children_named(ns::DTS, "Property") {
            if let (Some(key), Some(value)) = (property.attr_text("Name"), property.text()) {
                executable.properties.insert(key, value);
            }
        }

        // Text scanned for variable and parameter references
        let mut reference_text: Vec<String> = element
            .children_named(ns::DTS, "PropertyExpression")
            .filter_map(|e| e.text())
            .map(str::to_string)
            .collect();

        match executable.executable_type {
            ExecutableType::ExecuteSql => self.read_sql_task(executable, element, &mut reference_text),
            ExecutableType::DataFlow => {
                match parse_pipeline(element, &executable.id, self.ctx) {
                    Some(components) => executable.components = components,
                    None => self.ctx.warn(
                        DiagnosticCode::DataflowMissingPipeline,
                        format!("Data flow '{}' has no pipeline", executable.name),
                        Some(executable.id.as_str()),
                    ),
                }
            }
            ExecutableType::Script => read_script_task(executable, element, &mut reference_text),
            ExecutableType::ForLoop => {
                for key in ["InitExpression", "EvalExpression", "AssignExpression"] {
                    let value = element
                        .attr_text(key)
                        .or_else(|| element.dts_property(key).and_then(|p| p.text()));
                    if let Some(value) = value {
                        executable.properties.insert(key, value);
                        reference_text.push(value.to_string());
                    }
                }
            }
            ExecutableType::ForEachLoop => read_foreach(executable, element, &mut reference_text),
            ExecutableType::ExecutePackage => {
                if let Some(target) = execute_package_target(element) {
                    executable.properties.insert("PackageName", target);
                }
                executable.connection_ref = element
                    .descendants_local("Connection")
                    .find_map(|c| c.text())
                    .map(str::to_string);
            }
            _ => {
                if let Some(inner) = element.child(ns::DTS, "ObjectData").and_then(|d| d.children().next()) {
                    for (key, value) in inner.attributes() {
                        executable.properties.insert_missing(key, value);
                    }
                }
            }
        }

        let owner = executable.id.clone();
        self.security.redact(&owner, &mut executable.properties, self.ctx);

        let mut variables = BTreeSet::new();
        let mut parameters = BTreeSet::new();
        for text in &reference_text {
            variables.extend(variable_refs(text));
            parameters.extend(parameter_refs(text));
        }
        executable.variable_refs = variables.into_iter().collect();
        executable.parameter_refs = parameters.into_iter().collect();
    }

    fn read_sql_task(&mut self, executable: &mut Executable, element: Element<'_>, text: &mut Vec<String>) {
        let Some(data) = element.descendants_named(ns::SQL_TASK, "SqlTaskData").next() else {
            self.ctx.warn(
                DiagnosticCode::MissingAttribute,
                format!("SQL task '{}' has no statement data", executable.name),
                Some(executable.id.as_str()),
            );
            return;
        };

        for (key, value) in data.attributes() {
            match key {
                "SqlStatementSource" => {
                    let sql = value.trim();
                    if !sql.is_empty() {
                        executable.sql_dialect = Some(detect_dialect(sql));
                        executable.sql = Some(sql.to_string());
                        text.push(sql.to_string());
                    }
                }
                "Connection" => executable.connection_ref = Some(value.to_string()),
                _ => executable.properties.insert_missing(key, value),
            }
        }
    }
}

fn read_script_task(executable: &mut Executable, element: Element<'_>, text: &mut Vec<String>) {
    let project = element
        .descendants_local("ScriptProject")
        .next()
        .or_else(|| element.descendants_named(ns::SCRIPT_TASK, "ScriptTaskData").next());
    let Some(project) = project else {
        return;
    };

    if let Some(language) = project.attr_text("Language").or_else(|| project.attr_text("ScriptLanguage")) {
        executable.properties.insert("ScriptLanguage", language);
    }
    if let Some(name) = project.attr_text("Name").or_else(|| project.attr_text("ScriptProjectName")) {
        executable.properties.insert("ScriptProjectName", name);
    }
    if let Some(entry) = project.attr_text("EntryPoint") {
        executable.properties.insert("EntryPoint", entry);
    }

    for key in ["ReadOnlyVariables", "ReadWriteVariables"] {
        let Some(list) = project.attr_text(key) else {
            continue;
        };
        executable.properties.insert(key, list);
        text.extend(list.split(',').map(str::trim).filter(|v| !v.is_empty()).map(bracket_variable));
    }
}

fn read_foreach(executable: &mut Executable, element: Element<'_>, text: &mut Vec<String>) {
    if let Some(enumerator) = element.child(ns::DTS, "ForEachEnumerator") {
        if let Some(kind) = enumerator.attr_text("CreationName") {
            executable.properties.insert("EnumeratorType", kind);
        }
        let inner = enumerator
            .child(ns::DTS, "ObjectData")
            .and_then(|d| d.children().next());
        if let Some(inner) = inner {
            for (key, value) in inner.attributes() {
                executable.properties.insert(format!("Enumerator.{}", key), value);
            }
        }
    }

    let mapped = element
        .children_named(ns::DTS, "ForEachVariableMappings")
        .flat_map(|m| m.children_named(ns::DTS, "ForEachVariableMapping"))
        .filter_map(|m| m.attr_text("VariableName"));
    text.extend(mapped.map(bracket_variable));
}

/// `User::X` or bare `X` to the bracketed `@[User::X]` form
fn bracket_variable(name: &str) -> String {
    if name.contains("::") {
        format!("@[{}]", name)
    } else {
        format!("@[User::{}]", name)
    }
}

/// Flatten every executable below the package root
pub fn extract_executables(
    root: Element<'_>,
    security: &SecurityHandler<'_>,
    ctx: &mut ParseContext<'_>,
) -> ExecutableTree {
    let root_id = root.attr_text("refId").unwrap_or("Package").to_string();

    let mut walker = Walker {
        security,
        ctx,
        tree: ExecutableTree::default(),
        seen: HashSet::new(),
    };
    walker.walk_children(root, &root_id, None);

    tracing::info!(
        total = walker.tree.total,
        supported = walker.tree.supported,
        "Flattened executable tree"
    );
    walker.tree
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::load_package;
    use pretty_assertions::assert_eq;
    use ssisflow_core::{ParserConfig, ProtectionLevel};

    const PACKAGE: &str = r#"<DTS:Executable xmlns:DTS="www.microsoft.com/SqlServer/Dts"
    xmlns:SQLTask="www.microsoft.com/sqlserver/dts/tasks/sqltask"
    DTS:refId="Package" DTS:ObjectName="Sample">
  <DTS:Executables>
    <DTS:Executable DTS:refId="Package\Prepare" DTS:ObjectName="Prepare"
        DTS:ExecutableType="Microsoft.ExecuteSQLTask" DTS:Disabled="True">
      <DTS:PropertyExpression DTS:Name="SqlStatementSource">@[$Package::Stmt]</DTS:PropertyExpression>
      <DTS:ObjectData>
        <SQLTask:SqlTaskData SQLTask:Connection="{CONN-1}"
            SQLTask:SqlStatementSource="TRUNCATE TABLE stage.orders; SELECT GETDATE() WHERE x = @[User::Batch]"
            SQLTask:ResultSetType="ResultSetType_None"/>
      </DTS:ObjectData>
    </DTS:Executable>
    <DTS:Executable DTS:refId="Package\Loop" DTS:ObjectName="Loop" DTS:ExecutableType="STOCK:FOREACHLOOP">
      <DTS:ForEachEnumerator DTS:CreationName="Microsoft.ForEachFileEnumerator">
        <DTS:ObjectData><ForEachFileEnumeratorProperties FileSpec="*.csv"/></DTS:ObjectData>
      </DTS:ForEachEnumerator>
      <DTS:ForEachVariableMappings>
        <DTS:ForEachVariableMapping DTS:VariableName="User::FileName" DTS:ValueIndex="0"/>
      </DTS:ForEachVariableMappings>
      <DTS:Executables>
        <DTS:Executable DTS:ObjectName="Run Child" DTS:ExecutableType="Microsoft.ExecutePackageTask">
          <DTS:ObjectData>
            <ExecutePackageTask><UseProjectReference>True</UseProjectReference><PackageName>Child.dtsx</PackageName></ExecutePackageTask>
          </DTS:ObjectData>
        </DTS:Executable>
        <DTS:Executable DTS:refId="Package\Loop\Odd" DTS:ObjectName="Odd" DTS:ExecutableType="Contoso.OddTask, Contoso, Version=1.0">
          <DTS:Executables>
            <DTS:Executable DTS:refId="Package\Loop\Odd\Script" DTS:ObjectName="Script" DTS:ExecutableType="Microsoft.ScriptTask">
              <DTS:ObjectData>
                <ScriptProject Name="ST_1" Language="CSharp" ReadOnlyVariables="User::FileName,System::PackageName"/>
              </DTS:ObjectData>
            </DTS:Executable>
          </DTS:Executables>
        </DTS:Executable>
      </DTS:Executables>
    </DTS:Executable>
  </DTS:Executables>
</DTS:Executable>"#;

    fn extract(config: &ParserConfig) -> (ExecutableTree, Vec<ssisflow_core::Diagnostic>) {
        let doc = load_package(PACKAGE.as_bytes()).unwrap();
        let security = SecurityHandler::new(ProtectionLevel::DontSaveSensitive, None, &[]);
        let mut ctx = ParseContext::new(config, "sample.dtsx");
        let tree = extract_executables(doc.root(), &security, &mut ctx);
        (tree, ctx.finish().0)
    }

    #[test]
    fn type_mapping() {
        assert_eq!(map_executable_type("Microsoft.ExecuteSQLTask"), ExecutableType::ExecuteSql);
        assert_eq!(
            map_executable_type("Microsoft.SqlServer.Dts.Tasks.ExecuteSQLTask.ExecuteSQLTask, Microsoft.SqlServer.SQLTask, Version=13.0.0.0"),
            ExecutableType::ExecuteSql
        );
        assert_eq!(map_executable_type("SSIS.Pipeline.3"), ExecutableType::DataFlow);
        assert_eq!(map_executable_type("STOCK:SEQUENCE"), ExecutableType::SequenceContainer);
        assert_eq!(
            map_executable_type("Contoso.Task"),
            ExecutableType::Unsupported("Contoso.Task".to_string())
        );
    }

    #[test]
    fn pre_order_with_parent_links() {
        let (tree, _) = extract(&ParserConfig::default());
        let ids: Vec<_> = tree.executables.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "Package\\Prepare",
                "Package\\Loop",
                "Package\\Loop\\Run Child",
                "Package\\Loop\\Odd",
                "Package\\Loop\\Odd\\Script",
            ]
        );
        assert_eq!(tree.executables[0].parent_id, None);
        assert_eq!(tree.executables[2].parent_id.as_deref(), Some("Package\\Loop"));
        assert_eq!(tree.total, 5);
        assert_eq!(tree.supported, 4);
    }

    #[test]
    fn unsupported_executables_can_be_dropped() {
        let config = ParserConfig {
            retain_unsupported_executables: false,
            ..ParserConfig::default()
        };
        let (tree, diagnostics) = extract(&config);
        assert_eq!(tree.executables.len(), 4);
        let script = tree.executables.iter().find(|e| e.name == "Script").unwrap();
        assert_eq!(script.parent_id.as_deref(), Some("Package\\Loop"));
        assert!(diagnostics.iter().any(|d| d.code == DiagnosticCode::UnsupportedExecutable));
    }

    #[test]
    fn sql_task_details() {
        let (tree, _) = extract(&ParserConfig::default());
        let task = &tree.executables[0];
        assert!(task.disabled);
        assert_eq!(task.connection_ref.as_deref(), Some("{CONN-1}"));
        assert_eq!(task.sql_dialect, Some(SqlDialect::Tsql));
        assert_eq!(task.properties.text("ResultSetType"), Some("ResultSetType_None"));
        assert_eq!(task.variable_refs, vec!["User::Batch"]);
        assert_eq!(task.parameter_refs, vec!["$Package::Stmt"]);
    }

    #[test]
    fn container_and_task_extras() {
        let (tree, _) = extract(&ParserConfig::default());

        let lp = &tree.executables[1];
        assert_eq!(lp.properties.text("EnumeratorType"), Some("Microsoft.ForEachFileEnumerator"));
        assert_eq!(lp.properties.text("Enumerator.FileSpec"), Some("*.csv"));
        assert_eq!(lp.variable_refs, vec!["User::FileName"]);

        let child = &tree.executables[2];
        assert_eq!(child.properties.text("PackageName"), Some("Child"));

        let script = &tree.executables[4];
        assert_eq!(script.properties.text("ScriptLanguage"), Some("CSharp"));
        assert_eq!(script.variable_refs, vec!["System::PackageName", "User::FileName"]);
    }

    #[test]
    fn legacy_script_task_data() {
        let xml = r#"<DTS:Executable xmlns:DTS="www.microsoft.com/SqlServer/Dts"
    xmlns:ScriptTask="www.microsoft.com/sqlserver/dts/tasks/scripttask"
    DTS:refId="Package" DTS:ObjectName="Legacy">
  <DTS:Executables>
    <DTS:Executable DTS:refId="Package\Script" DTS:ObjectName="Script" DTS:ExecutableType="Microsoft.ScriptTask">
      <DTS:ObjectData>
        <ScriptTask:ScriptTaskData ScriptTask:ScriptLanguage="VisualBasic"
            ScriptTask:ScriptProjectName="ST_legacy" ScriptTask:ReadOnlyVariables="User::A"/>
      </DTS:ObjectData>
    </DTS:Executable>
  </DTS:Executables>
</DTS:Executable>"#;
        let doc = load_package(xml.as_bytes()).unwrap();
        let security = SecurityHandler::new(ProtectionLevel::DontSaveSensitive, None, &[]);
        let config = ParserConfig::default();
        let mut ctx = ParseContext::new(&config, "legacy.dtsx");
        let tree = extract_executables(doc.root(), &security, &mut ctx);

        let script = &tree.executables[0];
        assert_eq!(script.properties.text("ScriptLanguage"), Some("VisualBasic"));
        assert_eq!(script.properties.text("ScriptProjectName"), Some("ST_legacy"));
        assert_eq!(script.properties.text("ReadOnlyVariables"), Some("User::A"));
        assert_eq!(script.variable_refs, vec!["User::A"]);
    }

    #[test]
    fn dialect_detection() {
        assert_eq!(detect_dialect("select top 10 * from t"), SqlDialect::Tsql);
        assert_eq!(detect_dialect("SELECT a FROM t WHERE b = 1"), SqlDialect::Ansi);
    }
}
