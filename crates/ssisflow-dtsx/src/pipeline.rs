//! Data flow pipeline parser
//!
//! Two passes per data flow task. The component pass maps class ids to
//! component types and pulls type-specific properties. The path pass wires
//! path ids into each component's `outputs` (start) and `inputs` (end).
//! Topological ordering of components is left to consumers.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use ssisflow_core::{
    ComponentCategory, ComponentType, DataFlowComponent, DiagnosticCode, PropertyMap, Severity,
    WriteMode,
};

use crate::context::ParseContext;
use crate::document::{ns, Element};

static LOOKUP_TABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bFROM\s+([\[\]\w\.]+)").unwrap());

/// Map a component class id to a component type
///
/// Accepts the `Microsoft.X`, `DTSAdapter.X.N` and `DTSTransform.X.N`
/// spellings. Anything else is `Unsupported`.
pub fn map_component_type(class_id: &str) -> ComponentType {
    let normalized = normalize_class_id(class_id);
    let Some((vendor, name)) = normalized.rsplit_once('.') else {
        return ComponentType::Unsupported(class_id.to_string());
    };

    let known_vendor = matches!(
        vendor,
        "microsoft" | "dtsadapter" | "dtstransform" | "microsoft.sqlserver.dts.pipeline"
    );
    if !known_vendor {
        return ComponentType::Unsupported(class_id.to_string());
    }

    match name {
        "oledbsource" => ComponentType::OledbSource,
        "adonetsource" | "datareadersourceadapter" => ComponentType::AdoNetSource,
        "flatfilesource" => ComponentType::FlatFileSource,
        "scriptsource" => ComponentType::ScriptSource,
        "oledbdestination" => ComponentType::OledbDestination,
        "adonetdestination" | "adonetdestinationadapter" => ComponentType::AdoNetDestination,
        "flatfiledestination" => ComponentType::FlatFileDestination,
        "snowflakedestination" => ComponentType::WarehouseDestination,
        "derivedcolumn" => ComponentType::DerivedColumn,
        "lookup" => ComponentType::Lookup,
        "conditionalsplit" => ComponentType::ConditionalSplit,
        "unionall" => ComponentType::UnionAll,
        "sort" => ComponentType::Sort,
        "aggregate" => ComponentType::Aggregate,
        "mergejoin" => ComponentType::MergeJoin,
        "multicast" => ComponentType::Multicast,
        "rowcount" => ComponentType::RowCount,
        "scriptcomponent" | "managedcomponenthost" => ComponentType::ScriptComponent,
        _ => ComponentType::Unsupported(class_id.to_string()),
    }
}

/// Lowercase, drop assembly qualifiers and a trailing `.N` version
fn normalize_class_id(raw: &str) -> String {
    let head = raw.split(',').next().unwrap_or(raw).trim().to_ascii_lowercase();
    match head.rsplit_once('.') {
        Some((rest, last)) if !last.is_empty() && last.chars().all(|c| c.is_ascii_digit()) => {
            rest.to_string()
        }
        _ => head,
    }
}

/// Whether a destination access mode means bulk fast load
fn is_fast_load(access_mode: &str) -> bool {
    let mode = access_mode.trim();
    mode.to_ascii_lowercase().contains("fastload") || mode == "3" || mode == "4"
}

/// Per-task pipeline state, dropped once the task is parsed
struct PipelineBuilder<'p, 'c> {
    task_id: &'p str,
    ctx: &'p mut ParseContext<'c>,
    components: Vec<DataFlowComponent>,
    index: HashMap<String, usize>,
}

impl<'p, 'c> PipelineBuilder<'p, 'c> {
    fn wiring_severity(&self) -> Severity {
        if self.ctx.config().strict_wiring {
            Severity::Error
        } else {
            Severity::Warn
        }
    }

    fn add_component(&mut self, element: Element<'_>) {
        let Some(id) = element.attr_text("refId").or_else(|| element.attr_text("id")) else {
            self.ctx.warn(
                DiagnosticCode::MissingAttribute,
                format!("Component without an id skipped in '{}'", self.task_id),
                Some(self.task_id),
            );
            return;
        };

        let class_id = element.attr("componentClassID").unwrap_or("").to_string();
        let component_type = map_component_type(&class_id);
        if let ComponentType::Unsupported(raw) = &component_type {
            self.ctx.warn(
                DiagnosticCode::UnsupportedComponent,
                format!("Unsupported component '{}' ({}) dropped", id, raw),
                Some(id),
            );
            return;
        }

        if self.index.contains_key(id) {
            self.ctx.warn(
                DiagnosticCode::DuplicateKey,
                format!("Duplicate component id '{}' ignored", id),
                Some(id),
            );
            return;
        }

        let mut component = DataFlowComponent {
            id: id.to_string(),
            name: element.attr_text("name").unwrap_or(id).to_string(),
            component_type,
            class_id,
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
        };

        let (properties, column_expressions, reference_columns) = collect_properties(element);
        component.properties = properties;
        component.connection_ref = element
            .children()
            .filter(|c| c.has_local_name("connections"))
            .flat_map(|c| c.children())
            .find_map(|c| {
                c.attr_text("connectionManagerRefId")
                    .or_else(|| c.attr_text("connectionManagerID"))
            })
            .map(str::to_string);

        apply_category_properties(&mut component, column_expressions, reference_columns);

        tracing::debug!(
            task = self.task_id,
            component = %component.id,
            component_type = %component.component_type,
            "Parsed component"
        );

        self.index.insert(component.id.clone(), self.components.len());
        self.components.push(component);
    }

    /// Component owning a path endpoint: exact id, else longest `id.` prefix
    fn resolve(&self, endpoint: &str) -> Option<usize> {
        if let Some(&index) = self.index.get(endpoint) {
            return Some(index);
        }

        self.index
            .iter()
            .filter(|(id, _)| {
                endpoint.len() > id.len()
                    && endpoint.starts_with(id.as_str())
                    && endpoint.as_bytes()[id.len()] == b'.'
            })
            .max_by_key(|(id, _)| id.len())
            .map(|(_, &index)| index)
    }

    fn wire_paths(&mut self, pipeline: Element<'_>) {
        let mut producers: HashMap<String, usize> = HashMap::new();
        let severity = self.wiring_severity();

        for path in pipeline.descendants_local("path") {
            let Some(path_id) = path.attr_text("refId").or_else(|| path.attr_text("id")) else {
                self.ctx.warn(
                    DiagnosticCode::MissingAttribute,
                    format!("Path without an id skipped in '{}'", self.task_id),
                    Some(self.task_id),
                );
                continue;
            };

            let start = path.attr_text("startId").and_then(|s| self.resolve(s));
            let end = path.attr_text("endId").and_then(|e| self.resolve(e));

            match start {
                Some(start) => {
                    if let Some(&previous) = producers.get(path_id) {
                        if previous != start {
                            let message = format!(
                                "Path '{}' is produced by both '{}' and '{}'",
                                path_id, self.components[previous].id, self.components[start].id
                            );
                            self.ctx.report(DiagnosticCode::DataflowFanIn, severity, message, Some(path_id));
                        }
                    } else {
                        producers.insert(path_id.to_string(), start);
                    }
                    push_unique(&mut self.components[start].outputs, path_id);
                }
                None => {
                    let message = format!(
                        "Start of path '{}' ({}) does not resolve to a component",
                        path_id,
                        path.attr("startId").unwrap_or("missing")
                    );
                    self.ctx.report(DiagnosticCode::DataflowUnresolvedPath, severity, message, Some(path_id));
                }
            }

            match end {
                Some(end) => push_unique(&mut self.components[end].inputs, path_id),
                None => {
                    let message = format!(
                        "End of path '{}' ({}) does not resolve to a component",
                        path_id,
                        path.attr("endId").unwrap_or("missing")
                    );
                    self.ctx.report(DiagnosticCode::DataflowUnresolvedPath, severity, message, Some(path_id));
                }
            }
        }
    }

    /// Every input must be some component's output
    fn check_wiring(&mut self) {
        let produced: HashSet<&str> = self
            .components
            .iter()
            .flat_map(|c| c.outputs.iter().map(String::as_str))
            .collect();

        let unwired: Vec<(String, String)> = self
            .components
            .iter()
            .flat_map(|c| {
                c.inputs
                    .iter()
                    .filter(|input| !produced.contains(input.as_str()))
                    .map(move |input| (c.id.clone(), input.clone()))
            })
            .collect();

        let severity = self.wiring_severity();
        for (component, input) in unwired {
            self.ctx.report(
                DiagnosticCode::DataflowUnwiredInput,
                severity,
                format!("Input '{}' of '{}' is not produced by any component", input, component),
                Some(component.as_str()),
            );
        }
    }
}

fn push_unique(ids: &mut Vec<String>, id: &str) {
    if !ids.iter().any(|existing| existing == id) {
        ids.push(id.to_string());
    }
}

/// Gather `properties/property` values under a component
///
/// Component-level properties keep their own name; column-level ones are
/// keyed `column.property`. Also returns the column-level `Expression`
/// values and lookup reference columns in document order.
fn collect_properties(component: Element<'_>) -> (PropertyMap, Vec<String>, Vec<String>) {
    let mut properties = PropertyMap::new();
    let mut expressions = Vec::new();
    let mut reference_columns = Vec::new();

    for property in component.descendants_local("property") {
        let Some(name) = property.attr_text("name") else {
            continue;
        };
        let Some(value) = property.text() else {
            continue;
        };

        let owner = property
            .parent()
            .filter(|p| p.has_local_name("properties"))
            .and_then(|p| p.parent());

        match owner {
            Some(owner) if owner == component => properties.insert_missing(name, value),
            Some(owner) => {
                let column = owner.attr_text("name").unwrap_or(owner.local_name());
                properties.insert_missing(format!("{}.{}", column, name), value);
                match name {
                    "Expression" => expressions.push(value.to_string()),
                    "JoinToReferenceColumn" => reference_columns.push(value.to_string()),
                    _ => {}
                }
            }
            None => {}
        }
    }

    (properties, expressions, reference_columns)
}

fn apply_category_properties(
    component: &mut DataFlowComponent,
    column_expressions: Vec<String>,
    reference_columns: Vec<String>,
) {
    let props = &component.properties;

    match component.component_type.category() {
        ComponentCategory::Source => {
            component.sql = props.text("SqlCommand").map(|s| s.trim().to_string());
            component.table = props.text("TableOrViewName").map(|s| s.trim().to_string());
        }
        ComponentCategory::Destination => {
            component.table = props
                .text("TableOrViewName")
                .or_else(|| props.text("OpenRowset"))
                .map(|s| s.trim().to_string());

            let fast_load = props.text("AccessMode").is_some_and(is_fast_load)
                || props.flag_or("UseBulkInsertWhenPossible", false);
            component.write_mode = match component.component_type {
                ComponentType::FlatFileDestination => None,
                _ if fast_load => Some(WriteMode::Append),
                _ => Some(WriteMode::Insert),
            };

            let normalized: Vec<(&str, String)> = [
                ("load_options", props.text("FastLoadOptions").map(|o| o.trim().to_string())),
                ("keep_identity", props.flag("FastLoadKeepIdentity").map(|f| f.to_string())),
                ("keep_nulls", props.flag("FastLoadKeepNulls").map(|f| f.to_string())),
            ]
            .into_iter()
            .filter_map(|(key, value)| Some((key, value?)))
            .collect();
            for (key, value) in normalized {
                component.properties.insert(key, value);
            }
        }
        ComponentCategory::Transform => match component.component_type {
            ComponentType::DerivedColumn => {
                let mut expressions = column_expressions;
                if let Some(own) = props.text("Expression") {
                    expressions.insert(0, own.to_string());
                }
                if !expressions.is_empty() {
                    component.expression = Some(
                        expressions
                            .iter()
                            .map(|e| e.trim())
                            .collect::<Vec<_>>()
                            .join("\n"),
                    );
                }
            }
            ComponentType::Lookup => {
                component.sql = props.text("SqlCommand").map(|s| s.trim().to_string());

                let keys: Vec<String> = match props.text("JoinKeys") {
                    Some(raw) => raw
                        .split(',')
                        .map(str::trim)
                        .filter(|k| !k.is_empty())
                        .map(str::to_string)
                        .collect(),
                    None => reference_columns,
                };
                component.join_keys = (!keys.is_empty()).then_some(keys);

                component.lookup_table = component
                    .sql
                    .as_deref()
                    .and_then(|sql| LOOKUP_TABLE_RE.captures(sql))
                    .map(|c| c[1].to_string())
                    .or_else(|| props.text("TableOrViewName").map(str::to_string));
            }
            _ => {}
        },
        ComponentCategory::Unsupported => {}
    }
}

/// Parse the pipeline of one data flow task
///
/// Returns `None` when the task has no pipeline element at all.
pub fn parse_pipeline(
    task: Element<'_>,
    task_id: &str,
    ctx: &mut ParseContext<'_>,
) -> Option<Vec<DataFlowComponent>> {
    let pipeline = task
        .child(ns::DTS, "ObjectData")
        .and_then(|data| data.descendants_local("pipeline").next())?;

    let mut builder = PipelineBuilder {
        task_id,
        ctx,
        components: Vec::new(),
        index: HashMap::new(),
    };

    let components = pipeline
        .children()
        .filter(|c| c.has_local_name("components"))
        .flat_map(|c| c.children())
        .filter(|c| c.has_local_name("component"));
    for component in components {
        builder.add_component(component);
    }

    builder.wire_paths(pipeline);
    builder.check_wiring();

    tracing::info!(
        task = task_id,
        components = builder.components.len(),
        "Parsed data flow pipeline"
    );
    Some(builder.components)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::load_package;
    use pretty_assertions::assert_eq;
    use ssisflow_core::ParserConfig;

    fn task_xml(components: &str, paths: &str) -> String {
        format!(
            r#"<DTS:Executable xmlns:DTS="www.microsoft.com/SqlServer/Dts" DTS:refId="Package">
  <DTS:Executables>
    <DTS:Executable DTS:refId="Package\Load" DTS:ObjectName="Load" DTS:ExecutableType="Microsoft.Pipeline">
      <DTS:ObjectData>
        <pipeline version="1">
          <components>{}</components>
          <paths>{}</paths>
        </pipeline>
      </DTS:ObjectData>
    </DTS:Executable>
  </DTS:Executables>
</DTS:Executable>"#,
            components, paths
        )
    }

    fn parse(xml: &str, config: &ParserConfig) -> (Vec<DataFlowComponent>, Vec<ssisflow_core::Diagnostic>) {
        let doc = load_package(xml.as_bytes()).unwrap();
        let task = doc.root().descendants_named(ns::DTS, "Executable").next().unwrap();
        let mut ctx = ParseContext::new(config, "p.dtsx");
        let components = parse_pipeline(task, "Package\\Load", &mut ctx).unwrap();
        (components, ctx.finish().0)
    }

    #[test]
    fn class_id_mapping() {
        assert_eq!(map_component_type("Microsoft.OLEDBSource"), ComponentType::OledbSource);
        assert_eq!(map_component_type("DTSTransform.DerivedColumn.3"), ComponentType::DerivedColumn);
        assert_eq!(map_component_type("DTSAdapter.FlatFileDestination"), ComponentType::FlatFileDestination);
        assert_eq!(
            map_component_type("{874F7595-FB5F-40FF-96AF-FBFF8250E3EF}"),
            ComponentType::Unsupported("{874F7595-FB5F-40FF-96AF-FBFF8250E3EF}".to_string())
        );
        assert_eq!(
            map_component_type("Contoso.FuzzyThing"),
            ComponentType::Unsupported("Contoso.FuzzyThing".to_string())
        );
    }

    #[test]
    fn three_component_chain_is_wired() {
        let xml = task_xml(
            r#"<component refId="Package\Load\Src" name="Src" componentClassID="Microsoft.OLEDBSource">
                 <properties><property name="SqlCommand">SELECT * FROM dbo.Orders</property></properties>
               </component>
               <component refId="Package\Load\Derive" name="Derive" componentClassID="Microsoft.DerivedColumn">
                 <outputs><output refId="Package\Load\Derive.Outputs[Out]" name="Out"><outputColumns>
                   <outputColumn refId="c1" name="Loaded"><properties><property name="Expression">GETDATE()</property></properties></outputColumn>
                 </outputColumns></output></outputs>
               </component>
               <component refId="Package\Load\Dst" name="Dst" componentClassID="Microsoft.OLEDBDestination">
                 <properties>
                   <property name="OpenRowset">[dbo].[Orders]</property>
                   <property name="AccessMode">3</property>
                 </properties>
               </component>"#,
            r#"<path refId="path1" startId="Package\Load\Src.Outputs[OLE DB Source Output]" endId="Package\Load\Derive.Inputs[In]"/>
               <path refId="path2" startId="Package\Load\Derive.Outputs[Out]" endId="Package\Load\Dst.Inputs[In]"/>"#,
        );

        let (components, diagnostics) = parse(&xml, &ParserConfig::default());
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);

        let (src, derive, dst) = (&components[0], &components[1], &components[2]);
        assert_eq!(src.outputs, vec!["path1"]);
        assert!(src.inputs.is_empty());
        assert_eq!(derive.inputs, vec!["path1"]);
        assert_eq!(derive.outputs, vec!["path2"]);
        assert_eq!(dst.inputs, vec!["path2"]);

        assert_eq!(src.sql.as_deref(), Some("SELECT * FROM dbo.Orders"));
        assert_eq!(derive.expression.as_deref(), Some("GETDATE()"));
        assert_eq!(derive.properties.text("Loaded.Expression"), Some("GETDATE()"));
        assert_eq!(dst.table.as_deref(), Some("[dbo].[Orders]"));
        assert_eq!(dst.write_mode, Some(WriteMode::Append));
    }

    #[test]
    fn duplicate_paths_are_idempotent() {
        let xml = task_xml(
            r#"<component refId="A" componentClassID="Microsoft.OLEDBSource"/>
               <component refId="B" componentClassID="Microsoft.OLEDBDestination"/>"#,
            r#"<path refId="p" startId="A" endId="B"/><path refId="p" startId="A" endId="B"/>"#,
        );
        let (components, diagnostics) = parse(&xml, &ParserConfig::default());
        assert_eq!(components[0].outputs, vec!["p"]);
        assert_eq!(components[1].inputs, vec!["p"]);
        assert_eq!(components[1].write_mode, Some(WriteMode::Insert));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn unsupported_component_is_dropped_and_wiring_warned() {
        let xml = task_xml(
            r#"<component refId="A" componentClassID="Contoso.Magic"/>
               <component refId="B" componentClassID="Microsoft.OLEDBDestination"/>"#,
            r#"<path refId="p" startId="A.Outputs[x]" endId="B.Inputs[y]"/>"#,
        );
        let (components, diagnostics) = parse(&xml, &ParserConfig::default());
        assert_eq!(components.len(), 1);

        let codes: Vec<_> = diagnostics.iter().map(|d| d.code).collect();
        assert_eq!(
            codes,
            vec![
                DiagnosticCode::UnsupportedComponent,
                DiagnosticCode::DataflowUnresolvedPath,
                DiagnosticCode::DataflowUnwiredInput,
            ]
        );
        assert!(diagnostics.iter().all(|d| d.severity == Severity::Warn));
    }

    #[test]
    fn strict_wiring_raises_severity() {
        let xml = task_xml(
            r#"<component refId="A" componentClassID="Microsoft.OLEDBSource"/>
               <component refId="B" componentClassID="Microsoft.Multicast"/>
               <component refId="C" componentClassID="Microsoft.UnionAll"/>"#,
            r#"<path refId="p" startId="A" endId="C"/><path refId="p" startId="B" endId="C"/>"#,
        );
        let config = ParserConfig {
            strict_wiring: true,
            ..ParserConfig::default()
        };
        let (components, diagnostics) = parse(&xml, &config);
        assert_eq!(components[2].inputs, vec!["p"]);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, DiagnosticCode::DataflowFanIn);
        assert_eq!(diagnostics[0].severity, Severity::Error);
    }

    #[test]
    fn lookup_properties() {
        let xml = task_xml(
            r#"<component refId="L" componentClassID="Microsoft.Lookup">
                 <properties>
                   <property name="SqlCommand">select id, code from [ref].[Country]</property>
                 </properties>
                 <inputs><input refId="L.Inputs[In]" name="In"><inputColumns>
                   <inputColumn refId="ic" name="CountryCode"><properties><property name="JoinToReferenceColumn">code</property></properties></inputColumn>
                 </inputColumns></input></inputs>
               </component>"#,
            "",
        );
        let (components, _) = parse(&xml, &ParserConfig::default());
        let lookup = &components[0];
        assert_eq!(lookup.lookup_table.as_deref(), Some("[ref].[Country]"));
        assert_eq!(lookup.join_keys, Some(vec!["code".to_string()]));
    }

    #[test]
    fn destination_fast_load_options_are_normalized() {
        let xml = task_xml(
            r#"<component refId="D" componentClassID="Microsoft.OLEDBDestination">
                 <properties>
                   <property name="OpenRowset">[dbo].[Orders]</property>
                   <property name="AccessMode">3</property>
                   <property name="FastLoadOptions">TABLOCK,CHECK_CONSTRAINTS</property>
                   <property name="FastLoadKeepIdentity">True</property>
                   <property name="FastLoadKeepNulls">false</property>
                 </properties>
               </component>"#,
            "",
        );
        let (components, _) = parse(&xml, &ParserConfig::default());
        let destination = &components[0];
        assert_eq!(destination.table.as_deref(), Some("[dbo].[Orders]"));
        assert_eq!(destination.properties.text("load_options"), Some("TABLOCK,CHECK_CONSTRAINTS"));
        assert_eq!(destination.properties.flag("keep_identity"), Some(true));
        assert_eq!(destination.properties.flag("keep_nulls"), Some(false));
        assert_eq!(destination.properties.text("FastLoadKeepIdentity"), Some("True"));
    }

    #[test]
    fn missing_pipeline_returns_none() {
        let doc = load_package(
            br#"<DTS:Executable xmlns:DTS="www.microsoft.com/SqlServer/Dts"><DTS:ObjectData/></DTS:Executable>"#,
        )
        .unwrap();
        let config = ParserConfig::default();
        let mut ctx = ParseContext::new(&config, "p.dtsx");
        assert!(parse_pipeline(doc.root(), "Package", &mut ctx).is_none());
    }
}
