//! Integration tests for project parsing

use std::io::{Cursor, Write};

use pretty_assertions::assert_eq;
use ssisflow_core::{DiagnosticCode, IrProject, ParserConfig, PrecedenceCondition, ProtectionLevel, REDACTED};
use ssisflow_project::{IspacArchive, MemoryContainer, ProjectParser};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

fn package(name: &str, children: &[&str]) -> String {
    let tasks: String = children
        .iter()
        .map(|child| {
            format!(
                r#"
    <DTS:Executable DTS:refId="Package\Run {child}" DTS:ObjectName="Run {child}"
        DTS:ExecutableType="Microsoft.ExecutePackageTask">
      <DTS:ObjectData>
        <ExecutePackageTask><UseProjectReference>True</UseProjectReference><PackageName>{child}.dtsx</PackageName></ExecutePackageTask>
      </DTS:ObjectData>
    </DTS:Executable>"#
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0"?>
<DTS:Executable xmlns:DTS="www.microsoft.com/SqlServer/Dts"
    DTS:refId="Package" DTS:ObjectName="{name}" DTS:ExecutableType="Microsoft.Package"
    DTS:ProtectionLevel="0">
  <DTS:Executables>
    <DTS:Executable DTS:refId="Package\Prepare" DTS:ObjectName="Prepare"
        DTS:ExecutableType="Microsoft.ExecuteSQLTask" />{tasks}
  </DTS:Executables>
</DTS:Executable>"#
    )
}

const MANIFEST: &str = r#"<?xml version="1.0"?>
<SSIS:Project SSIS:ProtectionLevel="DontSaveSensitive" xmlns:SSIS="www.microsoft.com/SqlServer/SSIS">
  <SSIS:Properties>
    <SSIS:Property SSIS:Name="Name">Warehouse</SSIS:Property>
    <SSIS:Property SSIS:Name="VersionMajor">2</SSIS:Property>
    <SSIS:Property SSIS:Name="VersionMinor">0</SSIS:Property>
  </SSIS:Properties>
  <SSIS:Packages>
    <SSIS:Package SSIS:Name="Master.dtsx" SSIS:EntryPoint="1" />
    <SSIS:Package SSIS:Name="LoadOrders.dtsx" SSIS:EntryPoint="0" />
    <SSIS:Package SSIS:Name="Retired.dtsx" SSIS:EntryPoint="0" />
  </SSIS:Packages>
</SSIS:Project>"#;

const PARAMS: &str = r#"<?xml version="1.0"?>
<SSIS:Parameters xmlns:SSIS="www.microsoft.com/SqlServer/SSIS">
  <SSIS:Parameter SSIS:Name="LoadDate">
    <SSIS:Properties>
      <SSIS:Property SSIS:Name="DataType">7</SSIS:Property>
      <SSIS:Property SSIS:Name="Value">2024-01-01</SSIS:Property>
    </SSIS:Properties>
  </SSIS:Parameter>
  <SSIS:Parameter SSIS:Name="Password">
    <SSIS:Properties>
      <SSIS:Property SSIS:Name="Value">hunter2</SSIS:Property>
    </SSIS:Properties>
  </SSIS:Parameter>
</SSIS:Parameters>"#;

const CONMGR: &str = r#"<?xml version="1.0"?>
<DTS:ConnectionManager xmlns:DTS="www.microsoft.com/SqlServer/Dts"
    DTS:refId="Project.ConnectionManagers[Warehouse]" DTS:ObjectName="Warehouse" DTS:CreationName="OLEDB">
  <DTS:ObjectData>
    <DTS:ConnectionManager DTS:ConnectionString="Data Source=dw;Initial Catalog=Sales;" />
  </DTS:ObjectData>
</DTS:ConnectionManager>"#;

fn ispac(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut buffer);
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, content) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buffer.into_inner()
}

fn warehouse_entries() -> Vec<(&'static str, String)> {
    vec![
        ("@Project.manifest", MANIFEST.to_string()),
        ("Project.params", PARAMS.to_string()),
        ("Warehouse.conmgr", CONMGR.to_string()),
        ("Master.dtsx", package("Master", &["LoadOrders", "LoadCustomers"])),
        ("LoadOrders.dtsx", package("LoadOrders", &[])),
        ("LoadCustomers.dtsx", package("LoadCustomers", &[])),
        ("Audit.dtsx", package("Audit", &[])),
    ]
}

fn check_warehouse(project: &IrProject) {
    assert_eq!(project.name, "Warehouse");
    assert_eq!(project.version.as_deref(), Some("2.0"));
    assert_eq!(project.protection_level, ProtectionLevel::DontSaveSensitive);

    let names: Vec<_> = project.packages.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["Audit", "LoadCustomers", "LoadOrders", "Master"]);

    assert_eq!(project.entry_points, vec!["Audit", "Master"]);
    assert_eq!(project.isolated_packages, vec!["Audit"]);
    assert_eq!(project.execution_chains.len(), 1);
    assert_eq!(
        project.execution_chains[0].packages,
        vec!["Master", "LoadOrders", "LoadCustomers"]
    );
    assert_eq!(project.children_of("Master").count(), 2);
    assert!(project
        .dependencies
        .iter()
        .all(|d| d.condition.is_none() && d.parent == "Master"));

    assert_eq!(project.parameters.len(), 2);
    assert_eq!(project.parameters[0].data_type, "DateTime");
    assert_eq!(project.parameters[1].default_value.as_deref(), Some(REDACTED));
    assert_eq!(project.connections.len(), 1);
    assert_eq!(project.connections[0].id, "Project.ConnectionManagers[Warehouse]");
}

#[test]
fn ispac_archive_end_to_end() {
    let entries = warehouse_entries();
    let borrowed: Vec<(&str, &str)> = entries.iter().map(|(n, c)| (*n, c.as_str())).collect();
    let archive = IspacArchive::from_bytes("Deployed", &ispac(&borrowed)).unwrap();

    let config = ParserConfig::default();
    let parsed = ProjectParser::new(&config).parse_container(&archive);

    check_warehouse(&parsed.project);
    assert!(parsed.is_success());
    assert_eq!(parsed.report.summary.packages_total, 4);
    assert_eq!(parsed.report.summary.dependencies, 2);
    assert_eq!(parsed.report.summary.entry_points, 2);

    // Retired.dtsx is listed by the manifest but missing from the archive
    assert!(parsed
        .report
        .diagnostics
        .iter()
        .any(|d| d.code == DiagnosticCode::Warning && d.message.contains("Retired")));

    assert_eq!(
        parsed.report.recommendations,
        vec![
            "Multiple entry points detected - consider creating a master DAG for orchestration".to_string(),
            "Isolated packages found: [\"Audit\"] - these can be independent DAGs".to_string(),
        ]
    );
}

#[test]
fn directory_and_archive_agree() {
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in warehouse_entries() {
        std::fs::write(dir.path().join(name), content).unwrap();
    }
    std::fs::create_dir_all(dir.path().join("obj")).unwrap();
    std::fs::write(dir.path().join("obj/Stale.dtsx"), package("Stale", &[])).unwrap();

    let config = ParserConfig::default();
    let parsed = ProjectParser::new(&config).parse_path(dir.path()).unwrap();
    check_warehouse(&parsed.project);

    let ispac_path = dir.path().join("obj").join("Warehouse.ispac");
    let entries = warehouse_entries();
    let borrowed: Vec<(&str, &str)> = entries.iter().map(|(n, c)| (*n, c.as_str())).collect();
    std::fs::write(&ispac_path, ispac(&borrowed)).unwrap();

    let from_archive = ProjectParser::new(&config).parse_path(&ispac_path).unwrap();
    assert_eq!(from_archive.project, parsed.project);
}

#[test]
fn failed_packages_become_placeholders() {
    let encrypted = r#"<DTS:Executable xmlns:DTS="www.microsoft.com/SqlServer/Dts"
        DTS:ObjectName="Secret" DTS:ProtectionLevel="EncryptAllWithUserKey">
      <EncryptedData>AAAA</EncryptedData>
    </DTS:Executable>"#;

    let container = MemoryContainer::new("Partial")
        .with_member("A.dtsx", package("A", &["B", "Secret"]))
        .with_member("B.dtsx", "this is not a package")
        .with_member("Secret.dtsx", encrypted);

    let config = ParserConfig::default();
    let parsed = ProjectParser::new(&config).parse_container(&container);
    let project = &parsed.project;

    assert!(parsed.is_partial());
    assert_eq!(parsed.report.summary.packages_parsed, 1);
    assert_eq!(parsed.report.summary.packages_failed, 2);

    let failed: Vec<_> = project.failed_packages().map(|p| p.name.as_str()).collect();
    assert_eq!(failed, vec!["B", "Secret"]);
    assert!(project.package("B").is_some_and(|p| p.executables.is_empty()));
    assert_eq!(project.package("Secret").map(|p| p.name()), Some("Secret"));

    // Analysis still covers the failed packages
    assert_eq!(project.entry_points, vec!["A"]);
    assert_eq!(project.execution_chains[0].packages, vec!["A", "B", "Secret"]);
    assert!(parsed
        .report
        .diagnostics
        .iter()
        .any(|d| d.code == DiagnosticCode::DependencyScanFailed));

    let secret = parsed.report.package("Secret").unwrap();
    assert!(secret
        .diagnostics
        .iter()
        .any(|d| d.code == DiagnosticCode::PackageEncrypted));
}

#[test]
fn recovered_package_still_contributes_dependencies() {
    let mut truncated = package("Parent", &["Child"]);
    truncated.truncate(truncated.rfind("</DTS:Executables>").unwrap());
    truncated.push_str("<DTS:Broken <<");

    let container = MemoryContainer::new("Recover")
        .with_member("Parent.dtsx", truncated)
        .with_member("Child.dtsx", package("Child", &[]));

    let config = ParserConfig::default();
    let parsed = ProjectParser::new(&config).parse_container(&container);

    assert_eq!(parsed.project.dependencies.len(), 1);
    assert_eq!(parsed.project.entry_points, vec!["Parent"]);
}

#[test]
fn dependency_condition_comes_from_parent_edges() {
    let master = r#"<DTS:Executable xmlns:DTS="www.microsoft.com/SqlServer/Dts" DTS:refId="Package" DTS:ObjectName="Master">
  <DTS:Executables>
    <DTS:Executable DTS:refId="Package\Prepare" DTS:ObjectName="Prepare" DTS:ExecutableType="Microsoft.ExecuteSQLTask" />
    <DTS:Executable DTS:refId="Package\Cleanup" DTS:ObjectName="Cleanup" DTS:ExecutableType="Microsoft.ExecutePackageTask">
      <DTS:ObjectData><ExecutePackageTask><PackageName>Cleanup.dtsx</PackageName></ExecutePackageTask></DTS:ObjectData>
    </DTS:Executable>
  </DTS:Executables>
  <DTS:PrecedenceConstraints>
    <DTS:PrecedenceConstraint DTS:From="Package\Prepare" DTS:To="Package\Cleanup" DTS:Value="1" />
  </DTS:PrecedenceConstraints>
</DTS:Executable>"#;

    let container = MemoryContainer::new("Conditions")
        .with_member("Master.dtsx", master)
        .with_member("Cleanup.dtsx", package("Cleanup", &[]));

    let config = ParserConfig::default();
    let parsed = ProjectParser::new(&config).parse_container(&container);

    assert_eq!(parsed.project.dependencies.len(), 1);
    assert_eq!(parsed.project.dependencies[0].condition, Some(PrecedenceCondition::Failure));
    assert_eq!(parsed.project.dependencies[0].task_name, "Cleanup");
}

#[test]
fn project_json_round_trip() {
    let container = MemoryContainer::new("Json")
        .with_member("A.dtsx", package("A", &["B"]))
        .with_member("B.dtsx", package("B", &[]));

    let config = ParserConfig::default();
    let parsed = ProjectParser::new(&config).parse_container(&container);

    let json = parsed.project.to_json().unwrap();
    assert_eq!(IrProject::from_json(&json).unwrap(), parsed.project);
    assert!(parsed.report.to_json().unwrap().contains("\"packages_total\": 2"));
}
