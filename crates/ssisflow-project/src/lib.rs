//! Project-level parsing and package dependency analysis
//!
//! Reads a deployed `.ispac` archive or a project folder, parses every
//! package with `ssisflow-dtsx`, and analyzes how packages invoke each other.
//!
//! ## Example
//!
//! ```rust,ignore
//! use ssisflow_core::ParserConfig;
//! use ssisflow_project::ProjectParser;
//!
//! let config = ParserConfig::default();
//! let parsed = ProjectParser::new(&config).parse_path(Path::new("Warehouse.ispac"))?;
//! for chain in &parsed.project.execution_chains {
//!     println!("{}: {:?}", chain.entry_point, chain.packages);
//! }
//! ```

pub mod error;
pub mod container;
pub mod manifest;
pub mod dependencies;
pub mod analysis;
pub mod project;

pub use error::ProjectError;
pub use container::{open_container, IspacArchive, MemoryContainer, ProjectContainer, ProjectDirectory};
pub use manifest::{ManifestPackage, ProjectManifest};
pub use dependencies::scan_dependencies;
pub use analysis::PackageGraph;
pub use project::{ParsedProject, ProjectParser};
