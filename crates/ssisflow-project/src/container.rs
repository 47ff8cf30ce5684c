//! Project containers
//!
//! A project is read through the [`ProjectContainer`] trait, which exposes
//! named members regardless of where they live:
//! - [`IspacArchive`]: a deployed `.ispac` zip archive
//! - [`ProjectDirectory`]: a project folder on disk
//! - [`MemoryContainer`]: members held in memory, mostly for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ssisflow_project::{open_container, ProjectContainer};
//!
//! let container = open_container(Path::new("Warehouse.ispac"))?;
//! for member in container.package_members() {
//!     let bytes = container.read(&member)?;
//! }
//! ```

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use zip::ZipArchive;

use crate::error::ProjectError;

/// Directories never descended into when walking a project folder
const SKIPPED_DIRS: &[&str] = &["bin", "obj", "node_modules"];

/// File name part of a member path
pub fn member_file_name(member: &str) -> &str {
    member.rsplit(['/', '\\']).next().unwrap_or(member)
}

fn has_extension(member: &str, extension: &str) -> bool {
    Path::new(member_file_name(member))
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

/// Source of project members
pub trait ProjectContainer: Send + Sync {
    /// Name used when no manifest names the project
    fn name(&self) -> &str;

    /// Member paths, sorted
    fn members(&self) -> Vec<String>;

    /// Raw bytes of one member
    fn read(&self, member: &str) -> Result<Vec<u8>, ProjectError>;

    /// Package documents (`*.dtsx`)
    fn package_members(&self) -> Vec<String> {
        self.members()
            .into_iter()
            .filter(|m| has_extension(m, "dtsx"))
            .collect()
    }

    /// Members with the given extension, without the dot
    fn members_with_extension(&self, extension: &str) -> Vec<String> {
        self.members()
            .into_iter()
            .filter(|m| has_extension(m, extension))
            .collect()
    }

    /// First member whose file name matches, ignoring case
    fn find(&self, file_name: &str) -> Option<String> {
        self.members()
            .into_iter()
            .find(|m| member_file_name(m).eq_ignore_ascii_case(file_name))
    }
}

/// Deployed `.ispac` archive, read fully into memory when opened
#[derive(Debug, Clone)]
pub struct IspacArchive {
    name: String,
    members: BTreeMap<String, Vec<u8>>,
}

impl IspacArchive {
    pub fn open(path: &Path) -> Result<Self, ProjectError> {
        if !path.exists() {
            return Err(ProjectError::NotFound(path.display().to_string()));
        }

        let bytes = std::fs::read(path)
            .map_err(|e| ProjectError::Io(path.display().to_string(), e.to_string()))?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Project")
            .to_string();

        Self::from_bytes(name, &bytes)
    }

    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Result<Self, ProjectError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| ProjectError::Archive(format!("Failed to open archive: {}", e)))?;

        let mut members = BTreeMap::new();
        for index in 0..archive.len() {
            let mut file = archive
                .by_index(index)
                .map_err(|e| ProjectError::Archive(format!("Failed to read entry {}: {}", index, e)))?;
            if file.is_dir() {
                continue;
            }

            let member = decode_member_name(file.name());
            let mut content = Vec::new();
            file.read_to_end(&mut content)
                .map_err(|e| ProjectError::Archive(format!("Failed to read {}: {}", member, e)))?;
            members.insert(member, content);
        }

        let name = name.into();
        tracing::info!(archive = %name, members = members.len(), "Opened project archive");
        Ok(Self { name, members })
    }
}

/// Members are percent-encoded inside .ispac archives
fn decode_member_name(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escaped = (bytes[i] == b'%')
            .then(|| bytes.get(i + 1..i + 3))
            .flatten()
            .and_then(|hex| std::str::from_utf8(hex).ok())
            .and_then(|hex| u8::from_str_radix(hex, 16).ok());
        match escaped {
            Some(byte) => {
                decoded.push(byte);
                i += 3;
            }
            None => {
                decoded.push(bytes[i]);
                i += 1;
            }
        }
    }
    String::from_utf8(decoded).unwrap_or_else(|_| raw.to_string())
}

impl ProjectContainer for IspacArchive {
    fn name(&self) -> &str {
        &self.name
    }

    fn members(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    fn read(&self, member: &str) -> Result<Vec<u8>, ProjectError> {
        self.members
            .get(member)
            .cloned()
            .ok_or_else(|| ProjectError::MissingMember(member.to_string()))
    }
}

/// Project folder on disk
#[derive(Debug, Clone)]
pub struct ProjectDirectory {
    root: PathBuf,
    name: String,
    members: Vec<String>,
}

impl ProjectDirectory {
    /// Index every file below `root`, skipping hidden and build directories
    pub fn open(root: &Path) -> Result<Self, ProjectError> {
        if !root.is_dir() {
            return Err(ProjectError::NotFound(root.display().to_string()));
        }

        let mut members = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                e.depth() == 0
                    || !(name.starts_with('.') || (e.file_type().is_dir() && SKIPPED_DIRS.contains(&&*name)))
            });

        for entry in walker {
            let entry = entry.map_err(|e| ProjectError::Io(root.display().to_string(), e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(root) {
                members.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
        members.sort();

        let name = root
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("Project")
            .to_string();

        tracing::info!(directory = %root.display(), members = members.len(), "Indexed project directory");
        Ok(Self {
            root: root.to_path_buf(),
            name,
            members,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ProjectContainer for ProjectDirectory {
    fn name(&self) -> &str {
        &self.name
    }

    fn members(&self) -> Vec<String> {
        self.members.clone()
    }

    fn read(&self, member: &str) -> Result<Vec<u8>, ProjectError> {
        if !self.members.iter().any(|m| m == member) {
            return Err(ProjectError::MissingMember(member.to_string()));
        }
        let path = self.root.join(member);
        std::fs::read(&path).map_err(|e| ProjectError::Io(path.display().to_string(), e.to_string()))
    }
}

/// In-memory container
///
/// ```rust,ignore
/// let container = MemoryContainer::new("Warehouse")
///     .with_member("A.dtsx", package_a)
///     .with_member("B.dtsx", package_b);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryContainer {
    name: String,
    members: BTreeMap<String, Vec<u8>>,
}

impl MemoryContainer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: BTreeMap::new(),
        }
    }

    pub fn with_member(mut self, member: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.insert(member, content);
        self
    }

    pub fn insert(&mut self, member: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.members.insert(member.into(), content.into());
    }
}

impl ProjectContainer for MemoryContainer {
    fn name(&self) -> &str {
        &self.name
    }

    fn members(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    fn read(&self, member: &str) -> Result<Vec<u8>, ProjectError> {
        self.members
            .get(member)
            .cloned()
            .ok_or_else(|| ProjectError::MissingMember(member.to_string()))
    }
}

/// Open an `.ispac` archive, a project folder, or the folder of a `.dtproj`
pub fn open_container(path: &Path) -> Result<Box<dyn ProjectContainer>, ProjectError> {
    if !path.exists() {
        return Err(ProjectError::NotFound(path.display().to_string()));
    }

    if path.is_dir() {
        return Ok(Box::new(ProjectDirectory::open(path)?));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("ispac") | Some("zip") => Ok(Box::new(IspacArchive::open(path)?)),
        Some("dtproj") => {
            let folder = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            Ok(Box::new(ProjectDirectory::open(folder)?))
        }
        _ => Err(ProjectError::InvalidContainer(path.display().to_string())),
    }
}
