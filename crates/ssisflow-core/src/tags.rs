//! Closed tag types used throughout the IR
//!
//! Tags that come from free-form package strings carry an explicit
//! `Unsupported(raw)` arm so that unknown values survive without being
//! coerced into a supported kind.

use serde::{Deserialize, Serialize};

/// Package protection level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProtectionLevel {
    /// Sensitive values are not saved at all
    #[default]
    DontSaveSensitive,

    /// Sensitive values encrypted with the creator's user key
    EncryptSensitiveWithUserKey,

    /// Sensitive values encrypted with a package password
    EncryptSensitiveWithPassword,

    /// Whole document encrypted with a package password
    EncryptAllWithPassword,

    /// Whole document encrypted with the creator's user key
    EncryptAllWithUserKey,
}

impl ProtectionLevel {
    /// Parse a protection level from its name or numeric code
    ///
    /// Returns `None` for anything unrecognised; callers decide the fallback.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "0" | "dontsavesensitive" => Some(Self::DontSaveSensitive),
            "1" | "encryptsensitivewithuserkey" => Some(Self::EncryptSensitiveWithUserKey),
            "2" | "encryptsensitivewithpassword" => Some(Self::EncryptSensitiveWithPassword),
            "3" | "encryptallwithpassword" => Some(Self::EncryptAllWithPassword),
            "4" | "encryptallwithuserkey" => Some(Self::EncryptAllWithUserKey),
            _ => None,
        }
    }

    /// Whether the whole document is encrypted
    pub fn is_fully_encrypted(&self) -> bool {
        matches!(self, Self::EncryptAllWithPassword | Self::EncryptAllWithUserKey)
    }

    /// Stable name, matching the package's own spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DontSaveSensitive => "DontSaveSensitive",
            Self::EncryptSensitiveWithUserKey => "EncryptSensitiveWithUserKey",
            Self::EncryptSensitiveWithPassword => "EncryptSensitiveWithPassword",
            Self::EncryptAllWithPassword => "EncryptAllWithPassword",
            Self::EncryptAllWithUserKey => "EncryptAllWithUserKey",
        }
    }
}

impl std::fmt::Display for ProtectionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Connection manager kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Oledb,
    AdoNet,
    FlatFile,
    /// Cloud warehouse (Snowflake and friends)
    Warehouse,
    File,
    Http,
    Ftp,
    Smtp,
    /// Creation name not in the mapping table
    Unsupported(String),
}

impl ConnectionType {
    /// Map a connection manager creation name
    ///
    /// A missing creation name is treated as OLE DB, which is what the
    /// designer writes when the attribute is omitted.
    pub fn from_creation_name(creation_name: Option<&str>) -> Self {
        let Some(raw) = creation_name.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self::Oledb;
        };

        // "ADO.NET:System.Data.SqlClient.SqlConnection, ..." style names
        let head = raw.split(':').next().unwrap_or(raw).to_ascii_uppercase();

        match head.as_str() {
            "OLEDB" => Self::Oledb,
            "ADO.NET" | "ADONET" | "SQLCLIENT" => Self::AdoNet,
            "FLATFILE" | "MULTIFLATFILE" => Self::FlatFile,
            "SNOWFLAKE" | "ODBC" => Self::Warehouse,
            "FILE" | "MULTIFILE" => Self::File,
            "HTTP" => Self::Http,
            "FTP" => Self::Ftp,
            "SMTP" | "SMTPSERVER" => Self::Smtp,
            _ => Self::Unsupported(raw.to_string()),
        }
    }

    /// Relational connections always carry credentials of some kind
    pub fn is_relational(&self) -> bool {
        matches!(self, Self::Oledb | Self::AdoNet | Self::Warehouse)
    }

    /// Connections that downstream generators only partly support
    pub fn has_limited_support(&self) -> bool {
        matches!(self, Self::Http | Self::Ftp | Self::Smtp | Self::Unsupported(_))
    }
}

/// Control flow executable kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutableType {
    ExecuteSql,
    DataFlow,
    Script,
    SequenceContainer,
    ForEachLoop,
    ForLoop,
    BulkInsert,
    ExecutePackage,
    FileSystem,
    Ftp,
    SendMail,
    WebService,
    /// Executable type string not in the mapping table
    Unsupported(String),
}

impl ExecutableType {
    /// Whether the type maps to a known task
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported(_))
    }

    /// Containers hold nested executables
    pub fn is_container(&self) -> bool {
        matches!(self, Self::SequenceContainer | Self::ForEachLoop | Self::ForLoop)
    }

    /// Tasks that move data in from outside the warehouse
    pub fn is_ingestion(&self) -> bool {
        matches!(self, Self::BulkInsert | Self::FileSystem | Self::Ftp | Self::WebService)
    }

    /// Loop containers
    pub fn is_loop(&self) -> bool {
        matches!(self, Self::ForEachLoop | Self::ForLoop)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::ExecuteSql => "ExecuteSQL",
            Self::DataFlow => "DataFlow",
            Self::Script => "ScriptTask",
            Self::SequenceContainer => "SequenceContainer",
            Self::ForEachLoop => "ForEachLoop",
            Self::ForLoop => "ForLoop",
            Self::BulkInsert => "BulkInsert",
            Self::ExecutePackage => "ExecutePackage",
            Self::FileSystem => "FileSystem",
            Self::Ftp => "FTP",
            Self::SendMail => "SendMail",
            Self::WebService => "WebService",
            Self::Unsupported(raw) => raw,
        }
    }
}

impl std::fmt::Display for ExecutableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Broad role of a data flow component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentCategory {
    Source,
    Destination,
    Transform,
    Unsupported,
}

/// Data flow component kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    // Sources
    OledbSource,
    AdoNetSource,
    FlatFileSource,
    ScriptSource,

    // Destinations
    OledbDestination,
    AdoNetDestination,
    FlatFileDestination,
    WarehouseDestination,

    // Transformations
    DerivedColumn,
    Lookup,
    ConditionalSplit,
    UnionAll,
    Sort,
    Aggregate,
    MergeJoin,
    Multicast,
    RowCount,
    ScriptComponent,

    /// Component class id not in the mapping table
    Unsupported(String),
}

impl ComponentType {
    pub fn category(&self) -> ComponentCategory {
        match self {
            Self::OledbSource | Self::AdoNetSource | Self::FlatFileSource | Self::ScriptSource => {
                ComponentCategory::Source
            }
            Self::OledbDestination
            | Self::AdoNetDestination
            | Self::FlatFileDestination
            | Self::WarehouseDestination => ComponentCategory::Destination,
            Self::DerivedColumn
            | Self::Lookup
            | Self::ConditionalSplit
            | Self::UnionAll
            | Self::Sort
            | Self::Aggregate
            | Self::MergeJoin
            | Self::Multicast
            | Self::RowCount
            | Self::ScriptComponent => ComponentCategory::Transform,
            Self::Unsupported(_) => ComponentCategory::Unsupported,
        }
    }

    /// Flat-file endpoints read or write files outside the warehouse
    pub fn is_flat_file(&self) -> bool {
        matches!(self, Self::FlatFileSource | Self::FlatFileDestination)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::OledbSource => "OLEDBSource",
            Self::AdoNetSource => "ADONETSource",
            Self::FlatFileSource => "FlatFileSource",
            Self::ScriptSource => "ScriptSource",
            Self::OledbDestination => "OLEDBDestination",
            Self::AdoNetDestination => "ADONETDestination",
            Self::FlatFileDestination => "FlatFileDestination",
            Self::WarehouseDestination => "WarehouseDestination",
            Self::DerivedColumn => "DerivedColumn",
            Self::Lookup => "Lookup",
            Self::ConditionalSplit => "ConditionalSplit",
            Self::UnionAll => "UnionAll",
            Self::Sort => "Sort",
            Self::Aggregate => "Aggregate",
            Self::MergeJoin => "MergeJoin",
            Self::Multicast => "Multicast",
            Self::RowCount => "RowCount",
            Self::ScriptComponent => "ScriptComponent",
            Self::Unsupported(raw) => raw,
        }
    }
}

impl std::fmt::Display for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Precedence constraint condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrecedenceCondition {
    Success,
    Failure,
    Completion,
    Expression,
}

impl std::fmt::Display for PrecedenceCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Completion => write!(f, "completion"),
            Self::Expression => write!(f, "expression"),
        }
    }
}

/// SQL dialect hint attached to SQL-bearing tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    Tsql,
    #[default]
    Ansi,
}

/// How a destination writes its rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Bulk fast-load append
    Append,
    /// Row-by-row insert
    Insert,
    Merge,
    Truncate,
}
