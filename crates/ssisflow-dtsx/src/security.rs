//! Protection levels and sensitive data redaction
//!
//! Decryption is not implemented. Every protection level that only
//! encrypts sensitive values degrades to redaction with a logged diagnostic;
//! fully encrypted packages are refused.

use ssisflow_core::{DiagnosticCode, IrPackage, PropertyMap, ProtectionLevel, REDACTED};

use crate::context::ParseContext;
use crate::error::EncryptionError;

/// Property names that are never stored in clear text
///
/// Compared after lowercasing and dropping spaces, underscores and dashes,
/// so `User ID`, `user_id` and `UserId` all match `userid`.
pub const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "pwd",
    "connectionstring",
    "userpassword",
    "servername",
    "userid",
    "username",
    "initialcatalog",
    "database",
    "sqlstatement",
    "commandtext",
];

const CREDENTIAL_MARKERS: &[&str] = &["password=", "pwd=", "user id="];

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(*c, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Whether a property name belongs to the built-in sensitive set
pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = normalize_key(key);
    SENSITIVE_KEYS.contains(&normalized.as_str())
}

/// Applies the protection level policy to one package
pub struct SecurityHandler<'a> {
    level: ProtectionLevel,
    password: Option<&'a str>,
    extra_keys: &'a [String],
}

impl<'a> SecurityHandler<'a> {
    pub fn new(level: ProtectionLevel, password: Option<&'a str>, extra_keys: &'a [String]) -> Self {
        Self {
            level,
            password: password.filter(|p| !p.is_empty()),
            extra_keys,
        }
    }

    pub fn level(&self) -> ProtectionLevel {
        self.level
    }

    /// Resolve the policy for this package's protection level
    ///
    /// Fully encrypted packages fail whether or not a password was supplied,
    /// since whole-document decryption is not available.
    pub fn resolve(&self, ctx: &mut ParseContext<'_>) -> Result<(), EncryptionError> {
        match self.level {
            ProtectionLevel::DontSaveSensitive => Ok(()),
            ProtectionLevel::EncryptSensitiveWithPassword => {
                let message = match self.password {
                    None => "Package password not supplied; sensitive values redacted",
                    Some(_) => "Decryption of sensitive values is not implemented; sensitive values redacted",
                };
                ctx.warn(DiagnosticCode::DecryptionUnavailable, message, None);
                Ok(())
            }
            ProtectionLevel::EncryptSensitiveWithUserKey => {
                ctx.warn(
                    DiagnosticCode::DecryptionUnavailable,
                    "User key material is not available; sensitive values redacted",
                    None,
                );
                Ok(())
            }
            ProtectionLevel::EncryptAllWithPassword => Err(EncryptionError {
                level: self.level,
                reason: match self.password {
                    None => "package password required".to_string(),
                    Some(_) => "full package decryption is not implemented".to_string(),
                },
            }),
            ProtectionLevel::EncryptAllWithUserKey => Err(EncryptionError {
                level: self.level,
                reason: "full package decryption is not implemented".to_string(),
            }),
        }
    }

    /// Whether a property must be redacted under this handler
    pub fn is_sensitive(&self, key: &str) -> bool {
        is_sensitive_key(key) || self.extra_keys.iter().any(|k| k.eq_ignore_ascii_case(key))
    }

    /// Redact sensitive values in place, returning how many were replaced
    pub fn redact(&self, owner: &str, properties: &mut PropertyMap, ctx: &mut ParseContext<'_>) -> usize {
        let mut count = 0;
        for (key, value) in properties.values_mut() {
            if self.is_sensitive(key) && value.as_str() != REDACTED {
                *value = REDACTED.to_string();
                ctx.note_redacted(owner, key);
                tracing::debug!(owner, property = key, "Redacted sensitive property");
                count += 1;
            }
        }
        count
    }

    /// Expression text for a property, redacted when the property is sensitive
    pub fn redact_expression(&self, property: &str, text: &str) -> String {
        if self.is_sensitive(property) {
            REDACTED.to_string()
        } else {
            text.to_string()
        }
    }
}

/// Security review of a parsed package
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComplianceAudit {
    /// Connections holding at least one redacted value
    pub redacted_connections: Vec<String>,

    /// Executable ids whose SQL looks like it embeds credentials
    pub credential_suspects: Vec<String>,

    pub notices: Vec<String>,
}

impl ComplianceAudit {
    pub fn run(package: &IrPackage) -> Self {
        let mut audit = Self::default();

        for connection in &package.connections {
            if connection.properties.iter().any(|(_, v)| v.contains(REDACTED)) {
                audit.redacted_connections.push(connection.id.clone());
            }
        }

        if !audit.redacted_connections.is_empty() {
            audit.notices.push(format!(
                "{} connection(s) have redacted sensitive data; configure them in the target environment",
                audit.redacted_connections.len()
            ));
        }

        for executable in &package.executables {
            let Some(sql) = executable.sql.as_deref() else {
                continue;
            };
            let lowered = sql.to_lowercase();
            if CREDENTIAL_MARKERS.iter().any(|m| lowered.contains(m)) {
                audit.credential_suspects.push(executable.id.clone());
            }
        }

        if package.metadata.protection_level == ProtectionLevel::DontSaveSensitive {
            audit.notices.push(
                "Package uses DontSaveSensitive; every connection must be configured in the target environment"
                    .to_string(),
            );
        }

        audit
    }

    pub fn is_clean(&self) -> bool {
        self.redacted_connections.is_empty() && self.credential_suspects.is_empty()
    }
}
