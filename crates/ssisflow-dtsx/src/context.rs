//! Per-parse state
//!
//! A [`ParseContext`] lives for exactly one package parse. It carries the
//! configuration and collects diagnostics; nothing in it survives into the
//! next parse.

use ssisflow_core::{Diagnostic, DiagnosticCode, Location, ParserConfig, Severity};

pub struct ParseContext<'c> {
    config: &'c ParserConfig,
    source: String,
    diagnostics: Vec<Diagnostic>,
    unsupported_executables: Vec<String>,
    redacted: Vec<String>,
}

impl<'c> ParseContext<'c> {
    pub fn new(config: &'c ParserConfig, source: impl Into<String>) -> Self {
        Self {
            config,
            source: source.into(),
            diagnostics: Vec::new(),
            unsupported_executables: Vec::new(),
            redacted: Vec::new(),
        }
    }

    pub fn config(&self) -> &'c ParserConfig {
        self.config
    }

    /// File or archive member being parsed
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Record a finding, applying configured severity overrides
    pub fn report(
        &mut self,
        code: DiagnosticCode,
        default: Severity,
        message: impl Into<String>,
        element: Option<&str>,
    ) {
        let severity = self.config.severity.get_severity(code, default);
        let message = message.into();

        match severity {
            Severity::Info => tracing::info!(code = %code, source = %self.source, "{}", message),
            Severity::Warn => tracing::warn!(code = %code, source = %self.source, "{}", message),
            Severity::Error => tracing::error!(code = %code, source = %self.source, "{}", message),
        }

        let location = match element {
            Some(element) => Location::with_element(&self.source, element),
            None => Location::new(&self.source),
        };

        self.diagnostics
            .push(Diagnostic::new(code, severity, message).with_location(location));
    }

    pub fn info(&mut self, code: DiagnosticCode, message: impl Into<String>, element: Option<&str>) {
        self.report(code, Severity::Info, message, element);
    }

    pub fn warn(&mut self, code: DiagnosticCode, message: impl Into<String>, element: Option<&str>) {
        self.report(code, Severity::Warn, message, element);
    }

    /// Attach related ids to the most recent diagnostic
    pub fn relate_last(&mut self, related: Vec<String>) {
        if let Some(last) = self.diagnostics.last_mut() {
            last.related = related;
        }
    }

    pub fn note_unsupported_executable(&mut self, raw_type: &str) {
        self.unsupported_executables.push(raw_type.to_string());
    }

    /// Record a redacted `owner.property` path
    pub fn note_redacted(&mut self, owner: &str, property: &str) {
        self.redacted.push(format!("{}.{}", owner, property));
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn has_code(&self, code: DiagnosticCode) -> bool {
        self.diagnostics.iter().any(|d| d.code == code)
    }

    /// Consume the context into `(diagnostics, unsupported types, redacted paths)`
    pub fn finish(self) -> (Vec<Diagnostic>, Vec<String>, Vec<String>) {
        (self.diagnostics, self.unsupported_executables, self.redacted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_to_reported_findings() {
        let mut config = ParserConfig::default();
        config
            .severity
            .set_override(DiagnosticCode::IsolatedExecutable, Severity::Error);

        let mut ctx = ParseContext::new(&config, "orders.dtsx");
        ctx.info(DiagnosticCode::IsolatedExecutable, "Isolated: Package\\A", Some("Package\\A"));
        ctx.warn(DiagnosticCode::PrecedenceCycle, "Cycle", None);

        let diagnostics = ctx.diagnostics();
        assert_eq!(diagnostics[0].severity, Severity::Error);
        assert_eq!(diagnostics[1].severity, Severity::Warn);
        assert_eq!(
            diagnostics[0].location.as_ref().and_then(|l| l.element.as_deref()),
            Some("Package\\A")
        );
    }

    #[test]
    fn finish_returns_collected_state() {
        let config = ParserConfig::default();
        let mut ctx = ParseContext::new(&config, "orders.dtsx");
        ctx.note_unsupported_executable("Microsoft.XMLTask");
        ctx.note_redacted("Package.ConnectionManagers[Src]", "Password");

        let (diagnostics, unsupported, redacted) = ctx.finish();
        assert!(diagnostics.is_empty());
        assert_eq!(unsupported, vec!["Microsoft.XMLTask"]);
        assert_eq!(redacted, vec!["Package.ConnectionManagers[Src].Password"]);
    }
}
