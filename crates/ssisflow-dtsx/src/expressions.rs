//! Expression harvesting and reference extraction
//!
//! Expressions are never evaluated. They are collected with their scope,
//! scanned for variable and parameter references, and given a rough
//! complexity grade used to flag items for manual review.

use regex::{Captures, Regex};
use std::collections::BTreeSet;
use std::sync::LazyLock;

use ssisflow_core::{DiagnosticCode, Expression};

use crate::context::ParseContext;
use crate::document::{ns, Element};
use crate::metadata::owning_scope;
use crate::security::SecurityHandler;

/// `@[User::Name]` or `@[System::Name]`
static VARIABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@\[(User|System)::([^\]]+?)\]").unwrap());

/// `@[$Package::Name]` or `@[$Project::Name]`
static PARAMETER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@\[\$(Package|Project)::([^\]]+?)\]").unwrap());

/// A complete bracketed reference of any kind
static ANY_REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@\[[^\]]+\]").unwrap());

const FUNCTIONS: &[&str] = &[
    "DATEADD", "DATEDIFF", "DATEPART", "GETDATE", "YEAR", "MONTH", "DAY", "LEN", "SUBSTRING",
    "UPPER", "LOWER", "LTRIM", "RTRIM", "REPLACE", "ISNULL", "FINDSTRING", "TOKEN", "TOKENCOUNT",
];

const OPERATORS: &[&str] = &["&&", "||", "==", "!=", ">=", "<="];

/// Rough grade used only for review flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExpressionComplexity {
    Simple,
    Medium,
    High,
}

/// Target syntax for template rewriting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateStyle {
    /// `{{ dag_run.conf.get('name', '') }}` / `{{ var.value.name }}`
    Airflow,
    /// `{{ var('name') }}`
    Dbt,
}

/// Sorted, de-duplicated `Scope::Name` variable references
pub fn variable_refs(text: &str) -> Vec<String> {
    let refs: BTreeSet<String> = VARIABLE_RE
        .captures_iter(text)
        .map(|c| format!("{}::{}", &c[1], &c[2]))
        .collect();
    refs.into_iter().collect()
}

/// Sorted, de-duplicated `$Scope::Name` parameter references
pub fn parameter_refs(text: &str) -> Vec<String> {
    let refs: BTreeSet<String> = PARAMETER_RE
        .captures_iter(text)
        .map(|c| format!("${}::{}", &c[1], &c[2]))
        .collect();
    refs.into_iter().collect()
}

/// Whether text contains any bracketed reference
pub fn has_references(text: &str) -> bool {
    ANY_REFERENCE_RE.is_match(text)
}

pub fn complexity(text: &str) -> ExpressionComplexity {
    let variables = VARIABLE_RE.find_iter(text).count();
    let parameters = PARAMETER_RE.find_iter(text).count();

    if variables > 3 || parameters > 3 {
        return ExpressionComplexity::High;
    }

    let upper = text.to_uppercase();
    let has_function = FUNCTIONS.iter().any(|f| upper.contains(f));
    let has_operator = OPERATORS.iter().any(|op| text.contains(op));

    if has_function || has_operator {
        ExpressionComplexity::Medium
    } else {
        ExpressionComplexity::Simple
    }
}

/// Basic syntax checks; an empty list means nothing obviously wrong
pub fn validate_syntax(text: &str) -> Vec<String> {
    let mut issues = Vec::new();

    if text.matches('[').count() != text.matches(']').count() {
        issues.push("Unmatched brackets".to_string());
    }

    if text.contains("@[") && !ANY_REFERENCE_RE.is_match(text) {
        issues.push("Incomplete variable reference".to_string());
    }

    if text.matches('"').count() % 2 != 0 {
        issues.push("Unmatched quotes".to_string());
    }

    issues
}

/// Rewrite references into a template language, leaving the rest untouched
pub fn rewrite(text: &str, style: TemplateStyle) -> String {
    let with_variables = VARIABLE_RE.replace_all(text, |c: &Captures<'_>| {
        let (scope, name) = (&c[1], &c[2]);
        match (style, scope) {
            (TemplateStyle::Airflow, "User") => format!("{{{{ dag_run.conf.get('{}', '') }}}}", name),
            (TemplateStyle::Airflow, _) => format!("{{{{ var.value.{} }}}}", name.to_lowercase()),
            (TemplateStyle::Dbt, _) => format!("{{{{ var('{}') }}}}", name.to_lowercase()),
        }
    });

    PARAMETER_RE
        .replace_all(&with_variables, |c: &Captures<'_>| {
            let name = &c[2];
            match style {
                TemplateStyle::Airflow => format!("{{{{ params.{} }}}}", name),
                TemplateStyle::Dbt => format!("{{{{ var('{}') }}}}", name.to_lowercase()),
            }
        })
        .into_owned()
}

/// Collects property expressions and expression-bearing task attributes
pub struct ExpressionAnalyzer<'a> {
    security: &'a SecurityHandler<'a>,
}

impl<'a> ExpressionAnalyzer<'a> {
    pub fn new(security: &'a SecurityHandler<'a>) -> Self {
        Self { security }
    }

    /// Harvest every expression in the document
    pub fn harvest(&self, root: Element<'_>, ctx: &mut ParseContext<'_>) -> Vec<Expression> {
        let mut expressions = Vec::new();

        for element in root.descendants_named(ns::DTS, "PropertyExpression") {
            let (Some(property), Some(text)) = (element.attr_text("Name"), element.text()) else {
                continue;
            };
            let scope = owning_scope(element);
            expressions.push(self.build(scope, property, text, ctx));
        }

        for task in root.descendants_named(ns::SQL_TASK, "SqlTaskData") {
            // Omitted source type means DirectInput
            let source_type = task.attr_text("SqlStatementSourceType").unwrap_or("DirectInput");
            if !matches!(source_type, "DirectInput" | "Variable") {
                continue;
            }
            let Some(sql) = task.attr_text("SqlStatementSource") else {
                continue;
            };
            if !has_references(sql) {
                continue;
            }
            let scope = owning_scope(task);
            expressions.push(self.build(scope, "SqlStatementSource", sql, ctx));
        }

        tracing::info!(count = expressions.len(), "Harvested expressions");
        expressions
    }

    fn build(&self, scope: String, property: &str, text: &str, ctx: &mut ParseContext<'_>) -> Expression {
        let text = self.security.redact_expression(property, text.trim());

        for issue in validate_syntax(&text) {
            ctx.warn(
                DiagnosticCode::ExpressionSyntax,
                format!("{} in expression for '{}' on '{}'", issue, property, scope),
                Some(scope.as_str()),
            );
        }

        if complexity(&text) == ExpressionComplexity::High {
            ctx.info(
                DiagnosticCode::ExpressionComplex,
                format!("Expression for '{}' on '{}' is complex; review manually", property, scope),
                Some(scope.as_str()),
            );
        }

        Expression {
            variable_refs: variable_refs(&text),
            parameter_refs: parameter_refs(&text),
            scope,
            property: property.to_string(),
            text,
        }
    }
}
