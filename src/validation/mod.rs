//! Manifest validation.
//!
//! Runs before a manifest is indexed. Errors block planning; warnings are
//! reported and otherwise ignored.

mod rules;

use std::fmt;

use serde::Serialize;

use crate::model::Manifest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationIssueLevel {
    Warning,
    Error,
}

impl fmt::Display for ValidationIssueLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssueLevel::Warning => f.write_str("WARNING"),
            ValidationIssueLevel::Error => f.write_str("ERROR"),
        }
    }
}

/// The manifest element an issue is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "name", rename_all = "snake_case")]
pub enum ValidationElement {
    Metric(String),
    SemanticModel(String),
    ProjectConfiguration,
}

impl fmt::Display for ValidationElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationElement::Metric(name) => write!(f, "metric '{}'", name),
            ValidationElement::SemanticModel(name) => write!(f, "semantic model '{}'", name),
            ValidationElement::ProjectConfiguration => f.write_str("project configuration"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationContext {
    pub file_path: Option<String>,
    pub element: ValidationElement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub level: ValidationIssueLevel,
    pub context: ValidationContext,
    pub message: String,
}

impl ValidationIssue {
    pub fn error(element: ValidationElement, message: impl Into<String>) -> Self {
        Self::new(ValidationIssueLevel::Error, element, message)
    }

    pub fn warning(element: ValidationElement, message: impl Into<String>) -> Self {
        Self::new(ValidationIssueLevel::Warning, element, message)
    }

    fn new(level: ValidationIssueLevel, element: ValidationElement, message: impl Into<String>) -> Self {
        Self {
            level,
            context: ValidationContext {
                file_path: None,
                element,
            },
            message: message.into(),
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.level == ValidationIssueLevel::Error
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.level)?;
        if let Some(path) = &self.context.file_path {
            write!(f, "{}: ", path)?;
        }
        write!(f, "{}: {}", self.context.element, self.message)
    }
}

/// Every issue found in one manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModelValidationResults {
    issues: Vec<ValidationIssue>,
}

impl ModelValidationResults {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.level == ValidationIssueLevel::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.level == ValidationIssueLevel::Warning)
    }

    pub fn has_blocking_issues(&self) -> bool {
        self.issues.iter().any(ValidationIssue::is_blocking)
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Attribute every issue to the file the manifest came from.
    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        for issue in &mut self.issues {
            issue.context.file_path = Some(path.clone());
        }
        self
    }

    pub fn merge(mut self, other: ModelValidationResults) -> Self {
        self.issues.extend(other.issues);
        self
    }
}

impl fmt::Display for ModelValidationResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for issue in &self.issues {
            writeln!(f, "{}", issue)?;
        }
        Ok(())
    }
}

/// Validate a manifest.
pub fn validate_manifest(manifest: &Manifest) -> ModelValidationResults {
    let mut issues = Vec::new();

    rules::validate_unique_names(manifest, &mut issues);
    rules::validate_semantic_models(manifest, &mut issues);
    rules::validate_metric_params(manifest, &mut issues);
    rules::validate_metric_references(manifest, &mut issues);
    rules::validate_metric_cycles(manifest, &mut issues);
    rules::validate_time_spines(manifest, &mut issues);

    ModelValidationResults::new(issues)
}
