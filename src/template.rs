//! Versioned contract templates: content, placeholders and signing rules
//!
//! A template version is immutable once a contract references it; edits go
//! through `TemplateStore::create_new_version`. Placeholder validation
//! collects every violation before rejecting, and rendering leaves unknown
//! `{{token}}` markers literal rather than failing.

use std::collections::BTreeMap;

use super::contract::{SignatureKind, TimeStamp};
use super::error::{FieldViolation, SigningError};
use chrono::{NaiveDate, Utc};

#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode)]
pub enum TemplateStatus {
    #[n(0)]
    Draft,
    #[n(1)]
    Review,
    #[n(2)]
    Approved,
    #[n(3)]
    Active,
    #[n(4)]
    Deprecated,
    #[n(5)]
    Archived,
}

impl TemplateStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Draft => 0,
            Self::Review => 1,
            Self::Approved => 2,
            Self::Active => 3,
            Self::Deprecated => 4,
            Self::Archived => 5,
        }
    }

    /// Lifecycle is monotonic forward, except draft and review may swap.
    pub fn can_transition_to(self, next: TemplateStatus) -> bool {
        if self == next {
            return false;
        }
        if matches!(
            (self, next),
            (Self::Draft, Self::Review) | (Self::Review, Self::Draft)
        ) {
            return true;
        }
        next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Review => "review",
            Self::Approved => "approved",
            Self::Active => "active",
            Self::Deprecated => "deprecated",
            Self::Archived => "archived",
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode)]
pub enum VariableKind {
    #[n(0)]
    Text,
    #[n(1)]
    Number,
    #[n(2)]
    Email,
    #[n(3)]
    Date,
    #[n(4)]
    Select,
}

/// Typed placeholder descriptor. `pattern` is a required substring, length
/// bounds apply to text-ish kinds, value bounds to numbers.
#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct Variable {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub kind: VariableKind,
    #[n(2)]
    pub required: bool,
    #[n(3)]
    pub default: Option<String>,
    #[n(4)]
    pub options: Vec<String>, // for Select
    #[n(5)]
    pub pattern: Option<String>,
    #[n(6)]
    pub min_length: Option<u32>,
    #[n(7)]
    pub max_length: Option<u32>,
    #[n(8)]
    pub min_value: Option<i64>,
    #[n(9)]
    pub max_value: Option<i64>,
}

impl Variable {
    pub fn new(name: &str, kind: VariableKind, required: bool) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required,
            default: None,
            options: vec![],
            pattern: None,
            min_length: None,
            max_length: None,
            min_value: None,
            max_value: None,
        }
    }

    fn check(&self, value: &str, violations: &mut Vec<FieldViolation>) {
        let fail = |violations: &mut Vec<FieldViolation>, message: String| {
            violations.push(FieldViolation {
                field: self.name.clone(),
                message,
            });
        };

        match self.kind {
            VariableKind::Number => match value.trim().parse::<f64>() {
                Ok(n) => {
                    if let Some(min) = self.min_value {
                        if n < min as f64 {
                            fail(violations, format!("value {n} below minimum {min}"));
                        }
                    }
                    if let Some(max) = self.max_value {
                        if n > max as f64 {
                            fail(violations, format!("value {n} above maximum {max}"));
                        }
                    }
                }
                Err(_) => fail(violations, format!("'{value}' is not a number")),
            },
            VariableKind::Email => {
                if !is_plausible_email(value) {
                    fail(violations, format!("'{value}' is not a valid email address"));
                }
            }
            VariableKind::Date => {
                if parse_date(value).is_none() {
                    fail(
                        violations,
                        format!("'{value}' is not a date (expected YYYY-MM-DD or RFC 3339)"),
                    );
                }
            }
            VariableKind::Select => {
                if !self.options.iter().any(|o| o == value) {
                    fail(
                        violations,
                        format!("'{}' is not one of [{}]", value, self.options.join(", ")),
                    );
                }
            }
            VariableKind::Text => {}
        }

        let len = value.chars().count() as u32;
        if let Some(min) = self.min_length {
            if len < min {
                fail(violations, format!("length {len} below minimum {min}"));
            }
        }
        if let Some(max) = self.max_length {
            if len > max {
                fail(violations, format!("length {len} above maximum {max}"));
            }
        }
        if let Some(pattern) = &self.pattern {
            if !value.contains(pattern.as_str()) {
                fail(violations, format!("value does not match pattern '{pattern}'"));
            }
        }
    }
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct ConsentRequirement {
    #[n(0)]
    pub consent_id: String,
    #[n(1)]
    pub label: String,
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct SigningRequirements {
    #[n(0)]
    pub required_consents: Vec<ConsentRequirement>,
    #[n(1)]
    pub allowed_signature_kinds: Vec<SignatureKind>,
    #[n(2)]
    pub require_identity_verification: bool,
    #[n(3)]
    pub expiration_days: u32,
    #[n(4)]
    pub max_views: u32,
}

impl Default for SigningRequirements {
    fn default() -> Self {
        Self {
            required_consents: vec![],
            allowed_signature_kinds: vec![
                SignatureKind::Typed,
                SignatureKind::Drawn,
                SignatureKind::Uploaded,
            ],
            require_identity_verification: false,
            expiration_days: 30,
            max_views: 100,
        }
    }
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct LegalMetadata {
    #[n(0)]
    pub jurisdiction: String,
    #[n(1)]
    pub governing_law: String,
}

/// Reset to zero on every new version.
#[derive(Debug, Clone, Default, minicbor::Encode, minicbor::Decode)]
pub struct TemplateStats {
    #[n(0)]
    pub contracts_created: u64,
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct AuditStamp {
    #[n(0)]
    pub created_by: String,
    #[n(1)]
    pub created_at: TimeStamp<Utc>,
    #[n(2)]
    pub updated_at: TimeStamp<Utc>,
    #[n(3)]
    pub approved_by: Option<String>,
    #[n(4)]
    pub approved_at: Option<TimeStamp<Utc>>,
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct ContractTemplate {
    #[n(0)]
    pub template_id: String, // bech32 uuid7
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub version: String, // "major.minor.patch"
    #[n(3)]
    pub previous_version_id: Option<String>,
    #[n(4)]
    pub status: TemplateStatus,
    #[n(5)]
    pub body: String, // text with {{name}} placeholders
    #[n(6)]
    pub rendered_markup: Option<String>,
    #[n(7)]
    pub variables: Vec<Variable>,
    #[n(8)]
    pub plan_tags: Vec<String>,
    #[n(9)]
    pub region_tags: Vec<String>,
    #[n(10)]
    pub signing: SigningRequirements,
    #[n(11)]
    pub legal: LegalMetadata,
    #[n(12)]
    pub stats: TemplateStats,
    #[n(13)]
    pub audit: AuditStamp,
}

impl ContractTemplate {
    /// Merge provided values with variable defaults. Provided values win.
    pub fn resolved_values(
        &self,
        provided: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        let mut resolved = provided.clone();
        for variable in &self.variables {
            if !resolved.contains_key(&variable.name) {
                if let Some(default) = &variable.default {
                    resolved.insert(variable.name.clone(), default.clone());
                }
            }
        }
        resolved
    }

    /// Validate resolved placeholder values against every variable
    /// descriptor. Reports the full list of violations, not just the first.
    pub fn validate_placeholders(
        &self,
        values: &BTreeMap<String, String>,
    ) -> Result<(), SigningError> {
        let mut violations = Vec::new();

        for variable in &self.variables {
            match values.get(&variable.name) {
                Some(value) => variable.check(value, &mut violations),
                None if variable.required => violations.push(FieldViolation {
                    field: variable.name.clone(),
                    message: "required placeholder is missing".into(),
                }),
                None => {}
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(SigningError::ValidationFailed { violations })
        }
    }

    /// Substitute `{{name}}` tokens literally. A token with no matching value
    /// stays byte-for-byte intact in the output.
    pub fn render(&self, values: &BTreeMap<String, String>) -> String {
        let mut out = self.body.clone();
        for (name, value) in values {
            out = out.replace(&format!("{{{{{name}}}}}"), value);
        }
        out
    }
}

fn is_plausible_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !value.contains(char::is_whitespace)
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    chrono::DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.date_naive())
}
