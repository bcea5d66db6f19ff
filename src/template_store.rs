//! Template lifecycle service
//!
//! Owns creation, mutation and versioning of [`ContractTemplate`] records.
//! Published versions referenced by a contract are immutable; the only way
//! to edit one is `create_new_version`, which deprecates the current version
//! and starts a fresh one with its own audit trail.

use std::sync::Arc;

use tracing::info;

use super::contract::TimeStamp;
use super::error::SigningError;
use super::store::{Page, Store};
use super::template::{
    AuditStamp, ContractTemplate, LegalMetadata, SigningRequirements, TemplateStats,
    TemplateStatus, Variable,
};
use super::utils::{bump_major_version, new_uuid_to_bech32};

/// Input for `create`. Identity, version and audit fields are minted by the
/// store and are not part of the caller surface.
#[derive(Debug, Clone)]
pub struct TemplateDraft {
    pub name: String,
    pub body: String,
    pub rendered_markup: Option<String>,
    pub variables: Vec<Variable>,
    pub plan_tags: Vec<String>,
    pub region_tags: Vec<String>,
    pub signing: SigningRequirements,
    pub legal: LegalMetadata,
}

/// Patch for `update`/`create_new_version`. Immutable fields (`template_id`,
/// `version`, creation audit) are deliberately not representable here.
#[derive(Debug, Clone, Default)]
pub struct TemplatePatch {
    pub name: Option<String>,
    pub body: Option<String>,
    pub rendered_markup: Option<Option<String>>,
    pub variables: Option<Vec<Variable>>,
    pub plan_tags: Option<Vec<String>>,
    pub region_tags: Option<Vec<String>>,
    pub signing: Option<SigningRequirements>,
    pub legal: Option<LegalMetadata>,
}

impl TemplatePatch {
    fn apply(self, template: &mut ContractTemplate) {
        if let Some(name) = self.name {
            template.name = name;
        }
        if let Some(body) = self.body {
            template.body = body;
        }
        if let Some(markup) = self.rendered_markup {
            template.rendered_markup = markup;
        }
        if let Some(variables) = self.variables {
            template.variables = variables;
        }
        if let Some(tags) = self.plan_tags {
            template.plan_tags = tags;
        }
        if let Some(tags) = self.region_tags {
            template.region_tags = tags;
        }
        if let Some(signing) = self.signing {
            template.signing = signing;
        }
        if let Some(legal) = self.legal {
            template.legal = legal;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// Archive the record, keeping it resolvable for existing contracts.
    Soft,
    /// Remove the record entirely. Refused while any contract references it.
    Hard,
}

pub struct TemplateStore {
    store: Arc<Store>,
}

impl TemplateStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    fn load(&self, template_id: &str) -> anyhow::Result<ContractTemplate> {
        self.store
            .get_template(template_id)?
            .ok_or_else(|| {
                SigningError::NotFound {
                    resource: "template",
                    id: template_id.to_string(),
                }
                .into()
            })
    }

    /// New template at version 1.0.0, status draft.
    pub fn create(&self, draft: TemplateDraft, author_id: &str) -> anyhow::Result<ContractTemplate> {
        let now = TimeStamp::new();
        let template = ContractTemplate {
            template_id: new_uuid_to_bech32("template_")?,
            name: draft.name,
            version: "1.0.0".into(),
            previous_version_id: None,
            status: TemplateStatus::Draft,
            body: draft.body,
            rendered_markup: draft.rendered_markup,
            variables: draft.variables,
            plan_tags: draft.plan_tags,
            region_tags: draft.region_tags,
            signing: draft.signing,
            legal: draft.legal,
            stats: TemplateStats::default(),
            audit: AuditStamp {
                created_by: author_id.to_string(),
                created_at: now.clone(),
                updated_at: now,
                approved_by: None,
                approved_at: None,
            },
        };

        self.store.put_template(&template)?;
        info!(template_id = %template.template_id, "template created");
        Ok(template)
    }

    /// In-place edit. Refused once any contract references this version;
    /// edits then have to go through `create_new_version`.
    pub fn update(&self, template_id: &str, patch: TemplatePatch) -> anyhow::Result<ContractTemplate> {
        let mut template = self.load(template_id)?;

        if self.store.any_contract_references(template_id)? {
            return Err(SigningError::PreconditionFailed {
                reason: format!(
                    "template {template_id} is referenced by contracts; create a new version instead"
                ),
            }
            .into());
        }

        patch.apply(&mut template);
        template.audit.updated_at = TimeStamp::new();
        self.store.put_template(&template)?;
        Ok(template)
    }

    /// Deprecate the current version and mint its successor: fresh id,
    /// bumped major version, `previous_version_id` back-reference, statistics
    /// zeroed, audit reset to the new author.
    pub fn create_new_version(
        &self,
        template_id: &str,
        patch: TemplatePatch,
        author_id: &str,
    ) -> anyhow::Result<ContractTemplate> {
        let mut current = self.load(template_id)?;
        let now = TimeStamp::new();

        let mut next = current.clone();
        next.template_id = new_uuid_to_bech32("template_")?;
        next.version = bump_major_version(&current.version);
        next.previous_version_id = Some(current.template_id.clone());
        next.status = TemplateStatus::Draft;
        next.stats = TemplateStats::default();
        next.audit = AuditStamp {
            created_by: author_id.to_string(),
            created_at: now.clone(),
            updated_at: now,
            approved_by: None,
            approved_at: None,
        };
        patch.apply(&mut next);

        if current.status.can_transition_to(TemplateStatus::Deprecated) {
            current.status = TemplateStatus::Deprecated;
        }

        self.store.put_template(&current)?;
        self.store.put_template(&next)?;
        info!(
            from = %current.template_id,
            to = %next.template_id,
            version = %next.version,
            "template version created"
        );
        Ok(next)
    }

    pub fn approve(&self, template_id: &str, approver_id: &str) -> anyhow::Result<ContractTemplate> {
        let mut template = self.load(template_id)?;

        if !template.status.can_transition_to(TemplateStatus::Approved) {
            return Err(SigningError::PreconditionFailed {
                reason: format!(
                    "template {template_id} cannot be approved from status {}",
                    template.status.as_str()
                ),
            }
            .into());
        }

        template.status = TemplateStatus::Approved;
        template.audit.approved_by = Some(approver_id.to_string());
        template.audit.approved_at = Some(TimeStamp::new());
        template.audit.updated_at = TimeStamp::new();
        self.store.put_template(&template)?;
        Ok(template)
    }

    /// Activate for contract initiation. Requires a prior approval stamp.
    pub fn publish(&self, template_id: &str) -> anyhow::Result<ContractTemplate> {
        let mut template = self.load(template_id)?;

        if template.audit.approved_at.is_none() {
            return Err(SigningError::PreconditionFailed {
                reason: format!("template {template_id} must be approved before publishing"),
            }
            .into());
        }
        if !template.status.can_transition_to(TemplateStatus::Active) {
            return Err(SigningError::PreconditionFailed {
                reason: format!(
                    "template {template_id} cannot be published from status {}",
                    template.status.as_str()
                ),
            }
            .into());
        }

        template.status = TemplateStatus::Active;
        template.audit.updated_at = TimeStamp::new();
        self.store.put_template(&template)?;
        info!(template_id = %template.template_id, "template published");
        Ok(template)
    }

    /// Deep copy under a fresh id, inactive by default.
    pub fn clone_template(
        &self,
        template_id: &str,
        new_name: &str,
        author_id: &str,
    ) -> anyhow::Result<ContractTemplate> {
        let source = self.load(template_id)?;
        let now = TimeStamp::new();

        let mut copy = source.clone();
        copy.template_id = new_uuid_to_bech32("template_")?;
        copy.name = new_name.to_string();
        copy.version = "1.0.0".into();
        copy.previous_version_id = None;
        copy.status = TemplateStatus::Draft;
        copy.stats = TemplateStats::default();
        copy.audit = AuditStamp {
            created_by: author_id.to_string(),
            created_at: now.clone(),
            updated_at: now,
            approved_by: None,
            approved_at: None,
        };

        self.store.put_template(&copy)?;
        Ok(copy)
    }

    pub fn delete(&self, template_id: &str, mode: DeleteMode) -> anyhow::Result<()> {
        let mut template = self.load(template_id)?;

        match mode {
            DeleteMode::Soft => {
                template.status = TemplateStatus::Archived;
                template.audit.updated_at = TimeStamp::new();
                self.store.put_template(&template)?;
            }
            DeleteMode::Hard => {
                if self.store.any_contract_references(template_id)? {
                    return Err(SigningError::InUse {
                        template_id: template_id.to_string(),
                    }
                    .into());
                }
                self.store.remove_template(template_id)?;
                info!(template_id, "template hard-deleted");
            }
        }
        Ok(())
    }

    pub fn get(&self, template_id: &str) -> anyhow::Result<ContractTemplate> {
        self.load(template_id)
    }

    pub fn list(
        &self,
        status: Option<TemplateStatus>,
        page: Page,
    ) -> anyhow::Result<Vec<ContractTemplate>> {
        self.store
            .list_templates(|t| status.is_none_or(|s| t.status == s), page)
    }
}
