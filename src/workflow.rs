//! Signing workflow engine
//!
//! Owns the `SignedContract` state machine. Contract-level status and
//! per-signer sub-status are coupled but independent axes; every mutation
//! runs under the store's compare-and-swap discipline so concurrent signers
//! observe a consistent snapshot, and the all-signers-complete conjunction is
//! re-evaluated after every single signature. Expiry is enforced lazily by a
//! guard at the top of every mutating operation, not by a background sweep.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use super::contract::{
    ContractDates, ContractStatus, HashAlgorithm, SecurityInfo, SignatureKind, SignatureRecord,
    SignedContract, Signer, SignerStatus, TimeStamp, ConsentRecord, ProviderBinding,
};
use super::error::{FieldViolation, SigningError};
use super::evidence::{
    AccessAction, EvidencePayload, GeoLocator, NoGeoLocator, RequestContext, SignerEvidence,
    resolve_geolocation,
};
use super::integrity::{self, Certificate};
use super::notify::{NotificationKind, Notifier, NullNotifier};
use super::provider::{
    NATIVE_PROVIDER, ProviderRegistry, ProviderStatusSnapshot, SignatureProvider,
};
use super::store::Store;
use super::template::{ContractTemplate, SigningRequirements, TemplateStatus};
use super::utils::new_uuid_to_bech32;

#[derive(Debug, Clone, Copy)]
pub struct SigningConfig {
    pub hash_algorithm: HashAlgorithm,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            hash_algorithm: HashAlgorithm::Sha256,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignerSpec {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct InitiateRequest {
    pub template_id: String,
    pub subscriber_id: String,
    pub signers: Vec<SignerSpec>,
    pub placeholder_values: BTreeMap<String, String>,
    pub expiration_days: Option<u32>,
}

/// Opaque per-signer signing link token, rotated by `resend`.
#[derive(Debug, Clone)]
pub struct SigningReference {
    pub signer_id: String,
    pub reference: String,
}

#[derive(Debug)]
pub struct InitiateResponse {
    pub contract: SignedContract,
    pub signing_references: Vec<SigningReference>,
}

#[derive(Debug)]
pub struct SessionStart {
    pub session_id: String,
    pub content: String,
    pub requirements: SigningRequirements,
    pub signer: Signer,
    pub contract_status: ContractStatus,
}

#[derive(Debug, Clone)]
pub struct ConsentGrant {
    pub consent_id: String,
    pub label: String,
    pub accepted: bool,
}

#[derive(Debug, Clone)]
pub struct SignatureSubmission {
    pub kind: SignatureKind,
    pub payload: Vec<u8>,
    pub consents: Vec<ConsentGrant>,
    pub public_key_id: Option<String>,
}

#[derive(Debug)]
pub struct SignatureOutcome {
    pub contract: SignedContract,
    pub signer_id: String,
    /// Present exactly when this signature completed the contract.
    pub certificate: Option<Certificate>,
}

#[derive(Debug, Clone)]
pub enum SendRoute {
    Native,
    External {
        provider: String,
        external_id: String,
    },
}

#[derive(Debug)]
pub struct SendOutcome {
    pub contract: SignedContract,
    pub route: SendRoute,
}

pub struct SigningService {
    store: Arc<Store>,
    config: SigningConfig,
    geo: Box<dyn GeoLocator>,
    notifier: Box<dyn Notifier>,
    providers: ProviderRegistry,
}

impl SigningService {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            config: SigningConfig::default(),
            geo: Box::new(NoGeoLocator),
            notifier: Box::new(NullNotifier),
            providers: ProviderRegistry::new(),
        }
    }

    pub fn with_config(mut self, config: SigningConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_geo_locator(mut self, geo: Box<dyn GeoLocator>) -> Self {
        self.geo = geo;
        self
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn register_provider(&mut self, provider: Arc<dyn SignatureProvider>) {
        self.providers.register(provider);
    }

    // ---- reads ----

    pub fn get_contract(&self, contract_id: &str) -> anyhow::Result<SignedContract> {
        self.guard_expiry(contract_id)
    }

    pub fn certificate(&self, contract_id: &str) -> anyhow::Result<Certificate> {
        let contract = self.guard_expiry(contract_id)?;
        integrity::generate_certificate(&contract)
    }

    pub fn evidence_package(&self, contract_id: &str) -> anyhow::Result<integrity::EvidencePackage> {
        let contract = self.guard_expiry(contract_id)?;
        integrity::build_evidence_package(&contract)
    }

    pub fn verify(
        &self,
        contract_id: &str,
        supplied_hash: &str,
    ) -> anyhow::Result<integrity::VerificationResult> {
        let contract = self.load(contract_id)?;
        Ok(integrity::verify_integrity(&contract, supplied_hash))
    }

    pub fn audit_trail(&self, contract_id: &str) -> anyhow::Result<Vec<super::audit::AuditEvent>> {
        let contract = self.load(contract_id)?;
        Ok(super::audit::audit_trail(&contract))
    }

    // ---- contract lifecycle ----

    /// Render the template, validate placeholders (reporting every violated
    /// field), hash the rendered content and create the contract in `draft`
    /// with all signers `pending`.
    pub fn initiate_contract(&self, req: InitiateRequest) -> anyhow::Result<InitiateResponse> {
        let template = self.load_template(&req.template_id)?;

        if template.status != TemplateStatus::Active {
            return Err(SigningError::PreconditionFailed {
                reason: format!(
                    "template {} is not active (status {})",
                    template.template_id,
                    template.status.as_str()
                ),
            }
            .into());
        }

        if req.signers.is_empty() {
            return Err(SigningError::ValidationFailed {
                violations: vec![FieldViolation {
                    field: "signers".into(),
                    message: "at least one signer is required".into(),
                }],
            }
            .into());
        }

        let resolved = template.resolved_values(&req.placeholder_values);
        template.validate_placeholders(&resolved)?;
        let content = template.render(&resolved);
        let original_hash = integrity::hash_content(self.config.hash_algorithm, &content);

        let now = TimeStamp::new();
        let expiration_days = req
            .expiration_days
            .unwrap_or(template.signing.expiration_days);
        let expires = now.plus_days(i64::from(expiration_days));

        let mut signers = Vec::with_capacity(req.signers.len());
        let mut references = Vec::with_capacity(req.signers.len());
        for (order, spec) in req.signers.iter().enumerate() {
            let signer_id = new_uuid_to_bech32("signer_")?;
            let reference = new_uuid_to_bech32("sig_")?;
            references.push(SigningReference {
                signer_id: signer_id.clone(),
                reference: reference.clone(),
            });
            signers.push(Signer::new(
                signer_id,
                spec.name.clone(),
                spec.email.clone(),
                order as u32,
                reference,
            ));
        }

        let contract = SignedContract {
            contract_id: new_uuid_to_bech32("contract_")?,
            subscriber_id: req.subscriber_id,
            template_id: template.template_id.clone(),
            template_version: template.version.clone(),
            title: template.name.clone(),
            content,
            placeholder_values: resolved,
            status: ContractStatus::Draft,
            signers,
            dates: ContractDates {
                created: now.clone(),
                sent: None,
                first_opened: None,
                last_activity: None,
                completed: None,
                expires: Some(expires),
                voided: None,
            },
            security: SecurityInfo {
                original_hash,
                final_hash: None,
                hash_algorithm: self.config.hash_algorithm,
                current_views: 0,
                max_views: template.signing.max_views,
            },
            integration: None,
            jurisdiction: template.legal.jurisdiction.clone(),
            governing_law: template.legal.governing_law.clone(),
            void_reason: None,
            voided_by: None,
            revision: 0,
        };

        self.store.insert_contract(&contract)?;
        self.bump_template_stats(&template.template_id)?;
        info!(contract_id = %contract.contract_id, template_id = %template.template_id, "contract initiated");

        Ok(InitiateResponse {
            contract,
            signing_references: references,
        })
    }

    /// Native send: contract `draft -> sent`, every pending signer `-> sent`.
    pub fn send_contract(&self, contract_id: &str) -> anyhow::Result<SignedContract> {
        self.check_not_expired(contract_id)?;

        let contract = self.store.update_contract(contract_id, |contract| {
            let now = TimeStamp::new();
            Self::expiry_recheck(contract, &now)?;

            if contract.status != ContractStatus::Draft {
                return Err(SigningError::PreconditionFailed {
                    reason: format!(
                        "contract {} cannot be sent from status {}",
                        contract.contract_id,
                        contract.status.as_str()
                    ),
                });
            }

            contract.status = ContractStatus::Sent;
            contract.dates.sent = Some(now.clone());
            for signer in &mut contract.signers {
                if signer.status == SignerStatus::Pending {
                    signer.status = SignerStatus::Sent;
                    signer.sent_at = Some(now.clone());
                }
            }
            contract.touch(now);
            Ok(contract.clone())
        })?;

        for signer in &contract.signers {
            self.notify_signer(NotificationKind::SignatureRequested, &contract, signer);
        }
        Ok(contract)
    }

    /// Send through a registered provider. A provider failure is logged and
    /// degrades to a native send; the contract is never left half-sent.
    pub fn send_via_provider(
        &self,
        contract_id: &str,
        provider_name: &str,
    ) -> anyhow::Result<SendOutcome> {
        if provider_name == NATIVE_PROVIDER {
            let contract = self.send_contract(contract_id)?;
            return Ok(SendOutcome {
                contract,
                route: SendRoute::Native,
            });
        }

        let provider =
            self.providers
                .get(provider_name)
                .ok_or_else(|| SigningError::NotFound {
                    resource: "provider",
                    id: provider_name.to_string(),
                })?;

        let contract = self.check_not_expired(contract_id)?;

        match provider.send(&contract) {
            Ok(ack) => {
                let external_id = ack.external_id.clone();
                let contract = self.store.update_contract(contract_id, |contract| {
                    let now = TimeStamp::new();
                    Self::expiry_recheck(contract, &now)?;

                    if contract.status != ContractStatus::Draft {
                        return Err(SigningError::PreconditionFailed {
                            reason: format!(
                                "contract {} cannot be sent from status {}",
                                contract.contract_id,
                                contract.status.as_str()
                            ),
                        });
                    }

                    contract.integration = Some(ProviderBinding {
                        provider: provider_name.to_string(),
                        external_id: ack.external_id.clone(),
                        external_status: Some(ack.external_status.clone()),
                        synced_at: Some(now.clone()),
                    });
                    contract.status = ContractStatus::Sent;
                    contract.dates.sent = Some(now.clone());
                    for signer in &mut contract.signers {
                        if signer.status == SignerStatus::Pending {
                            signer.status = SignerStatus::Sent;
                            signer.sent_at = Some(now.clone());
                        }
                    }
                    contract.touch(now);
                    Ok(contract.clone())
                })?;

                info!(contract_id, provider = provider_name, external_id = %external_id, "sent via provider");
                Ok(SendOutcome {
                    contract,
                    route: SendRoute::External {
                        provider: provider_name.to_string(),
                        external_id,
                    },
                })
            }
            Err(failure) => {
                warn!(
                    contract_id,
                    provider = provider_name,
                    error = %failure,
                    "provider send failed, falling back to native"
                );
                let contract = self.send_contract(contract_id)?;
                Ok(SendOutcome {
                    contract,
                    route: SendRoute::Native,
                })
            }
        }
    }

    // ---- signing sessions ----

    /// Open (or re-enter) a signing session. First entry initializes the
    /// signer's evidence, advances `pending/sent -> opened` and stamps the
    /// contract-level `first_opened` exactly once. Re-entry only appends a
    /// log entry and refreshes `last_activity`. View counting is an atomic
    /// increment-and-check inside the CAS update.
    pub fn start_session(
        &self,
        contract_id: &str,
        signer_id: &str,
        ctx: RequestContext,
    ) -> anyhow::Result<SessionStart> {
        let contract = self.check_not_expired(contract_id)?;
        let template = self.load_template(&contract.template_id)?;
        let requirements = template.signing.clone();

        let geolocation = resolve_geolocation(&ctx.ip, self.geo.as_ref());

        let (session_id, signer, status) =
            self.store.update_contract(contract_id, |contract| {
                let now = TimeStamp::new();
                Self::expiry_recheck(contract, &now)?;

                let max_views = contract.security.max_views;
                let views = contract.security.current_views;
                let contract_id_owned = contract.contract_id.clone();

                let signer = contract.signer_mut(signer_id).ok_or(SigningError::NotFound {
                    resource: "signer",
                    id: signer_id.to_string(),
                })?;

                if signer.status.is_terminal() {
                    return Err(SigningError::AlreadyTerminal {
                        resource: "signer",
                        id: signer_id.to_string(),
                        state: signer.status.as_str().to_string(),
                    });
                }

                if views + 1 > max_views {
                    return Err(SigningError::ViewLimitExceeded {
                        contract_id: contract_id_owned,
                        max_views,
                    });
                }

                let mut first_entry = false;
                let session_id = match &mut signer.evidence {
                    Some(evidence) => {
                        // idempotent re-entry: no status change
                        evidence.log(AccessAction::SessionResumed, None, now.clone());
                        evidence.session_id.clone()
                    }
                    slot @ None => {
                        let session_id = new_uuid_to_bech32("session_").map_err(|e| {
                            SigningError::PreconditionFailed {
                                reason: format!("failed to mint session id: {e}"),
                            }
                        })?;
                        *slot = Some(SignerEvidence::begin(
                            &ctx,
                            session_id.clone(),
                            geolocation.clone(),
                            now.clone(),
                        ));
                        first_entry = true;
                        session_id
                    }
                };

                if first_entry && signer.status.can_advance_to(SignerStatus::Opened) {
                    signer.status = SignerStatus::Opened;
                    signer.opened_at = Some(now.clone());
                }

                let signer_snapshot = signer.clone();

                contract.security.current_views += 1;
                if contract.dates.first_opened.is_none() {
                    contract.dates.first_opened = Some(now.clone());
                }
                contract.touch(now);

                Ok((session_id, signer_snapshot, contract.status))
            })?;

        Ok(SessionStart {
            session_id,
            content: contract.content,
            requirements,
            signer,
            contract_status: status,
        })
    }

    /// Append-only telemetry merge. Fails with `SessionNotFound` before any
    /// `start_session`, and `AlreadyTerminal` once the signer is terminal.
    pub fn collect_evidence(
        &self,
        contract_id: &str,
        signer_id: &str,
        payload: EvidencePayload,
    ) -> anyhow::Result<SignedContract> {
        self.check_not_expired(contract_id)?;

        self.store.update_contract(contract_id, |contract| {
            let now = TimeStamp::new();
            Self::expiry_recheck(contract, &now)?;

            let signer = contract.signer_mut(signer_id).ok_or(SigningError::NotFound {
                resource: "signer",
                id: signer_id.to_string(),
            })?;

            if signer.status.is_terminal() {
                return Err(SigningError::AlreadyTerminal {
                    resource: "signer",
                    id: signer_id.to_string(),
                    state: signer.status.as_str().to_string(),
                });
            }

            let Some(evidence) = &mut signer.evidence else {
                return Err(SigningError::SessionNotFound {
                    signer_id: signer_id.to_string(),
                });
            };

            evidence.merge(payload.clone(), now.clone());
            contract.touch(now);
            Ok(contract.clone())
        })
    }

    // ---- signature capture ----

    /// Store the signature and consents for one signer, then re-evaluate the
    /// whole signer set: all signed -> `fully_signed` + seal; otherwise
    /// `partially_signed`. The conjunction runs after every signature, so
    /// signing order never matters.
    pub fn process_signature(
        &self,
        contract_id: &str,
        signer_id: &str,
        submission: SignatureSubmission,
    ) -> anyhow::Result<SignatureOutcome> {
        let current = self.check_not_expired(contract_id)?;
        let template = self.load_template(&current.template_id)?;

        if !template
            .signing
            .allowed_signature_kinds
            .contains(&submission.kind)
        {
            return Err(SigningError::PreconditionFailed {
                reason: format!("signature type {:?} is not allowed by the template", submission.kind),
            }
            .into());
        }

        let required_consents = template.signing.required_consents.clone();

        let contract = self.store.update_contract(contract_id, |contract| {
            let now = TimeStamp::new();
            Self::expiry_recheck(contract, &now)?;

            if contract.status.is_terminal() {
                return Err(SigningError::PreconditionFailed {
                    reason: format!(
                        "contract {} is {} and cannot accept signatures",
                        contract.contract_id,
                        contract.status.as_str()
                    ),
                });
            }

            let signer = contract.signer_mut(signer_id).ok_or(SigningError::NotFound {
                resource: "signer",
                id: signer_id.to_string(),
            })?;

            if signer.status.is_terminal() {
                return Err(SigningError::AlreadyTerminal {
                    resource: "signer",
                    id: signer_id.to_string(),
                    state: signer.status.as_str().to_string(),
                });
            }

            // every required consent must be present and accepted; the
            // error names the specific missing one
            for required in &required_consents {
                let granted = submission
                    .consents
                    .iter()
                    .any(|c| c.consent_id == required.consent_id && c.accepted);
                if !granted {
                    return Err(SigningError::ConsentRequired {
                        consent_id: required.consent_id.clone(),
                    });
                }
            }

            signer.consents = submission
                .consents
                .iter()
                .map(|c| ConsentRecord {
                    consent_id: c.consent_id.clone(),
                    label: c.label.clone(),
                    accepted: c.accepted,
                    accepted_at: now.clone(),
                })
                .collect();

            signer.signature = Some(SignatureRecord {
                kind: submission.kind,
                payload: submission.payload.clone(),
                payload_digest: sha256::digest(&submission.payload),
                signed_at: now.clone(),
                public_key_id: submission.public_key_id.clone(),
            });
            signer.status = SignerStatus::Signed;
            signer.signed_at = Some(now.clone());

            if let Some(evidence) = &mut signer.evidence {
                evidence.log(AccessAction::SignatureCompleted, None, now.clone());
            }

            if contract.all_signed() {
                contract.status = ContractStatus::FullySigned;
                contract.dates.completed = Some(now.clone());
                integrity::seal_document(contract)?;
            } else {
                contract.status = ContractStatus::PartiallySigned;
            }

            contract.touch(now);
            Ok(contract.clone())
        })?;

        let certificate = if contract.status == ContractStatus::FullySigned {
            info!(contract_id, "contract fully signed");
            for signer in &contract.signers {
                self.notify_signer(NotificationKind::ContractCompleted, &contract, signer);
            }
            Some(integrity::generate_certificate(&contract)?)
        } else {
            None
        };

        Ok(SignatureOutcome {
            contract,
            signer_id: signer_id.to_string(),
            certificate,
        })
    }

    /// Signer refusal: signer -> `declined` with reason, contract ->
    /// `declined`. Other signers keep their state and evidence.
    pub fn decline_signature(
        &self,
        contract_id: &str,
        signer_id: &str,
        reason: &str,
    ) -> anyhow::Result<SignedContract> {
        self.check_not_expired(contract_id)?;

        let contract = self.store.update_contract(contract_id, |contract| {
            let now = TimeStamp::new();
            Self::expiry_recheck(contract, &now)?;

            let signer = contract.signer_mut(signer_id).ok_or(SigningError::NotFound {
                resource: "signer",
                id: signer_id.to_string(),
            })?;

            if signer.status.is_terminal() {
                return Err(SigningError::AlreadyTerminal {
                    resource: "signer",
                    id: signer_id.to_string(),
                    state: signer.status.as_str().to_string(),
                });
            }

            signer.status = SignerStatus::Declined;
            signer.declined_at = Some(now.clone());
            signer.decline_reason = Some(reason.to_string());
            if let Some(evidence) = &mut signer.evidence {
                evidence.log(
                    AccessAction::SignatureDeclined,
                    Some(reason.to_string()),
                    now.clone(),
                );
            }

            if !contract.status.is_sealed() {
                contract.status = ContractStatus::Declined;
            }
            contract.touch(now);
            Ok(contract.clone())
        })?;

        for signer in &contract.signers {
            self.notify_signer(NotificationKind::ContractDeclined, &contract, signer);
        }
        Ok(contract)
    }

    /// Void the engagement. Signers still `pending`/`sent` are forced to
    /// `expired`; signed or declined signers keep their evidence untouched.
    pub fn void_contract(
        &self,
        contract_id: &str,
        reason: &str,
        actor: &str,
    ) -> anyhow::Result<SignedContract> {
        self.check_not_expired(contract_id)?;

        let contract = self.store.update_contract(contract_id, |contract| {
            let now = TimeStamp::new();
            Self::expiry_recheck(contract, &now)?;

            if contract.status == ContractStatus::Voided {
                return Err(SigningError::AlreadyTerminal {
                    resource: "contract",
                    id: contract.contract_id.clone(),
                    state: contract.status.as_str().to_string(),
                });
            }

            contract.status = ContractStatus::Voided;
            contract.dates.voided = Some(now.clone());
            contract.void_reason = Some(reason.to_string());
            contract.voided_by = Some(actor.to_string());

            for signer in &mut contract.signers {
                if matches!(signer.status, SignerStatus::Pending | SignerStatus::Sent) {
                    signer.status = SignerStatus::Expired;
                }
            }

            contract.touch(now);
            Ok(contract.clone())
        })?;

        info!(contract_id, actor, "contract voided");
        for signer in &contract.signers {
            self.notify_signer(NotificationKind::ContractVoided, &contract, signer);
        }
        Ok(contract)
    }

    /// Rotate one signer's signing reference and refresh their send stamp.
    /// Contract-level status is untouched.
    pub fn resend(&self, contract_id: &str, signer_id: &str) -> anyhow::Result<SigningReference> {
        self.check_not_expired(contract_id)?;

        let reference = new_uuid_to_bech32("sig_")?;
        let (signer_snapshot, contract) = {
            let reference = reference.clone();
            self.store.update_contract(contract_id, move |contract| {
                let now = TimeStamp::new();
                Self::expiry_recheck(contract, &now)?;

                let signer = contract.signer_mut(signer_id).ok_or(SigningError::NotFound {
                    resource: "signer",
                    id: signer_id.to_string(),
                })?;

                if signer.status.is_terminal() {
                    return Err(SigningError::AlreadyTerminal {
                        resource: "signer",
                        id: signer_id.to_string(),
                        state: signer.status.as_str().to_string(),
                    });
                }

                signer.signing_reference = reference.clone();
                signer.sent_at = Some(now.clone());
                if signer.status == SignerStatus::Pending {
                    signer.status = SignerStatus::Sent;
                }
                if let Some(evidence) = &mut signer.evidence {
                    evidence.log(AccessAction::LinkResent, None, now.clone());
                }

                let snapshot = signer.clone();
                contract.touch(now);
                Ok((snapshot, contract.clone()))
            })?
        };

        self.notify_signer(NotificationKind::SignatureReminder, &contract, &signer_snapshot);
        Ok(SigningReference {
            signer_id: signer_id.to_string(),
            reference,
        })
    }

    // ---- provider reconciliation ----

    /// Ingest a raw vendor webhook: parse through the named provider, locate
    /// the bound contract and apply the snapshot. Safe to call twice with
    /// the same payload.
    pub fn apply_webhook(&self, provider_name: &str, raw: &[u8]) -> anyhow::Result<SignedContract> {
        let provider =
            self.providers
                .get(provider_name)
                .ok_or_else(|| SigningError::NotFound {
                    resource: "provider",
                    id: provider_name.to_string(),
                })?;

        let snapshot = provider
            .parse_webhook(raw)
            .map_err(|e| SigningError::Provider {
                provider: provider_name.to_string(),
                message: e.to_string(),
            })?;

        let matches = self.store.list_contracts(
            |c| {
                c.integration
                    .as_ref()
                    .is_some_and(|b| b.external_id == snapshot.external_id)
            },
            super::store::Page {
                offset: 0,
                limit: 1,
            },
        )?;

        let Some(contract) = matches.into_iter().next() else {
            return Err(SigningError::NotFound {
                resource: "contract",
                id: format!("external id {}", snapshot.external_id),
            }
            .into());
        };

        info!(
            contract_id = %contract.contract_id,
            provider = provider_name,
            external_status = %snapshot.external_status,
            "webhook received"
        );
        self.update_contract_from_provider(&contract.contract_id, &snapshot)
    }

    /// Monotonic-forward merge of a provider snapshot into the canonical
    /// state machine. Signer statuses only advance; terminal signers never
    /// regress; the fully-signed conjunction is re-evaluated here exactly as
    /// in native signing. Applying the same snapshot twice is a no-op.
    pub fn update_contract_from_provider(
        &self,
        contract_id: &str,
        snapshot: &ProviderStatusSnapshot,
    ) -> anyhow::Result<SignedContract> {
        self.store.update_contract(contract_id, |contract| {
            let now = TimeStamp::new();

            let binding = contract.integration.get_or_insert_with(|| ProviderBinding {
                provider: snapshot.provider.clone(),
                external_id: snapshot.external_id.clone(),
                external_status: None,
                synced_at: None,
            });
            binding.external_status = Some(snapshot.external_status.clone());
            binding.synced_at = Some(now.clone());

            for update in &snapshot.signers {
                let Some(signer) = contract
                    .signers
                    .iter_mut()
                    .find(|s| s.email.eq_ignore_ascii_case(&update.email))
                else {
                    continue; // unknown participant, vendor-side extras
                };

                if !signer.status.can_advance_to(update.status) {
                    continue;
                }

                let occurred = update.occurred_at.clone().unwrap_or_else(|| now.clone());
                signer.status = update.status;
                match update.status {
                    SignerStatus::Sent => signer.sent_at = Some(occurred),
                    SignerStatus::Opened => signer.opened_at = Some(occurred),
                    SignerStatus::Signed => signer.signed_at = Some(occurred),
                    SignerStatus::Declined => signer.declined_at = Some(occurred),
                    SignerStatus::Pending | SignerStatus::Expired => {}
                }
            }

            // an envelope-level completion implies every remaining signer
            // signed on the vendor side
            if snapshot.contract_status == Some(ContractStatus::FullySigned) {
                for signer in &mut contract.signers {
                    if signer.status.can_advance_to(SignerStatus::Signed) {
                        signer.status = SignerStatus::Signed;
                        signer.signed_at = Some(now.clone());
                    }
                }
            }

            // canonical re-evaluation, same rules as native signing
            if contract.all_signed() && !contract.status.is_sealed() {
                contract.status = ContractStatus::FullySigned;
                contract.dates.completed = Some(now.clone());
                integrity::seal_document(contract)?;
            } else if let Some(target) = snapshot.contract_status {
                Self::advance_contract_status(contract, target, &now);
            }

            contract.touch(now);
            Ok(contract.clone())
        })
    }

    /// Fetch the provider's current view of a bound contract and reconcile.
    pub fn sync_with_provider(&self, contract_id: &str) -> anyhow::Result<SignedContract> {
        let contract = self.load(contract_id)?;
        let Some(binding) = contract.integration.clone() else {
            return Err(SigningError::PreconditionFailed {
                reason: format!("contract {contract_id} has no provider binding"),
            }
            .into());
        };

        let provider =
            self.providers
                .get(&binding.provider)
                .ok_or_else(|| SigningError::NotFound {
                    resource: "provider",
                    id: binding.provider.clone(),
                })?;

        let snapshot =
            provider
                .get_status(&binding.external_id)
                .map_err(|e| SigningError::Provider {
                    provider: binding.provider.clone(),
                    message: e.to_string(),
                })?;

        self.update_contract_from_provider(contract_id, &snapshot)
    }

    // ---- internals ----

    fn load(&self, contract_id: &str) -> anyhow::Result<SignedContract> {
        self.store
            .get_contract(contract_id)?
            .ok_or_else(|| {
                SigningError::NotFound {
                    resource: "contract",
                    id: contract_id.to_string(),
                }
                .into()
            })
    }

    fn load_template(&self, template_id: &str) -> anyhow::Result<ContractTemplate> {
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

    /// Lazy expiry: if the contract is past `dates.expires` and neither
    /// voided nor sealed, coerce it to `expired` (persisted) before anything
    /// else happens. Returns the up-to-date record.
    fn guard_expiry(&self, contract_id: &str) -> anyhow::Result<SignedContract> {
        let contract = self.load(contract_id)?;
        let now = TimeStamp::new();

        if !Self::expiry_applies(&contract, &now) {
            return Ok(contract);
        }

        self.store.update_contract(contract_id, |contract| {
            let now = TimeStamp::new();
            if Self::expiry_applies(contract, &now) {
                Self::coerce_expired(contract, &now);
            }
            Ok(contract.clone())
        })
    }

    /// Expiry guard for mutating operations: coerces first, then reports
    /// `Expired` so the caller sees the coerced state.
    fn check_not_expired(&self, contract_id: &str) -> anyhow::Result<SignedContract> {
        let contract = self.guard_expiry(contract_id)?;
        if contract.status == ContractStatus::Expired {
            return Err(SigningError::Expired {
                contract_id: contract_id.to_string(),
            }
            .into());
        }
        Ok(contract)
    }

    // re-run of the guard inside a CAS closure, where the record may have
    // changed since the outer check
    fn expiry_recheck(contract: &mut SignedContract, now: &TimeStamp<Utc>) -> Result<(), SigningError> {
        if Self::expiry_applies(contract, now) {
            Self::coerce_expired(contract, now);
        }
        if contract.status == ContractStatus::Expired {
            return Err(SigningError::Expired {
                contract_id: contract.contract_id.clone(),
            });
        }
        Ok(())
    }

    fn expiry_applies(contract: &SignedContract, now: &TimeStamp<Utc>) -> bool {
        contract.is_past_expiry(now)
            && contract.status != ContractStatus::Voided
            && contract.status != ContractStatus::Expired
            && !contract.status.is_sealed()
    }

    fn coerce_expired(contract: &mut SignedContract, now: &TimeStamp<Utc>) {
        contract.status = ContractStatus::Expired;
        for signer in &mut contract.signers {
            if matches!(signer.status, SignerStatus::Pending | SignerStatus::Sent) {
                signer.status = SignerStatus::Expired;
            }
        }
        contract.touch(now.clone());
    }

    /// Contract-level forward-only transition for provider reconciliation.
    /// Sealed and terminal states are never overwritten, except the
    /// `fully_signed -> completed` step.
    fn advance_contract_status(
        contract: &mut SignedContract,
        target: ContractStatus,
        now: &TimeStamp<Utc>,
    ) {
        use ContractStatus::*;

        if contract.status == target {
            return;
        }

        let allowed = match target {
            Draft => false,
            Sent => contract.status == Draft,
            PartiallySigned => matches!(contract.status, Draft | Sent),
            FullySigned => false, // only the conjunction may set this
            Completed => contract.status == FullySigned,
            Declined | Expired | Voided => {
                !contract.status.is_sealed() && !contract.status.is_terminal()
            }
        };

        if !allowed {
            return;
        }

        contract.status = target;
        match target {
            Sent if contract.dates.sent.is_none() => {
                contract.dates.sent = Some(now.clone());
                for signer in &mut contract.signers {
                    if signer.status == SignerStatus::Pending {
                        signer.status = SignerStatus::Sent;
                        signer.sent_at = Some(now.clone());
                    }
                }
            }
            Voided if contract.dates.voided.is_none() => {
                contract.dates.voided = Some(now.clone());
            }
            _ => {}
        }
    }

    fn bump_template_stats(&self, template_id: &str) -> anyhow::Result<()> {
        let mut template = self.load_template(template_id)?;
        template.stats.contracts_created += 1;
        self.store.put_template(&template)?;
        Ok(())
    }

    fn notify_signer(&self, kind: NotificationKind, contract: &SignedContract, signer: &Signer) {
        let mut payload = BTreeMap::new();
        payload.insert("contract_id".to_string(), contract.contract_id.clone());
        payload.insert("title".to_string(), contract.title.clone());
        payload.insert("signer_name".to_string(), signer.name.clone());
        payload.insert(
            "signing_reference".to_string(),
            signer.signing_reference.clone(),
        );
        self.notifier.notify(kind, &signer.email, &payload);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal in-memory contract for unit tests across modules.
    pub(crate) fn bare_contract(signer_count: usize) -> SignedContract {
        let signers = (0..signer_count)
            .map(|i| {
                Signer::new(
                    format!("signer_{i}"),
                    format!("Signer {i}"),
                    format!("signer{i}@example.com"),
                    i as u32,
                    format!("sig_{i}"),
                )
            })
            .collect();

        SignedContract {
            contract_id: "contract_test".into(),
            subscriber_id: "subscriber_test".into(),
            template_id: "template_test".into(),
            template_version: "1.0.0".into(),
            title: "Test agreement".into(),
            content: "body".into(),
            placeholder_values: BTreeMap::new(),
            status: ContractStatus::Draft,
            signers,
            dates: ContractDates {
                created: TimeStamp::new(),
                sent: None,
                first_opened: None,
                last_activity: None,
                completed: None,
                expires: None,
                voided: None,
            },
            security: SecurityInfo {
                original_hash: String::new(),
                final_hash: None,
                hash_algorithm: HashAlgorithm::Sha256,
                current_views: 0,
                max_views: 100,
            },
            integration: None,
            jurisdiction: "US".into(),
            governing_law: "Delaware".into(),
            void_reason: None,
            voided_by: None,
            revision: 0,
        }
    }

    #[test]
    fn advance_never_regresses_contract_status() {
        let now = TimeStamp::new();

        let mut contract = bare_contract(1);
        contract.status = ContractStatus::PartiallySigned;
        SigningService::advance_contract_status(&mut contract, ContractStatus::Sent, &now);
        assert_eq!(contract.status, ContractStatus::PartiallySigned);

        contract.status = ContractStatus::FullySigned;
        SigningService::advance_contract_status(&mut contract, ContractStatus::Voided, &now);
        assert_eq!(contract.status, ContractStatus::FullySigned);

        SigningService::advance_contract_status(&mut contract, ContractStatus::Completed, &now);
        assert_eq!(contract.status, ContractStatus::Completed);
    }

    #[test]
    fn fully_signed_only_via_conjunction() {
        let now = TimeStamp::new();
        let mut contract = bare_contract(2);
        contract.status = ContractStatus::Sent;

        SigningService::advance_contract_status(&mut contract, ContractStatus::FullySigned, &now);
        assert_eq!(contract.status, ContractStatus::Sent);
    }

    #[test]
    fn expiry_coercion_spares_terminal_signers() {
        let now = TimeStamp::new();
        let mut contract = bare_contract(3);
        contract.signers[0].status = SignerStatus::Signed;
        contract.signers[1].status = SignerStatus::Sent;

        SigningService::coerce_expired(&mut contract, &now);

        assert_eq!(contract.status, ContractStatus::Expired);
        assert_eq!(contract.signers[0].status, SignerStatus::Signed);
        assert_eq!(contract.signers[1].status, SignerStatus::Expired);
        assert_eq!(contract.signers[2].status, SignerStatus::Expired);
    }
}
