//! Audit trail derivation
//!
//! A chronologically ordered event list derived from a contract's
//! accumulated state, for compliance export. Pure read: nothing here
//! mutates the record.

use chrono::Utc;
use serde::Serialize;

use super::contract::{SignedContract, TimeStamp};
use super::evidence::AccessAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    ContractCreated,
    ContractSent,
    SignerSent,
    SessionStarted,
    SessionResumed,
    EvidenceSubmitted,
    ConsentUpdated,
    SignatureCompleted,
    SignatureDeclined,
    LinkResent,
    ContractCompleted,
    ContractVoided,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub at: TimeStamp<Utc>,
    pub kind: AuditEventKind,
    pub signer_id: Option<String>,
    pub actor: Option<String>,
    pub detail: Option<String>,
}

fn kind_for(action: AccessAction) -> AuditEventKind {
    match action {
        AccessAction::SessionStarted => AuditEventKind::SessionStarted,
        AccessAction::SessionResumed => AuditEventKind::SessionResumed,
        AccessAction::EvidenceSubmitted => AuditEventKind::EvidenceSubmitted,
        AccessAction::ConsentUpdated => AuditEventKind::ConsentUpdated,
        AccessAction::SignatureCompleted => AuditEventKind::SignatureCompleted,
        AccessAction::SignatureDeclined => AuditEventKind::SignatureDeclined,
        AccessAction::LinkResent => AuditEventKind::LinkResent,
    }
}

/// Derive the ordered audit trail for a contract. Events come from the
/// contract-level dates, per-signer send stamps and every access-log entry.
pub fn audit_trail(contract: &SignedContract) -> Vec<AuditEvent> {
    let mut events = Vec::new();

    events.push(AuditEvent {
        at: contract.dates.created.clone(),
        kind: AuditEventKind::ContractCreated,
        signer_id: None,
        actor: None,
        detail: Some(format!(
            "template {} v{}",
            contract.template_id, contract.template_version
        )),
    });

    if let Some(sent) = &contract.dates.sent {
        events.push(AuditEvent {
            at: sent.clone(),
            kind: AuditEventKind::ContractSent,
            signer_id: None,
            actor: None,
            detail: None,
        });
    }

    for signer in &contract.signers {
        if let Some(sent_at) = &signer.sent_at {
            events.push(AuditEvent {
                at: sent_at.clone(),
                kind: AuditEventKind::SignerSent,
                signer_id: Some(signer.signer_id.clone()),
                actor: None,
                detail: Some(signer.email.clone()),
            });
        }

        if let Some(evidence) = &signer.evidence {
            for entry in &evidence.access_log {
                events.push(AuditEvent {
                    at: entry.at.clone(),
                    kind: kind_for(entry.action),
                    signer_id: Some(signer.signer_id.clone()),
                    actor: None,
                    detail: entry.detail.clone(),
                });
            }
        }
    }

    if let Some(completed) = &contract.dates.completed {
        events.push(AuditEvent {
            at: completed.clone(),
            kind: AuditEventKind::ContractCompleted,
            signer_id: None,
            actor: None,
            detail: contract.security.final_hash.clone(),
        });
    }

    if let Some(voided) = &contract.dates.voided {
        events.push(AuditEvent {
            at: voided.clone(),
            kind: AuditEventKind::ContractVoided,
            signer_id: None,
            actor: contract.voided_by.clone(),
            detail: contract.void_reason.clone(),
        });
    }

    events.sort_by(|a, b| a.at.cmp(&b.at));
    events
}
