//! Document integrity: hashing, verification, and terminal projections
//!
//! `original_hash` is computed over the rendered content at initiation;
//! `final_hash` is frozen exactly once at the fully-signed transition. The
//! Certificate of Completion embeds both and carries its own integrity hash
//! computed over the CBOR-serialized certificate body, so it can be verified
//! independently of the contract record it came from.

use chrono::Utc;
use serde::Serialize;

use super::contract::{
    ContractStatus, HashAlgorithm, SignatureKind, SignedContract, SignerStatus, TimeStamp,
};
use super::error::SigningError;
use super::evidence::{AccessLogEntry, DeviceClass};
use super::utils::new_uuid_to_bech32;

pub fn hash_content(algorithm: HashAlgorithm, content: &str) -> String {
    match algorithm {
        HashAlgorithm::Sha256 => sha256::digest(content),
    }
}

/// Freeze `final_hash` from the contract's rendered content. Callable only
/// once; the stored value is never recomputed afterward.
pub fn seal_document(contract: &mut SignedContract) -> Result<String, SigningError> {
    if contract.security.final_hash.is_some() {
        return Err(SigningError::PreconditionFailed {
            reason: format!("contract {} is already sealed", contract.contract_id),
        });
    }

    let hash = hash_content(contract.security.hash_algorithm, &contract.content);
    contract.security.final_hash = Some(hash.clone());
    Ok(hash)
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    pub contract_id: String,
    pub valid: bool,
    pub matched_field: &'static str, // "original_hash" until sealed, then "final_hash"
    pub algorithm: HashAlgorithm,
    pub checked_at: TimeStamp<Utc>,
}

/// Pure comparison of a supplied hash against the stored one. Compares the
/// final hash when sealed, otherwise the original. Never mutates state.
pub fn verify_integrity(contract: &SignedContract, supplied_hash: &str) -> VerificationResult {
    let (stored, field) = match &contract.security.final_hash {
        Some(final_hash) => (final_hash.as_str(), "final_hash"),
        None => (contract.security.original_hash.as_str(), "original_hash"),
    };

    // normalize hex case; a malformed supplied hash can never match
    let valid = match normalize_hash(supplied_hash) {
        Some(normalized) => normalized == stored,
        None => false,
    };

    VerificationResult {
        contract_id: contract.contract_id.clone(),
        valid,
        matched_field: field,
        algorithm: contract.security.hash_algorithm,
        checked_at: TimeStamp::new(),
    }
}

fn normalize_hash(supplied: &str) -> Option<String> {
    let bytes = hex::decode(supplied.trim()).ok()?;
    Some(hex::encode(bytes))
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode, Serialize)]
pub struct ConsentSummary {
    #[n(0)]
    pub consent_id: String,
    #[n(1)]
    pub accepted: bool,
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode, Serialize)]
pub struct SignerSummary {
    #[n(0)]
    pub signer_id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub email: String,
    #[n(3)]
    pub status: SignerStatus,
    #[n(4)]
    pub signed_at: Option<TimeStamp<Utc>>,
    #[n(5)]
    pub signature_kind: Option<SignatureKind>,
    #[n(6)]
    pub signature_digest: Option<String>,
    #[n(7)]
    pub ip: Option<String>,
    #[n(8)]
    pub device_class: Option<DeviceClass>,
    #[n(9)]
    pub consents: Vec<ConsentSummary>,
}

fn summarize_signer(signer: &super::contract::Signer) -> SignerSummary {
    SignerSummary {
        signer_id: signer.signer_id.clone(),
        name: signer.name.clone(),
        email: signer.email.clone(),
        status: signer.status,
        signed_at: signer.signed_at.clone(),
        signature_kind: signer.signature.as_ref().map(|s| s.kind),
        signature_digest: signer.signature.as_ref().map(|s| s.payload_digest.clone()),
        ip: signer.evidence.as_ref().map(|e| e.ip.clone()),
        device_class: signer.evidence.as_ref().map(|e| e.device.class),
        consents: signer
            .consents
            .iter()
            .map(|c| ConsentSummary {
                consent_id: c.consent_id.clone(),
                accepted: c.accepted,
            })
            .collect(),
    }
}

/// Everything the certificate attests to. Hashed as serialized.
#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode, Serialize)]
pub struct CertificateBody {
    #[n(0)]
    pub certificate_id: String,
    #[n(1)]
    pub contract_id: String,
    #[n(2)]
    pub template_id: String,
    #[n(3)]
    pub template_version: String,
    #[n(4)]
    pub title: String,
    #[n(5)]
    pub jurisdiction: String,
    #[n(6)]
    pub governing_law: String,
    #[n(7)]
    pub original_hash: String,
    #[n(8)]
    pub final_hash: String,
    #[n(9)]
    pub hash_algorithm: HashAlgorithm,
    #[n(10)]
    pub completed_at: Option<TimeStamp<Utc>>,
    #[n(11)]
    pub generated_at: TimeStamp<Utc>,
    #[n(12)]
    pub signers: Vec<SignerSummary>,
}

/// Certificate of Completion. `certificate_hash` is a hash over the encoded
/// body, so the certificate verifies on its own.
#[derive(Debug, Clone, Serialize)]
pub struct Certificate {
    pub body: CertificateBody,
    pub certificate_hash: String,
}

pub fn generate_certificate(contract: &SignedContract) -> anyhow::Result<Certificate> {
    if !contract.status.is_sealed() {
        return Err(SigningError::PreconditionFailed {
            reason: format!(
                "certificate requires a fully signed contract, status is {}",
                contract.status.as_str()
            ),
        }
        .into());
    }

    let Some(final_hash) = contract.security.final_hash.clone() else {
        return Err(SigningError::PreconditionFailed {
            reason: format!("contract {} has no final hash", contract.contract_id),
        }
        .into());
    };

    let body = CertificateBody {
        certificate_id: new_uuid_to_bech32("cert_")?,
        contract_id: contract.contract_id.clone(),
        template_id: contract.template_id.clone(),
        template_version: contract.template_version.clone(),
        title: contract.title.clone(),
        jurisdiction: contract.jurisdiction.clone(),
        governing_law: contract.governing_law.clone(),
        original_hash: contract.security.original_hash.clone(),
        final_hash,
        hash_algorithm: contract.security.hash_algorithm,
        completed_at: contract.dates.completed.clone(),
        generated_at: TimeStamp::new(),
        signers: contract.signers.iter().map(summarize_signer).collect(),
    };

    let encoded = minicbor::to_vec(&body)?;
    let certificate_hash = sha256::digest(&encoded);

    Ok(Certificate {
        body,
        certificate_hash,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub signer_id: String,
    pub at: TimeStamp<Utc>,
    pub action: super::evidence::AccessAction,
    pub detail: Option<String>,
}

/// Exportable evidence bundle: signer summaries plus the merged, ordered
/// access-log timeline. Derived on demand, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct EvidencePackage {
    pub contract_id: String,
    pub status: ContractStatus,
    pub original_hash: String,
    pub final_hash: Option<String>,
    pub hash_algorithm: HashAlgorithm,
    pub generated_at: TimeStamp<Utc>,
    pub signers: Vec<SignerSummary>,
    pub timeline: Vec<TimelineEntry>,
}

pub fn build_evidence_package(contract: &SignedContract) -> anyhow::Result<EvidencePackage> {
    if !contract.status.is_sealed() {
        return Err(SigningError::PreconditionFailed {
            reason: format!(
                "evidence package requires a fully signed contract, status is {}",
                contract.status.as_str()
            ),
        }
        .into());
    }

    let mut timeline: Vec<TimelineEntry> = contract
        .signers
        .iter()
        .flat_map(|signer| {
            let entries: &[AccessLogEntry] = signer
                .evidence
                .as_ref()
                .map(|e| e.access_log.as_slice())
                .unwrap_or(&[]);
            entries.iter().map(|entry| TimelineEntry {
                signer_id: signer.signer_id.clone(),
                at: entry.at.clone(),
                action: entry.action,
                detail: entry.detail.clone(),
            })
        })
        .collect();
    timeline.sort_by(|a, b| a.at.cmp(&b.at));

    Ok(EvidencePackage {
        contract_id: contract.contract_id.clone(),
        status: contract.status,
        original_hash: contract.security.original_hash.clone(),
        final_hash: contract.security.final_hash.clone(),
        hash_algorithm: contract.security.hash_algorithm,
        generated_at: TimeStamp::new(),
        signers: contract.signers.iter().map(summarize_signer).collect(),
        timeline,
    })
}
