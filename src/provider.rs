//! External e-signature provider adapters
//!
//! One interface, implemented by the native engine (a passthrough) and by
//! vendor adapters. Each vendor adapter is a single status-mapping table over
//! an injected [`ProviderTransport`]; the transport (HTTP glue, auth, token
//! refresh) belongs to the excluded integration collaborators. Snapshots
//! produced here are applied to the canonical state machine by the workflow
//! engine's monotonic merge, so replaying the same webhook is harmless.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;

use super::contract::{ContractStatus, SignedContract, SignerStatus, TimeStamp};
use super::store::Store;

#[derive(thiserror::Error, Debug)]
pub enum ProviderFailure {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("malformed provider payload: {0}")]
    Malformed(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

/// Acknowledgement from a provider after a send, in vendor vocabulary.
#[derive(Debug, Clone)]
pub struct ProviderSendAck {
    pub external_id: String,
    pub external_status: String,
}

#[derive(Debug, Clone)]
pub struct SignerStatusUpdate {
    pub email: String,
    pub status: SignerStatus,
    pub occurred_at: Option<TimeStamp<chrono::Utc>>,
}

/// A provider's view of a contract, already translated into the canonical
/// status vocabulary. `external_status` keeps the raw vendor word for the
/// integration record.
#[derive(Debug, Clone)]
pub struct ProviderStatusSnapshot {
    pub provider: String,
    pub external_id: String,
    pub external_status: String,
    pub contract_status: Option<ContractStatus>,
    pub signers: Vec<SignerStatusUpdate>,
    pub extra: BTreeMap<String, String>,
}

pub trait SignatureProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn send(&self, contract: &SignedContract) -> Result<ProviderSendAck, ProviderFailure>;
    fn get_status(&self, external_id: &str) -> Result<ProviderStatusSnapshot, ProviderFailure>;
    fn parse_webhook(&self, raw: &[u8]) -> Result<ProviderStatusSnapshot, ProviderFailure>;
    fn download_final_document(&self, external_id: &str) -> Result<Vec<u8>, ProviderFailure>;
}

/// Provider lookup by name. Selection is a table lookup, not a type
/// hierarchy.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn SignatureProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn SignatureProvider>) {
        self.providers
            .insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SignatureProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

pub const NATIVE_PROVIDER: &str = "native";

/// The native engine exposed through the same interface: the external id is
/// the contract id and status reads come straight from the store.
pub struct NativeProvider {
    store: Arc<Store>,
}

impl NativeProvider {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    fn load(&self, contract_id: &str) -> Result<SignedContract, ProviderFailure> {
        self.store
            .get_contract(contract_id)
            .map_err(|e| ProviderFailure::Transport(e.to_string()))?
            .ok_or_else(|| ProviderFailure::Malformed(format!("unknown contract {contract_id}")))
    }
}

impl SignatureProvider for NativeProvider {
    fn name(&self) -> &'static str {
        NATIVE_PROVIDER
    }

    fn send(&self, contract: &SignedContract) -> Result<ProviderSendAck, ProviderFailure> {
        Ok(ProviderSendAck {
            external_id: contract.contract_id.clone(),
            external_status: "sent".into(),
        })
    }

    fn get_status(&self, external_id: &str) -> Result<ProviderStatusSnapshot, ProviderFailure> {
        let contract = self.load(external_id)?;
        Ok(ProviderStatusSnapshot {
            provider: NATIVE_PROVIDER.into(),
            external_id: external_id.into(),
            external_status: contract.status.as_str().into(),
            contract_status: Some(contract.status),
            signers: contract
                .signers
                .iter()
                .map(|s| SignerStatusUpdate {
                    email: s.email.clone(),
                    status: s.status,
                    occurred_at: s.signed_at.clone(),
                })
                .collect(),
            extra: BTreeMap::new(),
        })
    }

    fn parse_webhook(&self, _raw: &[u8]) -> Result<ProviderStatusSnapshot, ProviderFailure> {
        Err(ProviderFailure::Unsupported(
            "native signing has no webhook channel".into(),
        ))
    }

    fn download_final_document(&self, external_id: &str) -> Result<Vec<u8>, ProviderFailure> {
        let contract = self.load(external_id)?;
        Ok(contract.content.into_bytes())
    }
}

/// One row of a vendor's status vocabulary translation.
struct StatusRow {
    vendor: &'static str,
    contract: Option<ContractStatus>,
    signer: Option<SignerStatus>,
}

const fn row(
    vendor: &'static str,
    contract: Option<ContractStatus>,
    signer: Option<SignerStatus>,
) -> StatusRow {
    StatusRow {
        vendor,
        contract,
        signer,
    }
}

// Status tables per supported vendor vocabulary. Lookups are
// case-insensitive; unknown vendor words map to no status change, which the
// monotonic merge treats as a no-op.

const DOCUSIGN_TABLE: &[StatusRow] = &[
    row("created", Some(ContractStatus::Draft), Some(SignerStatus::Pending)),
    row("sent", Some(ContractStatus::Sent), Some(SignerStatus::Sent)),
    row("delivered", Some(ContractStatus::Sent), Some(SignerStatus::Opened)),
    row("completed", Some(ContractStatus::FullySigned), Some(SignerStatus::Signed)),
    row("signed", Some(ContractStatus::PartiallySigned), Some(SignerStatus::Signed)),
    row("declined", Some(ContractStatus::Declined), Some(SignerStatus::Declined)),
    row("voided", Some(ContractStatus::Voided), Some(SignerStatus::Expired)),
];

const ADOBE_TABLE: &[StatusRow] = &[
    row("authoring", Some(ContractStatus::Draft), Some(SignerStatus::Pending)),
    row("out_for_signature", Some(ContractStatus::Sent), Some(SignerStatus::Sent)),
    row("waiting_for_my_signature", None, Some(SignerStatus::Opened)),
    row("signed", Some(ContractStatus::FullySigned), Some(SignerStatus::Signed)),
    row("cancelled", Some(ContractStatus::Voided), Some(SignerStatus::Expired)),
    row("declined", Some(ContractStatus::Declined), Some(SignerStatus::Declined)),
    row("expired", Some(ContractStatus::Expired), Some(SignerStatus::Expired)),
];

const DROPBOX_TABLE: &[StatusRow] = &[
    row("awaiting_signature", Some(ContractStatus::Sent), Some(SignerStatus::Sent)),
    row("viewed", None, Some(SignerStatus::Opened)),
    row("signed", Some(ContractStatus::FullySigned), Some(SignerStatus::Signed)),
    row("declined", Some(ContractStatus::Declined), Some(SignerStatus::Declined)),
    row("error_invalid_email", None, Some(SignerStatus::Expired)),
];

fn lookup(table: &[StatusRow], vendor_word: &str) -> (Option<ContractStatus>, Option<SignerStatus>) {
    let needle = vendor_word.to_ascii_lowercase();
    table
        .iter()
        .find(|r| r.vendor == needle)
        .map(|r| (r.contract, r.signer))
        .unwrap_or((None, None))
}

/// Vendor-side transport: the narrow surface the excluded HTTP/auth
/// collaborator implements. Raw payloads come back in the vendor's JSON.
pub trait ProviderTransport: Send + Sync {
    fn create_envelope(&self, contract: &SignedContract) -> Result<String, ProviderFailure>;
    fn fetch_status(&self, external_id: &str) -> Result<Vec<u8>, ProviderFailure>;
    fn fetch_document(&self, external_id: &str) -> Result<Vec<u8>, ProviderFailure>;
}

// Vendor webhook/status envelope. Field names differ per vendor, aliases
// cover the supported vocabularies; anything else arrives via `extra`.
#[derive(Debug, Deserialize)]
struct WireEnvelope {
    #[serde(
        alias = "envelopeId",
        alias = "envelope_id",
        alias = "agreement_id",
        alias = "signature_request_id"
    )]
    external_id: String,
    status: String,
    #[serde(default, alias = "recipients", alias = "participants", alias = "signatures")]
    signers: Vec<WireSigner>,
    #[serde(default)]
    extra: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct WireSigner {
    #[serde(alias = "email_address", alias = "signer_email_address")]
    email: String,
    status: String,
    #[serde(default, alias = "status_datetime", alias = "signed_at")]
    timestamp: Option<String>,
}

/// A vendor adapter: name + status table + transport. All supported vendors
/// are instances of this one type, selected from the registry by name.
pub struct MappedProvider {
    name: &'static str,
    table: &'static [StatusRow],
    transport: Box<dyn ProviderTransport>,
}

impl MappedProvider {
    pub fn docusign_like(transport: Box<dyn ProviderTransport>) -> Self {
        Self {
            name: "docusign",
            table: DOCUSIGN_TABLE,
            transport,
        }
    }

    pub fn adobe_like(transport: Box<dyn ProviderTransport>) -> Self {
        Self {
            name: "adobe_sign",
            table: ADOBE_TABLE,
            transport,
        }
    }

    pub fn dropbox_like(transport: Box<dyn ProviderTransport>) -> Self {
        Self {
            name: "dropbox_sign",
            table: DROPBOX_TABLE,
            transport,
        }
    }

    fn snapshot_from(&self, raw: &[u8]) -> Result<ProviderStatusSnapshot, ProviderFailure> {
        let envelope: WireEnvelope = serde_json::from_slice(raw)
            .map_err(|e| ProviderFailure::Malformed(e.to_string()))?;

        let (contract_status, _) = lookup(self.table, &envelope.status);

        let signers = envelope
            .signers
            .iter()
            .filter_map(|ws| {
                let (_, signer_status) = lookup(self.table, &ws.status);
                signer_status.map(|status| SignerStatusUpdate {
                    email: ws.email.clone(),
                    status,
                    occurred_at: ws
                        .timestamp
                        .as_deref()
                        .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
                        .map(|dt| dt.with_timezone(&chrono::Utc).into()),
                })
            })
            .collect();

        Ok(ProviderStatusSnapshot {
            provider: self.name.into(),
            external_id: envelope.external_id,
            external_status: envelope.status,
            contract_status,
            signers,
            extra: envelope.extra,
        })
    }
}

impl SignatureProvider for MappedProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn send(&self, contract: &SignedContract) -> Result<ProviderSendAck, ProviderFailure> {
        let external_id = self.transport.create_envelope(contract)?;
        Ok(ProviderSendAck {
            external_id,
            external_status: "sent".into(),
        })
    }

    fn get_status(&self, external_id: &str) -> Result<ProviderStatusSnapshot, ProviderFailure> {
        let raw = self.transport.fetch_status(external_id)?;
        self.snapshot_from(&raw)
    }

    fn parse_webhook(&self, raw: &[u8]) -> Result<ProviderStatusSnapshot, ProviderFailure> {
        self.snapshot_from(raw)
    }

    fn download_final_document(&self, external_id: &str) -> Result<Vec<u8>, ProviderFailure> {
        self.transport.fetch_document(external_id)
    }
}
