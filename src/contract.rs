//! Core contract and signer records
//!
//! A [`SignedContract`] is one signing engagement: a frozen render of a
//! template version, an ordered set of signers, and the date/security
//! bookkeeping the workflow engine drives. Records are CBOR-encoded for
//! storage, key is the contract id.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::evidence::SignerEvidence;

#[derive(Debug, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl<T: TimeZone> PartialEq for TimeStamp<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T: TimeZone> Eq for TimeStamp<T> {}

impl<T: TimeZone> PartialOrd for TimeStamp<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: TimeZone> Ord for TimeStamp<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn plus_days(&self, days: i64) -> Self {
        Self(self.0 + chrono::Duration::days(days))
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

// RFC 3339 in exported projections (certificate, evidence package).
impl Serialize for TimeStamp<Utc> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_rfc3339())
    }
}

/// Contract-level status. `FullySigned` and later are the only states in
/// which `security.final_hash` may be set.
#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    #[n(0)]
    Draft,
    #[n(1)]
    Sent,
    #[n(2)]
    PartiallySigned,
    #[n(3)]
    FullySigned,
    #[n(4)]
    Completed,
    #[n(5)]
    Declined,
    #[n(6)]
    Expired,
    #[n(7)]
    Voided,
}

impl ContractStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Declined | Self::Expired | Self::Voided)
    }
    pub fn is_sealed(self) -> bool {
        matches!(self, Self::FullySigned | Self::Completed)
    }
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::PartiallySigned => "partially_signed",
            Self::FullySigned => "fully_signed",
            Self::Completed => "completed",
            Self::Declined => "declined",
            Self::Expired => "expired",
            Self::Voided => "voided",
        }
    }
}

/// Per-signer sub-status. Signed, Declined and Expired are terminal.
#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Sent,
    #[n(2)]
    Opened,
    #[n(3)]
    Signed,
    #[n(4)]
    Declined,
    #[n(5)]
    Expired,
}

impl SignerStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Signed | Self::Declined | Self::Expired)
    }

    // progress rank along the happy path, used for monotonic merges
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Sent => 1,
            Self::Opened => 2,
            Self::Signed | Self::Declined | Self::Expired => 3,
        }
    }

    /// True when moving to `next` is forward progress. Terminal states never
    /// move again; equal-rank terminal swaps (signed -> declined) are refused.
    pub fn can_advance_to(self, next: SignerStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Opened => "opened",
            Self::Signed => "signed",
            Self::Declined => "declined",
            Self::Expired => "expired",
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureKind {
    #[n(0)]
    Typed,
    #[n(1)]
    Drawn,
    #[n(2)]
    Uploaded,
}

/// Captured once per signer, immutable after write.
#[derive(Debug, PartialEq, Eq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct SignatureRecord {
    #[n(0)]
    pub kind: SignatureKind,
    #[n(1)]
    pub payload: Vec<u8>,
    #[n(2)]
    pub payload_digest: String, // sha256 over payload bytes
    #[n(3)]
    pub signed_at: TimeStamp<Utc>,
    #[n(4)]
    pub public_key_id: Option<String>,
}

#[derive(Debug, PartialEq, Eq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct ConsentRecord {
    #[n(0)]
    pub consent_id: String,
    #[n(1)]
    pub label: String,
    #[n(2)]
    pub accepted: bool,
    #[n(3)]
    pub accepted_at: TimeStamp<Utc>,
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct Signer {
    #[n(0)]
    pub signer_id: String, // bech32, unique within its contract
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub email: String,
    #[n(3)]
    pub order: u32,
    #[n(4)]
    pub status: SignerStatus,
    #[n(5)]
    pub signing_reference: String, // rotated by resend
    #[n(6)]
    pub sent_at: Option<TimeStamp<Utc>>,
    #[n(7)]
    pub opened_at: Option<TimeStamp<Utc>>,
    #[n(8)]
    pub signed_at: Option<TimeStamp<Utc>>,
    #[n(9)]
    pub declined_at: Option<TimeStamp<Utc>>,
    #[n(10)]
    pub decline_reason: Option<String>,
    #[n(11)]
    pub evidence: Option<SignerEvidence>,
    #[n(12)]
    pub signature: Option<SignatureRecord>,
    #[n(13)]
    pub consents: Vec<ConsentRecord>,
}

impl Signer {
    pub fn new(signer_id: String, name: String, email: String, order: u32, reference: String) -> Self {
        Self {
            signer_id,
            name,
            email,
            order,
            status: SignerStatus::Pending,
            signing_reference: reference,
            sent_at: None,
            opened_at: None,
            signed_at: None,
            declined_at: None,
            decline_reason: None,
            evidence: None,
            signature: None,
            consents: vec![],
        }
    }
}

/// Each date is written at most once, except `last_activity`.
#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct ContractDates {
    #[n(0)]
    pub created: TimeStamp<Utc>,
    #[n(1)]
    pub sent: Option<TimeStamp<Utc>>,
    #[n(2)]
    pub first_opened: Option<TimeStamp<Utc>>,
    #[n(3)]
    pub last_activity: Option<TimeStamp<Utc>>,
    #[n(4)]
    pub completed: Option<TimeStamp<Utc>>,
    #[n(5)]
    pub expires: Option<TimeStamp<Utc>>,
    #[n(6)]
    pub voided: Option<TimeStamp<Utc>>,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    #[n(0)]
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
        }
    }
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct SecurityInfo {
    #[n(0)]
    pub original_hash: String, // over the rendered content at initiation
    #[n(1)]
    pub final_hash: Option<String>, // set exactly once, at fully_signed
    #[n(2)]
    pub hash_algorithm: HashAlgorithm,
    #[n(3)]
    pub current_views: u32,
    #[n(4)]
    pub max_views: u32,
}

/// Binding to an external e-signature provider, written only by the
/// integration layer.
#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct ProviderBinding {
    #[n(0)]
    pub provider: String,
    #[n(1)]
    pub external_id: String,
    #[n(2)]
    pub external_status: Option<String>,
    #[n(3)]
    pub synced_at: Option<TimeStamp<Utc>>,
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct SignedContract {
    #[n(0)]
    pub contract_id: String, // bech32 uuid7
    #[n(1)]
    pub subscriber_id: String,
    #[n(2)]
    pub template_id: String, // frozen reference, survives template evolution
    #[n(3)]
    pub template_version: String,
    #[n(4)]
    pub title: String,
    #[n(5)]
    pub content: String, // rendered at initiation
    #[n(6)]
    pub placeholder_values: BTreeMap<String, String>,
    #[n(7)]
    pub status: ContractStatus,
    #[n(8)]
    pub signers: Vec<Signer>,
    #[n(9)]
    pub dates: ContractDates,
    #[n(10)]
    pub security: SecurityInfo,
    #[n(11)]
    pub integration: Option<ProviderBinding>,
    #[n(12)]
    pub jurisdiction: String,
    #[n(13)]
    pub governing_law: String,
    #[n(14)]
    pub void_reason: Option<String>,
    #[n(15)]
    pub voided_by: Option<String>,
    #[n(16)]
    pub revision: u64, // optimistic concurrency counter
}

impl SignedContract {
    pub fn signer(&self, signer_id: &str) -> Option<&Signer> {
        self.signers.iter().find(|s| s.signer_id == signer_id)
    }

    pub fn signer_mut(&mut self, signer_id: &str) -> Option<&mut Signer> {
        self.signers.iter_mut().find(|s| s.signer_id == signer_id)
    }

    pub fn signed_count(&self) -> usize {
        self.signers
            .iter()
            .filter(|s| s.status == SignerStatus::Signed)
            .count()
    }

    /// The all-or-nothing completion check. Order of signing is irrelevant,
    /// only the conjunction matters.
    pub fn all_signed(&self) -> bool {
        !self.signers.is_empty() && self.signed_count() == self.signers.len()
    }

    pub fn is_past_expiry(&self, now: &TimeStamp<Utc>) -> bool {
        self.dates
            .expires
            .as_ref()
            .is_some_and(|expires| now.to_datetime_utc() > expires.to_datetime_utc())
    }

    pub fn touch(&mut self, now: TimeStamp<Utc>) {
        self.dates.last_activity = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_cbor_roundtrip() {
        let original = TimeStamp::new();

        let encoded = minicbor::to_vec(&original).unwrap();
        let decoded: TimeStamp<Utc> = minicbor::decode(&encoded).unwrap();

        assert_eq!(original, decoded);
    }

    #[test]
    fn signer_status_never_regresses() {
        assert!(SignerStatus::Pending.can_advance_to(SignerStatus::Sent));
        assert!(SignerStatus::Sent.can_advance_to(SignerStatus::Opened));
        assert!(SignerStatus::Opened.can_advance_to(SignerStatus::Signed));

        assert!(!SignerStatus::Opened.can_advance_to(SignerStatus::Sent));
        assert!(!SignerStatus::Signed.can_advance_to(SignerStatus::Declined));
        assert!(!SignerStatus::Declined.can_advance_to(SignerStatus::Signed));
        assert!(!SignerStatus::Expired.can_advance_to(SignerStatus::Opened));
    }

    #[test]
    fn all_signed_requires_every_signer() {
        let mut contract = test_contract(2);
        assert!(!contract.all_signed());

        contract.signers[0].status = SignerStatus::Signed;
        assert!(!contract.all_signed());

        contract.signers[1].status = SignerStatus::Signed;
        assert!(contract.all_signed());
    }

    #[test]
    fn expiry_comparison_is_strict() {
        let now = TimeStamp::new_with(2026, 3, 1, 12, 0, 0);
        let mut contract = test_contract(1);

        contract.dates.expires = Some(TimeStamp::new_with(2026, 3, 1, 12, 0, 0));
        assert!(!contract.is_past_expiry(&now));

        contract.dates.expires = Some(TimeStamp::new_with(2026, 2, 28, 0, 0, 0));
        assert!(contract.is_past_expiry(&now));
    }

    fn test_contract(signers: usize) -> SignedContract {
        let signers = (0..signers)
            .map(|i| {
                Signer::new(
                    format!("signer_{i}"),
                    format!("Signer {i}"),
                    format!("signer{i}@example.com"),
                    i as u32,
                    format!("ref_{i}"),
                )
            })
            .collect();

        SignedContract {
            contract_id: "contract_test".into(),
            subscriber_id: "subscriber_test".into(),
            template_id: "template_test".into(),
            template_version: "1.0.0".into(),
            title: "Test".into(),
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
}
