//! Notification seam
//!
//! The engine decides *that* a notification is due; delivery belongs to an
//! external collaborator. Fire-and-forget: a failed delivery must never fail
//! the signing operation that triggered it.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    SignatureRequested,
    SignatureReminder,
    ContractCompleted,
    ContractVoided,
    ContractDeclined,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SignatureRequested => "signature_requested",
            Self::SignatureReminder => "signature_reminder",
            Self::ContractCompleted => "contract_completed",
            Self::ContractVoided => "contract_voided",
            Self::ContractDeclined => "contract_declined",
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, kind: NotificationKind, to: &str, payload: &BTreeMap<String, String>);
}

/// Default collaborator: drops everything.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _kind: NotificationKind, _to: &str, _payload: &BTreeMap<String, String>) {}
}
