//! Smoke screen unit tests for signing engine components
//!
//! These tests span the codebase, testing behavior in isolation from
//! integration scenarios. They are intended as smoke-screen and generally
//! test the happy path.

use contract_signing::{
    contract::{ContractStatus, HashAlgorithm, SignerStatus},
    error::{FieldViolation, SigningError},
    evidence::{classify_device, DeviceClass},
    integrity::hash_content,
    notify::{NotificationKind, Notifier, NullNotifier},
    utils::{bump_major_version, new_uuid_to_bech32},
};

// UTILS MODULE TESTS
#[cfg(test)]
mod utils_tests {
    use super::*;

    /// Generated ids carry the human-readable prefix and are unique
    #[test]
    fn ids_are_prefixed_and_unique() {
        let a = new_uuid_to_bech32("contract_").unwrap();
        let b = new_uuid_to_bech32("contract_").unwrap();
        let c = new_uuid_to_bech32("signer_").unwrap();

        assert!(a.starts_with("contract_1"));
        assert!(c.starts_with("signer_1"));
        assert_ne!(a, b);
    }

    /// Empty prefixes are rejected
    #[test]
    fn empty_prefix_fails() {
        assert!(new_uuid_to_bech32("").is_err());
    }

    #[test]
    fn version_bump_rolls_major() {
        assert_eq!(bump_major_version("1.0.0"), "2.0.0");
        assert_eq!(bump_major_version("2.7.13"), "3.0.0");
    }
}

// STATUS VOCABULARY TESTS
#[cfg(test)]
mod status_tests {
    use super::*;

    #[test]
    fn contract_status_tags_are_stable() {
        assert_eq!(ContractStatus::PartiallySigned.as_str(), "partially_signed");
        assert_eq!(ContractStatus::FullySigned.as_str(), "fully_signed");
        assert_eq!(ContractStatus::Voided.as_str(), "voided");
    }

    #[test]
    fn sealed_and_terminal_are_disjoint() {
        for status in [
            ContractStatus::Draft,
            ContractStatus::Sent,
            ContractStatus::PartiallySigned,
            ContractStatus::FullySigned,
            ContractStatus::Completed,
            ContractStatus::Declined,
            ContractStatus::Expired,
            ContractStatus::Voided,
        ] {
            assert!(!(status.is_sealed() && status.is_terminal()));
        }
    }

    #[test]
    fn signer_terminal_states() {
        assert!(SignerStatus::Signed.is_terminal());
        assert!(SignerStatus::Declined.is_terminal());
        assert!(SignerStatus::Expired.is_terminal());
        assert!(!SignerStatus::Opened.is_terminal());
    }
}

// EVIDENCE MODULE TESTS
#[cfg(test)]
mod evidence_tests {
    use super::*;

    #[test]
    fn device_classification_happy_paths() {
        let ua = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) Firefox/120.0";
        let device = classify_device(ua);
        assert_eq!(device.class, DeviceClass::Desktop);
        assert_eq!(device.os.as_deref(), Some("macos"));
        assert_eq!(device.browser.as_deref(), Some("firefox"));
    }

    #[test]
    fn android_phone_vs_tablet() {
        let phone = classify_device("Mozilla/5.0 (Linux; Android 14; Pixel 8) Mobile Safari/537.36");
        assert_eq!(phone.class, DeviceClass::Mobile);

        let tablet = classify_device("Mozilla/5.0 (Linux; Android 14; SM-X910) Safari/537.36");
        assert_eq!(tablet.class, DeviceClass::Tablet);
    }
}

// INTEGRITY MODULE TESTS
#[cfg(test)]
mod integrity_tests {
    use super::*;

    /// Hashing the same content twice yields the same digest
    #[test]
    fn hashing_is_stable() {
        let a = hash_content(HashAlgorithm::Sha256, "agreement body");
        let b = hash_content(HashAlgorithm::Sha256, "agreement body");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn different_content_different_hash() {
        let a = hash_content(HashAlgorithm::Sha256, "agreement body");
        let b = hash_content(HashAlgorithm::Sha256, "agreement body v2");
        assert_ne!(a, b);
    }
}

// ERROR TAXONOMY TESTS
#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn kinds_are_stable_tags() {
        let err = SigningError::NotFound {
            resource: "contract",
            id: "contract_x".into(),
        };
        assert_eq!(err.kind(), "not_found");

        let err = SigningError::ConsentRequired {
            consent_id: "terms".into(),
        };
        assert_eq!(err.kind(), "consent_required");
        assert!(err.to_string().contains("terms"));

        let err = SigningError::Provider {
            provider: "docusign".into(),
            message: "429 too many requests".into(),
        };
        assert_eq!(err.kind(), "provider_error");
        assert!(err.to_string().contains("docusign"));
    }

    #[test]
    fn validation_error_keeps_all_violations() {
        let err = SigningError::ValidationFailed {
            violations: vec![
                FieldViolation {
                    field: "a".into(),
                    message: "bad".into(),
                },
                FieldViolation {
                    field: "b".into(),
                    message: "worse".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 field(s)"));
        assert!(msg.contains("a: bad"));
        assert!(msg.contains("b: worse"));
    }
}

// NOTIFY MODULE TESTS
#[cfg(test)]
mod notify_tests {
    use super::*;
    use std::collections::BTreeMap;

    /// The null notifier accepts anything without effect
    #[test]
    fn null_notifier_is_inert() {
        let notifier = NullNotifier;
        notifier.notify(
            NotificationKind::SignatureRequested,
            "someone@example.com",
            &BTreeMap::new(),
        );
        assert_eq!(NotificationKind::ContractVoided.as_str(), "contract_voided");
    }
}
