//! Per-signer tamper evidence
//!
//! Everything captured here supports non-repudiation: device and network
//! origin, geolocation with its legal basis, interaction telemetry, and an
//! append-only access log. Entries are only ever appended; scalar metrics
//! follow the merge rules in [`SignerEvidence::merge`]. Evidence is
//! best-effort: its absence never invalidates an accepted signature.

use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::Utc;
use serde::Serialize;

use super::contract::TimeStamp;

#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    #[n(0)]
    Desktop,
    #[n(1)]
    Mobile,
    #[n(2)]
    Tablet,
    #[n(3)]
    Bot,
    #[n(4)]
    Unknown,
}

#[derive(Debug, PartialEq, Eq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct DeviceInfo {
    #[n(0)]
    pub class: DeviceClass,
    #[n(1)]
    pub os: Option<String>,
    #[n(2)]
    pub browser: Option<String>,
}

/// Best-effort classification from the declared user-agent string. The
/// declared UA is evidence, not truth; it is stored verbatim alongside.
pub fn classify_device(user_agent: &str) -> DeviceInfo {
    let ua = user_agent.to_ascii_lowercase();

    if ua.is_empty() {
        return DeviceInfo {
            class: DeviceClass::Unknown,
            os: None,
            browser: None,
        };
    }

    let class = if ["bot", "crawler", "spider", "curl"]
        .iter()
        .any(|m| ua.contains(m))
    {
        DeviceClass::Bot
    } else if ua.contains("ipad") || ua.contains("tablet") {
        DeviceClass::Tablet
    } else if ua.contains("android") && !ua.contains("mobile") {
        // Android without the Mobile token is the tablet form factor
        DeviceClass::Tablet
    } else if ua.contains("mobi") || ua.contains("iphone") || ua.contains("android") {
        DeviceClass::Mobile
    } else {
        DeviceClass::Desktop
    };

    let os = if ua.contains("iphone") || ua.contains("ipad") {
        Some("ios")
    } else if ua.contains("android") {
        Some("android")
    } else if ua.contains("windows") {
        Some("windows")
    } else if ua.contains("mac os") || ua.contains("macintosh") {
        Some("macos")
    } else if ua.contains("linux") {
        Some("linux")
    } else {
        None
    };

    let browser = if ua.contains("edg/") || ua.contains("edge") {
        Some("edge")
    } else if ua.contains("firefox") {
        Some("firefox")
    } else if ua.contains("chrome") || ua.contains("crios") {
        Some("chrome")
    } else if ua.contains("safari") {
        Some("safari")
    } else {
        None
    };

    DeviceInfo {
        class,
        os: os.map(str::to_string),
        browser: browser.map(str::to_string),
    }
}

/// Legal basis under which the geolocation record was captured.
#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LegalBasis {
    #[n(0)]
    NotRecorded,
    #[n(1)]
    Consent,
    #[n(2)]
    Contract,
    #[n(3)]
    LegitimateInterest,
}

#[derive(Debug, PartialEq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct GeoRecord {
    #[n(0)]
    pub country: Option<String>,
    #[n(1)]
    pub region: Option<String>,
    #[n(2)]
    pub city: Option<String>,
    #[n(3)]
    pub latitude: Option<f64>,
    #[n(4)]
    pub longitude: Option<f64>,
    #[n(5)]
    pub legal_basis: LegalBasis,
    #[n(6)]
    pub consent_given: bool,
}

/// Network-origin geolocation seam. Resolution is an external concern; the
/// engine only decides whether an origin is eligible for lookup.
pub trait GeoLocator: Send + Sync {
    fn locate(&self, ip: IpAddr) -> Option<GeoRecord>;
}

/// Default locator: records nothing.
pub struct NoGeoLocator;

impl GeoLocator for NoGeoLocator {
    fn locate(&self, _ip: IpAddr) -> Option<GeoRecord> {
        None
    }
}

/// Private, loopback and link-local origins are never sent to a locator.
pub fn is_private_origin(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique-local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                // fe80::/10 link-local
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Resolve geolocation for a textual origin address. Unparseable or private
/// origins short-circuit to `None` without consulting the locator.
pub fn resolve_geolocation(ip: &str, locator: &dyn GeoLocator) -> Option<GeoRecord> {
    let parsed: IpAddr = ip.parse().ok()?;
    if is_private_origin(parsed) {
        return None;
    }
    locator.locate(parsed)
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessAction {
    #[n(0)]
    SessionStarted,
    #[n(1)]
    SessionResumed,
    #[n(2)]
    EvidenceSubmitted,
    #[n(3)]
    ConsentUpdated,
    #[n(4)]
    SignatureCompleted,
    #[n(5)]
    SignatureDeclined,
    #[n(6)]
    LinkResent,
}

#[derive(Debug, PartialEq, Eq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct AccessLogEntry {
    #[n(0)]
    pub at: TimeStamp<Utc>,
    #[n(1)]
    pub action: AccessAction,
    #[n(2)]
    pub detail: Option<String>,
}

#[derive(Debug, PartialEq, Clone, Copy, minicbor::Encode, minicbor::Decode)]
pub struct MouseSample {
    #[n(0)]
    pub x: i32,
    #[n(1)]
    pub y: i32,
    #[n(2)]
    pub at_ms: u64,
}

// Key content is never captured, only timing.
#[derive(Debug, PartialEq, Clone, Copy, minicbor::Encode, minicbor::Decode)]
pub struct KeystrokeSample {
    #[n(0)]
    pub at_ms: u64,
    #[n(1)]
    pub dwell_ms: u32,
}

#[derive(Debug, Clone, Default, minicbor::Encode, minicbor::Decode)]
pub struct InteractionTelemetry {
    #[n(0)]
    pub mouse_samples: Vec<MouseSample>,
    #[n(1)]
    pub keystroke_samples: Vec<KeystrokeSample>,
    #[n(2)]
    pub scroll_depth_percent: u8, // monotonically maxed, never lowered
    #[n(3)]
    pub time_on_page_secs: u64, // latest report wins
}

/// What a signing client reports during an active session.
#[derive(Debug, Clone, Default)]
pub struct EvidencePayload {
    pub mouse_samples: Vec<MouseSample>,
    pub keystroke_samples: Vec<KeystrokeSample>,
    pub scroll_depth_percent: Option<u8>,
    pub time_on_page_secs: Option<u64>,
    pub geo_consent_given: Option<bool>,
    pub geo_legal_basis: Option<LegalBasis>,
    pub biometric: BTreeMap<String, String>,
}

/// Incoming request context from the transport layer (already
/// authenticated; the engine never sees credentials).
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub ip: String,
    pub user_agent: String,
    pub header_hints: BTreeMap<String, String>,
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct SignerEvidence {
    #[n(0)]
    pub ip: String,
    #[n(1)]
    pub user_agent: String,
    #[n(2)]
    pub device: DeviceInfo,
    #[n(3)]
    pub geolocation: Option<GeoRecord>,
    #[n(4)]
    pub session_id: String,
    #[n(5)]
    pub telemetry: InteractionTelemetry,
    #[n(6)]
    pub biometric: BTreeMap<String, String>,
    #[n(7)]
    pub access_log: Vec<AccessLogEntry>,
}

impl SignerEvidence {
    /// Initialize evidence at first session start, with the opening
    /// `session_started` log entry already appended.
    pub fn begin(
        ctx: &RequestContext,
        session_id: String,
        geolocation: Option<GeoRecord>,
        now: TimeStamp<Utc>,
    ) -> Self {
        let mut evidence = Self {
            ip: ctx.ip.clone(),
            user_agent: ctx.user_agent.clone(),
            device: classify_device(&ctx.user_agent),
            geolocation,
            session_id,
            telemetry: InteractionTelemetry::default(),
            biometric: BTreeMap::new(),
            access_log: vec![],
        };
        evidence.log(AccessAction::SessionStarted, None, now);
        evidence
    }

    pub fn log(&mut self, action: AccessAction, detail: Option<String>, at: TimeStamp<Utc>) {
        self.access_log.push(AccessLogEntry { at, action, detail });
    }

    /// Merge a telemetry payload: arrays append, scroll depth only grows,
    /// time-on-page takes the latest report, geolocation consent fields may
    /// be updated, biometric entries merge by key.
    pub fn merge(&mut self, payload: EvidencePayload, now: TimeStamp<Utc>) {
        self.telemetry.mouse_samples.extend(payload.mouse_samples);
        self.telemetry
            .keystroke_samples
            .extend(payload.keystroke_samples);

        if let Some(depth) = payload.scroll_depth_percent {
            let depth = depth.min(100);
            if depth > self.telemetry.scroll_depth_percent {
                self.telemetry.scroll_depth_percent = depth;
            }
        }
        if let Some(secs) = payload.time_on_page_secs {
            self.telemetry.time_on_page_secs = secs;
        }

        let consent_touched = payload.geo_consent_given.is_some() || payload.geo_legal_basis.is_some();
        if let Some(geo) = &mut self.geolocation {
            if let Some(given) = payload.geo_consent_given {
                geo.consent_given = given;
            }
            if let Some(basis) = payload.geo_legal_basis {
                geo.legal_basis = basis;
            }
        }

        for (key, value) in payload.biometric {
            self.biometric.insert(key, value);
        }

        self.log(AccessAction::EvidenceSubmitted, None, now.clone());
        if consent_touched && self.geolocation.is_some() {
            self.log(AccessAction::ConsentUpdated, Some("geolocation".into()), now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_user_agents() {
        let desktop = classify_device(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/120.0 Safari/537.36",
        );
        assert_eq!(desktop.class, DeviceClass::Desktop);
        assert_eq!(desktop.os.as_deref(), Some("windows"));
        assert_eq!(desktop.browser.as_deref(), Some("chrome"));

        let phone = classify_device(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Version/17.0 Mobile/15E148 Safari/604.1",
        );
        assert_eq!(phone.class, DeviceClass::Mobile);
        assert_eq!(phone.os.as_deref(), Some("ios"));

        let tablet = classify_device("Mozilla/5.0 (Linux; Android 13; SM-X700) AppleWebKit/537.36");
        assert_eq!(tablet.class, DeviceClass::Tablet);

        let bot = classify_device("Googlebot/2.1 (+http://www.google.com/bot.html)");
        assert_eq!(bot.class, DeviceClass::Bot);

        assert_eq!(classify_device("").class, DeviceClass::Unknown);
    }

    #[test]
    fn private_origins_skip_geolocation() {
        struct AlwaysLocates;
        impl GeoLocator for AlwaysLocates {
            fn locate(&self, _ip: IpAddr) -> Option<GeoRecord> {
                Some(GeoRecord {
                    country: Some("GB".into()),
                    region: None,
                    city: None,
                    latitude: None,
                    longitude: None,
                    legal_basis: LegalBasis::LegitimateInterest,
                    consent_given: false,
                })
            }
        }

        assert!(resolve_geolocation("127.0.0.1", &AlwaysLocates).is_none());
        assert!(resolve_geolocation("10.1.2.3", &AlwaysLocates).is_none());
        assert!(resolve_geolocation("192.168.0.42", &AlwaysLocates).is_none());
        assert!(resolve_geolocation("::1", &AlwaysLocates).is_none());
        assert!(resolve_geolocation("not-an-ip", &AlwaysLocates).is_none());

        let hit = resolve_geolocation("203.0.113.9", &AlwaysLocates);
        assert_eq!(hit.unwrap().country.as_deref(), Some("GB"));
    }

    #[test]
    fn scroll_depth_never_decreases() {
        let ctx = RequestContext {
            ip: "203.0.113.9".into(),
            user_agent: "test".into(),
            header_hints: BTreeMap::new(),
        };
        let mut evidence =
            SignerEvidence::begin(&ctx, "session_1".into(), None, TimeStamp::new());

        evidence.merge(
            EvidencePayload {
                scroll_depth_percent: Some(60),
                ..Default::default()
            },
            TimeStamp::new(),
        );
        assert_eq!(evidence.telemetry.scroll_depth_percent, 60);

        evidence.merge(
            EvidencePayload {
                scroll_depth_percent: Some(30),
                time_on_page_secs: Some(45),
                ..Default::default()
            },
            TimeStamp::new(),
        );
        assert_eq!(evidence.telemetry.scroll_depth_percent, 60);
        assert_eq!(evidence.telemetry.time_on_page_secs, 45);
    }

    #[test]
    fn merge_appends_and_logs() {
        let ctx = RequestContext::default();
        let mut evidence =
            SignerEvidence::begin(&ctx, "session_1".into(), None, TimeStamp::new());
        assert_eq!(evidence.access_log.len(), 1);
        assert_eq!(evidence.access_log[0].action, AccessAction::SessionStarted);

        evidence.merge(
            EvidencePayload {
                mouse_samples: vec![MouseSample { x: 1, y: 2, at_ms: 10 }],
                keystroke_samples: vec![KeystrokeSample { at_ms: 20, dwell_ms: 80 }],
                ..Default::default()
            },
            TimeStamp::new(),
        );
        evidence.merge(
            EvidencePayload {
                mouse_samples: vec![MouseSample { x: 3, y: 4, at_ms: 30 }],
                ..Default::default()
            },
            TimeStamp::new(),
        );

        assert_eq!(evidence.telemetry.mouse_samples.len(), 2);
        assert_eq!(evidence.telemetry.keystroke_samples.len(), 1);
        assert_eq!(evidence.access_log.len(), 3);
    }
}
