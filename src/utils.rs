//! Utility functions for id minting and version strings

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Bump the major component of a `major.minor.patch` version string.
/// `"1.2.3"` becomes `"2.0.0"`. Unparseable input falls back to `"1.0.0"`.
pub fn bump_major_version(version: &str) -> String {
    let major = version
        .split('.')
        .next()
        .and_then(|m| m.parse::<u64>().ok())
        .unwrap_or(0);

    format!("{}.0.0", major + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bech32_id_carries_prefix() {
        let id = new_uuid_to_bech32("contract_").unwrap();
        assert!(id.starts_with("contract_1"));
        assert!(id.len() > 10);
    }

    #[test]
    fn bech32_rejects_empty_hrp() {
        assert!(new_uuid_to_bech32("").is_err());
    }

    #[test]
    fn major_bump_resets_minor_and_patch() {
        assert_eq!(bump_major_version("1.2.3"), "2.0.0");
        assert_eq!(bump_major_version("3.0.0"), "4.0.0");
        assert_eq!(bump_major_version("garbage"), "1.0.0");
    }
}
