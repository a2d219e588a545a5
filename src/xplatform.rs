//! Cross-platform account identifiers.
//!
//! Accounts are keyed by a `(platform, account id)` pair rendered as a stable
//! textual key such as `OVR-3963667097037078`. The rendered string is
//! canonical: parsing and re-rendering always produces the same text, which
//! makes it safe to use as a storage key.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// Platform codes understood by the relay, in wire order.
const PLATFORM_NAMES: &[(u64, &str)] = &[
    (1, "STM"),
    (2, "PSN"),
    (3, "XBX"),
    (4, "IOS"),
    (5, "AND"),
    (6, "DMO"),
    (7, "OVR"),
];

/// A platform-scoped account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct XPlatformId {
    pub platform_code: u64,
    pub account_id: u64,
}

impl XPlatformId {
    pub fn new(platform_code: u64, account_id: u64) -> Self {
        Self {
            platform_code,
            account_id,
        }
    }

    /// True when the platform code is one the relay understands.
    pub fn is_valid(&self) -> bool {
        PLATFORM_NAMES
            .iter()
            .any(|(code, _)| *code == self.platform_code)
    }

    fn platform_name(&self) -> Option<&'static str> {
        PLATFORM_NAMES
            .iter()
            .find(|(code, _)| *code == self.platform_code)
            .map(|(_, name)| *name)
    }
}

impl std::fmt::Display for XPlatformId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.platform_name() {
            Some(name) => write!(f, "{}-{}", name, self.account_id),
            None => write!(f, "UNK{}-{}", self.platform_code, self.account_id),
        }
    }
}

impl FromStr for XPlatformId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (platform, account) = s
            .split_once('-')
            .ok_or_else(|| format!("malformed account key: {s}"))?;

        let platform_code = PLATFORM_NAMES
            .iter()
            .find(|(_, name)| *name == platform)
            .map(|(code, _)| *code)
            .ok_or_else(|| format!("unknown platform in account key: {s}"))?;

        let account_id: u64 = account
            .parse()
            .map_err(|_| format!("malformed account id in account key: {s}"))?;

        Ok(Self {
            platform_code,
            account_id,
        })
    }
}

// Serialized as the canonical string so the identifier reads naturally in
// stored JSON and doubles as the account collection key.
impl Serialize for XPlatformId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for XPlatformId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_and_parse_round_trip() {
        let id = XPlatformId::new(7, 3963667097037078);
        let text = id.to_string();
        assert_eq!(text, "OVR-3963667097037078");
        assert_eq!(text.parse::<XPlatformId>().unwrap(), id);
    }

    #[test]
    fn test_rendered_string_is_canonical() {
        for (code, _) in PLATFORM_NAMES {
            let id = XPlatformId::new(*code, 12345);
            let reparsed: XPlatformId = id.to_string().parse().unwrap();
            assert_eq!(reparsed.to_string(), id.to_string());
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<XPlatformId>().is_err());
        assert!("OVR".parse::<XPlatformId>().is_err());
        assert!("ZZZ-123".parse::<XPlatformId>().is_err());
        assert!("OVR-notanumber".parse::<XPlatformId>().is_err());
    }

    #[test]
    fn test_unknown_platform_is_invalid() {
        assert!(!XPlatformId::new(99, 1).is_valid());
        assert!(XPlatformId::new(1, 1).is_valid());
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let id = XPlatformId::new(1, 42);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"STM-42\"");
        let back: XPlatformId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
