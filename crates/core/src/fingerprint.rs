//! Device fingerprints: canonical hashing, component similarity, and the
//! coarse signals (network origin, device class) used by probabilistic
//! matching.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::hashing;

/// Raw components a fingerprint hash is computed from.
///
/// Every field is optional because browsers and SDKs expose different
/// subsets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintComponents {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub screen_resolution: Option<String>,
    pub timezone: Option<String>,
    pub language: Option<String>,
    pub platform: Option<String>,
}

/// Coarse device category derived from the user agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Mobile,
    Tablet,
    Desktop,
}

impl DeviceClass {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceClass::Mobile => "mobile",
            DeviceClass::Tablet => "tablet",
            DeviceClass::Desktop => "desktop",
        }
    }

    /// Classify a user-agent string. Returns `None` for empty input.
    pub fn from_user_agent(user_agent: &str) -> Option<Self> {
        let ua = user_agent.to_ascii_lowercase();
        if ua.trim().is_empty() {
            return None;
        }
        if ua.contains("ipad") || ua.contains("tablet") {
            Some(DeviceClass::Tablet)
        } else if ua.contains("mobi") || ua.contains("iphone") || ua.contains("android") {
            Some(DeviceClass::Mobile)
        } else {
            Some(DeviceClass::Desktop)
        }
    }
}

impl FingerprintComponents {
    fn fields(&self) -> [(&'static str, Option<&str>); 6] {
        [
            ("ip", self.ip_address.as_deref()),
            ("ua", self.user_agent.as_deref()),
            ("screen", self.screen_resolution.as_deref()),
            ("tz", self.timezone.as_deref()),
            ("lang", self.language.as_deref()),
            ("platform", self.platform.as_deref()),
        ]
    }

    /// True when no component is present.
    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(|(_, v)| v.is_none())
    }

    /// SHA-256 over `key=value` pairs of the present components, in a fixed
    /// order, trimmed and lower-cased. Returns `None` when no component is
    /// present.
    pub fn hash(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let canonical: Vec<String> = self
            .fields()
            .iter()
            .filter_map(|(k, v)| v.map(|v| format!("{k}={}", v.trim().to_lowercase())))
            .collect();
        Some(hashing::digest_fields(canonical.iter().map(String::as_str)))
    }

    /// Fraction of components present on both sides that are equal.
    ///
    /// Returns 1.0 when the two sides share no present component, since a
    /// matching hash is then the only evidence available.
    pub fn similarity(&self, other: &FingerprintComponents) -> f64 {
        let mut compared = 0u32;
        let mut equal = 0u32;
        for ((_, a), (_, b)) in self.fields().iter().zip(other.fields().iter()) {
            if let (Some(a), Some(b)) = (a, b) {
                compared += 1;
                if a.trim().eq_ignore_ascii_case(b.trim()) {
                    equal += 1;
                }
            }
        }
        if compared == 0 {
            1.0
        } else {
            f64::from(equal) / f64::from(compared)
        }
    }

    pub fn network_origin(&self) -> Option<String> {
        self.ip_address.as_deref().and_then(network_origin)
    }

    pub fn device_class(&self) -> Option<DeviceClass> {
        self.user_agent
            .as_deref()
            .and_then(DeviceClass::from_user_agent)
    }
}

/// Network prefix of an address: /24 for IPv4, /48 for IPv6.
pub fn network_origin(ip: &str) -> Option<String> {
    match ip.trim().parse::<IpAddr>().ok()? {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            Some(format!("{a}.{b}.{c}.0/24"))
        }
        IpAddr::V6(v6) => {
            let s = v6.segments();
            Some(format!("{:x}:{:x}:{:x}::/48", s[0], s[1], s[2]))
        }
    }
}
