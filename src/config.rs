//! Client configuration
//!
//! Defaults suit a local platform deployment; override fields directly, from
//! a serde source, or from `OPENTDF_*` environment variables.

use crate::error::TdfError;
use opentdf_crypto::{IntegrityAlgorithm, TagSize};
use serde::{Deserialize, Deserializer};

/// Default plaintext segment size for TDF3 (1 MiB)
pub const DEFAULT_SEGMENT_SIZE: u64 = 1024 * 1024;

/// Upper bound on dataset key iterations
pub const MAX_KEY_ITERATIONS: u32 = 8_388_606;

/// Default HTTP timeout for KAS round trips
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub kas_url: String,
    pub segment_size: u64,
    #[serde(deserialize_with = "integrity_from_str")]
    pub integrity_algorithm: IntegrityAlgorithm,
    #[serde(deserialize_with = "integrity_from_str")]
    pub segment_integrity_algorithm: IntegrityAlgorithm,
    /// Cap on total TDF3 archive bytes emitted
    pub byte_limit: Option<u64>,
    pub http_timeout_secs: u64,
    pub max_key_iterations: u32,
    /// NanoTDF payload tag length in bits (96..=128)
    pub tag_bits: u16,
    pub mime_type: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            kas_url: "http://localhost:8080/kas".to_string(),
            segment_size: DEFAULT_SEGMENT_SIZE,
            integrity_algorithm: IntegrityAlgorithm::Hs256,
            segment_integrity_algorithm: IntegrityAlgorithm::Hs256,
            byte_limit: None,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            max_key_iterations: MAX_KEY_ITERATIONS,
            tag_bits: 128,
            mime_type: None,
        }
    }
}

fn integrity_from_str<'de, D>(deserializer: D) -> Result<IntegrityAlgorithm, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    name.parse().map_err(serde::de::Error::custom)
}

impl ClientConfig {
    pub fn new(kas_url: impl Into<String>) -> Self {
        Self {
            kas_url: kas_url.into(),
            ..Self::default()
        }
    }

    /// Defaults overlaid with `OPENTDF_KAS_URL`, `OPENTDF_SEGMENT_SIZE`,
    /// `OPENTDF_BYTE_LIMIT` and `OPENTDF_HTTP_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self, TdfError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, TdfError> {
        let mut config = Self::default();
        if let Some(url) = lookup("OPENTDF_KAS_URL") {
            config.kas_url = url;
        }
        if let Some(size) = lookup("OPENTDF_SEGMENT_SIZE") {
            config.segment_size = parse_number("OPENTDF_SEGMENT_SIZE", &size)?;
        }
        if let Some(limit) = lookup("OPENTDF_BYTE_LIMIT") {
            config.byte_limit = Some(parse_number("OPENTDF_BYTE_LIMIT", &limit)?);
        }
        if let Some(secs) = lookup("OPENTDF_HTTP_TIMEOUT_SECS") {
            config.http_timeout_secs = parse_number("OPENTDF_HTTP_TIMEOUT_SECS", &secs)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TdfError> {
        if self.kas_url.is_empty() {
            return Err(TdfError::Config("kas_url must not be empty".to_string()));
        }
        if self.segment_size == 0 {
            return Err(TdfError::Config("segment_size must be positive".to_string()));
        }
        if self.segment_size > u64::from(u32::MAX) {
            return Err(TdfError::Config(format!(
                "segment_size {} exceeds the zip32 entry limit",
                self.segment_size
            )));
        }
        if self.max_key_iterations == 0 || self.max_key_iterations > MAX_KEY_ITERATIONS {
            return Err(TdfError::Config(format!(
                "max_key_iterations must be in 1..={MAX_KEY_ITERATIONS}, got {}",
                self.max_key_iterations
            )));
        }
        self.tag_size()?;
        Ok(())
    }

    pub fn tag_size(&self) -> Result<TagSize, TdfError> {
        if self.tag_bits % 8 != 0 {
            return Err(TdfError::Config(format!("tag_bits {} is not whole bytes", self.tag_bits)));
        }
        TagSize::from_bytes(usize::from(self.tag_bits / 8))
            .map_err(|e| TdfError::Config(e.to_string()))
    }

    pub fn http_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.http_timeout_secs)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, TdfError> {
    value
        .trim()
        .parse()
        .map_err(|_| TdfError::Config(format!("{name} is not a number: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.segment_size, 1024 * 1024);
        assert_eq!(config.tag_size().unwrap(), TagSize::Bits128);
        assert_eq!(config.integrity_algorithm, IntegrityAlgorithm::Hs256);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("OPENTDF_KAS_URL", "https://kas.example.com"),
            ("OPENTDF_SEGMENT_SIZE", "4096"),
            ("OPENTDF_BYTE_LIMIT", "100000"),
        ]
        .into_iter()
        .collect();
        let config =
            ClientConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.kas_url, "https://kas.example.com");
        assert_eq!(config.segment_size, 4096);
        assert_eq!(config.byte_limit, Some(100_000));
        assert_eq!(config.http_timeout_secs, 30);
    }

    #[test]
    fn test_bad_values_rejected() {
        let bad = ClientConfig::from_lookup(|name| {
            (name == "OPENTDF_SEGMENT_SIZE").then(|| "lots".to_string())
        });
        assert!(matches!(bad, Err(TdfError::Config(_))));

        let config = ClientConfig {
            max_key_iterations: MAX_KEY_ITERATIONS + 1,
            ..ClientConfig::default()
        };
        assert!(matches!(config.validate(), Err(TdfError::Config(_))));

        let config = ClientConfig {
            tag_bits: 64,
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"kas_url":"https://kas","segment_integrity_algorithm":"GMAC"}"#,
        )
        .unwrap();
        assert_eq!(config.segment_integrity_algorithm, IntegrityAlgorithm::Gmac);
        assert_eq!(config.segment_size, DEFAULT_SEGMENT_SIZE);
    }
}
