//! Signing service configuration.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use nfsig_pki::DEFAULT_SIGNABLE_ELEMENTS;

use crate::error::ServiceError;

/// Configuration for the certificate service.
#[derive(Clone)]
pub struct SigningConfig {
    /// 256-bit AES-GCM key for the container and passphrase at rest.
    /// Required: the service refuses to start without it.
    pub secret_key: Option<[u8; 32]>,
    /// Certificates with fewer remaining days are reported as expiring
    /// soon (default: 30).
    pub expiring_threshold_days: i64,
    /// Largest accepted PKCS#12 upload in bytes (default: 5 MiB).
    pub max_container_bytes: usize,
    /// Reject certificates whose subject carries no 14-digit tax id.
    pub require_tax_id: bool,
    /// Local names of the elements [`sign`](crate::CertificateService::sign)
    /// looks for; the first match in document order is signed.
    pub signable_elements: Vec<String>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            expiring_threshold_days: 30,
            max_container_bytes: 5 * 1024 * 1024,
            require_tax_id: true,
            signable_elements: DEFAULT_SIGNABLE_ELEMENTS
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }
}

impl SigningConfig {
    /// Read `NFSIG_*` variables on top of the defaults.
    ///
    /// `NFSIG_SECRET_KEY` must be the base64 encoding of exactly 32 bytes.
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ServiceError> {
        let mut config = Self::default();

        let encoded = lookup("NFSIG_SECRET_KEY")
            .ok_or_else(|| ServiceError::Configuration("NFSIG_SECRET_KEY is not set".into()))?;
        config.secret_key = Some(parse_key(&encoded)?);

        if let Some(days) = lookup("NFSIG_EXPIRING_DAYS") {
            config.expiring_threshold_days = parse_number("NFSIG_EXPIRING_DAYS", &days)?;
        }
        if let Some(bytes) = lookup("NFSIG_MAX_CONTAINER_BYTES") {
            config.max_container_bytes = parse_number("NFSIG_MAX_CONTAINER_BYTES", &bytes)?;
        }
        if let Some(flag) = lookup("NFSIG_REQUIRE_TAX_ID") {
            config.require_tax_id = match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ServiceError::Configuration(format!(
                        "NFSIG_REQUIRE_TAX_ID: expected a boolean, got `{flag}`"
                    )));
                }
            };
        }
        if let Some(list) = lookup("NFSIG_SIGNABLE_ELEMENTS") {
            let names: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(String::from)
                .collect();
            if names.is_empty() {
                return Err(ServiceError::Configuration(
                    "NFSIG_SIGNABLE_ELEMENTS names no element".into(),
                ));
            }
            config.signable_elements = names;
        }

        Ok(config)
    }
}

fn parse_key(encoded: &str) -> Result<[u8; 32], ServiceError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ServiceError::Configuration(format!("NFSIG_SECRET_KEY: {e}")))?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
        ServiceError::Configuration(format!(
            "NFSIG_SECRET_KEY must decode to 32 bytes, got {}",
            bytes.len()
        ))
    })
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ServiceError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ServiceError::Configuration(format!("{name}: {e}")))
}

impl std::fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningConfig")
            .field("secret_key", &self.secret_key.map(|_| "***"))
            .field("expiring_threshold_days", &self.expiring_threshold_days)
            .field("max_container_bytes", &self.max_container_bytes)
            .field("require_tax_id", &self.require_tax_id)
            .field("signable_elements", &self.signable_elements)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> Result<SigningConfig, ServiceError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SigningConfig::from_lookup(|key| vars.get(key).cloned())
    }

    fn key_b64() -> String {
        STANDARD.encode([7u8; 32])
    }

    #[test]
    fn defaults_apply_when_only_the_key_is_set() {
        let config = lookup(&[("NFSIG_SECRET_KEY", key_b64().as_str())]).unwrap();
        assert_eq!(config.secret_key, Some([7u8; 32]));
        assert_eq!(config.expiring_threshold_days, 30);
        assert_eq!(config.max_container_bytes, 5 * 1024 * 1024);
        assert!(config.require_tax_id);
        assert!(config.signable_elements.iter().any(|e| e == "infNFe"));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = lookup(&[
            ("NFSIG_SECRET_KEY", key_b64().as_str()),
            ("NFSIG_EXPIRING_DAYS", "45"),
            ("NFSIG_MAX_CONTAINER_BYTES", "1024"),
            ("NFSIG_REQUIRE_TAX_ID", "false"),
            ("NFSIG_SIGNABLE_ELEMENTS", "infDoc, infNFe ,"),
        ])
        .unwrap();
        assert_eq!(config.expiring_threshold_days, 45);
        assert_eq!(config.max_container_bytes, 1024);
        assert!(!config.require_tax_id);
        assert_eq!(config.signable_elements, vec!["infDoc", "infNFe"]);
    }

    #[test]
    fn missing_key_is_an_error() {
        let err = lookup(&[]).unwrap_err();
        assert!(matches!(err, ServiceError::Configuration(_)));
    }

    #[test]
    fn short_key_is_an_error() {
        let err = lookup(&[("NFSIG_SECRET_KEY", STANDARD.encode([1u8; 16]).as_str())]).unwrap_err();
        assert!(matches!(err, ServiceError::Configuration(_)));
    }

    #[test]
    fn bad_numbers_are_errors() {
        let err = lookup(&[
            ("NFSIG_SECRET_KEY", key_b64().as_str()),
            ("NFSIG_EXPIRING_DAYS", "thirty"),
        ])
        .unwrap_err();
        assert!(matches!(err, ServiceError::Configuration(_)));
    }

    #[test]
    fn debug_hides_the_key() {
        let config = lookup(&[("NFSIG_SECRET_KEY", key_b64().as_str())]).unwrap();
        let rendered = format!("{config:?}");
        assert!(rendered.contains("***"));
        assert!(!rendered.contains("[7, 7"));
    }
}
