//! Business identity carried by ICP-Brasil certificates.
//!
//! Company certificates encode `"<Legal Name>:<CNPJ>"` in the subject
//! common name. Many real certificates deviate, so extraction never
//! fails: missing parts come back empty and the caller decides.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::bundle::CertificateBundle;

/// A run of exactly 14 digits.
static TAX_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^0-9])([0-9]{14})(?:[^0-9]|$)").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Unformatted 14-digit CNPJ, or empty.
    pub tax_id: String,
    /// Legal name (razão social), or empty.
    pub legal_name: String,
    /// Issuer common name, or empty.
    pub issuer_name: String,
    /// Serial number, uppercase hex.
    pub serial_number: String,
}

impl Identity {
    pub fn from_common_names(
        subject_cn: Option<&str>,
        issuer_cn: Option<&str>,
        serial_number: String,
    ) -> Self {
        let (tax_id, legal_name) = subject_cn.map(split_subject).unwrap_or_default();
        Self {
            tax_id,
            legal_name,
            issuer_name: issuer_cn.map(str::trim).unwrap_or_default().to_string(),
            serial_number,
        }
    }

    pub fn has_tax_id(&self) -> bool {
        !self.tax_id.is_empty()
    }

    /// CNPJ in the `XX.XXX.XXX/XXXX-XX` display form.
    pub fn formatted_tax_id(&self) -> Option<String> {
        format_cnpj(&self.tax_id)
    }
}

/// Derive the identity of the bundle's leaf certificate.
pub fn extract(bundle: &CertificateBundle) -> Identity {
    let subject = bundle.subject_common_name();
    let issuer = bundle.issuer_common_name();
    Identity::from_common_names(
        subject.as_deref(),
        issuer.as_deref(),
        bundle.serial_number().to_string(),
    )
}

fn split_subject(cn: &str) -> (String, String) {
    let Some(caps) = TAX_ID_RE.captures(cn) else {
        return (String::new(), String::new());
    };
    let tax_id = caps[1].to_string();
    let legal_name = cn
        .split_once(':')
        .map(|(name, _)| name.trim().to_string())
        .unwrap_or_default();
    (tax_id, legal_name)
}

/// Format a 14-digit CNPJ; `None` for anything else.
pub fn format_cnpj(digits: &str) -> Option<String> {
    if digits.len() != 14 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(format!(
        "{}.{}.{}/{}-{}",
        &digits[0..2],
        &digits[2..5],
        &digits[5..8],
        &digits[8..12],
        &digits[12..14]
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(cn: &str) -> Identity {
        Identity::from_common_names(Some(cn), Some("AC SOLUTI Multipla v5"), "0A".into())
    }

    #[test]
    fn splits_conventional_subject() {
        let id = identity("ACME INDUSTRIA LTDA:12345678000195");
        assert_eq!(id.tax_id, "12345678000195");
        assert_eq!(id.legal_name, "ACME INDUSTRIA LTDA");
        assert_eq!(id.issuer_name, "AC SOLUTI Multipla v5");
        assert_eq!(id.serial_number, "0A");
    }

    #[test]
    fn trims_legal_name() {
        let id = identity("  PADARIA BOM PAO ME : 98765432000110");
        assert_eq!(id.legal_name, "PADARIA BOM PAO ME");
        assert_eq!(id.tax_id, "98765432000110");
    }

    #[test]
    fn personal_certificate_has_no_tax_id() {
        // e-CPF subjects carry an 11-digit CPF.
        let id = identity("JOAO DA SILVA:12345678901");
        assert!(!id.has_tax_id());
        assert!(id.legal_name.is_empty());
    }

    #[test]
    fn longer_digit_runs_are_not_tax_ids() {
        let id = identity("EMPRESA:123456780001959");
        assert!(!id.has_tax_id());
    }

    #[test]
    fn missing_separator_keeps_tax_id_only() {
        let id = identity("EMPRESA 12345678000195");
        assert_eq!(id.tax_id, "12345678000195");
        assert!(id.legal_name.is_empty());
    }

    #[test]
    fn missing_common_names_are_empty() {
        let id = Identity::from_common_names(None, None, "01".into());
        assert!(id.tax_id.is_empty());
        assert!(id.legal_name.is_empty());
        assert!(id.issuer_name.is_empty());
    }

    #[test]
    fn formats_cnpj() {
        assert_eq!(
            format_cnpj("12345678000195").as_deref(),
            Some("12.345.678/0001-95")
        );
        assert_eq!(format_cnpj("1234"), None);
        assert_eq!(format_cnpj("1234567800019A"), None);
    }
}
