//! Enveloped XML-DSig signatures for fiscal documents.
//!
//! The signature is RSA-SHA1 over canonical `SignedInfo`, with one
//! reference to the signed element by `Id`, a SHA-1 digest and the
//! enveloped-signature and C14N 1.0 transforms. This is the profile the
//! Brazilian fiscal validators expect byte for byte.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use openssl::hash::MessageDigest;
use openssl::sign::Verifier;
use openssl::x509::X509;
use serde::Serialize;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::bundle::CertificateBundle;
use crate::c14n::{C14N_ALGORITHM, canonicalize, canonicalize_enveloped};
use crate::error::PkiError;
use crate::xml::{ElementSpan, scan};

pub const RSA_SHA1_ALGORITHM: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const SHA1_ALGORITHM: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const ENVELOPED_SIGNATURE_TRANSFORM: &str =
    "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

/// Local names of the elements signed in NF-e, CT-e, MDF-e, NFS-e and
/// event documents.
pub const DEFAULT_SIGNABLE_ELEMENTS: &[&str] = &[
    "infNFe", "infEvento", "infInut", "infCanc", "infCTe", "infMDFe", "infDPS",
];

const SIGNATURE_OPEN: &str = "<Signature xmlns=\"http://www.w3.org/2000/09/xmldsig#\">";

/// A document with an embedded signature and the values that went into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedDocument {
    pub xml: String,
    /// `Id` of the signed element (the reference URI without `#`).
    pub reference_id: String,
    pub digest_value: String,
    pub signature_value: String,
}

/// A signature that [`verify`] accepted.
#[derive(Debug, Clone)]
pub struct VerifiedSignature {
    pub reference_id: String,
    pub digest_value: String,
    /// The certificate embedded in `KeyInfo`; its trust is not checked.
    pub certificate: X509,
}

#[derive(Debug, Clone)]
pub struct CanonicalSigner {
    candidates: Vec<String>,
}

impl Default for CanonicalSigner {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNABLE_ELEMENTS.iter().copied())
    }
}

impl CanonicalSigner {
    /// A signer that looks for elements with any of the given local names.
    pub fn new<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            candidates: candidates.into_iter().map(Into::into).collect(),
        }
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Sign the first candidate element (document order) that has an `Id`.
    pub fn sign(&self, xml: &str, bundle: &CertificateBundle) -> Result<SignedDocument, PkiError> {
        let spans = scan(xml)?;
        let target = spans
            .iter()
            .find(|span| {
                self.candidates.iter().any(|c| *c == span.local_name) && has_id(span)
            })
            .ok_or(PkiError::SignableElementNotFound)?;
        sign_span(xml, &spans, target, bundle)
    }

    /// Sign the first element named `local_name` that has an `Id`,
    /// regardless of the configured candidates.
    pub fn sign_element(
        &self,
        xml: &str,
        local_name: &str,
        bundle: &CertificateBundle,
    ) -> Result<SignedDocument, PkiError> {
        let spans = scan(xml)?;
        let target = spans
            .iter()
            .find(|span| span.local_name == local_name && has_id(span))
            .ok_or(PkiError::SignableElementNotFound)?;
        sign_span(xml, &spans, target, bundle)
    }
}

fn has_id(span: &ElementSpan) -> bool {
    span.attribute("Id").is_some_and(|id| !id.is_empty())
}

fn sign_span(
    xml: &str,
    spans: &[ElementSpan],
    target: &ElementSpan,
    bundle: &CertificateBundle,
) -> Result<SignedDocument, PkiError> {
    if spans
        .iter()
        .any(|span| target.contains(span) && span.is_dsig("Signature"))
    {
        return Err(PkiError::MalformedDocument(format!(
            "<{}> already carries a signature",
            target.qname
        )));
    }
    let reference_id = target
        .attribute("Id")
        .ok_or(PkiError::SignableElementNotFound)?
        .to_string();

    let canonical = canonicalize(xml, target.start)?;
    let digest_value = STANDARD.encode(Sha1::digest(canonical.as_bytes()));
    debug!(
        element = %target.qname,
        reference_id = %reference_id,
        canonical_len = canonical.len(),
        digest = %digest_value,
        "reference digest computed"
    );

    let signed_info = signed_info(&reference_id, &digest_value);
    let certificate = bundle.certificate_base64()?;

    // SignedInfo is canonicalized where it will finally live, so the
    // namespace context matches what a verifier sees.
    let draft = signature_block(&signed_info, "", &certificate);
    let (draft_xml, block_start) = splice(xml, target, &draft)?;
    let canonical_signed_info = canonicalize(&draft_xml, block_start + SIGNATURE_OPEN.len())?;
    let signature = bundle.sign_sha1(canonical_signed_info.as_bytes())?;
    let signature_value = STANDARD.encode(signature);

    let block = signature_block(&signed_info, &signature_value, &certificate);
    let (signed_xml, _) = splice(xml, target, &block)?;

    Ok(SignedDocument {
        xml: signed_xml,
        reference_id,
        digest_value,
        signature_value,
    })
}

fn signed_info(reference_id: &str, digest_value: &str) -> String {
    format!(
        concat!(
            "<SignedInfo>",
            "<CanonicalizationMethod Algorithm=\"{c14n}\"/>",
            "<SignatureMethod Algorithm=\"{rsa}\"/>",
            "<Reference URI=\"#{id}\">",
            "<Transforms>",
            "<Transform Algorithm=\"{enveloped}\"/>",
            "<Transform Algorithm=\"{c14n}\"/>",
            "</Transforms>",
            "<DigestMethod Algorithm=\"{sha1}\"/>",
            "<DigestValue>{digest}</DigestValue>",
            "</Reference>",
            "</SignedInfo>"
        ),
        c14n = C14N_ALGORITHM,
        rsa = RSA_SHA1_ALGORITHM,
        enveloped = ENVELOPED_SIGNATURE_TRANSFORM,
        sha1 = SHA1_ALGORITHM,
        id = escape_id(reference_id),
        digest = digest_value,
    )
}

fn signature_block(signed_info: &str, signature_value: &str, certificate: &str) -> String {
    format!(
        "{SIGNATURE_OPEN}{signed_info}<SignatureValue>{signature_value}</SignatureValue>\
         <KeyInfo><X509Data><X509Certificate>{certificate}</X509Certificate></X509Data></KeyInfo>\
         </Signature>"
    )
}

fn escape_id(id: &str) -> String {
    id.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('"', "&quot;")
}

/// Insert `block` as the last child of `target`; returns the new document
/// and the offset the block starts at.
fn splice(xml: &str, target: &ElementSpan, block: &str) -> Result<(String, usize), PkiError> {
    let mut out = String::with_capacity(xml.len() + block.len() + target.qname.len() + 3);
    if target.self_closing {
        let open = xml[target.start..target.end]
            .strip_suffix("/>")
            .ok_or_else(|| PkiError::MalformedDocument("unterminated empty element".into()))?
            .trim_end();
        out.push_str(&xml[..target.start]);
        out.push_str(open);
        out.push('>');
        let block_start = out.len();
        out.push_str(block);
        out.push_str("</");
        out.push_str(&target.qname);
        out.push('>');
        out.push_str(&xml[target.end..]);
        Ok((out, block_start))
    } else {
        out.push_str(&xml[..target.close_start]);
        let block_start = out.len();
        out.push_str(block);
        out.push_str(&xml[target.close_start..]);
        Ok((out, block_start))
    }
}

/// Check the first enveloped signature in `xml`: the reference digest is
/// recomputed over the referenced element and `SignatureValue` is
/// verified with the public key of the embedded certificate.
pub fn verify(xml: &str) -> Result<VerifiedSignature, PkiError> {
    let spans = scan(xml)?;
    let signature = spans
        .iter()
        .find(|span| span.is_dsig("Signature"))
        .ok_or_else(|| failed("document has no Signature element"))?;

    let signed_info = descendant(&spans, signature, "SignedInfo")?;
    expect_algorithm(&spans, signed_info, "CanonicalizationMethod", C14N_ALGORITHM)?;
    expect_algorithm(&spans, signed_info, "SignatureMethod", RSA_SHA1_ALGORITHM)?;

    let references: Vec<&ElementSpan> = spans
        .iter()
        .filter(|span| signed_info.contains(span) && span.is_dsig("Reference"))
        .collect();
    let [reference] = references.as_slice() else {
        return Err(failed("SignedInfo must hold exactly one Reference"));
    };
    expect_algorithm(&spans, reference, "DigestMethod", SHA1_ALGORITHM)?;

    let mut enveloped = false;
    for transform in spans
        .iter()
        .filter(|span| reference.contains(span) && span.is_dsig("Transform"))
    {
        match transform.attribute("Algorithm") {
            Some(ENVELOPED_SIGNATURE_TRANSFORM) => enveloped = true,
            Some(C14N_ALGORITHM) => {}
            other => {
                return Err(failed(format!(
                    "unsupported transform {}",
                    other.unwrap_or("<none>")
                )));
            }
        }
    }

    let reference_id = reference
        .attribute("URI")
        .and_then(|uri| uri.strip_prefix('#'))
        .filter(|id| !id.is_empty())
        .ok_or_else(|| failed("Reference URI is not a same-document fragment"))?
        .to_string();
    let mut targets = spans
        .iter()
        .filter(|span| span.attribute("Id") == Some(reference_id.as_str()));
    let target = match (targets.next(), targets.next()) {
        (Some(target), None) => target,
        (None, _) => return Err(failed(format!("no element with Id `{reference_id}`"))),
        (Some(_), Some(_)) => return Err(failed(format!("Id `{reference_id}` is not unique"))),
    };

    let canonical = if enveloped && target.contains(signature) {
        canonicalize_enveloped(xml, target.start, signature.start)?
    } else {
        canonicalize(xml, target.start)?
    };
    let digest_value = descendant(&spans, reference, "DigestValue")?.text(xml)?;
    let expected_digest = decode_base64(&digest_value, "DigestValue")?;
    if Sha1::digest(canonical.as_bytes()).as_slice() != expected_digest.as_slice() {
        return Err(failed("reference digest does not match"));
    }

    let signature_value = descendant(&spans, signature, "SignatureValue")?.text(xml)?;
    let signature_bytes = decode_base64(&signature_value, "SignatureValue")?;
    let certificate_text = descendant(&spans, signature, "X509Certificate")?.text(xml)?;
    let certificate = X509::from_der(&decode_base64(&certificate_text, "X509Certificate")?)
        .map_err(|e| failed(format!("embedded certificate: {e}")))?;
    let public_key = certificate
        .public_key()
        .map_err(|e| failed(format!("embedded certificate key: {e}")))?;

    let canonical_signed_info = canonicalize(xml, signed_info.start)?;
    let mut verifier = Verifier::new(MessageDigest::sha1(), &public_key)
        .map_err(|e| failed(format!("verifier: {e}")))?;
    verifier
        .update(canonical_signed_info.as_bytes())
        .map_err(|e| failed(format!("verifier: {e}")))?;
    let valid = verifier
        .verify(&signature_bytes)
        .map_err(|e| failed(format!("verifier: {e}")))?;
    if !valid {
        return Err(failed("signature value does not match SignedInfo"));
    }

    Ok(VerifiedSignature {
        reference_id,
        digest_value: digest_value.trim().to_string(),
        certificate,
    })
}

fn failed(message: impl Into<String>) -> PkiError {
    PkiError::VerificationFailed(message.into())
}

fn descendant<'a>(
    spans: &'a [ElementSpan],
    parent: &ElementSpan,
    local_name: &str,
) -> Result<&'a ElementSpan, PkiError> {
    spans
        .iter()
        .find(|span| parent.contains(span) && span.is_dsig(local_name))
        .ok_or_else(|| failed(format!("missing {local_name}")))
}

fn expect_algorithm(
    spans: &[ElementSpan],
    parent: &ElementSpan,
    local_name: &str,
    expected: &str,
) -> Result<(), PkiError> {
    let algorithm = descendant(spans, parent, local_name)?.attribute("Algorithm");
    if algorithm == Some(expected) {
        Ok(())
    } else {
        Err(failed(format!(
            "unsupported {local_name} {}",
            algorithm.unwrap_or("<none>")
        )))
    }
}

fn decode_base64(text: &str, field: &str) -> Result<Vec<u8>, PkiError> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| failed(format!("{field} is not base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, FixtureOptions};
    use crate::xml::XMLDSIG_NS;
    use chrono::Utc;

    const NFE: &str = r#"<?xml version="1.0" encoding="UTF-8"?><NFe xmlns="http://www.portalfiscal.inf.br/nfe"><infNFe Id="NFe1" versao="4.00"><x>1</x></infNFe></NFe>"#;

    fn bundle() -> CertificateBundle {
        let now = Utc::now();
        let pfx = fixtures::build_pfx(&FixtureOptions::valid_around(now));
        CertificateBundle::parse_at(&pfx, fixtures::PASSPHRASE, now).unwrap()
    }

    #[test]
    fn digest_is_over_the_canonical_form() {
        let signed = CanonicalSigner::default().sign(NFE, &bundle()).unwrap();
        assert_eq!(signed.reference_id, "NFe1");
        // SHA-1 of <infNFe xmlns="http://www.portalfiscal.inf.br/nfe" Id="NFe1" versao="4.00"><x>1</x></infNFe>
        assert_eq!(signed.digest_value, "8J30Ky3GdNy3DWd+KylAqup0hEs=");
    }

    #[test]
    fn signature_is_the_last_child_of_the_signed_element() {
        let signed = CanonicalSigner::default().sign(NFE, &bundle()).unwrap();
        assert_eq!(signed.xml.matches("<Signature ").count(), 1);
        assert!(signed.xml.contains(r##"<Reference URI="#NFe1">"##));
        assert!(signed.xml.contains("</KeyInfo></Signature></infNFe></NFe>"));
        assert!(signed.xml.starts_with(
            r#"<?xml version="1.0" encoding="UTF-8"?><NFe xmlns="http://www.portalfiscal.inf.br/nfe"><infNFe Id="NFe1" versao="4.00"><x>1</x><Signature xmlns="http://www.w3.org/2000/09/xmldsig#"><SignedInfo>"#
        ));
    }

    #[test]
    fn signing_is_deterministic() {
        let bundle = bundle();
        let signer = CanonicalSigner::default();
        let first = signer.sign(NFE, &bundle).unwrap();
        let second = signer.sign(NFE, &bundle).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn signed_document_verifies() {
        let signed = CanonicalSigner::default().sign(NFE, &bundle()).unwrap();
        let verified = verify(&signed.xml).unwrap();
        assert_eq!(verified.reference_id, "NFe1");
        assert_eq!(verified.digest_value, signed.digest_value);
    }

    #[test]
    fn tampering_breaks_verification() {
        let bundle = bundle();
        let signed = CanonicalSigner::default().sign(NFE, &bundle).unwrap();
        let tampered = signed.xml.replacen("<x>1</x>", "<x>2</x>", 1);
        let err = verify(&tampered).unwrap_err();
        assert!(matches!(err, PkiError::VerificationFailed(_)), "got {err:?}");

        let resigned = CanonicalSigner::default()
            .sign(&NFE.replacen("<x>1</x>", "<x>2</x>", 1), &bundle)
            .unwrap();
        assert_ne!(resigned.digest_value, signed.digest_value);
    }

    #[test]
    fn forged_signature_value_is_rejected() {
        let signed = CanonicalSigner::default().sign(NFE, &bundle()).unwrap();
        let mut bytes = STANDARD.decode(&signed.signature_value).unwrap();
        bytes[0] ^= 0x01;
        let forged = signed
            .xml
            .replace(&signed.signature_value, &STANDARD.encode(bytes));
        let err = verify(&forged).unwrap_err();
        assert!(matches!(err, PkiError::VerificationFailed(_)), "got {err:?}");
    }

    #[test]
    fn custom_candidates_and_plain_documents() {
        let signer = CanonicalSigner::new(["infDoc"]);
        let doc = r#"<infDoc Id="DOC1"><v>1</v></infDoc>"#;
        let signed = signer.sign(doc, &bundle()).unwrap();
        assert_eq!(signed.digest_value, "+4p+5IjDrCW0vUZ2jpVzjXazYi8=");
        assert!(signed.xml.contains(r##"URI="#DOC1""##));
        verify(&signed.xml).unwrap();
    }

    #[test]
    fn first_candidate_in_document_order_wins() {
        let doc = r#"<lote><infEvento Id="ID1"><a/></infEvento><infEvento Id="ID2"><a/></infEvento></lote>"#;
        let signed = CanonicalSigner::default().sign(doc, &bundle()).unwrap();
        assert_eq!(signed.reference_id, "ID1");
        assert!(signed.xml.contains("</Signature></infEvento><infEvento Id=\"ID2\">"));
    }

    #[test]
    fn elements_without_id_are_skipped() {
        let doc = r#"<r><infNFe><a/></infNFe><infNFe Id="NFe9"><a/></infNFe></r>"#;
        let signed = CanonicalSigner::default().sign(doc, &bundle()).unwrap();
        assert_eq!(signed.reference_id, "NFe9");
    }

    #[test]
    fn explicit_element_name() {
        let doc = r#"<r><infNFe Id="A"/><detEvento Id="B"><c/></detEvento></r>"#;
        let signed = CanonicalSigner::default()
            .sign_element(doc, "detEvento", &bundle())
            .unwrap();
        assert_eq!(signed.reference_id, "B");
        verify(&signed.xml).unwrap();
    }

    #[test]
    fn self_closing_element_is_expanded() {
        let doc = r#"<r><infNFe Id="NFe2" /></r>"#;
        let signed = CanonicalSigner::default().sign(doc, &bundle()).unwrap();
        assert!(signed.xml.starts_with(r#"<r><infNFe Id="NFe2"><Signature "#));
        assert!(signed.xml.ends_with("</Signature></infNFe></r>"));
        verify(&signed.xml).unwrap();
    }

    #[test]
    fn missing_element_is_reported() {
        let err = CanonicalSigner::default()
            .sign("<root><other Id=\"x\"/></root>", &bundle())
            .unwrap_err();
        assert!(matches!(err, PkiError::SignableElementNotFound), "got {err:?}");
    }

    #[test]
    fn malformed_document_is_reported() {
        let err = CanonicalSigner::default()
            .sign("<NFe><infNFe Id=\"a\"></NFe>", &bundle())
            .unwrap_err();
        assert!(matches!(err, PkiError::MalformedDocument(_)), "got {err:?}");
    }

    #[test]
    fn already_signed_element_is_rejected() {
        let bundle = bundle();
        let signed = CanonicalSigner::default().sign(NFE, &bundle).unwrap();
        let err = CanonicalSigner::default()
            .sign(&signed.xml, &bundle)
            .unwrap_err();
        assert!(matches!(err, PkiError::MalformedDocument(_)), "got {err:?}");
    }

    #[test]
    fn signature_element_uses_the_dsig_namespace() {
        assert!(SIGNATURE_OPEN.contains(XMLDSIG_NS));
    }

    #[test]
    fn unsigned_document_does_not_verify() {
        let err = verify(NFE).unwrap_err();
        assert!(matches!(err, PkiError::VerificationFailed(_)), "got {err:?}");
    }
}
