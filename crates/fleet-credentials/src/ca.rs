//! Bootstrap CA management
//!
//! Generates self-signed CAs and decides whether an existing CA can be kept.
//! A self-signed CA is only regenerated when it is missing or its issuer does
//! not carry the expected identity markers, so certificates issued earlier
//! stay valid.

use crate::error::CredentialError;
use crate::key::{decode_private_key, encode_private_key};
use crate::signer::{DEFAULT_CERT_VALIDITY, attr_strings};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, PKCS_ECDSA_P256_SHA256,
};
use tracing::{info, warn};
use x509_parser::prelude::*;

/// Organization fields stamped on self-signed CAs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaIdentity {
    pub country: String,
    pub organization: String,
    pub organizational_unit: String,
    pub province: String,
    pub locality: String,
}

impl Default for CaIdentity {
    fn default() -> Self {
        Self {
            country: "USA".to_string(),
            organization: "Microscaler".to_string(),
            organizational_unit: "Fleet Sentry".to_string(),
            province: "California".to_string(),
            locality: "Sunnyvale".to_string(),
        }
    }
}

/// Full subject of a CA certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaSubject {
    pub common_name: String,
    pub identity: CaIdentity,
}

impl CaSubject {
    /// Subject of the self-signed CA for a relay network.
    pub fn self_signed(relay_network_name: &str, identity: &CaIdentity) -> Self {
        Self {
            common_name: relay_network_name.to_string(),
            identity: identity.clone(),
        }
    }

    fn distinguished_name(&self) -> DistinguishedName {
        let mut dn = DistinguishedName::new();
        let id = &self.identity;
        dn.push(DnType::CommonName, DnValue::Utf8String(self.common_name.clone()));
        dn.push(DnType::CountryName, DnValue::Utf8String(id.country.clone()));
        dn.push(DnType::OrganizationName, DnValue::Utf8String(id.organization.clone()));
        dn.push(
            DnType::OrganizationalUnitName,
            DnValue::Utf8String(id.organizational_unit.clone()),
        );
        dn.push(DnType::StateOrProvinceName, DnValue::Utf8String(id.province.clone()));
        dn.push(DnType::LocalityName, DnValue::Utf8String(id.locality.clone()));
        dn
    }
}

/// PEM encoded CA certificate and key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CaMaterial {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Where the CA of a bootstrap domain comes from.
#[derive(Debug, Clone, Copy)]
pub enum CaSource<'a> {
    /// Operator supplied certificate and key
    Provided { cert_pem: &'a str, key_pem: &'a str },
    /// CA generated and owned by the control plane
    SelfSigned,
}

/// Outcome of [`reconcile_ca`].
#[derive(Debug, Clone)]
pub struct CaReconcile {
    pub material: CaMaterial,
    /// True if `material` differs from the existing CA and must be persisted
    pub changed: bool,
}

/// Self-issues a new ECDSA P-256 root valid for 10 years.
pub fn generate_ca(subject: &CaSubject, password: Option<&[u8]>) -> Result<CaMaterial, CredentialError> {
    let mut params = CertificateParams::default();
    params.distinguished_name = subject.distinguished_name();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyCertSign];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ClientAuth,
        ExtendedKeyUsagePurpose::ServerAuth,
    ];
    let not_before = ::time::OffsetDateTime::now_utc();
    params.not_before = not_before;
    params.not_after = not_before + DEFAULT_CERT_VALIDITY;

    let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
        .map_err(|e| CredentialError::Key(format!("failed to generate CA key: {}", e)))?;
    let cert = params
        .self_signed(&key)
        .map_err(|e| CredentialError::Certificate(format!("failed to create CA cert: {}", e)))?;

    Ok(CaMaterial {
        cert_pem: cert.pem(),
        key_pem: encode_private_key(&key, password)?,
    })
}

/// True if the issuer of `cert_pem` carries `subject`'s common name and identity markers.
pub fn issuer_matches(cert_pem: &str, subject: &CaSubject) -> Result<bool, CredentialError> {
    let block = ::pem::parse(cert_pem.as_bytes())
        .map_err(|e| CredentialError::Parse(format!("failed to parse PEM: {}", e)))?;
    let (_, cert) = X509Certificate::from_der(block.contents())
        .map_err(|e| CredentialError::Parse(format!("failed to parse certificate: {}", e)))?;
    let issuer = cert.issuer();

    let id = &subject.identity;
    let expected = [
        (attr_strings(issuer.iter_common_name()), &subject.common_name),
        (attr_strings(issuer.iter_organization()), &id.organization),
        (attr_strings(issuer.iter_organizational_unit()), &id.organizational_unit),
        (attr_strings(issuer.iter_locality()), &id.locality),
        (attr_strings(issuer.iter_state_or_province()), &id.province),
    ];
    Ok(expected
        .iter()
        .all(|(values, want)| values.first() == Some(*want)))
}

/// Checks that a certificate and key pair can be loaded.
pub fn validate_ca(material: &CaMaterial, password: Option<&[u8]>) -> Result<(), CredentialError> {
    if material.cert_pem.trim().is_empty() {
        return Err(CredentialError::EmptyCertificate);
    }
    if material.key_pem.trim().is_empty() {
        return Err(CredentialError::EmptyKey);
    }
    let block = ::pem::parse(material.cert_pem.as_bytes())
        .map_err(|e| CredentialError::Parse(format!("failed to parse PEM: {}", e)))?;
    X509Certificate::from_der(block.contents())
        .map_err(|e| CredentialError::Parse(format!("failed to parse certificate: {}", e)))?;
    decode_private_key(&material.key_pem, password)?;
    Ok(())
}

/// Decides which CA a bootstrap domain uses.
///
/// Provided material is validated and adopted. In the self-signed case the
/// existing CA is reused when its issuer matches `subject`; otherwise a new CA
/// is generated.
pub fn reconcile_ca(
    existing: Option<&CaMaterial>,
    subject: &CaSubject,
    source: CaSource<'_>,
    password: Option<&[u8]>,
) -> Result<CaReconcile, CredentialError> {
    let material = match source {
        CaSource::Provided { cert_pem, key_pem } => {
            let provided = CaMaterial {
                cert_pem: cert_pem.to_string(),
                key_pem: key_pem.to_string(),
            };
            validate_ca(&provided, password)?;
            provided
        }
        CaSource::SelfSigned => {
            let reusable = match existing {
                Some(ca) if !ca.cert_pem.is_empty() && !ca.key_pem.is_empty() => {
                    issuer_matches(&ca.cert_pem, subject).unwrap_or_else(|e| {
                        warn!("Existing CA unusable, regenerating: {}", e);
                        false
                    })
                }
                _ => false,
            };
            match existing {
                Some(ca) if reusable => ca.clone(),
                _ => {
                    info!("Generating self-signed CA for {}", subject.common_name);
                    generate_ca(subject, password)?
                }
            }
        }
    };
    let changed = existing != Some(&material);
    Ok(CaReconcile { material, changed })
}

#[cfg(test)]
#[path = "ca_test.rs"]
mod ca_test;
