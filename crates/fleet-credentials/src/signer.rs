//! CSR signer
//!
//! Signs certificate requests with the bootstrap CA. The CSR subject is kept;
//! serial, validity, key usage and subject alternative names are set by the
//! signer from its [`SignerOptions`].

use crate::error::CredentialError;
use crate::key::decode_private_key;
use rcgen::{
    CertificateSigningRequestParams, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, SanType, SerialNumber, string::Ia5String,
};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use x509_parser::prelude::*;

/// Default validity of issued certificates (10 years).
pub const DEFAULT_CERT_VALIDITY: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

const CSR_PEM_TAG: &str = "CERTIFICATE REQUEST";

/// Subject fields of a CSR visible to validators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsrSubject {
    pub common_name: String,
    pub organizations: Vec<String>,
    pub organizational_units: Vec<String>,
}

/// Check run against the CSR subject before signing.
pub type SubjectValidator = Arc<dyn Fn(&CsrSubject) -> Result<(), CredentialError> + Send + Sync>;

/// Signing policy.
#[derive(Clone)]
pub struct SignerOptions {
    /// Add the `ClientAuth` extended key usage
    pub client: bool,
    /// Add the `ServerAuth` extended key usage
    pub server: bool,
    /// Validators; any failure aborts signing
    pub subject_validators: Vec<SubjectValidator>,
    /// Lifetime of issued certificates
    pub cert_validity: Duration,
    /// DNS subject alternative names
    pub alt_names: Vec<String>,
    /// IP subject alternative names
    pub ip_addresses: Vec<String>,
}

impl Default for SignerOptions {
    fn default() -> Self {
        Self {
            client: false,
            server: false,
            subject_validators: Vec::new(),
            cert_validity: DEFAULT_CERT_VALIDITY,
            alt_names: Vec::new(),
            ip_addresses: Vec::new(),
        }
    }
}

impl fmt::Debug for SignerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerOptions")
            .field("client", &self.client)
            .field("server", &self.server)
            .field("subject_validators", &self.subject_validators.len())
            .field("cert_validity", &self.cert_validity)
            .field("alt_names", &self.alt_names)
            .field("ip_addresses", &self.ip_addresses)
            .finish()
    }
}

/// CA-backed CSR signer. The decrypted CA key lives only in memory.
pub struct Signer {
    issuer: Issuer<'static, KeyPair>,
    ca_cert_pem: String,
    opts: SignerOptions,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").field("opts", &self.opts).finish_non_exhaustive()
    }
}

impl Signer {
    /// Loads the CA once; `password` decrypts an encrypted CA key.
    pub fn new(
        ca_cert_pem: &str,
        ca_key_pem: &str,
        password: Option<&[u8]>,
        opts: SignerOptions,
    ) -> Result<Self, CredentialError> {
        let key = decode_private_key(ca_key_pem, password)?;
        let issuer = Issuer::from_ca_cert_pem(ca_cert_pem, key)
            .map_err(|e| CredentialError::Parse(format!("failed to load CA certificate: {}", e)))?;
        Ok(Self {
            issuer,
            ca_cert_pem: ca_cert_pem.to_string(),
            opts,
        })
    }

    /// PEM encoded CA certificate, handed out with issued certificates.
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// Signs a PEM encoded CSR and returns the PEM encoded certificate.
    pub fn sign(&self, csr_pem: &str) -> Result<String, CredentialError> {
        let block = ::pem::parse(csr_pem.as_bytes())
            .map_err(|e| CredentialError::InvalidCsr(format!("failed to decode PEM: {}", e)))?;
        if block.tag() != CSR_PEM_TAG {
            return Err(CredentialError::InvalidCsr(format!(
                "unexpected PEM type {}",
                block.tag()
            )));
        }

        let subject = csr_subject(block.contents())?;
        for validate in &self.opts.subject_validators {
            validate(&subject)?;
        }

        let mut csr = CertificateSigningRequestParams::from_pem(csr_pem)
            .map_err(|e| CredentialError::InvalidCsr(format!("failed to parse CSR: {}", e)))?;

        let params = &mut csr.params;
        params.is_ca = IsCa::NoCa;
        params.serial_number = Some(random_serial());
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = self.extended_key_usages();
        params.subject_alt_names = self.subject_alt_names()?;

        let not_before = ::time::OffsetDateTime::now_utc();
        params.not_before = not_before;
        params.not_after = not_before + self.opts.cert_validity;

        let cert = csr
            .signed_by(&self.issuer)
            .map_err(|e| CredentialError::Certificate(e.to_string()))?;

        debug!("Signed certificate for CN {}", subject.common_name);
        Ok(cert.pem())
    }

    fn extended_key_usages(&self) -> Vec<ExtendedKeyUsagePurpose> {
        let mut usages = Vec::new();
        if self.opts.client {
            usages.push(ExtendedKeyUsagePurpose::ClientAuth);
        }
        if self.opts.server {
            usages.push(ExtendedKeyUsagePurpose::ServerAuth);
        }
        usages
    }

    fn subject_alt_names(&self) -> Result<Vec<SanType>, CredentialError> {
        let dns = self.opts.alt_names.iter().map(|name| {
            Ia5String::try_from(name.clone())
                .map(SanType::DnsName)
                .map_err(|e| CredentialError::InvalidDnsName(name.clone(), e.to_string()))
        });
        let ips = self.opts.ip_addresses.iter().map(|ip| {
            ip.parse::<IpAddr>()
                .map(SanType::IpAddress)
                .map_err(|_| CredentialError::InvalidIpAddress(ip.clone()))
        });
        dns.chain(ips).collect()
    }
}

/// Random positive serial below 2^128.
fn random_serial() -> SerialNumber {
    let mut bytes: [u8; 16] = rand::random();
    bytes[0] &= 0x7f;
    SerialNumber::from_slice(&bytes)
}

fn csr_subject(der: &[u8]) -> Result<CsrSubject, CredentialError> {
    let (_, csr) = X509CertificationRequest::from_der(der)
        .map_err(|e| CredentialError::InvalidCsr(format!("failed to parse CSR: {}", e)))?;
    let name = &csr.certification_request_info.subject;

    Ok(CsrSubject {
        common_name: attr_strings(name.iter_common_name())
            .into_iter()
            .next()
            .unwrap_or_default(),
        organizations: attr_strings(name.iter_organization()),
        organizational_units: attr_strings(name.iter_organizational_unit()),
    })
}

pub(crate) fn attr_strings<'a, 'b: 'a>(attrs: impl Iterator<Item = &'a AttributeTypeAndValue<'b>>) -> Vec<String> {
    attrs
        .filter_map(|attr| attr.as_str().ok().map(str::to_string))
        .collect()
}

#[cfg(test)]
#[path = "signer_test.rs"]
mod signer_test;
