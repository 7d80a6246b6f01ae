//! Credential errors

use thiserror::Error;

/// Errors that can occur while managing the CA or signing requests
#[derive(Debug, Error)]
pub enum CredentialError {
    /// CSR has the wrong PEM type or ASN.1 structure
    #[error("invalid CSR: {0}")]
    InvalidCsr(String),

    /// CSR subject rejected by a validator
    #[error("subject validation failed: {0}")]
    SubjectValidation(String),

    /// Certificate could not be built or signed
    #[error("unable to create certificate: {0}")]
    Certificate(String),

    /// Malformed IP SAN
    #[error("invalid ip address {0}")]
    InvalidIpAddress(String),

    /// Malformed DNS SAN
    #[error("invalid DNS name '{0}': {1}")]
    InvalidDnsName(String, String),

    /// Private key could not be decoded, decrypted or encoded
    #[error("key error: {0}")]
    Key(String),

    /// Certificate could not be parsed
    #[error("certificate parsing error: {0}")]
    Parse(String),

    /// Provided CA certificate missing
    #[error("provided certificate is empty")]
    EmptyCertificate,

    /// Provided CA key missing
    #[error("provided key is empty")]
    EmptyKey,
}
