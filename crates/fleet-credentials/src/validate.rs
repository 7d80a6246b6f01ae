//! Subject validators
//!
//! Keep a client from obtaining a certificate for an identity it does not own.

use crate::error::CredentialError;
use crate::signer::{CsrSubject, SubjectValidator};
use std::sync::Arc;

/// Requires the CSR common name to equal `expected`.
pub fn cn_should_be(expected: impl Into<String>) -> SubjectValidator {
    let expected = expected.into();
    Arc::new(move |subject: &CsrSubject| {
        if subject.common_name == expected {
            Ok(())
        } else {
            Err(CredentialError::SubjectValidation(format!(
                "expected CN {} got {}",
                expected, subject.common_name
            )))
        }
    })
}

/// Requires the CSR common name to equal `domain` or to be a wildcard covering it.
///
/// A common name starting with `*` is accepted when `domain` ends with the
/// rest of it (`*.example.com` covers `relay.example.com`). An empty common
/// name is rejected.
pub fn cn_should_be_star(domain: impl Into<String>) -> SubjectValidator {
    let domain = domain.into();
    Arc::new(move |subject: &CsrSubject| {
        let cn = subject.common_name.as_str();
        let matches = match cn.strip_prefix('*') {
            Some(suffix) => domain.ends_with(suffix),
            None => !cn.is_empty() && cn == domain,
        };
        if matches {
            Ok(())
        } else {
            Err(CredentialError::SubjectValidation(format!(
                "expected CN {} got {}",
                domain, cn
            )))
        }
    })
}

/// Accepts every subject.
pub fn no_subject_validate() -> SubjectValidator {
    Arc::new(|_: &CsrSubject| Ok(()))
}
