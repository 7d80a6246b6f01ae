//! Fleet credential issuer
//!
//! Holds a bootstrap CA and signs certificate requests from bootstrap agents.
//! Agents generate their own key pairs; only CSRs reach the issuer.
//!
//! # Example
//!
//! ```no_run
//! use fleet_credentials::{CaIdentity, CaSubject, Signer, SignerOptions, cn_should_be, generate_ca};
//!
//! # fn example(csr_pem: &str) -> Result<(), fleet_credentials::CredentialError> {
//! let subject = CaSubject::self_signed("relay.fleet.local", &CaIdentity::default());
//! let ca = generate_ca(&subject, None)?;
//!
//! let opts = SignerOptions {
//!     client: true,
//!     subject_validators: vec![cn_should_be("agent-token")],
//!     ..Default::default()
//! };
//! let signer = Signer::new(&ca.cert_pem, &ca.key_pem, None, opts)?;
//! let cert_pem = signer.sign(csr_pem)?;
//! # Ok(())
//! # }
//! ```

pub mod ca;
pub mod error;
pub mod key;
pub mod signer;
pub mod validate;

pub use ca::{CaIdentity, CaMaterial, CaReconcile, CaSource, CaSubject, generate_ca, reconcile_ca};
pub use error::CredentialError;
pub use signer::{CsrSubject, Signer, SignerOptions, SubjectValidator, DEFAULT_CERT_VALIDITY};
pub use validate::{cn_should_be, cn_should_be_star, no_subject_validate};
