//! The PKI capability. Chain building, trust lists and revocation checks are
//! the embedder's concern; the stack only asks one question.

use uasc_types::StatusCode;

use crate::x509::X509;

/// Validates certificate chains. Implementations typically check the chain
/// against a trust list and CRLs loaded from the filesystem.
pub trait Pki: Send + Sync {
    /// Validate `cert` and its chain. A `Bad*` status rejects the peer.
    fn validate_chain(&self, cert: &X509) -> Result<(), StatusCode>;
}

/// A PKI that trusts every syntactically valid certificate. For tests and
/// deployments that pin trust elsewhere.
#[derive(Debug, Default)]
pub struct AcceptAll;

impl Pki for AcceptAll {
    fn validate_chain(&self, _cert: &X509) -> Result<(), StatusCode> {
        Ok(())
    }
}
