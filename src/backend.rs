//! The signing capability the protocol is built around.
//!
//! The protocol never touches key material. It hands opaque payloads to a
//! [`SignatureBackend`] and stores whatever signature bytes come back. The
//! reference implementation is [`crate::ssh::SshKeygen`]; an in-process key
//! service or an HSM client can be substituted without changing the
//! signing or verification code.

use crate::error::Result;

/// A capability that produces and checks detached signatures.
pub trait SignatureBackend {
    /// Reference to the signing key, e.g. a private key path.
    type KeyRef: ?Sized;

    /// The set of identities (and their keys) a verifier accepts.
    type Authorized: ?Sized;

    /// The type tag recorded alongside every signature this backend makes.
    fn signature_type(&self) -> &str;

    /// Signs `payload` on behalf of `identity` with the key behind `key`.
    ///
    /// `namespace` is the fixed signing domain of the scheme and must be
    /// bound into the signature. Fails with
    /// [`Error::SigningUnavailable`](crate::Error::SigningUnavailable) when
    /// the backend cannot run and
    /// [`Error::SigningRejected`](crate::Error::SigningRejected) when it ran
    /// and refused.
    fn sign(
        &self,
        payload: &[u8],
        namespace: &str,
        identity: &str,
        key: &Self::KeyRef,
    ) -> Result<Vec<u8>>;

    /// Checks that `signature` over `payload` was made in `namespace` by
    /// `identity`, and that `identity` is in `authorized`.
    ///
    /// A signature that does not check out is reported as
    /// [`Error::VerificationFailed`](crate::Error::VerificationFailed);
    /// [`Error::BackendUnavailable`](crate::Error::BackendUnavailable) is
    /// reserved for failures to run the check at all.
    fn verify(
        &self,
        payload: &[u8],
        signature: &[u8],
        namespace: &str,
        identity: &str,
        authorized: &Self::Authorized,
    ) -> Result<()>;
}

impl<B: SignatureBackend + ?Sized> SignatureBackend for &B {
    type KeyRef = B::KeyRef;
    type Authorized = B::Authorized;

    fn signature_type(&self) -> &str {
        (**self).signature_type()
    }

    fn sign(
        &self,
        payload: &[u8],
        namespace: &str,
        identity: &str,
        key: &Self::KeyRef,
    ) -> Result<Vec<u8>> {
        (**self).sign(payload, namespace, identity, key)
    }

    fn verify(
        &self,
        payload: &[u8],
        signature: &[u8],
        namespace: &str,
        identity: &str,
        authorized: &Self::Authorized,
    ) -> Result<()> {
        (**self).verify(payload, signature, namespace, identity, authorized)
    }
}
