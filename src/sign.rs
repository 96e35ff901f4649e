//! Signing every entry of an image index.

use log::{debug, warn};
use oci_spec::image::{Descriptor, ImageIndex};

use crate::annotations::{self, Layout, SignatureRecord};
use crate::backend::SignatureBackend;
use crate::canonical;
use crate::error::{Error, Result};
use crate::scheme::Scheme;

/// What to do with a descriptor that already carries a signature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResignPolicy {
    /// Replace the existing signature.
    #[default]
    Overwrite,
    /// Fail with [`Error::AlreadySigned`].
    Reject,
}

/// Options for [`IndexSigner`].
#[derive(Debug, Clone, Default)]
pub struct SignOptions {
    /// Handling of descriptors that are already signed.
    pub resign: ResignPolicy,
    /// Signature type the caller asked for; must match the backend.
    pub signature_type: Option<String>,
}

/// Signs index descriptors with a [`SignatureBackend`].
#[derive(Debug)]
pub struct IndexSigner<B> {
    backend: B,
    options: SignOptions,
}

impl<B: SignatureBackend> IndexSigner<B> {
    pub fn new(backend: B) -> Self {
        Self::with_options(backend, SignOptions::default())
    }

    pub fn with_options(backend: B, options: SignOptions) -> Self {
        IndexSigner { backend, options }
    }

    /// Returns a copy of `index` where every descriptor carries a signature
    /// by `identity`.
    ///
    /// Descriptors keep all their fields; only annotations are added. The
    /// index media type, schema version and top-level annotations are left
    /// as they are. The first failure aborts the whole operation, so a
    /// partially signed index is never returned.
    pub fn sign_index(
        &self,
        index: &ImageIndex,
        identity: &str,
        key: &B::KeyRef,
    ) -> Result<ImageIndex> {
        self.check_request(identity)?;

        let manifests = index
            .manifests()
            .iter()
            .map(|descriptor| self.sign_one(descriptor, identity, key))
            .collect::<Result<Vec<_>>>()?;

        let mut signed = index.clone();
        signed.set_manifests(manifests);
        Ok(signed)
    }

    /// Signs a single descriptor, returning the annotated copy.
    pub fn sign_descriptor(
        &self,
        descriptor: &Descriptor,
        identity: &str,
        key: &B::KeyRef,
    ) -> Result<Descriptor> {
        self.check_request(identity)?;
        self.sign_one(descriptor, identity, key)
    }

    fn check_request(&self, identity: &str) -> Result<()> {
        if identity.is_empty() {
            return Err(Error::MissingIdentity);
        }
        match &self.options.signature_type {
            Some(requested) if requested != self.backend.signature_type() => {
                Err(Error::UnsupportedType(requested.clone()))
            }
            _ => Ok(()),
        }
    }

    fn sign_one(
        &self,
        descriptor: &Descriptor,
        identity: &str,
        key: &B::KeyRef,
    ) -> Result<Descriptor> {
        let digest = descriptor.digest();
        let existing = descriptor.annotations().as_ref();

        if Layout::detect(existing, None, digest).is_some() {
            if self.options.resign == ResignPolicy::Reject {
                return Err(Error::AlreadySigned {
                    digest: digest.to_string(),
                });
            }
            warn!("overwriting existing signature on {digest}");
        }

        // The old signature must not end up inside the new payload.
        let mut unsigned = descriptor.clone();
        unsigned.set_annotations(existing.map(annotations::strip_signature));

        let payload = canonical::encode(&unsigned)?;
        debug!("signing {digest} ({} byte payload)", payload.len());
        let signature = self.backend.sign(
            &payload,
            Scheme::notary().namespace(),
            identity,
            key,
        )?;

        let record =
            SignatureRecord::new(self.backend.signature_type(), identity, payload, signature);
        let mut merged = unsigned.annotations().clone().unwrap_or_default();
        merged.extend(annotations::encode(&record, Layout::PerDescriptor, digest));

        unsigned.set_annotations(Some(merged));
        Ok(unsigned)
    }
}
