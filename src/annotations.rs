//! Storing signatures in OCI annotations.
//!
//! Annotations are the only metadata channel an image index offers, so a
//! signature is spread over five string keys under the reserved
//! `org.notaryproject.signature` prefix: version, type, identity, the
//! base64 signature (`data`) and the base64 signed descriptor
//! (`descriptor`).
//!
//! Two layouts exist. Current signatures live in each descriptor's own
//! annotations. Older tools merged every signature into the index-level
//! annotations, suffixing each key with `.` and the descriptor digest to
//! tell them apart; those are still read.

use std::collections::HashMap;
use std::fmt;

use base64::engine::{general_purpose::STANDARD as BASE64, Engine};
use oci_spec::image::Digest;

use crate::error::{Error, Result};
use crate::scheme::{Scheme, SignatureKey};

/// Where the signature keys for a descriptor are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Unsuffixed keys in the descriptor's own annotations.
    PerDescriptor,
    /// Digest-suffixed keys in the index's top-level annotations.
    IndexWide,
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Layout::PerDescriptor => "per-descriptor",
            Layout::IndexWide => "index-wide",
        })
    }
}

impl Layout {
    fn key(self, scheme: &Scheme, key: SignatureKey, digest: &str) -> String {
        match self {
            Layout::PerDescriptor => scheme.key(key),
            Layout::IndexWide => scheme.suffixed_key(key, digest),
        }
    }

    /// Picks the layout a signature for `digest` was stored with, if any.
    ///
    /// A signature on the descriptor itself wins over an index-wide one.
    pub fn detect(
        descriptor_annotations: Option<&HashMap<String, String>>,
        index_annotations: Option<&HashMap<String, String>>,
        digest: &Digest,
    ) -> Option<Layout> {
        let scheme = Scheme::notary();
        let digest = digest.to_string();
        [
            (Layout::PerDescriptor, descriptor_annotations),
            (Layout::IndexWide, index_annotations),
        ]
        .into_iter()
        .find_map(|(layout, annotations)| {
            let version_key = layout.key(scheme, SignatureKey::Version, &digest);
            annotations
                .is_some_and(|a| a.contains_key(&version_key))
                .then_some(layout)
        })
    }
}

/// One decoded signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    /// Scheme version the signature was written with.
    pub version: String,
    /// Backend type tag, e.g. `ssh`.
    pub signature_type: String,
    /// Who claims to have signed.
    pub identity: String,
    /// The canonical descriptor bytes that were signed.
    pub descriptor: Vec<u8>,
    /// The opaque signature over `descriptor`.
    pub signature: Vec<u8>,
    /// Where the record was found.
    pub layout: Layout,
}

impl SignatureRecord {
    /// A record in the current scheme version for freshly signed bytes.
    pub fn new(
        signature_type: impl Into<String>,
        identity: impl Into<String>,
        descriptor: Vec<u8>,
        signature: Vec<u8>,
    ) -> Self {
        SignatureRecord {
            version: Scheme::notary().version().to_string(),
            signature_type: signature_type.into(),
            identity: identity.into(),
            descriptor,
            signature,
            layout: Layout::PerDescriptor,
        }
    }
}

/// Flattens `record` into annotation key/value pairs.
///
/// `digest` is only used by [`Layout::IndexWide`].
pub fn encode(record: &SignatureRecord, layout: Layout, digest: &Digest) -> HashMap<String, String> {
    let scheme = Scheme::notary();
    let digest = digest.to_string();
    SignatureKey::ALL
        .into_iter()
        .map(|key| {
            let value = match key {
                SignatureKey::Version => record.version.clone(),
                SignatureKey::Type => record.signature_type.clone(),
                SignatureKey::Data => BASE64.encode(&record.signature),
                SignatureKey::Identity => record.identity.clone(),
                SignatureKey::Descriptor => BASE64.encode(&record.descriptor),
            };
            (layout.key(scheme, key, &digest), value)
        })
        .collect()
}

/// Reads the signature for `digest` out of `annotations`.
///
/// Version and type are checked before anything else is decoded, so an
/// unknown scheme revision is rejected without looking at its payload.
pub fn decode(
    annotations: &HashMap<String, String>,
    digest: &Digest,
    layout: Layout,
) -> Result<SignatureRecord> {
    let scheme = Scheme::notary();
    let digest = digest.to_string();
    let get = |key: SignatureKey| -> Result<&String> {
        let name = layout.key(scheme, key, &digest);
        annotations
            .get(&name)
            .ok_or_else(|| Error::SignatureNotFound {
                digest: digest.clone(),
                missing: name,
            })
    };

    let version = get(SignatureKey::Version)?;
    if version != scheme.version() {
        return Err(Error::UnsupportedVersion {
            expected: scheme.version().to_string(),
            found: version.clone(),
        });
    }

    let signature_type = get(SignatureKey::Type)?;
    if signature_type != scheme.signature_type() {
        return Err(Error::UnsupportedType(signature_type.clone()));
    }

    let descriptor = BASE64
        .decode(get(SignatureKey::Descriptor)?)
        .map_err(|e| Error::MalformedPayload(format!("signed descriptor is not base64: {e}")))?;
    let signature = BASE64
        .decode(get(SignatureKey::Data)?)
        .map_err(|e| Error::MalformedPayload(format!("signature is not base64: {e}")))?;
    let identity = get(SignatureKey::Identity)?;

    Ok(SignatureRecord {
        version: version.clone(),
        signature_type: signature_type.clone(),
        identity: identity.clone(),
        descriptor,
        signature,
        layout,
    })
}

/// Returns `annotations` without any keys of the reserved signature prefix.
pub fn strip_signature(annotations: &HashMap<String, String>) -> HashMap<String, String> {
    let scheme = Scheme::notary();
    annotations
        .iter()
        .filter(|(k, _)| !scheme.is_reserved(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
