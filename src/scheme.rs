//! Fixed names and values of the annotation signature scheme.

use once_cell::sync::Lazy;

/// Annotation key names, version and signing namespace of one revision of
/// the signature scheme.
///
/// The scheme is immutable; use [`Scheme::notary`] for the process-wide
/// instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scheme {
    prefix: String,
    version: String,
    namespace: String,
    signature_type: String,
}

static NOTARY: Lazy<Scheme> = Lazy::new(|| Scheme {
    prefix: "org.notaryproject.signature".into(),
    version: "0.2".into(),
    namespace: "org.notaryproject.sign".into(),
    signature_type: "ssh".into(),
});

/// The five fields of a stored signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKey {
    Version,
    Type,
    Data,
    Identity,
    Descriptor,
}

impl SignatureKey {
    /// All keys in the order they are checked when decoding.
    pub const ALL: [SignatureKey; 5] = [
        SignatureKey::Version,
        SignatureKey::Type,
        SignatureKey::Data,
        SignatureKey::Identity,
        SignatureKey::Descriptor,
    ];

    fn suffix(self) -> &'static str {
        match self {
            SignatureKey::Version => "version",
            SignatureKey::Type => "type",
            SignatureKey::Data => "data",
            SignatureKey::Identity => "identity",
            SignatureKey::Descriptor => "descriptor",
        }
    }
}

impl Scheme {
    /// The scheme used by every signature this crate writes.
    pub fn notary() -> &'static Scheme {
        &NOTARY
    }

    /// The recognized version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The signing namespace handed to the backend.
    ///
    /// This scopes signatures to this protocol and is never the signer's
    /// identity.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The recognized signature type tag.
    pub fn signature_type(&self) -> &str {
        &self.signature_type
    }

    /// Annotation key for `key` in a descriptor's own annotations.
    pub fn key(&self, key: SignatureKey) -> String {
        format!("{}.{}", self.prefix, key.suffix())
    }

    /// Annotation key for `key` in the index-wide layout, where the
    /// descriptor digest disambiguates entries.
    pub fn suffixed_key(&self, key: SignatureKey, digest: &str) -> String {
        format!("{}.{}.{digest}", self.prefix, key.suffix())
    }

    /// Whether `key` lies in the namespace reserved for signature records.
    pub fn is_reserved(&self, key: &str) -> bool {
        key.strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.starts_with('.'))
    }
}
