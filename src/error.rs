//! Error types for signing and verifying index entries.
//!
//! Every failure of the protocol core is reported through [`Error`]. The
//! variants carry structured fields so that callers (and tests) can match on
//! what went wrong rather than parse messages.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A descriptor field checked by the anti-substitution comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorField {
    /// The descriptor media type.
    MediaType,
    /// The artifact type, empty when absent.
    ArtifactType,
    /// The content size in bytes.
    Size,
    /// The digest algorithm, e.g. `sha256`.
    DigestAlgorithm,
    /// The encoded digest value.
    DigestHex,
    /// The number of fallback URLs.
    UrlCount,
    /// The fallback URL at the given position.
    Url(usize),
    /// Presence of the platform object.
    Platform,
    /// The platform architecture.
    Architecture,
    /// The platform operating system.
    Os,
    /// The platform OS version.
    OsVersion,
    /// The platform variant.
    Variant,
    /// The number of required OS features.
    OsFeatureCount,
    /// The OS feature at the given position.
    OsFeature(usize),
    /// The number of platform features.
    FeatureCount,
    /// The platform feature at the given position.
    Feature(usize),
    /// The annotation with the given key.
    Annotation(String),
}

impl fmt::Display for DescriptorField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorField::MediaType => f.write_str("media type"),
            DescriptorField::ArtifactType => f.write_str("artifact type"),
            DescriptorField::Size => f.write_str("size"),
            DescriptorField::DigestAlgorithm => f.write_str("digest algorithm"),
            DescriptorField::DigestHex => f.write_str("digest"),
            DescriptorField::UrlCount => f.write_str("number of URLs"),
            DescriptorField::Url(i) => write!(f, "URL {i}"),
            DescriptorField::Platform => f.write_str("platform"),
            DescriptorField::Architecture => f.write_str("platform architecture"),
            DescriptorField::Os => f.write_str("platform OS"),
            DescriptorField::OsVersion => f.write_str("platform OS version"),
            DescriptorField::Variant => f.write_str("platform variant"),
            DescriptorField::OsFeatureCount => f.write_str("number of OS features"),
            DescriptorField::OsFeature(i) => write!(f, "OS feature {i}"),
            DescriptorField::FeatureCount => f.write_str("number of features"),
            DescriptorField::Feature(i) => write!(f, "feature {i}"),
            DescriptorField::Annotation(key) => write!(f, "annotation {key}"),
        }
    }
}

/// Signing or verification failed.
#[derive(Error, Debug)]
pub enum Error {
    /// A signed payload or annotation value could not be decoded.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    /// No signer identity was supplied.
    #[error("Must specify a signer identity")]
    MissingIdentity,
    /// The signing backend could not be run at all, including when no key
    /// was given.
    #[error("Signing backend unavailable: {0}")]
    SigningUnavailable(String),
    /// The signing backend ran but declined to sign.
    #[error("Signing rejected: {0}")]
    SigningRejected(String),
    /// The verification backend could not be run at all.
    #[error("Verification backend unavailable: {0}")]
    BackendUnavailable(String),
    /// The signature does not verify for the claimed identity.
    #[error("Signature validation failed: {0}")]
    VerificationFailed(String),
    /// No signature (or an incomplete one) is attached for this digest.
    #[error("Cannot find valid signature for digest {digest} (missing {missing})")]
    SignatureNotFound {
        /// Digest of the descriptor being verified.
        digest: String,
        /// The annotation key that was looked for.
        missing: String,
    },
    /// The stored signature uses a version this crate does not understand.
    #[error("Signature version mismatch, expecting {expected} got {found}")]
    UnsupportedVersion {
        /// The recognized version.
        expected: String,
        /// The version found in the annotations.
        found: String,
    },
    /// The stored or requested signature type is not supported.
    #[error("Unsupported signature type: {0}")]
    UnsupportedType(String),
    /// The live descriptor differs from the descriptor that was signed.
    #[error("Mismatch in {field} in descriptor: signed {signed} verify {live}")]
    DescriptorMismatch {
        /// The field that differs.
        field: DescriptorField,
        /// The value recorded in the signed descriptor.
        signed: String,
        /// The value found on the live descriptor.
        live: String,
    },
    /// The descriptor already carries a signature and re-signing is disabled.
    #[error("Descriptor {digest} is already signed")]
    AlreadySigned {
        /// Digest of the already-signed descriptor.
        digest: String,
    },
    /// A platform selector string could not be parsed.
    #[error("failed to parse platform '{platform}': {reason}")]
    InvalidPlatform {
        /// The string that was given.
        platform: String,
        /// Why it was rejected.
        reason: &'static str,
    },
    /// No descriptor in the index matches the requested platform.
    #[error("Cannot find matching platform to {0}")]
    PlatformNotFound(String),
    /// The index has no descriptors to verify.
    #[error("Index contains no manifests")]
    EmptyIndex,
    /// A directory is not a usable OCI image layout.
    #[error("{} is not an OCI image layout: {reason}", .path.display())]
    InvalidLayout {
        /// The layout directory.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },
    /// Reading or writing a layout file failed.
    #[error("{}: {source}", .path.display())]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn mismatch(
        field: DescriptorField,
        signed: impl ToString,
        live: impl ToString,
    ) -> Self {
        Error::DescriptorMismatch {
            field,
            signed: signed.to_string(),
            live: live.to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Error::Io { path, source }
    }
}
